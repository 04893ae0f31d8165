//! Weak references: registration and the post-sweep update pass.

use core::ptr::NonNull;

use crate::alloc::{BlockType, arena};
use crate::object::ObjectPtr;

use super::Collector;

/// One registered weak reference: the object holding it and the address of
/// the slot to null out when the target dies.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WeakRefEntry {
    pub(crate) holder: ObjectPtr,
    pub(crate) slot: NonNull<Option<ObjectPtr>>,
}

impl Collector {
    /// Register a weak reference held by `holder` at `slot`.
    ///
    /// `holder` must be a normal heap object (prebuilt and huge holders are
    /// not supported). The slot must currently designate a valid object; weak
    /// references to prebuilt targets are ignored because those never die.
    ///
    /// # Safety
    ///
    /// `slot` must point inside `holder` and stay readable and writable until
    /// either the entry is dropped by a collection or the holder dies.
    pub unsafe fn register_weakref(&mut self, holder: ObjectPtr, slot: NonNull<Option<ObjectPtr>>) {
        debug_assert!(!holder.is_prebuilt());
        debug_assert!(!arena::is_arena_aligned(holder.addr()));

        // SAFETY: caller contract, the slot is readable.
        let Some(target) = (unsafe { *slot.as_ptr() }) else {
            return;
        };
        if target.is_prebuilt() {
            return;
        }
        self.weakrefs.push(WeakRefEntry { holder, slot });
    }

    /// Walk the bag after sweep, dropping entries whose holder died and
    /// nulling slots whose target died. Runs once sweep has updated every
    /// blocktype, so EXTENT/FREE means dead and WHITE/BLACK means alive.
    pub(crate) fn update_weakrefs(&mut self) {
        let mut index = 0;
        while index < self.weakrefs.len() {
            let entry = self.weakrefs[index];

            // SAFETY: registration guarantees the holder was a normal heap
            // object, so its blocktype bitmap entry exists.
            match unsafe { arena::blocktype(entry.holder.addr()) } {
                BlockType::Extent | BlockType::Free => {
                    // The holder itself was collected; its slot memory is
                    // gone with it.
                    self.weakrefs.swap_remove(index);
                    continue;
                }
                BlockType::White | BlockType::Black => {}
            }

            // SAFETY: the holder is intact, so the slot inside it still is.
            let target = unsafe { *entry.slot.as_ptr() };
            let alive = match target {
                None => {
                    // The mutator already cleared the slot.
                    self.weakrefs.swap_remove(index);
                    continue;
                }
                // Address check first: a dead huge block's header is gone, so
                // nothing may be read through the pointer before table
                // membership is settled.
                Some(target) if arena::is_arena_aligned(target.addr()) => {
                    self.huge.contains(target.addr())
                }
                Some(target) if target.is_prebuilt() => true,
                // SAFETY: a normal heap target lies inside an arena.
                Some(target) => matches!(
                    unsafe { arena::blocktype(target.addr()) },
                    BlockType::White | BlockType::Black
                ),
            };

            if alive {
                index += 1;
            } else {
                // SAFETY: the holder survived, the slot is writable.
                unsafe { *entry.slot.as_ptr() = None };
                self.weakrefs.swap_remove(index);
            }
        }
    }
}
