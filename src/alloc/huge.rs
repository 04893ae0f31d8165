//! Side table for huge blocks.
//!
//! Huge blocks are allocated with arena alignment, so their base address is
//! what identifies them (`arena_base(ptr) == ptr`). Their liveness and gray
//! state have no bitmap; this table is the single source of truth.

use core::ptr::NonNull;
use std::alloc::{self, Layout};

use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;

use crate::config::ARENA_SIZE;
use crate::object::{ObjectHeader, ObjectPtr};

use super::AllocError;

struct HugeBlock {
    layout: Layout,
    marked: bool,
}

pub(crate) struct HugeBlockTable {
    blocks: HashMap<usize, HugeBlock, FxBuildHasher>,
}

impl HugeBlockTable {
    pub(crate) fn new() -> Self {
        Self {
            blocks: HashMap::default(),
        }
    }

    /// Allocate one huge block. The memory is zeroed and starts WHITE
    /// (unmarked in this table).
    pub(crate) fn allocate(&mut self, size: usize) -> Result<ObjectPtr, AllocError> {
        let layout = Layout::from_size_align(size, ARENA_SIZE)?;
        // SAFETY: size is non-zero on this path (it exceeds the large-alloc
        // threshold).
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let base = NonNull::new(ptr).ok_or(AllocError::OutOfMemory)?;

        let header = base.cast::<ObjectHeader>();
        // SAFETY: the block is fresh and larger than a header.
        unsafe { header.write(ObjectHeader::new()) };

        self.blocks
            .insert(base.as_ptr() as usize, HugeBlock { layout, marked: false });
        // SAFETY: points at the header just written.
        Ok(unsafe { ObjectPtr::new(header) })
    }

    /// Mark the block at `addr`, reporting whether this call made the
    /// unmarked-to-marked transition. Unknown addresses report false.
    pub(crate) fn mark(&mut self, addr: usize) -> bool {
        match self.blocks.get_mut(&addr) {
            Some(block) if !block.marked => {
                block.marked = true;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn is_marked(&self, addr: usize) -> bool {
        self.blocks.get(&addr).is_some_and(|block| block.marked)
    }

    pub(crate) fn contains(&self, addr: usize) -> bool {
        self.blocks.contains_key(&addr)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Free every unmarked block and clear the marks of the survivors.
    pub(crate) fn sweep(&mut self) {
        self.blocks.retain(|&addr, block| {
            if block.marked {
                block.marked = false;
                true
            } else {
                // SAFETY: addr/layout come from our own allocation.
                unsafe { alloc::dealloc(addr as *mut u8, block.layout) };
                false
            }
        });
    }
}

impl Drop for HugeBlockTable {
    fn drop(&mut self) {
        for (&addr, block) in &self.blocks {
            // SAFETY: addr/layout come from our own allocation.
            unsafe { alloc::dealloc(addr as *mut u8, block.layout) };
        }
    }
}
