//! Object headers and the pointer type used to address managed objects.
//!
//! Every managed object starts with an [`ObjectHeader`]. The collector only
//! interprets the low flag bits; everything above [`ObjectFlags::PAYLOAD`] is
//! left to the embedder.

use core::fmt;
use core::ptr::NonNull;

use bitflags::bitflags;

bitflags! {
    /// Flag word stored at the start of every managed object.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ObjectFlags: u32 {
        /// The object sits on a gray work-list or is mid-transition.
        const GRAY = 1 << 0;
        /// Statically allocated object living outside the arena system.
        const PREBUILT = 1 << 1;
        /// Prebuilt object that has been added to the prebuilt-root list.
        const PREBUILT_REGISTERED = 1 << 2;
        /// Bits at and above this one belong to the embedder.
        const PAYLOAD = !0x7;

        const _ = !0;
    }
}

/// Header prepended to every managed object.
///
/// The embedder lays its own data out after the header (`#[repr(C)]` with the
/// header as first field). The header must fit in a single cell.
#[derive(Debug)]
#[repr(C)]
pub struct ObjectHeader {
    flags: ObjectFlags,
}

impl ObjectHeader {
    /// Header for a freshly allocated heap object: no flags set.
    pub const fn new() -> Self {
        Self {
            flags: ObjectFlags::empty(),
        }
    }

    /// Header for a statically allocated object outside the arena system.
    pub const fn prebuilt() -> Self {
        Self {
            flags: ObjectFlags::PREBUILT,
        }
    }

    pub fn flags(&self) -> ObjectFlags {
        self.flags
    }
}

impl Default for ObjectHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// A pointer to a managed object, addressed by its header.
///
/// This is a thin `NonNull` wrapper, cheap to copy and compare. Holding one
/// does not keep the object alive; the mutator must root it through the
/// shadow stack before the next collection point.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ObjectPtr(NonNull<ObjectHeader>);

impl ObjectPtr {
    /// Wrap a raw header pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must point to the header of a live managed or prebuilt object.
    pub const unsafe fn new(ptr: NonNull<ObjectHeader>) -> Self {
        Self(ptr)
    }

    pub fn as_ptr(self) -> *mut ObjectHeader {
        self.0.as_ptr()
    }

    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    pub fn flags(self) -> ObjectFlags {
        // SAFETY: the construction contract guarantees a live header.
        unsafe { (*self.0.as_ptr()).flags }
    }

    pub(crate) fn insert_flags(self, flags: ObjectFlags) {
        // SAFETY: see `flags`.
        unsafe { (*self.0.as_ptr()).flags |= flags }
    }

    pub(crate) fn remove_flags(self, flags: ObjectFlags) {
        // SAFETY: see `flags`.
        unsafe { (*self.0.as_ptr()).flags &= !flags }
    }

    pub fn is_prebuilt(self) -> bool {
        self.flags().contains(ObjectFlags::PREBUILT)
    }

    pub(crate) fn is_gray(self) -> bool {
        self.flags().contains(ObjectFlags::GRAY)
    }
}

impl fmt::Debug for ObjectPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectPtr({:p})", self.0)
    }
}

impl fmt::Pointer for ObjectPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&self.0, f)
    }
}

/// Mark color of an object, derived from its blocktype and the GRAY flag.
///
/// Diagnostic view onto the tricolor state: light-gray objects are queued but
/// not yet scanned, dark-gray objects were re-grayed by the write barrier
/// after having been scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkColor {
    White,
    LightGray,
    DarkGray,
    Black,
    /// The address does not carry a valid block start (freed or interior).
    Invalid,
}
