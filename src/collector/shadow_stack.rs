//! The shadow stack: the mutator's explicit root set.
//!
//! Push and pop move a raw top pointer with no bounds check. Overflow
//! protection comes from a `PROT_NONE` guard page mapped just past the last
//! slot: the first push past capacity writes into the guard page and traps,
//! which the process-wide handler in [`super::signal`] turns into a
//! diagnostic.

use core::ffi::c_void;
use core::ptr::NonNull;
use std::alloc::{self, Layout, handle_alloc_error};

use crate::config::SHADOWSTACK_SIZE;
use crate::object::ObjectPtr;

use super::signal;

pub(crate) struct ShadowStack {
    buf: NonNull<u8>,
    layout: Layout,
    base: *mut ObjectPtr,
    top: *mut ObjectPtr,
    guard_addr: usize,
    page_size: usize,
}

fn page_size() -> usize {
    // SAFETY: plain sysconf query.
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page <= 0 { 4096 } else { page as usize }
}

impl ShadowStack {
    pub(crate) fn new() -> Self {
        let page_size = page_size();
        let slot_bytes = SHADOWSTACK_SIZE * size_of::<ObjectPtr>();
        let guard_offset = slot_bytes.next_multiple_of(page_size);
        let layout = Layout::from_size_align(guard_offset + page_size, page_size)
            .expect("shadow stack layout is a small page multiple");

        // SAFETY: non-zero, valid layout.
        let ptr = unsafe { alloc::alloc(layout) };
        let Some(buf) = NonNull::new(ptr) else {
            handle_alloc_error(layout)
        };

        let guard_addr = buf.as_ptr() as usize + guard_offset;
        // SAFETY: the guard page lies entirely inside our allocation and is
        // page-aligned because the buffer is.
        let rc = unsafe { libc::mprotect(guard_addr as *mut c_void, page_size, libc::PROT_NONE) };
        assert_eq!(rc, 0, "failed to protect the shadow stack guard page");
        signal::register_guard_page(guard_addr, page_size);

        let base = buf.as_ptr() as *mut ObjectPtr;
        Self {
            buf,
            layout,
            base,
            top: base,
            guard_addr,
            page_size,
        }
    }

    /// Store one root and advance. No capacity check: a push past capacity
    /// hits the guard page.
    #[inline]
    pub(crate) fn push(&mut self, object: ObjectPtr) {
        // SAFETY: top stays inside our allocation; writes into the guard page
        // trap before top can move past it.
        unsafe {
            self.top.write(object);
            self.top = self.top.add(1);
        }
    }

    /// Remove and return the most recently pushed root. Callers must not pop
    /// an empty stack.
    #[inline]
    pub(crate) fn pop(&mut self) -> ObjectPtr {
        debug_assert!(self.len() > 0, "shadow stack underflow");
        // SAFETY: top > base whenever the caller honors the pop contract.
        unsafe {
            self.top = self.top.sub(1);
            self.top.read()
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        (self.top as usize - self.base as usize) / size_of::<ObjectPtr>()
    }

    #[inline]
    pub(crate) fn get(&self, index: usize) -> ObjectPtr {
        debug_assert!(index < self.len());
        // SAFETY: index is below the current top.
        unsafe { *self.base.add(index) }
    }

    #[cfg(test)]
    pub(crate) fn guard_addr(&self) -> usize {
        self.guard_addr
    }

    #[cfg(test)]
    pub(crate) fn page_size(&self) -> usize {
        self.page_size
    }
}

impl Drop for ShadowStack {
    fn drop(&mut self) {
        signal::unregister_guard_page(self.guard_addr);
        // SAFETY: restoring protection on our own allocation before freeing
        // it; addr and layout match the allocation.
        unsafe {
            libc::mprotect(
                self.guard_addr as *mut c_void,
                self.page_size,
                libc::PROT_READ | libc::PROT_WRITE,
            );
            alloc::dealloc(self.buf.as_ptr(), self.layout);
        }
    }
}
