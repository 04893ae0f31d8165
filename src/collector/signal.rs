//! Fault handler turning shadow-stack guard-page hits into a diagnostic.
//!
//! Installed once per process. Faults whose address falls inside a registered
//! guard page abort with a message; every other fault is re-raised with the
//! default disposition so unrelated crashes keep their normal behavior.

use core::ffi::{c_int, c_void};
use core::mem;
use core::ptr;
use std::sync::Once;

use parking_lot::Mutex;

static GUARD_PAGES: Mutex<Vec<(usize, usize)>> = Mutex::new(Vec::new());
static INSTALL: Once = Once::new();

pub(crate) fn register_guard_page(addr: usize, len: usize) {
    INSTALL.call_once(|| {
        // SAFETY: sigaction with a handler of the matching SA_SIGINFO shape.
        unsafe { install() }
    });
    GUARD_PAGES.lock().push((addr, len));
}

pub(crate) fn unregister_guard_page(addr: usize) {
    GUARD_PAGES.lock().retain(|&(start, _)| start != addr);
}

unsafe fn install() {
    // SAFETY: zeroed sigaction is a valid starting point on every libc we
    // target; the handler matches the SA_SIGINFO signature.
    unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = on_fault as usize;
        action.sa_flags = libc::SA_SIGINFO;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(libc::SIGSEGV, &action, ptr::null_mut());
        libc::sigaction(libc::SIGBUS, &action, ptr::null_mut());
    }
}

extern "C" fn on_fault(signum: c_int, info: *mut libc::siginfo_t, _context: *mut c_void) {
    // SAFETY: the kernel hands us a valid siginfo for SA_SIGINFO handlers.
    let fault_addr = unsafe { (*info).si_addr() } as usize;

    // try_lock: taking a held lock inside a signal handler would deadlock.
    let guard_hit = GUARD_PAGES
        .try_lock()
        .is_some_and(|pages| {
            pages
                .iter()
                .any(|&(start, len)| fault_addr >= start && fault_addr < start + len)
        });

    if guard_hit {
        const MSG: &[u8] = b"fatal: shadow stack overflow (guard page hit)\n";
        // SAFETY: write(2) and abort(2) are async-signal-safe.
        unsafe {
            libc::write(libc::STDERR_FILENO, MSG.as_ptr().cast(), MSG.len());
            libc::abort();
        }
    }

    // Not ours: restore the default disposition and return, so the faulting
    // instruction re-raises with the default behavior.
    // SAFETY: resetting to SIG_DFL is always valid.
    unsafe {
        let mut default: libc::sigaction = mem::zeroed();
        default.sa_sigaction = libc::SIG_DFL;
        libc::sigaction(signum, &default, ptr::null_mut());
    }
}
