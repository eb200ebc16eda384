#![deny(unsafe_op_in_unsafe_fn)]

//! Scoped conversion of memory-access faults into an early return.
//!
//! The guard installs SIGSEGV/SIGBUS handlers for the duration of one call
//! and restores the previous handlers on every exit path. It is process
//! global (one saved jump target) and not re-entrant; nesting is a
//! programmer error and panics.

use std::ffi::{c_int, c_void};
use std::sync::atomic::{AtomicBool, Ordering};

extern "C" {
    fn perftools_fault_guard_run(body: unsafe extern "C" fn(*mut c_void), data: *mut c_void)
        -> c_int;
}

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// A memory-access fault was caught while the guarded body ran.
#[derive(Debug, PartialEq, Eq)]
pub struct Fault;

/// Runs `body`, returning `Err(Fault)` if it raised SIGSEGV or SIGBUS.
///
/// On a fault, control leaves `body` without unwinding: `body` must not
/// hold values with destructors, allocate, or take locks.
pub fn run<F: FnMut()>(mut body: F) -> Result<(), Fault> {
    assert!(
        !INSTALLED.swap(true, Ordering::AcqRel),
        "fault guard is already installed"
    );

    let faulted = unsafe {
        perftools_fault_guard_run(trampoline::<F>, &mut body as *mut F as *mut c_void)
    };

    INSTALLED.store(false, Ordering::Release);
    if faulted == 0 {
        Ok(())
    } else {
        Err(Fault)
    }
}

pub fn is_installed() -> bool {
    INSTALLED.load(Ordering::Acquire)
}

unsafe extern "C" fn trampoline<F: FnMut()>(data: *mut c_void) {
    let body = unsafe { &mut *(data as *mut F) };
    body();
}
