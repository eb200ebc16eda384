#![deny(unsafe_op_in_unsafe_fn)]

//! Counts every call to one routine by keeping a breakpoint on its entry.
//!
//! # Threading precondition
//!
//! The trap rotation is process-wide mutable state with no lock. It is
//! correct only while at most one thread at a time can execute the traced
//! routine, which holds for an interpreter that runs one thread of managed
//! code at a time (a global interpreter lock). `setup` and `teardown` must
//! be called from that thread as well.

pub mod code_patcher;
#[cfg(all(target_arch = "x86_64", any(target_os = "linux", target_os = "macos")))]
pub mod trap_context;
#[cfg(not(all(target_arch = "x86_64", any(target_os = "linux", target_os = "macos"))))]
#[path = "allocation_tracer/trap_context_unsupported_platform.rs"]
pub mod trap_context;
pub mod trap_rotation;

use std::cell::UnsafeCell;
use std::ffi::{c_int, c_void};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::{io, mem, ptr};

use crate::engine::SamplingEngine;
use crate::error::{Error, Result};

use self::code_patcher::MemoryPatcher;
use self::trap_context::TrapContext;
use self::trap_rotation::{TrapOutcome, TrapRotation};

struct Armed {
    rotation: TrapRotation,
    patcher: MemoryPatcher,
    engine: Arc<dyn SamplingEngine>,
    previous_action: libc::sigaction,
}

struct GlobalTracer(UnsafeCell<Option<Armed>>);

// See the threading precondition in the module docs.
unsafe impl Sync for GlobalTracer {}

impl GlobalTracer {
    unsafe fn get(&self) -> Option<&Armed> {
        unsafe { (*self.0.get()).as_ref() }
    }

    unsafe fn replace(&self, armed: Option<Armed>) -> Option<Armed> {
        unsafe { mem::replace(&mut *self.0.get(), armed) }
    }
}

static TRACER: GlobalTracer = GlobalTracer(UnsafeCell::new(None));
static ACTIVE: AtomicBool = AtomicBool::new(false);

pub fn is_active() -> bool {
    ACTIVE.load(Ordering::Acquire)
}

/// Starts tracing calls to the routine at `entry`, recording each one on
/// `engine`. Returns `Ok(false)` if tracing is already active.
///
/// On error nothing stays installed: the routine's bytes and the previous
/// SIGTRAP disposition are back in place.
///
/// # Safety
///
/// `entry` must be the first byte of a function in this process whose
/// first instruction is one byte long, and nothing else may patch those
/// bytes while tracing is active.
pub unsafe fn setup(entry: *const u8, engine: Arc<dyn SamplingEngine>) -> Result<bool> {
    trap_context::ensure_supported()?;
    if ACTIVE
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return Ok(false);
    }

    match unsafe { install(entry as usize, engine) } {
        Ok(()) => {
            log::debug!("Allocation tracing enabled at {:p}", entry);
            Ok(true)
        }
        Err(e) => {
            ACTIVE.store(false, Ordering::Release);
            Err(e)
        }
    }
}

unsafe fn install(entry: usize, engine: Arc<dyn SamplingEngine>) -> Result<()> {
    let patcher = MemoryPatcher::new();
    let rotation = TrapRotation::capture(entry, &patcher);
    let previous_action = install_trap_handler()?;

    // Published before any trap is armed; the handler only reads it.
    unsafe {
        TRACER.replace(Some(Armed {
            rotation,
            patcher,
            engine,
            previous_action,
        }))
    };

    let armed = unsafe { TRACER.get() };
    if let Some(Err(e)) = armed.map(|armed| armed.rotation.arm(&armed.patcher)) {
        restore_trap_handler(&previous_action);
        unsafe { TRACER.replace(None) };
        return Err(e);
    }
    Ok(())
}

/// Stops tracing and puts the routine's original bytes back. Returns false
/// if tracing was not active.
pub fn teardown() -> bool {
    if ACTIVE
        .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return false;
    }

    if let Some(armed) = unsafe { TRACER.get() } {
        if let Err(e) = armed.rotation.disarm(&armed.patcher) {
            log::error!("Failed to restore traced code: {}", e);
        }
        restore_trap_handler(&armed.previous_action);
    }
    unsafe { TRACER.replace(None) };

    log::debug!("Allocation tracing disabled");
    true
}

fn install_trap_handler() -> Result<libc::sigaction> {
    let mut sa: libc::sigaction = unsafe { mem::zeroed() };
    sa.sa_sigaction = trap_handler as usize;
    sa.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART;
    let mut previous: libc::sigaction = unsafe { mem::zeroed() };
    let err = unsafe { libc::sigaction(libc::SIGTRAP, &sa, &mut previous) };
    if err != 0 {
        return Err(Error::Signal {
            signal: libc::SIGTRAP,
            source: io::Error::last_os_error(),
        });
    }
    log::debug!("SIGTRAP handler installed");
    Ok(previous)
}

// The previous disposition goes back rather than SIG_IGN: an ignored
// SIGTRAP raised by int3 still terminates the process.
fn restore_trap_handler(previous: &libc::sigaction) {
    let err = unsafe { libc::sigaction(libc::SIGTRAP, previous, ptr::null_mut()) };
    if err != 0 {
        log::error!(
            "Failed to restore the SIGTRAP handler: {}",
            io::Error::last_os_error()
        );
    }
}

// Runs on whichever thread entered the traced routine.
extern "C" fn trap_handler(signal: c_int, info: *mut libc::siginfo_t, context: *mut c_void) {
    let Some(armed) = (unsafe { TRACER.get() }) else {
        return;
    };
    let mut trap = unsafe { TrapContext::from_raw(context) };

    let outcome = armed
        .rotation
        .on_trap(&armed.patcher, trap.instruction_pointer());
    if let TrapOutcome::Advanced { resume_at, .. } = outcome {
        if outcome.is_arrival() {
            armed.engine.record(signal, info, context);
        }
        trap.set_instruction_pointer(resume_at);
    }
}
