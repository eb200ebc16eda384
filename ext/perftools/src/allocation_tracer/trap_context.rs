#![deny(unsafe_op_in_unsafe_fn)]

//! Register access for a SIGTRAP handler on x86_64.

use std::ffi::c_void;

use crate::error::Result;

/// `int3`
pub const TRAP_OPCODE: u8 = 0xcc;

/// Distance between the trapping byte and the instruction pointer the
/// kernel reports for it.
pub const TRAP_INSTRUCTION_LEN: usize = 1;

pub fn ensure_supported() -> Result<()> {
    Ok(())
}

/// The interrupted thread's saved registers.
pub struct TrapContext {
    ucontext: *mut libc::ucontext_t,
}

impl TrapContext {
    /// # Safety
    ///
    /// `context` must be the third argument of an `SA_SIGINFO` handler that
    /// is still running.
    pub unsafe fn from_raw(context: *mut c_void) -> Self {
        Self {
            ucontext: context as *mut libc::ucontext_t,
        }
    }

    #[cfg(target_os = "linux")]
    pub fn instruction_pointer(&self) -> usize {
        unsafe { (*self.ucontext).uc_mcontext.gregs[libc::REG_RIP as usize] as usize }
    }

    #[cfg(target_os = "linux")]
    pub fn set_instruction_pointer(&mut self, address: usize) {
        unsafe {
            (*self.ucontext).uc_mcontext.gregs[libc::REG_RIP as usize] = address as libc::greg_t;
        }
    }

    #[cfg(target_os = "macos")]
    pub fn instruction_pointer(&self) -> usize {
        unsafe { (*(*self.ucontext).uc_mcontext).__ss.__rip as usize }
    }

    #[cfg(target_os = "macos")]
    pub fn set_instruction_pointer(&mut self, address: usize) {
        unsafe {
            (*(*self.ucontext).uc_mcontext).__ss.__rip = address as u64;
        }
    }
}
