#![deny(unsafe_op_in_unsafe_fn)]

use std::ffi::c_void;
use std::io;
use std::ptr;

use crate::error::{Error, Result};

/// Single-byte writes into executable code.
pub trait CodePatcher {
    fn read_byte(&self, address: usize) -> u8;

    /// Overwrites the byte at `address`, returning the byte it replaced.
    fn patch_byte(&self, address: usize, new_byte: u8) -> Result<u8>;

    /// Puts a previously saved byte back.
    fn restore_byte(&self, address: usize, original_byte: u8) -> Result<()>;
}

/// Patches the running process's own text.
///
/// Every write first relaxes the containing page to read/write/execute and
/// is a single byte, which instruction fetch observes atomically on x86_64.
/// Usable from the trap handler: `mprotect` is async-signal-safe and the
/// page size is read once, up front.
#[derive(Clone, Copy, Debug)]
pub struct MemoryPatcher {
    page_size: usize,
}

impl MemoryPatcher {
    pub fn new() -> Self {
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        Self {
            page_size: usize::try_from(page_size).unwrap_or(4096),
        }
    }

    fn make_writable(&self, address: usize) -> Result<()> {
        let page_start = address & !(self.page_size - 1);
        let len = address + 1 - page_start;
        let err = unsafe {
            libc::mprotect(
                page_start as *mut c_void,
                len,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
            )
        };
        if err != 0 {
            return Err(Error::Protect {
                address,
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }
}

impl Default for MemoryPatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl CodePatcher for MemoryPatcher {
    fn read_byte(&self, address: usize) -> u8 {
        unsafe { ptr::read_volatile(address as *const u8) }
    }

    fn patch_byte(&self, address: usize, new_byte: u8) -> Result<u8> {
        self.make_writable(address)?;
        let original = self.read_byte(address);
        unsafe { ptr::write_volatile(address as *mut u8, new_byte) };
        Ok(original)
    }

    fn restore_byte(&self, address: usize, original_byte: u8) -> Result<()> {
        self.make_writable(address)?;
        unsafe { ptr::write_volatile(address as *mut u8, original_byte) };
        Ok(())
    }
}
