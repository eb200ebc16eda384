use std::ffi::c_void;

use crate::error::{Error, Result};

pub const TRAP_OPCODE: u8 = 0xcc;

pub const TRAP_INSTRUCTION_LEN: usize = 1;

pub fn ensure_supported() -> Result<()> {
    Err(Error::UnsupportedPlatform(
        "allocation tracing requires x86_64 Linux or macOS",
    ))
}

pub struct TrapContext {}

impl TrapContext {
    pub unsafe fn from_raw(_context: *mut c_void) -> Self {
        unimplemented!()
    }

    pub fn instruction_pointer(&self) -> usize {
        unimplemented!()
    }

    pub fn set_instruction_pointer(&mut self, _address: usize) {
        unimplemented!()
    }
}
