#![deny(unsafe_op_in_unsafe_fn)]

use std::ffi::{c_void, CStr, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr::{addr_of, addr_of_mut, null_mut};
use std::sync::OnceLock;

use rb_sys::*;

use crate::controller::SamplingController;
use crate::frame::Slot;
use crate::util::{cstr, to_rb_bool};

pub static CONTROLLER: OnceLock<SamplingController> = OnceLock::new();

// Kept reachable through rb_global_variable so its mark function runs on
// every GC.
static mut GC_HOOK: VALUE = 0;

/// Singleton methods of `PerfTools::CpuProfiler`.
pub struct CpuProfiler;

impl CpuProfiler {
    pub unsafe extern "C" fn rb_running_p(_rbself: VALUE) -> VALUE {
        to_rb_bool(CONTROLLER.get().is_some_and(|c| c.running()))
    }

    /// `start(path)` or `start(path) { ... }`. The block form stops the
    /// profiler however the block exits.
    pub unsafe extern "C" fn rb_start(rbself: VALUE, filename: VALUE) -> VALUE {
        let mut filename = filename;
        let filename = unsafe { CStr::from_ptr(rb_string_value_cstr(&mut filename)) };
        let path = Path::new(OsStr::from_bytes(filename.to_bytes()));

        let Some(controller) = CONTROLLER.get() else {
            return Qfalse.into();
        };
        if !controller.start(path) {
            return Qfalse.into();
        }

        unsafe {
            if rb_block_given_p() != 0 {
                rb_ensure(
                    Some(Self::yield_block),
                    Qnil.into(),
                    Some(Self::stop_after_block),
                    rbself,
                );
            }
        }
        Qtrue.into()
    }

    pub unsafe extern "C" fn rb_stop(_rbself: VALUE) -> VALUE {
        to_rb_bool(CONTROLLER.get().is_some_and(|c| c.stop()))
    }

    unsafe extern "C" fn yield_block(_: VALUE) -> VALUE {
        unsafe { rb_yield(Qnil.into()) }
    }

    unsafe extern "C" fn stop_after_block(rbself: VALUE) -> VALUE {
        unsafe { Self::rb_stop(rbself) }
    }

    /// Registers a GC root whose mark function lets the engine mark the
    /// objects it retains.
    pub unsafe fn install_gc_hook(klass: VALUE, controller: &'static SamplingController) {
        unsafe {
            GC_HOOK = rb_data_typed_object_wrap(
                klass,
                controller as *const SamplingController as *mut c_void,
                addr_of!(RBDATA),
            );
            rb_global_variable(addr_of_mut!(GC_HOOK));
        }
    }

    unsafe extern "C" fn dmark(ptr: *mut c_void) {
        let controller = unsafe { &*(ptr as *const SamplingController) };
        controller.gc_mark(mark_object);
    }

    unsafe extern "C" fn dsize(_: *const c_void) -> size_t {
        0
    }
}

unsafe extern "C" fn mark_object(object: Slot) {
    unsafe { rb_gc_mark(object as VALUE) }
}

static mut RBDATA: rb_data_type_t = rb_data_type_t {
    wrap_struct_name: cstr!("PerfTools::CpuProfiler::GcHook"),
    function: rb_data_type_struct__bindgen_ty_1 {
        dmark: Some(CpuProfiler::dmark),
        // The controller is a static; nothing to free.
        dfree: None,
        dsize: Some(CpuProfiler::dsize),
        dcompact: None,
        reserved: [null_mut(); 1],
    },
    parent: null_mut(),
    data: null_mut(),
    flags: 0,
};
