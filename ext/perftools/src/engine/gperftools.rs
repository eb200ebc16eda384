#![deny(unsafe_op_in_unsafe_fn)]

use std::ffi::{c_char, c_int, c_void, CString};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::engine::{MarkFn, SamplingEngine, StackCapture};
use crate::error::{Error, Result};

// libprofiler with the Ruby patches: `ProfilerRecord` records one event for
// a trap context, `ProfilerGcMark` marks the symbols it has cached.
#[link(name = "profiler")]
extern "C" {
    fn ProfilerStart(fname: *const c_char) -> c_int;
    fn ProfilerStop();
    fn ProfilerFlush();
    fn ProfilerRecord(sig: c_int, info: *mut c_void, context: *mut c_void);
    fn ProfilerGcMark(mark: MarkFn);
}

/// The gperftools CPU profiler.
///
/// The library resolves its stack-capture callback through the exported
/// `rb_stack_trace` symbol rather than through `start`, so the capture
/// argument is not forwarded.
pub struct Gperftools;

impl SamplingEngine for Gperftools {
    fn start(&self, output_path: &Path, _capture: StackCapture) -> Result<()> {
        let fname = CString::new(output_path.as_os_str().as_bytes())
            .map_err(|_| Error::InvalidPath(output_path.to_path_buf()))?;
        if unsafe { ProfilerStart(fname.as_ptr()) } == 0 {
            return Err(Error::EngineStart {
                path: output_path.to_path_buf(),
                reason: "ProfilerStart returned 0".to_owned(),
            });
        }
        log::debug!("ProfilerStart({})", output_path.display());
        Ok(())
    }

    fn stop(&self) {
        unsafe { ProfilerStop() }
    }

    fn flush(&self) {
        unsafe { ProfilerFlush() }
    }

    fn record(&self, signal: c_int, info: *mut libc::siginfo_t, context: *mut c_void) {
        unsafe { ProfilerRecord(signal, info as *mut c_void, context) }
    }

    fn gc_mark(&self, mark: MarkFn) {
        unsafe { ProfilerGcMark(mark) }
    }
}
