//! The boundary with the sampling engine: the library that decides when to
//! sample, owns the profile file and its symbol table.

#[cfg(feature = "gperftools")]
pub mod gperftools;
pub mod tally;

use std::ffi::{c_int, c_void};
use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::frame::Slot;

/// The stack-capture callback handed to the engine: fills the buffer with
/// at most `max_depth` slots and returns how many were written.
///
/// Invoked from interrupt context; implementations must not allocate or lock.
pub type StackCapture = Arc<dyn Fn(&mut [Slot], usize) -> usize + Send + Sync>;

/// Marks one runtime object as live during a GC root-marking pass.
pub type MarkFn = unsafe extern "C" fn(Slot);

pub trait SamplingEngine: Send + Sync {
    /// Begins sampling, writing the profile to `output_path`.
    fn start(&self, output_path: &Path, capture: StackCapture) -> Result<()>;

    fn stop(&self);

    /// Writes buffered samples out to the profile file.
    fn flush(&self);

    /// Records one event for the interrupted call site.
    ///
    /// Called from the allocation tracer's trap handler with the raw signal
    /// arguments; must be async-signal-safe.
    fn record(&self, signal: c_int, info: *mut libc::siginfo_t, context: *mut c_void);

    /// Marks every runtime object the engine retains (cached symbols, class
    /// handles), once per GC root-marking pass.
    fn gc_mark(&self, mark: MarkFn);
}
