use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::allocation_tracer;
use crate::configuration::Configuration;
use crate::engine::{MarkFn, SamplingEngine, StackCapture};

/// Owns the running state of CPU sampling and drives the engine.
pub struct SamplingController {
    configuration: Configuration,
    engine: Arc<dyn SamplingEngine>,
    capture: StackCapture,
    allocation_entry: Option<usize>,
    running: AtomicBool,
}

impl SamplingController {
    pub fn new(
        configuration: Configuration,
        engine: Arc<dyn SamplingEngine>,
        capture: StackCapture,
    ) -> Self {
        Self {
            configuration,
            engine,
            capture,
            allocation_entry: None,
            running: AtomicBool::new(false),
        }
    }

    /// Sets the routine whose calls are traced as allocations.
    ///
    /// # Safety
    ///
    /// Same contract as [`allocation_tracer::setup`] for `entry`.
    pub unsafe fn with_allocation_entry(mut self, entry: *const u8) -> Self {
        self.allocation_entry = Some(entry as usize);
        self
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Starts sampling into `output_path`. Returns false if sampling was
    /// already running or the engine refused to start.
    pub fn start(&self, output_path: &Path) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let traced_here = self.configuration.trace_objects && self.enable_allocation_tracing();

        if let Err(e) = self.engine.start(output_path, Arc::clone(&self.capture)) {
            log::error!("Failed to start profiling: {}", e);
            if traced_here {
                allocation_tracer::teardown();
            }
            self.running.store(false, Ordering::Release);
            return false;
        }

        log::debug!("Profiling started ({})", output_path.display());
        true
    }

    /// Stops sampling, flushes the profile and removes any allocation
    /// breakpoint. Returns false if sampling was not running.
    pub fn stop(&self) -> bool {
        if self
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        allocation_tracer::teardown();
        self.engine.flush();
        self.engine.stop();

        log::debug!("Profiling stopped");
        true
    }

    /// Runs `work` with sampling on, then stops whether `work` returned or
    /// unwound. Returns `None` without running `work` if sampling could not
    /// start.
    pub fn profile<R>(&self, output_path: &Path, work: impl FnOnce() -> R) -> Option<R> {
        if !self.start(output_path) {
            return None;
        }
        let _stop = StopOnDrop(self);
        Some(work())
    }

    /// Puts the breakpoint on the allocation routine. Returns true if this
    /// call enabled tracing.
    pub fn enable_allocation_tracing(&self) -> bool {
        let Some(entry) = self.allocation_entry else {
            log::warn!("No allocation routine to trace");
            return false;
        };

        // The entry was vouched for in with_allocation_entry.
        match unsafe { allocation_tracer::setup(entry as *const u8, Arc::clone(&self.engine)) } {
            Ok(enabled) => enabled,
            Err(e) => {
                log::error!("Failed to enable allocation tracing: {}", e);
                false
            }
        }
    }

    /// Lets the engine mark the runtime objects it retains.
    pub fn gc_mark(&self, mark: MarkFn) {
        self.engine.gc_mark(mark);
    }
}

struct StopOnDrop<'a>(&'a SamplingController);

impl Drop for StopOnDrop<'_> {
    fn drop(&mut self) {
        self.0.stop();
    }
}
