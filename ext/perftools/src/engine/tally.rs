use std::ffi::{c_int, c_void};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::engine::{MarkFn, SamplingEngine, StackCapture};
use crate::error::Result;
use crate::frame::{Slot, SLOTS_PER_FRAME};

// Frames captured per recorded event, at most.
const CAPTURE_DEPTH: usize = 64;
const CAPTURE_SLOTS: usize = CAPTURE_DEPTH * SLOTS_PER_FRAME;

/// An in-process engine for hosts without a sampling library.
///
/// It does not sample on a timer. Every `record` is counted and the calling
/// stack is captured into a fixed buffer; `flush` writes a JSON summary of
/// the counts to the output path.
#[derive(Default)]
pub struct TallyEngine {
    output_path: Mutex<Option<PathBuf>>,
    capture: RwLock<Option<StackCapture>>,
    running: AtomicBool,
    started_at_ns: AtomicU64,
    allocation_records: AtomicU64,
    captured_frames: AtomicU64,
    dropped_captures: AtomicU64,
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct TallySummary {
    pub started_at_ns: u64,
    pub allocation_records: u64,
    pub captured_frames: u64,
    pub dropped_captures: u64,
}

impl TallyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&self) -> TallySummary {
        TallySummary {
            started_at_ns: self.started_at_ns.load(Ordering::Relaxed),
            allocation_records: self.allocation_records.load(Ordering::Relaxed),
            captured_frames: self.captured_frames.load(Ordering::Relaxed),
            dropped_captures: self.dropped_captures.load(Ordering::Relaxed),
        }
    }

    fn capture_current_stack(&self) {
        // stop() may be swapping the capture out; skip rather than wait
        let Ok(capture) = self.capture.try_read() else {
            self.dropped_captures.fetch_add(1, Ordering::Relaxed);
            return;
        };
        if let Some(capture) = capture.as_ref() {
            let mut buffer: [Slot; CAPTURE_SLOTS] = [0; CAPTURE_SLOTS];
            let depth = capture(&mut buffer, CAPTURE_SLOTS);
            self.captured_frames
                .fetch_add((depth / SLOTS_PER_FRAME) as u64, Ordering::Relaxed);
        }
    }
}

impl SamplingEngine for TallyEngine {
    fn start(&self, output_path: &Path, capture: StackCapture) -> Result<()> {
        let started_at_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);

        self.allocation_records.store(0, Ordering::Relaxed);
        self.captured_frames.store(0, Ordering::Relaxed);
        self.dropped_captures.store(0, Ordering::Relaxed);
        self.started_at_ns.store(started_at_ns, Ordering::Relaxed);
        *self.output_path.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(output_path.to_path_buf());
        *self.capture.write().unwrap_or_else(|e| e.into_inner()) = Some(capture);
        self.running.store(true, Ordering::Release);

        log::debug!("Tally engine started ({})", output_path.display());
        Ok(())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
        *self.capture.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn flush(&self) {
        let output_path = self.output_path.lock().unwrap_or_else(|e| e.into_inner());
        let Some(output_path) = output_path.as_ref() else {
            return;
        };

        let summary = self.summary();
        log::debug!("Allocation records: {}", summary.allocation_records);
        let written = serde_json::to_vec_pretty(&summary)
            .map_err(std::io::Error::from)
            .and_then(|json| fs::write(output_path, json));
        if let Err(e) = written {
            log::error!("Failed to write {}: {}", output_path.display(), e);
        }
    }

    fn record(&self, _signal: c_int, _info: *mut libc::siginfo_t, _context: *mut c_void) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        self.allocation_records.fetch_add(1, Ordering::Relaxed);
        self.capture_current_stack();
    }

    fn gc_mark(&self, _mark: MarkFn) {
        // Retains no runtime objects
    }
}
