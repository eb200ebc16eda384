//! Reconstructs the symbolic call stack of the calling thread.
//!
//! Runs synchronously inside the sampling interrupt: it only reads
//! interpreter state and writes into the caller's pre-sized buffer. No
//! allocation, no locks, no logging.

use crate::fault_guard;
use crate::frame::{CallFrame, Runtime, Slot, SLOTS_PER_FRAME};
use crate::symbolizer;

/// Hard bound on frames visited, so a corrupted (cyclic) chain cannot hang
/// the interrupted thread.
const MAX_VISITED_FRAMES: usize = 1 << 16;

/// Writes symbol triples for the current stack, innermost first, into `out`
/// and returns the number of slots written.
///
/// - Returns 0 when `max_depth` is 0.
/// - Returns 1 (the runtime's GC sentinel) while a collection is running.
/// - Otherwise returns a multiple of 3 that never exceeds `max_depth`; a
///   triple is never split.
/// - Returns 0 if the walk faulted. Slots before the fault may have been
///   overwritten, but nothing past the returned depth is meaningful.
///
/// `max_depth` is clamped to `out.len()`.
pub fn walk<R: Runtime>(runtime: &R, out: &mut [Slot], max_depth: usize) -> usize {
    let max_depth = max_depth.min(out.len());
    if max_depth == 0 {
        return 0;
    }

    if runtime.during_gc() {
        out[0] = runtime.gc_sentinel();
        return 1;
    }

    if !R::NEEDS_FAULT_GUARD {
        return walk_frames(runtime, out, max_depth);
    }

    let mut depth = 0;
    match fault_guard::run(|| depth = walk_frames(runtime, out, max_depth)) {
        Ok(()) => depth,
        Err(fault_guard::Fault) => 0,
    }
}

fn walk_frames<R: Runtime>(runtime: &R, out: &mut [Slot], max_depth: usize) -> usize {
    let mut depth = 0;
    let mut next = runtime.current_frame();
    let mut visited = 0;

    while let Some(frame) = next {
        visited += 1;
        if visited > MAX_VISITED_FRAMES {
            break;
        }
        next = frame.previous();

        if !frame.is_real_call() {
            continue;
        }
        if next.is_some_and(|caller| is_duplicate_continuation(&frame, &caller)) {
            continue;
        }
        if depth + SLOTS_PER_FRAME > max_depth {
            break;
        }

        if let Some(triple) = symbolizer::symbolize(runtime, &frame) {
            triple.write_to(&mut out[depth..depth + SLOTS_PER_FRAME]);
            depth += SLOTS_PER_FRAME;
        }
    }

    debug_assert!(depth <= max_depth);
    depth
}

// Some forwarding constructs leave a second frame for the same call at the
// same source position; only the caller's copy is kept.
fn is_duplicate_continuation<F: CallFrame>(frame: &F, caller: &F) -> bool {
    caller.is_real_call()
        && caller.source_position() == frame.source_position()
        && caller.method_id() == frame.method_id()
}
