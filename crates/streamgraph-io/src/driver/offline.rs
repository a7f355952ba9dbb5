//! Driver that renders as fast as possible.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use streamgraph_core::GraphTime;

use super::DriverContext;

/// Wait between iterations once the end time is reached but streams are
/// still finishing, or while paused.
const IDLE_WAIT: Duration = Duration::from_millis(10);

pub(super) fn spawn(ctx: Arc<DriverContext>, generation: u64) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("streamgraph-offline".into())
        .spawn(move || run(&ctx, generation))
}

fn run(ctx: &DriverContext, generation: u64) {
    let slice = GraphTime::from(ctx.options.offline_slice_frames.max(1));
    tracing::debug!(generation, slice, "offline driver running");

    while ctx.is_current(generation) {
        if ctx.is_paused() {
            ctx.shared.wait_timeout(IDLE_WAIT);
            continue;
        }
        let mut slot = ctx.lock_core();
        let Some(core) = slot.as_mut() else {
            return;
        };
        if !ctx.is_current(generation) {
            return;
        }
        let before = core.processed_time();
        let keep_going = core.one_iteration(core.state_computed_time() + slice);
        let processed = core.processed_time();
        let stalled = processed == before && processed >= core.end_time();
        drop(slot);

        if !keep_going {
            tracing::info!(generation, processed, "offline render complete");
            return;
        }
        if stalled {
            ctx.shared.wait_timeout(IDLE_WAIT);
        }
    }
}
