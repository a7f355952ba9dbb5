//! Driver paced by the system clock.
//!
//! Graph time follows wall-clock time. Each iteration computes state one
//! interval ahead of the clock, then the thread sleeps until the next
//! interval or until a message wakes it. Time spent paused is not counted,
//! so the timeline slides forward on resume instead of catching up.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use streamgraph_core::{DriverKind, millis_to_ticks, seconds_to_ticks};

use super::DriverContext;

pub(super) fn spawn(ctx: Arc<DriverContext>, generation: u64) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("streamgraph-clock".into())
        .spawn(move || run(&ctx, generation))
}

fn run(ctx: &Arc<DriverContext>, generation: u64) {
    let interval = ctx.options.system_clock_interval;
    let rate = ctx.options.rate;
    let lookahead = millis_to_ticks(interval.as_millis() as u64, rate);
    let Some(start) = ctx.with_core(|core| core.state_computed_time()) else {
        return;
    };
    tracing::debug!(generation, start, "system clock driver running");

    let mut elapsed = Duration::ZERO;
    let mut last = Instant::now();
    while ctx.is_current(generation) {
        if ctx.is_paused() {
            ctx.shared.wait_timeout(interval);
            last = Instant::now();
            continue;
        }
        let now = Instant::now();
        elapsed += now - last;
        last = now;
        let clock = start + seconds_to_ticks(elapsed.as_secs_f64(), rate);

        let mut slot = ctx.lock_core();
        let Some(core) = slot.as_mut() else {
            return;
        };
        if !ctx.is_current(generation) {
            return;
        }
        let keep_going = core.one_iteration(clock + lookahead);
        let switch = core.take_switch_request();
        tracing::trace!(processed = core.processed_time(), clock, "system clock iteration");
        drop(slot);

        if !keep_going {
            tracing::info!(generation, "system clock driver stopped");
            return;
        }
        if let Some(kind) = switch {
            debug_assert_ne!(kind, DriverKind::SystemClock);
            DriverContext::switch_to(ctx, kind, Some(generation));
            return;
        }
        ctx.shared.wait_timeout(interval);
    }
}
