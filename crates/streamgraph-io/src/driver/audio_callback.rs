//! Driver running inside the audio device's realtime callback.
//!
//! Each callback asks for a number of frames; the driver iterates the graph
//! until that many mixed frames exist. Iterations end on block boundaries,
//! so the overshoot is kept and served first by the next callback. The
//! callback never waits for the graph lock: if the main thread holds it,
//! the device gets silence for that buffer.
//!
//! A driver switch the graph asks for is posted to the switch helper
//! thread. From then on the callback only plays out what it already mixed.

use std::sync::Arc;
use std::sync::mpsc::SyncSender;

use streamgraph_core::{BLOCK_SIZE, DriverKind, GraphTime};

use super::{DriverContext, SwitchRequest};
use crate::backend::StreamHandle;
use crate::{Error, Result};

pub(super) fn start(ctx: &Arc<DriverContext>, generation: u64) -> Result<StreamHandle> {
    let config = ctx.options.stream_config();
    let mut driver = CallbackDriver::new(Arc::clone(ctx), generation, ctx.switch_sender());
    let error_ctx = Arc::clone(ctx);
    ctx.with_backend(move |backend| {
        if backend.actual_sample_rate(&config) != config.sample_rate {
            return Err(Error::Stream(format!(
                "{} cannot run at {} Hz",
                backend.name(),
                config.sample_rate
            )));
        }
        backend.build_output_stream(
            &config,
            Box::new(move |buffer: &mut [f32]| driver.fill(buffer)),
            Box::new(move |reason: &str| DriverContext::audio_failed(&error_ctx, generation, reason)),
        )
    })
    .unwrap_or(Err(Error::NoDevice))
}

struct CallbackDriver {
    ctx: Arc<DriverContext>,
    generation: u64,
    channels: usize,
    spill: Vec<f32>,
    ended: bool,
    switches: Option<SyncSender<SwitchRequest>>,
    handed_over: bool,
}

impl CallbackDriver {
    fn new(ctx: Arc<DriverContext>, generation: u64, switches: Option<SyncSender<SwitchRequest>>) -> Self {
        let channels = ctx.options.output_channels;
        Self {
            ctx,
            generation,
            channels,
            spill: Vec::with_capacity(BLOCK_SIZE * channels),
            ended: false,
            switches,
            handed_over: false,
        }
    }

    /// Fills `out` and returns the frames written. Once the graph stops,
    /// the next call comes up short.
    fn fill(&mut self, out: &mut [f32]) -> usize {
        let ch = self.channels;
        let frames = out.len() / ch;
        if self.ended {
            out.fill(0.0);
            return 0;
        }

        let mut written = self.drain_spill(out, frames);
        if written == frames {
            return frames;
        }
        if self.handed_over || !self.ctx.is_current(self.generation) || self.ctx.is_paused() {
            out[written * ch..].fill(0.0);
            return frames;
        }
        let Some(mut slot) = self.ctx.try_lock_core() else {
            out[written * ch..].fill(0.0);
            return frames;
        };
        let Some(core) = slot.as_mut().filter(|_| self.ctx.is_current(self.generation)) else {
            out[written * ch..].fill(0.0);
            return frames;
        };

        let mut keep_going = true;
        let mut switch = None;
        while written < frames {
            let needed = frames - written;
            keep_going = core.one_iteration(core.state_computed_time() + needed as GraphTime);
            let mixed = core.mixed_output();
            let produced = mixed.len() / ch;
            let n = produced.min(needed);
            out[written * ch..(written + n) * ch].copy_from_slice(&mixed[..n * ch]);
            self.spill.extend_from_slice(&mixed[n * ch..]);
            written += n;
            switch = core.take_switch_request();
            if !keep_going || switch.is_some() || produced == 0 {
                break;
            }
        }
        drop(slot);
        out[written * ch..].fill(0.0);

        if !keep_going {
            self.ended = true;
            tracing::info!(generation = self.generation, "audio callback driver stopped");
            return written;
        }
        if let Some(kind) = switch {
            self.post_switch(kind);
        }
        frames
    }

    /// Hands the graph over without blocking. If the helper is busy the
    /// graph asks again after its next iteration.
    fn post_switch(&mut self, kind: DriverKind) {
        let request = SwitchRequest {
            kind,
            from: self.generation,
        };
        if let Some(tx) = &self.switches
            && tx.try_send(request).is_ok()
        {
            self.handed_over = true;
        }
    }

    fn drain_spill(&mut self, out: &mut [f32], frames: usize) -> usize {
        let ch = self.channels;
        let n = (self.spill.len() / ch).min(frames);
        if n > 0 {
            out[..n * ch].copy_from_slice(&self.spill[..n * ch]);
            self.spill.drain(..n * ch);
        }
        n
    }
}
