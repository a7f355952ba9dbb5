//! Per-block processing contract for audio-node streams.

use crate::block::AudioBlock;
use crate::time::{GraphTime, StreamTime, TrackRate};

/// Timing information handed to an engine for one block.
#[derive(Clone, Copy, Debug)]
pub struct ProcessContext {
    /// Graph time at which the block starts.
    pub graph_time: GraphTime,
    /// Stream time of the node at the start of the block.
    pub stream_time: StreamTime,
    /// Sample rate of the node.
    pub sample_rate: TrackRate,
}

/// DSP behind an audio-node stream.
///
/// Engines run on the graph thread. `process_block` is called once per
/// block with one input block per declared input port and must write one
/// block to every output. A null input block means silence.
pub trait AudioNodeEngine: Send {
    /// Number of input ports.
    fn input_count(&self) -> usize {
        1
    }

    /// Number of output ports.
    fn output_count(&self) -> usize {
        1
    }

    /// Consumes `inputs` and fills `outputs`. Returns true once the engine
    /// will never produce non-silent output again.
    fn process_block(
        &mut self,
        ctx: &ProcessContext,
        inputs: &[AudioBlock],
        outputs: &mut [AudioBlock],
    ) -> bool;

    /// Returns true if this engine can produce a block from past state alone,
    /// which lets it sit inside a feedback loop.
    fn is_cycle_breaker(&self) -> bool {
        false
    }

    /// Produces the next output block before this block's input exists.
    ///
    /// Only called on cycle breakers, once per block before any stream runs
    /// `process_block`. The outputs written here are the ones published for
    /// the block; whatever `process_block` writes afterwards is discarded.
    fn produce_block_before_input(&mut self, ctx: &ProcessContext, outputs: &mut [AudioBlock]) {
        let _ = ctx;
        for output in outputs {
            output.set_null();
        }
    }

    /// Sets a numbered engine parameter.
    fn set_parameter(&mut self, index: u32, value: f32) {
        let _ = (index, value);
    }
}
