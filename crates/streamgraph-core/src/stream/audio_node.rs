//! Audio-node streams: fixed-block audio processing.
//!
//! An audio node gathers one [`AudioBlock`] per engine input, mixing every
//! port that feeds that input to the node's computed channel count, and
//! hands them to its [`AudioNodeEngine`]. The engine's output blocks are
//! kept as `last_chunks` so downstream audio nodes read them directly
//! within the same block. Only [`AudioNodeKind::External`] nodes write
//! their output into a track; the rest append silence to keep their
//! timeline advancing.

use super::{GraphView, MediaStream, ProcessedInputs, StreamState};
use crate::block::AudioBlock;
use crate::channel::{ChannelConfig, ChannelInterpretation};
use crate::engine::{AudioNodeEngine, ProcessContext};
use crate::listener::TrackChange;
use crate::port::InputPort;
use crate::segment::{AudioSegment, MediaSegment, TrackKind};
use crate::time::{BLOCK_SIZE, GraphTime, TrackRate};
use crate::tracks::TrackId;

/// Track id of an audio node's output.
pub const AUDIO_NODE_OUTPUT_TRACK: TrackId = TrackId(1);

/// Role of an audio node in the graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AudioNodeKind {
    /// Node whose output only feeds other audio nodes.
    #[default]
    Internal,
    /// Node whose output is exposed as a track to non-audio-node consumers
    /// and audio outputs.
    External,
    /// Node generating audio without inputs.
    Source,
}

/// Graph-side payload of an audio-node stream.
pub struct AudioNodeStream {
    pub(crate) inputs: ProcessedInputs,
    engine: Box<dyn AudioNodeEngine>,
    channel_config: ChannelConfig,
    node_kind: AudioNodeKind,
    sample_rate: TrackRate,
    last_chunks: Vec<AudioBlock>,
    scratch_outputs: Vec<AudioBlock>,
    produced_before_input: bool,
    mark_finished_after_block: bool,
}

impl AudioNodeStream {
    /// Wraps `engine`.
    pub fn new(
        engine: Box<dyn AudioNodeEngine>,
        channel_config: ChannelConfig,
        node_kind: AudioNodeKind,
        sample_rate: TrackRate,
    ) -> Self {
        let outputs = engine.output_count();
        Self {
            inputs: ProcessedInputs::default(),
            engine,
            channel_config,
            node_kind,
            sample_rate,
            last_chunks: vec![AudioBlock::null(); outputs],
            scratch_outputs: vec![AudioBlock::null(); outputs],
            produced_before_input: false,
            mark_finished_after_block: false,
        }
    }

    /// Returns true if the engine may sit inside a cycle.
    pub fn is_cycle_breaker(&self) -> bool {
        self.engine.is_cycle_breaker()
    }

    /// Output blocks of the most recent block.
    pub fn last_chunks(&self) -> &[AudioBlock] {
        &self.last_chunks
    }

    /// Output block `index` of the most recent block.
    pub fn last_chunk(&self, index: usize) -> Option<&AudioBlock> {
        self.last_chunks.get(index)
    }

    /// Input mixing configuration.
    pub fn channel_config(&self) -> ChannelConfig {
        self.channel_config
    }

    /// Role of the node.
    pub fn node_kind(&self) -> AudioNodeKind {
        self.node_kind
    }

    pub(crate) fn set_parameter(&mut self, index: u32, value: f32) {
        self.engine.set_parameter(index, value);
    }

    fn context(&self, state: &StreamState, from: GraphTime) -> ProcessContext {
        ProcessContext {
            graph_time: from,
            stream_time: state.graph_time_to_stream_time_with_blocking(from),
            sample_rate: self.sample_rate,
        }
    }

    pub(crate) fn produce_output_before_input(&mut self, state: &mut StreamState, from: GraphTime) {
        self.produced_before_input = true;
        if state.start_blocking <= from || self.inputs.in_muted_cycle {
            self.last_chunks.iter_mut().for_each(AudioBlock::set_null);
            return;
        }
        let ctx = self.context(state, from);
        self.engine.produce_block_before_input(&ctx, &mut self.last_chunks);
    }

    pub(crate) fn process_input(
        &mut self,
        state: &mut StreamState,
        view: &GraphView<'_>,
        from: GraphTime,
        to: GraphTime,
        allow_finish: bool,
    ) {
        debug_assert!(to - from <= BLOCK_SIZE as GraphTime, "audio nodes run one block at a time");
        if state.finished {
            self.last_chunks.iter_mut().for_each(AudioBlock::set_null);
            self.produced_before_input = false;
            return;
        }
        let blocked = state.start_blocking <= from;
        if blocked || self.inputs.in_muted_cycle {
            if !self.produced_before_input {
                self.last_chunks.iter_mut().for_each(AudioBlock::set_null);
            }
        } else {
            let inputs: Vec<AudioBlock> = (0..self.engine.input_count())
                .map(|i| self.obtain_input_block(view, i, from))
                .collect();
            let ctx = self.context(state, from);
            let outputs = if self.produced_before_input {
                &mut self.scratch_outputs
            } else {
                &mut self.last_chunks
            };
            if self.engine.process_block(&ctx, &inputs, outputs) {
                self.mark_finished_after_block = true;
            }
        }

        if !blocked {
            self.advance_output_segment(state, from, to);
            if self.mark_finished_after_block && allow_finish {
                #[cfg(feature = "tracing")]
                tracing::debug!("audio node {} engine finished", state.id());
                state.finish_on_graph_thread();
            } else {
                state.advance_known_tracks_time_to(to);
            }
        }
        self.produced_before_input = false;
    }

    /// Mixes every port feeding engine input `index` into one block.
    fn obtain_input_block(&self, view: &GraphView<'_>, index: usize, from: GraphTime) -> AudioBlock {
        let mut blocks = Vec::new();
        let mut max_channels = 0usize;
        for port_id in &self.inputs.inputs {
            let Some(port) = view.port(*port_id) else {
                continue;
            };
            if usize::from(port.input_number()) != index {
                continue;
            }
            let Some(source) = view.stream(port.source()) else {
                continue;
            };
            let block = input_from(port, source, from, self.channel_config.interpretation);
            if !block.is_null() {
                max_channels = max_channels.max(block.channel_count());
                blocks.push(block);
            }
        }
        if blocks.is_empty() {
            return AudioBlock::null();
        }

        let channels = self.channel_config.computed_channel_count(max_channels.max(1));
        if blocks.len() == 1 && blocks[0].channel_count() == channels {
            return blocks.swap_remove(0);
        }
        let mut mixed = AudioBlock::null();
        if !mixed.allocate_channels(channels) {
            return mixed;
        }
        for block in &blocks {
            mixed.accumulate(block, self.channel_config.interpretation);
        }
        mixed
    }

    fn advance_output_segment(&mut self, state: &mut StreamState, from: GraphTime, to: GraphTime) {
        let ticks = to - from;
        let start = state.graph_time_to_stream_time_with_blocking(from);
        if state.tracks.find_track(AUDIO_NODE_OUTPUT_TRACK).is_none() {
            state
                .tracks
                .add_track(AUDIO_NODE_OUTPUT_TRACK, start, MediaSegment::empty(TrackKind::Audio));
            let empty = MediaSegment::empty(TrackKind::Audio);
            state.notify_track_changed(AUDIO_NODE_OUTPUT_TRACK, start, TrackChange::Created, &empty);
        }

        let mut segment = AudioSegment::new();
        match self.last_chunks.first() {
            Some(block) if self.node_kind == AudioNodeKind::External => {
                let mut whole = AudioSegment::new();
                whole.append_chunk(block.to_chunk());
                segment.append_slice(&whole, 0, ticks);
            }
            _ => segment.append_null(ticks),
        }
        let segment = MediaSegment::Audio(segment);
        if let Some(track) = state.tracks.find_track_mut(AUDIO_NODE_OUTPUT_TRACK) {
            let offset = track.end();
            track.segment_mut().append_slice(&segment, 0, ticks);
            state.notify_track_changed(AUDIO_NODE_OUTPUT_TRACK, offset, TrackChange::Data, &segment);
        }
    }
}

/// Block delivered by `port` from `source` for the block starting at `from`.
fn input_from(
    port: &InputPort,
    source: &MediaStream,
    from: GraphTime,
    interpretation: ChannelInterpretation,
) -> AudioBlock {
    if source.state().is_suspended() {
        return AudioBlock::null();
    }
    match source.kind().as_audio_node() {
        Some(node) => node
            .last_chunk(usize::from(port.output_number()))
            .cloned()
            .unwrap_or_default(),
        None => {
            let segment = port.read_audio(source, from, from + BLOCK_SIZE as GraphTime);
            AudioBlock::from_segment(&segment, interpretation)
        }
    }
}
