//! Streams: the nodes of the media graph.
//!
//! Every stream carries the same bookkeeping ([`StreamState`]: tracks,
//! timeline offsets, blocking, lifecycle flags, listeners, outputs) plus a
//! variant payload ([`StreamKind`]) chosen from a closed set:
//!
//! - [`SourceStream`] receives data from producer threads through a
//!   [`SourceFeed`].
//! - [`ProcessedStream`] runs a pluggable [`StreamProcessor`] over its inputs.
//! - [`TrackUnionStream`] copies every input track through unchanged.
//! - [`AudioNodeStream`] runs an [`AudioNodeEngine`](crate::AudioNodeEngine)
//!   one fixed block at a time.
//!
//! # Timelines
//!
//! A stream's local time starts at `tracks_start_time` in graph time and
//! stops advancing while the stream is blocked. `start_blocking` is the graph
//! time from which the stream is blocked for the iteration being computed.

use std::collections::HashSet;

use crate::listener::{StreamEvent, StreamListener, TrackChange};
use crate::port::{InputPort, PortId};
use crate::segment::{MediaSegment, VideoFrame};
use crate::time::{GRAPH_TIME_MAX, GraphTime, STREAM_TIME_MAX, StreamTime, TrackRate};
use crate::tracks::{StreamTracks, TrackId};

mod audio_node;
mod processed;
mod source;
mod track_union;

pub use audio_node::{AUDIO_NODE_OUTPUT_TRACK, AudioNodeKind, AudioNodeStream};
pub use processed::{PROCESSED_OUTPUT_TRACK, ProcessedStream, StreamProcessor};
pub use source::{SourceFeed, SourcePuller, SourceStream};
pub use track_union::TrackUnionStream;

/// Identifier of a stream within one graph.
///
/// Ids are assigned sequentially and never reused within a graph instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub(crate) u32);

impl StreamId {
    /// Returns the raw numeric identifier.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }

    /// Builds an id from its raw value.
    #[inline]
    pub fn from_index(index: u32) -> Self {
        Self(index)
    }
}

impl core::fmt::Display for StreamId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "StreamId({})", self.0)
    }
}

/// Receives the frame current at each iteration for a video output.
pub trait VideoSink: Send {
    /// Called when the displayed frame changes.
    fn set_current_frame(&mut self, frame: &VideoFrame, at: GraphTime);
}

pub(crate) struct AudioOutput {
    pub key: u64,
    pub volume: f32,
}

pub(crate) struct VideoOutput {
    pub key: u64,
    pub sink: Box<dyn VideoSink>,
}

/// Bookkeeping shared by every stream variant.
pub struct StreamState {
    id: StreamId,
    pub(crate) tracks: StreamTracks,
    pub(crate) tracks_start_time: GraphTime,
    pub(crate) start_blocking: GraphTime,
    pub(crate) suspended_count: u32,
    pub(crate) finished: bool,
    pub(crate) notified_finished: bool,
    pub(crate) notified_blocked: bool,
    pub(crate) has_current_data: bool,
    pub(crate) notified_has_current_data: bool,
    pub(crate) listeners: Vec<Box<dyn StreamListener>>,
    pub(crate) audio_outputs: Vec<AudioOutput>,
    pub(crate) video_outputs: Vec<VideoOutput>,
    pub(crate) last_played_frame: Option<VideoFrame>,
    pub(crate) disabled_tracks: HashSet<TrackId>,
    pub(crate) consumers: Vec<PortId>,
}

impl StreamState {
    fn new(id: StreamId) -> Self {
        Self {
            id,
            tracks: StreamTracks::new(),
            tracks_start_time: 0,
            start_blocking: 0,
            suspended_count: 0,
            finished: false,
            notified_finished: false,
            notified_blocked: false,
            has_current_data: false,
            notified_has_current_data: false,
            listeners: Vec::new(),
            audio_outputs: Vec::new(),
            video_outputs: Vec::new(),
            last_played_frame: None,
            disabled_tracks: HashSet::new(),
            consumers: Vec::new(),
        }
    }

    /// Stream identifier.
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// The stream's tracks.
    pub fn tracks(&self) -> &StreamTracks {
        &self.tracks
    }

    /// Graph time corresponding to stream time zero.
    pub fn tracks_start_time(&self) -> GraphTime {
        self.tracks_start_time
    }

    /// Graph time from which the stream is blocked in the current iteration.
    pub fn start_blocking(&self) -> GraphTime {
        self.start_blocking
    }

    /// Returns true once the stream has finished on the graph thread.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Returns true once the finished event has been delivered.
    pub fn is_notified_finished(&self) -> bool {
        self.notified_finished
    }

    /// Returns true while the stream is suspended.
    pub fn is_suspended(&self) -> bool {
        self.suspended_count > 0
    }

    /// Returns true while listeners consider the stream blocked.
    pub fn is_blocked(&self) -> bool {
        self.notified_blocked
    }

    /// Returns true if `track` is disabled (delivers null data).
    pub fn is_track_disabled(&self, track: TrackId) -> bool {
        self.disabled_tracks.contains(&track)
    }

    /// Returns true if the stream plays to at least one audio output.
    pub fn has_audio_outputs(&self) -> bool {
        !self.audio_outputs.is_empty()
    }

    /// Converts graph time to stream time, assuming no blocking before `t`.
    pub fn graph_time_to_stream_time(&self, t: GraphTime) -> StreamTime {
        t - self.tracks_start_time
    }

    /// Converts graph time to stream time, stopping at `start_blocking`.
    pub fn graph_time_to_stream_time_with_blocking(&self, t: GraphTime) -> StreamTime {
        (t.min(self.start_blocking) - self.tracks_start_time).max(0)
    }

    /// Converts stream time to graph time, assuming no further blocking.
    pub fn stream_time_to_graph_time(&self, t: StreamTime) -> GraphTime {
        if t >= STREAM_TIME_MAX {
            return GRAPH_TIME_MAX;
        }
        t + self.tracks_start_time
    }

    /// Delivers `event` to every listener.
    pub(crate) fn notify(&mut self, event: &StreamEvent) {
        let id = self.id;
        for listener in &mut self.listeners {
            listener.on_event(id, event);
        }
    }

    pub(crate) fn notify_track_changed(
        &mut self,
        track: TrackId,
        offset: StreamTime,
        change: TrackChange,
        segment: &MediaSegment,
    ) {
        if self.listeners.is_empty() {
            return;
        }
        self.notify(&StreamEvent::TrackChanged {
            track,
            offset,
            change,
            segment: segment.clone(),
        });
    }

    /// Ends every track and marks the stream finished. Idempotent.
    pub(crate) fn finish_on_graph_thread(&mut self) {
        if self.finished {
            return;
        }
        #[cfg(feature = "tracing")]
        tracing::debug!("stream {} finished on graph thread", self.id);
        self.finished = true;
        let mut ended = Vec::new();
        for track in self.tracks.tracks_mut() {
            if !track.is_ended() {
                track.set_ended();
                ended.push((track.id(), track.end(), MediaSegment::empty(track.kind())));
            }
        }
        if self.tracks.known_tracks_time() < STREAM_TIME_MAX {
            self.tracks.advance_known_tracks_time(STREAM_TIME_MAX);
        }
        for (id, end, empty) in ended {
            self.notify_track_changed(id, end, TrackChange::Ended, &empty);
        }
    }

    /// Advances the known-tracks time to the stream time of `t`, if later.
    pub(crate) fn advance_known_tracks_time_to(&mut self, t: GraphTime) {
        let st = self.graph_time_to_stream_time_with_blocking(t);
        if st > self.tracks.known_tracks_time() {
            self.tracks.advance_known_tracks_time(st);
        }
    }
}

/// Inputs and ordering flags shared by processed variants.
#[derive(Debug, Default)]
pub struct ProcessedInputs {
    pub(crate) inputs: Vec<PortId>,
    pub(crate) suspended_inputs: Vec<PortId>,
    pub(crate) in_muted_cycle: bool,
    pub(crate) autofinish: bool,
}

impl ProcessedInputs {
    /// Live input ports, in connection order.
    pub fn inputs(&self) -> &[PortId] {
        &self.inputs
    }

    /// Ports whose source stream is suspended.
    pub fn suspended_inputs(&self) -> &[PortId] {
        &self.suspended_inputs
    }

    /// Returns true if the stream is in a cycle without a cycle breaker.
    pub fn in_muted_cycle(&self) -> bool {
        self.in_muted_cycle
    }

    /// Returns true if the stream finishes once all inputs finish.
    pub fn autofinish(&self) -> bool {
        self.autofinish
    }

    pub(crate) fn all_ports(&self) -> impl Iterator<Item = PortId> + '_ {
        self.inputs.iter().chain(&self.suspended_inputs).copied()
    }

    pub(crate) fn remove_port(&mut self, port: PortId) {
        self.inputs.retain(|p| *p != port);
        self.suspended_inputs.retain(|p| *p != port);
    }
}

/// Variant payload of a stream.
pub enum StreamKind {
    /// Fed from outside the graph.
    Source(SourceStream),
    /// Generic processor over inputs.
    Processed(ProcessedStream),
    /// Pass-through of input tracks.
    TrackUnion(TrackUnionStream),
    /// Block-wise audio engine.
    AudioNode(AudioNodeStream),
}

impl StreamKind {
    /// Input bookkeeping for processed variants.
    pub fn processed(&self) -> Option<&ProcessedInputs> {
        match self {
            Self::Source(_) => None,
            Self::Processed(p) => Some(&p.inputs),
            Self::TrackUnion(t) => Some(&t.inputs),
            Self::AudioNode(n) => Some(&n.inputs),
        }
    }

    pub(crate) fn processed_mut(&mut self) -> Option<&mut ProcessedInputs> {
        match self {
            Self::Source(_) => None,
            Self::Processed(p) => Some(&mut p.inputs),
            Self::TrackUnion(t) => Some(&mut t.inputs),
            Self::AudioNode(n) => Some(&mut n.inputs),
        }
    }

    /// The audio-node payload, if this is one.
    pub fn as_audio_node(&self) -> Option<&AudioNodeStream> {
        match self {
            Self::AudioNode(n) => Some(n),
            _ => None,
        }
    }

    pub(crate) fn as_audio_node_mut(&mut self) -> Option<&mut AudioNodeStream> {
        match self {
            Self::AudioNode(n) => Some(n),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Source(_) => "source",
            Self::Processed(_) => "processed",
            Self::TrackUnion(_) => "track-union",
            Self::AudioNode(_) => "audio-node",
        }
    }
}

/// A node of the media graph.
pub struct MediaStream {
    pub(crate) state: StreamState,
    pub(crate) kind: StreamKind,
}

impl MediaStream {
    /// Creates a stream. It becomes live once added to a graph.
    pub fn new(id: StreamId, kind: StreamKind) -> Self {
        Self {
            state: StreamState::new(id),
            kind,
        }
    }

    /// Stream identifier.
    pub fn id(&self) -> StreamId {
        self.state.id
    }

    /// Shared bookkeeping.
    pub fn state(&self) -> &StreamState {
        &self.state
    }

    /// Variant payload.
    pub fn kind(&self) -> &StreamKind {
        &self.kind
    }

    /// Returns true for every variant except sources.
    pub fn is_processed(&self) -> bool {
        self.kind.processed().is_some()
    }

    /// Returns true if this stream's engine can break cycles.
    pub fn is_cycle_breaker(&self) -> bool {
        self.kind
            .as_audio_node()
            .is_some_and(AudioNodeStream::is_cycle_breaker)
    }

    /// Short name of the variant, for logs.
    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }

    /// Produces output for graph interval `[from, to)`.
    pub(crate) fn process_input(
        &mut self,
        view: &GraphView<'_>,
        from: GraphTime,
        to: GraphTime,
        allow_finish: bool,
    ) {
        let Self { state, kind } = self;
        match kind {
            StreamKind::Source(_) => {}
            StreamKind::Processed(p) => p.process_input(state, view, from, to, allow_finish),
            StreamKind::TrackUnion(t) => t.process_input(state, view, from, to, allow_finish),
            StreamKind::AudioNode(n) => n.process_input(state, view, from, to, allow_finish),
        }
    }

    /// Runs a cycle breaker's pre-input step for the block at `from`.
    pub(crate) fn produce_output_before_input(&mut self, from: GraphTime) {
        let Self { state, kind } = self;
        let node = kind
            .as_audio_node_mut()
            .expect("cycle breaker partition holds only audio-node streams");
        node.produce_output_before_input(state, from);
    }
}

/// Read-only view of the graph handed to a stream while it processes.
///
/// The stream being processed is taken out of its slot for the duration,
/// so a port whose source is the stream itself resolves to nothing.
pub(crate) struct GraphView<'a> {
    pub streams: &'a [Option<MediaStream>],
    pub ports: &'a [Option<InputPort>],
    pub rate: TrackRate,
}

impl GraphView<'_> {
    pub fn stream(&self, id: StreamId) -> Option<&MediaStream> {
        self.streams.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub fn port(&self, id: PortId) -> Option<&InputPort> {
        self.ports.get(id.index() as usize).and_then(Option::as_ref)
    }
}
