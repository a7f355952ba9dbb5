//! Input ports: directed edges from a source stream to a processed stream.
//!
//! A port owns no media. It names both endpoints, optionally restricts which
//! source tracks flow through it, and (for audio nodes) which engine input
//! and upstream output it connects.

use crate::segment::{AudioSegment, TrackKind};
use crate::stream::{MediaStream, StreamId};
use crate::time::{GRAPH_TIME_MAX, GraphTime};
use crate::tracks::TrackId;

/// Identifier of an input port within one graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub(crate) u32);

impl PortId {
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

impl core::fmt::Display for PortId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "PortId({})", self.0)
    }
}

/// A run of graph time over which a port's input is uniformly blocked or
/// unblocked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputInterval {
    /// First tick of the interval.
    pub start: GraphTime,
    /// End of the interval (exclusive).
    pub end: GraphTime,
    /// True if the source produces nothing over the interval.
    pub input_is_blocked: bool,
}

/// Connection from `source` into `dest`.
#[derive(Clone, Debug)]
pub struct InputPort {
    id: PortId,
    source: StreamId,
    dest: StreamId,
    input_track: Option<TrackId>,
    dest_track: Option<TrackId>,
    blocked_tracks: Vec<TrackId>,
    input_number: u16,
    output_number: u16,
}

impl InputPort {
    /// Connects every track of `source` into `dest`.
    pub fn new(id: PortId, source: StreamId, dest: StreamId) -> Self {
        Self {
            id,
            source,
            dest,
            input_track: None,
            dest_track: None,
            blocked_tracks: Vec::new(),
            input_number: 0,
            output_number: 0,
        }
    }

    /// Restricts the port to one source track, optionally mapped to a fixed
    /// destination track id.
    pub fn with_track(mut self, input_track: TrackId, dest_track: Option<TrackId>) -> Self {
        self.input_track = Some(input_track);
        self.dest_track = dest_track;
        self
    }

    /// Selects the engine input of `dest` and the engine output of `source`.
    pub fn with_numbers(mut self, input_number: u16, output_number: u16) -> Self {
        self.input_number = input_number;
        self.output_number = output_number;
        self
    }

    /// Excludes `track` from this port.
    pub fn block_track(mut self, track: TrackId) -> Self {
        self.blocked_tracks.push(track);
        self
    }

    /// Port identifier.
    pub fn id(&self) -> PortId {
        self.id
    }

    /// Upstream stream.
    pub fn source(&self) -> StreamId {
        self.source
    }

    /// Downstream stream.
    pub fn dest(&self) -> StreamId {
        self.dest
    }

    /// Source track filter; `None` passes every track.
    pub fn input_track(&self) -> Option<TrackId> {
        self.input_track
    }

    /// Fixed destination track id, if any.
    pub fn dest_track(&self) -> Option<TrackId> {
        self.dest_track
    }

    /// Engine input index on the destination.
    pub fn input_number(&self) -> u16 {
        self.input_number
    }

    /// Engine output index on the source.
    pub fn output_number(&self) -> u16 {
        self.output_number
    }

    /// Returns true if `track` may flow through this port.
    pub fn pass_track_through(&self, track: TrackId) -> bool {
        !self.blocked_tracks.contains(&track) && self.input_track.is_none_or(|t| t == track)
    }

    /// Interval starting at `t` over which the source's blocking state is
    /// constant.
    pub fn next_input_interval(&self, source: &MediaStream, t: GraphTime) -> InputInterval {
        let start_blocking = source.state().start_blocking();
        if t >= start_blocking {
            InputInterval {
                start: t,
                end: GRAPH_TIME_MAX,
                input_is_blocked: true,
            }
        } else {
            InputInterval {
                start: t,
                end: start_blocking,
                input_is_blocked: false,
            }
        }
    }

    /// First source audio track this port passes.
    pub(crate) fn audio_track_of(&self, source: &MediaStream) -> Option<TrackId> {
        source
            .state()
            .tracks()
            .tracks_of(TrackKind::Audio)
            .map(|t| t.id())
            .find(|id| self.pass_track_through(*id))
    }

    /// Audio delivered through this port over graph interval `[from, to)`.
    ///
    /// Blocked spans, disabled tracks, suspended sources and ticks past the
    /// end of the track's data read as null.
    pub(crate) fn read_audio(&self, source: &MediaStream, from: GraphTime, to: GraphTime) -> AudioSegment {
        let mut out = AudioSegment::new();
        let state = source.state();
        let track = self
            .audio_track_of(source)
            .filter(|id| !state.is_track_disabled(*id) && !state.is_suspended())
            .and_then(|id| state.tracks().find_track(id));
        let mut t = from;
        while t < to {
            let interval = self.next_input_interval(source, t);
            let end = interval.end.min(to);
            let ticks = end - t;
            match track {
                Some(track) if !interval.input_is_blocked => {
                    let available = track.end();
                    let s0 = state.graph_time_to_stream_time_with_blocking(t).min(available);
                    let s1 = state.graph_time_to_stream_time_with_blocking(end).min(available);
                    if let Some(segment) = track.segment().as_audio() {
                        out.append_slice(segment, s0, s1);
                    }
                    out.append_null(ticks - (s1 - s0));
                }
                _ => out.append_null(ticks),
            }
            t = end;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{AudioChunk, Chunk, MediaSegment};
    use crate::stream::{SourceFeed, SourceStream, StreamKind};

    fn source_with_ramp(frames: usize) -> MediaStream {
        let mut s = MediaStream::new(
            StreamId(0),
            StreamKind::Source(SourceStream::new(SourceFeed::new())),
        );
        let mut seg = AudioSegment::new();
        seg.append_chunk(AudioChunk::mono(
            &(0..frames).map(|i| i as f32).collect::<Vec<_>>(),
        ));
        s.state.tracks.add_track(TrackId(1), 0, MediaSegment::Audio(seg));
        s
    }

    #[test]
    fn test_pass_track_through() {
        let port = InputPort::new(PortId(0), StreamId(0), StreamId(1)).block_track(TrackId(3));
        assert!(port.pass_track_through(TrackId(1)));
        assert!(!port.pass_track_through(TrackId(3)));

        let only = InputPort::new(PortId(1), StreamId(0), StreamId(1)).with_track(TrackId(2), None);
        assert!(only.pass_track_through(TrackId(2)));
        assert!(!only.pass_track_through(TrackId(1)));
    }

    #[test]
    fn test_next_input_interval() {
        let mut s = source_with_ramp(10);
        s.state.start_blocking = 256;
        let port = InputPort::new(PortId(0), StreamId(0), StreamId(1));

        let open = port.next_input_interval(&s, 128);
        assert_eq!(open, InputInterval { start: 128, end: 256, input_is_blocked: false });

        let blocked = port.next_input_interval(&s, 256);
        assert!(blocked.input_is_blocked);
        assert_eq!(blocked.end, GRAPH_TIME_MAX);
    }

    #[test]
    fn test_read_audio_nulls_blocked_span() {
        let mut s = source_with_ramp(200);
        s.state.start_blocking = 150;
        let port = InputPort::new(PortId(0), StreamId(0), StreamId(1));

        let seg = port.read_audio(&s, 100, 200);
        assert_eq!(seg.duration(), 100);
        assert_eq!(seg.chunks()[0].duration(), 50);
        assert_eq!(seg.chunks()[0].channel(0).unwrap()[0], 100.0);
        assert!(seg.chunks()[1].is_null());
    }

    #[test]
    fn test_read_audio_disabled_track_is_null() {
        let mut s = source_with_ramp(100);
        s.state.start_blocking = 1000;
        s.state.disabled_tracks.insert(TrackId(1));
        let port = InputPort::new(PortId(0), StreamId(0), StreamId(1));
        let seg = port.read_audio(&s, 0, 100);
        assert_eq!(seg.duration(), 100);
        assert!(seg.is_null());
    }
}
