//! Per-stream track buffers.

use crate::segment::{MediaSegment, TrackKind};
use crate::time::{STREAM_TIME_MAX, StreamTime};

/// Identifier of a track within one stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub u32);

impl core::fmt::Display for TrackId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "TrackId({})", self.0)
    }
}

/// One append-only track. The segment is aligned to stream time zero: ticks
/// before `start` are null.
#[derive(Clone, Debug)]
pub struct Track {
    id: TrackId,
    start: StreamTime,
    segment: MediaSegment,
    ended: bool,
}

impl Track {
    /// Track identifier.
    pub fn id(&self) -> TrackId {
        self.id
    }

    /// Media type of the track.
    pub fn kind(&self) -> TrackKind {
        self.segment.kind()
    }

    /// Stream time at which the track's data begins.
    pub fn start(&self) -> StreamTime {
        self.start
    }

    /// Stream time up to which data has been written.
    pub fn end(&self) -> StreamTime {
        self.segment.duration()
    }

    /// Returns true once no more data will be appended.
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Track data, aligned to stream time zero.
    pub fn segment(&self) -> &MediaSegment {
        &self.segment
    }

    pub(crate) fn segment_mut(&mut self) -> &mut MediaSegment {
        &mut self.segment
    }

    pub(crate) fn set_ended(&mut self) {
        self.ended = true;
    }
}

/// The set of tracks owned by one stream.
#[derive(Clone, Debug)]
pub struct StreamTracks {
    tracks: Vec<Track>,
    known_tracks_time: StreamTime,
    forgotten_time: StreamTime,
}

impl Default for StreamTracks {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamTracks {
    /// Creates an empty track set whose track list is not yet known.
    pub fn new() -> Self {
        Self {
            tracks: Vec::new(),
            known_tracks_time: 0,
            forgotten_time: 0,
        }
    }

    /// Adds a track starting at `start`. `segment` holds data beginning at
    /// `start`; it is shifted onto the stream timeline with a null prefix.
    ///
    /// Panics if the id is already in use.
    pub fn add_track(&mut self, id: TrackId, start: StreamTime, segment: MediaSegment) -> &mut Track {
        assert!(self.find_track(id).is_none(), "duplicate {id}");
        let mut aligned = MediaSegment::empty(segment.kind());
        aligned.append_null(start);
        aligned.append_segment(segment);
        self.tracks.push(Track {
            id,
            start,
            segment: aligned,
            ended: false,
        });
        let last = self.tracks.len() - 1;
        &mut self.tracks[last]
    }

    /// Looks up a track.
    pub fn find_track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    /// Looks up a track mutably.
    pub fn find_track_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.id == id)
    }

    /// All tracks in creation order.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Tracks of one media type.
    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    pub(crate) fn tracks_mut(&mut self) -> impl Iterator<Item = &mut Track> {
        self.tracks.iter_mut()
    }

    /// Stream time before which no new tracks can appear.
    pub fn known_tracks_time(&self) -> StreamTime {
        self.known_tracks_time
    }

    /// Promises that no track will be added starting before `t`.
    pub fn advance_known_tracks_time(&mut self, t: StreamTime) {
        assert!(t >= self.known_tracks_time, "known tracks time went backwards");
        self.known_tracks_time = t;
    }

    /// Earliest time at which some live track runs out of data, bounded by
    /// the known-tracks time.
    pub fn end(&self) -> StreamTime {
        self.tracks
            .iter()
            .filter(|t| !t.ended)
            .map(Track::end)
            .fold(self.known_tracks_time, StreamTime::min)
    }

    /// Time at which all data ends, or [`STREAM_TIME_MAX`] if more tracks or
    /// data may still arrive.
    pub fn all_tracks_end(&self) -> StreamTime {
        if self.known_tracks_time < STREAM_TIME_MAX {
            return STREAM_TIME_MAX;
        }
        let mut t = 0;
        for track in &self.tracks {
            if !track.ended {
                return STREAM_TIME_MAX;
            }
            t = t.max(track.end());
        }
        t
    }

    /// Marks every track ended.
    pub fn end_all_tracks(&mut self) {
        for track in &mut self.tracks {
            track.ended = true;
        }
    }

    /// Time before which data has been discarded.
    pub fn forgotten_time(&self) -> StreamTime {
        self.forgotten_time
    }

    /// Discards data before `t` and drops ended tracks that finish before it.
    pub fn forget_up_to(&mut self, t: StreamTime) {
        self.tracks.retain(|track| !(track.ended && track.end() <= t));
        for track in &mut self.tracks {
            track.segment.forget_up_to(t);
        }
        self.forgotten_time = self.forgotten_time.max(t);
    }
}
