//! Source streams: media injected from outside the graph.
//!
//! Producers write through a [`SourceFeed`] from any thread. Writes land in a
//! staging area guarded by a mutex that covers only that staging area; the
//! graph thread moves staged data into the stream's tracks at the start of
//! each iteration, so new data never becomes visible mid-iteration.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::StreamState;
use crate::listener::TrackChange;
use crate::segment::MediaSegment;
use crate::time::{GraphTime, STREAM_TIME_MAX, StreamTime};
use crate::tracks::TrackId;

/// Supplies data on demand for a pull-enabled source.
pub trait SourcePuller: Send {
    /// Asked to append data through `feed` so tracks reach `desired`
    /// stream time. Called on the graph thread with the staging lock released.
    fn pull(&mut self, feed: &SourceFeed, desired: StreamTime);
}

struct PendingTrack {
    id: TrackId,
    start: StreamTime,
    data: MediaSegment,
    create: bool,
    end: bool,
}

#[derive(Default)]
struct SourceUpdate {
    tracks: Vec<PendingTrack>,
    known_tracks_time: StreamTime,
    finish_pending: bool,
    pull_enabled: bool,
    finished: bool,
}

/// Thread-safe producer handle of a source stream.
///
/// Cloning the feed shares the same staging area.
#[derive(Clone, Default)]
pub struct SourceFeed {
    inner: Arc<Mutex<SourceUpdate>>,
}

impl core::fmt::Debug for SourceFeed {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SourceFeed").finish_non_exhaustive()
    }
}

impl SourceFeed {
    /// Creates an empty staging area.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SourceUpdate> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a new track beginning at stream time `start` with initial
    /// data `segment`. Returns false if the stream has finished or the id
    /// is already staged.
    pub fn add_track(&self, id: TrackId, start: StreamTime, segment: MediaSegment) -> bool {
        let mut update = self.lock();
        if update.finished || update.finish_pending || update.tracks.iter().any(|t| t.id == id) {
            return false;
        }
        update.tracks.push(PendingTrack {
            id,
            start,
            data: segment,
            create: true,
            end: false,
        });
        true
    }

    /// Appends data to a live track. Returns false if the track is unknown,
    /// ended, of another media type, or the stream has finished.
    pub fn append_to_track(&self, id: TrackId, segment: MediaSegment) -> bool {
        let mut update = self.lock();
        if update.finished || update.finish_pending {
            return false;
        }
        let Some(track) = update.tracks.iter_mut().find(|t| t.id == id && !t.end) else {
            return false;
        };
        if track.data.kind() != segment.kind() {
            return false;
        }
        track.data.append_segment(segment);
        true
    }

    /// Marks a track ended after its staged data. Call once per track.
    pub fn end_track(&self, id: TrackId) {
        let mut update = self.lock();
        if let Some(track) = update.tracks.iter_mut().find(|t| t.id == id) {
            track.end = true;
        }
    }

    /// Promises no track will be added starting before `t`.
    pub fn advance_known_tracks_time(&self, t: StreamTime) {
        let mut update = self.lock();
        update.known_tracks_time = update.known_tracks_time.max(t);
    }

    /// Promises no further tracks will be added.
    pub fn finish_add_tracks(&self) {
        self.advance_known_tracks_time(STREAM_TIME_MAX);
    }

    /// Ends every track and finishes the stream at the next iteration.
    pub fn finish(&self) {
        let mut update = self.lock();
        for track in &mut update.tracks {
            track.end = true;
        }
        update.finish_pending = true;
    }

    /// Enables or disables pulling from registered pullers.
    pub fn set_pull_enabled(&self, enabled: bool) {
        self.lock().pull_enabled = enabled;
    }

    /// Returns true once the graph has applied `finish`.
    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    /// Ticks of data staged for `id` but not yet taken by the graph.
    pub fn staged_duration(&self, id: TrackId) -> StreamTime {
        self.lock()
            .tracks
            .iter()
            .find(|t| t.id == id)
            .map_or(0, |t| t.data.duration())
    }
}

/// Graph-side payload of a source stream.
pub struct SourceStream {
    feed: SourceFeed,
    pullers: Vec<Box<dyn SourcePuller>>,
}

impl SourceStream {
    /// Wraps the graph side of `feed`.
    pub fn new(feed: SourceFeed) -> Self {
        Self {
            feed,
            pullers: Vec::new(),
        }
    }

    /// Registers a puller consulted when pull is enabled.
    pub fn with_puller(mut self, puller: Box<dyn SourcePuller>) -> Self {
        self.pullers.push(puller);
        self
    }

    /// The producer handle.
    pub fn feed(&self) -> &SourceFeed {
        &self.feed
    }

    pub(crate) fn add_puller(&mut self, puller: Box<dyn SourcePuller>) {
        self.pullers.push(puller);
    }

    /// Asks pullers for data up to graph time `desired`. The data is staged
    /// and becomes visible at the next [`extract_pending_input`](Self::extract_pending_input).
    pub(crate) fn pull_new_data(&mut self, state: &StreamState, desired: GraphTime) {
        let enabled = {
            let update = self.feed.lock();
            update.pull_enabled && !update.finished
        };
        if !enabled || state.finished || self.pullers.is_empty() {
            return;
        }
        let t = state.graph_time_to_stream_time(desired);
        if t <= state.tracks.end() {
            return;
        }
        for puller in &mut self.pullers {
            puller.pull(&self.feed, t);
        }
    }

    /// Moves staged data into the stream's tracks.
    pub(crate) fn extract_pending_input(&mut self, state: &mut StreamState) {
        let mut changes = Vec::new();
        let finish = {
            let mut update = self.feed.lock();
            for pending in &mut update.tracks {
                let kind = pending.data.kind();
                let data = std::mem::replace(&mut pending.data, MediaSegment::empty(kind));
                if pending.create && state.tracks.find_track(pending.id).is_some() {
                    // Ids of ended tracks stay taken for the stream's lifetime.
                    #[cfg(feature = "tracing")]
                    tracing::warn!("stream {} dropped duplicate track {}", state.id(), pending.id);
                    pending.create = false;
                    pending.end = true;
                    continue;
                } else if pending.create {
                    pending.create = false;
                    state.tracks.add_track(pending.id, pending.start, data.clone());
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        "stream {} added track {} at {}",
                        state.id(),
                        pending.id,
                        pending.start
                    );
                    changes.push((pending.id, pending.start, TrackChange::Created, data));
                } else if let Some(track) = state.tracks.find_track_mut(pending.id) {
                    if data.duration() > 0 {
                        let offset = track.end();
                        track.segment_mut().append_segment(data.clone());
                        changes.push((pending.id, offset, TrackChange::Data, data));
                    }
                }
                if pending.end
                    && let Some(track) = state.tracks.find_track_mut(pending.id)
                {
                    track.set_ended();
                    let end = track.end();
                    changes.push((pending.id, end, TrackChange::Ended, MediaSegment::empty(track.kind())));
                }
            }
            update.tracks.retain(|t| !t.end);
            if update.known_tracks_time > state.tracks.known_tracks_time() {
                state.tracks.advance_known_tracks_time(update.known_tracks_time);
            }
            if update.finish_pending {
                update.finished = true;
            }
            update.finish_pending
        };

        if !state.has_current_data && (finish || state.tracks.tracks().iter().any(|t| t.end() > 0)) {
            state.has_current_data = true;
        }
        for (id, offset, change, segment) in &changes {
            state.notify_track_changed(*id, *offset, *change, segment);
        }
        if finish {
            state.finish_on_graph_thread();
        }
    }
}
