//! Observer contract for stream state changes.
//!
//! Listeners run on the graph thread at iteration boundaries. Events for one
//! stream are always delivered in that stream's timeline order.

use std::sync::mpsc::Sender;

use crate::segment::MediaSegment;
use crate::stream::StreamId;
use crate::time::{GraphTime, StreamTime};
use crate::tracks::TrackId;

/// Lifecycle change of a track reported with [`StreamEvent::TrackChanged`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackChange {
    /// The track was created by this change.
    Created,
    /// Data was appended.
    Data,
    /// The track ended.
    Ended,
}

/// Notification delivered to a [`StreamListener`].
#[derive(Clone, Debug)]
pub enum StreamEvent {
    /// The stream stopped producing output.
    Blocked,
    /// The stream resumed producing output.
    Unblocked,
    /// Output was produced up to the given graph time.
    Output(GraphTime),
    /// The stream has data for the current time for the first time.
    HasCurrentData,
    /// A track changed. `segment` holds the data appended at `offset`.
    TrackChanged {
        /// Track that changed.
        track: TrackId,
        /// Stream time at which `segment` begins.
        offset: StreamTime,
        /// Kind of change.
        change: TrackChange,
        /// Newly appended data; empty for creation/end without data.
        segment: MediaSegment,
    },
    /// All of the stream's data has been played out.
    Finished,
    /// The stream was destroyed.
    Removed,
}

/// Receives events for one stream.
pub trait StreamListener: Send {
    /// Called on the graph thread for every event.
    fn on_event(&mut self, stream: StreamId, event: &StreamEvent);
}

/// Forwards events over an mpsc channel so another thread can observe them.
#[derive(Debug)]
pub struct ChannelListener {
    tx: Sender<(StreamId, StreamEvent)>,
}

impl ChannelListener {
    /// Creates a listener sending into `tx`.
    pub fn new(tx: Sender<(StreamId, StreamEvent)>) -> Self {
        Self { tx }
    }
}

impl StreamListener for ChannelListener {
    fn on_event(&mut self, stream: StreamId, event: &StreamEvent) {
        // A dropped receiver just means nobody is watching anymore.
        let _ = self.tx.send((stream, event.clone()));
    }
}

impl<F> StreamListener for F
where
    F: FnMut(StreamId, &StreamEvent) + Send,
{
    fn on_event(&mut self, stream: StreamId, event: &StreamEvent) {
        self(stream, event);
    }
}
