//! Main-thread handles of streams and ports.
//!
//! A [`MediaStreamHandle`] is a shared reference to one stream of a graph.
//! Cloning it raises the owning count; when the last clone drops, a destroy
//! message is queued and the graph releases the stream at its next
//! iteration. The handle never touches the stream itself: commands travel
//! as control messages and state is read from the published snapshot.

use std::ops::Deref;
use std::sync::Arc;

use streamgraph_core::{
    Command, ControlMessage, PortId, SourceFeed, SourcePuller, StreamId, StreamListener, StreamSnapshot, StreamTime,
    TrackId, VideoSink,
};

use crate::graph::MediaStreamGraph;

struct HandleInner {
    id: StreamId,
    graph: MediaStreamGraph,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        self.graph
            .append_message(ControlMessage::to(self.id, Command::DestroyStream));
    }
}

/// Shared reference to a stream of a [`MediaStreamGraph`].
#[derive(Clone)]
pub struct MediaStreamHandle {
    inner: Arc<HandleInner>,
}

impl std::fmt::Debug for MediaStreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStreamHandle")
            .field("id", &self.inner.id)
            .field("owning_count", &self.owning_count())
            .finish_non_exhaustive()
    }
}

impl MediaStreamHandle {
    pub(crate) fn new(id: StreamId, graph: MediaStreamGraph) -> Self {
        Self {
            inner: Arc::new(HandleInner { id, graph }),
        }
    }

    /// Stream id within its graph.
    pub fn id(&self) -> StreamId {
        self.inner.id
    }

    /// Graph the stream belongs to.
    pub fn graph(&self) -> &MediaStreamGraph {
        &self.inner.graph
    }

    /// Number of live clones of this handle.
    pub fn owning_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    fn send(&self, command: Command) {
        self.inner
            .graph
            .append_message(ControlMessage::to(self.inner.id, command));
    }

    /// Registers an observer of this stream's events. Current state
    /// (has data, blocked, finished) is replayed to it first.
    pub fn add_listener(&self, listener: Box<dyn StreamListener>) {
        self.send(Command::AddListener(listener));
    }

    /// Takes the stream out of processing until [`resume`](Self::resume).
    pub fn suspend(&self) {
        self.send(Command::Suspend);
    }

    /// Undoes one [`suspend`](Self::suspend).
    pub fn resume(&self) {
        self.send(Command::Resume);
    }

    /// Enables or disables a track. Disabled tracks deliver silence or
    /// black downstream and to outputs.
    pub fn set_track_enabled(&self, track: TrackId, enabled: bool) {
        self.send(Command::SetTrackEnabled { track, enabled });
    }

    /// Mixes the stream's audio into the graph output at `volume`.
    pub fn add_audio_output(&self, key: u64, volume: f32) {
        self.send(Command::AddAudioOutput { key, volume });
    }

    /// Changes the volume of an audio output.
    pub fn set_audio_output_volume(&self, key: u64, volume: f32) {
        self.send(Command::SetAudioOutputVolume { key, volume });
    }

    /// Removes an audio output.
    pub fn remove_audio_output(&self, key: u64) {
        self.send(Command::RemoveAudioOutput(key));
    }

    /// Delivers the stream's current video frame to `sink` when it changes.
    pub fn add_video_output(&self, key: u64, sink: Box<dyn VideoSink>) {
        self.send(Command::AddVideoOutput { key, sink });
    }

    /// Removes a video output.
    pub fn remove_video_output(&self, key: u64) {
        self.send(Command::RemoveVideoOutput(key));
    }

    /// Makes a processed stream finish once all its inputs have.
    pub fn set_autofinish(&self, autofinish: bool) {
        self.send(Command::SetAutofinish(autofinish));
    }

    /// Sets a parameter of an audio node's engine.
    pub fn set_engine_parameter(&self, index: u32, value: f32) {
        self.send(Command::SetEngineParameter { index, value });
    }

    /// Finishes the stream at the next iteration.
    pub fn finish(&self) {
        self.send(Command::Finish);
    }

    fn snapshot(&self) -> Option<StreamSnapshot> {
        self.inner.graph.snapshot().streams.get(&self.inner.id).copied()
    }

    /// Stream time at the processed watermark of the last iteration.
    pub fn current_time(&self) -> StreamTime {
        self.snapshot().map_or(0, |s| s.current_time)
    }

    /// Returns true once the finished event has been delivered.
    pub fn is_finished(&self) -> bool {
        self.snapshot().is_some_and(|s| s.finished)
    }

    /// Returns true while the stream is blocked.
    pub fn is_blocked(&self) -> bool {
        self.snapshot().is_some_and(|s| s.blocked)
    }
}

/// Handle of a source stream together with its producer feed.
#[derive(Clone, Debug)]
pub struct SourceStreamHandle {
    stream: MediaStreamHandle,
    feed: SourceFeed,
}

impl SourceStreamHandle {
    pub(crate) fn new(stream: MediaStreamHandle, feed: SourceFeed) -> Self {
        Self { stream, feed }
    }

    /// Thread-safe producer side. Data appended here becomes visible at
    /// the next iteration.
    pub fn feed(&self) -> &SourceFeed {
        &self.feed
    }

    /// The stream handle.
    pub fn stream(&self) -> &MediaStreamHandle {
        &self.stream
    }

    /// Registers another puller and enables pulling.
    pub fn add_puller(&self, puller: Box<dyn SourcePuller>) {
        self.feed.set_pull_enabled(true);
        self.stream.send(Command::AddPuller(puller));
    }
}

impl Deref for SourceStreamHandle {
    type Target = MediaStreamHandle;

    fn deref(&self) -> &MediaStreamHandle {
        &self.stream
    }
}

/// Handle of an input port. The port lives until
/// [`disconnect`](Self::disconnect) or until either stream is destroyed.
#[derive(Debug)]
pub struct InputPortHandle {
    id: PortId,
    graph: MediaStreamGraph,
}

impl InputPortHandle {
    pub(crate) fn new(id: PortId, graph: MediaStreamGraph) -> Self {
        Self { id, graph }
    }

    /// Port id within its graph.
    pub fn id(&self) -> PortId {
        self.id
    }

    /// Removes the port at the next iteration.
    pub fn disconnect(self) {
        self.graph
            .append_message(ControlMessage::global(Command::DestroyPort(self.id)));
    }
}
