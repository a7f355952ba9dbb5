//! Control messages: the only way to mutate a running graph.
//!
//! Any thread builds a [`ControlMessage`] and appends it through
//! [`GraphShared::append_message`](crate::GraphShared::append_message). The
//! graph thread swaps the queue out once at the start of each iteration and
//! runs every message in enqueue order. If the graph thread has stopped for
//! good, the message's [`run_during_shutdown`](ControlMessage::run_during_shutdown)
//! fallback runs on the issuing thread instead.

use crate::GraphCore;
use crate::listener::{StreamEvent, StreamListener};
use crate::port::{InputPort, PortId};
use crate::stream::{MediaStream, SourcePuller, StreamId, VideoSink};
use crate::tracks::TrackId;

/// Arbitrary work run on the graph thread.
pub trait GraphTask: Send {
    /// Runs with full access to the graph.
    fn run(self: Box<Self>, graph: &mut GraphCore);

    /// Runs on the issuing thread when the graph has stopped. Must not
    /// assume anything about graph state.
    fn run_during_shutdown(self: Box<Self>) {}
}

impl<F> GraphTask for F
where
    F: FnOnce(&mut GraphCore) + Send,
{
    fn run(self: Box<Self>, graph: &mut GraphCore) {
        (*self)(graph);
    }
}

/// Operation applied to a set of streams at once, as an audio context does
/// when it suspends, resumes or closes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextOperation {
    /// Suspend every listed stream.
    Suspend,
    /// Resume every listed stream.
    Resume,
    /// Suspend every listed stream for good.
    Close,
}

/// What a control message does.
pub enum Command {
    /// Adds a new stream to the graph.
    AddStream(Box<MediaStream>),
    /// Destroys the target stream and every port touching it.
    DestroyStream,
    /// Connects a port.
    ConnectPort(Box<InputPort>),
    /// Disconnects and destroys a port.
    DestroyPort(PortId),
    /// Attaches a listener to the target stream.
    AddListener(Box<dyn StreamListener>),
    /// Registers a puller on the target source stream.
    AddPuller(Box<dyn SourcePuller>),
    /// Increments the target's suspend count.
    Suspend,
    /// Decrements the target's suspend count.
    Resume,
    /// Applies `operation` to every stream in `streams`.
    ApplyContextOperation {
        /// Affected streams.
        streams: Vec<StreamId>,
        /// What to do.
        operation: ContextOperation,
    },
    /// Enables or disables one of the target's tracks.
    SetTrackEnabled {
        /// Track to change.
        track: TrackId,
        /// New state.
        enabled: bool,
    },
    /// Sets whether the target finishes once all its inputs finish.
    SetAutofinish(bool),
    /// Routes the target's audio tracks to the graph output.
    AddAudioOutput {
        /// Caller-chosen key identifying the output.
        key: u64,
        /// Linear gain.
        volume: f32,
    },
    /// Changes the volume of an audio output.
    SetAudioOutputVolume {
        /// Output key.
        key: u64,
        /// Linear gain.
        volume: f32,
    },
    /// Removes an audio output.
    RemoveAudioOutput(u64),
    /// Delivers the target's video frames to `sink`.
    AddVideoOutput {
        /// Caller-chosen key identifying the output.
        key: u64,
        /// Frame receiver.
        sink: Box<dyn VideoSink>,
    },
    /// Removes a video output.
    RemoveVideoOutput(u64),
    /// Sets a parameter on the target audio node's engine.
    SetEngineParameter {
        /// Engine-defined parameter index.
        index: u32,
        /// New value.
        value: f32,
    },
    /// Finishes the target stream now.
    Finish,
    /// Runs arbitrary work.
    Task(Box<dyn GraphTask>),
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::AddStream(_) => "add-stream",
            Self::DestroyStream => "destroy-stream",
            Self::ConnectPort(_) => "connect-port",
            Self::DestroyPort(_) => "destroy-port",
            Self::AddListener(_) => "add-listener",
            Self::AddPuller(_) => "add-puller",
            Self::Suspend => "suspend",
            Self::Resume => "resume",
            Self::ApplyContextOperation { .. } => "context-operation",
            Self::SetTrackEnabled { .. } => "set-track-enabled",
            Self::SetAutofinish(_) => "set-autofinish",
            Self::AddAudioOutput { .. } => "add-audio-output",
            Self::SetAudioOutputVolume { .. } => "set-audio-output-volume",
            Self::RemoveAudioOutput(_) => "remove-audio-output",
            Self::AddVideoOutput { .. } => "add-video-output",
            Self::RemoveVideoOutput(_) => "remove-video-output",
            Self::SetEngineParameter { .. } => "set-engine-parameter",
            Self::Finish => "finish",
            Self::Task(_) => "task",
        }
    }
}

impl core::fmt::Debug for Command {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// A unit of work bound to at most one stream.
#[derive(Debug)]
pub struct ControlMessage {
    target: Option<StreamId>,
    command: Command,
}

impl ControlMessage {
    /// A message for `target`.
    pub fn to(target: StreamId, command: Command) -> Self {
        Self {
            target: Some(target),
            command,
        }
    }

    /// A graph-wide message.
    pub fn global(command: Command) -> Self {
        Self { target: None, command }
    }

    /// Wraps a closure run on the graph thread.
    pub fn task(f: impl FnOnce(&mut GraphCore) + Send + 'static) -> Self {
        Self::global(Command::Task(Box::new(f)))
    }

    /// Stream the message is bound to.
    pub fn target(&self) -> Option<StreamId> {
        self.target
    }

    /// The command carried.
    pub fn command(&self) -> &Command {
        &self.command
    }

    /// Applies the message. Graph thread only.
    pub fn run(self, graph: &mut GraphCore) {
        if let Err(_e) = graph.run_command(self.target, self.command) {
            #[cfg(feature = "tracing")]
            tracing::trace!("control message dropped: {_e}");
        }
    }

    /// Fallback run on the issuing thread once the graph has stopped.
    ///
    /// Streams and listeners that will never be attached are told they
    /// were removed; everything else is dropped.
    pub fn run_during_shutdown(self) {
        match self.command {
            Command::Task(task) => task.run_during_shutdown(),
            Command::AddStream(mut stream) => {
                stream.state.notify(&StreamEvent::Removed);
            }
            Command::AddListener(mut listener) => {
                if let Some(id) = self.target {
                    listener.on_event(id, &StreamEvent::Removed);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::ChannelListener;
    use crate::stream::{SourceFeed, SourceStream, StreamKind};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Flag(Arc<AtomicBool>);

    impl GraphTask for Flag {
        fn run(self: Box<Self>, _graph: &mut GraphCore) {}

        fn run_during_shutdown(self: Box<Self>) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_shutdown_fallback_runs_task() {
        let flag = Arc::new(AtomicBool::new(false));
        ControlMessage::global(Command::Task(Box::new(Flag(Arc::clone(&flag))))).run_during_shutdown();
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_shutdown_fallback_reports_removed_stream() {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut stream = MediaStream::new(
            StreamId::from_index(4),
            StreamKind::Source(SourceStream::new(SourceFeed::new())),
        );
        stream.state.listeners.push(Box::new(ChannelListener::new(tx)));
        ControlMessage::global(Command::AddStream(Box::new(stream))).run_during_shutdown();
        let (id, event) = rx.try_recv().unwrap();
        assert_eq!(id.index(), 4);
        assert!(matches!(event, StreamEvent::Removed));
    }

    #[test]
    fn test_debug_names_command() {
        let msg = ControlMessage::to(StreamId::from_index(1), Command::SetAutofinish(true));
        assert_eq!(format!("{:?}", msg.command()), "set-autofinish");
        assert_eq!(msg.target(), Some(StreamId::from_index(1)));
    }
}
