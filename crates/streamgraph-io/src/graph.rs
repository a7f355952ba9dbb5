//! Main-thread handle of a media stream graph.

use std::sync::Arc;
use std::time::{Duration, Instant};

use streamgraph_core::{
    AudioNodeEngine, AudioNodeKind, AudioNodeStream, ChannelConfig, Command, ContextOperation, ControlMessage,
    DriverKind, GraphCore, GraphSnapshot, GraphTime, InputPort, LifecycleState, MediaStream, MixerCallback,
    ProcessedStream, SourceFeed, SourcePuller, SourceStream, StreamKind, StreamProcessor, TrackRate,
    TrackUnionStream,
};

use crate::backend::AudioBackend;
use crate::cpal_backend::CpalBackend;
use crate::driver::DriverContext;
use crate::handle::{InputPortHandle, MediaStreamHandle, SourceStreamHandle};
use crate::options::GraphOptions;
use crate::{Error, Result};

/// Poll interval of [`MediaStreamGraph::wait_until_stopped`].
const STOP_POLL: Duration = Duration::from_millis(2);

/// A media stream graph, as seen from the thread that controls it.
///
/// Every mutation is a [`ControlMessage`] applied by the graph thread at
/// the next iteration boundary; reads come from the snapshot published at
/// the end of each iteration. Clones refer to the same graph. When the last
/// clone and the last stream handle are gone, the graph is shut down.
#[derive(Clone)]
pub struct MediaStreamGraph {
    inner: Arc<GraphInner>,
}

struct GraphInner {
    ctx: Arc<DriverContext>,
}

impl Drop for GraphInner {
    fn drop(&mut self) {
        if self.ctx.shared.lifecycle() != LifecycleState::Stopped {
            self.ctx.shared.request_force_shutdown();
            self.ctx.teardown(self.ctx.options.shutdown_timeout);
        }
    }
}

impl std::fmt::Debug for MediaStreamGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStreamGraph")
            .field("rate", &self.rate())
            .field("realtime", &self.is_realtime())
            .field("lifecycle", &self.lifecycle())
            .finish_non_exhaustive()
    }
}

impl MediaStreamGraph {
    /// Creates a graph. Realtime graphs open the default cpal device when
    /// they first need audible output.
    pub fn new(options: GraphOptions) -> Self {
        let backend: Option<Box<dyn AudioBackend>> = if options.realtime {
            Some(Box::new(CpalBackend::new()))
        } else {
            None
        };
        Self::from_context(DriverContext::new(options, backend))
    }

    /// Creates a graph playing through `backend`.
    pub fn with_backend(options: GraphOptions, backend: Box<dyn AudioBackend>) -> Self {
        Self::from_context(DriverContext::new(options, Some(backend)))
    }

    fn from_context(ctx: Arc<DriverContext>) -> Self {
        tracing::debug!(
            rate = ctx.options.rate,
            realtime = ctx.options.realtime,
            channels = ctx.options.output_channels,
            "graph created"
        );
        Self {
            inner: Arc::new(GraphInner { ctx }),
        }
    }

    fn ctx(&self) -> &Arc<DriverContext> {
        &self.inner.ctx
    }

    /// Returns true if both handles refer to the same graph.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Graph rate in ticks per second.
    pub fn rate(&self) -> TrackRate {
        self.ctx().options.rate
    }

    /// Returns true for graphs paced in realtime.
    pub fn is_realtime(&self) -> bool {
        self.ctx().options.realtime
    }

    /// Queues `message` for the next iteration. The first message starts a
    /// realtime graph.
    pub fn append_message(&self, message: ControlMessage) {
        let ctx = self.ctx();
        ctx.shared.append_message(message);
        if ctx.options.realtime
            && ctx
                .shared
                .transition_lifecycle(LifecycleState::NotStarted, LifecycleState::Running)
        {
            DriverContext::switch_to(ctx, DriverKind::SystemClock, None);
        }
    }

    /// Runs `f` on the graph thread at the next iteration boundary.
    pub fn dispatch(&self, f: impl FnOnce(&mut GraphCore) + Send + 'static) {
        self.append_message(ControlMessage::task(f));
    }

    fn add_stream(&self, kind: StreamKind) -> MediaStreamHandle {
        let id = self.ctx().shared.allocate_stream_id();
        self.append_message(ControlMessage::global(Command::AddStream(Box::new(MediaStream::new(
            id, kind,
        )))));
        MediaStreamHandle::new(id, self.clone())
    }

    /// Creates a source stream fed from any thread through its
    /// [`SourceFeed`].
    pub fn create_source_stream(&self) -> SourceStreamHandle {
        let feed = SourceFeed::new();
        let stream = self.add_stream(StreamKind::Source(SourceStream::new(feed.clone())));
        SourceStreamHandle::new(stream, feed)
    }

    /// Creates a pull-enabled source stream that asks `puller` for data
    /// before each iteration.
    pub fn create_source_stream_with_puller(&self, puller: Box<dyn SourcePuller>) -> SourceStreamHandle {
        let feed = SourceFeed::new();
        feed.set_pull_enabled(true);
        let stream = self.add_stream(StreamKind::Source(SourceStream::new(feed.clone()).with_puller(puller)));
        SourceStreamHandle::new(stream, feed)
    }

    /// Creates a stream copying its inputs' tracks. With `autofinish` it
    /// finishes once every input has.
    pub fn create_track_union_stream(&self, autofinish: bool) -> MediaStreamHandle {
        let union = if autofinish {
            TrackUnionStream::autofinishing()
        } else {
            TrackUnionStream::new()
        };
        self.add_stream(StreamKind::TrackUnion(union))
    }

    /// Creates a stream whose output `processor` computes from its inputs.
    pub fn create_processed_stream(&self, processor: Box<dyn StreamProcessor>) -> MediaStreamHandle {
        self.add_stream(StreamKind::Processed(ProcessedStream::new(processor)))
    }

    /// Creates a stream running `engine` one block at a time.
    pub fn create_audio_node_stream(
        &self,
        engine: Box<dyn AudioNodeEngine>,
        channel_config: ChannelConfig,
        kind: AudioNodeKind,
    ) -> MediaStreamHandle {
        let node = AudioNodeStream::new(engine, channel_config, kind, self.rate());
        self.add_stream(StreamKind::AudioNode(node))
    }

    /// Connects `source` to `dest` with every track passed through.
    pub fn connect(&self, source: &MediaStreamHandle, dest: &MediaStreamHandle) -> InputPortHandle {
        self.connect_with(source, dest, |port| port)
    }

    /// Connects `source` to `dest` with a port shaped by `configure`, for
    /// track filters and port numbers.
    ///
    /// # Panics
    ///
    /// Panics if either stream belongs to another graph.
    pub fn connect_with(
        &self,
        source: &MediaStreamHandle,
        dest: &MediaStreamHandle,
        configure: impl FnOnce(InputPort) -> InputPort,
    ) -> InputPortHandle {
        assert!(
            source.graph().ptr_eq(self) && dest.graph().ptr_eq(self),
            "connecting streams of different graphs"
        );
        let id = self.ctx().shared.allocate_port_id();
        let port = configure(InputPort::new(id, source.id(), dest.id()));
        self.append_message(ControlMessage::global(Command::ConnectPort(Box::new(port))));
        InputPortHandle::new(id, self.clone())
    }

    /// Suspends, resumes or closes `streams` in one message.
    pub fn apply_context_operation(&self, streams: &[&MediaStreamHandle], operation: ContextOperation) {
        let streams = streams
            .iter()
            .inspect(|s| assert!(s.graph().ptr_eq(self), "stream of another graph"))
            .map(|s| s.id())
            .collect();
        self.append_message(ControlMessage::global(Command::ApplyContextOperation { streams, operation }));
    }

    /// Registers an observer of every finished mix.
    pub fn add_mixer_callback(&self, callback: Box<dyn MixerCallback>) {
        self.dispatch(move |core| core.mixer_mut().add_callback(callback));
    }

    /// Driver currently running the graph.
    pub fn driver_kind(&self) -> DriverKind {
        self.ctx().driver_kind()
    }

    /// Graph state as of the last iteration.
    pub fn snapshot(&self) -> GraphSnapshot {
        self.ctx().shared.snapshot()
    }

    /// Processed watermark as of the last iteration.
    pub fn processed_time(&self) -> GraphTime {
        self.snapshot().processed_time
    }

    /// Lifecycle of the graph thread.
    pub fn lifecycle(&self) -> LifecycleState {
        self.ctx().shared.lifecycle()
    }

    /// Pauses the driver without touching graph state.
    pub fn pause_driver(&self) {
        tracing::debug!("driver paused");
        self.ctx().set_paused(true);
    }

    /// Resumes a paused driver. Graph time continues from where it stopped.
    pub fn resume_driver(&self) {
        tracing::debug!("driver resumed");
        self.ctx().set_paused(false);
    }

    /// Main-thread housekeeping, to call periodically: releases replaced
    /// audio streams, revives a stopped graph that received messages, and
    /// tears down one that became empty.
    pub fn process_main_thread_updates(&self) {
        DriverContext::process_main_thread_updates(self.ctx());
    }

    /// Starts rendering an offline graph up to `end_time`, or moves the end
    /// of a render in progress.
    pub fn start_offline(&self, end_time: GraphTime) -> Result<()> {
        let ctx = self.ctx();
        if ctx.options.realtime {
            return Err(Error::Stream("start_offline on a realtime graph".to_string()));
        }
        match ctx.shared.lifecycle() {
            LifecycleState::NotStarted => {
                ctx.with_core(|core| core.set_end_time(end_time));
                if ctx
                    .shared
                    .transition_lifecycle(LifecycleState::NotStarted, LifecycleState::Running)
                {
                    tracing::info!(end_time, "starting offline render");
                    DriverContext::switch_to(ctx, DriverKind::Offline, None);
                }
                Ok(())
            }
            LifecycleState::Running | LifecycleState::WaitingForMainThreadCleanup => {
                self.dispatch(move |core| core.set_end_time(end_time));
                Ok(())
            }
            LifecycleState::WaitingForThreadShutdown | LifecycleState::Stopped => Err(Error::ShutDown),
        }
    }

    /// Stops the graph now: the driver finishes its iteration, streams are
    /// destroyed and pending messages run their shutdown fallback. A driver
    /// or device still busy after `timeout` is leaked.
    pub fn force_shutdown(&self, timeout: Duration) {
        tracing::info!("forcing graph shutdown");
        let ctx = self.ctx();
        ctx.shared.request_force_shutdown();
        ctx.teardown(timeout);
    }

    /// Runs main-thread updates until the graph has stopped or `timeout`
    /// passes. Returns true if it stopped.
    pub fn wait_until_stopped(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.process_main_thread_updates();
            if self.lifecycle() == LifecycleState::Stopped {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(STOP_POLL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manual_backend::ManualBackend;

    fn realtime() -> MediaStreamGraph {
        MediaStreamGraph::with_backend(
            GraphOptions {
                system_clock_interval: Duration::from_millis(1),
                ..GraphOptions::realtime(48000)
            },
            Box::new(ManualBackend::new()),
        )
    }

    #[test]
    fn test_realtime_starts_on_first_message() {
        let graph = realtime();
        assert_eq!(graph.lifecycle(), LifecycleState::NotStarted);
        let _source = graph.create_source_stream();
        assert_eq!(graph.lifecycle(), LifecycleState::Running);
        assert_eq!(graph.driver_kind(), DriverKind::SystemClock);
        graph.force_shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_offline_waits_for_start() {
        let graph = MediaStreamGraph::new(GraphOptions::offline(48000));
        let _source = graph.create_source_stream();
        assert_eq!(graph.lifecycle(), LifecycleState::NotStarted);
        graph.start_offline(256).unwrap();
        assert_eq!(graph.driver_kind(), DriverKind::Offline);
    }

    #[test]
    fn test_start_offline_on_realtime_fails() {
        assert!(realtime().start_offline(128).is_err());
    }

    #[test]
    fn test_start_after_shutdown_fails() {
        let graph = MediaStreamGraph::new(GraphOptions::offline(48000));
        graph.force_shutdown(Duration::from_millis(100));
        assert_eq!(graph.lifecycle(), LifecycleState::Stopped);
        assert!(matches!(graph.start_offline(128), Err(Error::ShutDown)));
    }

    #[test]
    #[should_panic]
    fn test_connect_across_graphs_panics() {
        let a = MediaStreamGraph::new(GraphOptions::offline(48000));
        let b = MediaStreamGraph::new(GraphOptions::offline(48000));
        let source = a.create_source_stream();
        let dest = b.create_track_union_stream(false);
        a.connect(&source, &dest);
    }
}
