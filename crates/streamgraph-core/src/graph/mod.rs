//! The graph scheduler.
//!
//! [`GraphCore`] owns every stream and port of one graph and runs on
//! whichever thread the current driver provides. Each call to
//! [`one_iteration`](GraphCore::one_iteration):
//!
//! 1. runs the control messages queued since the last iteration,
//! 2. recomputes the processing order if the topology changed,
//! 3. decides, for every stream, from which graph time it is blocked up to
//!    the new state-computed watermark,
//! 4. has every processed stream produce output for the interval, block by
//!    block once an audio node is involved,
//! 5. mixes audible output and delivers video frames,
//! 6. advances the processed watermark, fires blocking, output and finish
//!    notifications, and publishes a snapshot for the main thread.
//!
//! Streams live in an index-stable arena keyed by [`StreamId`]; the ordered
//! list holds ids only. The stream being processed is taken out of its slot
//! so it can read every other stream through a shared view.

mod iteration;
mod output;

use std::sync::Arc;

use crate::error::GraphError;
use crate::listener::{StreamEvent, StreamListener};
use crate::message::{Command, ContextOperation};
use crate::mixer::AudioMixer;
use crate::port::{InputPort, PortId};
use crate::shared::{DriverKind, GraphShared};
use crate::stream::{AudioOutput, MediaStream, StreamId, StreamKind, VideoOutput};
use crate::time::{GRAPH_TIME_MAX, GraphTime, TrackRate, round_up_to_block};

/// Construction parameters of a [`GraphCore`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoreOptions {
    /// Sample rate; one tick per frame.
    pub rate: TrackRate,
    /// Channel count of the mixed output.
    pub output_channels: usize,
    /// Realtime graphs switch between the system-clock and audio-callback
    /// drivers; non-realtime graphs always run offline.
    pub realtime: bool,
}

impl Default for CoreOptions {
    fn default() -> Self {
        Self {
            rate: 48000,
            output_channels: 2,
            realtime: true,
        }
    }
}

/// Graph-thread state of one media graph.
pub struct GraphCore {
    arena: Vec<Option<MediaStream>>,
    ports: Vec<Option<InputPort>>,
    /// Active streams in processing order.
    streams: Vec<StreamId>,
    suspended: Vec<StreamId>,
    first_cycle_breaker: usize,
    order_dirty: bool,
    processed_time: GraphTime,
    state_computed_time: GraphTime,
    end_time: GraphTime,
    rate: TrackRate,
    realtime: bool,
    mixer: AudioMixer,
    driver: DriverKind,
    pending_switch: Option<DriverKind>,
    audio_retry_at: GraphTime,
    front_queue: Vec<crate::message::ControlMessage>,
    iterations: u64,
    shared: Arc<GraphShared>,
}

impl GraphCore {
    /// Creates an empty graph sharing `shared` with its controlling threads.
    pub fn new(shared: Arc<GraphShared>, options: CoreOptions) -> Self {
        Self {
            arena: Vec::new(),
            ports: Vec::new(),
            streams: Vec::new(),
            suspended: Vec::new(),
            first_cycle_breaker: 0,
            order_dirty: false,
            processed_time: 0,
            state_computed_time: 0,
            end_time: GRAPH_TIME_MAX,
            rate: options.rate,
            realtime: options.realtime,
            mixer: AudioMixer::new(options.output_channels, options.rate),
            driver: if options.realtime {
                DriverKind::SystemClock
            } else {
                DriverKind::Offline
            },
            pending_switch: None,
            audio_retry_at: 0,
            front_queue: Vec::new(),
            iterations: 0,
            shared,
        }
    }

    /// State shared with controlling threads.
    pub fn shared(&self) -> &Arc<GraphShared> {
        &self.shared
    }

    /// Sample rate.
    pub fn rate(&self) -> TrackRate {
        self.rate
    }

    /// Returns true for realtime graphs.
    pub fn is_realtime(&self) -> bool {
        self.realtime
    }

    /// Graph time up to which output has been produced.
    pub fn processed_time(&self) -> GraphTime {
        self.processed_time
    }

    /// Graph time up to which blocking decisions are final.
    pub fn state_computed_time(&self) -> GraphTime {
        self.state_computed_time
    }

    /// Graph time at which a non-realtime graph stops.
    pub fn end_time(&self) -> GraphTime {
        self.end_time
    }

    /// Stops the graph once it has processed `t` (rounded up to a block).
    pub fn set_end_time(&mut self, t: GraphTime) {
        self.end_time = round_up_to_block(t);
    }

    /// Completed iterations.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Driver currently running the graph.
    pub fn driver_kind(&self) -> DriverKind {
        self.driver
    }

    /// Returns a requested driver switch, clearing the request. The caller
    /// must report back through [`driver_switched`](Self::driver_switched)
    /// once the successor runs.
    pub fn take_switch_request(&mut self) -> Option<DriverKind> {
        self.pending_switch.take()
    }

    /// Asks the running driver to hand over to `kind` after the current
    /// iteration.
    pub fn request_driver(&mut self, kind: DriverKind) {
        if kind != self.driver {
            self.pending_switch = Some(kind);
        }
    }

    /// Records that `kind` now runs the graph.
    pub fn driver_switched(&mut self, kind: DriverKind) {
        #[cfg(feature = "tracing")]
        tracing::debug!(from = %self.driver, to = %kind, at = self.state_computed_time, "driver switched");
        self.driver = kind;
        if self.pending_switch == Some(kind) {
            self.pending_switch = None;
        }
    }

    /// Keeps the graph off the audio-callback driver for `ticks` of graph
    /// time, after the audio device failed.
    pub fn defer_audio_callback(&mut self, ticks: GraphTime) {
        self.audio_retry_at = self.processed_time + ticks;
    }

    /// The mixer, to register capture callbacks.
    pub fn mixer_mut(&mut self) -> &mut AudioMixer {
        &mut self.mixer
    }

    /// Interleaved output of the last iteration.
    pub fn mixed_output(&self) -> &[f32] {
        self.mixer.mixed()
    }

    /// Output channel count.
    pub fn output_channels(&self) -> usize {
        self.mixer.channels()
    }

    /// Looks up a live stream.
    pub fn stream(&self, id: StreamId) -> Option<&MediaStream> {
        self.arena.get(id.index() as usize).and_then(Option::as_ref)
    }

    fn stream_mut(&mut self, id: StreamId) -> Option<&mut MediaStream> {
        self.arena.get_mut(id.index() as usize).and_then(Option::as_mut)
    }

    /// Looks up a live port.
    pub fn port(&self, id: PortId) -> Option<&InputPort> {
        self.ports.get(id.index() as usize).and_then(Option::as_ref)
    }

    /// Active streams in processing order.
    pub fn ordered_streams(&self) -> &[StreamId] {
        &self.streams
    }

    /// Suspended streams.
    pub fn suspended_streams(&self) -> &[StreamId] {
        &self.suspended
    }

    /// Index in [`ordered_streams`](Self::ordered_streams) of the first
    /// cycle breaker.
    pub fn first_cycle_breaker(&self) -> usize {
        self.first_cycle_breaker
    }

    /// Returns true if the graph holds no streams.
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty() && self.suspended.is_empty()
    }

    /// Adds `stream`, starting its timeline at the processed watermark.
    ///
    /// # Panics
    ///
    /// Panics if a stream with the same id is already live.
    pub fn add_stream(&mut self, mut stream: MediaStream) {
        let index = stream.id().index() as usize;
        if self.arena.len() <= index {
            self.arena.resize_with(index + 1, || None);
        }
        assert!(self.arena[index].is_none(), "duplicate {}", stream.id());
        stream.state.tracks_start_time = self.processed_time;
        stream.state.start_blocking = self.processed_time;
        #[cfg(feature = "tracing")]
        tracing::debug!("graph_add: {} stream {}", stream.kind_name(), stream.id());
        if stream.state.is_suspended() {
            self.suspended.push(stream.id());
        } else {
            self.streams.push(stream.id());
        }
        self.arena[index] = Some(stream);
        self.order_dirty = true;
    }

    /// Destroys a stream and every port touching it.
    pub fn destroy_stream(&mut self, id: StreamId) -> Result<(), GraphError> {
        if self.stream(id).is_none() {
            return Err(GraphError::UnknownStream(id));
        }
        let touching: Vec<PortId> = self
            .ports
            .iter()
            .flatten()
            .filter(|p| p.source() == id || p.dest() == id)
            .map(InputPort::id)
            .collect();
        for port in touching {
            self.destroy_port(port)?;
        }
        self.streams.retain(|s| *s != id);
        self.suspended.retain(|s| *s != id);
        if let Some(mut stream) = self.arena[id.index() as usize].take() {
            stream.state.notify(&StreamEvent::Removed);
        }
        #[cfg(feature = "tracing")]
        tracing::debug!("graph_remove: stream {id}");
        self.order_dirty = true;
        Ok(())
    }

    /// Connects `port`.
    ///
    /// # Panics
    ///
    /// Panics if a port with the same id is already live.
    pub fn connect_port(&mut self, port: InputPort) -> Result<(), GraphError> {
        let (source, dest) = (port.source(), port.dest());
        let source_suspended = self
            .stream(source)
            .ok_or(GraphError::UnknownStream(source))?
            .state()
            .is_suspended();
        if !self.stream(dest).ok_or(GraphError::UnknownStream(dest))?.is_processed() {
            return Err(GraphError::WrongKind {
                stream: dest,
                expected: "processed",
            });
        }

        let id = port.id();
        let index = id.index() as usize;
        if self.ports.len() <= index {
            self.ports.resize_with(index + 1, || None);
        }
        assert!(self.ports[index].is_none(), "duplicate {id}");
        self.ports[index] = Some(port);

        if let Some(s) = self.stream_mut(source) {
            s.state.consumers.push(id);
        }
        if let Some(inputs) = self.stream_mut(dest).and_then(|d| d.kind.processed_mut()) {
            if source_suspended {
                inputs.suspended_inputs.push(id);
            } else {
                inputs.inputs.push(id);
            }
        }
        #[cfg(feature = "tracing")]
        tracing::debug!("graph_connect: {source} → {dest} via {id}");
        self.order_dirty = true;
        Ok(())
    }

    /// Disconnects and destroys a port.
    pub fn destroy_port(&mut self, id: PortId) -> Result<(), GraphError> {
        let port = self
            .ports
            .get_mut(id.index() as usize)
            .and_then(Option::take)
            .ok_or(GraphError::UnknownPort(id))?;
        if let Some(inputs) = self.stream_mut(port.dest()).and_then(|d| d.kind.processed_mut()) {
            inputs.remove_port(id);
        }
        if let Some(source) = self.stream_mut(port.source()) {
            source.state.consumers.retain(|p| *p != id);
        }
        #[cfg(feature = "tracing")]
        tracing::debug!("graph_disconnect: port {id}");
        self.order_dirty = true;
        Ok(())
    }

    /// Increments a stream's suspend count. On the first suspension the
    /// stream leaves the processing order and its consumers stop reading it.
    pub fn suspend_stream(&mut self, id: StreamId) -> Result<(), GraphError> {
        let stream = self.stream_mut(id).ok_or(GraphError::UnknownStream(id))?;
        stream.state.suspended_count += 1;
        if stream.state.suspended_count > 1 {
            return Ok(());
        }
        let consumers = stream.state.consumers.clone();
        self.streams.retain(|s| *s != id);
        self.suspended.push(id);
        self.move_consumer_ports(&consumers, true);
        #[cfg(feature = "tracing")]
        tracing::debug!("stream {id} suspended");
        self.order_dirty = true;
        Ok(())
    }

    /// Decrements a stream's suspend count, restoring it once it reaches
    /// zero.
    pub fn resume_stream(&mut self, id: StreamId) -> Result<(), GraphError> {
        let stream = self.stream_mut(id).ok_or(GraphError::UnknownStream(id))?;
        if stream.state.suspended_count == 0 {
            return Ok(());
        }
        stream.state.suspended_count -= 1;
        if stream.state.suspended_count > 0 {
            return Ok(());
        }
        let consumers = stream.state.consumers.clone();
        self.suspended.retain(|s| *s != id);
        self.streams.push(id);
        self.move_consumer_ports(&consumers, false);
        #[cfg(feature = "tracing")]
        tracing::debug!("stream {id} resumed");
        self.order_dirty = true;
        Ok(())
    }

    fn move_consumer_ports(&mut self, ports: &[PortId], to_suspended: bool) {
        for &port_id in ports {
            let Some(dest) = self.port(port_id).map(InputPort::dest) else {
                continue;
            };
            let Some(inputs) = self.stream_mut(dest).and_then(|d| d.kind.processed_mut()) else {
                continue;
            };
            let (from, to) = if to_suspended {
                (&mut inputs.inputs, &mut inputs.suspended_inputs)
            } else {
                (&mut inputs.suspended_inputs, &mut inputs.inputs)
            };
            if let Some(pos) = from.iter().position(|p| *p == port_id) {
                from.remove(pos);
                to.push(port_id);
            }
        }
    }

    /// Applies a context-level operation to a set of streams.
    pub fn apply_context_operation(&mut self, streams: &[StreamId], operation: ContextOperation) {
        for &id in streams {
            let result = match operation {
                ContextOperation::Suspend | ContextOperation::Close => self.suspend_stream(id),
                ContextOperation::Resume => self.resume_stream(id),
            };
            if let Err(_e) = result {
                #[cfg(feature = "tracing")]
                tracing::trace!("context operation skipped: {_e}");
            }
        }
    }

    /// Destroys every stream, telling listeners they were removed. Used
    /// when the graph is torn down.
    pub fn destroy_all_streams(&mut self) {
        let ids: Vec<StreamId> = self.streams.iter().chain(&self.suspended).copied().collect();
        for id in ids {
            let _ = self.destroy_stream(id);
        }
    }

    /// Applies one command. Graph thread only.
    pub(crate) fn run_command(&mut self, target: Option<StreamId>, command: Command) -> Result<(), GraphError> {
        match command {
            Command::AddStream(stream) => {
                self.add_stream(*stream);
                Ok(())
            }
            Command::ConnectPort(port) => self.connect_port(*port),
            Command::DestroyPort(port) => self.destroy_port(port),
            Command::ApplyContextOperation { streams, operation } => {
                self.apply_context_operation(&streams, operation);
                Ok(())
            }
            Command::Task(task) => {
                task.run(self);
                Ok(())
            }
            command => match target {
                Some(id) => self.run_stream_command(id, command),
                None => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("dropping {:?} message with no target stream", command);
                    Ok(())
                }
            },
        }
    }

    fn run_stream_command(&mut self, id: StreamId, command: Command) -> Result<(), GraphError> {
        match command {
            Command::DestroyStream => return self.destroy_stream(id),
            Command::Suspend => return self.suspend_stream(id),
            Command::Resume => return self.resume_stream(id),
            _ => {}
        }
        let stream = self.stream_mut(id).ok_or(GraphError::UnknownStream(id))?;
        let wrong_kind = |expected| GraphError::WrongKind { stream: id, expected };
        match command {
            Command::AddListener(listener) => add_listener(stream, listener),
            Command::AddPuller(puller) => match &mut stream.kind {
                StreamKind::Source(source) => source.add_puller(puller),
                _ => return Err(wrong_kind("source")),
            },
            Command::SetTrackEnabled { track, enabled } => {
                if enabled {
                    stream.state.disabled_tracks.remove(&track);
                } else {
                    stream.state.disabled_tracks.insert(track);
                }
            }
            Command::SetAutofinish(autofinish) => {
                stream
                    .kind
                    .processed_mut()
                    .ok_or_else(|| wrong_kind("processed"))?
                    .autofinish = autofinish;
            }
            Command::AddAudioOutput { key, volume } => {
                stream.state.audio_outputs.push(AudioOutput { key, volume });
                self.order_dirty = true;
            }
            Command::SetAudioOutputVolume { key, volume } => {
                for output in stream.state.audio_outputs.iter_mut().filter(|o| o.key == key) {
                    output.volume = volume;
                }
            }
            Command::RemoveAudioOutput(key) => {
                stream.state.audio_outputs.retain(|o| o.key != key);
                self.order_dirty = true;
            }
            Command::AddVideoOutput { key, sink } => {
                stream.state.video_outputs.push(VideoOutput { key, sink });
                stream.state.last_played_frame = None;
            }
            Command::RemoveVideoOutput(key) => {
                stream.state.video_outputs.retain(|o| o.key != key);
            }
            Command::SetEngineParameter { index, value } => {
                stream
                    .kind
                    .as_audio_node_mut()
                    .ok_or_else(|| wrong_kind("audio-node"))?
                    .set_parameter(index, value);
            }
            Command::Finish => match &stream.kind {
                StreamKind::Source(source) => source.feed().finish(),
                _ => stream.state.finish_on_graph_thread(),
            },
            Command::AddStream(_)
            | Command::ConnectPort(_)
            | Command::DestroyPort(_)
            | Command::ApplyContextOperation { .. }
            | Command::Task(_)
            | Command::DestroyStream
            | Command::Suspend
            | Command::Resume => unreachable!("handled above"),
        }
        Ok(())
    }
}

/// Attaches `listener`, replaying the state it would have observed.
fn add_listener(stream: &mut MediaStream, mut listener: Box<dyn StreamListener>) {
    let id = stream.id();
    let state = &stream.state;
    if state.notified_has_current_data {
        listener.on_event(id, &StreamEvent::HasCurrentData);
    }
    if state.notified_blocked {
        listener.on_event(id, &StreamEvent::Blocked);
    }
    if state.notified_finished {
        listener.on_event(id, &StreamEvent::Finished);
    }
    stream.state.listeners.push(listener);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{SourceFeed, SourceStream, TrackUnionStream};

    fn core() -> GraphCore {
        GraphCore::new(Arc::new(GraphShared::new()), CoreOptions::default())
    }

    fn add_source(core: &mut GraphCore) -> StreamId {
        let id = core.shared().allocate_stream_id();
        core.add_stream(MediaStream::new(
            id,
            StreamKind::Source(SourceStream::new(SourceFeed::new())),
        ));
        id
    }

    fn add_union(core: &mut GraphCore) -> StreamId {
        let id = core.shared().allocate_stream_id();
        core.add_stream(MediaStream::new(id, StreamKind::TrackUnion(TrackUnionStream::new())));
        id
    }

    fn connect(core: &mut GraphCore, source: StreamId, dest: StreamId) -> PortId {
        let id = core.shared().allocate_port_id();
        core.connect_port(InputPort::new(id, source, dest)).unwrap();
        id
    }

    #[test]
    fn test_connect_requires_processed_dest() {
        let mut core = core();
        let a = add_source(&mut core);
        let b = add_source(&mut core);
        let port = InputPort::new(core.shared().allocate_port_id(), a, b);
        assert!(matches!(core.connect_port(port), Err(GraphError::WrongKind { .. })));
    }

    #[test]
    fn test_connect_unknown_stream() {
        let mut core = core();
        let a = add_source(&mut core);
        let port = InputPort::new(PortId::from_index(0), a, StreamId::from_index(99));
        assert_eq!(
            core.connect_port(port),
            Err(GraphError::UnknownStream(StreamId::from_index(99)))
        );
    }

    #[test]
    fn test_destroy_stream_removes_ports() {
        let mut core = core();
        let a = add_source(&mut core);
        let u = add_union(&mut core);
        let port = connect(&mut core, a, u);
        core.destroy_stream(a).unwrap();
        assert!(core.port(port).is_none());
        assert!(core.stream(u).unwrap().kind().processed().unwrap().inputs().is_empty());
        assert_eq!(core.destroy_stream(a), Err(GraphError::UnknownStream(a)));
    }

    #[test]
    fn test_suspend_moves_consumer_ports() {
        let mut core = core();
        let a = add_source(&mut core);
        let u = add_union(&mut core);
        let port = connect(&mut core, a, u);

        core.suspend_stream(a).unwrap();
        core.suspend_stream(a).unwrap();
        assert_eq!(core.suspended_streams(), &[a]);
        let inputs = core.stream(u).unwrap().kind().processed().unwrap();
        assert!(inputs.inputs().is_empty());
        assert_eq!(inputs.suspended_inputs(), &[port]);

        core.resume_stream(a).unwrap();
        assert_eq!(core.suspended_streams(), &[a]);
        core.resume_stream(a).unwrap();
        assert!(core.suspended_streams().is_empty());
        let inputs = core.stream(u).unwrap().kind().processed().unwrap();
        assert_eq!(inputs.inputs(), &[port]);
    }

    #[test]
    fn test_stream_command_wrong_kind() {
        let mut core = core();
        let a = add_source(&mut core);
        assert!(matches!(
            core.run_command(Some(a), Command::SetAutofinish(true)),
            Err(GraphError::WrongKind { .. })
        ));
        assert!(matches!(
            core.run_command(Some(a), Command::SetEngineParameter { index: 0, value: 1.0 }),
            Err(GraphError::WrongKind { .. })
        ));
    }

    #[test]
    fn test_track_enable_toggle() {
        let mut core = core();
        let a = add_source(&mut core);
        let track = crate::tracks::TrackId(3);
        core.run_command(Some(a), Command::SetTrackEnabled { track, enabled: false })
            .unwrap();
        assert!(core.stream(a).unwrap().state().is_track_disabled(track));
        core.run_command(Some(a), Command::SetTrackEnabled { track, enabled: true })
            .unwrap();
        assert!(!core.stream(a).unwrap().state().is_track_disabled(track));
    }
}
