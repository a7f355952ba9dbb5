//! Integration tests for the streamgraph-core scheduler.
//!
//! Drives a non-realtime [`GraphCore`] through whole iterations and checks
//! what listeners, tracks and audio-node outputs observe: block-wise
//! up-mixing, blocking notifications, finish ordering, cycles with and
//! without cycle breakers, and message ordering.

use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};

use streamgraph_core::{
    AUDIO_NODE_OUTPUT_TRACK, AudioBlock, AudioChunk, AudioNodeEngine, AudioNodeKind, AudioNodeStream, AudioSegment,
    ChannelConfig, ChannelListener, Command, ControlMessage, CoreOptions, GraphCore, GraphShared, InputPort,
    LifecycleState, MediaSegment, MediaStream, ProcessContext, SourceFeed, SourceStream, StreamEvent, StreamId,
    StreamKind, TrackChange, TrackId, TrackUnionStream,
};

const RATE: u32 = 48000;

fn offline() -> GraphCore {
    GraphCore::new(
        Arc::new(GraphShared::new()),
        CoreOptions {
            rate: RATE,
            output_channels: 2,
            realtime: false,
        },
    )
}

fn ramp(frames: usize) -> MediaSegment {
    let samples: Vec<f32> = (0..frames).map(|i| i as f32 / frames as f32).collect();
    MediaSegment::Audio(AudioSegment::from(AudioChunk::mono(&samples)))
}

fn constant(frames: usize, value: f32) -> MediaSegment {
    MediaSegment::Audio(AudioSegment::from(AudioChunk::mono(&vec![value; frames])))
}

fn add_source(core: &mut GraphCore, data: MediaSegment) -> (StreamId, SourceFeed) {
    let feed = SourceFeed::new();
    feed.add_track(TrackId(1), 0, data);
    feed.finish_add_tracks();
    let id = core.shared().allocate_stream_id();
    core.add_stream(MediaStream::new(id, StreamKind::Source(SourceStream::new(feed.clone()))));
    (id, feed)
}

fn add_node(core: &mut GraphCore, engine: Box<dyn AudioNodeEngine>, config: ChannelConfig) -> StreamId {
    let id = core.shared().allocate_stream_id();
    let node = AudioNodeStream::new(engine, config, AudioNodeKind::External, RATE);
    core.add_stream(MediaStream::new(id, StreamKind::AudioNode(node)));
    id
}

fn connect(core: &mut GraphCore, source: StreamId, dest: StreamId) {
    let port = InputPort::new(core.shared().allocate_port_id(), source, dest);
    core.connect_port(port).unwrap();
}

fn listen(core: &GraphCore, id: StreamId) -> Receiver<(StreamId, StreamEvent)> {
    let (tx, rx) = mpsc::channel();
    core.shared()
        .append_message(ControlMessage::to(id, Command::AddListener(Box::new(ChannelListener::new(tx)))));
    rx
}

fn count_blocked(rx: &Receiver<(StreamId, StreamEvent)>) -> usize {
    rx.try_iter().filter(|(_, e)| matches!(e, StreamEvent::Blocked)).count()
}

fn output_value(core: &GraphCore, id: StreamId) -> f32 {
    core.stream(id)
        .unwrap()
        .kind()
        .as_audio_node()
        .unwrap()
        .last_chunk(0)
        .map_or(0.0, |block| if block.is_null() { 0.0 } else { block.channel(0)[0] })
}

struct Identity;

impl AudioNodeEngine for Identity {
    fn process_block(&mut self, _ctx: &ProcessContext, inputs: &[AudioBlock], outputs: &mut [AudioBlock]) -> bool {
        outputs[0] = inputs[0].clone();
        false
    }
}

/// Delays its input by one block, so it may sit inside a cycle.
#[derive(Default)]
struct BlockDelay {
    held: AudioBlock,
}

impl AudioNodeEngine for BlockDelay {
    fn process_block(&mut self, _ctx: &ProcessContext, inputs: &[AudioBlock], _outputs: &mut [AudioBlock]) -> bool {
        self.held = inputs[0].clone();
        false
    }

    fn is_cycle_breaker(&self) -> bool {
        true
    }

    fn produce_block_before_input(&mut self, _ctx: &ProcessContext, outputs: &mut [AudioBlock]) {
        outputs[0] = std::mem::take(&mut self.held);
    }
}

/// Emits one block of ones, then reports it is done.
struct OneBlock;

impl AudioNodeEngine for OneBlock {
    fn input_count(&self) -> usize {
        0
    }

    fn process_block(&mut self, _ctx: &ProcessContext, _inputs: &[AudioBlock], outputs: &mut [AudioBlock]) -> bool {
        outputs[0] = AudioBlock::from_channels(&[&[1.0; 128]]);
        true
    }
}

// ============================================================================
// Block-wise processing
// ============================================================================

#[test]
fn test_mono_source_upmixed_block_by_block() {
    let mut core = offline();
    let input = ramp(256);
    let (source, _feed) = add_source(&mut core, input.clone());
    let node = add_node(&mut core, Box::new(Identity), ChannelConfig::explicit(2));
    connect(&mut core, source, node);
    let events = listen(&core, source);

    assert!(core.one_iteration(128));
    assert!(core.one_iteration(256));
    assert_eq!(count_blocked(&events), 0);

    let track = core
        .stream(node)
        .unwrap()
        .state()
        .tracks()
        .find_track(AUDIO_NODE_OUTPUT_TRACK)
        .unwrap();
    assert_eq!(track.end(), 256);
    let output = track.segment().as_audio().unwrap();
    let expected = input.as_audio().unwrap().chunks()[0].channel(0).unwrap().to_vec();
    let mut offset = 0;
    for chunk in output.chunks() {
        assert_eq!(chunk.channel_count(), 2);
        let left = chunk.channel(0).unwrap();
        let right = chunk.channel(1).unwrap();
        assert_eq!(left, right);
        assert_eq!(left, &expected[offset..offset + left.len()]);
        offset += left.len();
    }
    assert_eq!(offset, 256);

    // Supply exhausted: exactly one blocked notification, then silence.
    assert!(core.one_iteration(384));
    assert_eq!(count_blocked(&events), 1);
    assert!(core.one_iteration(512));
    assert_eq!(count_blocked(&events), 0);
    assert!(core.stream(source).unwrap().state().is_blocked());
}

#[test]
fn test_steady_source_fires_no_blocking_changes() {
    let mut core = offline();
    let (source, _feed) = add_source(&mut core, constant(4096, 0.25));
    let events = listen(&core, source);
    for i in 1..=8 {
        core.one_iteration(i * 128);
    }
    let changes = events
        .try_iter()
        .filter(|(_, e)| matches!(e, StreamEvent::Blocked | StreamEvent::Unblocked))
        .count();
    assert_eq!(changes, 0);
    assert_eq!(core.shared().stream_snapshot(source).unwrap().current_time, 1024);
}

#[test]
fn test_data_appended_later_unblocks_once() {
    let mut core = offline();
    let (source, feed) = add_source(&mut core, constant(128, 0.25));
    let events = listen(&core, source);
    core.one_iteration(128);
    core.one_iteration(256);
    assert!(core.stream(source).unwrap().state().is_blocked());

    feed.append_to_track(TrackId(1), constant(256, 0.25));
    core.one_iteration(384);
    core.one_iteration(512);
    let seen: Vec<_> = events
        .try_iter()
        .filter_map(|(_, e)| match e {
            StreamEvent::Blocked => Some("blocked"),
            StreamEvent::Unblocked => Some("unblocked"),
            _ => None,
        })
        .collect();
    assert_eq!(seen, vec!["blocked", "unblocked"]);
}

// ============================================================================
// Finishing
// ============================================================================

#[test]
fn test_finished_fires_after_buffered_data() {
    let mut core = offline();
    let (source, feed) = add_source(&mut core, constant(300, 0.5));
    feed.end_track(TrackId(1));
    feed.finish();
    let events = listen(&core, source);

    core.one_iteration(128);
    core.one_iteration(256);
    assert!(!events.try_iter().any(|(_, e)| matches!(e, StreamEvent::Finished)));
    assert!(!core.stream(source).unwrap().state().is_notified_finished());

    core.one_iteration(384);
    let finished: Vec<_> = events
        .try_iter()
        .filter(|(_, e)| matches!(e, StreamEvent::Finished))
        .collect();
    assert_eq!(finished.len(), 1);
    assert!(core.processed_time() >= 300);
    assert!(core.shared().stream_snapshot(source).unwrap().finished);
}

#[test]
fn test_union_reports_track_end_before_finish() {
    let mut core = offline();
    let (source, feed) = add_source(&mut core, constant(100, 0.5));
    feed.end_track(TrackId(1));
    feed.finish();
    let union = core.shared().allocate_stream_id();
    core.add_stream(MediaStream::new(
        union,
        StreamKind::TrackUnion(TrackUnionStream::autofinishing()),
    ));
    connect(&mut core, source, union);
    let events = listen(&core, union);

    core.one_iteration(128);
    core.one_iteration(256);
    let order: Vec<_> = events
        .try_iter()
        .filter_map(|(_, e)| match e {
            StreamEvent::TrackChanged {
                change: TrackChange::Ended,
                ..
            } => Some("ended"),
            StreamEvent::Finished => Some("finished"),
            _ => None,
        })
        .collect();
    assert_eq!(order, vec!["ended", "finished"]);
}

// ============================================================================
// Cycles
// ============================================================================

#[test]
fn test_cycle_without_breaker_is_muted() {
    let mut core = offline();
    let (source, _feed) = add_source(&mut core, constant(1024, 0.5));
    let a = add_node(&mut core, Box::new(Identity), ChannelConfig::default());
    let b = add_node(&mut core, Box::new(Identity), ChannelConfig::default());
    connect(&mut core, source, a);
    connect(&mut core, a, b);
    connect(&mut core, b, a);

    core.one_iteration(256);
    for id in [a, b] {
        let stream = core.stream(id).unwrap();
        assert!(stream.kind().processed().unwrap().in_muted_cycle());
        assert_eq!(output_value(&core, id), 0.0);
    }
}

#[test]
fn test_cycle_of_unions_is_muted() {
    let mut core = offline();
    let (source, _feed) = add_source(&mut core, constant(1024, 0.5));
    let mut unions = Vec::new();
    for _ in 0..2 {
        let id = core.shared().allocate_stream_id();
        core.add_stream(MediaStream::new(id, StreamKind::TrackUnion(TrackUnionStream::new())));
        unions.push(id);
    }
    connect(&mut core, source, unions[0]);
    connect(&mut core, unions[0], unions[1]);
    connect(&mut core, unions[1], unions[0]);

    core.one_iteration(256);
    let first = core.stream(unions[0]).unwrap();
    assert!(first.kind().processed().unwrap().in_muted_cycle());
    let track = first.state().tracks().find_track(TrackId(1)).unwrap();
    assert_eq!(track.end(), 256);
    assert!(track.segment().is_null());
}

#[test]
fn test_cycle_breaker_feeds_back_one_block_late() {
    let mut core = offline();
    let (source, _feed) = add_source(&mut core, constant(1024, 0.5));
    let a = add_node(&mut core, Box::new(Identity), ChannelConfig::default());
    let delay = add_node(&mut core, Box::<BlockDelay>::default(), ChannelConfig::default());
    connect(&mut core, source, a);
    connect(&mut core, a, delay);
    connect(&mut core, delay, a);

    core.one_iteration(128);
    assert_eq!(core.ordered_streams().last(), Some(&delay));
    assert_eq!(core.first_cycle_breaker(), 2);
    assert!(!core.stream(a).unwrap().kind().processed().unwrap().in_muted_cycle());
    assert!((output_value(&core, a) - 0.5).abs() < 1e-6);

    core.one_iteration(256);
    assert!((output_value(&core, delay) - 0.5).abs() < 1e-6);
    assert!((output_value(&core, a) - 1.0).abs() < 1e-6);
}

// ============================================================================
// Finishing nodes
// ============================================================================

#[test]
fn test_finished_node_goes_silent_downstream() {
    let mut core = offline();
    let id = core.shared().allocate_stream_id();
    let node = AudioNodeStream::new(Box::new(OneBlock), ChannelConfig::explicit(1), AudioNodeKind::Source, RATE);
    core.add_stream(MediaStream::new(id, StreamKind::AudioNode(node)));
    let generator = id;
    let follower = add_node(&mut core, Box::new(Identity), ChannelConfig::default());
    connect(&mut core, generator, follower);

    core.one_iteration(128);
    assert_eq!(output_value(&core, follower), 1.0);

    for end in [256, 384, 512] {
        core.one_iteration(end);
        assert!(core.stream(generator).unwrap().state().is_finished());
        let last = core.stream(generator).unwrap().kind().as_audio_node().unwrap().last_chunk(0).unwrap();
        assert!(last.is_null());
        assert_eq!(output_value(&core, follower), 0.0, "follower still audible at {end}");
    }
}

// ============================================================================
// Messages and lifecycle
// ============================================================================

#[test]
fn test_messages_run_in_enqueue_order() {
    let mut core = offline();
    let (_source, _feed) = add_source(&mut core, constant(128, 0.0));
    let log = Arc::new(Mutex::new(Vec::new()));
    for i in 0..5 {
        let log = Arc::clone(&log);
        core.shared()
            .append_message(ControlMessage::task(move |_core: &mut GraphCore| log.lock().unwrap().push(i)));
    }
    core.one_iteration(128);
    assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_suspended_source_reads_as_silence() {
    let mut core = offline();
    let (source, _feed) = add_source(&mut core, constant(1024, 0.5));
    let union = core.shared().allocate_stream_id();
    core.add_stream(MediaStream::new(union, StreamKind::TrackUnion(TrackUnionStream::new())));
    connect(&mut core, source, union);

    core.one_iteration(128);
    core.shared().append_message(ControlMessage::to(source, Command::Suspend));
    core.one_iteration(256);

    assert!(core.stream(source).unwrap().state().is_blocked());
    let track = core
        .stream(union)
        .unwrap()
        .state()
        .tracks()
        .find_track(TrackId(1))
        .unwrap();
    assert_eq!(track.end(), 256);
    assert!(!track.segment().slice(0, 128).is_null());
    assert!(track.segment().slice(128, 256).is_null());
}

#[test]
fn test_destroy_message_notifies_removed() {
    let mut core = offline();
    let (source, _feed) = add_source(&mut core, constant(1024, 0.5));
    let (_keep, _keep_feed) = add_source(&mut core, constant(1024, 0.5));
    let events = listen(&core, source);
    core.one_iteration(128);
    core.shared()
        .append_message(ControlMessage::to(source, Command::DestroyStream));
    core.one_iteration(256);
    assert!(core.stream(source).is_none());
    assert!(events.try_iter().any(|(_, e)| matches!(e, StreamEvent::Removed)));
}

#[test]
fn test_force_shutdown_ends_loop() {
    let mut core = offline();
    let (_source, _feed) = add_source(&mut core, constant(1024, 0.5));
    assert!(core.one_iteration(128));
    core.shared().request_force_shutdown();
    assert!(!core.one_iteration(256));
    assert_eq!(core.shared().lifecycle(), LifecycleState::WaitingForMainThreadCleanup);
    assert_eq!(core.shared().snapshot().processed_time, 256);
}
