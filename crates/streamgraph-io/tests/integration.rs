//! End-to-end tests of graphs running on real driver threads.
//!
//! Realtime graphs play through a [`ManualBackend`], so the audio callback
//! only runs when a test pumps it and device failures are simulated.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

use hound::WavReader;
use streamgraph_core::{
    AudioChunk, AudioSegment, ChannelListener, Command, ControlMessage, DriverKind, GraphCore, GraphTask,
    LifecycleState, MediaSegment, StreamEvent, StreamId, TrackId,
};
use streamgraph_io::{GraphOptions, ManualBackend, MediaStreamGraph, SourceStreamHandle, WavRecorder};
use tempfile::TempDir;

const RATE: u32 = 48000;
const TIMEOUT: Duration = Duration::from_secs(5);

fn manual_graph(fallback_retry: Duration) -> (MediaStreamGraph, ManualBackend) {
    let backend = ManualBackend::new();
    let graph = MediaStreamGraph::with_backend(
        GraphOptions {
            system_clock_interval: Duration::from_millis(1),
            fallback_retry,
            ..GraphOptions::realtime(RATE)
        },
        Box::new(backend.clone()),
    );
    (graph, backend)
}

/// Mono source whose sample `k` is `k + 1`, so gaps and repeats show up.
fn counting_source(graph: &MediaStreamGraph, frames: usize) -> SourceStreamHandle {
    let samples: Vec<f32> = (0..frames).map(|k| (k + 1) as f32).collect();
    let source = graph.create_source_stream();
    source.feed().add_track(
        TrackId(1),
        0,
        MediaSegment::Audio(AudioSegment::from(AudioChunk::mono(&samples))),
    );
    source.feed().finish_add_tracks();
    source
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}

fn listen(source: &SourceStreamHandle) -> Receiver<(StreamId, StreamEvent)> {
    let (tx, rx) = mpsc::channel();
    source.add_listener(Box::new(ChannelListener::new(tx)));
    rx
}

fn wait_for_event(rx: &Receiver<(StreamId, StreamEvent)>, wanted: impl Fn(&StreamEvent) -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match rx.recv_timeout(left) {
            Ok((_, event)) if wanted(&event) => return true,
            Ok(_) => {}
            Err(_) => return false,
        }
    }
    false
}

#[test]
fn test_audible_stream_moves_to_audio_callback() {
    let (graph, backend) = manual_graph(Duration::from_secs(1));
    let source = counting_source(&graph, RATE as usize);
    assert_eq!(graph.driver_kind(), DriverKind::SystemClock);

    source.add_audio_output(1, 1.0);
    assert!(wait_for(|| backend.is_streaming()));
    assert_eq!(graph.driver_kind(), DriverKind::AudioCallback);

    let config = backend.last_config().unwrap();
    assert_eq!(config.sample_rate, RATE);
    assert_eq!(config.channels, 2);

    graph.force_shutdown(TIMEOUT);
}

#[test]
fn test_callback_output_is_continuous_across_buffers() {
    let (graph, backend) = manual_graph(Duration::from_secs(1));
    let source = counting_source(&graph, RATE as usize);
    source.add_audio_output(1, 1.0);
    assert!(wait_for(|| backend.is_streaming()));

    // Odd buffer sizes so iterations never line up with callbacks.
    let mut left = Vec::new();
    for frames in [100, 37, 256, 1, 300] {
        let (buffer, written) = backend.pump(frames).unwrap();
        assert_eq!(written, frames);
        assert_eq!(buffer.len(), frames * 2);
        for frame in buffer.chunks_exact(2) {
            assert_eq!(frame[0], frame[1], "mono source is up-mixed to both channels");
            left.push(frame[0]);
        }
    }

    assert!(left[0] >= 1.0);
    for pair in left.windows(2) {
        assert_eq!(pair[1], pair[0] + 1.0, "gap or repeat in callback output");
    }
    drop(source);
    graph.force_shutdown(TIMEOUT);
}

#[test]
fn test_driver_switches_keep_the_watermark() {
    let (graph, backend) = manual_graph(Duration::from_secs(60));
    let source = counting_source(&graph, RATE as usize);
    source.add_audio_output(1, 1.0);
    assert!(wait_for(|| backend.is_streaming()));

    // Last iteration the system clock committed before handing over.
    let before = graph.snapshot();
    assert_eq!(before.driver, DriverKind::SystemClock);
    assert_eq!(before.processed_time, before.state_computed_time);
    let played = before.streams[&source.id()].current_time;

    let (buffer, _) = backend.pump(100).unwrap();
    assert_eq!(buffer[0], (played + 1) as f32, "callback skipped or repeated frames");
    let after = graph.snapshot();
    assert_eq!(after.driver, DriverKind::AudioCallback);
    assert_eq!(after.processed_time, before.processed_time + 128);
    assert_eq!(after.streams[&source.id()].current_time, played + 128);

    backend.trigger_error("device unplugged");
    assert_eq!(graph.driver_kind(), DriverKind::SystemClock);
    let mut last = after.processed_time;
    assert!(wait_for(|| {
        let now = graph.snapshot();
        assert!(now.processed_time >= last, "watermark went backwards");
        last = now.processed_time;
        now.driver == DriverKind::SystemClock && now.processed_time > after.processed_time
    }));
    assert!(graph.snapshot().streams[&source.id()].current_time > played + 128);

    drop(source);
    graph.force_shutdown(TIMEOUT);
}

#[test]
fn test_callback_hands_over_when_nothing_is_audible() {
    let (graph, backend) = manual_graph(Duration::from_secs(1));
    let source = counting_source(&graph, RATE as usize);
    source.add_audio_output(1, 1.0);
    assert!(wait_for(|| backend.is_streaming()));
    backend.pump(100).unwrap();

    source.remove_audio_output(1);
    let (_, written) = backend.pump(100).unwrap();
    assert_eq!(written, 100);
    // The switch completes without main-thread help.
    assert!(wait_for(|| graph.driver_kind() == DriverKind::SystemClock));

    let handed_over_at = graph.processed_time();
    assert!(wait_for(|| graph.processed_time() > handed_over_at));
    drop(source);
    graph.force_shutdown(TIMEOUT);
}

#[test]
fn test_failed_device_falls_back_then_retries() {
    let (graph, backend) = manual_graph(Duration::from_millis(20));
    backend.fail_next_build();
    let source = counting_source(&graph, RATE as usize);
    source.add_audio_output(1, 1.0);

    assert!(wait_for(|| backend.builds() >= 1));
    assert!(wait_for(|| backend.is_streaming()));
    assert!(backend.builds() >= 2);
    assert_eq!(graph.driver_kind(), DriverKind::AudioCallback);
    graph.force_shutdown(TIMEOUT);
}

#[test]
fn test_stream_error_falls_back_to_system_clock() {
    let (graph, backend) = manual_graph(Duration::from_secs(60));
    let source = counting_source(&graph, RATE as usize);
    source.add_audio_output(1, 1.0);
    assert!(wait_for(|| backend.is_streaming()));

    backend.trigger_error("device unplugged");
    assert_eq!(graph.driver_kind(), DriverKind::SystemClock);

    // The replaced stream is released by main-thread housekeeping.
    assert!(wait_for(|| {
        graph.process_main_thread_updates();
        !backend.is_streaming()
    }));

    // Time keeps moving on the system clock.
    let before = graph.processed_time();
    assert!(wait_for(|| graph.processed_time() > before));
    assert_eq!(backend.builds(), 1);
    graph.force_shutdown(TIMEOUT);
}

#[test]
fn test_paused_driver_holds_time() {
    let (graph, _backend) = manual_graph(Duration::from_secs(1));
    let source = counting_source(&graph, RATE as usize);
    assert!(wait_for(|| graph.processed_time() > 0));

    graph.pause_driver();
    std::thread::sleep(Duration::from_millis(20));
    let paused_at = graph.processed_time();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(graph.processed_time(), paused_at);

    graph.resume_driver();
    assert!(wait_for(|| graph.processed_time() > paused_at));
    drop(source);
    graph.force_shutdown(TIMEOUT);
}

#[test]
fn test_dropping_last_handle_removes_stream() {
    let (graph, _backend) = manual_graph(Duration::from_secs(1));
    let source = counting_source(&graph, 1024);
    let rx = listen(&source);
    let clone = source.clone();
    assert_eq!(source.owning_count(), 2);

    drop(source);
    std::thread::sleep(Duration::from_millis(20));
    assert!(!rx.try_iter().any(|(_, e)| matches!(e, StreamEvent::Removed)));

    drop(clone);
    assert!(wait_for_event(&rx, |e| matches!(e, StreamEvent::Removed)));
    graph.force_shutdown(TIMEOUT);
}

#[test]
fn test_offline_render_to_wav() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("render.wav");
    let graph = MediaStreamGraph::new(GraphOptions::offline(RATE));

    let source = graph.create_source_stream();
    source.feed().add_track(
        TrackId(1),
        0,
        MediaSegment::Audio(AudioSegment::from(AudioChunk::mono(&[0.5; 1000]))),
    );
    source.feed().finish();
    source.add_audio_output(1, 1.0);
    let rx = listen(&source);

    let recorder = WavRecorder::create(&path, 2, RATE).unwrap();
    graph.add_mixer_callback(Box::new(recorder.clone()));
    graph.start_offline(1024).unwrap();

    assert!(graph.wait_until_stopped(TIMEOUT));
    assert!(rx.try_iter().any(|(_, e)| matches!(e, StreamEvent::Finished)));
    assert_eq!(recorder.finalize().unwrap(), 1024);

    let mut reader = WavReader::open(&path).unwrap();
    assert_eq!(reader.spec().channels, 2);
    assert_eq!(reader.spec().sample_rate, RATE);
    let samples: Vec<f32> = reader.samples::<f32>().map(Result::unwrap).collect();
    assert_eq!(samples.len(), 2048);
    assert!(samples[..2000].iter().all(|s| *s == 0.5));
    assert!(samples[2000..].iter().all(|s| *s == 0.0));
}

struct ShutdownFlag(Arc<AtomicBool>);

impl GraphTask for ShutdownFlag {
    fn run(self: Box<Self>, _graph: &mut GraphCore) {}

    fn run_during_shutdown(self: Box<Self>) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[test]
fn test_force_shutdown_runs_pending_messages() {
    let graph = MediaStreamGraph::new(GraphOptions::offline(RATE));
    let source = graph.create_source_stream();
    let rx = listen(&source);
    let flag = Arc::new(AtomicBool::new(false));
    graph.append_message(ControlMessage::global(Command::Task(Box::new(ShutdownFlag(Arc::clone(
        &flag,
    ))))));

    graph.force_shutdown(TIMEOUT);
    assert_eq!(graph.lifecycle(), LifecycleState::Stopped);
    assert!(flag.load(Ordering::SeqCst));
    assert!(rx.try_iter().any(|(_, e)| matches!(e, StreamEvent::Removed)));

    // Messages sent after shutdown run their fallback right away.
    let late = listen(&source);
    assert!(matches!(late.try_recv(), Ok((_, StreamEvent::Removed))));
}

#[test]
fn test_closure_listener_sees_finish() {
    let graph = MediaStreamGraph::new(GraphOptions::offline(RATE));
    let source = graph.create_source_stream();
    source.feed().add_track(
        TrackId(1),
        0,
        MediaSegment::Audio(AudioSegment::from(AudioChunk::mono(&[0.1; 300]))),
    );
    source.feed().finish();

    let (tx, rx) = mpsc::channel();
    source.add_listener(Box::new(move |id: StreamId, event: &StreamEvent| {
        if matches!(event, StreamEvent::Finished) {
            let _ = tx.send(id);
        }
    }));
    graph.start_offline(512).unwrap();

    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), source.id());
    assert!(graph.wait_until_stopped(TIMEOUT));
    assert!(source.is_finished());
}
