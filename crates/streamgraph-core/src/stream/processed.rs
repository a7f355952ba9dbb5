//! Generic processed streams driven by a pluggable [`StreamProcessor`].

use super::{GraphView, ProcessedInputs, StreamState};
use crate::engine::ProcessContext;
use crate::listener::TrackChange;
use crate::segment::{AudioSegment, MediaSegment, TrackKind};
use crate::time::GraphTime;
use crate::tracks::TrackId;

/// Track id of a processed stream's output.
pub const PROCESSED_OUTPUT_TRACK: TrackId = TrackId(1);

/// Computes a processed stream's audio from its inputs.
pub trait StreamProcessor: Send {
    /// Receives one segment per input port covering the interval being
    /// produced and must append exactly that many ticks to `output`.
    /// Returns true once the processor has no more output to give.
    fn process(&mut self, ctx: &ProcessContext, inputs: &[AudioSegment], output: &mut AudioSegment) -> bool;
}

/// Graph-side payload of a generic processed stream.
pub struct ProcessedStream {
    pub(crate) inputs: ProcessedInputs,
    processor: Box<dyn StreamProcessor>,
}

impl ProcessedStream {
    /// Wraps `processor`.
    pub fn new(processor: Box<dyn StreamProcessor>) -> Self {
        Self {
            inputs: ProcessedInputs::default(),
            processor,
        }
    }

    pub(crate) fn process_input(
        &mut self,
        state: &mut StreamState,
        view: &GraphView<'_>,
        from: GraphTime,
        to: GraphTime,
        allow_finish: bool,
    ) {
        if state.finished || from >= to {
            return;
        }
        let ticks = to - from;
        let start = state.graph_time_to_stream_time_with_blocking(from);
        if state.tracks.find_track(PROCESSED_OUTPUT_TRACK).is_none() {
            state
                .tracks
                .add_track(PROCESSED_OUTPUT_TRACK, start, MediaSegment::empty(TrackKind::Audio));
            let empty = MediaSegment::empty(TrackKind::Audio);
            state.notify_track_changed(PROCESSED_OUTPUT_TRACK, start, TrackChange::Created, &empty);
        }

        let mut output = AudioSegment::new();
        let mut done = false;
        let mut all_inputs_finished = true;
        if self.inputs.in_muted_cycle {
            output.append_null(ticks);
        } else {
            let mut segments = Vec::with_capacity(self.inputs.inputs.len());
            for port_id in self.inputs.all_ports() {
                let Some(port) = view.port(port_id) else {
                    continue;
                };
                match view.stream(port.source()) {
                    Some(source) => {
                        all_inputs_finished &= source.state().is_finished();
                        segments.push(port.read_audio(source, from, to));
                    }
                    None => segments.push(AudioSegment::null(ticks)),
                }
            }
            let ctx = ProcessContext {
                graph_time: from,
                stream_time: start,
                sample_rate: view.rate,
            };
            done = self.processor.process(&ctx, &segments, &mut output);
            assert_eq!(
                output.duration(),
                ticks,
                "stream processor produced the wrong number of ticks"
            );
        }

        let output = MediaSegment::Audio(output);
        if let Some(track) = state.tracks.find_track_mut(PROCESSED_OUTPUT_TRACK) {
            let offset = track.end();
            track.segment_mut().append_slice(&output, 0, ticks);
            state.notify_track_changed(PROCESSED_OUTPUT_TRACK, offset, TrackChange::Data, &output);
        }

        let autofinish = self.inputs.autofinish && !self.inputs.inputs.is_empty() && all_inputs_finished;
        if allow_finish && (done || autofinish) {
            state.finish_on_graph_thread();
        } else {
            state.advance_known_tracks_time_to(to);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{InputPort, PortId};
    use crate::segment::AudioChunk;
    use crate::stream::{MediaStream, SourceFeed, SourceStream, StreamId, StreamKind};

    struct Halve;

    impl StreamProcessor for Halve {
        fn process(&mut self, _ctx: &ProcessContext, inputs: &[AudioSegment], output: &mut AudioSegment) -> bool {
            let mut seg = inputs[0].clone();
            seg.apply_volume(0.5);
            output.append_segment(seg);
            false
        }
    }

    struct Short;

    impl StreamProcessor for Short {
        fn process(&mut self, _ctx: &ProcessContext, _inputs: &[AudioSegment], output: &mut AudioSegment) -> bool {
            output.append_null(1);
            false
        }
    }

    fn graph() -> (Vec<Option<MediaStream>>, Vec<Option<InputPort>>) {
        let mut source = MediaStream::new(StreamId(0), StreamKind::Source(SourceStream::new(SourceFeed::new())));
        let mut seg = AudioSegment::new();
        seg.append_chunk(AudioChunk::mono(&[1.0; 64]));
        source.state.tracks.add_track(TrackId(5), 0, MediaSegment::Audio(seg));
        source.state.start_blocking = 1000;
        let port = InputPort::new(PortId(0), StreamId(0), StreamId(1));
        (vec![Some(source), None], vec![Some(port)])
    }

    fn processed(processor: Box<dyn StreamProcessor>) -> MediaStream {
        let mut p = ProcessedStream::new(processor);
        p.inputs.inputs.push(PortId(0));
        let mut s = MediaStream::new(StreamId(1), StreamKind::Processed(p));
        s.state.start_blocking = 1000;
        s
    }

    #[test]
    fn test_processor_output_lands_on_track() {
        let (streams, ports) = graph();
        let view = GraphView { streams: &streams, ports: &ports, rate: 48000 };
        let mut s = processed(Box::new(Halve));
        s.process_input(&view, 0, 64, true);

        let track = s.state.tracks.find_track(PROCESSED_OUTPUT_TRACK).unwrap();
        assert_eq!(track.end(), 64);
        let chunk = &track.segment().as_audio().unwrap().chunks()[0];
        assert_eq!(chunk.volume(), 0.5);
        assert_eq!(s.state.tracks.known_tracks_time(), 64);
    }

    #[test]
    fn test_muted_cycle_outputs_null() {
        let (streams, ports) = graph();
        let view = GraphView { streams: &streams, ports: &ports, rate: 48000 };
        let mut s = processed(Box::new(Halve));
        if let StreamKind::Processed(p) = &mut s.kind {
            p.inputs.in_muted_cycle = true;
        }
        s.process_input(&view, 0, 64, true);
        let track = s.state.tracks.find_track(PROCESSED_OUTPUT_TRACK).unwrap();
        assert!(track.segment().is_null());
    }

    #[test]
    #[should_panic]
    fn test_wrong_tick_count_is_fatal() {
        let (streams, ports) = graph();
        let view = GraphView { streams: &streams, ports: &ports, rate: 48000 };
        let mut s = processed(Box::new(Short));
        s.process_input(&view, 0, 64, true);
    }

    #[test]
    fn test_autofinish_when_inputs_finish() {
        let (mut streams, ports) = graph();
        if let Some(source) = streams[0].as_mut() {
            source.state.finish_on_graph_thread();
        }
        let view = GraphView { streams: &streams, ports: &ports, rate: 48000 };
        let mut s = processed(Box::new(Halve));
        if let StreamKind::Processed(p) = &mut s.kind {
            p.inputs.autofinish = true;
        }
        s.process_input(&view, 0, 64, false);
        assert!(!s.state.is_finished());
        s.process_input(&view, 64, 128, true);
        assert!(s.state.is_finished());
    }
}
