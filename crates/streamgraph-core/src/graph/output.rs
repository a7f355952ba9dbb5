//! Delivery of stream output to audio and video outputs.

use super::GraphCore;
use crate::segment::{AudioSegment, TrackKind};
use crate::stream::StreamState;
use crate::time::GraphTime;
use crate::tracks::Track;

impl GraphCore {
    /// Mixes every audio track of every stream with audio outputs over
    /// `[from, to)`. Blocked spans and disabled tracks are silent.
    pub(super) fn play_audio(&mut self, from: GraphTime, to: GraphTime) {
        for &id in &self.streams {
            let Some(stream) = self.arena.get(id.index() as usize).and_then(Option::as_ref) else {
                continue;
            };
            let state = stream.state();
            if state.audio_outputs.is_empty() {
                continue;
            }
            let volume: f32 = state.audio_outputs.iter().map(|o| o.volume).sum();
            for track in state.tracks().tracks_of(TrackKind::Audio) {
                let segment = audible_segment(state, track, from, to);
                self.mixer.mix(&segment, volume);
            }
        }
    }

    /// Hands each stream's current video frame to its video outputs when it
    /// changed since the last delivery.
    pub(super) fn play_video(&mut self, at: GraphTime) {
        for &id in &self.streams {
            let Some(stream) = self.arena.get_mut(id.index() as usize).and_then(Option::as_mut) else {
                continue;
            };
            let state = &mut stream.state;
            if state.video_outputs.is_empty() {
                continue;
            }
            let Some(track) = state.tracks.tracks_of(TrackKind::Video).next() else {
                continue;
            };
            let t = state.graph_time_to_stream_time_with_blocking(at).min(track.end() - 1);
            if t < 0 {
                continue;
            }
            let Some((_, chunk)) = track.segment().as_video().and_then(|s| s.chunk_at(t)) else {
                continue;
            };
            if chunk.frame().image().is_none() {
                continue;
            }
            let frame = if state.disabled_tracks.contains(&track.id()) {
                chunk.frame().to_black()
            } else {
                chunk.frame().clone()
            };
            if state.last_played_frame.as_ref() == Some(&frame) {
                continue;
            }
            for output in &mut state.video_outputs {
                output.sink.set_current_frame(&frame, at);
            }
            state.last_played_frame = Some(frame);
        }
    }
}

fn audible_segment(state: &StreamState, track: &Track, from: GraphTime, to: GraphTime) -> AudioSegment {
    let mut out = AudioSegment::new();
    let unblocked_end = state.start_blocking().clamp(from, to);
    if !state.is_track_disabled(track.id())
        && let Some(data) = track.segment().as_audio()
    {
        let end = track.end();
        let s0 = state.graph_time_to_stream_time_with_blocking(from).min(end);
        let s1 = state.graph_time_to_stream_time_with_blocking(unblocked_end).min(end);
        out.append_slice(data, s0, s1);
    }
    out.append_null(to - from - out.duration());
    out
}

#[cfg(test)]
mod tests {
    use crate::graph::{CoreOptions, GraphCore};
    use crate::message::Command;
    use crate::segment::{AudioChunk, AudioSegment, MediaSegment, VideoFrame, VideoImage, VideoSegment};
    use crate::shared::GraphShared;
    use crate::stream::{MediaStream, SourceFeed, SourceStream, StreamKind, VideoSink};
    use crate::time::GraphTime;
    use crate::tracks::TrackId;
    use std::sync::{Arc, Mutex};

    fn offline() -> GraphCore {
        GraphCore::new(
            Arc::new(GraphShared::new()),
            CoreOptions {
                realtime: false,
                output_channels: 1,
                ..CoreOptions::default()
            },
        )
    }

    fn source(core: &mut GraphCore, feed: SourceFeed) -> crate::stream::StreamId {
        let id = core.shared().allocate_stream_id();
        core.add_stream(MediaStream::new(id, StreamKind::Source(SourceStream::new(feed))));
        id
    }

    #[test]
    fn test_blocked_span_mixes_as_silence() {
        let mut core = offline();
        let feed = SourceFeed::new();
        feed.add_track(
            TrackId(1),
            0,
            MediaSegment::Audio(AudioSegment::from(AudioChunk::mono(&[0.5; 100]))),
        );
        feed.finish_add_tracks();
        let id = source(&mut core, feed);
        core.run_command(Some(id), Command::AddAudioOutput { key: 7, volume: 2.0 })
            .unwrap();
        core.one_iteration(128);

        let out = core.mixed_output();
        assert_eq!(out.len(), 128);
        assert!(out[..100].iter().all(|s| (*s - 1.0).abs() < 1e-6));
        assert!(out[100..].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_disabled_track_is_silent() {
        let mut core = offline();
        let feed = SourceFeed::new();
        feed.add_track(
            TrackId(1),
            0,
            MediaSegment::Audio(AudioSegment::from(AudioChunk::mono(&[0.5; 128]))),
        );
        feed.finish_add_tracks();
        let id = source(&mut core, feed);
        core.run_command(Some(id), Command::AddAudioOutput { key: 1, volume: 1.0 })
            .unwrap();
        core.run_command(
            Some(id),
            Command::SetTrackEnabled {
                track: TrackId(1),
                enabled: false,
            },
        )
        .unwrap();
        core.one_iteration(128);
        assert!(core.mixed_output().iter().all(|s| *s == 0.0));
    }

    struct Frames(Arc<Mutex<Vec<(bool, GraphTime)>>>);

    impl VideoSink for Frames {
        fn set_current_frame(&mut self, frame: &VideoFrame, at: GraphTime) {
            self.0.lock().unwrap().push((frame.is_black(), at));
        }
    }

    #[test]
    fn test_video_frame_delivered_on_change_only() {
        let mut core = offline();
        let image = Arc::new(VideoImage {
            width: 2,
            height: 2,
            data: vec![255; 16],
        });
        let mut video = VideoSegment::new();
        video.append_frame(VideoFrame::new(image), 1000);
        let feed = SourceFeed::new();
        feed.add_track(TrackId(2), 0, MediaSegment::Video(video));
        feed.finish_add_tracks();
        let id = source(&mut core, feed);
        let seen = Arc::new(Mutex::new(Vec::new()));
        core.run_command(
            Some(id),
            Command::AddVideoOutput {
                key: 1,
                sink: Box::new(Frames(Arc::clone(&seen))),
            },
        )
        .unwrap();

        core.one_iteration(128);
        core.one_iteration(256);
        core.run_command(
            Some(id),
            Command::SetTrackEnabled {
                track: TrackId(2),
                enabled: false,
            },
        )
        .unwrap();
        core.one_iteration(384);
        assert_eq!(*seen.lock().unwrap(), vec![(false, 128), (true, 384)]);
    }
}
