//! Mixing of audible stream output into the graph's output buffer.
//!
//! Each iteration the scheduler calls [`AudioMixer::start_mixing`], then
//! [`AudioMixer::mix`] once per audio track routed to an audio output, then
//! [`AudioMixer::finish_mixing`] with the number of frames the iteration
//! covered. The result is one interleaved buffer at the graph's output
//! channel count.

use crate::channel::{ChannelInterpretation, MAX_CHANNELS, remix_frame};
use crate::segment::{AudioSegment, Chunk};
use crate::time::TrackRate;

/// Observer of every finished mix.
pub trait MixerCallback: Send {
    /// Receives the interleaved output of one iteration.
    fn mixed(&mut self, data: &[f32], channels: usize, rate: TrackRate);
}

/// Accumulates audible output for one iteration.
pub struct AudioMixer {
    channels: usize,
    rate: TrackRate,
    buffer: Vec<f32>,
    frames: Option<usize>,
    callbacks: Vec<Box<dyn MixerCallback>>,
}

impl AudioMixer {
    /// Creates a mixer producing `channels` interleaved channels.
    pub fn new(channels: usize, rate: TrackRate) -> Self {
        assert!(channels > 0 && channels <= MAX_CHANNELS, "unsupported output channel count");
        Self {
            channels,
            rate,
            buffer: Vec::new(),
            frames: None,
            callbacks: Vec::new(),
        }
    }

    /// Output channel count.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Output sample rate.
    pub fn rate(&self) -> TrackRate {
        self.rate
    }

    /// Registers an observer of finished mixes.
    pub fn add_callback(&mut self, callback: Box<dyn MixerCallback>) {
        self.callbacks.push(callback);
    }

    /// Begins a new iteration's mix.
    pub fn start_mixing(&mut self) {
        self.buffer.clear();
        self.frames = None;
    }

    /// Adds `segment` scaled by `volume`. Every call within one iteration
    /// must cover the same number of frames.
    ///
    /// # Panics
    ///
    /// Panics if `segment` has a different length than earlier
    /// contributions to this mix.
    pub fn mix(&mut self, segment: &AudioSegment, volume: f32) {
        let frames = segment.duration() as usize;
        match self.frames {
            Some(expected) => assert_eq!(expected, frames, "mixed segments disagree on frame count"),
            None => {
                self.frames = Some(frames);
                self.buffer.resize(frames * self.channels, 0.0);
            }
        }

        let outs = self.channels;
        let mut frame_in = [0.0f32; MAX_CHANNELS];
        let mut frame_out = [0.0f32; MAX_CHANNELS];
        let mut offset = 0usize;
        for chunk in segment.chunks() {
            let len = chunk.duration() as usize;
            let ins = chunk.channel_count().min(MAX_CHANNELS);
            if ins > 0 && !chunk.is_null() {
                let gain = chunk.volume() * volume;
                let data: Vec<&[f32]> = (0..ins).filter_map(|c| chunk.channel(c)).collect();
                for i in 0..len {
                    for (c, samples) in data.iter().enumerate() {
                        frame_in[c] = samples[i] * gain;
                    }
                    remix_frame(&frame_in[..ins], &mut frame_out[..outs], ChannelInterpretation::Speakers);
                    let base = (offset + i) * outs;
                    for (dst, src) in self.buffer[base..base + outs].iter_mut().zip(&frame_out[..outs]) {
                        *dst += *src;
                    }
                }
            }
            offset += len;
        }
    }

    /// Completes the mix for an iteration of `frames` frames and hands it
    /// to every callback. With no contributions the mix is `frames` frames
    /// of silence.
    ///
    /// # Panics
    ///
    /// Panics if contributions covered a different number of frames.
    pub fn finish_mixing(&mut self, frames: usize) {
        match self.frames {
            Some(mixed) => assert_eq!(mixed, frames, "mix length does not match the iteration"),
            None => {
                self.buffer.clear();
                self.buffer.resize(frames * self.channels, 0.0);
                self.frames = Some(frames);
            }
        }
        for callback in &mut self.callbacks {
            callback.mixed(&self.buffer, self.channels, self.rate);
        }
    }

    /// Interleaved output of the last finished mix.
    pub fn mixed(&self) -> &[f32] {
        &self.buffer
    }

    /// Frames in the last mix, if any.
    pub fn frames(&self) -> usize {
        self.frames.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::AudioChunk;
    use std::sync::{Arc, Mutex};

    struct Capture(Arc<Mutex<Vec<f32>>>);

    impl MixerCallback for Capture {
        fn mixed(&mut self, data: &[f32], _channels: usize, _rate: TrackRate) {
            self.0.lock().unwrap().extend_from_slice(data);
        }
    }

    #[test]
    fn test_silence_when_nothing_mixed() {
        let mut mixer = AudioMixer::new(2, 48000);
        mixer.start_mixing();
        mixer.finish_mixing(128);
        assert_eq!(mixer.mixed().len(), 256);
        assert!(mixer.mixed().iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_mono_upmix_and_sum() {
        let mut mixer = AudioMixer::new(2, 48000);
        let mut seg = AudioSegment::new();
        seg.append_chunk(AudioChunk::mono(&[0.25; 4]));
        mixer.start_mixing();
        mixer.mix(&seg, 1.0);
        mixer.mix(&seg, 2.0);
        mixer.finish_mixing(4);
        assert_eq!(mixer.mixed(), &[0.75; 8]);
    }

    #[test]
    fn test_null_span_is_silent() {
        let mut mixer = AudioMixer::new(1, 48000);
        let mut seg = AudioSegment::new();
        seg.append_null(2);
        seg.append_chunk(AudioChunk::mono(&[1.0, 1.0]));
        mixer.start_mixing();
        mixer.mix(&seg, 0.5);
        mixer.finish_mixing(4);
        assert_eq!(mixer.mixed(), &[0.0, 0.0, 0.5, 0.5]);
    }

    #[test]
    #[should_panic]
    fn test_frame_mismatch_is_fatal() {
        let mut mixer = AudioMixer::new(2, 48000);
        mixer.start_mixing();
        mixer.mix(&AudioSegment::null(64), 1.0);
        mixer.finish_mixing(128);
    }

    #[test]
    fn test_callbacks_see_each_mix() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut mixer = AudioMixer::new(1, 48000);
        mixer.add_callback(Box::new(Capture(Arc::clone(&seen))));
        for _ in 0..3 {
            mixer.start_mixing();
            mixer.finish_mixing(10);
        }
        assert_eq!(seen.lock().unwrap().len(), 30);
    }
}
