//! Audio-node engines the CLI builds its graphs from.

use std::f32::consts::TAU;

use streamgraph_core::{AudioBlock, AudioNodeEngine, BLOCK_SIZE, ProcessContext, TrackRate};

/// Converts decibels to a linear gain factor.
pub fn db_to_linear(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

/// Sine oscillator with no inputs, optionally limited to a number of
/// samples after which it reports it has finished.
///
/// ## Parameter Indices
///
/// | Index | Name | Range |
/// |-------|------|-------|
/// | 0 | Frequency | 1.0–Nyquist Hz |
/// | 1 | Amplitude | 0–1 |
pub struct SineEngine {
    phase: f32,
    increment: f32,
    amplitude: f32,
    sample_rate: f32,
    remaining: Option<u64>,
}

impl SineEngine {
    /// Creates an oscillator at `freq` Hz.
    pub fn new(freq: f32, amplitude: f32, sample_rate: TrackRate) -> Self {
        let sample_rate = sample_rate as f32;
        Self {
            phase: 0.0,
            increment: Self::increment_for(freq, sample_rate),
            amplitude: amplitude.clamp(0.0, 1.0),
            sample_rate,
            remaining: None,
        }
    }

    /// Stops the oscillator after `samples` samples.
    pub fn with_length(mut self, samples: u64) -> Self {
        self.remaining = Some(samples);
        self
    }

    fn increment_for(freq: f32, sample_rate: f32) -> f32 {
        freq.clamp(1.0, sample_rate / 2.0) / sample_rate
    }
}

impl AudioNodeEngine for SineEngine {
    fn input_count(&self) -> usize {
        0
    }

    fn process_block(&mut self, _ctx: &ProcessContext, _inputs: &[AudioBlock], outputs: &mut [AudioBlock]) -> bool {
        let audible = self.remaining.map_or(BLOCK_SIZE, |r| r.min(BLOCK_SIZE as u64) as usize);
        let mut block = AudioBlock::silent(1);
        if block.is_null() {
            outputs[0] = block;
            return false;
        }
        for sample in &mut block.channel_mut(0)[..audible] {
            *sample = (self.phase * TAU).sin() * self.amplitude;
            self.phase = (self.phase + self.increment).fract();
        }
        outputs[0] = block;

        match &mut self.remaining {
            Some(remaining) => {
                *remaining -= audible as u64;
                *remaining == 0
            }
            None => false,
        }
    }

    fn set_parameter(&mut self, index: u32, value: f32) {
        match index {
            0 => self.increment = Self::increment_for(value, self.sample_rate),
            1 => self.amplitude = value.clamp(0.0, 1.0),
            _ => {}
        }
    }
}

/// Scales its input. Null input stays null.
///
/// Parameter 0 is the linear gain.
pub struct GainEngine {
    gain: f32,
}

impl GainEngine {
    /// Creates a gain stage with a linear factor.
    pub fn new(gain: f32) -> Self {
        Self { gain }
    }
}

impl AudioNodeEngine for GainEngine {
    fn process_block(&mut self, _ctx: &ProcessContext, inputs: &[AudioBlock], outputs: &mut [AudioBlock]) -> bool {
        let mut block = inputs[0].clone();
        for c in 0..block.channel_count() {
            for sample in block.channel_mut(c).iter_mut() {
                *sample *= self.gain;
            }
        }
        outputs[0] = block;
        false
    }

    fn set_parameter(&mut self, index: u32, value: f32) {
        if index == 0 {
            self.gain = value;
        }
    }
}

/// Feedback delay with a dry/wet mix.
///
/// Keeps ringing after its input goes silent, so it never reports itself
/// finished.
///
/// ## Parameter Indices
///
/// | Index | Name | Range |
/// |-------|------|-------|
/// | 0 | Feedback | 0–0.95 |
/// | 1 | Mix | 0–1 |
pub struct DelayEngine {
    lines: Vec<Vec<f32>>,
    delay: usize,
    write_pos: usize,
    feedback: f32,
    mix: f32,
}

impl DelayEngine {
    /// Creates a delay of `delay_ms` milliseconds.
    pub fn new(delay_ms: f32, feedback: f32, mix: f32, sample_rate: TrackRate) -> Self {
        let delay = ((delay_ms / 1000.0) * sample_rate as f32).round().max(1.0) as usize;
        Self {
            lines: Vec::new(),
            delay,
            write_pos: 0,
            feedback: feedback.clamp(0.0, 0.95),
            mix: mix.clamp(0.0, 1.0),
        }
    }
}

impl AudioNodeEngine for DelayEngine {
    fn process_block(&mut self, _ctx: &ProcessContext, inputs: &[AudioBlock], outputs: &mut [AudioBlock]) -> bool {
        let input = &inputs[0];
        let channels = input.channel_count().max(self.lines.len()).max(1);
        if self.lines.len() < channels {
            self.lines.resize(channels, vec![0.0; self.delay]);
        }

        let mut block = AudioBlock::silent(channels);
        if block.is_null() {
            outputs[0] = block;
            return false;
        }
        for (c, line) in self.lines.iter_mut().enumerate() {
            let mut pos = self.write_pos;
            for i in 0..BLOCK_SIZE {
                let dry = if c < input.channel_count() { input.channel(c)[i] } else { 0.0 };
                let wet = line[pos];
                line[pos] = dry + wet * self.feedback;
                block.channel_mut(c)[i] = dry * (1.0 - self.mix) + wet * self.mix;
                pos = (pos + 1) % self.delay;
            }
        }
        self.write_pos = (self.write_pos + BLOCK_SIZE) % self.delay;
        outputs[0] = block;
        false
    }

    fn set_parameter(&mut self, index: u32, value: f32) {
        match index {
            0 => self.feedback = value.clamp(0.0, 0.95),
            1 => self.mix = value.clamp(0.0, 1.0),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ProcessContext {
        ProcessContext {
            graph_time: 0,
            stream_time: 0,
            sample_rate: 48000,
        }
    }

    #[test]
    fn test_db_to_linear() {
        assert!((db_to_linear(0.0) - 1.0).abs() < 1e-6);
        assert!((db_to_linear(-6.0) - 0.501).abs() < 1e-3);
        assert!((db_to_linear(20.0) - 10.0).abs() < 1e-4);
    }

    #[test]
    fn test_sine_stays_in_range_and_continues_phase() {
        let mut sine = SineEngine::new(1000.0, 0.5, 48000);
        let mut out = vec![AudioBlock::null()];
        sine.process_block(&ctx(), &[], &mut out);
        let first = out[0].channel(0)[BLOCK_SIZE - 1];
        assert!(out[0].channel(0).iter().all(|s| s.abs() <= 0.5));
        assert_eq!(out[0].channel(0)[0], 0.0);

        sine.process_block(&ctx(), &[], &mut out);
        let next = out[0].channel(0)[0];
        assert!((next - first).abs() < 0.1, "phase jumped between blocks");
    }

    #[test]
    fn test_sine_with_length_finishes() {
        let mut sine = SineEngine::new(440.0, 1.0, 48000).with_length(200);
        let mut out = vec![AudioBlock::null()];
        assert!(!sine.process_block(&ctx(), &[], &mut out));
        assert!(sine.process_block(&ctx(), &[], &mut out));
        assert!(out[0].channel(0)[200 - BLOCK_SIZE..].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_gain_scales_and_passes_null() {
        let mut gain = GainEngine::new(0.5);
        let mut out = vec![AudioBlock::null()];
        gain.process_block(&ctx(), &[AudioBlock::from_channels(&[&[1.0; BLOCK_SIZE]])], &mut out);
        assert!(out[0].channel(0).iter().all(|s| *s == 0.5));

        gain.set_parameter(0, 2.0);
        gain.process_block(&ctx(), &[AudioBlock::null()], &mut out);
        assert!(out[0].is_null());
    }

    #[test]
    fn test_delay_echoes_impulse() {
        // 200 samples at 48 kHz, crossing a block boundary.
        let mut delay = DelayEngine::new(200.0 / 48.0, 0.0, 1.0, 48000);
        let mut impulse = [0.0; BLOCK_SIZE];
        impulse[0] = 1.0;
        let mut out = vec![AudioBlock::null()];

        delay.process_block(&ctx(), &[AudioBlock::from_channels(&[&impulse])], &mut out);
        assert!(out[0].channel(0).iter().all(|s| *s == 0.0));

        delay.process_block(&ctx(), &[AudioBlock::null()], &mut out);
        let echo = out[0].channel(0);
        assert_eq!(echo[200 - BLOCK_SIZE], 1.0);
        assert_eq!(echo.iter().filter(|s| **s != 0.0).count(), 1);
    }
}
