//! Channel-count negotiation and up/down-mixing.
//!
//! Audio-node inputs arrive with whatever channel count the upstream node
//! produced. Each node declares how its input channel count is computed
//! ([`ChannelCountMode`]) and how channels are remapped when counts differ
//! ([`ChannelInterpretation`]).

/// Upper bound on channels per block.
pub const MAX_CHANNELS: usize = 32;

const SQRT_HALF: f32 = core::f32::consts::FRAC_1_SQRT_2;

/// How a node derives its computed input channel count.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ChannelCountMode {
    /// The largest channel count among the inputs.
    #[default]
    Max,
    /// The largest input channel count, capped at the configured count.
    ClampedMax,
    /// Always the configured count.
    Explicit,
}

/// How channels are remapped when counts differ.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ChannelInterpretation {
    /// Standard speaker layouts (mono, stereo, quad, 5.1) with matrixed
    /// up/down-mix; other counts fall back to discrete.
    #[default]
    Speakers,
    /// Copy matching channels, zero-fill or drop the rest.
    Discrete,
}

/// Input mixing configuration of an audio node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Configured channel count.
    pub count: usize,
    /// Computed-count mode.
    pub mode: ChannelCountMode,
    /// Remapping rules.
    pub interpretation: ChannelInterpretation,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            count: 2,
            mode: ChannelCountMode::Max,
            interpretation: ChannelInterpretation::Speakers,
        }
    }
}

impl ChannelConfig {
    /// Fixed channel count, regardless of inputs.
    pub fn explicit(count: usize) -> Self {
        Self {
            count,
            mode: ChannelCountMode::Explicit,
            interpretation: ChannelInterpretation::Speakers,
        }
    }

    /// Computed channel count for the given widest input.
    pub fn computed_channel_count(&self, input_channels: usize) -> usize {
        let count = match self.mode {
            ChannelCountMode::Max => input_channels,
            ChannelCountMode::ClampedMax => input_channels.min(self.count),
            ChannelCountMode::Explicit => self.count,
        };
        count.min(MAX_CHANNELS)
    }
}

/// Remaps one frame from `input.len()` channels to `output.len()` channels,
/// overwriting `output`.
pub fn remix_frame(input: &[f32], output: &mut [f32], interpretation: ChannelInterpretation) {
    let (ins, outs) = (input.len(), output.len());
    if ins == outs {
        output.copy_from_slice(input);
        return;
    }
    if interpretation == ChannelInterpretation::Speakers && speaker_remix(input, output) {
        return;
    }
    let shared = ins.min(outs);
    output[..shared].copy_from_slice(&input[..shared]);
    output[shared..].fill(0.0);
}

/// Speaker-layout rules. Returns false for layouts without a matrix.
fn speaker_remix(input: &[f32], output: &mut [f32]) -> bool {
    match (input.len(), output.len()) {
        // Up-mix.
        (1, 2) => {
            output[0] = input[0];
            output[1] = input[0];
        }
        (1, 4) => {
            output.fill(0.0);
            output[0] = input[0];
            output[1] = input[0];
        }
        (1, 6) => {
            output.fill(0.0);
            output[2] = input[0];
        }
        (2, 4) | (2, 6) => {
            output.fill(0.0);
            output[0] = input[0];
            output[1] = input[1];
        }
        (4, 6) => {
            output.fill(0.0);
            output[0] = input[0];
            output[1] = input[1];
            output[4] = input[2];
            output[5] = input[3];
        }
        // Down-mix.
        (2, 1) => output[0] = 0.5 * (input[0] + input[1]),
        (4, 1) => output[0] = 0.25 * (input[0] + input[1] + input[2] + input[3]),
        (6, 1) => {
            output[0] = SQRT_HALF * (input[0] + input[1]) + input[2] + 0.5 * (input[4] + input[5]);
        }
        (4, 2) => {
            output[0] = 0.5 * (input[0] + input[2]);
            output[1] = 0.5 * (input[1] + input[3]);
        }
        (6, 2) => {
            output[0] = input[0] + SQRT_HALF * (input[2] + input[4]);
            output[1] = input[1] + SQRT_HALF * (input[2] + input[5]);
        }
        (6, 4) => {
            output[0] = input[0] + SQRT_HALF * input[2];
            output[1] = input[1] + SQRT_HALF * input[2];
            output[2] = input[4];
            output[3] = input[5];
        }
        _ => return false,
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_computed_channel_count() {
        let max = ChannelConfig::default();
        assert_eq!(max.computed_channel_count(6), 6);

        let clamped = ChannelConfig {
            count: 2,
            mode: ChannelCountMode::ClampedMax,
            ..ChannelConfig::default()
        };
        assert_eq!(clamped.computed_channel_count(6), 2);
        assert_eq!(clamped.computed_channel_count(1), 1);

        assert_eq!(ChannelConfig::explicit(2).computed_channel_count(1), 2);
    }

    #[test]
    fn test_mono_to_stereo_duplicates() {
        let mut out = [0.0; 2];
        remix_frame(&[0.25], &mut out, ChannelInterpretation::Speakers);
        assert_eq!(out, [0.25, 0.25]);
    }

    #[test]
    fn test_stereo_to_mono_averages() {
        let mut out = [0.0; 1];
        remix_frame(&[1.0, 0.0], &mut out, ChannelInterpretation::Speakers);
        assert_eq!(out, [0.5]);
    }

    #[test]
    fn test_discrete_zero_fills() {
        let mut out = [9.0; 4];
        remix_frame(&[0.1, 0.2], &mut out, ChannelInterpretation::Discrete);
        assert_eq!(out, [0.1, 0.2, 0.0, 0.0]);
    }

    #[test]
    fn test_discrete_drops_extra() {
        let mut out = [0.0; 1];
        remix_frame(&[0.1, 0.2], &mut out, ChannelInterpretation::Discrete);
        assert_eq!(out, [0.1]);
    }

    #[test]
    fn test_unknown_speaker_layout_falls_back_to_discrete() {
        let mut out = [0.0; 3];
        remix_frame(&[0.1, 0.2], &mut out, ChannelInterpretation::Speakers);
        assert_eq!(out, [0.1, 0.2, 0.0]);
    }

    #[test]
    fn test_five_one_to_stereo() {
        let mut out = [0.0; 2];
        remix_frame(&[1.0, 0.0, 0.0, 0.0, 0.0, 0.0], &mut out, ChannelInterpretation::Speakers);
        assert_eq!(out, [1.0, 0.0]);
    }
}
