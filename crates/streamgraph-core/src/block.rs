//! Fixed-size audio blocks exchanged with node engines.

use crate::channel::{ChannelInterpretation, MAX_CHANNELS, remix_frame};
use crate::segment::{AudioChunk, AudioSegment, Chunk};
use crate::time::BLOCK_SIZE;

/// One channel of one block.
pub type BlockChannel = [f32; BLOCK_SIZE];

/// [`BLOCK_SIZE`] frames of planar audio. A block with no channels is null
/// and means silence.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AudioBlock {
    channels: Vec<BlockChannel>,
}

impl AudioBlock {
    /// A null (silent) block.
    pub fn null() -> Self {
        Self::default()
    }

    /// A block of `channels` zeroed channels, or null if the allocation fails.
    pub fn silent(channels: usize) -> Self {
        let mut block = Self::null();
        block.allocate_channels(channels);
        block
    }

    /// Builds a block from per-channel sample slices. Shorter slices are
    /// zero-padded; longer ones are truncated.
    pub fn from_channels(data: &[&[f32]]) -> Self {
        let mut block = Self::silent(data.len());
        for (dst, src) in block.channels.iter_mut().zip(data) {
            let n = src.len().min(BLOCK_SIZE);
            dst[..n].copy_from_slice(&src[..n]);
        }
        block
    }

    /// Returns true if the block carries no channels.
    pub fn is_null(&self) -> bool {
        self.channels.is_empty()
    }

    /// Number of channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples of channel `c`.
    pub fn channel(&self, c: usize) -> &BlockChannel {
        &self.channels[c]
    }

    /// Mutable samples of channel `c`.
    pub fn channel_mut(&mut self, c: usize) -> &mut BlockChannel {
        &mut self.channels[c]
    }

    /// Drops all channels, making the block null.
    pub fn set_null(&mut self) {
        self.channels.clear();
    }

    /// Replaces the contents with `count` zeroed channels.
    ///
    /// Returns false, leaving the block null, if the buffer cannot be
    /// allocated.
    pub fn allocate_channels(&mut self, count: usize) -> bool {
        self.channels.clear();
        if count == 0 {
            return true;
        }
        if self.channels.try_reserve_exact(count).is_err() {
            #[cfg(feature = "tracing")]
            tracing::warn!(channels = count, "block allocation failed, substituting silence");
            return false;
        }
        self.channels.resize(count, [0.0; BLOCK_SIZE]);
        true
    }

    /// Mixes `src` into this block, remapping channels with `interpretation`.
    pub fn accumulate(&mut self, src: &AudioBlock, interpretation: ChannelInterpretation) {
        if src.is_null() || self.is_null() {
            return;
        }
        let ins = src.channel_count().min(MAX_CHANNELS);
        let outs = self.channel_count().min(MAX_CHANNELS);
        let mut frame_in = [0.0f32; MAX_CHANNELS];
        let mut frame_out = [0.0f32; MAX_CHANNELS];
        for i in 0..BLOCK_SIZE {
            for c in 0..ins {
                frame_in[c] = src.channels[c][i];
            }
            remix_frame(&frame_in[..ins], &mut frame_out[..outs], interpretation);
            for c in 0..outs {
                self.channels[c][i] += frame_out[c];
            }
        }
    }

    /// Renders a segment exactly one block long into a block, applying
    /// per-chunk volume and up-mixing narrower chunks to the widest one.
    pub fn from_segment(segment: &AudioSegment, interpretation: ChannelInterpretation) -> Self {
        assert_eq!(segment.duration(), BLOCK_SIZE as i64, "segment is not one block long");
        let outs = segment.max_channel_count().min(MAX_CHANNELS);
        let mut block = Self::silent(outs);
        if block.is_null() {
            return block;
        }
        let mut frame_in = [0.0f32; MAX_CHANNELS];
        let mut frame_out = [0.0f32; MAX_CHANNELS];
        let mut offset = 0usize;
        for chunk in segment.chunks() {
            let frames = chunk.duration() as usize;
            let ins = chunk.channel_count().min(MAX_CHANNELS);
            if ins > 0 {
                let volume = chunk.volume();
                let data: Vec<&[f32]> = (0..ins).filter_map(|c| chunk.channel(c)).collect();
                for i in 0..frames {
                    for (c, samples) in data.iter().enumerate() {
                        frame_in[c] = samples[i] * volume;
                    }
                    remix_frame(&frame_in[..ins], &mut frame_out[..outs], interpretation);
                    for c in 0..outs {
                        block.channels[c][offset + i] = frame_out[c];
                    }
                }
            }
            offset += frames;
        }
        block
    }

    /// Converts the block into a chunk one block long.
    pub fn to_chunk(&self) -> AudioChunk {
        if self.is_null() {
            return AudioChunk::null(BLOCK_SIZE as i64);
        }
        AudioChunk::from_planar(self.channels.iter().map(|c| c.to_vec()).collect())
    }
}
