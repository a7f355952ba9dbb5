//! Timeline arithmetic shared by the scheduler and every stream.
//!
//! All clocks count ticks, and one tick is one audio frame at the graph's
//! sample rate. [`GraphTime`] is the graph-global clock; [`StreamTime`] is a
//! stream's local clock, which only advances while the stream is unblocked.

/// Graph-global tick counter.
pub type GraphTime = i64;

/// Stream-local tick counter.
pub type StreamTime = i64;

/// Sample rate in ticks per second.
pub type TrackRate = u32;

/// Largest representable stream time. Used as "never" / "unknown".
///
/// Kept well below `i64::MAX` so that adding a stream offset can never overflow.
pub const STREAM_TIME_MAX: StreamTime = i64::MAX >> 20;

/// Largest representable graph time.
pub const GRAPH_TIME_MAX: GraphTime = STREAM_TIME_MAX;

/// log2 of [`BLOCK_SIZE`].
pub const BLOCK_SIZE_BITS: u32 = 7;

/// Number of frames in one processing block for audio-node streams.
pub const BLOCK_SIZE: usize = 1 << BLOCK_SIZE_BITS;

/// Rounds `t` up to the end of the block containing it.
///
/// Times already on a block boundary are returned unchanged.
#[inline]
pub fn round_up_to_block(t: GraphTime) -> GraphTime {
    let mask = (1 << BLOCK_SIZE_BITS) - 1;
    (t + mask) & !mask
}

/// Returns the first block boundary strictly after `t`.
#[inline]
pub fn round_up_to_next_block(t: GraphTime) -> GraphTime {
    ((t >> BLOCK_SIZE_BITS) + 1) << BLOCK_SIZE_BITS
}

/// Returns true if `t` lies on a block boundary.
#[inline]
pub fn is_block_aligned(t: GraphTime) -> bool {
    t & ((1 << BLOCK_SIZE_BITS) - 1) == 0
}

/// Converts seconds to ticks, rounding to the nearest tick.
pub fn seconds_to_ticks(seconds: f64, rate: TrackRate) -> GraphTime {
    (seconds * f64::from(rate)).round() as GraphTime
}

/// Converts ticks to seconds.
pub fn ticks_to_seconds(ticks: GraphTime, rate: TrackRate) -> f64 {
    ticks as f64 / f64::from(rate)
}

/// Converts milliseconds to ticks, rounding up.
pub fn millis_to_ticks(millis: u64, rate: TrackRate) -> GraphTime {
    let numerator = millis as i64 * i64::from(rate);
    (numerator + 999) / 1000
}
