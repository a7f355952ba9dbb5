//! Time-stamped media data held by tracks.
//!
//! A [`Segment`] is a run of chunks laid end to end on a track's timeline.
//! Chunks are cheap to clone and slice: audio samples live behind an `Arc`
//! and a slice only adjusts an offset. A *null* chunk carries a duration but
//! no data and stands for silence (audio) or black (video).

use std::sync::Arc;

use crate::time::StreamTime;

/// Media type of a track or segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrackKind {
    /// Planar `f32` audio.
    Audio,
    /// Sequence of video frames.
    Video,
}

/// A contiguous run of media with a duration.
pub trait Chunk: Clone {
    /// Duration of the chunk in ticks.
    fn duration(&self) -> StreamTime;

    /// Creates a chunk with no data spanning `duration` ticks.
    fn null(duration: StreamTime) -> Self;

    /// Returns true if the chunk carries no data.
    fn is_null(&self) -> bool;

    /// Returns the sub-range `[start, end)` of this chunk.
    fn slice(&self, start: StreamTime, end: StreamTime) -> Self;

    /// Extends `self` with `next` if the two are contiguous views of the same
    /// data. Returns true when merged.
    fn try_merge(&mut self, next: &Self) -> bool;
}

// ---------------------------------------------------------------------------
// Audio
// ---------------------------------------------------------------------------

/// A run of planar audio frames, or silence when null.
#[derive(Clone, Debug)]
pub struct AudioChunk {
    buffer: Option<Arc<Vec<Vec<f32>>>>,
    offset: usize,
    duration: StreamTime,
    volume: f32,
}

impl AudioChunk {
    /// Wraps planar channel data. Every channel must have the same length.
    ///
    /// An empty channel list produces an empty null chunk.
    pub fn from_planar(channels: Vec<Vec<f32>>) -> Self {
        let Some(first) = channels.first() else {
            return Self::null(0);
        };
        let frames = first.len();
        assert!(
            channels.iter().all(|c| c.len() == frames),
            "planar channels must share a length"
        );
        Self {
            buffer: Some(Arc::new(channels)),
            offset: 0,
            duration: frames as StreamTime,
            volume: 1.0,
        }
    }

    /// Builds a mono chunk from a slice of samples.
    pub fn mono(samples: &[f32]) -> Self {
        Self::from_planar(vec![samples.to_vec()])
    }

    /// Returns the chunk with its volume multiplied by `volume`.
    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume *= volume;
        self
    }

    /// Number of channels; zero for null chunks.
    pub fn channel_count(&self) -> usize {
        self.buffer.as_ref().map_or(0, |b| b.len())
    }

    /// Gain to apply to every sample of this chunk.
    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Raw samples of `channel` within this chunk's window, before volume.
    pub fn channel(&self, channel: usize) -> Option<&[f32]> {
        let buffer = self.buffer.as_ref()?;
        let data = buffer.get(channel)?;
        Some(&data[self.offset..self.offset + self.duration as usize])
    }

    pub(crate) fn scale_volume(&mut self, volume: f32) {
        self.volume *= volume;
    }
}

impl Chunk for AudioChunk {
    fn duration(&self) -> StreamTime {
        self.duration
    }

    fn null(duration: StreamTime) -> Self {
        Self {
            buffer: None,
            offset: 0,
            duration,
            volume: 1.0,
        }
    }

    fn is_null(&self) -> bool {
        self.buffer.is_none()
    }

    fn slice(&self, start: StreamTime, end: StreamTime) -> Self {
        assert!(0 <= start && start <= end && end <= self.duration, "bad audio slice");
        let mut sliced = self.clone();
        if sliced.buffer.is_some() {
            sliced.offset += start as usize;
        }
        sliced.duration = end - start;
        sliced
    }

    fn try_merge(&mut self, next: &Self) -> bool {
        let contiguous = match (&self.buffer, &next.buffer) {
            (None, None) => true,
            (Some(a), Some(b)) => {
                Arc::ptr_eq(a, b)
                    && self.offset + self.duration as usize == next.offset
                    && self.volume == next.volume
            }
            _ => false,
        };
        if contiguous {
            self.duration += next.duration;
        }
        contiguous
    }
}

// ---------------------------------------------------------------------------
// Video
// ---------------------------------------------------------------------------

/// Decoded picture data. Rendering is outside the graph; the graph only
/// moves frames around on the timeline.
#[derive(Debug)]
pub struct VideoImage {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Opaque pixel payload.
    pub data: Vec<u8>,
}

/// A frame reference: an image, or black.
#[derive(Clone, Debug, Default)]
pub struct VideoFrame {
    image: Option<Arc<VideoImage>>,
    forced_black: bool,
}

impl VideoFrame {
    /// Creates a frame showing `image`.
    pub fn new(image: Arc<VideoImage>) -> Self {
        Self {
            image: Some(image),
            forced_black: false,
        }
    }

    /// Creates a black frame that keeps the image's dimensions.
    pub fn black_of(image: Arc<VideoImage>) -> Self {
        Self {
            image: Some(image),
            forced_black: true,
        }
    }

    /// Image shown by this frame, if any.
    pub fn image(&self) -> Option<&Arc<VideoImage>> {
        self.image.as_ref()
    }

    /// Returns true if the frame must render as black.
    pub fn is_black(&self) -> bool {
        self.forced_black || self.image.is_none()
    }

    /// Returns a copy of this frame forced to black.
    pub fn to_black(&self) -> Self {
        Self {
            image: self.image.clone(),
            forced_black: true,
        }
    }
}

impl PartialEq for VideoFrame {
    fn eq(&self, other: &Self) -> bool {
        let same_image = match (&self.image, &other.image) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        same_image && self.forced_black == other.forced_black
    }
}

/// A video frame held for a duration.
#[derive(Clone, Debug)]
pub struct VideoChunk {
    frame: VideoFrame,
    duration: StreamTime,
}

impl VideoChunk {
    /// Holds `frame` for `duration` ticks.
    pub fn new(frame: VideoFrame, duration: StreamTime) -> Self {
        Self { frame, duration }
    }

    /// The frame displayed during this chunk.
    pub fn frame(&self) -> &VideoFrame {
        &self.frame
    }
}

impl Chunk for VideoChunk {
    fn duration(&self) -> StreamTime {
        self.duration
    }

    fn null(duration: StreamTime) -> Self {
        Self {
            frame: VideoFrame::default(),
            duration,
        }
    }

    fn is_null(&self) -> bool {
        self.frame.image.is_none()
    }

    fn slice(&self, start: StreamTime, end: StreamTime) -> Self {
        assert!(0 <= start && start <= end && end <= self.duration, "bad video slice");
        Self {
            frame: self.frame.clone(),
            duration: end - start,
        }
    }

    fn try_merge(&mut self, next: &Self) -> bool {
        if self.frame == next.frame {
            self.duration += next.duration;
            true
        } else {
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Segment
// ---------------------------------------------------------------------------

/// Chunks laid end to end.
#[derive(Clone, Debug)]
pub struct Segment<C> {
    chunks: Vec<C>,
    duration: StreamTime,
}

/// Audio data on a track timeline.
pub type AudioSegment = Segment<AudioChunk>;

/// Video data on a track timeline.
pub type VideoSegment = Segment<VideoChunk>;

impl<C: Chunk> Default for Segment<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Chunk> Segment<C> {
    /// Creates an empty segment.
    pub fn new() -> Self {
        Self {
            chunks: Vec::new(),
            duration: 0,
        }
    }

    /// Creates a segment made of `duration` null ticks.
    pub fn null(duration: StreamTime) -> Self {
        let mut segment = Self::new();
        segment.append_null(duration);
        segment
    }

    /// Total duration in ticks.
    pub fn duration(&self) -> StreamTime {
        self.duration
    }

    /// Chunks in timeline order.
    pub fn chunks(&self) -> &[C] {
        &self.chunks
    }

    /// Returns true if the segment has zero duration.
    pub fn is_empty(&self) -> bool {
        self.duration == 0
    }

    /// Returns true if every chunk is null.
    pub fn is_null(&self) -> bool {
        self.chunks.iter().all(Chunk::is_null)
    }

    /// Appends one chunk, merging it with the previous one where possible.
    pub fn append_chunk(&mut self, chunk: C) {
        let duration = chunk.duration();
        if duration == 0 {
            return;
        }
        self.duration += duration;
        if let Some(last) = self.chunks.last_mut()
            && last.try_merge(&chunk)
        {
            return;
        }
        self.chunks.push(chunk);
    }

    /// Appends `duration` ticks of null data.
    pub fn append_null(&mut self, duration: StreamTime) {
        assert!(duration >= 0, "negative null duration");
        self.append_chunk(C::null(duration));
    }

    /// Moves every chunk of `other` onto the end of this segment.
    pub fn append_segment(&mut self, other: Self) {
        for chunk in other.chunks {
            self.append_chunk(chunk);
        }
    }

    /// Appends the `[start, end)` range of `source`.
    pub fn append_slice(&mut self, source: &Self, start: StreamTime, end: StreamTime) {
        assert!(
            0 <= start && start <= end && end <= source.duration,
            "slice [{start}, {end}) outside segment of duration {}",
            source.duration
        );
        let mut offset = 0;
        for chunk in &source.chunks {
            if offset >= end {
                break;
            }
            let chunk_end = offset + chunk.duration();
            if chunk_end > start {
                let from = start.max(offset) - offset;
                let to = end.min(chunk_end) - offset;
                self.append_chunk(chunk.slice(from, to));
            }
            offset = chunk_end;
        }
    }

    /// Returns a copy of the `[start, end)` range.
    pub fn slice(&self, start: StreamTime, end: StreamTime) -> Self {
        let mut out = Self::new();
        out.append_slice(self, start, end);
        out
    }

    /// Drops data before `t`, keeping the timeline length by replacing it
    /// with a single null span.
    pub fn forget_up_to(&mut self, t: StreamTime) {
        let t = t.min(self.duration);
        if t <= 0 {
            return;
        }
        let old = std::mem::take(&mut self.chunks);
        self.duration = 0;
        self.append_null(t);
        let mut offset = 0;
        for chunk in old {
            let chunk_end = offset + chunk.duration();
            if chunk_end > t {
                if offset < t {
                    self.append_chunk(chunk.slice(t - offset, chunk.duration()));
                } else {
                    self.append_chunk(chunk);
                }
            }
            offset = chunk_end;
        }
    }

    /// Replaces all data with null data of the same duration.
    pub fn replace_with_null(&mut self) {
        let duration = self.duration;
        self.clear();
        self.append_null(duration);
    }

    /// Removes all chunks.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.duration = 0;
    }

    /// Returns the chunk covering tick `t` and its start offset.
    pub fn chunk_at(&self, t: StreamTime) -> Option<(StreamTime, &C)> {
        let mut offset = 0;
        for chunk in &self.chunks {
            let end = offset + chunk.duration();
            if t < end {
                return Some((offset, chunk));
            }
            offset = end;
        }
        None
    }
}

impl AudioSegment {
    /// Largest channel count of any chunk.
    pub fn max_channel_count(&self) -> usize {
        self.chunks
            .iter()
            .map(AudioChunk::channel_count)
            .max()
            .unwrap_or(0)
    }

    /// Multiplies every chunk's volume by `volume`.
    pub fn apply_volume(&mut self, volume: f32) {
        if volume == 1.0 {
            return;
        }
        for chunk in &mut self.chunks {
            chunk.scale_volume(volume);
        }
    }
}

impl VideoSegment {
    /// Appends `frame` held for `duration` ticks.
    pub fn append_frame(&mut self, frame: VideoFrame, duration: StreamTime) {
        self.append_chunk(VideoChunk::new(frame, duration));
    }
}

// ---------------------------------------------------------------------------
// Typed union
// ---------------------------------------------------------------------------

/// A segment of either media type.
#[derive(Clone, Debug)]
pub enum MediaSegment {
    /// Audio data.
    Audio(AudioSegment),
    /// Video data.
    Video(VideoSegment),
}

impl MediaSegment {
    /// Creates an empty segment of `kind`.
    pub fn empty(kind: TrackKind) -> Self {
        match kind {
            TrackKind::Audio => Self::Audio(AudioSegment::new()),
            TrackKind::Video => Self::Video(VideoSegment::new()),
        }
    }

    /// Media type of this segment.
    pub fn kind(&self) -> TrackKind {
        match self {
            Self::Audio(_) => TrackKind::Audio,
            Self::Video(_) => TrackKind::Video,
        }
    }

    /// Total duration in ticks.
    pub fn duration(&self) -> StreamTime {
        match self {
            Self::Audio(s) => s.duration(),
            Self::Video(s) => s.duration(),
        }
    }

    /// Returns true if every chunk is null.
    pub fn is_null(&self) -> bool {
        match self {
            Self::Audio(s) => s.is_null(),
            Self::Video(s) => s.is_null(),
        }
    }

    /// Appends `duration` ticks of null data.
    pub fn append_null(&mut self, duration: StreamTime) {
        match self {
            Self::Audio(s) => s.append_null(duration),
            Self::Video(s) => s.append_null(duration),
        }
    }

    /// Moves `other` onto the end of this segment. Kinds must match.
    pub fn append_segment(&mut self, other: MediaSegment) {
        match (self, other) {
            (Self::Audio(a), Self::Audio(b)) => a.append_segment(b),
            (Self::Video(a), Self::Video(b)) => a.append_segment(b),
            _ => panic!("appending a segment of a different media type"),
        }
    }

    /// Appends the `[start, end)` range of `source`. Kinds must match.
    pub fn append_slice(&mut self, source: &MediaSegment, start: StreamTime, end: StreamTime) {
        match (self, source) {
            (Self::Audio(a), Self::Audio(b)) => a.append_slice(b, start, end),
            (Self::Video(a), Self::Video(b)) => a.append_slice(b, start, end),
            _ => panic!("slicing from a segment of a different media type"),
        }
    }

    /// Returns a copy of the `[start, end)` range.
    pub fn slice(&self, start: StreamTime, end: StreamTime) -> Self {
        match self {
            Self::Audio(s) => Self::Audio(s.slice(start, end)),
            Self::Video(s) => Self::Video(s.slice(start, end)),
        }
    }

    /// See [`Segment::forget_up_to`].
    pub fn forget_up_to(&mut self, t: StreamTime) {
        match self {
            Self::Audio(s) => s.forget_up_to(t),
            Self::Video(s) => s.forget_up_to(t),
        }
    }

    /// Replaces all data with null data of the same duration.
    pub fn replace_with_null(&mut self) {
        match self {
            Self::Audio(s) => s.replace_with_null(),
            Self::Video(s) => s.replace_with_null(),
        }
    }

    /// Borrows the audio segment, if this is audio.
    pub fn as_audio(&self) -> Option<&AudioSegment> {
        match self {
            Self::Audio(s) => Some(s),
            Self::Video(_) => None,
        }
    }

    /// Mutably borrows the audio segment, if this is audio.
    pub fn as_audio_mut(&mut self) -> Option<&mut AudioSegment> {
        match self {
            Self::Audio(s) => Some(s),
            Self::Video(_) => None,
        }
    }

    /// Borrows the video segment, if this is video.
    pub fn as_video(&self) -> Option<&VideoSegment> {
        match self {
            Self::Video(s) => Some(s),
            Self::Audio(_) => None,
        }
    }
}

impl From<AudioChunk> for AudioSegment {
    fn from(chunk: AudioChunk) -> Self {
        let mut segment = Self::new();
        segment.append_chunk(chunk);
        segment
    }
}

impl From<AudioSegment> for MediaSegment {
    fn from(segment: AudioSegment) -> Self {
        Self::Audio(segment)
    }
}

impl From<VideoSegment> for MediaSegment {
    fn from(segment: VideoSegment) -> Self {
        Self::Video(segment)
    }
}
