//! Recording the mixed graph output to a WAV file.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use streamgraph_core::{MixerCallback, TrackRate};

use crate::{Error, Result};

type Writer = WavWriter<BufWriter<File>>;

struct Recording {
    writer: Option<Writer>,
    frames: u64,
    error: Option<hound::Error>,
}

/// Writes every finished mix to a 32-bit float WAV file.
///
/// Register a clone with
/// [`MediaStreamGraph::add_mixer_callback`](crate::MediaStreamGraph::add_mixer_callback)
/// and keep one to [`finalize`](Self::finalize) the file once the render
/// is done.
#[derive(Clone)]
pub struct WavRecorder {
    inner: Arc<Mutex<Recording>>,
    channels: u16,
    rate: TrackRate,
}

impl WavRecorder {
    /// Creates `path` for `channels` interleaved channels at `rate`.
    pub fn create(path: impl AsRef<Path>, channels: u16, rate: TrackRate) -> Result<Self> {
        let spec = WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let writer = WavWriter::create(path.as_ref(), spec)?;
        tracing::debug!(path = %path.as_ref().display(), channels, rate, "recording mixed output");
        Ok(Self {
            inner: Arc::new(Mutex::new(Recording {
                writer: Some(writer),
                frames: 0,
                error: None,
            })),
            channels,
            rate,
        })
    }

    /// Frames written so far.
    pub fn frames(&self) -> u64 {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).frames
    }

    /// Flushes the header and closes the file. Returns the frames written,
    /// or the first write error.
    pub fn finalize(&self) -> Result<u64> {
        let mut recording = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(error) = recording.error.take() {
            return Err(Error::Wav(error));
        }
        if let Some(writer) = recording.writer.take() {
            writer.finalize()?;
        }
        Ok(recording.frames)
    }
}

impl MixerCallback for WavRecorder {
    fn mixed(&mut self, data: &[f32], channels: usize, rate: TrackRate) {
        assert_eq!(
            (channels, rate),
            (usize::from(self.channels), self.rate),
            "mix format differs from the recording"
        );
        let mut recording = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let Recording { writer, frames, error } = &mut *recording;
        let Some(w) = writer.as_mut() else {
            return;
        };
        if error.is_some() {
            return;
        }
        for &sample in data {
            if let Err(e) = w.write_sample(sample) {
                tracing::warn!(error = %e, "stopping WAV recording");
                *error = Some(e);
                return;
            }
        }
        *frames += (data.len() / channels) as u64;
    }
}

/// Reads a WAV file as planar `f32` channels, with its sample rate.
/// Integer samples are scaled to `[-1.0, 1.0)`.
pub fn read_wav(path: impl AsRef<Path>) -> Result<(Vec<Vec<f32>>, TrackRate)> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()?,
        SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };

    let mut planar = vec![Vec::with_capacity(interleaved.len() / channels); channels];
    for frame in interleaved.chunks_exact(channels) {
        for (channel, sample) in planar.iter_mut().zip(frame) {
            channel.push(*sample);
        }
    }
    Ok((planar, spec.sample_rate))
}
