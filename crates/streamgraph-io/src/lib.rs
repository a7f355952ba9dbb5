//! Drivers and main-thread API for streamgraph media graphs.
//!
//! This crate runs a [`streamgraph_core::GraphCore`] and lets other threads
//! control it:
//!
//! - **Drivers**: a system-clock thread, an offline renderer, and the
//!   realtime callback of an audio device, with switching between them
//! - **Backends**: the [`AudioBackend`] trait, [`CpalBackend`] for real
//!   devices and [`ManualBackend`] for deterministic tests
//! - **Handles**: [`MediaStreamGraph`], [`MediaStreamHandle`] and
//!   [`InputPortHandle`], which only ever send control messages
//! - **Registry**: one graph per window and rate on the main thread
//! - **Capture**: [`WavRecorder`] writes the mixed output to disk
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use streamgraph_core::{AudioChunk, AudioSegment, MediaSegment, TrackId};
//! use streamgraph_io::{GraphOptions, MediaStreamGraph, WavRecorder};
//!
//! let graph = MediaStreamGraph::new(GraphOptions::offline(48000));
//! let source = graph.create_source_stream();
//! source.feed().add_track(TrackId(1), 0, MediaSegment::Audio(AudioSegment::from(AudioChunk::mono(&samples))));
//! source.feed().finish();
//! source.add_audio_output(1, 1.0);
//!
//! let recorder = WavRecorder::create("out.wav", 2, 48000)?;
//! graph.add_mixer_callback(Box::new(recorder.clone()));
//! graph.start_offline(samples.len() as i64)?;
//! graph.wait_until_stopped(std::time::Duration::from_secs(10));
//! recorder.finalize()?;
//! ```

pub mod backend;
pub mod cpal_backend;
mod devices;
mod driver;
mod graph;
mod handle;
pub mod manual_backend;
mod options;
pub mod registry;
mod wav;

pub use backend::{AudioBackend, BackendStreamConfig, ErrorCallback, OutputCallback, StreamHandle};
pub use cpal_backend::CpalBackend;
pub use devices::{AudioDevice, default_output_device, list_devices};
pub use graph::MediaStreamGraph;
pub use handle::{InputPortHandle, MediaStreamHandle, SourceStreamHandle};
pub use manual_backend::ManualBackend;
pub use options::GraphOptions;
pub use wav::{WavRecorder, read_wav};

/// Error types for drivers, devices and capture.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// WAV file read/write error.
    #[error("WAV file error: {0}")]
    Wav(#[from] hound::Error),

    /// Audio stream setup or runtime error.
    #[error("Audio stream error: {0}")]
    Stream(String),

    /// No audio device available on the system.
    #[error("No audio device available")]
    NoDevice,

    /// The requested audio device was not found.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// The graph has already shut down.
    #[error("Graph has shut down")]
    ShutDown,

    /// Standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
