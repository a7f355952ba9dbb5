//! A backend whose callback runs only when asked to.
//!
//! [`ManualBackend`] stands in for a sound card in tests: the driver builds
//! a stream as usual, and the test calls [`ManualBackend::pump`] to run the
//! callback for an exact number of frames on its own thread. Device failure
//! is simulated with [`ManualBackend::fail_next_build`] and
//! [`ManualBackend::trigger_error`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::backend::{AudioBackend, BackendStreamConfig, ErrorCallback, OutputCallback, StreamHandle};
use crate::{AudioDevice, Error, Result};

struct ManualStream {
    id: u64,
    channels: usize,
    callback: Option<OutputCallback>,
    error_callback: Option<ErrorCallback>,
    ended: bool,
}

#[derive(Default)]
struct ManualState {
    stream: Option<ManualStream>,
    next_id: u64,
    builds: usize,
    fail_next: bool,
    last_config: Option<BackendStreamConfig>,
}

/// Backend pumped by hand. Clones share the same device.
#[derive(Clone, Default)]
pub struct ManualBackend {
    state: Arc<Mutex<ManualState>>,
}

struct ManualStreamGuard {
    state: Arc<Mutex<ManualState>>,
    id: u64,
}

impl Drop for ManualStreamGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.stream.as_ref().is_some_and(|s| s.id == self.id) {
            state.stream = None;
        }
    }
}

impl ManualBackend {
    /// A backend with no stream.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the next `build_output_stream` fail as if the device were
    /// missing.
    pub fn fail_next_build(&self) {
        self.lock().fail_next = true;
    }

    /// Number of stream builds attempted, failed ones included.
    pub fn builds(&self) -> usize {
        self.lock().builds
    }

    /// Configuration of the last build attempt.
    pub fn last_config(&self) -> Option<BackendStreamConfig> {
        self.lock().last_config.clone()
    }

    /// Returns true while a stream is open and has not signalled its end.
    pub fn is_streaming(&self) -> bool {
        self.lock().stream.as_ref().is_some_and(|s| !s.ended)
    }

    /// Runs the callback for `frames` frames and returns the interleaved
    /// output with the frame count the callback reported, or `None` when no
    /// stream is running.
    pub fn pump(&self, frames: usize) -> Option<(Vec<f32>, usize)> {
        let (id, channels, mut callback) = {
            let mut state = self.lock();
            let stream = state.stream.as_mut().filter(|s| !s.ended)?;
            (stream.id, stream.channels, stream.callback.take()?)
        };

        let mut buffer = vec![0.0; frames * channels];
        let written = callback(&mut buffer);

        let mut state = self.lock();
        if let Some(stream) = state.stream.as_mut().filter(|s| s.id == id) {
            stream.callback = Some(callback);
            stream.ended = written < frames;
        }
        Some((buffer, written))
    }

    /// Reports a stream failure through the error callback.
    pub fn trigger_error(&self, reason: &str) {
        let taken = {
            let mut state = self.lock();
            state
                .stream
                .as_mut()
                .and_then(|s| s.error_callback.take().map(|cb| (s.id, cb)))
        };
        let Some((id, mut error_callback)) = taken else {
            return;
        };
        error_callback(reason);
        if let Some(stream) = self.lock().stream.as_mut().filter(|s| s.id == id) {
            stream.error_callback = Some(error_callback);
        }
    }
}

impl AudioBackend for ManualBackend {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn list_devices(&self) -> Result<Vec<AudioDevice>> {
        Ok(self.default_output_device()?.into_iter().collect())
    }

    fn default_output_device(&self) -> Result<Option<AudioDevice>> {
        Ok(Some(AudioDevice {
            name: "Manual Output".to_string(),
            is_input: false,
            is_output: true,
            default_sample_rate: 48000,
        }))
    }

    fn build_output_stream(
        &self,
        config: &BackendStreamConfig,
        callback: OutputCallback,
        error_callback: ErrorCallback,
    ) -> Result<StreamHandle> {
        let mut state = self.lock();
        state.builds += 1;
        state.last_config = Some(config.clone());
        if std::mem::take(&mut state.fail_next) {
            return Err(Error::NoDevice);
        }
        state.next_id += 1;
        let id = state.next_id;
        state.stream = Some(ManualStream {
            id,
            channels: usize::from(config.channels.max(1)),
            callback: Some(callback),
            error_callback: Some(error_callback),
            ended: false,
        });
        Ok(StreamHandle::new(ManualStreamGuard {
            state: Arc::clone(&self.state),
            id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn build(backend: &ManualBackend, callback: OutputCallback) -> Result<StreamHandle> {
        backend.build_output_stream(&BackendStreamConfig::default(), callback, Box::new(|_: &str| {}))
    }

    #[test]
    fn test_pump_without_stream() {
        assert!(ManualBackend::new().pump(64).is_none());
    }

    #[test]
    fn test_pump_fills_buffer() {
        let backend = ManualBackend::new();
        let _handle = build(
            &backend,
            Box::new(|buf: &mut [f32]| {
                buf.fill(0.25);
                buf.len() / 2
            }),
        )
        .unwrap();
        let (data, written) = backend.pump(64).unwrap();
        assert_eq!(data.len(), 128);
        assert_eq!(written, 64);
        assert!(data.iter().all(|s| *s == 0.25));
        assert!(backend.is_streaming());
    }

    #[test]
    fn test_short_write_ends_stream() {
        let backend = ManualBackend::new();
        let _handle = build(&backend, Box::new(|_: &mut [f32]| 3)).unwrap();
        assert_eq!(backend.pump(64).unwrap().1, 3);
        assert!(!backend.is_streaming());
        assert!(backend.pump(64).is_none());
    }

    #[test]
    fn test_drop_handle_stops() {
        let backend = ManualBackend::new();
        let handle = build(&backend, Box::new(|buf: &mut [f32]| buf.len() / 2)).unwrap();
        drop(handle);
        assert!(backend.pump(64).is_none());
    }

    #[test]
    fn test_fail_next_build_once() {
        let backend = ManualBackend::new();
        backend.fail_next_build();
        assert!(matches!(build(&backend, Box::new(|_: &mut [f32]| 0)), Err(Error::NoDevice)));
        assert!(build(&backend, Box::new(|_: &mut [f32]| 0)).is_ok());
        assert_eq!(backend.builds(), 2);
    }

    #[test]
    fn test_trigger_error_reaches_callback() {
        let backend = ManualBackend::new();
        let errors = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&errors);
        let _handle = backend
            .build_output_stream(
                &BackendStreamConfig::default(),
                Box::new(|buf: &mut [f32]| buf.len()),
                Box::new(move |_: &str| {
                    seen.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        backend.trigger_error("unplugged");
        backend.trigger_error("unplugged");
        assert_eq!(errors.load(Ordering::SeqCst), 2);
    }
}
