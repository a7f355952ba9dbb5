//! Drivers: who runs the graph's iterations, and when.
//!
//! Exactly one driver runs a graph at a time. Each start bumps a generation
//! counter; a driver checks its generation under the graph lock before
//! every iteration and stops for good once it is stale. A switch therefore
//! hands over between iterations, and the successor starts at the
//! predecessor's last committed watermark.
//!
//! Lock order is `active` before `core`. Drivers release the graph lock
//! before they call [`DriverContext::switch_to`]. The audio callback never
//! calls it: it posts a [`SwitchRequest`] to a helper thread instead.

mod audio_callback;
mod offline;
mod system_clock;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use streamgraph_core::{DriverKind, GraphCore, GraphShared, LifecycleState, millis_to_ticks};

use crate::backend::{AudioBackend, StreamHandle};
use crate::options::GraphOptions;

/// Poll interval while waiting on a driver during teardown.
const TEARDOWN_POLL: Duration = Duration::from_millis(1);

/// Switch requests that may wait for the helper thread at once.
const SWITCH_QUEUE: usize = 4;

/// A driver asking to be replaced by `kind`.
pub(crate) struct SwitchRequest {
    pub kind: DriverKind,
    pub from: u64,
}

enum Runner {
    Idle,
    Thread(JoinHandle<()>),
    Callback(StreamHandle),
}

struct ActiveDriver {
    kind: DriverKind,
    runner: Runner,
}

/// Everything the drivers of one graph share.
pub(crate) struct DriverContext {
    pub(crate) shared: Arc<GraphShared>,
    pub(crate) options: GraphOptions,
    core: Mutex<Option<GraphCore>>,
    backend: Mutex<Option<Box<dyn AudioBackend>>>,
    generation: AtomicU64,
    active: Mutex<ActiveDriver>,
    retired: Mutex<Vec<StreamHandle>>,
    paused: AtomicBool,
    switcher: Mutex<Option<mpsc::SyncSender<SwitchRequest>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DriverContext {
    pub(crate) fn new(options: GraphOptions, backend: Option<Box<dyn AudioBackend>>) -> Arc<Self> {
        let shared = Arc::new(GraphShared::new());
        let core = GraphCore::new(Arc::clone(&shared), options.core_options());
        let kind = core.driver_kind();
        Arc::new(Self {
            shared,
            options,
            core: Mutex::new(Some(core)),
            backend: Mutex::new(backend),
            generation: AtomicU64::new(0),
            active: Mutex::new(ActiveDriver {
                kind,
                runner: Runner::Idle,
            }),
            retired: Mutex::new(Vec::new()),
            paused: AtomicBool::new(false),
            switcher: Mutex::new(None),
        })
    }

    pub(crate) fn lock_core(&self) -> MutexGuard<'_, Option<GraphCore>> {
        lock(&self.core)
    }

    /// The graph lock, unless someone else holds it. Never blocks.
    pub(crate) fn try_lock_core(&self) -> Option<MutexGuard<'_, Option<GraphCore>>> {
        match self.core.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Runs `f` on the graph unless it was torn down.
    pub(crate) fn with_core<R>(&self, f: impl FnOnce(&mut GraphCore) -> R) -> Option<R> {
        self.lock_core().as_mut().map(f)
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    pub(crate) fn driver_kind(&self) -> DriverKind {
        lock(&self.active).kind
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
        self.shared.wake_up();
    }

    /// Driver a graph starts on, and is revived on.
    pub(crate) fn initial_driver(&self) -> DriverKind {
        if self.options.realtime {
            DriverKind::SystemClock
        } else {
            DriverKind::Offline
        }
    }

    /// Starts `kind`, replacing whatever runs now. With `from`, only the
    /// driver of that generation may hand over; a stale request is ignored.
    ///
    /// If the audio device cannot be opened the graph falls back to the
    /// system clock and stays off the device for the configured retry time.
    pub(crate) fn switch_to(self: &Arc<Self>, kind: DriverKind, from: Option<u64>) {
        let mut active = lock(&self.active);
        if let Some(generation) = from
            && !self.is_current(generation)
        {
            return;
        }
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let previous = std::mem::replace(&mut active.runner, Runner::Idle);
        match previous {
            // A thread may be the caller; it exits once it sees the new generation.
            Runner::Thread(_) | Runner::Idle => {}
            Runner::Callback(stream) => lock(&self.retired).push(stream),
        }

        let from_kind = active.kind;
        let mut started = kind;
        if kind == DriverKind::AudioCallback {
            self.with_core(|core| core.driver_switched(DriverKind::AudioCallback));
            match audio_callback::start(self, generation) {
                Ok(stream) => active.runner = Runner::Callback(stream),
                Err(e) => {
                    tracing::warn!(error = %e, "audio device unavailable, falling back to system clock");
                    self.defer_audio_callback();
                    started = DriverKind::SystemClock;
                }
            }
        }

        if started != DriverKind::AudioCallback {
            self.with_core(|core| core.driver_switched(started));
            let spawned = if started == DriverKind::Offline {
                offline::spawn(Arc::clone(self), generation)
            } else {
                system_clock::spawn(Arc::clone(self), generation)
            };
            match spawned {
                Ok(handle) => active.runner = Runner::Thread(handle),
                Err(e) => tracing::error!(error = %e, driver = %started, "failed to spawn driver thread"),
            }
        }

        active.kind = started;
        tracing::info!(from = %from_kind, to = %started, generation, "driver started");
    }

    /// Sender for switch requests made where blocking is not allowed. The
    /// helper thread that carries them out starts on first use and holds
    /// the context only while it switches.
    pub(crate) fn switch_sender(self: &Arc<Self>) -> Option<mpsc::SyncSender<SwitchRequest>> {
        let mut slot = lock(&self.switcher);
        if let Some(tx) = slot.as_ref() {
            return Some(tx.clone());
        }
        let (tx, rx) = mpsc::sync_channel::<SwitchRequest>(SWITCH_QUEUE);
        let weak = Arc::downgrade(self);
        let spawned = thread::Builder::new()
            .name("streamgraph-driver-switch".into())
            .spawn(move || {
                while let Ok(request) = rx.recv() {
                    let Some(ctx) = weak.upgrade() else {
                        break;
                    };
                    Self::switch_to(&ctx, request.kind, Some(request.from));
                }
            });
        match spawned {
            Ok(_) => {
                *slot = Some(tx.clone());
                Some(tx)
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to spawn driver switch thread");
                None
            }
        }
    }

    /// The audio device failed under the driver of `generation`.
    pub(crate) fn audio_failed(self: &Arc<Self>, generation: u64, reason: &str) {
        if !self.is_current(generation) {
            return;
        }
        tracing::warn!(reason, "audio stream failed, falling back to system clock");
        self.defer_audio_callback();
        Self::switch_to(self, DriverKind::SystemClock, Some(generation));
    }

    fn defer_audio_callback(&self) {
        let ticks = millis_to_ticks(self.options.fallback_retry.as_millis() as u64, self.options.rate);
        self.with_core(|core| core.defer_audio_callback(ticks));
    }

    pub(crate) fn with_backend<R>(&self, f: impl FnOnce(&dyn AudioBackend) -> R) -> Option<R> {
        let guard = lock(&self.backend);
        let backend: &dyn AudioBackend = guard.as_deref()?;
        Some(f(backend))
    }

    /// Main-thread housekeeping: drops streams of replaced audio drivers,
    /// then revives or tears down a graph whose thread stopped.
    pub(crate) fn process_main_thread_updates(self: &Arc<Self>) {
        let retired = std::mem::take(&mut *lock(&self.retired));
        if !retired.is_empty() {
            drop_streams(retired, Instant::now() + self.options.shutdown_timeout);
        }
        match self.shared.begin_cleanup() {
            Some(streamgraph_core::CleanupAction::Revive) => {
                tracing::info!("messages arrived after the graph stopped, reviving");
                Self::switch_to(self, self.initial_driver(), None);
            }
            Some(streamgraph_core::CleanupAction::ShutDown) => self.teardown(self.options.shutdown_timeout),
            None => {}
        }
    }

    /// Stops the driver, destroys every stream and moves to
    /// [`LifecycleState::Stopped`]. A driver or device that does not let go
    /// within `timeout` is leaked.
    pub(crate) fn teardown(&self, timeout: Duration) {
        if self.shared.lifecycle() == LifecycleState::Stopped {
            return;
        }
        let deadline = Instant::now() + timeout;
        self.shared.set_lifecycle(LifecycleState::WaitingForThreadShutdown);
        self.shared.wake_up();

        let runner = {
            let mut active = lock(&self.active);
            self.generation.fetch_add(1, Ordering::AcqRel);
            std::mem::replace(&mut active.runner, Runner::Idle)
        };
        let mut streams = std::mem::take(&mut *lock(&self.retired));
        match runner {
            Runner::Thread(handle) => join_until(handle, deadline),
            Runner::Callback(stream) => streams.push(stream),
            Runner::Idle => {}
        }
        if !streams.is_empty() {
            drop_streams(streams, deadline);
        }

        match self.take_core(deadline) {
            Some(mut core) => {
                core.destroy_all_streams();
                tracing::debug!(
                    processed = core.processed_time(),
                    iterations = core.iterations(),
                    "graph destroyed"
                );
            }
            None => tracing::warn!("graph still locked after shutdown timeout, leaking it"),
        }

        for message in self.shared.drain_messages() {
            message.run_during_shutdown();
        }
        self.shared.set_lifecycle(LifecycleState::Stopped);
        tracing::info!("graph stopped");
    }

    fn take_core(&self, deadline: Instant) -> Option<GraphCore> {
        loop {
            if let Some(mut slot) = self.try_lock_core() {
                return slot.take();
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(TEARDOWN_POLL);
        }
    }
}

fn join_until(handle: JoinHandle<()>, deadline: Instant) {
    if handle.thread().id() == thread::current().id() {
        return;
    }
    loop {
        if handle.is_finished() {
            if handle.join().is_err() {
                tracing::error!("driver thread panicked");
            }
            return;
        }
        if Instant::now() >= deadline {
            tracing::warn!("driver thread did not stop in time, detaching it");
            return;
        }
        thread::sleep(TEARDOWN_POLL);
    }
}

/// Drops backend streams on a helper thread so a hanging backend cannot
/// hang the caller past `deadline`.
fn drop_streams(streams: Vec<StreamHandle>, deadline: Instant) {
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("streamgraph-stream-close".into())
        .spawn(move || {
            drop(streams);
            let _ = tx.send(());
        });
    match spawned {
        Ok(_) => {
            if rx.recv_timeout(deadline.saturating_duration_since(Instant::now())).is_err() {
                tracing::warn!("audio backend did not close its stream in time, leaking it");
            }
        }
        Err(e) => tracing::warn!(error = %e, "could not spawn stream close thread"),
    }
}
