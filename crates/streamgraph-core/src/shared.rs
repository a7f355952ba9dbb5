//! State shared between the graph thread and the threads that control it.
//!
//! The only lock the graph thread takes on its hot path is the message
//! queue lock, held just long enough to swap the queue out. Snapshots for
//! the main thread are published at iteration boundaries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::message::ControlMessage;
use crate::port::PortId;
use crate::stream::StreamId;
use crate::time::{GraphTime, StreamTime};

/// Which driver runs the graph's iterations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum DriverKind {
    /// A dedicated thread paced by the system clock.
    #[default]
    SystemClock,
    /// As fast as possible, for non-realtime rendering.
    Offline,
    /// The native audio backend's realtime callback.
    AudioCallback,
}

impl core::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::SystemClock => "system-clock",
            Self::Offline => "offline",
            Self::AudioCallback => "audio-callback",
        })
    }
}

/// Lifecycle of the graph thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    /// No driver has been started yet.
    NotStarted,
    /// A driver is running iterations.
    Running,
    /// The graph thread stopped and waits for the main thread to either
    /// revive it or tear it down.
    WaitingForMainThreadCleanup,
    /// Teardown decided; the driver is being shut down.
    WaitingForThreadShutdown,
    /// Fully stopped. Messages now run their shutdown fallback.
    Stopped,
}

/// What the main thread does with a graph whose thread has stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CleanupAction {
    /// Messages arrived meanwhile; start a driver again.
    Revive,
    /// Nothing pending; tear the graph down.
    ShutDown,
}

/// Per-stream state visible to the main thread.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamSnapshot {
    /// Stream time at the processed watermark.
    pub current_time: StreamTime,
    /// True while listeners consider the stream blocked.
    pub blocked: bool,
    /// True once the finished event has been delivered.
    pub finished: bool,
}

/// Graph state visible to the main thread, published once per iteration.
#[derive(Clone, Debug, Default)]
pub struct GraphSnapshot {
    /// Processed watermark.
    pub processed_time: GraphTime,
    /// State-computed watermark.
    pub state_computed_time: GraphTime,
    /// Driver that ran the iteration.
    pub driver: DriverKind,
    /// Live streams.
    pub streams: HashMap<StreamId, StreamSnapshot>,
    /// Completed iterations.
    pub iterations: u64,
}

pub(crate) struct QueueState {
    pub messages: Vec<ControlMessage>,
    pub lifecycle: LifecycleState,
    pub wake_pending: bool,
}

/// Queue, lifecycle and snapshot shared by a graph's threads.
pub struct GraphShared {
    queue: Mutex<QueueState>,
    wake: Condvar,
    snapshot: Mutex<GraphSnapshot>,
    next_stream_id: AtomicU32,
    next_port_id: AtomicU32,
    force_shutdown: AtomicBool,
}

impl Default for GraphShared {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphShared {
    /// Creates shared state for a graph that has not started.
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(QueueState {
                messages: Vec::new(),
                lifecycle: LifecycleState::NotStarted,
                wake_pending: false,
            }),
            wake: Condvar::new(),
            snapshot: Mutex::new(GraphSnapshot::default()),
            next_stream_id: AtomicU32::new(0),
            next_port_id: AtomicU32::new(0),
            force_shutdown: AtomicBool::new(false),
        }
    }

    pub(crate) fn lock_queue(&self) -> MutexGuard<'_, QueueState> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserves a fresh stream id.
    pub fn allocate_stream_id(&self) -> StreamId {
        StreamId::from_index(self.next_stream_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Reserves a fresh port id.
    pub fn allocate_port_id(&self) -> PortId {
        PortId::from_index(self.next_port_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Queues `message` for the next iteration and wakes a waiting driver.
    ///
    /// If the graph thread has already stopped for good, the message's
    /// shutdown fallback runs on the calling thread instead.
    pub fn append_message(&self, message: ControlMessage) {
        let mut queue = self.lock_queue();
        if queue.lifecycle >= LifecycleState::WaitingForThreadShutdown {
            drop(queue);
            #[cfg(feature = "tracing")]
            tracing::trace!("graph stopped, running message shutdown fallback");
            message.run_during_shutdown();
            return;
        }
        queue.messages.push(message);
        queue.wake_pending = true;
        drop(queue);
        self.wake.notify_all();
    }

    /// Moves every queued message into `out`, preserving order.
    pub(crate) fn swap_messages(&self, out: &mut Vec<ControlMessage>) {
        let mut queue = self.lock_queue();
        std::mem::swap(&mut queue.messages, out);
    }

    /// Returns true if messages are waiting for the next iteration.
    pub fn has_pending_messages(&self) -> bool {
        !self.lock_queue().messages.is_empty()
    }

    /// Removes every queued message without running it.
    pub fn drain_messages(&self) -> Vec<ControlMessage> {
        std::mem::take(&mut self.lock_queue().messages)
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> LifecycleState {
        self.lock_queue().lifecycle
    }

    /// Moves to `state`.
    pub fn set_lifecycle(&self, state: LifecycleState) {
        self.lock_queue().lifecycle = state;
    }

    /// Moves from `current` to `next` if the lifecycle is still `current`.
    pub fn transition_lifecycle(&self, current: LifecycleState, next: LifecycleState) -> bool {
        let mut queue = self.lock_queue();
        if queue.lifecycle != current {
            return false;
        }
        queue.lifecycle = next;
        true
    }

    /// Resolves a stopped graph thread under the queue lock, so a message
    /// appended concurrently either revives the graph or runs its shutdown
    /// fallback, never neither.
    pub fn begin_cleanup(&self) -> Option<CleanupAction> {
        let mut queue = self.lock_queue();
        if queue.lifecycle != LifecycleState::WaitingForMainThreadCleanup {
            return None;
        }
        if queue.messages.is_empty() {
            queue.lifecycle = LifecycleState::WaitingForThreadShutdown;
            Some(CleanupAction::ShutDown)
        } else {
            queue.lifecycle = LifecycleState::Running;
            Some(CleanupAction::Revive)
        }
    }

    /// Cuts short any wait in [`wait_timeout`](Self::wait_timeout).
    pub fn wake_up(&self) {
        self.lock_queue().wake_pending = true;
        self.wake.notify_all();
    }

    /// Sleeps up to `timeout`, returning early when a message is appended
    /// or [`wake_up`](Self::wake_up) is called. Returns true if woken.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut queue = self.lock_queue();
        if queue.wake_pending {
            queue.wake_pending = false;
            return true;
        }
        let (mut queue, _) = self
            .wake
            .wait_timeout_while(queue, timeout, |q| !q.wake_pending)
            .unwrap_or_else(PoisonError::into_inner);
        let woken = queue.wake_pending;
        queue.wake_pending = false;
        woken
    }

    /// Asks the graph thread to stop after its current iteration.
    pub fn request_force_shutdown(&self) {
        self.force_shutdown.store(true, Ordering::Release);
        self.wake_up();
    }

    /// Returns true once a forced shutdown was requested.
    pub fn is_force_shutdown(&self) -> bool {
        self.force_shutdown.load(Ordering::Acquire)
    }

    /// Copy of the last published snapshot.
    pub fn snapshot(&self) -> GraphSnapshot {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Published state of one stream.
    pub fn stream_snapshot(&self, id: StreamId) -> Option<StreamSnapshot> {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .streams
            .get(&id)
            .copied()
    }

    /// Publishes from the graph thread. Unless `force` is set, a contended
    /// lock skips this publication rather than block; the next iteration
    /// publishes again.
    pub(crate) fn publish(&self, force: bool, update: impl FnOnce(&mut GraphSnapshot)) {
        let guard = if force {
            Some(self.snapshot.lock().unwrap_or_else(PoisonError::into_inner))
        } else {
            self.snapshot.try_lock().ok()
        };
        if let Some(mut snapshot) = guard {
            update(&mut snapshot);
        }
    }
}
