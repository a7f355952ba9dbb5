//! One scheduler iteration.

use std::collections::HashMap;
use std::sync::Arc;

use super::GraphCore;
use crate::listener::StreamEvent;
use crate::ordering::{OrderNode, compute_order};
use crate::segment::TrackKind;
use crate::shared::{DriverKind, LifecycleState, StreamSnapshot};
use crate::stream::{GraphView, MediaStream, StreamId, StreamKind};
use crate::time::{BLOCK_SIZE, GraphTime, StreamTime, round_up_to_block};

/// Data is only forgotten in spans of at least this many ticks.
const MIN_FORGET_TICKS: StreamTime = 2400;

impl GraphCore {
    /// Runs one iteration, computing state up to `state_end` (rounded up to
    /// a block and clamped to the end time).
    ///
    /// Returns false once the graph should stop: shutdown was forced, a
    /// non-realtime graph reached its end time, or the graph has no streams
    /// and no pending messages. The lifecycle then moves to
    /// [`LifecycleState::WaitingForMainThreadCleanup`].
    pub fn one_iteration(&mut self, state_end: GraphTime) -> bool {
        let state_end = round_up_to_block(state_end)
            .min(self.end_time)
            .max(self.state_computed_time);

        self.run_messages();
        if self.order_dirty {
            self.update_stream_order();
        }
        if self.realtime {
            self.check_driver();
        }
        self.update_graph(state_end);
        self.state_computed_time = state_end;

        let prev = self.processed_time;
        self.process();
        self.processed_time = self.state_computed_time;
        self.update_current_time_for_streams(prev);

        self.iterations += 1;
        self.update_main_thread_state()
    }

    fn run_messages(&mut self) {
        let mut queue = std::mem::take(&mut self.front_queue);
        self.shared.swap_messages(&mut queue);
        for message in queue.drain(..) {
            message.run(self);
        }
        self.front_queue = queue;
    }

    fn update_stream_order(&mut self) {
        self.order_dirty = false;
        let index_of: HashMap<StreamId, usize> = self
            .streams
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i))
            .collect();
        let nodes: Vec<OrderNode> = self
            .streams
            .iter()
            .map(|&id| match self.stream(id) {
                Some(stream) => OrderNode {
                    is_processed: stream.is_processed(),
                    is_cycle_breaker: stream.is_cycle_breaker(),
                    inputs: stream
                        .kind()
                        .processed()
                        .map(|p| {
                            p.inputs()
                                .iter()
                                .filter_map(|port| self.port(*port))
                                .filter_map(|port| index_of.get(&port.source()).copied())
                                .collect()
                        })
                        .unwrap_or_default(),
                },
                None => OrderNode::default(),
            })
            .collect();

        let result = compute_order(&nodes);
        let muted: Vec<(StreamId, bool)> = self
            .streams
            .iter()
            .copied()
            .zip(result.in_muted_cycle.iter().copied())
            .collect();
        self.streams = result.order.iter().map(|&i| self.streams[i]).collect();
        self.first_cycle_breaker = result.first_cycle_breaker;
        for (id, in_muted_cycle) in muted {
            if let Some(inputs) = self.stream_mut(id).and_then(|s| s.kind.processed_mut()) {
                inputs.in_muted_cycle = in_muted_cycle;
            }
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(
            streams = self.streams.len(),
            first_cycle_breaker = self.first_cycle_breaker,
            "stream order updated"
        );
    }

    /// Requests the audio-callback driver while anything is audible and the
    /// system-clock driver otherwise.
    fn check_driver(&mut self) {
        let needs_audio = self.streams.iter().filter_map(|id| self.stream(*id)).any(|s| {
            let state = s.state();
            (s.kind().as_audio_node().is_some() && !state.is_finished())
                || (state.has_audio_outputs() && state.tracks().tracks_of(TrackKind::Audio).next().is_some())
        });
        let wanted = if needs_audio && self.processed_time >= self.audio_retry_at {
            DriverKind::AudioCallback
        } else {
            DriverKind::SystemClock
        };
        self.pending_switch = (wanted != self.driver).then_some(wanted);
    }

    /// Pulls and extracts source data, then decides each stream's blocking
    /// start for `[state_computed_time, state_end)`.
    fn update_graph(&mut self, state_end: GraphTime) {
        let state_computed = self.state_computed_time;
        for &id in &self.streams {
            let Some(stream) = self.arena.get_mut(id.index() as usize).and_then(Option::as_mut) else {
                continue;
            };
            if let StreamKind::Source(source) = &mut stream.kind {
                source.pull_new_data(&stream.state, state_end);
                source.extract_pending_input(&mut stream.state);
            }
            stream.state.start_blocking = if stream.state.finished {
                let end = stream
                    .state
                    .stream_time_to_graph_time(stream.state.tracks.all_tracks_end());
                if end <= state_computed {
                    state_computed
                } else {
                    end.min(state_end)
                }
            } else {
                will_underrun(stream, state_computed, state_end)
            };
        }
        for &id in &self.suspended {
            if let Some(stream) = self.arena.get_mut(id.index() as usize).and_then(Option::as_mut) {
                stream.state.start_blocking = state_computed;
            }
        }
    }

    fn process(&mut self) {
        let from = self.processed_time;
        let to = self.state_computed_time;
        let mixing = matches!(self.driver, DriverKind::AudioCallback | DriverKind::Offline);
        if mixing {
            self.mixer.start_mixing();
        }

        if from < to {
            for i in 0..self.streams.len() {
                let id = self.streams[i];
                if self.stream(id).is_some_and(|s| s.kind().as_audio_node().is_some()) {
                    self.produce_block_by_block(i, from, to);
                    break;
                }
                self.process_stream(id, from, to, true);
            }
        }

        if mixing {
            self.play_audio(from, to);
            self.mixer.finish_mixing(usize::try_from(to - from).unwrap_or(0));
        }
        self.play_video(to);
    }

    /// Runs the streams from `start` on, one block at a time, so feedback
    /// through cycle breakers stays one block behind.
    fn produce_block_by_block(&mut self, start: usize, from: GraphTime, to: GraphTime) {
        let mut t = from;
        while t < to {
            let next = t + BLOCK_SIZE as GraphTime;
            for i in self.first_cycle_breaker..self.streams.len() {
                let slot = self.streams[i].index() as usize;
                if let Some(stream) = self.arena.get_mut(slot).and_then(Option::as_mut) {
                    stream.produce_output_before_input(t);
                }
            }
            for i in start..self.streams.len() {
                self.process_stream(self.streams[i], t, next, next == to);
            }
            t = next;
        }
    }

    /// Takes a stream out of its slot and lets it read the rest of the graph.
    fn process_stream(&mut self, id: StreamId, from: GraphTime, to: GraphTime, allow_finish: bool) {
        let slot = id.index() as usize;
        let Some(mut stream) = self.arena.get_mut(slot).and_then(Option::take) else {
            return;
        };
        let view = GraphView {
            streams: &self.arena,
            ports: &self.ports,
            rate: self.rate,
        };
        stream.process_input(&view, from, to, allow_finish);
        self.arena[slot] = Some(stream);
    }

    /// Commits blocking decisions for `[prev, processed_time)` and tells
    /// listeners what changed.
    fn update_current_time_for_streams(&mut self, prev: GraphTime) {
        let processed = self.processed_time;
        let state_computed = self.state_computed_time;
        let mut finished = Vec::new();

        for &id in self.streams.iter().chain(&self.suspended) {
            let Some(stream) = self.arena.get_mut(id.index() as usize).and_then(Option::as_mut) else {
                continue;
            };
            let state = &mut stream.state;
            let blocked_from = state.start_blocking.clamp(prev, processed);
            let any_unblocked = blocked_from > prev;
            let any_blocked = blocked_from < processed;
            state.tracks_start_time += processed - blocked_from;
            state.start_blocking = state_computed;

            let time = state.graph_time_to_stream_time(processed);
            if time >= state.tracks.forgotten_time() + MIN_FORGET_TICKS {
                let forget_to = (state.tracks.end() - 1).min(time);
                if forget_to > state.tracks.forgotten_time() {
                    state.tracks.forget_up_to(forget_to);
                }
            }

            if any_unblocked && state.notified_blocked {
                state.notified_blocked = false;
                state.notify(&StreamEvent::Unblocked);
            }
            if any_blocked && !state.notified_blocked {
                state.notified_blocked = true;
                state.notify(&StreamEvent::Blocked);
            }
            if any_unblocked {
                state.notify(&StreamEvent::Output(processed));
            }
            if state.has_current_data && !state.notified_has_current_data {
                state.notified_has_current_data = true;
                state.notify(&StreamEvent::HasCurrentData);
            }

            if state.finished
                && !state.notified_finished
                && processed >= state.stream_time_to_graph_time(state.tracks.all_tracks_end())
            {
                state.notified_finished = true;
                finished.push(id);
            }
        }

        if !finished.is_empty() {
            self.order_dirty = true;
        }
        for id in finished {
            #[cfg(feature = "tracing")]
            tracing::debug!("stream {id} finished at {processed}");
            if let Some(stream) = self.stream_mut(id) {
                stream.state.notify(&StreamEvent::Finished);
            }
        }
    }

    fn all_finished_streams_notified(&self) -> bool {
        self.streams
            .iter()
            .chain(&self.suspended)
            .filter_map(|id| self.stream(*id))
            .all(|s| !s.state.finished || s.state.notified_finished)
    }

    /// Publishes the snapshot, then decides under the queue lock whether
    /// this was the final iteration.
    fn update_main_thread_state(&mut self) -> bool {
        let shared = Arc::clone(&self.shared);
        let reached_end = self.processed_time >= self.end_time && self.all_finished_streams_notified();
        let may_stop = shared.is_force_shutdown() || reached_end || self.is_empty();

        shared.publish(may_stop, |snapshot| {
            snapshot.processed_time = self.processed_time;
            snapshot.state_computed_time = self.state_computed_time;
            snapshot.driver = self.driver;
            snapshot.iterations = self.iterations;
            snapshot.streams.clear();
            for stream in self
                .streams
                .iter()
                .chain(&self.suspended)
                .filter_map(|id| self.stream(*id))
            {
                let state = stream.state();
                snapshot.streams.insert(
                    stream.id(),
                    StreamSnapshot {
                        current_time: state.graph_time_to_stream_time(self.processed_time),
                        blocked: state.is_blocked(),
                        finished: state.is_notified_finished(),
                    },
                );
            }
        });
        if !may_stop {
            return true;
        }

        let mut queue = shared.lock_queue();
        let final_update = shared.is_force_shutdown() || reached_end || queue.messages.is_empty();
        if !final_update {
            return true;
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(
            processed = self.processed_time,
            forced = shared.is_force_shutdown(),
            "graph iteration loop ending"
        );
        queue.lifecycle = LifecycleState::WaitingForMainThreadCleanup;
        false
    }
}

/// Graph time at which `stream` runs out of data, within the decision
/// window. Processed streams never underrun; they produce what they need.
fn will_underrun(stream: &MediaStream, state_computed: GraphTime, state_end: GraphTime) -> GraphTime {
    if stream.is_processed() {
        return state_end;
    }
    let state = stream.state();
    let end = state.stream_time_to_graph_time(state.tracks().end());
    if end < state_end {
        #[cfg(feature = "tracing")]
        tracing::trace!("stream {} underruns at {end}", stream.id());
    }
    end.clamp(state_computed, state_end)
}
