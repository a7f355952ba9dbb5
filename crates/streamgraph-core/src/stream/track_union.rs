//! Track-union streams: every input track passes through to an output track.

use super::{GraphView, MediaStream, ProcessedInputs, StreamState};
use crate::listener::TrackChange;
use crate::port::{InputPort, PortId};
use crate::segment::MediaSegment;
use crate::time::GraphTime;
use crate::tracks::{Track, TrackId};

struct TrackMapEntry {
    port: PortId,
    input_track: TrackId,
    output_track: TrackId,
    ended: bool,
}

/// Graph-side payload of a track-union stream.
#[derive(Default)]
pub struct TrackUnionStream {
    pub(crate) inputs: ProcessedInputs,
    track_map: Vec<TrackMapEntry>,
}

impl TrackUnionStream {
    /// Creates a union with no inputs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a union that finishes once every input has finished.
    pub fn autofinishing() -> Self {
        let mut union = Self::new();
        union.inputs.autofinish = true;
        union
    }

    pub(crate) fn process_input(
        &mut self,
        state: &mut StreamState,
        view: &GraphView<'_>,
        from: GraphTime,
        to: GraphTime,
        allow_finish: bool,
    ) {
        if state.finished {
            return;
        }
        let mut all_finished = true;
        let mut all_have_current_data = true;
        let mut mapped = vec![false; self.track_map.len()];

        let ports: Vec<PortId> = self.inputs.all_ports().collect();
        for port_id in ports {
            let Some(port) = view.port(port_id) else {
                continue;
            };
            let Some(source) = view.stream(port.source()) else {
                continue;
            };
            let source_state = source.state();
            all_finished &= source_state.is_finished();
            all_have_current_data &= source_state.has_current_data;

            for input_track in source_state.tracks().tracks() {
                if !port.pass_track_through(input_track.id()) {
                    continue;
                }
                let existing = self
                    .track_map
                    .iter()
                    .position(|e| e.port == port_id && e.input_track == input_track.id());
                let index = match existing {
                    Some(i) => i,
                    None => {
                        let consumed = source_state.graph_time_to_stream_time_with_blocking(from);
                        if input_track.is_ended() && input_track.end() <= consumed {
                            continue;
                        }
                        self.add_track(state, port, input_track, from);
                        mapped.push(false);
                        self.track_map.len() - 1
                    }
                };
                mapped[index] = true;
                if !self.track_map[index].ended {
                    let muted = self.inputs.in_muted_cycle;
                    let finished =
                        copy_track_data(state, &self.track_map[index], port, source, input_track, from, to, muted);
                    if finished {
                        self.track_map[index].ended = true;
                    }
                }
            }
        }

        // Inputs that disappeared (port destroyed, track gone) end their outputs.
        for i in (0..self.track_map.len()).rev() {
            if !mapped[i] {
                let entry = self.track_map.remove(i);
                if !entry.ended {
                    end_output_track(state, entry.output_track);
                }
            }
        }

        if all_finished && self.inputs.autofinish && allow_finish {
            state.finish_on_graph_thread();
        } else {
            state.advance_known_tracks_time_to(to);
        }
        if all_have_current_data {
            state.has_current_data = true;
        }
    }

    fn add_track(&mut self, state: &mut StreamState, port: &InputPort, input: &Track, from: GraphTime) {
        let output_track = port
            .dest_track()
            .filter(|id| state.tracks.find_track(*id).is_none())
            .or_else(|| {
                let id = input.id();
                (state.tracks.find_track(id).is_none()).then_some(id)
            })
            .unwrap_or_else(|| {
                let max = state.tracks.tracks().iter().map(|t| t.id().0).max().unwrap_or(0);
                TrackId(max + 1)
            });
        let start = state.graph_time_to_stream_time_with_blocking(from);
        state
            .tracks
            .add_track(output_track, start, MediaSegment::empty(input.kind()));
        #[cfg(feature = "tracing")]
        tracing::debug!(
            "track union {} maps {} of port {} to {}",
            state.id(),
            input.id(),
            port.id(),
            output_track
        );
        let empty = MediaSegment::empty(input.kind());
        state.notify_track_changed(output_track, start, TrackChange::Created, &empty);
        self.track_map.push(TrackMapEntry {
            port: port.id(),
            input_track: input.id(),
            output_track,
            ended: false,
        });
    }
}

/// Copies `[from, to)` of `input` into the mapped output track. Blocked
/// spans become null, as does the whole interval when `muted`. Returns true when the input track has ended and all
/// of its data has been copied.
#[allow(clippy::too_many_arguments)]
fn copy_track_data(
    state: &mut StreamState,
    entry: &TrackMapEntry,
    port: &InputPort,
    source: &MediaStream,
    input: &Track,
    from: GraphTime,
    to: GraphTime,
    muted: bool,
) -> bool {
    let source_state = source.state();
    let suspended = source_state.is_suspended();
    let input_end = input.end();
    let mut segment = MediaSegment::empty(input.kind());
    if muted {
        segment.append_null(to - from);
    }
    let mut t = if muted { to } else { from };
    while t < to {
        let interval = port.next_input_interval(source, t);
        let end = interval.end.min(to);
        let ticks = end - t;
        if interval.input_is_blocked || suspended {
            segment.append_null(ticks);
        } else {
            let s0 = source_state.graph_time_to_stream_time_with_blocking(t).min(input_end);
            let s1 = source_state.graph_time_to_stream_time_with_blocking(end).min(input_end);
            segment.append_slice(input.segment(), s0, s1);
            segment.append_null(ticks - (s1 - s0));
        }
        t = end;
    }
    if source_state.is_track_disabled(input.id()) || state.is_track_disabled(entry.output_track) {
        segment.replace_with_null();
    }

    let Some(output) = state.tracks.find_track_mut(entry.output_track) else {
        return true;
    };
    let offset = output.end();
    output.segment_mut().append_slice(&segment, 0, segment.duration());
    state.notify_track_changed(entry.output_track, offset, TrackChange::Data, &segment);

    let consumed = source_state.graph_time_to_stream_time_with_blocking(to);
    let finished = input.is_ended() && input_end <= consumed;
    if finished {
        end_output_track(state, entry.output_track);
    }
    finished
}

fn end_output_track(state: &mut StreamState, id: TrackId) {
    let Some(track) = state.tracks.find_track_mut(id) else {
        return;
    };
    if track.is_ended() {
        return;
    }
    track.set_ended();
    let end = track.end();
    let empty = MediaSegment::empty(track.kind());
    state.notify_track_changed(id, end, TrackChange::Ended, &empty);
}
