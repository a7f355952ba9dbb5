//! Streamgraph Core - a real-time media stream graph scheduler
//!
//! This crate computes audio and video for a directed graph of media streams,
//! possibly with cycles, in fixed-size steps of graph time.
//!
//! # Core Abstractions
//!
//! ## Streams
//!
//! - [`MediaStream`] - A graph node: shared bookkeeping plus a [`StreamKind`]
//! - [`SourceStream`] / [`SourceFeed`] - Data pushed in from producer threads
//! - [`ProcessedStream`] - Pluggable [`StreamProcessor`] over input ports
//! - [`TrackUnionStream`] - Copies input tracks through unchanged
//! - [`AudioNodeStream`] - Runs an [`AudioNodeEngine`] one block at a time
//!
//! ## Connections
//!
//! - [`InputPort`] - Directed edge from a source stream to a processed stream
//! - [`compute_order`] - Processing order with cycle breakers and muted cycles
//!
//! ## Scheduling
//!
//! - [`GraphCore`] - Owns streams and ports, runs [`one_iteration`](GraphCore::one_iteration)
//! - [`ControlMessage`] - The only way to mutate a running graph
//! - [`GraphShared`] - Message queue, lifecycle and published snapshots
//! - [`AudioMixer`] - Sums audible output for the audio device
//!
//! ## Media
//!
//! - [`AudioSegment`] / [`VideoSegment`] - Run-length timelines of chunks
//! - [`StreamTracks`] - Append-only tracks of one stream
//! - [`AudioBlock`] - Fixed [`BLOCK_SIZE`] buffers for audio-node engines
//!
//! # Threading
//!
//! [`GraphCore`] is owned by whichever thread runs the current driver (see
//! the `streamgraph-io` crate). Every other thread talks to it through
//! [`GraphShared::append_message`] and reads state back from
//! [`GraphShared::snapshot`].
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use streamgraph_core::{CoreOptions, GraphCore, GraphShared, MediaStream, SourceFeed, SourceStream, StreamKind};
//!
//! let shared = Arc::new(GraphShared::new());
//! let mut core = GraphCore::new(Arc::clone(&shared), CoreOptions { realtime: false, ..CoreOptions::default() });
//!
//! let feed = SourceFeed::new();
//! let id = shared.allocate_stream_id();
//! core.add_stream(MediaStream::new(id, StreamKind::Source(SourceStream::new(feed.clone()))));
//!
//! while core.one_iteration(core.processed_time() + 128) {}
//! ```

pub mod block;
pub mod channel;
pub mod engine;
pub mod error;
mod graph;
pub mod listener;
pub mod message;
pub mod mixer;
pub mod ordering;
pub mod port;
pub mod segment;
pub mod shared;
pub mod stream;
pub mod time;
pub mod tracks;

pub use block::{AudioBlock, BlockChannel};
pub use channel::{ChannelConfig, ChannelCountMode, ChannelInterpretation, MAX_CHANNELS};
pub use engine::{AudioNodeEngine, ProcessContext};
pub use error::GraphError;
pub use graph::{CoreOptions, GraphCore};
pub use listener::{ChannelListener, StreamEvent, StreamListener, TrackChange};
pub use message::{Command, ContextOperation, ControlMessage, GraphTask};
pub use mixer::{AudioMixer, MixerCallback};
pub use ordering::{OrderNode, StreamOrder, compute_order};
pub use port::{InputInterval, InputPort, PortId};
pub use segment::{
    AudioChunk, AudioSegment, Chunk, MediaSegment, Segment, TrackKind, VideoChunk, VideoFrame, VideoImage,
    VideoSegment,
};
pub use shared::{CleanupAction, DriverKind, GraphShared, GraphSnapshot, LifecycleState, StreamSnapshot};
pub use stream::{
    AUDIO_NODE_OUTPUT_TRACK, AudioNodeKind, AudioNodeStream, MediaStream, PROCESSED_OUTPUT_TRACK, ProcessedInputs,
    ProcessedStream, SourceFeed, SourcePuller, SourceStream, StreamId, StreamKind, StreamProcessor, StreamState,
    TrackUnionStream, VideoSink,
};
pub use time::{
    BLOCK_SIZE, GRAPH_TIME_MAX, GraphTime, STREAM_TIME_MAX, StreamTime, TrackRate, millis_to_ticks,
    round_up_to_block, seconds_to_ticks, ticks_to_seconds,
};
pub use tracks::{StreamTracks, Track, TrackId};
