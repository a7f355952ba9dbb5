//! Criterion benchmarks for the scheduler (`streamgraph-core`).
//!
//! Measures scheduling overhead independently of DSP cost using a trivial
//! `Gain` engine. Two axes:
//!
//! - **Order**: cycle-aware ordering of chains of varying length
//! - **Iterate**: `one_iteration()` over a source feeding a chain of audio nodes
//!
//! Run with: `cargo bench -p streamgraph-core -- graph/`
#![allow(missing_docs)]

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use streamgraph_core::{
    AudioBlock, AudioChunk, AudioNodeEngine, AudioNodeKind, AudioNodeStream, AudioSegment, ChannelConfig,
    CoreOptions, GraphCore, GraphShared, InputPort, MediaSegment, MediaStream, OrderNode, ProcessContext,
    SourceFeed, SourceStream, StreamKind, TrackId, compute_order,
};

const RATE: u32 = 48000;
const CHAIN_LENGTHS: &[usize] = &[1, 4, 16, 64];

// ---------------------------------------------------------------------------
// Trivial gain engine, so the numbers measure scheduling rather than DSP.
// ---------------------------------------------------------------------------

struct Gain(f32);

impl AudioNodeEngine for Gain {
    fn process_block(&mut self, _ctx: &ProcessContext, inputs: &[AudioBlock], outputs: &mut [AudioBlock]) -> bool {
        outputs[0] = inputs[0].clone();
        for c in 0..outputs[0].channel_count() {
            for s in outputs[0].channel_mut(c).iter_mut() {
                *s *= self.0;
            }
        }
        false
    }
}

// ---------------------------------------------------------------------------
// Graph constructors
// ---------------------------------------------------------------------------

fn chain_nodes(len: usize) -> Vec<OrderNode> {
    let mut nodes = vec![OrderNode::default()];
    for i in 0..len {
        nodes.push(OrderNode {
            is_processed: true,
            is_cycle_breaker: false,
            inputs: vec![i],
        });
    }
    nodes.reverse();
    nodes
}

fn chain_graph(len: usize) -> (GraphCore, SourceFeed) {
    let mut core = GraphCore::new(
        Arc::new(GraphShared::new()),
        CoreOptions {
            rate: RATE,
            output_channels: 2,
            realtime: false,
        },
    );
    let feed = SourceFeed::new();
    feed.add_track(
        TrackId(1),
        0,
        MediaSegment::Audio(AudioSegment::from(AudioChunk::mono(&vec![0.1; 1 << 16]))),
    );
    feed.finish_add_tracks();
    let mut prev = core.shared().allocate_stream_id();
    core.add_stream(MediaStream::new(prev, StreamKind::Source(SourceStream::new(feed.clone()))));
    for _ in 0..len {
        let id = core.shared().allocate_stream_id();
        let node = AudioNodeStream::new(Box::new(Gain(0.9)), ChannelConfig::explicit(2), AudioNodeKind::Internal, RATE);
        core.add_stream(MediaStream::new(id, StreamKind::AudioNode(node)));
        let port = InputPort::new(core.shared().allocate_port_id(), prev, id);
        core.connect_port(port).expect("chain streams exist");
        prev = id;
    }
    (core, feed)
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph/order");
    for &len in CHAIN_LENGTHS {
        let nodes = chain_nodes(len);
        group.bench_with_input(BenchmarkId::from_parameter(len), &nodes, |b, nodes| {
            b.iter(|| black_box(compute_order(black_box(nodes))));
        });
    }
    group.finish();
}

fn bench_iterate(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph/iterate");
    for &len in CHAIN_LENGTHS {
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, &len| {
            let (mut core, feed) = chain_graph(len);
            b.iter(|| {
                if core.processed_time() > (1 << 15) {
                    feed.append_to_track(
                        TrackId(1),
                        MediaSegment::Audio(AudioSegment::from(AudioChunk::mono(&[0.1; 128]))),
                    );
                }
                black_box(core.one_iteration(core.processed_time() + 128));
            });
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

criterion_group!(benches, bench_order, bench_iterate);
criterion_main!(benches);
