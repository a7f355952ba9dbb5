//! Graphs of the main thread, one per window and rate.
//!
//! The registry lives in a thread-local, so it is only ever touched by the
//! thread that owns it and needs no lock. Graphs are created on first
//! lookup and removed by [`process_updates`] once they stopped.

use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Duration;

use streamgraph_core::{LifecycleState, TrackRate};

use crate::graph::MediaStreamGraph;
use crate::options::GraphOptions;

thread_local! {
    static GRAPHS: RefCell<HashMap<(u64, TrackRate), MediaStreamGraph>> = RefCell::new(HashMap::new());
}

/// The graph of `window` at `options.rate`, created from `options` with
/// the default audio backend if there is none yet.
pub fn get_or_create(window: u64, options: GraphOptions) -> MediaStreamGraph {
    let rate = options.rate;
    get_or_create_with(window, rate, || MediaStreamGraph::new(options))
}

/// The graph of `window` at `rate`, created by `make` if there is none yet.
///
/// # Panics
///
/// Panics if `make` returns a graph at a different rate.
pub fn get_or_create_with(window: u64, rate: TrackRate, make: impl FnOnce() -> MediaStreamGraph) -> MediaStreamGraph {
    if let Some(graph) = lookup(window, rate) {
        return graph;
    }
    let graph = make();
    assert_eq!(graph.rate(), rate, "registered graph rate mismatch");
    tracing::debug!(window, rate, "registering graph");
    GRAPHS.with_borrow_mut(|graphs| graphs.insert((window, rate), graph.clone()));
    graph
}

/// The graph of `window` at `rate`, if registered.
pub fn lookup(window: u64, rate: TrackRate) -> Option<MediaStreamGraph> {
    GRAPHS.with_borrow(|graphs| graphs.get(&(window, rate)).cloned())
}

/// Number of registered graphs.
pub fn len() -> usize {
    GRAPHS.with_borrow(HashMap::len)
}

/// Returns true if no graph is registered.
pub fn is_empty() -> bool {
    len() == 0
}

/// Runs main-thread updates of every graph and drops those that stopped.
pub fn process_updates() {
    // Graphs are updated outside the borrow; teardown may run callbacks.
    let graphs: Vec<MediaStreamGraph> = GRAPHS.with_borrow(|graphs| graphs.values().cloned().collect());
    for graph in &graphs {
        graph.process_main_thread_updates();
    }
    GRAPHS.with_borrow_mut(|graphs| {
        graphs.retain(|&(window, rate), graph| {
            let keep = graph.lifecycle() != LifecycleState::Stopped;
            if !keep {
                tracing::debug!(window, rate, "graph stopped, unregistering");
            }
            keep
        });
    });
}

/// Forces every registered graph down and empties the registry.
pub fn shutdown_all(timeout: Duration) {
    let graphs: Vec<MediaStreamGraph> = GRAPHS.with_borrow_mut(|graphs| graphs.drain().map(|(_, g)| g).collect());
    for graph in graphs {
        graph.force_shutdown(timeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manual_backend::ManualBackend;
    use std::time::Instant;

    fn manual_graph(rate: TrackRate) -> MediaStreamGraph {
        MediaStreamGraph::with_backend(
            GraphOptions {
                system_clock_interval: Duration::from_millis(1),
                ..GraphOptions::realtime(rate)
            },
            Box::new(ManualBackend::new()),
        )
    }

    #[test]
    fn test_same_key_same_graph() {
        let a = get_or_create_with(1, 48000, || manual_graph(48000));
        let b = get_or_create_with(1, 48000, || panic!("graph should be reused"));
        let c = get_or_create_with(1, 44100, || manual_graph(44100));
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert_eq!(len(), 2);
        shutdown_all(Duration::from_secs(1));
        assert!(is_empty());
    }

    #[test]
    fn test_empty_graph_is_unregistered() {
        let graph = get_or_create_with(7, 48000, || manual_graph(48000));
        let source = graph.create_source_stream();
        drop(source);
        drop(graph);

        let deadline = Instant::now() + Duration::from_secs(5);
        while !is_empty() && Instant::now() < deadline {
            process_updates();
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(is_empty());
    }
}
