//! Realtime playback of a signal chain through the audio device.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use clap::Args;
use streamgraph_core::{DriverKind, LifecycleState, seconds_to_ticks};
use streamgraph_io::{GraphOptions, MediaStreamGraph};

use super::common::{GraphArgs, SignalArgs, build_chain};

/// Interval of main-thread housekeeping while playing.
const TICK: Duration = Duration::from_millis(50);

#[derive(Args)]
pub struct PlayArgs {
    /// Stop after this many seconds. Without it, tones play until Ctrl+C
    /// and files play to their end
    #[arg(short, long)]
    duration: Option<f64>,

    /// Output device (substring of its name), overriding the config
    #[arg(short, long)]
    output: Option<String>,

    #[command(flatten)]
    signal: SignalArgs,

    #[command(flatten)]
    graph: GraphArgs,
}

pub fn run(args: PlayArgs) -> anyhow::Result<()> {
    let config = args.graph.load_config()?;
    let mut options = GraphOptions {
        realtime: true,
        ..GraphOptions::from(&config)
    };
    if args.output.is_some() {
        options.device_name = args.output.clone();
    }
    let shutdown_timeout = options.shutdown_timeout;

    let graph = MediaStreamGraph::new(options);
    let tone_length = args.duration.map(|secs| seconds_to_ticks(secs, graph.rate()).max(0) as u64);
    let chain = build_chain(&graph, &args.signal, tone_length)?;
    let ends_with_input = args.signal.tones.is_empty();

    println!("Playing at {} Hz... Press Ctrl+C to stop.\n", graph.rate());

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        println!("\nStopping...");
        r.store(false, Ordering::SeqCst);
    })?;

    let deadline = args.duration.map(|secs| Instant::now() + Duration::from_secs_f64(secs.max(0.0)));
    let mut driver = graph.driver_kind();
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(TICK);
        graph.process_main_thread_updates();

        let now = graph.driver_kind();
        if now != driver {
            if driver == DriverKind::AudioCallback && now == DriverKind::SystemClock {
                println!("Audio device lost, continuing on the system clock");
            }
            tracing::info!(from = %driver, to = %now, "driver changed");
            driver = now;
        }

        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        if ends_with_input && chain.sources.iter().all(|s| s.is_finished()) {
            break;
        }
        if graph.lifecycle() == LifecycleState::Stopped {
            break;
        }
    }

    drop(chain);
    graph.force_shutdown(shutdown_timeout);
    println!("Done!");
    Ok(())
}
