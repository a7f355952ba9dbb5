//! Offline rendering of a signal chain to a WAV file.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use streamgraph_core::{GraphTime, LifecycleState, seconds_to_ticks, ticks_to_seconds};
use streamgraph_io::{GraphOptions, MediaStreamGraph, WavRecorder};

use super::common::{GraphArgs, SignalArgs, build_chain};

/// How often the progress bar is refreshed.
const POLL: Duration = Duration::from_millis(10);

#[derive(Args)]
pub struct RenderArgs {
    /// Output WAV file
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// Length in seconds. Defaults to the input file's length, or 2 s
    #[arg(short, long)]
    duration: Option<f64>,

    /// Hide the progress bar
    #[arg(short, long)]
    quiet: bool,

    #[command(flatten)]
    signal: SignalArgs,

    #[command(flatten)]
    graph: GraphArgs,
}

pub fn run(args: RenderArgs) -> anyhow::Result<()> {
    let config = args.graph.load_config()?;
    let options = GraphOptions {
        realtime: false,
        ..GraphOptions::from(&config)
    };
    let rate = options.rate;
    let channels = config.output_channels;

    let requested = args.duration.map(|seconds| seconds_to_ticks(seconds, rate));
    let default_end = seconds_to_ticks(2.0, rate);
    let tone_length = requested.or(args.signal.input.is_none().then_some(default_end));

    let graph = MediaStreamGraph::new(options);
    let chain = build_chain(&graph, &args.signal, tone_length.map(|t| t.max(0) as u64))?;
    let end = requested
        .or(chain.input_frames.map(|frames| frames as GraphTime))
        .unwrap_or(default_end);
    if end <= 0 {
        anyhow::bail!("Nothing to render: duration must be positive");
    }

    let recorder = WavRecorder::create(&args.output, channels, rate)?;
    graph.add_mixer_callback(Box::new(recorder.clone()));

    println!(
        "Rendering {:.2}s at {} Hz, {} channel(s) to {}",
        ticks_to_seconds(end, rate),
        rate,
        channels,
        args.output.display()
    );

    let pb = if args.quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(end as u64)
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("##-"),
    );

    graph.start_offline(end)?;
    loop {
        graph.process_main_thread_updates();
        pb.set_position(graph.processed_time().clamp(0, end) as u64);
        if graph.lifecycle() == LifecycleState::Stopped {
            break;
        }
        std::thread::sleep(POLL);
    }
    pb.finish_with_message("done");
    tracing::debug!(
        stream = %chain.output.id(),
        stream_time = chain.output.current_time(),
        stages = chain.stages.len(),
        "render finished"
    );
    drop(chain);

    let frames = recorder.finalize()?;
    println!("Wrote {} frames to {}", frames, args.output.display());
    Ok(())
}
