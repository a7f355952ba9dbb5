//! Shared CLI helpers used across multiple commands.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use streamgraph_config::{GraphConfig, default_config_path};
use streamgraph_core::{AudioChunk, AudioNodeKind, AudioSegment, ChannelConfig, MediaSegment, TrackId};
use streamgraph_io::{MediaStreamGraph, MediaStreamHandle, read_wav};

use crate::engines::{DelayEngine, GainEngine, SineEngine, db_to_linear};

/// Graph settings shared by `render` and `play`.
#[derive(Args, Clone, Debug)]
pub struct GraphArgs {
    /// Graph configuration file (TOML). Defaults to the user config if it exists
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Sample rate, overriding the config
    #[arg(long)]
    pub sample_rate: Option<u32>,

    /// Output channels, overriding the config
    #[arg(long)]
    pub channels: Option<u16>,
}

impl GraphArgs {
    /// Loads the configuration and applies command-line overrides.
    pub fn load_config(&self) -> anyhow::Result<GraphConfig> {
        let mut config = match &self.config {
            Some(path) => GraphConfig::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => GraphConfig::load_or_default(default_config_path())?,
        };
        if let Some(rate) = self.sample_rate {
            config.sample_rate = rate;
        }
        if let Some(channels) = self.channels {
            config.output_channels = channels;
        }
        config.validate()?;
        Ok(config)
    }
}

/// What to feed into the graph and how to shape it.
#[derive(Args, Clone, Debug)]
pub struct SignalArgs {
    /// Sine tone in Hz (repeatable)
    #[arg(long = "tone", value_name = "HZ")]
    pub tones: Vec<f32>,

    /// WAV file played through the graph
    #[arg(short, long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Amplitude of each tone (0-1)
    #[arg(long, default_value = "0.25")]
    pub amplitude: f32,

    /// Output gain in dB
    #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
    pub gain_db: f32,

    /// Echo delay in milliseconds (0 disables the echo)
    #[arg(long, default_value = "0.0")]
    pub delay_ms: f32,

    /// Echo feedback (0-0.95)
    #[arg(long, default_value = "0.4")]
    pub feedback: f32,

    /// Echo dry/wet mix (0-1)
    #[arg(long, default_value = "0.3")]
    pub mix: f32,
}

/// Streams of a built signal chain. Dropping it releases every stream.
pub struct SignalChain {
    /// Stream whose output is audible.
    pub output: MediaStreamHandle,
    /// Generators and file sources feeding the chain.
    pub sources: Vec<MediaStreamHandle>,
    /// Intermediate processing stages.
    pub stages: Vec<MediaStreamHandle>,
    /// Length of the input file in frames, if one was given.
    pub input_frames: Option<usize>,
}

/// Builds `sources -> gain [-> delay]` on `graph` and makes the last stage
/// audible. Tones stop after `tone_length` frames if given.
pub fn build_chain(
    graph: &MediaStreamGraph,
    signal: &SignalArgs,
    tone_length: Option<u64>,
) -> anyhow::Result<SignalChain> {
    if signal.tones.is_empty() && signal.input.is_none() {
        anyhow::bail!("Nothing to play: add --tone or --input");
    }
    let rate = graph.rate();
    let mut sources = Vec::new();
    let mut input_frames = None;

    if let Some(path) = &signal.input {
        let (channels, file_rate) = read_wav(path).with_context(|| format!("reading {}", path.display()))?;
        if file_rate != rate {
            anyhow::bail!(
                "{} is {} Hz but the graph runs at {} Hz; pass --sample-rate {}",
                path.display(),
                file_rate,
                rate,
                file_rate
            );
        }
        input_frames = Some(channels.first().map_or(0, Vec::len));
        let source = graph.create_source_stream();
        source.feed().add_track(
            TrackId(1),
            0,
            MediaSegment::Audio(AudioSegment::from(AudioChunk::from_planar(channels))),
        );
        source.feed().finish();
        sources.push(source.stream().clone());
    }

    for &freq in &signal.tones {
        let mut engine = SineEngine::new(freq, signal.amplitude, rate);
        if let Some(length) = tone_length {
            engine = engine.with_length(length);
        }
        sources.push(graph.create_audio_node_stream(
            Box::new(engine),
            ChannelConfig::explicit(1),
            AudioNodeKind::Source,
        ));
    }

    let echo = signal.delay_ms > 0.0;
    let gain_kind = if echo {
        AudioNodeKind::Internal
    } else {
        AudioNodeKind::External
    };
    let gain = graph.create_audio_node_stream(Box::new(GainEngine::new(1.0)), ChannelConfig::default(), gain_kind);
    gain.set_engine_parameter(0, db_to_linear(signal.gain_db));
    for source in &sources {
        graph.connect(source, &gain);
    }

    let mut stages = Vec::new();
    let output = if echo {
        let delay = graph.create_audio_node_stream(
            Box::new(DelayEngine::new(signal.delay_ms, signal.feedback, signal.mix, rate)),
            ChannelConfig::default(),
            AudioNodeKind::External,
        );
        graph.connect(&gain, &delay);
        stages.push(gain);
        delay
    } else {
        gain
    };
    output.add_audio_output(1, 1.0);
    tracing::debug!(sources = sources.len(), echo, "signal chain built");

    Ok(SignalChain {
        output,
        sources,
        stages,
        input_frames,
    })
}
