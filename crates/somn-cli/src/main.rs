use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use somn_lib::{
    consensus,
    intervals::DurationBounds,
    io::{events as event_io, recording as recording_io, text as text_io},
    match_events, method_names, Detector, Event, Recipe, RecipeOverrides, Recording,
};
use std::{
    io::{self, Read},
    path::{Path, PathBuf},
};

#[derive(Parser)]
#[command(
    name = "somn",
    version,
    about = "Sleep EEG event detection: spindles, slow waves, arousals"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
}

#[derive(Subcommand)]
enum Commands {
    /// List detection methods with their labels
    Methods,
    /// Detect events on samples from --input, --csv or stdin
    Detect {
        #[arg(long)]
        method: Option<String>,
        /// Sampling rate in Hz; overrides a `fs=` header, 256 when neither is given
        #[arg(long)]
        fs: Option<f64>,
        /// One sample per line, optionally under a `# label=.. fs=..` header
        #[arg(long, conflicts_with = "csv")]
        input: Option<PathBuf>,
        /// Multi-channel CSV with a header row of channel labels
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Label of the single channel read from --input or stdin
        #[arg(long)]
        label: Option<String>,
        /// TOML file with detection settings; flags take precedence
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        low_hz: Option<f64>,
        #[arg(long)]
        high_hz: Option<f64>,
        #[arg(long)]
        min_dur: Option<f64>,
        #[arg(long)]
        max_dur: Option<f64>,
        /// Merge close events across channels
        #[arg(long)]
        merge: bool,
        /// Channels to run on (repeatable); defaults to all
        #[arg(long)]
        chan: Vec<String>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
        /// Print one value per channel instead of events: `count`, `density`
        /// (events per 30 s epoch) or the mean of a feature
        #[arg(long)]
        summary: Option<String>,
    },
    /// Merge rater event lists by per-sample voting
    Consensus {
        #[arg(long = "rater", required = true, num_args = 1)]
        raters: Vec<PathBuf>,
        #[arg(long, default_value_t = 0.5)]
        threshold: f64,
        #[arg(long, default_value_t = 512.0)]
        fs: f64,
        #[arg(long)]
        min_duration: Option<f64>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
    /// Match a candidate event list against a reference list
    Agreement {
        #[arg(long)]
        reference: PathBuf,
        #[arg(long)]
        candidate: PathBuf,
        #[arg(long, default_value_t = 0.5)]
        threshold: f64,
    },
}

/// Detection settings read from `--config`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DetectConfig {
    method: Option<String>,
    #[serde(default)]
    channels: Vec<String>,
    low_hz: Option<f64>,
    high_hz: Option<f64>,
    min_dur: Option<f64>,
    max_dur: Option<f64>,
    merge: Option<bool>,
}

impl DetectConfig {
    fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Build the detector, falling back to the recipe defaults for any
    /// value left unset.
    fn detector(&self) -> Result<Detector> {
        let method = self
            .method
            .as_deref()
            .context("no detection method given (use --method or `method` in --config)")?;
        let defaults = Recipe::from_name(method)?;
        let band = match (self.low_hz, self.high_hz) {
            (None, None) => None,
            (low, high) => Some((
                low.unwrap_or(defaults.band.0),
                high.unwrap_or(defaults.band.1),
            )),
        };
        let duration = match (self.min_dur, self.max_dur) {
            (None, None) => None,
            (min, max) => Some(DurationBounds {
                min: min.or(defaults.duration.min),
                max: max.or(defaults.duration.max),
            }),
        };
        let overrides = RecipeOverrides {
            band,
            duration,
            merge_across_channels: self.merge,
        };
        let detector = Detector::with_overrides(method, &overrides)?;
        Ok(if self.channels.is_empty() {
            detector
        } else {
            detector.with_channels(self.channels.clone())
        })
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Methods => cmd_methods()?,
        Commands::Detect {
            method,
            fs,
            input,
            csv,
            label,
            config,
            low_hz,
            high_hz,
            min_dur,
            max_dur,
            merge,
            chan,
            format,
            summary,
        } => {
            let mut cfg = match config {
                Some(path) => DetectConfig::load(&path)?,
                None => DetectConfig::default(),
            };
            cfg.method = method.or(cfg.method);
            cfg.low_hz = low_hz.or(cfg.low_hz);
            cfg.high_hz = high_hz.or(cfg.high_hz);
            cfg.min_dur = min_dur.or(cfg.min_dur);
            cfg.max_dur = max_dur.or(cfg.max_dur);
            if merge {
                cfg.merge = Some(true);
            }
            if !chan.is_empty() {
                cfg.channels = chan;
            }
            let recording = load_recording(fs, input.as_deref(), csv.as_deref(), label.as_deref())?;
            cmd_detect(&cfg, &recording, format, summary.as_deref())?
        }
        Commands::Consensus {
            raters,
            threshold,
            fs,
            min_duration,
            format,
        } => cmd_consensus(&raters, threshold, fs, min_duration, format)?,
        Commands::Agreement {
            reference,
            candidate,
            threshold,
        } => cmd_agreement(&reference, &candidate, threshold)?,
    }
    Ok(())
}

fn load_recording(
    fs: Option<f64>,
    input: Option<&Path>,
    csv: Option<&Path>,
    label: Option<&str>,
) -> Result<Recording> {
    if let Some(path) = csv {
        return recording_io::read_channels_csv(path, fs.unwrap_or(text_io::DEFAULT_FS));
    }
    match input {
        Some(path) => text_io::read_channel_text(path, label, fs),
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            text_io::parse_channel_text(&buf, label, fs)
        }
    }
}

fn cmd_methods() -> Result<()> {
    for name in method_names() {
        println!("{}\t{}", name, Recipe::from_name(name)?);
    }
    Ok(())
}

fn cmd_detect(
    cfg: &DetectConfig,
    recording: &Recording,
    format: OutputFormat,
    summary: Option<&str>,
) -> Result<()> {
    let detector = cfg.detector()?;
    let result = detector.detect(recording)?;
    log::info!("{} found {} events", result.method, result.events.len());
    if let Some(feature) = summary {
        let values: Vec<_> = result.summary(feature);
        println!("{}", serde_json::to_string(&values)?);
        return Ok(());
    }
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(&result)?),
        OutputFormat::Csv => event_io::write_events_csv(io::stdout().lock(), &result.events)?,
    }
    Ok(())
}

fn cmd_consensus(
    raters: &[PathBuf],
    threshold: f64,
    fs: f64,
    min_duration: Option<f64>,
    format: OutputFormat,
) -> Result<()> {
    if raters.len() < 2 {
        bail!("consensus needs at least two --rater files");
    }
    let lists = raters
        .iter()
        .map(|path| event_io::read_events_json(path))
        .collect::<Result<Vec<Vec<Event>>>>()?;
    let merged = consensus(&lists, threshold, fs, min_duration)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(&merged)?),
        OutputFormat::Csv => event_io::write_events_csv(io::stdout().lock(), &merged)?,
    }
    Ok(())
}

fn cmd_agreement(reference: &Path, candidate: &Path, threshold: f64) -> Result<()> {
    let reference = event_io::read_events_json(reference)?;
    let candidate = event_io::read_events_json(candidate)?;
    let matched = match_events(&reference, &candidate, threshold)?;
    println!("{}", serde_json::to_string(&matched)?);
    Ok(())
}
