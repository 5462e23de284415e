//! canreplayd - CAN log replay and diagnostic analysis
//!
//! Usage:
//!   canreplayd [OPTIONS] <frames.jsonl>
//!
//! The frame file holds one JSON record per line:
//!   {"timestamp": 0.125, "channel": 0, "id": 2016, "data": "03 22 F1 90", "is_fd": false}
//!
//! Without a config file the run is an offline analysis in heuristic mode.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use canreplay_core::{ingest, RawFrame, Report, RunMode};
use canreplay_diag::KnowledgeBase;
use canreplay_engine::{
    analyze, create_bus, AnalysisOptions, AppConfig, ChannelSelection, FrameInspector,
    ReplaySession,
};

/// Which pipeline to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Play the log back onto a bus
    Replay,
    /// Classify the log offline
    #[value(alias = "analyze")]
    Analysis,
}

impl From<Mode> for RunMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Replay => RunMode::Replay,
            Mode::Analysis => RunMode::Analysis,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "canreplayd")]
#[command(about = "CAN log replay and diagnostic analysis")]
#[command(after_help = r#"Examples:
  # Offline analysis, heuristic detection
  canreplayd capture.jsonl

  # Analysis confirmed against a CANdela export
  canreplayd --kb ecu.cdd capture.jsonl

  # Replay twice as fast on vcan interfaces
  canreplayd -c replay.toml -m replay -s 2 capture.jsonl"#)]
struct Args {
    /// Frame log (JSON lines)
    frames: PathBuf,

    /// Run configuration (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Diagnostic knowledge base (CDD / ODX export), overrides the config
    #[arg(short, long = "kb")]
    knowledge_base: Option<PathBuf>,

    /// Pipeline to run, overrides the config
    #[arg(short, long, value_enum)]
    mode: Option<Mode>,

    /// Playback rate: 1 real time, 2 twice as fast, 0 max speed
    #[arg(short, long = "speed")]
    speed_factor: Option<f64>,

    /// Replay channel: "auto", "Vector Ch2", "can0", ...
    #[arg(long)]
    channel: Option<ChannelSelection>,

    /// Write the JSON report here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

/// Read JSON-lines frame records; unparsable lines count as rejected
fn read_frames(path: &Path) -> anyhow::Result<(Vec<RawFrame>, usize)> {
    let file =
        File::open(path).with_context(|| format!("Failed to open frame log {}", path.display()))?;
    let mut records = Vec::new();
    let mut unparsable = 0;

    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match serde_json::from_str::<RawFrame>(line) {
            Ok(record) => records.push(record),
            Err(e) => {
                unparsable += 1;
                tracing::debug!(line = index + 1, error = %e, "Skipping unparsable frame record");
            }
        }
    }
    Ok((records, unparsable))
}

fn write_report(report: &Report, output: Option<&Path>) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, report)?;
            writer.flush()?;
            tracing::info!("Report written to {}", path.display());
        }
        None => {
            let stdout = std::io::stdout();
            let mut writer = stdout.lock();
            serde_json::to_writer_pretty(&mut writer, report)?;
            writeln!(writer)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "canreplayd=info,canreplay_engine=info,canreplay_diag=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let frames_path = args.frames.clone();

    let mut config = match &args.config {
        Some(path) => {
            tracing::info!("Loading config from: {}", path.display());
            AppConfig::load(path)?
        }
        None => AppConfig::default(),
    };
    if let Some(mode) = args.mode {
        config.mode = mode.into();
    }
    if let Some(speed) = args.speed_factor {
        config.replay.speed_factor = speed;
    }
    if let Some(channel) = args.channel {
        config.replay.channel = channel;
    }
    if args.knowledge_base.is_some() {
        config.knowledge_base.path = args.knowledge_base.clone();
    }
    config.validate()?;

    let (records, unparsable) = read_frames(&frames_path)?;
    let ingested = ingest(records);
    let rejected = ingested.rejected + unparsable;
    tracing::info!(
        frames = ingested.frames.len(),
        rejected,
        "Loaded frame log {}",
        frames_path.display()
    );

    let knowledge_base = KnowledgeBase::load_optional(config.knowledge_base.path.as_deref());
    if knowledge_base.is_none() {
        tracing::info!("No knowledge base loaded, using heuristic detection");
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    let report = match config.mode {
        RunMode::Analysis => {
            let inspector = FrameInspector::new(knowledge_base)
                .detect_diagnostics(config.analysis.detect_diagnostics);
            let options = AnalysisOptions::from_config(&config.analysis)?;
            analyze(ingested.frames, &options, &inspector, &cancel)
        }
        RunMode::Replay => {
            let sink = create_bus(&config.transport)?;
            let inspector = Arc::new(
                FrameInspector::new(knowledge_base)
                    .detect_diagnostics(config.replay.detect_diagnostics),
            );
            let session = ReplaySession::new(sink, inspector, &config.replay);
            let session_cancel = session.cancel_token();
            let forward = cancel.clone();
            tokio::spawn(async move {
                forward.cancelled().await;
                session_cancel.cancel();
            });
            session.run(&ingested.frames).await.report
        }
    }
    .with_rejected_frames(rejected);

    tracing::info!(
        outcome = ?report.outcome,
        entries = report.totals.processed,
        dids = report.unique_dids.len(),
        dtcs = report.unique_dtcs.len(),
        "Session finished"
    );
    write_report(&report, args.output.as_deref())
}
