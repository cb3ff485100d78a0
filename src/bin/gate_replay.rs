//! Gate Replay
//!
//! Builds a multi-model gate from a golden dataset and replays recorded
//! batches through it on a manual clock, printing one decision per batch.
//!
//! Usage:
//! ```bash
//! gate_replay --golden golden.json --batches batches.jsonl --seed 7
//! gate_replay sample-config --output gate.toml
//! ```
//!
//! Golden file: JSON array of numeric arrays.
//! Batch file: one JSON object per line,
//! `{"samples": [[..]], "provenance": [{"source": "a", "trust": 0.9, "timestamp_ms": 0}], "advance_ms": 60000}`.

use clap::{Parser, Subcommand};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use anchored_gate::clock::ManualClock;
use anchored_gate::gate::{GateConfig, GateMetrics, GateMode, ModelState, MultiModelGate, Provenance};
use anchored_gate::infra::{init_logging, LogConfig, LogFormat};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser)]
#[command(name = "gate_replay")]
#[command(version, about = "Replay recorded batches through a reference-anchored gate", long_about = None)]
struct Cli {
    /// Golden dataset (JSON array of vectors)
    #[arg(long)]
    golden: Option<PathBuf>,

    /// Recorded batches (JSON lines)
    #[arg(long)]
    batches: Option<PathBuf>,

    /// Path to config file
    #[arg(short, long, default_value = "gate.toml")]
    config: PathBuf,

    /// Seed for the stratified sampler
    #[arg(long)]
    seed: Option<u64>,

    /// Flow-toxicity score applied before the first batch
    #[arg(long)]
    toxicity: Option<f64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Output format (pretty, json, compact)
    #[arg(long)]
    log_format: Option<String>,

    /// Write a JSON snapshot of models, metrics and checkpoints here
    #[arg(long)]
    snapshot: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a sample config file
    SampleConfig {
        /// Output file path
        #[arg(short, long, default_value = "gate.toml")]
        output: PathBuf,
    },
    /// Replay batches (default)
    Run,
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
struct ReplayConfig {
    #[serde(default)]
    gate: GateConfig,
    #[serde(default)]
    logging: LogConfig,
}

/// One line of the batch file.
#[derive(Debug, Deserialize)]
struct BatchRecord {
    samples: Vec<Vec<f64>>,
    provenance: Vec<Provenance>,
    /// Clock advance applied before the batch
    #[serde(default)]
    advance_ms: u64,
}

#[derive(Debug, Serialize)]
struct ReplaySnapshot {
    mode: GateMode,
    metrics: GateMetrics,
    adaptive: ModelState,
    reference: ModelState,
    checkpoints: Vec<ModelState>,
}

#[derive(Debug, Default)]
struct ReplaySummary {
    batches: usize,
    accepted: usize,
    rejected: usize,
    errors: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::SampleConfig { output }) => {
            generate_sample_config(output)?;
            return Ok(());
        }
        Some(Commands::Run) | None => {}
    }

    let config = load_config(&cli.config)?;
    let _guards = setup_logging(&config, &cli)?;

    let golden_path = cli.golden.as_ref().ok_or("--golden is required")?;
    let batches_path = cli.batches.as_ref().ok_or("--batches is required")?;

    let golden = load_golden(golden_path)?;
    info!(path = %golden_path.display(), samples = golden.len(), "Golden dataset loaded");

    let clock = Arc::new(ManualClock::new(0));
    let mut builder = MultiModelGate::builder(golden)
        .config(config.gate.clone())
        .time_source(clock.clone())
        .alert_sink(|alert_type: &str, message: &str| {
            println!("  ALERT [{alert_type}] {message}");
        });
    if let Some(seed) = cli.seed {
        builder = builder.seed(seed);
    }
    let gate = builder.build()?;

    if let Some(toxicity) = cli.toxicity {
        gate.set_toxicity(toxicity);
    }

    let summary = replay(&gate, &clock, batches_path)?;

    println!();
    println!(
        "Replayed {} batches: {} accepted, {} rejected, {} errors",
        summary.batches, summary.accepted, summary.rejected, summary.errors
    );
    let mode = gate.mode();
    if mode.is_frozen() {
        println!("Gate still frozen at end of replay: {mode:?}");
    }
    println!("{}", serde_json::to_string_pretty(&gate.metrics())?);

    if let Some(path) = &cli.snapshot {
        write_snapshot(&gate, path)?;
        println!("Snapshot written to: {}", path.display());
    }

    Ok(())
}

fn replay(
    gate: &MultiModelGate,
    clock: &ManualClock,
    path: &Path,
) -> Result<ReplaySummary, Box<dyn std::error::Error>> {
    let reader = BufReader::new(File::open(path)?);
    let mut summary = ReplaySummary::default();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: BatchRecord = serde_json::from_str(&line)
            .map_err(|e| format!("{}:{}: {e}", path.display(), line_no + 1))?;

        clock.advance(record.advance_ms);
        let batch: Vec<DVector<f64>> = record.samples.into_iter().map(DVector::from_vec).collect();
        summary.batches += 1;

        match gate.robust_update(&batch, &record.provenance) {
            Ok(decision) if decision.is_accepted() => {
                summary.accepted += 1;
                println!("batch {:>4}: accepted {:?}", summary.batches, decision);
            }
            Ok(decision) => {
                summary.rejected += 1;
                let reason = decision.reason().unwrap_or_default();
                println!("batch {:>4}: rejected: {reason}", summary.batches);
            }
            Err(e) => {
                summary.errors += 1;
                warn!(batch = summary.batches, error = %e, "Update failed");
                println!("batch {:>4}: error: {e}", summary.batches);
            }
        }
    }

    Ok(summary)
}

fn load_golden(path: &Path) -> Result<Vec<DVector<f64>>, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    let rows: Vec<Vec<f64>> = serde_json::from_str(&content)?;
    Ok(rows.into_iter().map(DVector::from_vec).collect())
}

fn load_config(path: &Path) -> Result<ReplayConfig, Box<dyn std::error::Error>> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: ReplayConfig = toml::from_str(&content)?;
        Ok(config)
    } else {
        // Return default config if file doesn't exist
        Ok(ReplayConfig::default())
    }
}

fn setup_logging(
    config: &ReplayConfig,
    cli: &Cli,
) -> Result<Vec<tracing_appender::non_blocking::WorkerGuard>, Box<dyn std::error::Error>> {
    let mut logging = config.logging.clone();
    if let Some(format) = &cli.log_format {
        logging.stdout_format = format.parse::<LogFormat>()?;
    }
    init_logging(&logging, cli.log_level.as_deref())
}

fn write_snapshot(gate: &MultiModelGate, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let (adaptive, reference) = gate.models();
    let snapshot = ReplaySnapshot {
        mode: gate.mode(),
        metrics: gate.metrics(),
        adaptive,
        reference,
        checkpoints: gate.checkpoint_history(),
    };
    std::fs::write(path, serde_json::to_string_pretty(&snapshot)?)?;
    Ok(())
}

fn generate_sample_config(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let sample = ReplayConfig::default();
    let content = toml::to_string_pretty(&sample)?;

    let with_comments = format!(
        r#"# Anchored gate replay configuration
# See: gate_replay --help

{content}"#
    );

    std::fs::write(path, with_comments)?;
    println!("Sample config written to: {}", path.display());
    Ok(())
}
