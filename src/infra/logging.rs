//! Structured logging setup.
//!
//! Installs a `tracing-subscriber` registry with:
//! - An `EnvFilter` from `RUST_LOG` or an explicit override
//! - Stdout output in pretty, JSON or compact form
//! - An optional daily-rolling JSON file via `tracing-appender`
//!
//! # Targets
//!
//! | Target | Description |
//! |--------|-------------|
//! | `anchored_gate::gate` | Update decisions, breakers, rollbacks, checkpoints |
//! | `anchored_gate::estimator` | Per-stage estimator diagnostics |
//!
//! ```bash
//! # Estimator internals only
//! RUST_LOG=warn,anchored_gate::estimator=trace gate_replay --golden g.json --batches b.jsonl
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable format with colors
    #[default]
    Pretty,
    /// JSON format (best for log aggregation)
    Json,
    /// Compact single-line format
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            other => Err(format!("unknown log format '{other}' (pretty|json|compact)")),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Directory for the rolling log file; no file logging when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Level for the file stream
    #[serde(default = "default_file_level")]
    pub file_level: String,

    /// Default stdout level when `RUST_LOG` is unset
    #[serde(default = "default_stdout_level")]
    pub stdout_level: String,

    #[serde(default = "default_enable_stdout")]
    pub enable_stdout: bool,

    #[serde(default)]
    pub stdout_format: LogFormat,
}

fn default_file_level() -> String {
    "info".to_string()
}

fn default_stdout_level() -> String {
    "info".to_string()
}

fn default_enable_stdout() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            file_level: default_file_level(),
            stdout_level: default_stdout_level(),
            enable_stdout: default_enable_stdout(),
            stdout_format: LogFormat::default(),
        }
    }
}

impl LogConfig {
    /// Pretty stdout, no files.
    pub fn development() -> Self {
        Self::default()
    }

    /// JSON stdout plus a daily-rolling file in `log_dir`.
    pub fn production(log_dir: PathBuf) -> Self {
        Self {
            log_dir: Some(log_dir),
            stdout_format: LogFormat::Json,
            ..Default::default()
        }
    }
}

/// Initialize logging based on configuration.
///
/// Returns the `WorkerGuard`s of non-blocking writers; keep them alive for
/// the duration of the program so buffered lines are flushed.
///
/// ```ignore
/// let _guards = init_logging(&LogConfig::production("logs".into()), None)?;
/// ```
pub fn init_logging(
    config: &LogConfig,
    env_filter_override: Option<&str>,
) -> Result<Vec<WorkerGuard>, Box<dyn std::error::Error>> {
    let mut guards = Vec::new();

    let base_filter = match env_filter_override {
        Some(filter) => EnvFilter::new(filter),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.stdout_level)),
    };

    let file_layer = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "anchored-gate.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);
            Some(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .json()
                    .with_filter(EnvFilter::new(&config.file_level)),
            )
        }
        None => None,
    };

    let registry = tracing_subscriber::registry().with(file_layer);

    if !config.enable_stdout {
        registry.try_init()?;
    } else {
        match config.stdout_format {
            LogFormat::Json => registry
                .with(fmt::layer().json().with_filter(base_filter))
                .try_init()?,
            LogFormat::Compact => registry
                .with(fmt::layer().compact().with_filter(base_filter))
                .try_init()?,
            LogFormat::Pretty => registry
                .with(fmt::layer().with_target(false).with_filter(base_filter))
                .try_init()?,
        }
    }

    if let Some(dir) = &config.log_dir {
        eprintln!("File logging enabled: {}", dir.display());
    }

    Ok(guards)
}
