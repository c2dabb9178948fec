//! # Observability
//!
//! Logging setup shared by every topic publisher crate.
//!
//! Libraries only use `tracing` macros; the binary calls
//! [`init_with_config`] once at startup. Two sinks are available:
//!
//! - **JSONL file**: one structured object per event, appended to
//!   `log_path`. Follow it with `tail -f publisher.jsonl | jq`.
//! - **stderr**: compact human-readable lines.
//!
//! `RUST_LOG` overrides `default_level` for both.
//!
//! ## Usage
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "topic-publisher".into(),
//!     default_level: "debug".into(),
//!     log_path: Some("/tmp/publisher.jsonl".into()),
//!     ..Default::default()
//! })?;
//! tracing::info!("ready");
//! ```

mod json_layer;
mod writer;

pub use json_layer::{JsonLayer, LogEntry};
pub use writer::LogFileWriter;

use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the logging system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Written into every JSONL line.
    pub service_name: String,

    /// Default filter (e.g. "debug", "info,publish_pipeline=trace").
    /// Overridden by `RUST_LOG`.
    pub default_level: String,

    /// JSONL file sink. Disabled when `None`.
    pub log_path: Option<PathBuf>,

    /// Compact stderr output.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: true,
        }
    }
}

/// Errors raised while installing the subscriber.
#[derive(Error, Debug)]
pub enum InitError {
    /// The log file could not be opened
    #[error("Failed to open log file {path:?}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A global subscriber is already installed
    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(#[from] TryInitError),
}

/// Install the global subscriber described by `config`.
pub fn init_with_config(config: LogConfig) -> Result<(), InitError> {
    let json_layer = match &config.log_path {
        Some(path) => {
            let writer = LogFileWriter::open(path).map_err(|source| InitError::LogFile {
                path: path.clone(),
                source,
            })?;
            Some(
                JsonLayer::new(config.service_name.clone(), writer)
                    .with_filter(env_filter(&config.default_level)),
            )
        }
        None => None,
    };

    let stderr_layer = config.also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(io::stderr)
            .with_filter(env_filter(&config.default_level))
    });

    tracing_subscriber::registry()
        .with(json_layer)
        .with(stderr_layer)
        .try_init()?;

    tracing::debug!(
        service = %config.service_name,
        log_path = ?config.log_path,
        "Logging initialized"
    );
    Ok(())
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}
