//! Logging initialization for the publisher.

use crate::{ConfigResult, Paths};
use observability::LogConfig;

/// Service name written into every log line.
pub const SERVICE_NAME: &str = "topic-publisher";

/// Initialize logging: JSONL to `<base>/logs/publisher.jsonl` plus compact
/// stderr output. `RUST_LOG` takes precedence over `level`.
pub fn init_logging(level: &str, paths: &Paths) -> ConfigResult<()> {
    observability::init_with_config(log_config(level, paths))?;
    Ok(())
}

fn log_config(level: &str, paths: &Paths) -> LogConfig {
    LogConfig {
        service_name: SERVICE_NAME.into(),
        default_level: level.into(),
        log_path: Some(paths.log_file()),
        also_stderr: true,
    }
}
