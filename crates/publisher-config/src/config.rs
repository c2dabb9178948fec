//! Publisher configuration.

use crate::{ConfigError, ConfigResult, Paths};
use publish_pipeline::{PipelineConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";
/// Topic published to when none is given.
pub const DEFAULT_TOPIC: &str = "tutorial/topic";

/// Environment variable overriding `log_level`.
pub const ENV_LOG_LEVEL: &str = "TOPIC_PUBLISHER_LOG_LEVEL";
/// Environment variable overriding `publish.topic`.
pub const ENV_TOPIC: &str = "TOPIC_PUBLISHER_TOPIC";

/// What to publish and how often.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishSettings {
    pub topic: String,
    /// Pause between submissions.
    pub interval_ms: u64,
    /// Payload size in KiB.
    pub message_size_kb: usize,
    /// Bound on TCP connect and the session handshake.
    pub connect_timeout_ms: u64,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            interval_ms: 250,
            message_size_kb: 1,
            connect_timeout_ms: 10_000,
        }
    }
}

/// Queueing, retry and shutdown tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub queue_capacity: usize,
    pub in_flight_cap: usize,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub ack_timeout_ms: u64,
    pub sweep_interval_ms: u64,
    pub drain_timeout_ms: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        let defaults = PipelineConfig::default();
        Self {
            queue_capacity: defaults.queue_capacity,
            in_flight_cap: defaults.in_flight_cap,
            max_attempts: defaults.retry.max_attempts,
            base_delay_ms: defaults.retry.base_delay.as_millis() as u64,
            max_delay_ms: defaults.retry.max_delay.as_millis() as u64,
            ack_timeout_ms: defaults.ack_timeout.as_millis() as u64,
            sweep_interval_ms: defaults.sweep_interval.as_millis() as u64,
            drain_timeout_ms: defaults.drain_timeout.as_millis() as u64,
        }
    }
}

/// Main publisher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub publish: PublishSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            publish: PublishSettings::default(),
            pipeline: PipelineSettings::default(),
        }
    }
}

impl Config {
    /// Load `<base>/config.json` if present, then apply environment overrides.
    pub fn load(paths: &Paths) -> ConfigResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to `<base>/config.json`.
    pub fn save(&self, paths: &Paths) -> ConfigResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Apply overrides from `lookup` (the process environment in production).
    /// Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(log_level) = non_empty(ENV_LOG_LEVEL) {
            self.log_level = log_level;
        }
        if let Some(topic) = non_empty(ENV_TOPIC) {
            self.publish.topic = topic;
        }
    }

    /// Reject settings the publisher cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.publish.topic.trim().is_empty() {
            return Err(ConfigError::Invalid("publish.topic must not be empty".to_string()));
        }
        let pipeline = &self.pipeline;
        for (name, value) in [
            ("publish.interval_ms", self.publish.interval_ms),
            ("pipeline.queue_capacity", pipeline.queue_capacity as u64),
            ("pipeline.in_flight_cap", pipeline.in_flight_cap as u64),
            ("pipeline.max_attempts", u64::from(pipeline.max_attempts)),
            ("pipeline.sweep_interval_ms", pipeline.sweep_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be at least 1")));
            }
        }
        if pipeline.base_delay_ms > pipeline.max_delay_ms {
            return Err(ConfigError::Invalid(
                "pipeline.base_delay_ms must not exceed pipeline.max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Pipeline settings as the publish pipeline expects them.
    pub fn pipeline_config(&self) -> PipelineConfig {
        let pipeline = &self.pipeline;
        PipelineConfig {
            queue_capacity: pipeline.queue_capacity,
            in_flight_cap: pipeline.in_flight_cap,
            retry: RetryPolicy {
                max_attempts: pipeline.max_attempts,
                base_delay: Duration::from_millis(pipeline.base_delay_ms),
                max_delay: Duration::from_millis(pipeline.max_delay_ms),
            },
            ack_timeout: Duration::from_millis(pipeline.ack_timeout_ms),
            sweep_interval: Duration::from_millis(pipeline.sweep_interval_ms),
            drain_timeout: Duration::from_millis(pipeline.drain_timeout_ms),
        }
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish.interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.publish.connect_timeout_ms)
    }
}
