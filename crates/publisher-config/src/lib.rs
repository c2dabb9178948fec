//! Configuration, paths and logging setup for the topic publisher.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, PipelineSettings, PublishSettings, DEFAULT_LOG_LEVEL, DEFAULT_TOPIC, ENV_LOG_LEVEL,
    ENV_TOPIC,
};
pub use error::{ConfigError, ConfigResult};
pub use logging::{init_logging, SERVICE_NAME};
pub use paths::Paths;
