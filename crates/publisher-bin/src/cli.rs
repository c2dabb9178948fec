//! Command-line arguments.

use clap::Parser;
use publisher_config::Config;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Port assumed when the broker address has none.
pub const DEFAULT_BROKER_PORT: u16 = 55555;

/// Argument validation errors. clap prints these with the usage line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CliError {
    #[error("Expected <client-username@message-vpn>, got '{0}'")]
    MalformedCredentials(String),

    #[error("No client-username entered")]
    MissingUsername,

    #[error("No message-vpn entered")]
    MissingVpn,

    #[error("Invalid broker address '{0}', expected <host:port>")]
    InvalidAddress(String),
}

/// `client-username@message-vpn`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub vpn: String,
}

impl FromStr for Credentials {
    type Err = CliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((username, vpn)) = s.split_once('@') else {
            return Err(CliError::MalformedCredentials(s.to_string()));
        };
        if vpn.contains('@') {
            return Err(CliError::MalformedCredentials(s.to_string()));
        }
        if username.is_empty() {
            return Err(CliError::MissingUsername);
        }
        if vpn.is_empty() {
            return Err(CliError::MissingVpn);
        }
        Ok(Self {
            username: username.to_string(),
            vpn: vpn.to_string(),
        })
    }
}

/// `host[:port]`, or `[ipv6][:port]`. The host is stored without brackets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

impl FromStr for BrokerAddress {
    type Err = CliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CliError::InvalidAddress(s.to_string());
        let parse_port = |port: &str| port.parse::<u16>().map_err(|_| invalid());

        let (host, port) = if let Some(bracketed) = s.strip_prefix('[') {
            let (host, rest) = bracketed.split_once(']').ok_or_else(invalid)?;
            let port = match rest {
                "" => DEFAULT_BROKER_PORT,
                _ => parse_port(rest.strip_prefix(':').ok_or_else(invalid)?)?,
            };
            (host, port)
        } else {
            let (host, port) = match s.rsplit_once(':') {
                Some((host, port)) => (host, parse_port(port)?),
                None => (s, DEFAULT_BROKER_PORT),
            };
            if host.contains(':') {
                return Err(invalid());
            }
            (host, port)
        };
        if host.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

/// Publish a fixed-size message to a broker topic until interrupted.
#[derive(Parser, Debug)]
#[command(name = "topic-publisher")]
#[command(about = "Publish messages to a broker topic with acknowledged, retried delivery")]
#[command(version)]
pub struct Cli {
    /// Broker address
    #[arg(value_name = "HOST:PORT")]
    pub broker: BrokerAddress,

    /// Session credentials
    #[arg(value_name = "CLIENT-USERNAME@MESSAGE-VPN")]
    pub credentials: Credentials,

    /// Client password
    #[arg(value_name = "CLIENT-PASSWORD")]
    pub password: Option<String>,

    /// Topic to publish to. Empty falls back to the configured topic.
    #[arg(value_name = "TOPIC")]
    pub topic: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Base directory for config and logs. Defaults to ~/.topic-publisher
    #[arg(long)]
    pub base_dir: Option<PathBuf>,

    /// Milliseconds between messages
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Message size in KiB
    #[arg(long)]
    pub message_size_kb: Option<usize>,

    /// Stop after this many messages instead of running until Ctrl-C
    #[arg(long)]
    pub count: Option<u64>,
}

impl Cli {
    /// Layer command-line values over the loaded configuration.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(topic) = self.topic.as_deref().filter(|t| !t.is_empty()) {
            config.publish.topic = topic.to_string();
        }
        if let Some(interval_ms) = self.interval_ms {
            config.publish.interval_ms = interval_ms;
        }
        if let Some(size) = self.message_size_kb {
            config.publish.message_size_kb = size;
        }
    }
}
