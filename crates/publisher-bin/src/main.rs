//! Topic publisher - publishes a fixed-size message to a broker topic on an
//! interval, with acknowledged delivery, retries and a graceful drain on exit.
//!
//! Usage: topic-publisher <host:port> <client-username@message-vpn> [client-password] [topic]

mod app;
mod cli;

use app::RunSettings;
use broker_transport::SessionConfig;
use clap::Parser;
use cli::Cli;
use publisher_config::{init_logging, Config, Paths};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match &cli.base_dir {
        Some(base) => Paths::with_base_dir(base.clone()),
        None => Paths::new()?,
    };
    let mut config = Config::load(&paths)?;
    cli.apply_to(&mut config);
    config.validate()?;

    init_logging(&config.log_level, &paths)?;
    info!(
        host = %cli.broker.host,
        port = cli.broker.port,
        username = %cli.credentials.username,
        vpn = %cli.credentials.vpn,
        topic = %config.publish.topic,
        "Topic publisher initializing"
    );

    let mut session = SessionConfig::new(
        cli.broker.host.clone(),
        cli.broker.port,
        cli.credentials.username.clone(),
        cli.credentials.vpn.clone(),
    )
    .with_connect_timeout(config.connect_timeout());
    if let Some(password) = &cli.password {
        session = session.with_password(password.clone());
    }

    let settings = RunSettings {
        session,
        pipeline: config.pipeline_config(),
        topic: config.publish.topic.clone(),
        interval: config.publish_interval(),
        message_size_kb: config.publish.message_size_kb,
        count: cli.count,
    };

    let stop = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    };
    let summary = app::run(settings, stop).await?;

    if !summary.shutdown.drained_cleanly {
        warn!(
            abandoned = summary.shutdown.abandoned,
            "Exited before every message was confirmed"
        );
    }
    Ok(())
}
