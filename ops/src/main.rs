//! `dlqctl` - operator tool for the travel message relay.
//!
//! Connects to RabbitMQ with settings from the environment (a `.env` file is
//! loaded first), runs one command, prints its result as JSON on stdout and
//! closes the connection. Logs go to stderr.
//!
//! ```bash
//! dlqctl requeue --family all --max 500
//! dlqctl peek --queue travel.admin.dlq --mode browse > dead.json
//! dlqctl resend --file message.json --queue travel.bookings
//! dlqctl list-queues travel.parking
//! ```

mod cli;
mod commands;

use anyhow::Context;
use clap::Parser;
use cli::Cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use travel_messaging_runtime::RelayConfig;
use travel_messaging_runtime::metrics::MetricsRecorder;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if present)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let mut recorder = MetricsRecorder::new();
    if cli.metrics_file.is_some() {
        recorder.start().context("Failed to install metrics recorder")?;
    }

    let mut config = RelayConfig::from_env().context("Invalid relay configuration")?;
    cli.broker.apply(&mut config);
    config.validate().context("Invalid relay configuration")?;

    let outcome = commands::run(cli.command, &config, cli.broker.placement.into()).await;

    if let Some(path) = &cli.metrics_file {
        if let Err(e) = recorder.write_textfile(path) {
            tracing::error!(error = %e, path = %path.display(), "Failed to write metrics");
        }
    }

    outcome
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "dlqctl=info,travel_messaging_runtime=info,travel_messaging_amqp=info".into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}
