use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use quakemesh::api::UsgsClient;
use quakemesh::config::{AppConfig, CONFIG_PATH};
use quakemesh::dispatch::AlertDispatcher;
use quakemesh::monitor::{MonitorConfig, QuakeMonitor, ShutdownSignal};
use quakemesh::transport::{MeshRadio, NoopTransport};

#[derive(Parser)]
#[command(name = "quakemesh", about = "Earthquake feed monitor relaying alerts onto a mesh radio")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Log alerts instead of transmitting on the radio
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let mut config = AppConfig::load_or_default(&args.config)?;
    config.apply_env_overrides()?;

    let mode = if args.dry_run { "dry-run" } else { "radio" };
    info!(
        "Starting quakemesh ({mode}) — bounds {},{} to {},{} min_mag={} poll={}s",
        config.bounds.min_latitude,
        config.bounds.min_longitude,
        config.bounds.max_latitude,
        config.bounds.max_longitude,
        config.feed.min_magnitude,
        config.settings.poll_interval_secs,
    );

    let shutdown = ShutdownSignal::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
                shutdown.request();
            }
        });
    }

    let feed = UsgsClient::new(config.feed.host.clone(), config.bounds.clone());
    let monitor_config = MonitorConfig {
        min_magnitude: config.feed.min_magnitude,
        limit: config.feed.limit,
        poll_interval: Duration::from_secs(config.settings.poll_interval_secs),
    };
    let pacing = Duration::from_secs(config.radio.pacing_secs);

    if args.dry_run {
        let dispatcher = AlertDispatcher::new(NoopTransport, pacing);
        QuakeMonitor::new(feed, dispatcher, monitor_config, shutdown)
            .run()
            .await;
    } else {
        let radio = MeshRadio::bind(&config.radio).await?;
        let dispatcher = AlertDispatcher::new(radio, pacing);
        QuakeMonitor::new(feed, dispatcher, monitor_config, shutdown)
            .run()
            .await;
    }

    Ok(())
}
