use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

mod api;
mod config;

use config::Config;
use share_bus::BusConsumer;
use stats_server::db::StatsDb;
use stats_server::server::{self, StatsServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_args()?;
    info!("starting stats-server");
    info!(
        "bus: {} topic {} group {}",
        config.bus_address, config.bus_topic, config.bus_group
    );
    info!("HTTP server: {}", config.http_address);
    info!("worker DB: {}", config.db_path);

    let db = Arc::new(StatsDb::new(&config.db_path).await?);
    let stats = Arc::new(StatsServer::new(config.worker_idle_secs));

    let http_address = config.http_address.clone();
    let stats_for_http = stats.clone();
    tokio::spawn(async move {
        if let Err(e) = api::run_http_server(http_address, stats_for_http).await {
            error!("HTTP server error: {}", e);
        }
    });

    let stats_for_flush = stats.clone();
    let flush_period = Duration::from_secs(config.flush_interval_secs.max(1));
    let batch_size = config.flush_batch_size;
    tokio::spawn(async move {
        server::run_flusher(stats_for_flush, db, flush_period, batch_size).await;
    });

    let stats_for_shutdown = stats.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            stats_for_shutdown.stop();
        }
    });

    let consumer = BusConsumer::new(config.bus_address, config.bus_topic, config.bus_group);
    server::run_ingest(stats, consumer).await?;

    Ok(())
}
