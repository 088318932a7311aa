//! `cluster-worker`: runs the stream consumer loop (C1 -> C3 -> C4 -> C2).

use clap::Parser;
use clustering_service::{worker, AppConfig, AppContext};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::parse();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if config.metrics_enabled {
        clustering_service::telemetry::install(config.metrics_port)?;
    }

    let ctx = AppContext::new(config).await?;
    worker::run(ctx).await
}
