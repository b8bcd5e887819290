//! shardgate governance node
//!
//! Boots a sharding data source from a TOML bootstrap file, prints the
//! published metadata and keeps renewing it from the registry center
//! until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use shardgate_common::BootstrapConfig;
use shardgate_governance::{MemoryDataSourceFactory, PrometheusExporter, RegistryRepositoryFactory, bootstrap};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "shardgate")]
#[command(about = "shardgate governance node")]
#[command(version)]
struct Args {
    /// Bootstrap configuration file path
    #[arg(short, long, env = "SHARDGATE_CONFIG", default_value = "/etc/shardgate/shardgate.toml")]
    config: String,

    /// Log level (overrides the configuration file)
    #[arg(long)]
    log_level: Option<String>,

    /// Print renewal metrics in Prometheus text format on shutdown
    #[arg(long)]
    metrics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = BootstrapConfig::load(&args.config)
        .with_context(|| format!("failed to load bootstrap configuration from {}", args.config))?;

    // Initialize logging
    let level = args.log_level.clone().unwrap_or_else(|| config.logging.level.clone());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting shardgate for schema {}", config.schema);
    info!("Mode: {:?}", config.mode.mode_type);

    let registries = RegistryRepositoryFactory::new();
    let data_source = bootstrap(&config, Arc::new(MemoryDataSourceFactory::new()), &registries)
        .await
        .context("bootstrap failed")?;

    let summary = data_source.metadata()?.summary();
    println!("{}", serde_json::to_string_pretty(&summary)?);

    tokio::signal::ctrl_c().await.ok();
    info!("Shutting down...");

    if args.metrics {
        let exporter = PrometheusExporter::default();
        print!("{}", exporter.export(data_source.contexts().metrics()));
    }
    data_source.close().await?;

    Ok(())
}
