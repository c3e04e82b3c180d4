//! Herald Server
//!
//! Standalone registration agent with an admin HTTP surface.

use clap::Parser;
use herald_core::{init_telemetry, DiscoveryConfig, TelemetryConfig};
use herald_discovery::DiscoveryAgent;
use herald_registry::{HealthStatus, ZooKeeperConfig, ZooKeeperStore};
use std::path::PathBuf;
use std::sync::Arc;

/// Herald server CLI
#[derive(Parser, Debug)]
#[command(name = "herald-server")]
#[command(about = "Service-discovery registration agent")]
#[command(version)]
struct Cli {
    /// Discovery configuration file (JSON)
    #[arg(short, long, env = "HERALD_CONFIG")]
    config: Option<PathBuf>,

    /// ZooKeeper connect string; overrides the configuration file
    #[arg(short, long, env = "HERALD_ZOOKEEPER")]
    zookeeper: Option<String>,

    /// Service name to publish under
    #[arg(short, long, default_value = "herald")]
    service: String,

    /// Port peers should connect to
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Admin bind address
    #[arg(short, long, default_value = "0.0.0.0:8081")]
    bind: String,

    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut telemetry = TelemetryConfig::from_env();
    telemetry.service_name = cli.service.clone();
    match cli.verbose {
        0 => {}
        1 => telemetry = telemetry.with_log_level("debug"),
        _ => telemetry = telemetry.with_log_level("trace"),
    }
    if cli.json_logs {
        telemetry = telemetry.with_json();
    }
    init_telemetry(telemetry)?;

    let mut config = match &cli.config {
        Some(path) => DiscoveryConfig::from_json_file(path)?,
        None => DiscoveryConfig::default(),
    };
    if let Some(zookeeper) = cli.zookeeper {
        config = config.with_zookeeper(zookeeper);
    }
    config.validate()?;
    tracing::info!(
        service = %cli.service,
        zookeeper = %config.zookeeper,
        namespace = %config.namespace,
        environment = %config.environment,
        "Herald server starting"
    );

    let store = ZooKeeperStore::new(ZooKeeperConfig::new(
        config.zookeeper.clone(),
        config.namespace.clone(),
    ))?;
    let agent = Arc::new(
        DiscoveryAgent::builder(config, cli.service.clone(), cli.port)
            .store(Arc::new(store))
            .probe(Arc::new(|| HealthStatus::Healthy))
            .build()?,
    );
    agent.start().await?;

    let listener = tokio::net::TcpListener::bind(&cli.bind).await?;
    tracing::info!(bind = %cli.bind, "Admin server listening");
    agent.server_status().mark_started();

    axum::serve(listener, herald_server::router(agent.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    agent.stop().await?;
    tracing::info!("Herald server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
