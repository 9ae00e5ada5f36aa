//! Eviction agent - node-local pressure controller
//!
//! This binary runs as a DaemonSet on each Kubernetes node, tainting the
//! node while a resource is under pressure and evicting or demoting
//! workloads to relieve it.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use eviction_lib::{
    health::HealthRegistry, ConditionManager, Controller, KubeClusterClient, Telemetry,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Debug, Parser)]
#[command(name = "eviction-agent", version, about = "Node-local eviction controller")]
struct Cli {
    /// Config file (YAML, TOML or JSON)
    #[arg(
        long,
        env = "EVICTION_AGENT_CONFIG",
        default_value = "/etc/eviction-agent/config.yaml"
    )]
    config: PathBuf,

    /// Name of the node this agent manages
    #[arg(long, env = "NODE_NAME")]
    node_name: String,

    /// Serve health and metrics on this port (overrides the config file)
    #[arg(long)]
    metrics_port: Option<u16>,

    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer()).init(),
    }
}

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT received",
        _ = terminate => "SIGTERM received",
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!("Starting eviction-agent");

    let config = config::AgentConfig::load(&cli.config)?;
    let metrics_port = cli.metrics_port.or(config.metrics_port);
    info!(
        node_name = %cli.node_name,
        config_path = %cli.config.display(),
        taint_update_period_secs = config.taint_update_period_secs,
        "Agent configured"
    );

    let health = HealthRegistry::new();
    let telemetry = Telemetry::new(cli.node_name.clone(), health.clone());
    telemetry.logger.log_startup(AGENT_VERSION);

    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let cluster = Arc::new(
        KubeClusterClient::new(client, cli.node_name.clone())
            .with_key_prefix(config.taint_key_prefix.clone()),
    );

    let condition = Arc::new(
        ConditionManager::from_file(cli.config.clone(), cluster.clone())
            .context("Failed to load condition config")?
            .with_health(health.clone()),
    );

    let controller = Controller::builder()
        .condition(condition.clone())
        .cluster(cluster)
        .telemetry(telemetry.clone())
        .config(config.controller_config())
        .build()?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    // Start health and metrics server
    let api_handle = metrics_port.map(|port| {
        let state = Arc::new(api::AppState::new(health.clone()));
        tokio::spawn(api::serve(port, state, shutdown_tx.subscribe()))
    });

    let mut run = tokio::spawn(controller.run(shutdown_rx));
    let result = tokio::select! {
        result = &mut run => result,
        reason = shutdown_signal() => {
            telemetry.logger.log_shutdown(reason);
            let _ = shutdown_tx.send(());
            run.await
        }
    };

    let _ = shutdown_tx.send(());
    condition.stop();
    if let Some(handle) = api_handle {
        if let Ok(Err(e)) = handle.await {
            tracing::warn!(error = %e, "Health and metrics server failed");
        }
    }

    result.context("Controller task panicked")??;
    info!("Shutdown complete");

    Ok(())
}
