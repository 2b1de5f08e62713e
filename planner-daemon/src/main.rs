//! Plugin registry host
//!
//! Runs the planner's plugin registry so actuator plugins can register and
//! stay health-checked. Planning loops embed the library together with an
//! `IntentController` and their own `StateSource`; this process only hosts
//! the registry.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use intent_planner::planner::Planner;
use intent_planner::{APlanner, PlannerSettings};

#[derive(Parser)]
#[command(name = "intent-planner")]
#[command(version)]
#[command(about = "Hosts the actuator plugin registry of the A* planner; runs no planning loop")]
struct Cli {
    /// Path to the TOML or JSON configuration; defaults apply when omitted.
    #[arg(long, env = "INTENT_PLANNER_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter directive, overrides `generic.log_filter`.
    #[arg(long, env = "INTENT_PLANNER_LOG")]
    log_filter: Option<String>,

    /// Override the registry endpoint.
    #[arg(long)]
    plugin_manager_endpoint: Option<String>,

    /// Override the registry port.
    #[arg(long)]
    plugin_manager_port: Option<u16>,
}

fn init_logging(filter: &str) -> anyhow::Result<()> {
    tracing_log::LogTracer::init().context("failed to bridge log records")?;
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_ansi(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to install the subscriber")?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => PlannerSettings::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => PlannerSettings::default(),
    };
    if let Some(endpoint) = cli.plugin_manager_endpoint {
        settings.planner.astar.plugin_manager_endpoint = endpoint;
    }
    if let Some(port) = cli.plugin_manager_port {
        settings.planner.astar.plugin_manager_port = port;
    }
    settings.validate().context("invalid configuration")?;

    let filter = cli
        .log_filter
        .unwrap_or_else(|| settings.generic.log_filter.clone());
    init_logging(&filter)?;

    let planner = APlanner::start(Vec::new(), settings.planner.astar.clone())
        .await
        .context("failed to start the plugin registry")?;
    tracing::info!(
        "Planner ready; plugins register at {:?}.",
        planner.registry().local_addr()
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for the shutdown signal")?;
    tracing::info!("Shutting down.");
    planner.stop().await;
    Ok(())
}
