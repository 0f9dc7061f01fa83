//! Disk pressure agent
//!
//! Runs on each node, watching the filesystem that holds images and
//! container layers. Under pressure it reclaims dead containers and unused
//! images, then taints the node and evicts pods until usage recovers.

use agent_lib::{
    clock::{Clock, SystemClock},
    health::HealthRegistry,
    monitor::{DiskMonitor, FilesystemMonitor},
    observability::{AgentMetrics, StructuredLogger},
    pressure::PressureLoopBuilder,
    runtime::{Scenario, SimulatedNode},
    status::{NodeStatus, StatusBoard},
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

use config::{AgentConfig, DiskSource};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting disk-pressure-agent");

    let config = AgentConfig::load().context("Invalid agent configuration")?;
    info!(
        node_name = %config.node_name,
        disk_source = config.disk_source.as_str(),
        high_threshold_percent = config.high_threshold_percent,
        low_threshold_percent = config.low_threshold_percent,
        "Agent configured"
    );

    let health_registry = HealthRegistry::new();

    let metrics = AgentMetrics::new();
    let logger = StructuredLogger::new(&config.node_name);
    logger.log_startup(AGENT_VERSION, config.disk_source.as_str());

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let node = Arc::new(load_node(&config, clock.clone())?);
    let monitor: Arc<dyn DiskMonitor> = match config.disk_source {
        DiskSource::Simulated => node.clone(),
        DiskSource::Filesystem => Arc::new(FilesystemMonitor::new(&config.disk_path)),
    };

    let thresholds = config.thresholds();
    let status = StatusBoard::new(NodeStatus::initial(
        config.node_name.clone(),
        thresholds.high_percent,
        thresholds.low_percent,
    ));

    let pressure_loop = PressureLoopBuilder::new()
        .node_name(config.node_name.clone())
        .monitor(monitor)
        .runtime(node.clone())
        .orchestrator(node)
        .clock(clock)
        .health(health_registry.clone())
        .status(status.clone())
        .config(config.pressure_config())
        .build()?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let loop_handle = tokio::spawn(pressure_loop.run(shutdown_rx));

    let app_state = Arc::new(api::AppState::new(health_registry, metrics, status));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            logger.log_shutdown("SIGINT received");
        }
        result = api_handle => {
            match result {
                Ok(Err(e)) => warn!(error = %e, "API server exited"),
                Err(e) => warn!(error = %e, "API server task failed"),
                Ok(Ok(())) => {}
            }
            logger.log_shutdown("API server stopped");
        }
    }

    let _ = shutdown_tx.send(());
    if let Err(e) = loop_handle.await {
        warn!(error = %e, "Pressure loop task failed");
    }
    info!("Shutting down");

    Ok(())
}

/// Build the node the agent manages.
///
/// Images, pods and dead containers come from the scenario file. Without
/// one the node starts empty and only the disk monitor is meaningful.
fn load_node(config: &AgentConfig, clock: Arc<dyn Clock>) -> Result<SimulatedNode> {
    match &config.scenario_path {
        Some(path) => SimulatedNode::from_scenario_file(path, clock)
            .with_context(|| format!("Failed to load scenario {}", path.display())),
        None => {
            warn!(
                disk_path = %config.disk_path.display(),
                "No scenario configured, runtime inventory is empty and nothing can be reclaimed"
            );
            Ok(SimulatedNode::with_clock(
                Scenario::new(config.node_name.clone(), 0),
                clock,
            ))
        }
    }
}
