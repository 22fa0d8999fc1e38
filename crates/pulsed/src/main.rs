//! Pulse daemon - autoscaling control plane
//!
//! Wires the decision engine to its workers: bus ingestion, backlog probe,
//! node monitor, and the orchestrator tick, plus the HTTP API for health,
//! metrics, and status.

use anyhow::Result;
use pulse_core::{
    backlog::BacklogProbe,
    health::{components, HealthRegistry},
    ingest,
    memory::MemoryOptimizer,
    models::BacklogSignal,
    nodes::{NodeHealthSignal, NodeMonitor, NodeScaler},
    observability::{ControlLogger, PulseMetrics},
    orchestrator::{Orchestrator, OrchestratorInputs, StatusSnapshot},
    replicas::ReplicaController,
    PulseConfig,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod sim;

const PULSE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Channel capacity for raw bus payloads and decoded samples.
const BUS_CHANNEL_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting pulsed");

    // Configuration: a load failure is the one error that exits.
    let daemon_config = config::DaemonConfig::load()?;
    let pulse_config = PulseConfig::load(daemon_config.config_file.as_deref())?;
    info!(
        deployment = %pulse_config.deployment,
        namespace = %pulse_config.namespace,
        "Engine configured"
    );

    // Health registry
    let health_registry = HealthRegistry::new();
    health_registry.register(components::ORCHESTRATOR).await;
    health_registry.register(components::NODE_MONITOR).await;
    health_registry.register(components::BACKLOG_PROBE).await;
    health_registry.register(components::BUS_INGEST).await;

    // Metrics and structured logging
    let metrics = PulseMetrics::new();
    let logger = ControlLogger::new(pulse_config.deployment.clone());
    logger.log_startup(PULSE_VERSION, pulse_config.tick_interval_secs);

    // Cluster backend: the bundled in-memory backend; provider adapters
    // implement the same traits.
    let cluster = Arc::new(sim::SimCluster::new(
        &pulse_config.namespace,
        &pulse_config.deployment,
        daemon_config.sim_nodes,
        daemon_config.sim_replicas,
    ));

    // Channels between workers
    let (shutdown_tx, _) = broadcast::channel(1);
    let (bus_tx, bus_rx) = mpsc::channel::<Vec<u8>>(BUS_CHANNEL_CAPACITY);
    let (sample_tx, sample_rx) = mpsc::channel(BUS_CHANNEL_CAPACITY);
    let (backlog_tx, backlog_rx) = watch::channel(BacklogSignal::Unknown);
    let (node_health_tx, node_health_rx) = watch::channel(NodeHealthSignal::Unknown);
    let (node_event_tx, node_event_rx) = mpsc::channel(64);
    let (status_tx, status_rx) = watch::channel(StatusSnapshot::default());

    // Background workers. An ingest pump that stops outside of shutdown
    // means the bus subscription is gone; readiness must reflect that.
    let ingest_handle = {
        let registry = health_registry.clone();
        let metrics = metrics.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        let ingest_shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            ingest::run(bus_rx, sample_tx, metrics, ingest_shutdown).await;
            if shutdown_rx.try_recv().is_err() {
                registry
                    .set_unhealthy(components::BUS_INGEST, "bus subscription lost")
                    .await;
            }
        })
    };
    let probe = BacklogProbe::new(cluster.clone(), &pulse_config);
    let probe_handle = tokio::spawn(probe.run(backlog_tx, shutdown_tx.subscribe()));
    let monitor = NodeMonitor::new(cluster.clone(), &pulse_config);
    let monitor_handle = tokio::spawn(monitor.run(
        node_health_tx,
        node_event_tx,
        shutdown_tx.subscribe(),
    ));

    // The decision loop
    let orchestrator = Orchestrator::new(
        pulse_config.clone(),
        cluster.clone(),
        ReplicaController::new(cluster.clone(), &pulse_config),
        NodeScaler::new(cluster.clone(), &pulse_config),
        MemoryOptimizer::new(cluster.clone(), &pulse_config),
        OrchestratorInputs {
            sample_rx,
            backlog_rx,
            node_health_rx,
            node_event_rx,
        },
        status_tx,
        metrics.clone(),
    );
    let orchestrator_handle = tokio::spawn(orchestrator.run(shutdown_tx.subscribe()));

    // API server
    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics.clone(),
        status_rx,
        bus_tx,
    ));
    let api_handle = tokio::spawn(api::serve(daemon_config.api_port, app_state));

    health_registry.set_ready(true).await;

    // Wait for shutdown signal; workers finish in-flight work, then stop.
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    let _ = shutdown_tx.send(());

    let _ = tokio::join!(ingest_handle, probe_handle, monitor_handle, orchestrator_handle);
    api_handle.abort();
    info!("Shutdown complete");

    Ok(())
}
