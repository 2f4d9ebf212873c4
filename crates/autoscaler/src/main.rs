//! Autoscaler - demand-driven instance scaling daemon
//!
//! Collects host, accelerator and workload metrics, forecasts demand and
//! scales the managed instance fleet. Exposes status and control over HTTP.

use anyhow::{Context, Result};
use autoscale_lib::{
    collector::{
        CollectionLoopBuilder, ControlSignals, GpuProbe, MetricsCollector, NvidiaSmiProbe,
        ProcHostProbe, WorkloadGauge,
    },
    health::HealthRegistry,
    journal::Journal,
    ScalingManager, SimulatedCloud,
};
use autoscaler::{api, config::DaemonConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting autoscaler");

    let config = DaemonConfig::load()?;
    info!(
        region = %config.scaling.region,
        api_port = config.api_port,
        "Autoscaler configured"
    );

    let journal = match &config.journal_dir {
        Some(dir) => Journal::open(dir)
            .with_context(|| format!("Failed to open journal at {}", dir.display()))?,
        None => Journal::disabled(),
    };
    let journal = Arc::new(journal);

    let health_registry = HealthRegistry::with_all_components().await;

    let host = match &config.proc_path {
        Some(path) => ProcHostProbe::with_proc_path(path),
        None => ProcHostProbe::new(),
    };
    let gpu: Option<Arc<dyn GpuProbe>> = if config.gpu_probe {
        Some(Arc::new(NvidiaSmiProbe::new(config.nvidia_smi.clone())))
    } else {
        None
    };
    let workload = Arc::new(WorkloadGauge::new());
    let collector = Arc::new(MetricsCollector::new(
        Arc::new(host),
        gpu,
        workload.clone(),
        Arc::new(ControlSignals::new()),
    ));

    let cloud = SimulatedCloud::new(Duration::from_secs(config.simulated_cloud.boot_latency_secs))
        .with_running(
            config.simulated_cloud.initial_instances,
            &config.scaling.launch.instance_type,
        );

    let mut builder = ScalingManager::builder()
        .config(config.scaling.clone())
        .collector(collector.clone())
        .provider(Arc::new(cloud))
        .journal(journal)
        .health(health_registry.clone());
    if let Some(dir) = &config.model_dir {
        builder = builder.model_dir(dir);
    }
    let manager = Arc::new(builder.build()?);

    if let Err(e) = manager.restore().await {
        warn!(error = %e, "Failed to restore persisted state, starting fresh");
    }

    // Collection runs on its own timer; the manager reads the store
    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let collection = CollectionLoopBuilder::new()
        .collector(collector)
        .store(manager.store().clone())
        .interval(Duration::from_secs(config.collection_interval_secs))
        .health(health_registry.clone())
        .build()?;
    let collection_handle = tokio::spawn(collection.run(shutdown_tx.subscribe()));

    manager.start().await?;

    let app_state = Arc::new(api::AppState::new(manager.clone(), workload));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    // Mark autoscaler as ready after initialization
    health_registry.set_ready(true).await;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    health_registry.set_ready(false).await;

    if let Err(e) = manager.stop().await {
        warn!(error = %e, "Scaling manager did not stop cleanly");
    }
    let _ = shutdown_tx.send(());
    if let Err(e) = collection_handle.await {
        warn!(error = %e, "Collection loop task failed");
    }
    api_handle.abort();

    Ok(())
}
