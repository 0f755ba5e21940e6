//! Subsystem assembly and the long-running daemon.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use fleetmend_controller::{ControllerSettings, RemediationController, SweepReport, SweepSettings, Sweeper};
use fleetmend_core::{ComputeControlPlane, FleetConfig, MetricsProvider};
use fleetmend_health::{EvaluatorSettings, HealthEvaluator};
use fleetmend_state::{RecordStore, StateStore};

/// Everything the daemon runs, wired together.
struct Assembly {
    controller: Arc<RemediationController>,
    sweeper: Arc<Sweeper>,
}

fn assemble(config: &FleetConfig) -> anyhow::Result<Assembly> {
    // Record store.
    let db_path = Path::new(&config.store.path);
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let records: Arc<dyn RecordStore> = Arc::new(StateStore::open(db_path)?);
    info!(path = %config.store.path, "record store opened");

    // Gateway clients.
    let (compute, metrics) = fleetmend_provider::clients_from_config(&config.provider)?;
    let compute: Arc<dyn ComputeControlPlane> = Arc::new(compute);
    let metrics: Arc<dyn MetricsProvider> = Arc::new(metrics);
    info!(
        compute = %config.provider.compute_address,
        metrics = %config.provider.metrics_address,
        "gateway clients configured"
    );

    // Controller.
    let settings = ControllerSettings::from_config(&config.controller)?;
    let controller = Arc::new(RemediationController::new(compute.clone(), records, settings));
    info!(
        max_pending = settings.max_pending,
        pending_ttl_secs = settings.pending_ttl.as_secs(),
        "remediation controller initialized"
    );

    // Health evaluator + sweeper.
    let evaluator = Arc::new(HealthEvaluator::new(
        metrics,
        EvaluatorSettings::from_config(&config.health)?,
    ));
    let sweeper = Arc::new(Sweeper::new(
        controller.clone(),
        evaluator,
        compute,
        SweepSettings::from_config(&config.sweep),
    ));

    Ok(Assembly { controller, sweeper })
}

/// Run one sweep against the configured fleet.
pub async fn sweep_once(config: FleetConfig) -> anyhow::Result<SweepReport> {
    let assembly = assemble(&config)?;
    assembly.sweeper.sweep_once().await
}

/// Run the sweep loop and API server until Ctrl-C.
pub async fn run(config: FleetConfig) -> anyhow::Result<()> {
    info!("FleetMend daemon starting");

    let Assembly { controller, sweeper } = assemble(&config)?;
    let interval = config.sweep.interval()?;

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Sweep loop ─────────────────────────────────────────────

    let sweep_handle = tokio::spawn(async move {
        sweeper.run(interval, shutdown_rx).await;
    });

    // ── API server ─────────────────────────────────────────────

    let router = fleetmend_api::build_router(controller);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c, shutting down");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    if let Err(e) = sweep_handle.await {
        warn!(error = %e, "sweep task ended abnormally");
    }

    info!("FleetMend daemon stopped");
    Ok(())
}
