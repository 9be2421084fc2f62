//! Node wiring: the admin service, the cluster coordinator, the scheduler
//! timer and the HTTP listener.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::sync::watch;
use tracing::{error, info};

use tidegate_admin::{AdminResult, AdminService};
use tidegate_cluster::{ClusterSyncCoordinator, HttpTransport, PeerTransport, SyncSettings, peer_router};
use tidegate_core::AdminConfig;
use tidegate_metrics::{AdminMetrics, render_prometheus};
use tidegate_scheduler::ProcessLauncher;

/// One admin-plane node: the service plus the coordinator polling its peers.
pub struct Node {
    pub service: Arc<AdminService>,
    pub coordinator: Arc<ClusterSyncCoordinator>,
}

impl Node {
    pub fn new(service: Arc<AdminService>, transport: Arc<dyn PeerTransport>) -> Self {
        let settings = SyncSettings::from_config(service.config());
        let coordinator = Arc::new(ClusterSyncCoordinator::new(
            service.clone(),
            transport,
            settings,
        ));
        Self {
            service,
            coordinator,
        }
    }

    /// Service metrics plus the coordinator's view of its peers.
    pub fn metrics(&self) -> AdminResult<AdminMetrics> {
        Ok(self
            .service
            .metrics()?
            .with_cluster(self.coordinator.peer_statuses(), self.coordinator.counters()))
    }

    /// Peer routes plus `GET /metrics`.
    pub fn router(self: &Arc<Self>) -> Router {
        let cluster = &self.service.config().cluster;
        peer_router(self.service.clone(), &cluster.username, &cluster.password).merge(
            Router::new()
                .route("/metrics", get(metrics))
                .with_state(self.clone()),
        )
    }
}

/// GET /metrics
async fn metrics(State(node): State<Arc<Node>>) -> Response {
    match node.metrics() {
        Ok(metrics) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            render_prometheus(&metrics),
        )
            .into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

/// Run a node until Ctrl-C.
pub async fn run_node(config: AdminConfig) -> anyhow::Result<()> {
    info!("Tidegate daemon starting");

    std::fs::create_dir_all(&config.admin.data_dir)?;

    // ── Admin service ──────────────────────────────────────────

    let service = Arc::new(AdminService::open(config.clone(), Arc::new(ProcessLauncher))?);
    let reports = service.bootstrap()?;
    let rows: usize = reports.iter().map(|r| r.loaded).sum();
    info!(domains = reports.len(), rows, "runtime loaded from disk");

    let transport = HttpTransport::new(&config.cluster.username, &config.cluster.password);
    let node = Arc::new(Node::new(service.clone(), Arc::new(transport)));
    info!(
        sync_domains = node.coordinator.settings().domains.len(),
        advertise = ?config.cluster.advertise,
        "cluster sync initialized"
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_shutdown = shutdown_rx.clone();
    let cluster_shutdown = shutdown_rx.clone();

    // ── Background tasks ───────────────────────────────────────

    let scheduler = service.scheduler().clone();
    let scheduler_handle = tokio::spawn(async move {
        scheduler.run(scheduler_shutdown).await;
    });

    let coordinator = node.coordinator.clone();
    let cluster_handle = tokio::spawn(async move {
        coordinator.run(cluster_shutdown).await;
    });

    // ── HTTP listener (peers + metrics) ────────────────────────

    let listener = tokio::net::TcpListener::bind(&config.cluster.listen).await?;
    info!(addr = %config.cluster.listen, "cluster listener starting");

    let server = axum::serve(listener, node.router()).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C; shutting down");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Launched jobs are never cancelled; only the timers stop.
    let _ = scheduler_handle.await;
    let _ = cluster_handle.await;

    info!("Tidegate daemon stopped");
    Ok(())
}
