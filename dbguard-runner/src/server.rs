//! The worker's one long-lived HTTP listener, shared by two unrelated
//! concerns mounted at different paths: CockroachDB's bridge (the
//! `BackupSpec`'s `bridge_path`, when the cockroach engine is
//! selected) and the loopback-only `/ipc` control endpoint the `backup`
//! and `restore` subcommands talk to.

use std::{net::SocketAddr, sync::Arc};

use axum::Router;
use tokio::sync::broadcast;
use tracing::info;

use crate::{action::backup_all, error::Result, ipc, latch::ActionLatch, locations::Location, metrics::Metrics};
use dbguard_engine::Engine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<dyn Engine>,
    pub database: String,
    pub locations: Arc<Vec<Location>>,
    pub latch: Arc<ActionLatch>,
    pub metrics: Arc<Metrics>,
}

pub fn router(state: AppState, bridge_router: Option<(String, Router)>) -> Router {
    let mut router = ipc::router(state);

    if let Some((bridge_path, bridge_router)) = bridge_router {
        let mount = format!("/{}", bridge_path.trim_matches('/'));
        router = router.nest(&mount, bridge_router);
    }

    router
}

/// Binds and serves `router` until `shutdown` resolves.
pub async fn serve(listen_addr: SocketAddr, router: Router, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    info!(%listen_addr, "http server listening");

    axum::Server::bind(&listen_addr)
        .serve(router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            info!("http server observed shutdown signal, draining");
        })
        .await
        .map_err(std::io::Error::other)?;

    Ok(())
}

/// Invoked by the scheduler on each firing; shares the same
/// latch/metrics bookkeeping as an IPC-triggered backup so a scheduled
/// and an on-demand backup can never race each other.
pub async fn scheduled_backup(state: &AppState) -> Result<()> {
    let _guard = state.latch.acquire()?;
    let result = backup_all(
        state.engine.as_ref(),
        &state.database,
        &state.locations,
        state.metrics.clone(),
    )
    .await;
    state.metrics.record_backup_result(result.is_ok());
    result
}
