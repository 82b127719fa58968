//! Worker orchestrator entry point. `run` (the long-lived scheduler +
//! HTTP server) and `backup`/`restore` (one-shot IPC clients against an
//! already-running `run` process) share the same config loading and
//! location bootstrapping so both paths see the same storage targets.

mod action;
pub mod cli;
mod error;
mod ipc;
mod latch;
mod locations;
mod logging;
mod metrics;
mod scheduler;
mod server;

use std::sync::Arc;

use dbguard_core::config::{BackupSpec, StorageConfig};
use dbguard_engine::crdb::Bridge;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

use cli::{Cli, Command, RestoreMode};
use error::{Result, RunnerError};
use latch::ActionLatch;
use metrics::Metrics;
use server::AppState;

fn backup_spec_path(cli: &Cli) -> std::path::PathBuf {
    cli.config_dir.join("backup.yaml")
}

fn storage_spec_path(cli: &Cli) -> std::path::PathBuf {
    cli.config_dir.join("storage.yaml")
}

async fn build_state(cli: &Cli, spec: &BackupSpec, storage: &StorageConfig) -> Result<(AppState, Option<(String, axum::Router)>)> {
    let bridge_host = cli.base_url.clone().unwrap_or_else(|| cli.listen_addr.to_string());
    let bridge = Bridge::new();

    let engine = dbguard_engine::build_engine(&spec.engine, bridge_host, bridge.clone())?;
    let locations = locations::build(&storage.locations).await?;

    let state = AppState {
        engine,
        database: spec.name.clone(),
        locations: Arc::new(locations),
        latch: Arc::new(ActionLatch::default()),
        metrics: Arc::new(Metrics::default()),
    };

    let bridge_router = spec
        .engine
        .cockroach
        .as_ref()
        .map(|cockroach| (cockroach.bridge_path.clone(), bridge.router()));

    Ok((state, bridge_router))
}

async fn shutdown_signal() {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received ctrl-c"),
        _ = sigterm.recv() => info!("received sigterm"),
    }
}

async fn run_server(cli: &Cli) -> Result<()> {
    let spec = BackupSpec::load(&backup_spec_path(cli))?;
    let storage = StorageConfig::load(&storage_spec_path(cli))?;

    let (state, bridge_router) = build_state(cli, &spec, &storage).await?;
    let router = server::router(state.clone(), bridge_router);

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    let server_shutdown = shutdown_tx.subscribe();
    let listen_addr = cli.listen_addr;
    let server_task = tokio::spawn(server::serve(listen_addr, router, server_shutdown));

    let scheduler_shutdown = shutdown_tx.subscribe();
    let scheduler_state = state.clone();
    let schedule = spec.schedule.clone();
    let scheduler_task = tokio::spawn(async move {
        let metrics = scheduler_state.metrics.clone();
        scheduler::run(schedule, &metrics, scheduler_shutdown, || {
            let state = scheduler_state.clone();
            async move { server::scheduled_backup(&state).await }
        })
        .await
    });

    shutdown_signal().await;
    info!("shutting down");
    let _ = shutdown_tx.send(());

    server_task.await??;
    scheduler_task.await??;

    Ok(())
}

fn ipc_base_url(cli: &Cli) -> String {
    format!("http://127.0.0.1:{}", cli.listen_addr.port())
}

async fn send_ipc(cli: &Cli, action: &str, args: Vec<String>) -> Result<()> {
    #[derive(serde::Serialize)]
    struct Request {
        action: String,
        args: Vec<String>,
    }

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/ipc", ipc_base_url(cli)))
        .json(&Request {
            action: action.to_string(),
            args,
        })
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(RunnerError::ConfigInvalid {
            reason: format!("ipc request rejected ({status}): {body}"),
        });
    }

    Ok(())
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    logging::init(&cli.log_level);

    match &cli.command {
        Command::Run => run_server(&cli).await?,
        Command::Backup => {
            send_ipc(&cli, "backup", Vec::new()).await?;
            info!("backup requested");
        }
        Command::Restore { mode, identifier } => {
            let mode_str = match mode {
                RestoreMode::Name => "name",
                RestoreMode::PointInTime => "point-in-time",
            };
            send_ipc(&cli, "restore", vec![mode_str.to_string(), identifier.clone()]).await?;
            info!("restore requested");
        }
    }

    Ok(())
}
