//! `POST /ipc`: the loopback-only control endpoint a sibling `backup`
//! or `restore` CLI invocation talks to. Requests are fire-and-forget
//! — the action is spawned and outlives the HTTP request that
//! triggered it, so a slow or failed action is never visible to the
//! caller beyond the initial 201.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use tracing::{error, info};

use crate::{action, cli::RestoreMode, server::AppState};

#[derive(Debug, Deserialize)]
struct IpcRequest {
    action: String,
    #[serde(default)]
    args: Vec<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new().route("/ipc", post(handler)).with_state(state)
}

async fn handler(
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
    body: Option<Json<IpcRequest>>,
) -> impl IntoResponse {
    if !peer.ip().is_loopback() {
        return (StatusCode::FORBIDDEN, "ipc is loopback-only").into_response();
    }

    let Some(Json(request)) = body else {
        return (StatusCode::BAD_REQUEST, "malformed ipc request body").into_response();
    };

    match request.action.as_str() {
        "backup" => {
            spawn_backup(state);
            StatusCode::CREATED.into_response()
        }
        "restore" => match parse_restore_args(&request.args) {
            Ok((mode, identifier)) => {
                spawn_restore(state, mode, identifier);
                StatusCode::CREATED.into_response()
            }
            Err(reason) => (StatusCode::BAD_REQUEST, reason).into_response(),
        },
        other => (StatusCode::BAD_REQUEST, format!("unknown action {other:?}")).into_response(),
    }
}

fn parse_restore_args(args: &[String]) -> Result<(RestoreMode, String), String> {
    let [mode, identifier] = args else {
        return Err("restore requires exactly two args: [mode, identifier]".to_string());
    };

    let mode = match mode.as_str() {
        "name" => RestoreMode::Name,
        "point-in-time" => RestoreMode::PointInTime,
        other => return Err(format!("unknown restore mode {other:?}")),
    };

    Ok((mode, identifier.clone()))
}

fn spawn_backup(state: AppState) {
    tokio::spawn(async move {
        let _guard = match state.latch.acquire() {
            Ok(guard) => guard,
            Err(_) => {
                state.metrics.record_concurrent_rejection();
                info!("backup rejected: another action is already running");
                return;
            }
        };

        info!("backup action accepted via ipc");
        let result = action::backup_all(
            state.engine.as_ref(),
            &state.database,
            &state.locations,
            state.metrics.clone(),
        )
        .await;
        state.metrics.record_backup_result(result.is_ok());
        if let Err(e) = result {
            error!(error = %e, "backup action failed");
        }
    });
}

fn spawn_restore(state: AppState, mode: RestoreMode, identifier: String) {
    tokio::spawn(async move {
        let _guard = match state.latch.acquire() {
            Ok(guard) => guard,
            Err(_) => {
                state.metrics.record_concurrent_rejection();
                info!("restore rejected: another action is already running");
                return;
            }
        };

        info!(?mode, %identifier, "restore action accepted via ipc");
        let result = action::restore(
            state.engine.as_ref(),
            &state.database,
            mode,
            &identifier,
            &state.locations,
        )
        .await;
        if let Err(e) = &result {
            error!(error = %e, "restore action failed");
        }
    });
}
