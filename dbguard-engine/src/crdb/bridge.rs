//! Switches a single HTTP route between the writer and reader bridge
//! depending on whether a backup or a restore is in flight. Exactly
//! one of the two is ever active at a time; `dbguard-runner`'s
//! single-action latch is what guarantees that, not this type.

use std::sync::{Arc, RwLock};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};

use super::{reader::ReaderState, writer::WriterState};

enum Mode {
    Idle,
    Writing(Arc<WriterState>),
    Reading(Arc<ReaderState>),
}

/// The HTTP endpoint CockroachDB is pointed at via its `BACKUP ... TO
/// 'http://<bridge_path>'` / `RESTORE ... FROM` URL. Requests land on
/// [`handler`] and are dispatched to whichever bridge is currently
/// active.
pub struct Bridge {
    mode: RwLock<Mode>,
}

impl Bridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            mode: RwLock::new(Mode::Idle),
        })
    }

    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/*path", any(handler))
            .with_state(self.clone())
    }

    pub fn activate_writer(&self, state: Arc<WriterState>) {
        *self.mode.write().expect("bridge lock poisoned") = Mode::Writing(state);
    }

    pub fn activate_reader(&self, state: Arc<ReaderState>) {
        *self.mode.write().expect("bridge lock poisoned") = Mode::Reading(state);
    }

    pub fn deactivate(&self) {
        *self.mode.write().expect("bridge lock poisoned") = Mode::Idle;
    }
}

async fn handler(
    State(bridge): State<Arc<Bridge>>,
    Path(path): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mode_snapshot = {
        let guard = bridge.mode.read().expect("bridge lock poisoned");
        match &*guard {
            Mode::Idle => None,
            Mode::Writing(state) => Some(Mode::Writing(state.clone())),
            Mode::Reading(state) => Some(Mode::Reading(state.clone())),
        }
    };

    match mode_snapshot {
        None => (StatusCode::NOT_FOUND, "no backup or restore in progress").into_response(),

        Some(Mode::Reading(state)) => {
            tokio::task::spawn_blocking(move || state.handle(method, &path, &headers, body))
                .await
                .expect("reader task panicked")
        }

        Some(Mode::Writing(state)) => {
            tokio::task::spawn_blocking(move || state.handle_blocking(method, &path, &headers, body))
                .await
                .expect("writer task panicked")
        }

        Some(Mode::Idle) => unreachable!(),
    }
}
