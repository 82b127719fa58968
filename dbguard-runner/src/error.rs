use dbguard_backends::StorageError;
use dbguard_core::CoreError;
use dbguard_engine::EngineError;
use thiserror::Error;

/// Errors surfaced by the orchestrator. Library concerns (archive,
/// crypto, retention, storage, engine) bubble up through `#[from]`;
/// everything orchestration-specific gets its own variant.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {reason}")]
    ConfigInvalid { reason: String },

    #[error("a backup or restore is already running on this worker")]
    Concurrent,

    #[error("no storage location yielded a usable backup")]
    NotFound,

    #[error("background task panicked: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("ipc request failed: {0}")]
    Ipc(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, RunnerError>;
