use dbguard_core::CoreError;
use thiserror::Error;

/// Errors surfaced by a backup engine (CockroachDB bridge or PostgreSQL
/// subprocess wrapper). Storage and archive errors bubble up through
/// `#[from]` rather than being re-described here.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database refused backup/restore: {0}")]
    EngineFailed(String),

    #[error("invalid database identifier {name:?}: must match ^[A-Za-z0-9_$]+$")]
    InvalidDatabaseName { name: String },

    #[error("a backup/restore is already in progress on this engine")]
    AlreadyActive,

    #[error("subprocess {program} exited with status {status}")]
    SubprocessFailed { program: String, status: String },

    #[error("unknown engine {name:?}")]
    UnknownEngine { name: String },

    #[error("connecting to database: {0}")]
    Connect(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
