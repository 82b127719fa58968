use dbguard_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage backend IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage backend request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("storage backend rejected request: {status} {body}")]
    BadResponse { status: u16, body: String },

    #[error("object not found: {key}")]
    NotFound { key: String },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("invalid endpoint URL: {0}")]
    InvalidEndpoint(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;
