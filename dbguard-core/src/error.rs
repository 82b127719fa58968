use std::io;

use thiserror::Error;

/// Errors shared across the archive codec, crypto stream and retention
/// store. Engine- and storage-specific errors live in their own crates
/// and wrap this one via `#[from]`.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("archive entry already exists: {name}")]
    EntryExists { name: String },

    #[error("archive entry not found: {name}")]
    EntryNotFound { name: String },

    #[error("no file currently open for writing")]
    NoFileOpen,

    #[error("archive footer too large: index is {size} bytes, footer holds {max}")]
    FooterTooLarge { size: usize, max: usize },

    #[error("archive footer corrupt: {reason}")]
    FooterCorrupt { reason: String },

    #[error("crypto stream header invalid: {reason}")]
    CryptoHeaderInvalid { reason: String },

    #[error("invalid salt length {0}")]
    InvalidSaltLength(usize),

    #[error("no labels were available to add, entry not retained")]
    NoLabelsAdded,

    #[error("no backup found for point-in-time")]
    NoBackupFound,

    #[error("(de)serializing YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("parsing time {value} with format {format}: {reason}")]
    TimeParse {
        value: String,
        format: String,
        reason: String,
    },

    #[error("invalid configuration: {reason}")]
    ConfigInvalid { reason: String },
}

pub type Result<T> = std::result::Result<T, CoreError>;
