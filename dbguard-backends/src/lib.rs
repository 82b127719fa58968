//! Object storage adapters: a transport-level [`backend::Backend`]
//! trait implemented for S3-compatible stores and local directories,
//! and a [`manager::StorageManager`] that layers GFS retention on top.

pub mod backend;
pub mod directory;
pub mod error;
pub mod manager;
pub mod s3;

pub use backend::{Backend, ByteStream};
pub use directory::DirectoryBackend;
pub use error::StorageError;
pub use manager::{DownloadedObject, StorageManager};
pub use s3::S3Backend;
