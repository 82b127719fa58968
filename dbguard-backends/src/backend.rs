//! Low-level object transport. A [`Backend`] knows how to move bytes
//! under a key; it carries no opinion about retention, labels or
//! encryption — that policy lives one layer up, in [`crate::manager`].

use std::path::Path;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;

pub type ByteStream = BoxStream<'static, std::io::Result<bytes::Bytes>>;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Uploads `body` under `key`. `size`, if known up front, lets
    /// implementations set a `Content-Length` header; `None` forces a
    /// chunked/streamed upload.
    async fn put_stream(&self, key: &str, body: ByteStream, size: Option<u64>) -> Result<()>;

    /// Downloads the object at `key` into `dest`, a fresh local file.
    /// Returns the number of bytes written.
    async fn get_to_file(&self, key: &str, dest: &Path) -> Result<u64>;

    /// Lists every key currently stored under `prefix`, without the
    /// prefix itself.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;
}
