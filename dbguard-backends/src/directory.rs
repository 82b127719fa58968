//! Local-directory backend. Used for the `dbguard-unpack` staging
//! area and for development/testing, mirroring the teacher's
//! `Directory` backend but over `tokio::fs` rather than `std::fs` plus
//! an LRU read cache, since this backend's reads are one-shot
//! downloads rather than the teacher's many small repeated object
//! reads.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::{fs, io::AsyncWriteExt};

use crate::{
    backend::{Backend, ByteStream},
    error::{Result, StorageError},
};

#[derive(Clone)]
pub struct DirectoryBackend {
    root: PathBuf,
}

impl DirectoryBackend {
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl Backend for DirectoryBackend {
    async fn put_stream(&self, key: &str, mut body: ByteStream, _size: Option<u64>) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&path).await?;
        while let Some(chunk) = body.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn get_to_file(&self, key: &str, dest: &Path) -> Result<u64> {
        let source = self.path_for(key);
        if fs::metadata(&source).await.is_err() {
            return Err(StorageError::NotFound {
                key: key.to_string(),
            });
        }

        fs::copy(&source, dest).await?;
        Ok(fs::metadata(dest).await?.len())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = self.path_for(prefix);
        let mut out = Vec::new();

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                out.push(name.to_string());
            }
        }
        Ok(out)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(fs::metadata(self.path_for(key)).await.is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;

    fn stream_of(data: &'static [u8]) -> ByteStream {
        Box::pin(stream::once(async move { Ok(Bytes::from(data)) }))
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = DirectoryBackend::new(tmp.path()).await.unwrap();

        backend
            .put_stream("ns-db/backup-1", stream_of(b"hello world"), None)
            .await
            .unwrap();

        let dest = tmp.path().join("out.bin");
        let written = backend.get_to_file("ns-db/backup-1", &dest).await.unwrap();
        assert_eq!(written, 11);
        assert_eq!(fs::read(&dest).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn missing_key_get_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = DirectoryBackend::new(tmp.path()).await.unwrap();
        let dest = tmp.path().join("out.bin");
        assert!(matches!(
            backend.get_to_file("nope", &dest).await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn list_reflects_uploaded_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = DirectoryBackend::new(tmp.path()).await.unwrap();
        backend
            .put_stream("ns-db/a", stream_of(b"1"), None)
            .await
            .unwrap();
        backend
            .put_stream("ns-db/b", stream_of(b"2"), None)
            .await
            .unwrap();

        let mut names = backend.list("ns-db").await.unwrap();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = DirectoryBackend::new(tmp.path()).await.unwrap();
        backend.delete("never-existed").await.unwrap();
    }
}
