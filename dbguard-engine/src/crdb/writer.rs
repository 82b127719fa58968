//! The writer side of the CRDB bridge: routes `PUT`/`GET`/`DELETE`
//! calls CockroachDB makes while executing `BACKUP ... TO <url>` into
//! either the archive (immutable `.sst` shards) or an in-memory map of
//! small, frequently rewritten metadata files ("mem-fs"), exactly as
//! the source `backupWriter` does.

use std::{
    collections::BTreeMap,
    io::{self, Write},
    sync::{Arc, Mutex},
};

use axum::{
    body::Bytes,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use dbguard_core::archive::ArchiveWriter;

use crate::error::{EngineError, Result};

struct WriterInner {
    archive: ArchiveWriter<Box<dyn Write + Send>>,
    mem_fs: BTreeMap<String, Vec<u8>>,
}

/// Shared state for one backup's writer handler. Holds the archive
/// writer and mem-fs map behind a single lock, matching the source's
/// `reqLock` covering both.
pub struct WriterState {
    inner: Mutex<WriterInner>,
}

impl WriterState {
    pub fn new(sink: Box<dyn Write + Send>) -> Self {
        Self {
            inner: Mutex::new(WriterInner {
                archive: ArchiveWriter::new(sink),
                mem_fs: BTreeMap::new(),
            }),
        }
    }

    /// Flushes residual mem-fs entries into the archive and finalizes
    /// the footer. Requires this to be the last surviving reference,
    /// i.e. the bridge must have already deactivated its route to this
    /// state before calling.
    pub fn close(self: Arc<Self>) -> Result<()> {
        let state = Arc::try_unwrap(self)
            .map_err(|_| EngineError::EngineFailed("writer state still referenced at close".into()))?;
        let WriterInner { mut archive, mem_fs } = state.inner.into_inner().expect("writer lock poisoned");

        for (name, data) in mem_fs {
            archive.create(&name)?;
            archive.write(&data)?;
        }

        archive.close()?;
        Ok(())
    }

    fn content_length(headers: &HeaderMap) -> Result<Option<u64>> {
        match headers.get(axum::http::header::CONTENT_LENGTH) {
            None => Ok(None),
            Some(v) => {
                let text = v.to_str().map_err(|e| EngineError::EngineFailed(e.to_string()))?;
                let n: u64 = text
                    .parse()
                    .map_err(|_| EngineError::EngineFailed(format!("invalid content-length {text:?}")))?;
                Ok(Some(n))
            }
        }
    }

    /// Handles one HTTP call against the writer bridge. Runs entirely
    /// synchronously, including the write into `inner.archive`; callers
    /// MUST invoke this from `tokio::task::spawn_blocking` since the
    /// archive's underlying sink may itself block (e.g. a
    /// `ChannelSink`'s `blocking_send`).
    pub fn handle_blocking(
        self: &Arc<Self>,
        method: axum::http::Method,
        name: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Response {
        let content_length = match Self::content_length(headers) {
            Ok(v) => v,
            Err(e) => return bad_request(e),
        };

        if name.ends_with(".sst") {
            return self.handle_sst(method, name, content_length, body);
        }

        if name.starts_with("BACKUP") || name.starts_with("progress/BACKUP") {
            return self.handle_meta(method, name, content_length, body);
        }

        (StatusCode::BAD_REQUEST, format!("not sure what to do with {name}")).into_response()
    }

    fn handle_sst(
        self: &Arc<Self>,
        method: axum::http::Method,
        name: &str,
        content_length: Option<u64>,
        body: Bytes,
    ) -> Response {
        if method != axum::http::Method::PUT {
            return (
                StatusCode::METHOD_NOT_ALLOWED,
                format!("not sure what {method} should do"),
            )
                .into_response();
        }

        let mut inner = self.inner.lock().expect("writer lock poisoned");
        if let Err(e) = inner.archive.create(name) {
            return internal_error(e);
        }

        let n = match inner.archive.write(&body) {
            Ok(n) => n as u64,
            Err(e) => return internal_error(e),
        };

        if let Some(expected) = content_length {
            if n != expected {
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("read only {n} of {expected} byte"),
                )
                    .into_response();
            }
        }

        StatusCode::CREATED.into_response()
    }

    fn handle_meta(
        self: &Arc<Self>,
        method: axum::http::Method,
        name: &str,
        content_length: Option<u64>,
        body: Bytes,
    ) -> Response {
        let mut inner = self.inner.lock().expect("writer lock poisoned");

        match method {
            axum::http::Method::DELETE => {
                inner.mem_fs.remove(name);
                StatusCode::NO_CONTENT.into_response()
            }

            axum::http::Method::GET => match inner.mem_fs.get(name) {
                Some(data) => data.clone().into_response(),
                None => (StatusCode::NOT_FOUND, "you didn't send that").into_response(),
            },

            axum::http::Method::PUT => {
                let data = body.to_vec();
                if let Some(expected) = content_length {
                    if data.len() as u64 != expected {
                        return (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            format!("read only {} of {expected} byte", data.len()),
                        )
                            .into_response();
                    }
                }
                inner.mem_fs.insert(name.to_string(), data);
                StatusCode::CREATED.into_response()
            }

            other => (
                StatusCode::METHOD_NOT_ALLOWED,
                format!("not sure what {other} should do"),
            )
                .into_response(),
        }
    }
}

fn bad_request(e: impl std::fmt::Display) -> Response {
    (StatusCode::BAD_REQUEST, e.to_string()).into_response()
}

fn internal_error(e: impl std::fmt::Display) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;
    use dbguard_core::archive::ArchiveReader;
    use std::sync::{Arc as StdArc, Mutex as StdMutex};

    struct SharedBuf(StdArc<StdMutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn state() -> (Arc<WriterState>, StdArc<StdMutex<Vec<u8>>>) {
        let buf = StdArc::new(StdMutex::new(Vec::new()));
        let state = Arc::new(WriterState::new(Box::new(SharedBuf(buf.clone()))));
        (state, buf)
    }

    #[test]
    fn sst_put_then_close_produces_archive_entry() {
        let (state, buf) = state();

        let resp = state.handle_blocking(Method::PUT, "000001.sst", &HeaderMap::new(), Bytes::from_static(b"shard-bytes"));
        assert_eq!(resp.status(), StatusCode::CREATED);

        state.close().unwrap();

        let archived = buf.lock().unwrap().clone();
        let reader = ArchiveReader::open(archived.as_slice(), archived.len() as u64).unwrap();
        assert_eq!(reader.entry_size("000001.sst").unwrap(), 11);
    }

    #[test]
    fn meta_is_held_in_mem_fs_until_close_then_flushed_into_archive() {
        let (state, buf) = state();

        let put = state.handle_blocking(Method::PUT, "BACKUP_MANIFEST", &HeaderMap::new(), Bytes::from_static(b"manifest"));
        assert_eq!(put.status(), StatusCode::CREATED);

        let get = state.handle_blocking(Method::GET, "BACKUP_MANIFEST", &HeaderMap::new(), Bytes::new());
        assert_eq!(get.status(), StatusCode::OK);

        state.close().unwrap();

        let archived = buf.lock().unwrap().clone();
        let reader = ArchiveReader::open(archived.as_slice(), archived.len() as u64).unwrap();
        assert_eq!(reader.entry_size("BACKUP_MANIFEST").unwrap(), 8);
    }

    #[test]
    fn deleted_meta_never_reaches_the_archive() {
        let (state, buf) = state();

        state.handle_blocking(Method::PUT, "BACKUP_MANIFEST", &HeaderMap::new(), Bytes::from_static(b"manifest"));
        let delete = state.handle_blocking(Method::DELETE, "BACKUP_MANIFEST", &HeaderMap::new(), Bytes::new());
        assert_eq!(delete.status(), StatusCode::NO_CONTENT);

        state.close().unwrap();

        let archived = buf.lock().unwrap().clone();
        let reader = ArchiveReader::open(archived.as_slice(), archived.len() as u64).unwrap();
        assert_eq!(reader.entries().count(), 0);
    }

    #[test]
    fn content_length_mismatch_on_sst_is_rejected() {
        let (state, _buf) = state();

        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::CONTENT_LENGTH, "999".parse().unwrap());

        let resp = state.handle_blocking(Method::PUT, "a.sst", &headers, Bytes::from_static(b"short"));
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn unrecognized_name_is_bad_request() {
        let (state, _buf) = state();
        let resp = state.handle_blocking(Method::PUT, "whatever.txt", &HeaderMap::new(), Bytes::new());
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
