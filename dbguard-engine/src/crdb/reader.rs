//! The reader side of the CRDB bridge: serves `GET`/`PUT`/`DELETE`
//! calls CockroachDB makes while executing `RESTORE ... FROM <url>`.
//! `.sst` shards come straight out of the decrypted archive (with
//! `Range` support, since CockroachDB fetches shards in chunks);
//! everything else is served from an in-memory scratch map CockroachDB
//! uses to stage its own restore-progress bookkeeping.

use std::{
    collections::BTreeMap,
    sync::Mutex,
};

use axum::{
    body::Bytes,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use dbguard_core::archive::ArchiveReader;
use positioned_io::ReadAt;
use regex::Regex;

use crate::{dynreadat::DynReadAt, error::EngineError, error::Result};

/// Shared state for one restore's reader handler.
pub struct ReaderState {
    archive: ArchiveReader<DynReadAt>,
    mem_fs: Mutex<BTreeMap<String, Vec<u8>>>,
}

fn range_re() -> Regex {
    Regex::new(r"^bytes=(\d*)-(\d*)$").expect("static regex")
}

impl ReaderState {
    /// `source` is whatever the orchestrator already decrypted (or the
    /// raw download, if the location has no passphrase); `size` is its
    /// plaintext length.
    pub fn open(source: DynReadAt, size: u64) -> Result<Self> {
        let archive = ArchiveReader::open(source, size).map_err(EngineError::Core)?;

        Ok(Self {
            archive,
            mem_fs: Mutex::new(BTreeMap::new()),
        })
    }

    /// Handles one HTTP call against the reader bridge. Blocking only
    /// in the sense that it performs synchronous file reads; safe to
    /// call directly from an async handler since `ReadAt` on a local
    /// file does not yield.
    pub fn handle(&self, method: axum::http::Method, name: &str, headers: &HeaderMap, body: Bytes) -> Response {
        let is_get = method == axum::http::Method::GET;
        let mut response = if self.archive.entries().any(|e| e == name) {
            self.handle_archive_entry(method, name, headers)
        } else {
            self.handle_scratch(method, name, body)
        };

        if is_get {
            response.headers_mut().insert(
                axum::http::header::ACCEPT_RANGES,
                axum::http::HeaderValue::from_static("bytes"),
            );
        }

        response
    }

    fn handle_archive_entry(&self, method: axum::http::Method, name: &str, headers: &HeaderMap) -> Response {
        if method != axum::http::Method::GET {
            return (
                StatusCode::METHOD_NOT_ALLOWED,
                format!("not sure what {method} should do with an archived entry"),
            )
                .into_response();
        }

        let total = match self.archive.entry_size(name) {
            Ok(n) => n,
            Err(e) => return internal_error(e),
        };

        let (start, end) = match parse_range(headers, total) {
            Ok(range) => range,
            Err(e) => return bad_request(e),
        };

        let slice = match self.archive.entry(name) {
            Ok(s) => s,
            Err(e) => return internal_error(e),
        };

        let want = (end - start) as usize;
        let mut buf = vec![0u8; want];
        if let Err(e) = slice.read_exact_at(start, &mut buf) {
            return internal_error(e);
        }

        if start == 0 && end == total {
            buf.into_response()
        } else {
            let mut resp = buf.into_response();
            *resp.status_mut() = StatusCode::PARTIAL_CONTENT;
            resp.headers_mut().insert(
                axum::http::header::CONTENT_RANGE,
                format!("bytes {start}-{}/{total}", end.saturating_sub(1))
                    .parse()
                    .expect("valid header value"),
            );
            resp
        }
    }

    fn handle_scratch(&self, method: axum::http::Method, name: &str, body: Bytes) -> Response {
        let mut mem_fs = self.mem_fs.lock().expect("reader lock poisoned");

        match method {
            axum::http::Method::GET => match mem_fs.get(name) {
                Some(data) => data.clone().into_response(),
                None => (StatusCode::NOT_FOUND, "you didn't send that").into_response(),
            },
            axum::http::Method::PUT => {
                mem_fs.insert(name.to_string(), body.to_vec());
                StatusCode::CREATED.into_response()
            }
            axum::http::Method::DELETE => {
                mem_fs.remove(name);
                StatusCode::NO_CONTENT.into_response()
            }
            other => (
                StatusCode::METHOD_NOT_ALLOWED,
                format!("not sure what {other} should do"),
            )
                .into_response(),
        }
    }
}

fn parse_range(headers: &HeaderMap, total: u64) -> std::result::Result<(u64, u64), String> {
    let Some(value) = headers.get(axum::http::header::RANGE) else {
        return Ok((0, total));
    };

    let text = value.to_str().map_err(|e| e.to_string())?;
    let caps = range_re()
        .captures(text)
        .ok_or_else(|| format!("unparseable range {text:?}"))?;

    let start: u64 = match &caps[1] {
        "" => 0,
        digits => digits.parse().map_err(|_| format!("bad range start in {text:?}"))?,
    };
    let end = match &caps[2] {
        "" => total,
        digits => digits
            .parse::<u64>()
            .map_err(|_| format!("bad range end in {text:?}"))?
            + 1,
    };

    if start > end || end > total {
        return Err(format!("range {text:?} out of bounds for {total} byte entry"));
    }

    Ok((start, end))
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
    use dbguard_core::archive::ArchiveWriter;
    use std::io::{Seek, SeekFrom, Write as _};

    fn fixture() -> ReaderState {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        {
            let mut writer = ArchiveWriter::new(tmp.as_file_mut());
            writer.create("000001.sst").unwrap();
            writer.write(b"0123456789").unwrap();
            writer.close().unwrap();
        }

        let mut file = tmp.reopen().unwrap();
        let size = file.seek(SeekFrom::End(0)).unwrap();

        ReaderState::open(DynReadAt(Box::new(file)), size).unwrap()
    }

    #[test]
    fn full_get_returns_whole_entry() {
        let state = fixture();
        let resp = state.handle(axum::http::Method::GET, "000001.sst", &HeaderMap::new(), Bytes::new());
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn ranged_get_returns_partial_content() {
        let state = fixture();
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::RANGE, "bytes=2-5".parse().unwrap());

        let resp = state.handle(axum::http::Method::GET, "000001.sst", &headers, Bytes::new());
        assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    }

    #[test]
    fn open_ended_range_runs_to_end_of_file() {
        let state = fixture();
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::RANGE, "bytes=8-".parse().unwrap());

        let resp = state.handle(axum::http::Method::GET, "000001.sst", &headers, Bytes::new());
        assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    }

    #[test]
    fn missing_start_defaults_to_zero() {
        let state = fixture();
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::RANGE, "bytes=-5".parse().unwrap());

        let resp = state.handle(axum::http::Method::GET, "000001.sst", &headers, Bytes::new());
        assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    }

    #[test]
    fn out_of_bounds_range_is_bad_request() {
        let state = fixture();
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::RANGE, "bytes=0-999".parse().unwrap());

        let resp = state.handle(axum::http::Method::GET, "000001.sst", &headers, Bytes::new());
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn unknown_name_falls_through_to_scratch_map() {
        let state = fixture();

        let put = state.handle(axum::http::Method::PUT, "progress", &HeaderMap::new(), Bytes::from_static(b"x"));
        assert_eq!(put.status(), StatusCode::CREATED);

        let get = state.handle(axum::http::Method::GET, "progress", &HeaderMap::new(), Bytes::new());
        assert_eq!(get.status(), StatusCode::OK);

        let missing = state.handle(axum::http::Method::GET, "never-put", &HeaderMap::new(), Bytes::new());
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
