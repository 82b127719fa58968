//! S3-compatible backend, grounded on the teacher's `rusty-s3` +
//! `reqwest` pattern (signed URLs, no SDK). Works against AWS S3, GCS,
//! and MinIO alike, matching the object store this tooling originally
//! targeted.

use std::{path::Path, time::Duration};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use rusty_s3::{actions::S3Action, Bucket, Credentials, UrlStyle};
use tokio::{fs::File, io::AsyncWriteExt};

use crate::{
    backend::{Backend, ByteStream},
    error::{Result, StorageError},
};

const SIGN_DURATION: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct S3Backend {
    client: Client,
    bucket: Bucket,
    credentials: Credentials,
}

impl S3Backend {
    pub fn new(
        endpoint: &str,
        bucket: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        path_style: bool,
    ) -> Result<Self> {
        let url = endpoint
            .parse()
            .map_err(|_| StorageError::InvalidEndpoint(endpoint.to_string()))?;

        let style = if path_style {
            UrlStyle::Path
        } else {
            UrlStyle::VirtualHost
        };

        let bucket = Bucket::new(url, style, bucket.to_string(), region.to_string())
            .map_err(|e| StorageError::InvalidEndpoint(e.to_string()))?;

        Ok(Self {
            client: Client::new(),
            bucket,
            credentials: Credentials::new(access_key, secret_key),
        })
    }
}

#[async_trait]
impl Backend for S3Backend {
    async fn put_stream(&self, key: &str, body: ByteStream, size: Option<u64>) -> Result<()> {
        let url = self
            .bucket
            .put_object(Some(&self.credentials), key)
            .sign(SIGN_DURATION);

        let mut request = self.client.put(url).body(reqwest::Body::wrap_stream(body));
        if let Some(size) = size {
            request = request.header(reqwest::header::CONTENT_LENGTH, size);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StorageError::BadResponse {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }

    async fn get_to_file(&self, key: &str, dest: &Path) -> Result<u64> {
        let url = self
            .bucket
            .get_object(Some(&self.credentials), key)
            .sign(SIGN_DURATION);

        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound {
                key: key.to_string(),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StorageError::BadResponse {
                status: status.as_u16(),
                body,
            });
        }

        let mut file = File::create(dest).await?;
        let mut written = 0u64;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut action = self.bucket.list_objects_v2(Some(&self.credentials));
        action.with_prefix(prefix);
        let url = action.sign(SIGN_DURATION);

        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(StorageError::BadResponse {
                status: status.as_u16(),
                body,
            });
        }

        let parsed = rusty_s3::actions::ListObjectsV2::parse_response(&body)
            .map_err(|e| StorageError::BadResponse {
                status: status.as_u16(),
                body: e.to_string(),
            })?;

        Ok(parsed
            .contents
            .into_iter()
            .map(|obj| {
                obj.key
                    .strip_prefix(prefix)
                    .map(|s| s.trim_start_matches('/').to_string())
                    .unwrap_or(obj.key)
            })
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let url = self
            .bucket
            .delete_object(Some(&self.credentials), key)
            .sign(SIGN_DURATION);

        let resp = self.client.delete(url).send().await?;
        let status = resp.status();
        if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
            let body = resp.text().await.unwrap_or_default();
            return Err(StorageError::BadResponse {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let url = self
            .bucket
            .head_object(Some(&self.credentials), key)
            .sign(SIGN_DURATION);

        let resp = self.client.head(url).send().await?;
        Ok(resp.status().is_success())
    }
}
