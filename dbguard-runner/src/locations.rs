//! Resolves `storage.yaml`'s `StorageLocation` list into live
//! `StorageManager<S3Backend>` instances, one per location, tried in
//! the configured order for both backup (every location) and restore
//! (first to succeed).

use std::sync::Arc;

use dbguard_backends::{S3Backend, StorageManager};
use dbguard_core::{
    config::{SecretRef, StorageLocation},
    retention::default_retention_config,
};
use secrecy::ExposeSecret;

use crate::error::Result;

pub struct Location {
    pub name: String,
    /// Kept unresolved (rather than as a `Secret<String>`) so each use
    /// site resolves it fresh instead of holding a long-lived clone of
    /// the decrypted passphrase.
    pub passphrase: Option<SecretRef>,
    /// `Arc`-wrapped so a background cleanup task can outlive the
    /// borrow of the location list that triggered it.
    pub manager: Arc<StorageManager<S3Backend>>,
}

pub async fn build(locations: &[StorageLocation]) -> Result<Vec<Location>> {
    let mut out = Vec::with_capacity(locations.len());

    for loc in locations {
        let access_key = loc.access_key.resolve()?;
        let secret_key = loc.secret_key.resolve()?;
        // Resolved once here only to fail fast on a bad config; the
        // actual passphrase is re-resolved per use from `loc.passphrase`.
        if let Some(passphrase) = &loc.passphrase {
            passphrase.resolve()?;
        }

        let backend = S3Backend::new(
            &loc.endpoint,
            &loc.bucket,
            loc.region.as_deref().unwrap_or(""),
            access_key.expose_secret(),
            secret_key.expose_secret(),
            true,
        )?;

        let retention = loc.retention.clone().unwrap_or_else(default_retention_config);
        let manager = StorageManager::new(backend, loc.prefix.clone(), loc.single_target, retention).await?;

        out.push(Location {
            name: loc.name.clone(),
            passphrase: loc.passphrase.clone(),
            manager: Arc::new(manager),
        });
    }

    Ok(out)
}
