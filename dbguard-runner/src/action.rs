//! Backup and restore execution, per §4.7 of the spec this worker
//! implements: open a pipe, optionally wrap it with the crypto layer,
//! hand the engine one end and the storage manager the other, and run
//! both concurrently.

use std::{io::Write, sync::Arc};

use chrono::Utc;
use dbguard_backends::{S3Backend, StorageManager};
use dbguard_core::crypto::{CryptoReaderAt, CryptoWriter};
use dbguard_engine::{ChannelSink, DynReadAt, Engine};
use positioned_io::ReadAt;
use tracing::{error, info, warn};

use crate::{
    cli::RestoreMode,
    error::{Result, RunnerError},
    locations::Location,
    metrics::Metrics,
};

/// Backup name format: UTC timestamp, second granularity, matching
/// the retention store's default `%Y-%m-%dT%H-%M-%S` label.
fn backup_name() -> String {
    Utc::now().format("%Y-%m-%dT%H-%M-%S").to_string()
}

/// Builds the write end of the backup pipe, wrapping it with a crypto
/// writer if `passphrase` is set. The crypto writer's header write
/// happens here, so this MUST run inside `spawn_blocking` — the same
/// constraint `ChannelSink` itself documents.
fn make_sink(
    sink: ChannelSink,
    passphrase: Option<&secrecy::Secret<String>>,
) -> Result<Box<dyn Write + Send>> {
    match passphrase {
        Some(pass) => Ok(Box::new(CryptoWriter::create(sink, pass)?)),
        None => Ok(Box::new(sink)),
    }
}

/// Runs one backup cycle against every configured storage location, in
/// order. A failure on one location does not skip the rest — each is
/// an independent destination for the same backup.
pub async fn backup_all(
    engine: &dyn Engine,
    database: &str,
    locations: &[Location],
    metrics: Arc<Metrics>,
) -> Result<()> {
    let mut last_error = None;

    for location in locations {
        if let Err(e) = backup_one(engine, database, location).await {
            error!(location = %location.name, error = %e, "backup to location failed");
            last_error = Some(e);
            continue;
        }

        let location_name = location.name.clone();
        let manager = location.manager.clone();
        tokio::spawn(run_cleanup(location_name, manager, metrics.clone()));
    }

    match last_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Fire-and-forget cleanup: not guarded by the single-action latch,
/// and its failure is logged rather than propagated, per the spec's
/// "cleanup errors are logged and swallowed" error handling rule.
async fn run_cleanup(location_name: String, manager: Arc<StorageManager<S3Backend>>, metrics: Arc<Metrics>) {
    if let Err(e) = manager.cleanup_backups().await {
        warn!(location = %location_name, error = %e, "background cleanup failed");
        return;
    }

    match manager.list_available_backups().await {
        Ok(available) => metrics.record_stored_backup_count(available.len()),
        Err(e) => warn!(location = %location_name, error = %e, "failed to list available backups after cleanup"),
    }
}

async fn backup_one(engine: &dyn Engine, database: &str, location: &Location) -> Result<()> {
    let name = backup_name();
    let (sink, stream) = ChannelSink::new();

    let passphrase = location.passphrase.as_ref().map(|p| p.resolve()).transpose()?;
    let boxed_sink = tokio::task::spawn_blocking(move || make_sink(sink, passphrase.as_ref())).await??;

    let database = database.to_string();
    let backup_fut = engine.backup(&database, boxed_sink);
    let upload_fut = location.manager.upload_from_stream(&name, stream, None);

    let (backup_result, upload_result) = tokio::join!(backup_fut, upload_fut);
    backup_result?;
    upload_result?;

    info!(location = %location.name, backup = %name, "backup uploaded");
    Ok(())
}

/// Tries every location in order, restoring from the first that
/// yields a usable source. Matches the spec's restore semantics:
/// failures from earlier locations are logged, not fatal, and only
/// exhausting every location is an error.
pub async fn restore(
    engine: &dyn Engine,
    database: &str,
    mode: RestoreMode,
    identifier: &str,
    locations: &[Location],
) -> Result<()> {
    for location in locations {
        match restore_one(engine, database, mode, identifier, location).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(location = %location.name, error = %e, "restore from location failed, trying next");
            }
        }
    }

    Err(RunnerError::NotFound)
}

async fn restore_one(
    engine: &dyn Engine,
    database: &str,
    mode: RestoreMode,
    identifier: &str,
    location: &Location,
) -> Result<()> {
    let downloaded = match mode {
        RestoreMode::Name => location.manager.download_as_reader(identifier).await?,
        RestoreMode::PointInTime => {
            let point_in_time = identifier
                .parse::<chrono::DateTime<Utc>>()
                .map_err(|e| RunnerError::ConfigInvalid {
                    reason: format!("invalid point-in-time {identifier:?}: {e}"),
                })?;
            location.manager.download_pit_backup_as_reader(point_in_time).await?
        }
    };

    let (source, size): (Box<dyn ReadAt + Send + Sync>, u64) = match &location.passphrase {
        Some(passphrase_ref) => {
            let passphrase = passphrase_ref.resolve()?;
            let size = downloaded.size();
            let reader = CryptoReaderAt::open(downloaded, size, &passphrase)?;
            let plaintext_len = reader.len();
            (Box::new(reader), plaintext_len)
        }
        None => {
            let size = downloaded.size();
            (Box::new(downloaded), size)
        }
    };

    engine.restore(database, DynReadAt(source), size).await?;
    Ok(())
}
