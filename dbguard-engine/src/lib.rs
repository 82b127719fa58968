//! Backup engine abstraction: one `Engine` implementation per
//! supported database, a name-keyed [`registry`], and the CockroachDB
//! HTTP bridge that makes this process look like an object store to
//! CockroachDB's own `BACKUP`/`RESTORE` SQL.

use std::io::Write;

use async_trait::async_trait;
use regex::Regex;

pub mod crdb;
mod dynreadat;
pub mod error;
pub mod postgres;
pub mod registry;
pub mod sink;

pub use dynreadat::DynReadAt;
pub use error::EngineError;
pub use registry::build_engine;
pub use sink::ChannelSink;

use error::Result;

fn identifier_re() -> Regex {
    Regex::new(r"^[A-Za-z0-9_$]+$").expect("static regex")
}

/// Database/role identifiers are interpolated directly into SQL text
/// or a subprocess argument list; both engines validate against this
/// before using one.
pub(crate) fn validate_database_name(name: &str) -> Result<()> {
    if identifier_re().is_match(name) {
        Ok(())
    } else {
        Err(EngineError::InvalidDatabaseName {
            name: name.to_string(),
        })
    }
}

/// A database-specific driver that knows how to produce a backup into
/// a sink and restore from a `ReadAt` source. `backup`/`restore` are
/// never called concurrently on the same instance; the orchestrator's
/// single-action latch is what guarantees that.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Streams a full backup of `database` into `sink`. The caller
    /// owns encrypting `sink` beforehand if the destination requires
    /// it; the engine only ever sees the final write destination.
    async fn backup(&self, database: &str, sink: Box<dyn Write + Send>) -> Result<()>;

    /// Restores `database` from `source`, a `plaintext_size`-byte
    /// random-access source already decrypted by the caller if the
    /// backup was encrypted.
    async fn restore(&self, database: &str, source: DynReadAt, plaintext_size: u64) -> Result<()>;
}
