//! Drives CockroachDB's `BACKUP`/`RESTORE` SQL over a connection
//! opened with `tokio_postgres`, flipping the shared [`Bridge`] between
//! writer and reader mode around each statement.

use std::{io::Write, sync::Arc};

use async_trait::async_trait;
use dbguard_core::config::CockroachConfig;
use secrecy::ExposeSecret;
use tracing::{info, instrument};

use crate::{dynreadat::DynReadAt, error::EngineError, error::Result, validate_database_name, Engine};

use super::{bridge::Bridge, reader::ReaderState, writer::WriterState};

/// CockroachDB backup/restore via the HTTP bridge. One instance is
/// shared across every scheduled run; `bridge` is activated and
/// deactivated around each statement rather than owned per-call, since
/// the HTTP router is wired up once at startup.
pub struct CockroachEngine {
    config: CockroachConfig,
    /// `host:port` CockroachDB itself should use to reach the bridge.
    /// Usually the worker's own listen address, but kept distinct so a
    /// worker bound to `0.0.0.0` can still advertise a routable
    /// Service DNS name.
    bridge_host: String,
    bridge: Arc<Bridge>,
}

impl CockroachEngine {
    pub fn new(config: CockroachConfig, bridge_host: impl Into<String>, bridge: Arc<Bridge>) -> Self {
        Self {
            config,
            bridge_host: bridge_host.into(),
            bridge,
        }
    }

    fn bridge_url(&self) -> String {
        format!(
            "http://{}/{}/",
            self.bridge_host,
            self.config.bridge_path.trim_matches('/')
        )
    }

    async fn connect(&self) -> Result<tokio_postgres::Client> {
        let dsn = self.config.dsn.resolve().map_err(EngineError::Core)?;
        let (client, connection) = tokio_postgres::connect(dsn.expose_secret(), tokio_postgres::NoTls)
            .await
            .map_err(|e| EngineError::Connect(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "cockroach connection closed with error");
            }
        });

        Ok(client)
    }
}

#[async_trait]
impl Engine for CockroachEngine {
    #[instrument(skip(self, sink), fields(database))]
    async fn backup(&self, database: &str, sink: Box<dyn Write + Send>) -> Result<()> {
        validate_database_name(database)?;

        let writer = Arc::new(WriterState::new(sink));
        self.bridge.activate_writer(writer.clone());

        let client = self.connect().await?;
        let stmt = format!("BACKUP DATABASE {database} INTO '{}'", self.bridge_url());
        info!(%stmt, "issuing backup statement");
        let outcome = client.execute(stmt.as_str(), &[]).await;

        self.bridge.deactivate();
        outcome.map_err(|e| EngineError::EngineFailed(e.to_string()))?;

        tokio::task::spawn_blocking(move || writer.close())
            .await
            .map_err(|e| EngineError::EngineFailed(e.to_string()))??;

        Ok(())
    }

    #[instrument(skip(self, source), fields(database))]
    async fn restore(&self, database: &str, source: DynReadAt, size: u64) -> Result<()> {
        validate_database_name(database)?;

        let reader = Arc::new(ReaderState::open(source, size)?);
        self.bridge.activate_reader(reader);

        let client = self.connect().await?;
        let stmt = format!(
            "RESTORE DATABASE {database} FROM LATEST IN '{}'",
            self.bridge_url()
        );
        info!(%stmt, "issuing restore statement");
        let outcome = client.execute(stmt.as_str(), &[]).await;

        self.bridge.deactivate();
        outcome.map_err(|e| EngineError::EngineFailed(e.to_string()))?;
        Ok(())
    }
}
