//! Builds the one engine a worker uses for its whole lifetime from
//! `backup.yaml`'s engine selection. Mirrors the source controller's
//! name-keyed dispatch, adapted to the config's structural selection
//! (`cockroach` xor `postgres` present) rather than a string switch.

use std::sync::Arc;

use dbguard_core::config::EngineConfig;

use crate::{
    crdb::{Bridge, CockroachEngine},
    error::{EngineError, Result},
    postgres::PostgresEngine,
    Engine,
};

/// `bridge_host` and `bridge` are only consumed when the config
/// selects CockroachDB; the PostgreSQL engine needs neither since it
/// never runs an HTTP server of its own.
pub fn build_engine(config: &EngineConfig, bridge_host: impl Into<String>, bridge: Arc<Bridge>) -> Result<Arc<dyn Engine>> {
    match (&config.cockroach, &config.postgres) {
        (Some(cockroach), None) => Ok(Arc::new(CockroachEngine::new(
            cockroach.clone(),
            bridge_host,
            bridge,
        ))),
        (None, Some(postgres)) => Ok(Arc::new(PostgresEngine::new(postgres.clone()))),
        (Some(_), Some(_)) => Err(EngineError::UnknownEngine {
            name: "both cockroach and postgres configured".to_string(),
        }),
        (None, None) => Err(EngineError::UnknownEngine {
            name: "no engine configured".to_string(),
        }),
    }
}
