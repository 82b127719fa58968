//! `backup.yaml` and `storage.yaml` document shapes, loaded once at
//! startup by `dbguard-runner`.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use secrecy::Secret;
use serde::{Deserialize, Serialize};

use crate::{error::Result, retention::RetentionConfig, CoreError};

/// A config value that is either the secret itself or a pointer to
/// where it can be read from at resolve time. Kept as a small enum
/// rather than a reflective walk over arbitrary structs: every config
/// struct that carries one implements [`ResolvesSecrets`], and a
/// single top-level call validates every secret in the document
/// resolves before the runner starts using any of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SecretRef {
    Literal(String),
    /// Read the secret from a file on disk, trimming one trailing
    /// newline if present (e.g. a mounted Kubernetes secret volume).
    File { file: PathBuf },
    /// Read the secret from an environment variable.
    Env { env: String },
}

impl SecretRef {
    pub fn resolve(&self) -> Result<Secret<String>> {
        let value = match self {
            SecretRef::Literal(value) => value.clone(),
            SecretRef::File { file } => {
                fs::read_to_string(file)?
                    .trim_end_matches('\n')
                    .to_string()
            }
            SecretRef::Env { env } => std::env::var(env).map_err(|_| CoreError::ConfigInvalid {
                reason: format!("environment variable {env} is not set"),
            })?,
        };

        Ok(Secret::new(value))
    }
}

/// Implemented by every config struct that embeds one or more
/// [`SecretRef`] fields. `resolve_secrets` is called once at load time
/// so a misconfigured secret (missing file, unset env var) surfaces as
/// a startup error rather than failing mid-backup.
pub trait ResolvesSecrets {
    fn resolve_secrets(&self) -> Result<()>;
}

fn load_yaml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&raw)?)
}

/// The database engine this worker backs up, plus its connection
/// details. Exactly one of `cockroach`/`postgres` should be set;
/// enforced by `BackupSpec::validate`, not by the deserializer, so a
/// config with neither or both produces one clear startup error.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    pub cockroach: Option<CockroachConfig>,
    pub postgres: Option<PostgresConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CockroachConfig {
    /// Connection string CockroachDB uses to reach itself; the bridge
    /// issues `BACKUP ... INTO 'http://<listen-addr>/<path>'` through
    /// this connection.
    pub dsn: SecretRef,
    /// Path segment under which the bridge's writer/reader handlers
    /// are mounted, e.g. `crdb-backup`.
    pub bridge_path: String,
}

impl ResolvesSecrets for CockroachConfig {
    fn resolve_secrets(&self) -> Result<()> {
        self.dsn.resolve().map(|_| ())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    #[serde(default = "default_postgres_port")]
    pub port: u16,
    pub user: String,
    pub database: String,
    #[serde(default)]
    pub sslmode: Option<String>,
    #[serde(default)]
    pub password: Option<SecretRef>,
}

fn default_postgres_port() -> u16 {
    5432
}

impl ResolvesSecrets for PostgresConfig {
    fn resolve_secrets(&self) -> Result<()> {
        if let Some(password) = &self.password {
            password.resolve()?;
        }
        Ok(())
    }
}

/// Either a standard 5-field cron expression or a fixed interval;
/// exactly one must be present.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScheduleConfig {
    pub cron: Option<String>,
    #[serde(default, with = "humantime_serde::option")]
    pub interval: Option<Duration>,
}

impl ScheduleConfig {
    pub fn validate(&self) -> Result<()> {
        match (&self.cron, &self.interval) {
            (Some(_), Some(_)) => Err(CoreError::ConfigInvalid {
                reason: "schedule must specify exactly one of cron or interval, not both"
                    .to_string(),
            }),
            (None, None) => Err(CoreError::ConfigInvalid {
                reason: "schedule must specify one of cron or interval".to_string(),
            }),
            _ => Ok(()),
        }
    }
}

/// The `backup.yaml` document: identifies the workload being backed
/// up and how/when to back it up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSpec {
    pub namespace: String,
    pub name: String,
    pub schedule: ScheduleConfig,
    #[serde(flatten)]
    pub engine: EngineConfig,
}

impl BackupSpec {
    pub fn load(path: &Path) -> Result<Self> {
        let spec: Self = load_yaml(path)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<()> {
        self.schedule.validate()?;

        match (&self.engine.cockroach, &self.engine.postgres) {
            (Some(_), Some(_)) => Err(CoreError::ConfigInvalid {
                reason: "backup.yaml must configure exactly one engine, not both".to_string(),
            }),
            (None, None) => Err(CoreError::ConfigInvalid {
                reason: "backup.yaml must configure one of cockroach or postgres".to_string(),
            }),
            _ => Ok(()),
        }
    }
}

impl ResolvesSecrets for BackupSpec {
    fn resolve_secrets(&self) -> Result<()> {
        if let Some(cockroach) = &self.engine.cockroach {
            cockroach.resolve_secrets()?;
        }
        if let Some(postgres) = &self.engine.postgres {
            postgres.resolve_secrets()?;
        }
        Ok(())
    }
}

/// One upload destination. In single-target mode, retention is
/// disabled and every backup overwrites the one object at `prefix`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageLocation {
    pub name: String,
    pub endpoint: String,
    pub bucket: String,
    #[serde(default)]
    pub region: Option<String>,
    pub access_key: SecretRef,
    pub secret_key: SecretRef,
    pub prefix: String,
    #[serde(default)]
    pub passphrase: Option<SecretRef>,
    #[serde(default)]
    pub single_target: bool,
    #[serde(default)]
    pub retention: Option<RetentionConfig>,
}

impl ResolvesSecrets for StorageLocation {
    fn resolve_secrets(&self) -> Result<()> {
        self.access_key.resolve()?;
        self.secret_key.resolve()?;
        if let Some(passphrase) = &self.passphrase {
            passphrase.resolve()?;
        }
        Ok(())
    }
}

/// The `storage.yaml` document: every location backups are sent to,
/// tried in order on restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub locations: Vec<StorageLocation>,
}

impl StorageConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = load_yaml(path)?;
        config.resolve_secrets()?;
        Ok(config)
    }
}

impl ResolvesSecrets for StorageConfig {
    fn resolve_secrets(&self) -> Result<()> {
        for location in &self.locations {
            location.resolve_secrets()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn schedule_rejects_both_cron_and_interval() {
        let schedule = ScheduleConfig {
            cron: Some("*/5 * * * *".to_string()),
            interval: Some(Duration::from_secs(3600)),
        };
        assert!(schedule.validate().is_err());
    }

    #[test]
    fn schedule_rejects_neither() {
        assert!(ScheduleConfig::default().validate().is_err());
    }

    #[test]
    fn secret_ref_literal_resolves() {
        let secret = SecretRef::Literal("hunter2".to_string());
        assert_eq!(secret.resolve().unwrap().expose_secret(), "hunter2");
    }

    #[test]
    fn secret_ref_env_missing_is_config_invalid() {
        let secret = SecretRef::Env {
            env: "DBGUARD_TEST_UNSET_VAR_XYZ".to_string(),
        };
        assert!(matches!(secret.resolve(), Err(CoreError::ConfigInvalid { .. })));
    }

    #[test]
    fn backup_spec_rejects_dual_engine_selection() {
        let spec = BackupSpec {
            namespace: "ns".to_string(),
            name: "db".to_string(),
            schedule: ScheduleConfig {
                cron: None,
                interval: Some(Duration::from_secs(3600)),
            },
            engine: EngineConfig {
                cockroach: Some(CockroachConfig {
                    dsn: SecretRef::Literal("postgresql://".to_string()),
                    bridge_path: "crdb-backup".to_string(),
                }),
                postgres: Some(PostgresConfig {
                    host: "localhost".to_string(),
                    port: 5432,
                    user: "postgres".to_string(),
                    database: "postgres".to_string(),
                    sslmode: None,
                    password: None,
                }),
            },
        };
        assert!(spec.validate().is_err());
    }
}
