//! PostgreSQL engine: shells out to `pg_dump`/`pg_restore` and pipes
//! their stdout/stdin through whatever sink or source the orchestrator
//! already wired up. PostgreSQL backups are a single dump-format
//! stream, so unlike the CockroachDB engine this one needs no archive
//! codec and no HTTP bridge — the subprocess's stdout/stdin *is* the
//! pipe.

use std::{
    io::{self, Read, Write},
    process::{Command, Stdio},
};

use async_trait::async_trait;
use dbguard_core::config::PostgresConfig;
use positioned_io::Cursor;
use secrecy::ExposeSecret;
use tracing::{info, instrument};

use crate::{
    dynreadat::DynReadAt,
    error::{EngineError, Result},
    validate_database_name, Engine,
};

pub struct PostgresEngine {
    config: PostgresConfig,
}

impl PostgresEngine {
    pub fn new(config: PostgresConfig) -> Self {
        Self { config }
    }

    fn env(&self) -> Result<Vec<(String, String)>> {
        let mut env = vec![
            ("PGHOST".to_string(), self.config.host.clone()),
            ("PGPORT".to_string(), self.config.port.to_string()),
            ("PGUSER".to_string(), self.config.user.clone()),
        ];

        if let Some(password) = &self.config.password {
            let resolved = password.resolve().map_err(EngineError::Core)?;
            env.push(("PGPASSWORD".to_string(), resolved.expose_secret().to_string()));
        }

        if let Some(sslmode) = &self.config.sslmode {
            env.push(("PGSSLMODE".to_string(), sslmode.clone()));
        }

        Ok(env)
    }
}

fn wait_ok(program: &str, status: std::process::ExitStatus) -> Result<()> {
    if status.success() {
        Ok(())
    } else {
        Err(EngineError::SubprocessFailed {
            program: program.to_string(),
            status: status.to_string(),
        })
    }
}

#[async_trait]
impl Engine for PostgresEngine {
    #[instrument(skip(self, sink), fields(database))]
    async fn backup(&self, database: &str, mut sink: Box<dyn Write + Send>) -> Result<()> {
        validate_database_name(database)?;
        let database = database.to_string();
        let env = self.env()?;

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut child = Command::new("pg_dump")
                .arg("--create")
                .arg("--format=custom")
                .arg(&database)
                .envs(env)
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit())
                .spawn()?;

            let mut stdout = child.stdout.take().expect("stdout piped");
            io::copy(&mut stdout, &mut sink)?;

            let status = child.wait()?;
            wait_ok("pg_dump", status)
        })
        .await
        .map_err(|e| EngineError::EngineFailed(e.to_string()))??;

        Ok(())
    }

    #[instrument(skip(self, source), fields(database))]
    async fn restore(&self, database: &str, source: DynReadAt, plaintext_size: u64) -> Result<()> {
        validate_database_name(database)?;
        let env = self.env()?;

        tokio::task::spawn_blocking(move || -> Result<()> {
            // --create has pg_restore issue its own CREATE DATABASE, so
            // it must connect to the `postgres` maintenance database
            // rather than the (possibly not-yet-existing) target.
            let mut child = Command::new("pg_restore")
                .arg("--clean")
                .arg("--if-exists")
                .arg("--create")
                .arg("--format=custom")
                .arg("--dbname=postgres")
                .envs(env)
                .stdin(Stdio::piped())
                .stderr(Stdio::inherit())
                .spawn()?;

            let mut stdin = child.stdin.take().expect("stdin piped");
            let mut reader = Cursor::new(source).take(plaintext_size);
            io::copy(&mut reader, &mut stdin)?;
            drop(stdin);

            let status = child.wait()?;
            wait_ok("pg_restore", status)
        })
        .await
        .map_err(|e| EngineError::EngineFailed(e.to_string()))??;

        info!("restore completed");
        Ok(())
    }
}
