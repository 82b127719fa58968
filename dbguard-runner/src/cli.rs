use std::{net::SocketAddr, path::PathBuf};

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "dbguard-runner", about = "Scheduled, encrypted, retention-managed database backups")]
pub struct Cli {
    /// Directory containing `backup.yaml` and `storage.yaml`.
    #[arg(long, env = "DBGUARD_CONFIG_DIR", default_value = "/etc/dbguard", global = true)]
    pub config_dir: PathBuf,

    /// Address the worker's HTTP server (CRDB bridge + IPC) binds to.
    #[arg(long, env = "DBGUARD_LISTEN_ADDR", default_value = "0.0.0.0:8080", global = true)]
    pub listen_addr: SocketAddr,

    /// `host:port` CockroachDB should use to reach the bridge, if
    /// different from `listen_addr` (e.g. a Service DNS name).
    #[arg(long, env = "DBGUARD_BASE_URL", global = true)]
    pub base_url: Option<String>,

    #[arg(long, env = "DBGUARD_LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the long-lived server: HTTP bridge, scheduler and IPC loop.
    Run,
    /// Ask an already-running `run` process to start a backup now.
    Backup,
    /// Ask an already-running `run` process to restore a backup.
    Restore {
        #[arg(value_enum)]
        mode: RestoreMode,
        /// Backup name (for `name` mode) or an RFC 3339 timestamp
        /// (for `point-in-time` mode).
        identifier: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
#[value(rename_all = "kebab-case")]
pub enum RestoreMode {
    Name,
    PointInTime,
}
