//! Logging is initialized before configuration is parsed, so a bad
//! `backup.yaml`/`storage.yaml` is itself reported through `tracing`
//! rather than a bare `eprintln!`.

use tracing_subscriber::EnvFilter;

pub fn init(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
