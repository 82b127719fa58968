//! In-process counters the orchestrator keeps for its own logging.
//! No exporter is wired up (see the metrics Non-goal in the spec this
//! worker implements); a future Prometheus registry would read these
//! same atomics rather than requiring new instrumentation.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tracing::debug;

#[derive(Default)]
pub struct Metrics {
    last_backup_success: AtomicBool,
    last_backup_unix: AtomicI64,
    next_scheduled_unix: AtomicI64,
    stored_backup_count: AtomicU64,
    concurrent_rejections: AtomicU64,
}

impl Metrics {
    pub fn record_backup_result(&self, success: bool) {
        self.last_backup_success.store(success, Ordering::Relaxed);
        self.last_backup_unix.store(Utc::now().timestamp(), Ordering::Relaxed);
        debug!(success, "recorded backup result");
    }

    pub fn record_next_scheduled(&self, at: DateTime<Utc>) {
        self.next_scheduled_unix.store(at.timestamp(), Ordering::Relaxed);
        debug!(%at, "recorded next scheduled backup");
    }

    pub fn record_stored_backup_count(&self, count: usize) {
        self.stored_backup_count.store(count as u64, Ordering::Relaxed);
        debug!(count, "recorded stored backup count");
    }

    pub fn record_concurrent_rejection(&self) {
        let total = self.concurrent_rejections.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(total, "recorded concurrent action rejection");
    }
}
