//! Fires one scheduled backup at a time, per `backup.yaml`'s
//! `ScheduleConfig`. Exactly one of a 5-field cron expression or a
//! fixed interval is configured (`ScheduleConfig::validate` already
//! enforced that at load time).

use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use dbguard_core::config::ScheduleConfig;
use std::str::FromStr;
use tracing::{error, info};

use crate::{error::Result, metrics::Metrics};

fn next_interval_firing(interval: StdDuration, now: DateTime<Utc>) -> DateTime<Utc> {
    let interval_secs = interval.as_secs().max(1) as i64;
    let now_secs = now.timestamp();
    let remainder = now_secs.rem_euclid(interval_secs);
    let wait = if remainder == 0 { interval_secs } else { interval_secs - remainder };
    now + chrono::Duration::seconds(wait)
}

/// `backup.yaml` documents standard 5-field cron (min hour dom month
/// dow); the `cron` crate parses the 6-field form with a leading
/// seconds field. Prepending `0` makes every configured expression
/// fire once per matching minute, at :00 seconds.
fn normalize_cron(expr: &str) -> String {
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

fn next_firing(schedule: &ScheduleConfig, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    if let Some(interval) = schedule.interval {
        return Ok(next_interval_firing(interval, now));
    }

    let cron = schedule.cron.as_deref().expect("validated: cron or interval present");
    let parsed = Schedule::from_str(&normalize_cron(cron)).map_err(|e| crate::error::RunnerError::ConfigInvalid {
        reason: format!("invalid cron expression {cron:?}: {e}"),
    })?;
    parsed
        .after(&now)
        .next()
        .ok_or_else(|| crate::error::RunnerError::ConfigInvalid {
            reason: format!("cron expression {cron:?} never fires again"),
        })
}

/// Runs until `shutdown` resolves, sleeping until each scheduled
/// firing and then invoking `on_fire`. Errors from `on_fire` are
/// logged, not fatal — a failed scheduled backup shouldn't take the
/// scheduler down with it. A malformed schedule itself IS fatal, by
/// design (the caller should fail fast at startup instead).
pub async fn run<F, Fut>(
    schedule: ScheduleConfig,
    metrics: &Metrics,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
    mut on_fire: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    loop {
        let now = Utc::now();
        let fire_at = next_firing(&schedule, now)?;
        metrics.record_next_scheduled(fire_at);

        let wait = (fire_at - now).to_std().unwrap_or(StdDuration::ZERO);
        info!(%fire_at, "scheduler sleeping until next backup");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.recv() => {
                info!("scheduler observed shutdown signal, exiting");
                return Ok(());
            }
        }

        if let Err(e) = on_fire().await {
            error!(error = %e, "scheduled backup failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn interval_aligns_to_next_multiple_of_epoch() {
        let now = Utc.timestamp_opt(3_661, 0).unwrap(); // 1h 1m 1s since epoch
        let next = next_interval_firing(StdDuration::from_secs(3600), now);
        assert_eq!(next.timestamp(), 7200);
    }

    #[test]
    fn interval_firing_exactly_on_boundary_waits_a_full_interval() {
        let now = Utc.timestamp_opt(7200, 0).unwrap();
        let next = next_interval_firing(StdDuration::from_secs(3600), now);
        assert_eq!(next.timestamp(), 10_800);
    }

    #[test]
    fn cron_schedule_resolves_to_a_future_time() {
        let schedule = ScheduleConfig {
            cron: Some("0 0 * * * *".to_string()),
            interval: None,
        };
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 10, 15, 0).unwrap();
        let next = next_firing(&schedule, now).unwrap();
        assert!(next > now);
    }
}
