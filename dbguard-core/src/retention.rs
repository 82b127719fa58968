//! Grandfather-father-son retention bookkeeping.
//!
//! Every backup entry is assigned one "label" per strftime-style format
//! in a [`RetentionConfig`] (e.g. `%Y-%m` for "first backup of the
//! month"), as long as no other entry already holds that label. An
//! entry survives [`Manager::clean_retentions`] until every one of its
//! labels has outlived its retention window, which is how older
//! backups get pruned down to one-per-bucket while recent ones are
//! kept densely.

use std::{
    collections::BTreeMap,
    io::{Read, Write},
    sync::RwLock,
    time::Duration,
};

use chrono::{
    format::{Parsed, StrftimeItems},
    DateTime, NaiveDateTime, NaiveTime, Utc, Weekday,
};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Maps a strftime-style format string to how long an entry holding a
/// label in that format should be retained.
pub type RetentionConfig = BTreeMap<String, Duration>;

const ONE_HOUR: Duration = Duration::from_secs(3_600);
const ONE_DAY: Duration = Duration::from_secs(24 * 3_600);
const ONE_WEEK: Duration = Duration::from_secs(7 * 24 * 3_600);
const ONE_MONTH: Duration = Duration::from_secs(31 * 24 * 3_600);
const TWELVE_MONTHS: Duration = Duration::from_secs(12 * 31 * 24 * 3_600);

/// Two-year retention schema: 24 hourly, 7 daily, 4 weekly and 12
/// monthly backups. Everything else is held for an hour.
pub fn default_retention_config() -> RetentionConfig {
    let mut cfg = RetentionConfig::new();
    cfg.insert("%Y-%m".to_string(), TWELVE_MONTHS);
    cfg.insert("%Y-W%V".to_string(), ONE_MONTH);
    cfg.insert("%Y-%m-%d".to_string(), ONE_WEEK);
    cfg.insert("%Y-%m-%dT%H".to_string(), ONE_DAY);
    cfg.insert("%Y-%m-%dT%H-%M-%S".to_string(), ONE_HOUR);
    cfg
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RetentionStoreEntry {
    format: String,
    #[serde(with = "humantime_serde")]
    initial_hold_time: Duration,
    name: String,
}

/// Parses a label back into a timestamp. Formats that don't fully
/// pin down a date on their own (`%Y-%m` has no day of month,
/// `%Y-W%V` has no weekday) are filled with defaults the same way
/// timefmt-go does: day 1, Monday. Any format field this label's
/// string doesn't carry (most formats have no time component at all)
/// defaults to midnight.
fn parse_label(name: &str, format: &str) -> Result<NaiveDateTime> {
    let mut parsed = Parsed::new();
    chrono::format::parse(&mut parsed, name, StrftimeItems::new(format)).map_err(|e| {
        CoreError::TimeParse {
            value: name.to_string(),
            format: format.to_string(),
            reason: e.to_string(),
        }
    })?;

    if parsed.day.is_none() {
        let _ = parsed.set_day(1);
    }
    if parsed.weekday.is_none() && parsed.isoweek.is_some() {
        let _ = parsed.set_weekday(Weekday::Mon);
    }

    let date = parsed.to_naive_date().map_err(|e| CoreError::TimeParse {
        value: name.to_string(),
        format: format.to_string(),
        reason: e.to_string(),
    })?;

    let time = parsed
        .to_naive_time()
        .unwrap_or_else(|_| NaiveTime::from_hms_opt(0, 0, 0).expect("midnight is always valid"));

    Ok(date.and_time(time))
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    entries: BTreeMap<String, Vec<RetentionStoreEntry>>,
}

struct RetentionStore {
    data: RwLock<StoreData>,
}

impl RetentionStore {
    fn new() -> Self {
        Self {
            data: RwLock::new(StoreData::default()),
        }
    }

    fn labels(data: &StoreData) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        for (entry, entry_labels) in &data.entries {
            for label in entry_labels {
                labels.insert(label.name.clone(), entry.clone());
            }
        }
        labels
    }

    /// Assigns `entry` the label `now` formats to in `format`, unless
    /// some other entry already holds it. Does not validate that the
    /// label parses back via [`parse_label`] — a format that can't
    /// round-trip just gets dropped the next time `cleanup_labels`
    /// runs, rather than failing every other label in the same `add`.
    fn add_entry(&self, entry: &str, format: &str, initial_hold_time: Duration, now: DateTime<Utc>) -> bool {
        let name = format_label(now, format);

        let mut data = self.data.write().expect("retention store lock poisoned");
        if Self::labels(&data).contains_key(&name) {
            return false;
        }

        data.entries.entry(entry.to_string()).or_default().push(RetentionStoreEntry {
            format: format.to_string(),
            initial_hold_time,
            name,
        });
        true
    }

    fn cleanup_labels(&self, retention: &RetentionConfig, now: DateTime<Utc>) {
        let mut data = self.data.write().expect("retention store lock poisoned");
        for labels in data.entries.values_mut() {
            labels.retain(|label| {
                let Ok(label_time) = parse_label(&label.name, &label.format) else {
                    return false;
                };

                let retain_for = retention
                    .get(&label.format)
                    .copied()
                    .unwrap_or(label.initial_hold_time);

                let label_time_utc = DateTime::<Utc>::from_naive_utc_and_offset(label_time, Utc);
                label_time_utc + chrono::Duration::from_std(retain_for).unwrap_or_default() >= now
            });
        }
    }

    fn find_retained_backup_for_point_in_time(&self, point_in_time: DateTime<Utc>) -> Option<String> {
        let data = self.data.read().expect("retention store lock poisoned");
        let mut closest: Option<(String, chrono::Duration)> = None;

        for (entry, labels) in &data.entries {
            for label in labels {
                let Ok(label_time) = parse_label(&label.name, &label.format) else {
                    continue;
                };
                let label_time = DateTime::<Utc>::from_naive_utc_and_offset(label_time, Utc);

                if label_time > point_in_time {
                    continue;
                }

                let distance = point_in_time - label_time;
                if closest.as_ref().is_some_and(|(_, d)| *d <= distance) {
                    continue;
                }

                closest = Some((entry.clone(), distance));
            }
        }

        closest.map(|(entry, _)| entry)
    }

    fn is_entry_known(&self, entry: &str) -> bool {
        self.data.read().expect("retention store lock poisoned").entries.contains_key(entry)
    }

    fn is_entry_retained(&self, entry: &str) -> bool {
        self.data
            .read()
            .expect("retention store lock poisoned")
            .entries
            .get(entry)
            .is_some_and(|labels| !labels.is_empty())
    }

    fn list_retained_entries(&self) -> Vec<String> {
        self.data
            .read()
            .expect("retention store lock poisoned")
            .entries
            .iter()
            .filter(|(_, labels)| !labels.is_empty())
            .map(|(entry, _)| entry.clone())
            .collect()
    }

    fn list_unretained_entries(&self) -> Vec<String> {
        self.data
            .read()
            .expect("retention store lock poisoned")
            .entries
            .iter()
            .filter(|(_, labels)| labels.is_empty())
            .map(|(entry, _)| entry.clone())
            .collect()
    }

    fn load(&self, source: impl Read) -> Result<()> {
        let loaded: StoreData = serde_yaml::from_reader(source)?;
        *self.data.write().expect("retention store lock poisoned") = loaded;
        Ok(())
    }

    fn remove(&self, entry: &str) {
        self.data.write().expect("retention store lock poisoned").entries.remove(entry);
    }

    fn save(&self, dest: impl Write) -> Result<()> {
        let data = self.data.read().expect("retention store lock poisoned");
        serde_yaml::to_writer(dest, &*data)?;
        Ok(())
    }
}

fn format_label(now: DateTime<Utc>, format: &str) -> String {
    now.format(format).to_string()
}

/// Book-keeps retention for a set of backup entries according to a
/// [`RetentionConfig`].
pub struct Manager {
    retention: RetentionConfig,
    store: RetentionStore,
}

impl Manager {
    /// Creates a manager with `retention`, optionally restoring prior
    /// state from `labels_storage`.
    pub fn new(labels_storage: Option<impl Read>, retention: RetentionConfig) -> Result<Self> {
        let store = RetentionStore::new();
        if let Some(source) = labels_storage {
            store.load(source)?;
        }

        Ok(Self { retention, store })
    }

    /// Assigns every currently-unclaimed label in the retention config
    /// to `entry_name`. Returns `NoLabelsAdded` if every label was
    /// already held by some other entry.
    pub fn add(&self, entry_name: &str) -> Result<()> {
        self.add_at(entry_name, Utc::now())
    }

    fn add_at(&self, entry_name: &str, now: DateTime<Utc>) -> Result<()> {
        let mut added = 0usize;
        for (format, retain_for) in &self.retention {
            if self.store.add_entry(entry_name, format, *retain_for, now) {
                added += 1;
            }
        }

        if added == 0 {
            return Err(CoreError::NoLabelsAdded);
        }
        Ok(())
    }

    /// Drops labels whose retention window has elapsed. Does not
    /// remove entries; call [`Manager::remove`] once an entry is no
    /// longer retained and should be deleted from storage too.
    pub fn clean_retentions(&self) {
        self.store.cleanup_labels(&self.retention, Utc::now());
    }

    /// Finds the entry closest to, but not after, `point_in_time`.
    pub fn get_closest_older_backup(&self, point_in_time: DateTime<Utc>) -> Result<String> {
        self.store
            .find_retained_backup_for_point_in_time(point_in_time)
            .ok_or(CoreError::NoBackupFound)
    }

    pub fn get_retained_entries(&self) -> Vec<String> {
        self.store.list_retained_entries()
    }

    pub fn get_unretained_entries(&self) -> Vec<String> {
        self.store.list_unretained_entries()
    }

    pub fn is_known(&self, entry_name: &str) -> bool {
        self.store.is_entry_known(entry_name)
    }

    /// Whether `entry_name` still holds at least one unexpired label.
    /// Run [`Manager::clean_retentions`] beforehand for this to be
    /// meaningful.
    pub fn is_retained(&self, entry_name: &str) -> bool {
        self.store.is_entry_retained(entry_name)
    }

    pub fn remove(&self, entry_name: &str) {
        self.store.remove(entry_name)
    }

    pub fn save(&self, dest: impl Write) -> Result<()> {
        self.store.save(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn manager() -> Manager {
        Manager::new(None::<&[u8]>, default_retention_config()).unwrap()
    }

    #[test]
    fn add_assigns_labels_and_retains() {
        let m = manager();
        m.add("backup-1").unwrap();
        assert!(m.is_known("backup-1"));
        assert!(m.is_retained("backup-1"));
    }

    #[test]
    fn monthly_and_weekly_labels_round_trip_through_cleanup() {
        // `%Y-%m` (no day) and `%Y-W%V` (no weekday) must parse back
        // with defaults filled, or `clean_retentions` would drop them
        // as unparseable on the very next pass.
        let m = manager();
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 10, 0, 0).unwrap();
        m.add_at("backup-1", now).unwrap();

        m.clean_retentions();
        assert!(m.is_retained("backup-1"));
    }

    #[test]
    fn second_add_in_same_second_adds_no_new_labels() {
        let m = manager();
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 10, 0, 0).unwrap();
        m.add_at("backup-1", now).unwrap();
        let err = m.add_at("backup-2", now).unwrap_err();
        assert!(matches!(err, CoreError::NoLabelsAdded));
    }

    #[test]
    fn cleanup_drops_expired_labels_but_keeps_entry() {
        let m = manager();
        let old = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        m.add_at("ancient", old).unwrap();
        assert!(m.is_known("ancient"));

        m.clean_retentions();
        assert!(m.is_known("ancient"));
        assert!(!m.is_retained("ancient"));
    }

    #[test]
    fn closest_older_backup_ignores_future_labels() {
        let m = manager();
        let earlier = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        m.add_at("jan", earlier).unwrap();
        m.add_at("jun", later).unwrap();

        let pit = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(m.get_closest_older_backup(pit).unwrap(), "jan");
    }

    #[test]
    fn no_backup_found_before_any_entry() {
        let m = manager();
        let future = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        m.add_at("x", Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap()).unwrap();
        assert!(matches!(
            m.get_closest_older_backup(future),
            Err(CoreError::NoBackupFound)
        ));
    }

    #[test]
    fn save_and_reload_round_trips() {
        let m = manager();
        m.add("backup-1").unwrap();

        let mut buf = Vec::new();
        m.save(&mut buf).unwrap();

        let reloaded = Manager::new(Some(buf.as_slice()), default_retention_config()).unwrap();
        assert!(reloaded.is_known("backup-1"));
        assert!(reloaded.is_retained("backup-1"));
    }

    #[test]
    fn remove_forgets_entry() {
        let m = manager();
        m.add("backup-1").unwrap();
        m.remove("backup-1");
        assert!(!m.is_known("backup-1"));
    }
}
