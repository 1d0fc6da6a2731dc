use std::{
    collections::BTreeMap,
    fs,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use log::{debug, info, warn};
use serde::Deserialize;

use super::clock::parse_date_key;
use super::errors::OffwatchError;
use super::model::DailyRecord;

/// On-disk day entry. Older cache files stored a bare list of urls per day;
/// they are read as a record with `sentAllClear = false` and rewritten in the
/// object form on the next save.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredDay {
    Legacy(Vec<String>),
    Record(DailyRecord),
}

impl From<StoredDay> for DailyRecord {
    fn from(day: StoredDay) -> Self {
        match day {
            StoredDay::Legacy(urls) => {
                let mut record = DailyRecord::default();
                for url in urls {
                    if !record.alerted_offline.contains(&url) {
                        record.alerted_offline.push(url);
                    }
                }
                record
            }
            StoredDay::Record(record) => record,
        }
    }
}

/// Per-day alerting state, keyed by `DD-MM-YYYY`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyCache {
    path: PathBuf,
    days: BTreeMap<String, DailyRecord>,
    retain_days: Option<usize>,
}

impl DailyCache {
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        DailyCache {
            path: path.into(),
            days: BTreeMap::new(),
            retain_days: None,
        }
    }

    /// Only keep the most recent `days` dates when saving.
    pub fn with_retention(mut self, days: Option<usize>) -> Self {
        self.retain_days = days;
        self
    }

    /// Load the cache at `path`. Never fails: a missing or unreadable file
    /// yields an empty cache.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let mut cache = DailyCache::empty(path);
        match read_days(&cache.path) {
            Ok(days) => {
                debug!("loaded {} day(s) from {}", days.len(), cache.path.display());
                cache.days = days;
            }
            Err(OffwatchError::Read(e)) if e.kind() == io::ErrorKind::NotFound => {
                info!("no cache at {}, starting empty", cache.path.display());
            }
            Err(e) => {
                warn!("ignoring unreadable cache {}: {}", cache.path.display(), e);
            }
        }
        cache
    }

    /// Write the cache through a temp file in the same directory, then rename
    /// it over the previous snapshot.
    pub fn save(&mut self) -> Result<(), OffwatchError> {
        self.prune();
        write_days(&self.path, &self.days).map_err(|e| {
            let e = OffwatchError::CacheIo(format!("{}: {}", self.path.display(), e));
            warn!("failed to save cache: {}", e);
            e
        })?;
        info!("cache updated at {}", self.path.display());
        Ok(())
    }

    pub fn get(&self, date: &str) -> Option<&DailyRecord> {
        self.days.get(date)
    }

    /// The record for `date`, created empty on first access.
    pub fn day(&mut self, date: &str) -> &mut DailyRecord {
        self.days.entry(date.to_string()).or_default()
    }

    pub fn is_already_alerted(&self, date: &str, url: &str) -> bool {
        self.get(date)
            .is_some_and(|r| r.alerted_offline.iter().any(|u| u == url))
    }

    pub fn record_alerted(&mut self, date: &str, url: &str) {
        let record = self.day(date);
        if !record.alerted_offline.iter().any(|u| u == url) {
            record.alerted_offline.push(url.to_string());
        }
    }

    pub fn all_clear_already_sent(&self, date: &str) -> bool {
        self.get(date).is_some_and(|r| r.sent_all_clear)
    }

    pub fn mark_all_clear_sent(&mut self, date: &str) {
        self.day(date).sent_all_clear = true;
    }

    #[cfg(test)]
    pub fn dates(&self) -> impl Iterator<Item = &str> {
        self.days.keys().map(String::as_str)
    }

    fn prune(&mut self) {
        let Some(keep) = self.retain_days else {
            return;
        };
        if self.days.len() <= keep {
            return;
        }

        // Unparseable keys sort first and go first.
        let mut dated: Vec<_> = self
            .days
            .keys()
            .map(|k| (parse_date_key(k), k.clone()))
            .collect();
        dated.sort();

        let drop = dated.len() - keep;
        for (_, key) in dated.into_iter().take(drop) {
            debug!("pruning cached day {}", key);
            self.days.remove(&key);
        }
    }
}

fn read_days(path: &Path) -> Result<BTreeMap<String, DailyRecord>, OffwatchError> {
    let raw = fs::read_to_string(path)?;
    let stored: BTreeMap<String, StoredDay> = serde_json::from_str(&raw)?;
    Ok(stored.into_iter().map(|(k, v)| (k, v.into())).collect())
}

fn write_days(path: &Path, days: &BTreeMap<String, DailyRecord>) -> Result<(), OffwatchError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        serde_json::to_writer_pretty(&mut writer, days)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| OffwatchError::Read(e.error))?;
    Ok(())
}
