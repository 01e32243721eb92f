//! On-disk daily cache.
//!
//! Layout under the cache root:
//!
//! ```text
//! <root>/pollen_<YYYYMMDD>.json      aggregate for one date (JSON array of DailyEntry)
//! <root>/raw/<YYYYMMDD>/<code>.csv   raw upstream bodies captured during a live fetch
//! ```
//!
//! Aggregates are replaced whole (temp file + rename), so a reader never
//! sees a half-written file. Raw captures are debug aids only; they are
//! dropped as soon as a live aggregate for the date is written.

use serde_json::Value;
use std::cmp::Reverse;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::model::{CacheError, DailyEntry, DateKey};

const FILE_PREFIX: &str = "pollen_";
const FILE_SUFFIX: &str = ".json";
const RAW_DIR: &str = "raw";

/// Counts from one retention pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub files_removed: usize,
    pub raw_dirs_removed: usize,
}

/// File-backed store of one aggregate per calendar date.
#[derive(Debug, Clone)]
pub struct DailyCacheStore {
    root: PathBuf,
}

fn io_error(path: &Path, source: std::io::Error) -> CacheError {
    CacheError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Parses `pollen_<YYYYMMDD>.json`; anything else is `None`.
fn date_from_file_name(name: &str) -> Option<DateKey> {
    name.strip_prefix(FILE_PREFIX)?
        .strip_suffix(FILE_SUFFIX)?
        .parse()
        .ok()
}

impl DailyCacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn aggregate_path(&self, date: DateKey) -> PathBuf {
        self.root.join(format!("{}{}{}", FILE_PREFIX, date, FILE_SUFFIX))
    }

    pub fn raw_dir(&self, date: DateKey) -> PathBuf {
        self.root.join(RAW_DIR).join(date.to_string())
    }

    pub async fn exists(&self, date: DateKey) -> bool {
        fs::try_exists(self.aggregate_path(date)).await.unwrap_or(false)
    }

    /// Reads the aggregate for `date`.
    ///
    /// Entries that fail to deserialize, or carry a negative or non-finite
    /// reading, are dropped individually.
    ///
    /// # Returns
    /// - `Ok(None)` — no file for this date.
    ///
    /// # Errors
    /// - `CacheError::Io` — the file exists but could not be read.
    /// - `CacheError::Malformed` — the file is not a JSON array.
    pub async fn read(&self, date: DateKey) -> Result<Option<Vec<DailyEntry>>, CacheError> {
        let path = self.aggregate_path(date);
        let contents = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, e)),
        };

        let items = match serde_json::from_str::<Value>(&contents) {
            Ok(Value::Array(items)) => items,
            Ok(_) => {
                return Err(CacheError::Malformed {
                    path,
                    message: "expected a JSON array".to_string(),
                });
            }
            Err(e) => {
                return Err(CacheError::Malformed {
                    path,
                    message: e.to_string(),
                });
            }
        };

        let entries = items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<DailyEntry>(item) {
                Ok(entry) if entry.pollen.is_finite() && entry.pollen >= 0.0 => Some(entry),
                Ok(entry) => {
                    debug!("Dropping cached entry {} with invalid reading {}", entry.citycode, entry.pollen);
                    None
                }
                Err(e) => {
                    debug!("Dropping unreadable cached entry in {}: {}", path.display(), e);
                    None
                }
            })
            .collect();

        Ok(Some(entries))
    }

    /// Replaces the aggregate for `date`, creating the root as needed.
    pub async fn write(&self, date: DateKey, entries: &[DailyEntry]) -> Result<(), CacheError> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| io_error(&self.root, e))?;

        let path = self.aggregate_path(date);
        let body = serde_json::to_vec(entries).map_err(|e| CacheError::Malformed {
            path: path.clone(),
            message: e.to_string(),
        })?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body).await.map_err(|e| io_error(&tmp, e))?;
        fs::rename(&tmp, &path).await.map_err(|e| io_error(&path, e))?;
        debug!("Wrote {} entries to {}", entries.len(), path.display());
        Ok(())
    }

    /// Every date with an aggregate file, ascending. Other file names are
    /// ignored; a missing root is an empty list.
    pub async fn list_dates(&self) -> Result<Vec<DateKey>, CacheError> {
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(d) => d,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.root, e)),
        };

        let mut dates = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|e| io_error(&self.root, e))? {
            if let Some(date) = entry.file_name().to_str().and_then(date_from_file_name) {
                dates.push(date);
            }
        }
        dates.sort();
        Ok(dates)
    }

    /// Nearest other date with a readable, non-empty aggregate, within
    /// `window_days` of `target`. Ties go to the later date.
    pub async fn nearest(
        &self,
        target: DateKey,
        window_days: i64,
    ) -> Result<Option<(DateKey, Vec<DailyEntry>)>, CacheError> {
        let mut candidates: Vec<DateKey> = self
            .list_dates()
            .await?
            .into_iter()
            .filter(|d| *d != target && d.distance_days(&target) <= window_days)
            .collect();
        candidates.sort_by_key(|d| (d.distance_days(&target), Reverse(*d)));

        for candidate in candidates {
            match self.read(candidate).await {
                Ok(Some(entries)) if !entries.is_empty() => return Ok(Some((candidate, entries))),
                Ok(_) => debug!("Skipping empty fallback cache {}", candidate),
                Err(e) => debug!("Skipping fallback cache {}: {}", candidate, e),
            }
        }
        Ok(None)
    }

    /// Captures one raw upstream body under `raw/<date>/<source_id>.<ext>`.
    pub async fn write_raw(
        &self,
        date: DateKey,
        source_id: &str,
        ext: &str,
        body: &str,
    ) -> Result<PathBuf, CacheError> {
        let dir = self.raw_dir(date);
        fs::create_dir_all(&dir).await.map_err(|e| io_error(&dir, e))?;
        let path = dir.join(format!("{}.{}", source_id, ext));
        fs::write(&path, body).await.map_err(|e| io_error(&path, e))?;
        Ok(path)
    }

    /// Removes all raw captures for `date`. Returns whether anything existed.
    pub async fn clear_raw(&self, date: DateKey) -> Result<bool, CacheError> {
        let dir = self.raw_dir(date);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(&dir, e)),
        }
    }

    /// Deletes aggregates and raw date directories strictly older than
    /// `today - cutoff_days`. A non-positive cutoff disables pruning.
    /// Individual delete failures are logged and skipped.
    pub async fn prune_older_than(&self, cutoff_days: i64, today: DateKey) -> Result<PruneReport, CacheError> {
        let mut report = PruneReport::default();
        if cutoff_days <= 0 {
            return Ok(report);
        }
        let cutoff = today.offset_days(-cutoff_days);

        for date in self.list_dates().await? {
            if date >= cutoff {
                continue;
            }
            let path = self.aggregate_path(date);
            match fs::remove_file(&path).await {
                Ok(()) => report.files_removed += 1,
                Err(e) => debug!("Failed to remove cache file {}: {}", path.display(), e),
            }
        }

        let raw_root = self.root.join(RAW_DIR);
        let mut dir = match fs::read_dir(&raw_root).await {
            Ok(d) => d,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(report),
            Err(e) => return Err(io_error(&raw_root, e)),
        };
        while let Some(entry) = dir.next_entry().await.map_err(|e| io_error(&raw_root, e))? {
            let Some(date) = entry.file_name().to_str().and_then(|n| n.parse::<DateKey>().ok()) else {
                continue;
            };
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir || date >= cutoff {
                continue;
            }
            match fs::remove_dir_all(entry.path()).await {
                Ok(()) => report.raw_dirs_removed += 1,
                Err(e) => debug!("Failed to remove raw cache directory {}: {}", entry.path().display(), e),
            }
        }

        if report.files_removed > 0 || report.raw_dirs_removed > 0 {
            info!(
                "Pruned {} cache files and {} raw directories older than {}",
                report.files_removed, report.raw_dirs_removed, cutoff
            );
        }
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
