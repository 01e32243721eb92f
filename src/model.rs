//! Core data types for the pollen service.
//!
//! This module defines the shared domain model imported by all other
//! modules: date keys, per-tier records, severity levels and the error
//! taxonomy. It performs no I/O.

use chrono::{Duration, Local, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Pollen count used when neither a live, cached nor bundled reading exists.
pub const DEFAULT_POLLEN_COUNT: f64 = 25.0;

/// Placeholder weather used when no forecast match is available.
pub const DEFAULT_TEMPERATURE_C: f64 = 20.0;
pub const DEFAULT_HUMIDITY_PCT: f64 = 60.0;
pub const DEFAULT_WIND_SPEED_MS: f64 = 3.0;
pub const DEFAULT_WIND_DIRECTION_DEG: f64 = 180.0;
pub const DEFAULT_RAINFALL_MM: f64 = 0.0;

// ---------------------------------------------------------------------------
// Date keys
// ---------------------------------------------------------------------------

/// A calendar date used to key cache records and disk files.
///
/// Rendered as `YYYYMMDD` everywhere it touches the outside world
/// (file names, raw capture directories, upstream query parameters).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateKey(NaiveDate);

impl DateKey {
    pub const FORMAT: &'static str = "%Y%m%d";

    pub fn new(date: NaiveDate) -> Self {
        DateKey(date)
    }

    /// Today's date in the local timezone.
    pub fn today() -> Self {
        DateKey(Local::now().date_naive())
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// Shifts the key by a signed number of days.
    pub fn offset_days(&self, days: i64) -> Self {
        DateKey(self.0 + Duration::days(days))
    }

    /// Absolute distance in days between two keys.
    pub fn distance_days(&self, other: &DateKey) -> i64 {
        (self.0 - other.0).num_days().abs()
    }

    /// ISO `YYYY-MM-DD` form, as used by the forecast API.
    pub fn iso(&self) -> String {
        self.0.format("%Y-%m-%d").to_string()
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(Self::FORMAT))
    }
}

impl FromStr for DateKey {
    type Err = DateKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 8 || !s.chars().all(|c| c.is_ascii_digit()) {
            return Err(DateKeyError(s.to_string()));
        }
        NaiveDate::parse_from_str(s, Self::FORMAT)
            .map(DateKey)
            .map_err(|_| DateKeyError(s.to_string()))
    }
}

impl From<NaiveDate> for DateKey {
    fn from(date: NaiveDate) -> Self {
        DateKey(date)
    }
}

impl Serialize for DateKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DateKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid date key '{0}' (expected YYYYMMDD)")]
pub struct DateKeyError(pub String);

// ---------------------------------------------------------------------------
// Reading types
// ---------------------------------------------------------------------------

/// Which tier produced a cached entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    #[default]
    Live,
    Static,
    Stale,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Live => "live",
            Provenance::Static => "static",
            Provenance::Stale => "stale",
        }
    }

    /// Provenance for a whole date: live wins over static wins over stale.
    pub fn summarize<'a>(entries: impl IntoIterator<Item = &'a DailyEntry>) -> Option<Self> {
        entries
            .into_iter()
            .map(|e| e.provenance)
            .min_by_key(|p| match p {
                Provenance::Live => 0,
                Provenance::Static => 1,
                Provenance::Stale => 2,
            })
    }
}

/// One resolved reading for one source on one date.
///
/// This is also the on-disk record: a date file is a JSON array of
/// `DailyEntry` values keyed by `citycode`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyEntry {
    /// Primary identifier (administrative city code for live entries).
    pub citycode: String,
    #[serde(default)]
    pub region_id: Option<String>,
    /// Pollen count. Never negative once past the parser boundary.
    pub pollen: f64,
    /// Observation date as reported upstream (free-form).
    #[serde(default)]
    pub date: String,
    /// Date in the lookback window that produced the reading.
    pub source_date: DateKey,
    #[serde(default)]
    pub provenance: Provenance,
    /// Upstream columns, kept verbatim for debugging.
    #[serde(default)]
    pub raw: BTreeMap<String, String>,
}

/// All entries resolved for one date, indexed by every known alias.
///
/// Aliases of the same source share one `Arc<DailyEntry>`.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRecord {
    /// The requested date.
    pub date: DateKey,
    /// The date whose data was used (differs on stale fallback).
    pub source_key: DateKey,
    pub provenance: Option<Provenance>,
    pub entries: HashMap<String, Arc<DailyEntry>>,
}

impl CacheRecord {
    pub fn empty(date: DateKey) -> Self {
        Self {
            date,
            source_key: date,
            provenance: None,
            entries: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, alias: &str) -> Option<&Arc<DailyEntry>> {
        self.entries.get(alias)
    }
}

/// Outcome of resolving one date through the tier chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    MemoryHit,
    DiskHit,
    LiveFetched,
    StaticFallback,
    StaleFallback,
    Empty,
}

/// Parsed weather observation for one forecast area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    pub temperature: f64,
    pub humidity: f64,
    pub wind_speed: f64,
    pub wind_direction: f64,
    pub condition: Option<String>,
    pub observed_at: Option<String>,
    pub source: String,
}

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Ordinal pollen severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollenLevel {
    #[default]
    Low,
    Moderate,
    High,
    VeryHigh,
}

impl PollenLevel {
    /// Classifies a pollen count. Thresholds are inclusive lower bounds:
    /// 101 very_high, 31 high, 11 moderate, everything below is low.
    pub fn from_count(count: f64) -> Self {
        if count >= 101.0 {
            PollenLevel::VeryHigh
        } else if count >= 31.0 {
            PollenLevel::High
        } else if count >= 11.0 {
            PollenLevel::Moderate
        } else {
            PollenLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PollenLevel::Low => "low",
            PollenLevel::Moderate => "moderate",
            PollenLevel::High => "high",
            PollenLevel::VeryHigh => "very_high",
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can arise when talking to an upstream feed.
///
/// None of these ever reach a caller of the resolver; they are logged and
/// the tier is treated as a miss.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Non-2xx HTTP response.
    #[error("HTTP error: {0}")]
    Http(u16),
    /// The request exceeded the client timeout.
    #[error("request timed out: {0}")]
    Timeout(String),
    /// Connection, TLS or body-read failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// The response body had an unexpected shape.
    #[error("parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(e.to_string())
        } else if let Some(status) = e.status() {
            FetchError::Http(status.as_u16())
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}

/// Errors from the on-disk daily cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed cache file {}: {message}", path.display())]
    Malformed { path: PathBuf, message: String },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
