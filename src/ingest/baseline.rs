/// Bundled static baseline readings.
///
/// Two optional inputs, both read once at startup:
///   `<static_dir>/<pollenStation>.json` — one object per station holding a
///       numeric reading and optionally a timestamp; key names vary by
///       vintage of the bundle, see `COUNT_KEYS` / `TIMESTAMP_KEYS`.
///   sample snapshot — JSON array of pre-assembled region payloads keyed by
///       `region_id`.
///
/// Neither input is required. A missing or malformed file is logged and the
/// corresponding lookups return `None`.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::model::{DEFAULT_POLLEN_COUNT, DailyEntry, DateKey, Provenance};
use crate::payload::RegionPayload;
use crate::regions::{RegionRegistry, RegionSource};

const COUNT_KEYS: &[&str] = &["pollenCount", "count", "value", "pollen", "today"];
const TIMESTAMP_KEYS: &[&str] = &["timestamp", "datetime", "time", "observed"];

// ---------------------------------------------------------------------------
// Baseline reading
// ---------------------------------------------------------------------------

/// What a baseline file contributed. Either field may be absent.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BaselineReading {
    pub count: Option<f64>,
    pub timestamp: Option<String>,
}

impl BaselineReading {
    /// Extracts the first usable count and timestamp from a JSON object.
    pub fn from_value(value: &Value) -> Self {
        Self {
            count: find_numeric(value),
            timestamp: find_timestamp(value),
        }
    }

    /// Count to report: the bundled value, or the documented default.
    pub fn count_or_default(&self) -> f64 {
        self.count.unwrap_or(DEFAULT_POLLEN_COUNT)
    }
}

/// First numeric field among `COUNT_KEYS`. Numeric strings count;
/// negative values are ignored.
pub fn find_numeric(value: &Value) -> Option<f64> {
    let object = value.as_object()?;
    COUNT_KEYS.iter().find_map(|key| {
        let n = match object.get(*key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }?;
        (n.is_finite() && n >= 0.0).then_some(n)
    })
}

/// First non-empty string field among `TIMESTAMP_KEYS`.
pub fn find_timestamp(value: &Value) -> Option<String> {
    let object = value.as_object()?;
    TIMESTAMP_KEYS.iter().find_map(|key| {
        object
            .get(*key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

// ---------------------------------------------------------------------------
// Baseline bundle
// ---------------------------------------------------------------------------

/// In-memory view of the static bundle and sample snapshot.
#[derive(Debug, Clone, Default)]
pub struct StaticBaseline {
    /// Keyed by pollen-station code.
    readings: HashMap<String, BaselineReading>,
    /// Keyed by region id.
    snapshot: HashMap<String, RegionPayload>,
}

impl StaticBaseline {
    /// A baseline with no bundled files.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_parts(
        readings: HashMap<String, BaselineReading>,
        snapshot: HashMap<String, RegionPayload>,
    ) -> Self {
        Self { readings, snapshot }
    }

    /// Reads every region's baseline file and the sample snapshot.
    pub async fn load(static_dir: &Path, sample_file: &Path, registry: &RegionRegistry) -> Self {
        let mut readings = HashMap::new();
        for source in registry.iter() {
            let path = static_dir.join(format!("{}.json", source.pollen_station));
            match tokio::fs::read_to_string(&path).await {
                Ok(contents) => match serde_json::from_str::<Value>(&contents) {
                    Ok(value) if value.is_object() => {
                        readings.insert(source.pollen_station.clone(), BaselineReading::from_value(&value));
                    }
                    Ok(_) => warn!("Static pollen sample {} is not a JSON object", path.display()),
                    Err(e) => warn!("Failed to parse static pollen sample {}: {}", path.display(), e),
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("Static pollen sample {} missing", path.display());
                }
                Err(e) => warn!("Failed to read static pollen sample {}: {}", path.display(), e),
            }
        }
        info!("Loaded {} static pollen baselines from {}", readings.len(), static_dir.display());

        let snapshot = load_snapshot(sample_file).await;
        Self { readings, snapshot }
    }

    /// Baseline for one pollen station, if its file was bundled.
    pub fn reading(&self, pollen_station: &str) -> Option<&BaselineReading> {
        self.readings.get(pollen_station)
    }

    /// Pre-assembled snapshot record for one region, if present.
    pub fn snapshot(&self, region_id: &str) -> Option<&RegionPayload> {
        self.snapshot.get(region_id)
    }

    pub fn has_readings(&self) -> bool {
        !self.readings.is_empty()
    }

    /// Synthesizes `static` entries for `date`, one per registry source
    /// whose baseline file exists.
    pub fn static_entries(&self, registry: &RegionRegistry, date: DateKey) -> Vec<DailyEntry> {
        registry
            .iter()
            .filter_map(|source| {
                self.reading(&source.pollen_station)
                    .map(|reading| static_entry(source, reading, date))
            })
            .collect()
    }
}

fn static_entry(source: &RegionSource, reading: &BaselineReading, date: DateKey) -> DailyEntry {
    let mut raw = BTreeMap::new();
    raw.insert("source".to_string(), "static".to_string());
    raw.insert("pollen_station".to_string(), source.pollen_station.clone());

    DailyEntry {
        citycode: source.primary_code().to_string(),
        region_id: Some(source.id.clone()),
        pollen: reading.count_or_default(),
        date: reading
            .timestamp
            .clone()
            .unwrap_or_else(|| format!("{}T00:00:00", date.iso())),
        source_date: date,
        provenance: Provenance::Static,
        raw,
    }
}

async fn load_snapshot(path: &Path) -> HashMap<String, RegionPayload> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("Sample snapshot {} not found; using static baselines only", path.display());
            return HashMap::new();
        }
        Err(e) => {
            warn!("Failed to read sample snapshot {}: {}", path.display(), e);
            return HashMap::new();
        }
    };

    let records: Vec<Value> = match serde_json::from_str(&contents) {
        Ok(Value::Array(items)) => items,
        Ok(_) => {
            warn!("Sample snapshot {} is not a JSON array", path.display());
            return HashMap::new();
        }
        Err(e) => {
            warn!("Failed to parse sample snapshot {}: {}", path.display(), e);
            return HashMap::new();
        }
    };

    let mut snapshot = HashMap::new();
    for (index, item) in records.into_iter().enumerate() {
        match serde_json::from_value::<RegionPayload>(item) {
            Ok(payload) => {
                snapshot.insert(payload.region_id.clone(), payload);
            }
            Err(e) => debug!("Skipping sample snapshot record #{}: {}", index, e),
        }
    }
    info!("Loaded {} records from sample snapshot {}", snapshot.len(), path.display());
    snapshot
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
