/// Region payload assembly.
///
/// Merges a resolved pollen entry, an optional weather observation and the
/// region's metadata into the record handed to callers. Pollen precedence:
///
/// 1. resolved entry for the date (live or stale tier)
/// 2. the region's record in the sample snapshot
/// 3. the region's bundled baseline reading, or the default count
///
/// Weather fields fall back to placeholder constants when no observation
/// matched.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::ingest::baseline::StaticBaseline;
use crate::model::{
    CacheRecord, DEFAULT_HUMIDITY_PCT, DEFAULT_RAINFALL_MM, DEFAULT_TEMPERATURE_C,
    DEFAULT_WIND_DIRECTION_DEG, DEFAULT_WIND_SPEED_MS, DailyEntry, DateKey, PollenLevel,
    Provenance, WeatherRecord,
};
use crate::regions::RegionSource;

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

/// Assembled output record for one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionPayload {
    /// Region metadata
    pub region: String,
    pub region_id: String,
    #[serde(default)]
    pub prefecture: String,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,

    /// Pollen reading
    pub pollen_count: f64,
    #[serde(default)]
    pub pollen_level: PollenLevel,

    /// Weather (placeholders unless an observation was merged)
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_humidity")]
    pub humidity: f64,
    #[serde(default = "default_wind_speed")]
    pub wind_speed: f64,
    #[serde(default = "default_wind_direction")]
    pub wind_direction: f64,
    #[serde(default)]
    pub rainfall: f64,

    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather_condition: Option<String>,
    #[serde(rename = "weatherData", default, skip_serializing_if = "Option::is_none")]
    pub weather_data: Option<WeatherData>,
    #[serde(default)]
    pub raw: BTreeMap<String, String>,
}

/// Weather block as exposed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherData {
    pub temperature: f64,
    pub humidity: f64,
    pub wind_speed: f64,
    pub wind_direction: f64,
    pub condition: Option<String>,
    pub observed_at: Option<String>,
    pub source: String,
}

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE_C
}
fn default_humidity() -> f64 {
    DEFAULT_HUMIDITY_PCT
}
fn default_wind_speed() -> f64 {
    DEFAULT_WIND_SPEED_MS
}
fn default_wind_direction() -> f64 {
    DEFAULT_WIND_DIRECTION_DEG
}

impl RegionPayload {
    /// Skeleton record for `source` with placeholder weather.
    fn for_region(source: &RegionSource, count: f64, timestamp: String) -> Self {
        Self {
            region: source.name.clone(),
            region_id: source.id.clone(),
            prefecture: source.prefecture.clone(),
            latitude: source.latitude,
            longitude: source.longitude,
            pollen_count: count,
            pollen_level: PollenLevel::from_count(count),
            temperature: DEFAULT_TEMPERATURE_C,
            humidity: DEFAULT_HUMIDITY_PCT,
            wind_speed: DEFAULT_WIND_SPEED_MS,
            wind_direction: DEFAULT_WIND_DIRECTION_DEG,
            rainfall: DEFAULT_RAINFALL_MM,
            timestamp,
            weather_condition: None,
            weather_data: None,
            raw: BTreeMap::new(),
        }
    }

    /// Overwrites the weather fields with `record`. Fields already present
    /// in `weather_condition` and `raw` are kept.
    fn merge_weather(&mut self, record: &WeatherRecord) {
        self.temperature = record.temperature;
        self.humidity = record.humidity;
        self.wind_speed = record.wind_speed;
        self.wind_direction = record.wind_direction;
        self.weather_data = Some(WeatherData {
            temperature: record.temperature,
            humidity: record.humidity,
            wind_speed: record.wind_speed,
            wind_direction: record.wind_direction,
            condition: record.condition.clone(),
            observed_at: record.observed_at.clone(),
            source: record.source.clone(),
        });
        if self.weather_condition.is_none() {
            self.weather_condition = record.condition.clone();
        }
        self.raw
            .entry("weather_source".to_string())
            .or_insert_with(|| record.source.clone());
        if let Some(observed) = &record.observed_at {
            self.raw
                .entry("weather_observed_at".to_string())
                .or_insert_with(|| observed.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

/// Renders an 8-digit `YYYYMMDD` string as ISO midnight; other strings
/// pass through unchanged.
pub fn normalize_timestamp(value: &str) -> String {
    match value.parse::<DateKey>() {
        Ok(key) => format!("{}T00:00:00", key.iso()),
        Err(_) => value.to_string(),
    }
}

fn midnight(date: NaiveDate) -> String {
    format!("{}T00:00:00", date.format("%Y-%m-%d"))
}

/// Builds `RegionPayload`s from resolved tiers.
#[derive(Debug, Clone)]
pub struct PayloadAssembler {
    baseline: Arc<StaticBaseline>,
}

impl PayloadAssembler {
    pub fn new(baseline: Arc<StaticBaseline>) -> Self {
        Self { baseline }
    }

    /// Assembles the record for one region.
    ///
    /// `requested` stamps the output with that date (and records it in
    /// `raw.requested_date`); otherwise `now` is the reference instant.
    pub fn assemble(
        &self,
        source: &RegionSource,
        record: &CacheRecord,
        weather: &HashMap<String, WeatherRecord>,
        requested: Option<NaiveDate>,
        now: NaiveDateTime,
    ) -> RegionPayload {
        let fallback_time = now.format("%Y-%m-%dT%H:%M:%S").to_string();

        // Static-tier entries are synthesized from the baseline bundle, so
        // the snapshot still outranks them.
        let resolved = source
            .lookup_keys()
            .into_iter()
            .find_map(|k| record.get(k))
            .filter(|entry| entry.provenance != Provenance::Static);
        let mut payload = match resolved {
            Some(entry) => from_entry(source, entry, &fallback_time),
            None => match self.baseline.snapshot(&source.id) {
                Some(snapshot) => {
                    let mut payload = snapshot.clone();
                    payload.pollen_level = PollenLevel::from_count(payload.pollen_count);
                    payload
                }
                None => self.baseline_payload(source, requested.map(midnight).unwrap_or(fallback_time)),
            },
        };

        if let Some(date) = requested {
            payload.timestamp = midnight(date);
            payload
                .raw
                .entry("requested_date".to_string())
                .or_insert_with(|| DateKey::new(date).to_string());
        }

        let observation = [Some(source.forecast_city.as_str()), source.city_code.as_deref(), Some(source.id.as_str())]
            .into_iter()
            .flatten()
            .find_map(|k| weather.get(k));
        if let Some(observation) = observation {
            payload.merge_weather(observation);
        }

        payload
    }

    fn baseline_payload(&self, source: &RegionSource, reference: String) -> RegionPayload {
        let reading = self.baseline.reading(&source.pollen_station).cloned().unwrap_or_default();
        let mut payload = RegionPayload::for_region(
            source,
            reading.count_or_default(),
            reading.timestamp.unwrap_or(reference),
        );
        payload.raw.insert("source".to_string(), "static".to_string());
        payload.raw.insert("pollen_station".to_string(), source.pollen_station.clone());
        payload
    }
}

fn from_entry(source: &RegionSource, entry: &DailyEntry, fallback_time: &str) -> RegionPayload {
    let observed = entry
        .raw
        .get("date")
        .or_else(|| entry.raw.get("datetime"))
        .filter(|s| !s.is_empty())
        .map(String::as_str)
        .or_else(|| Some(entry.date.as_str()).filter(|s| !s.is_empty()))
        .unwrap_or(fallback_time);

    let mut payload = RegionPayload::for_region(source, entry.pollen, normalize_timestamp(observed));
    payload
        .raw
        .insert("provenance".to_string(), entry.provenance.as_str().to_string());
    payload
        .raw
        .insert("source_date".to_string(), entry.source_date.to_string());
    payload
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::baseline::BaselineReading;
    use crate::regions::RegionRegistry;

    fn key(s: &str) -> DateKey {
        s.parse().unwrap()
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .and_then(|d| d.and_hms_opt(10, 30, 0))
            .unwrap()
    }

    fn tokyo() -> RegionSource {
        RegionRegistry::builtin().get("tokyo").cloned().unwrap()
    }

    fn record_with(alias: &str, pollen: f64, date: &str) -> CacheRecord {
        let mut record = CacheRecord::empty(key("20240301"));
        record.entries.insert(
            alias.to_string(),
            Arc::new(DailyEntry {
                citycode: alias.to_string(),
                region_id: None,
                pollen,
                date: date.to_string(),
                source_date: key("20240229"),
                provenance: Provenance::Live,
                raw: BTreeMap::new(),
            }),
        );
        record
    }

    fn weather() -> WeatherRecord {
        WeatherRecord {
            temperature: 12.5,
            humidity: 40.0,
            wind_speed: 5.5,
            wind_direction: 90.0,
            condition: Some("晴れ".to_string()),
            observed_at: Some("2024-03-01T05:00:00+09:00".to_string()),
            source: "tsukumijima_forecast".to_string(),
        }
    }

    #[test]
    fn test_resolved_entry_takes_precedence() {
        let assembler = PayloadAssembler::new(Arc::new(StaticBaseline::empty()));
        let payload = assembler.assemble(&tokyo(), &record_with("13101", 64.0, "20240229"), &HashMap::new(), None, now());

        assert_eq!(payload.pollen_count, 64.0);
        assert_eq!(payload.pollen_level, PollenLevel::High);
        assert_eq!(payload.timestamp, "2024-02-29T00:00:00");
        assert_eq!(payload.raw.get("provenance").map(String::as_str), Some("live"));
        assert_eq!(payload.raw.get("source_date").map(String::as_str), Some("20240229"));
        assert_eq!(payload.temperature, DEFAULT_TEMPERATURE_C);
        assert!(payload.weather_data.is_none());
    }

    #[test]
    fn test_entry_found_by_secondary_alias() {
        let assembler = PayloadAssembler::new(Arc::new(StaticBaseline::empty()));
        let payload = assembler.assemble(&tokyo(), &record_with("tokyo", 3.0, ""), &HashMap::new(), None, now());
        assert_eq!(payload.pollen_count, 3.0);
        assert_eq!(payload.timestamp, "2024-03-01T10:30:00");
    }

    #[test]
    fn test_snapshot_then_baseline_precedence() {
        let mut snapshot = HashMap::new();
        let snap = RegionPayload::for_region(&tokyo(), 150.0, "2024-02-01T00:00:00".to_string());
        snapshot.insert("tokyo".to_string(), snap);
        let assembler = PayloadAssembler::new(Arc::new(StaticBaseline::from_parts(HashMap::new(), snapshot)));
        let empty = CacheRecord::empty(key("20240301"));

        let payload = assembler.assemble(&tokyo(), &empty, &HashMap::new(), None, now());
        assert_eq!(payload.pollen_count, 150.0);
        assert_eq!(payload.pollen_level, PollenLevel::VeryHigh);

        let osaka = RegionRegistry::builtin().get("osaka").cloned().unwrap();
        let payload = assembler.assemble(&osaka, &empty, &HashMap::new(), None, now());
        assert_eq!(payload.pollen_count, 25.0);
        assert_eq!(payload.pollen_level, PollenLevel::Moderate);
        assert_eq!(payload.raw.get("source").map(String::as_str), Some("static"));
        assert_eq!(payload.raw.get("pollen_station").map(String::as_str), Some("620780000"));
        assert_eq!(payload.timestamp, "2024-03-01T10:30:00");
    }

    #[test]
    fn test_static_entry_yields_to_snapshot() {
        let mut snapshot = HashMap::new();
        snapshot.insert(
            "tokyo".to_string(),
            RegionPayload::for_region(&tokyo(), 150.0, "2024-02-01T00:00:00".to_string()),
        );
        let assembler = PayloadAssembler::new(Arc::new(StaticBaseline::from_parts(HashMap::new(), snapshot)));

        let mut record = record_with("13101", 5.0, "");
        let entry = record.entries.get_mut("13101").unwrap();
        Arc::make_mut(entry).provenance = Provenance::Static;

        let payload = assembler.assemble(&tokyo(), &record, &HashMap::new(), None, now());
        assert_eq!(payload.pollen_count, 150.0);
        assert!(payload.raw.get("provenance").is_none());

        // Stale entries still outrank the snapshot.
        let mut record = record_with("13101", 5.0, "");
        let entry = record.entries.get_mut("13101").unwrap();
        Arc::make_mut(entry).provenance = Provenance::Stale;
        let payload = assembler.assemble(&tokyo(), &record, &HashMap::new(), None, now());
        assert_eq!(payload.pollen_count, 5.0);
        assert_eq!(payload.raw.get("provenance").map(String::as_str), Some("stale"));
    }

    #[test]
    fn test_baseline_reading_used_when_bundled() {
        let mut readings = HashMap::new();
        readings.insert(
            "441321000".to_string(),
            BaselineReading {
                count: Some(7.0),
                timestamp: Some("2024-02-28T09:00:00".to_string()),
            },
        );
        let assembler = PayloadAssembler::new(Arc::new(StaticBaseline::from_parts(readings, HashMap::new())));
        let payload = assembler.assemble(&tokyo(), &CacheRecord::empty(key("20240301")), &HashMap::new(), None, now());
        assert_eq!(payload.pollen_count, 7.0);
        assert_eq!(payload.pollen_level, PollenLevel::Low);
        assert_eq!(payload.timestamp, "2024-02-28T09:00:00");
    }

    #[test]
    fn test_requested_date_stamps_output() {
        let assembler = PayloadAssembler::new(Arc::new(StaticBaseline::empty()));
        let requested = NaiveDate::from_ymd_opt(2024, 2, 10).unwrap();
        let payload = assembler.assemble(
            &tokyo(),
            &record_with("13101", 12.0, "2024-02-10T00:00:00+09:00"),
            &HashMap::new(),
            Some(requested),
            now(),
        );
        assert_eq!(payload.timestamp, "2024-02-10T00:00:00");
        assert_eq!(payload.raw.get("requested_date").map(String::as_str), Some("20240210"));
    }

    #[test]
    fn test_weather_merge_by_forecast_code() {
        let assembler = PayloadAssembler::new(Arc::new(StaticBaseline::empty()));
        let mut lookup = HashMap::new();
        lookup.insert("130010".to_string(), weather());

        let payload = assembler.assemble(&tokyo(), &record_with("13101", 12.0, ""), &lookup, None, now());
        assert_eq!(payload.temperature, 12.5);
        assert_eq!(payload.wind_speed, 5.5);
        assert_eq!(payload.rainfall, DEFAULT_RAINFALL_MM);
        assert_eq!(payload.weather_condition.as_deref(), Some("晴れ"));
        let data = payload.weather_data.as_ref().unwrap();
        assert_eq!(data.wind_direction, 90.0);
        assert_eq!(payload.raw.get("weather_source").map(String::as_str), Some("tsukumijima_forecast"));
        assert_eq!(
            payload.raw.get("weather_observed_at").map(String::as_str),
            Some("2024-03-01T05:00:00+09:00")
        );
    }

    #[test]
    fn test_weather_block_serializes_camel_case() {
        let assembler = PayloadAssembler::new(Arc::new(StaticBaseline::empty()));
        let mut lookup = HashMap::new();
        lookup.insert("tokyo".to_string(), weather());
        let payload = assembler.assemble(&tokyo(), &record_with("13101", 12.0, ""), &lookup, None, now());

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["pollen_level"], "moderate");
        assert_eq!(json["weatherData"]["windSpeed"], 5.5);
        assert_eq!(json["weatherData"]["observedAt"], "2024-03-01T05:00:00+09:00");
    }

    #[test]
    fn test_normalize_timestamp() {
        assert_eq!(normalize_timestamp("20240301"), "2024-03-01T00:00:00");
        assert_eq!(normalize_timestamp("2024-03-01T09:00:00"), "2024-03-01T09:00:00");
        assert_eq!(normalize_timestamp("2024030"), "2024030");
    }
}
