/// Daily pollen CSV feed client.
///
/// Handles URL construction, the lookback window and CSV parsing for the
/// per-city pollen endpoint:
///   GET {base}?citycode=<code>&start=<YYYYMMDD>&end=<YYYYMMDD>
///
/// The feed answers one city and one day per request. A 404 means "no
/// data for that day", not a failure; the resolver steps back through the
/// lookback window until some day yields a reading. See `fixtures.rs` for
/// annotated example bodies.

use async_trait::async_trait;
use csv::{ReaderBuilder, StringRecord, Trim};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use crate::ingest::build_http_client;
use crate::model::{DailyEntry, DateKey, FetchError, Provenance};

/// Documented "no data" marker. Normalized to zero at this boundary.
pub const NO_DATA_SENTINEL: f64 = -9999.0;

const ID_COLUMNS: &[&str] = &["citycode", "city_code"];
const VALUE_COLUMNS: &[&str] = &["pollen", "value", "pollen_count"];
const DATE_COLUMNS: &[&str] = &["date", "datetime"];

// ---------------------------------------------------------------------------
// Parsed row
// ---------------------------------------------------------------------------

/// One CSV row as it came off the wire, after sentinel normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct PollenCsvRow {
    pub citycode: String,
    pub date: String,
    /// `None` when the column was missing, non-numeric or negative.
    pub pollen: Option<f64>,
    pub raw: BTreeMap<String, String>,
}

impl PollenCsvRow {
    /// Converts an accepted row into the canonical entry for `citycode`.
    ///
    /// Returns `None` when the row carries no usable reading.
    pub fn into_entry(self, citycode: &str, source_date: DateKey) -> Option<DailyEntry> {
        let pollen = self.pollen?;
        let mut raw = self.raw;
        raw.entry("source_date".to_string())
            .or_insert_with(|| source_date.to_string());

        Some(DailyEntry {
            citycode: citycode.to_string(),
            region_id: None,
            pollen,
            date: self.date,
            source_date,
            provenance: Provenance::Live,
            raw,
        })
    }
}

/// Applies the sentinel rule: -9999 becomes 0, any other negative is
/// discarded.
pub fn normalize_reading(value: f64) -> Option<f64> {
    if (value - NO_DATA_SENTINEL).abs() < 1e-3 {
        Some(0.0)
    } else if value < 0.0 || !value.is_finite() {
        None
    } else {
        Some(value)
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parses a pollen CSV body with a header row.
///
/// Tolerant of column renames (see the `*_COLUMNS` tables) and ragged rows.
/// Rows with no identifier are skipped.
///
/// # Errors
/// - `FetchError::Parse` — the header row itself could not be read.
pub fn parse_csv(body: &str) -> Result<Vec<PollenCsvRow>, FetchError> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_reader(body.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| FetchError::Parse(format!("CSV header unreadable: {}", e)))?
        .clone();

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                debug!("Skipping unreadable CSV row {}: {}", index + 1, e);
                continue;
            }
        };

        let Some(citycode) = first_present(&headers, &record, ID_COLUMNS) else {
            continue;
        };

        let pollen = first_present(&headers, &record, VALUE_COLUMNS)
            .and_then(|v| v.parse::<f64>().ok())
            .and_then(normalize_reading);

        let date = first_present(&headers, &record, DATE_COLUMNS).unwrap_or_default();

        let raw = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.to_string(), v.to_string()))
            .collect();

        rows.push(PollenCsvRow {
            citycode,
            date,
            pollen,
            raw,
        });
    }

    Ok(rows)
}

/// First non-empty value among `columns`, in order.
fn first_present(headers: &StringRecord, record: &StringRecord, columns: &[&str]) -> Option<String> {
    columns.iter().find_map(|col| {
        headers
            .iter()
            .position(|h| h == *col)
            .and_then(|i| record.get(i))
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    })
}

/// Picks the row for `citycode`, falling back to the first row when the
/// feed labels the city differently.
pub fn select_row(rows: Vec<PollenCsvRow>, citycode: &str) -> Option<PollenCsvRow> {
    let mut first = None;
    for row in rows {
        if row.citycode == citycode {
            return Some(row);
        }
        if first.is_none() {
            first = Some(row);
        }
    }
    first
}

// ---------------------------------------------------------------------------
// Request construction
// ---------------------------------------------------------------------------

/// The request date followed by the preceding `lookback_days` dates,
/// most recent first.
pub fn lookback_window(day: DateKey, lookback_days: u32) -> Vec<DateKey> {
    (0..=i64::from(lookback_days))
        .map(|offset| day.offset_days(-offset))
        .collect()
}

/// Builds the single-day query URL for one city.
pub fn build_pollen_url(base: &str, city_code: &str, day: DateKey) -> String {
    let day = day.to_string();
    format!(
        "{}?citycode={}&start={}&end={}",
        base.trim_end_matches('?'),
        urlencoding::encode(city_code),
        day,
        day
    )
}

// ---------------------------------------------------------------------------
// Feed trait + HTTP implementation
// ---------------------------------------------------------------------------

/// Source of raw pollen CSV bodies.
#[async_trait]
pub trait PollenFeed: Send + Sync {
    /// Fetches the CSV body for one city and one day.
    ///
    /// `Ok(None)` means the feed has nothing for that day (HTTP 404).
    async fn fetch_csv(&self, city_code: &str, day: DateKey) -> Result<Option<String>, FetchError>;
}

/// `PollenFeed` over the public HTTP endpoint.
pub struct HttpPollenFeed {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPollenFeed {
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        Ok(Self {
            client: build_http_client(user_agent, timeout)?,
            base_url: base_url.to_string(),
        })
    }
}

#[async_trait]
impl PollenFeed for HttpPollenFeed {
    async fn fetch_csv(&self, city_code: &str, day: DateKey) -> Result<Option<String>, FetchError> {
        let url = build_pollen_url(&self.base_url, city_code, day);
        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "text/csv")
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(FetchError::Http(status.as_u16()));
        }

        Ok(Some(response.text().await?))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
