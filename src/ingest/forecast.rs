/// Forecast JSON client for the weather side channel.
///
/// Parses the public forecast endpoint:
///   GET {base}?city=<forecastCode>
///
/// Response shape (only the fields we read):
///   publicTime                         — issue timestamp (ISO 8601)
///   forecasts[]
///     .date                            — "YYYY-MM-DD"
///     .telop                           — condition text
///     .temperature.{max,min}.celsius   — STRING or null
///     .chanceOfRain.{T00_06,...}       — "10%" / "--%"
///     .detail.wind                     — free text, e.g. "北の風　やや強く"
///
/// Temperatures arrive as strings and are often null for the current day,
/// so every field is read leniently.

use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

use crate::ingest::build_http_client;
use crate::model::{
    DEFAULT_HUMIDITY_PCT, DEFAULT_TEMPERATURE_C, DEFAULT_WIND_DIRECTION_DEG, DEFAULT_WIND_SPEED_MS,
    FetchError, WeatherRecord,
};

/// Source tag stamped on every parsed observation.
pub const FORECAST_SOURCE: &str = "tsukumijima_forecast";

/// Compass tokens, longest first so "北北東" is not read as "北".
const COMPASS: &[(&str, f64)] = &[
    ("北北東", 22.5),
    ("東北東", 67.5),
    ("東南東", 112.5),
    ("南南東", 157.5),
    ("南南西", 202.5),
    ("西南西", 247.5),
    ("西北西", 292.5),
    ("北北西", 337.5),
    ("北東", 45.0),
    ("南東", 135.0),
    ("南西", 225.0),
    ("北西", 315.0),
    ("東", 90.0),
    ("南", 180.0),
    ("西", 270.0),
    ("北", 0.0),
];

/// Intensity phrases, strongest first. The first phrase found wins.
const WIND_PHRASES: &[(&[&str], f64)] = &[
    (&["非常に強", "猛烈"], 12.0),
    (&["強く"], 8.0),
    (&["やや強"], 5.5),
    (&["弱く", "弱い"], 2.0),
    (&["静穏"], 0.5),
];

static WIND_METRES: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*メートル").ok());

// ---------------------------------------------------------------------------
// Serde structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForecastResponse {
    public_time: Option<String>,
    #[serde(default)]
    forecasts: Vec<DayForecast>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DayForecast {
    date: Option<String>,
    telop: Option<String>,
    #[serde(default)]
    temperature: Option<Temperatures>,
    #[serde(default)]
    chance_of_rain: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    detail: Option<Detail>,
}

#[derive(Debug, Deserialize)]
struct Temperatures {
    max: Option<Reading>,
    min: Option<Reading>,
}

#[derive(Debug, Deserialize)]
struct Reading {
    celsius: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Detail {
    wind: Option<String>,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parses a forecast body and extracts the observation for `target`.
///
/// Selects the forecast whose `date` matches `target`, else the first one.
/// Missing fields fall back to the default weather constants.
///
/// # Returns
/// - `Ok(None)` — the body parsed but held no forecasts.
///
/// # Errors
/// - `FetchError::Parse` — the body was not the expected JSON shape.
pub fn parse_forecast(json: &str, target: NaiveDate) -> Result<Option<WeatherRecord>, FetchError> {
    let response: ForecastResponse = serde_json::from_str(json)
        .map_err(|e| FetchError::Parse(format!("forecast JSON deserialization failed: {}", e)))?;

    let target_key = target.format("%Y-%m-%d").to_string();
    let ForecastResponse { public_time, forecasts } = response;
    let mut forecasts = forecasts.into_iter();
    let Some(first) = forecasts.next() else {
        return Ok(None);
    };
    let selected = if first.date.as_deref() == Some(target_key.as_str()) {
        first
    } else {
        forecasts
            .find(|f| f.date.as_deref() == Some(target_key.as_str()))
            .unwrap_or(first)
    };

    let temps: Vec<f64> = selected
        .temperature
        .as_ref()
        .map(|t| {
            [&t.max, &t.min]
                .into_iter()
                .flatten()
                .filter_map(|r| r.celsius.as_ref().and_then(value_to_f64))
                .collect()
        })
        .unwrap_or_default();

    let chances: Vec<f64> = selected
        .chance_of_rain
        .as_ref()
        .map(|m| m.values().filter_map(|v| v.as_str().and_then(parse_percent)).collect())
        .unwrap_or_default();

    let wind_text = selected
        .detail
        .as_ref()
        .and_then(|d| d.wind.as_deref())
        .unwrap_or("")
        .trim();

    Ok(Some(WeatherRecord {
        temperature: mean(&temps).unwrap_or(DEFAULT_TEMPERATURE_C),
        humidity: mean(&chances).unwrap_or(DEFAULT_HUMIDITY_PCT),
        wind_speed: estimate_wind_speed(wind_text).unwrap_or(DEFAULT_WIND_SPEED_MS),
        wind_direction: parse_wind_direction(wind_text).unwrap_or(DEFAULT_WIND_DIRECTION_DEG),
        condition: selected.telop,
        observed_at: public_time,
        source: FORECAST_SOURCE.to_string(),
    }))
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parses "30%" style values. "--%", empty and non-numeric are `None`.
pub fn parse_percent(value: &str) -> Option<f64> {
    let numeric = value.replace('%', "");
    let numeric = numeric.trim();
    if numeric.is_empty() || numeric == "--" {
        return None;
    }
    numeric.parse().ok()
}

/// Maps wind text to a compass bearing in degrees.
pub fn parse_wind_direction(text: &str) -> Option<f64> {
    if text.is_empty() {
        return None;
    }
    let text = text.replace('\u{3000}', " ");
    COMPASS
        .iter()
        .find(|(token, _)| text.contains(token))
        .map(|(_, degrees)| *degrees)
}

/// Estimates wind speed (m/s) from free text.
///
/// An explicit "<n> メートル" wins; otherwise the strongest matching
/// intensity phrase; otherwise the default speed. Empty text is `None`.
pub fn estimate_wind_speed(text: &str) -> Option<f64> {
    if text.is_empty() {
        return None;
    }
    let explicit = WIND_METRES
        .as_ref()
        .and_then(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok());
    if explicit.is_some() {
        return explicit;
    }

    let phrased = WIND_PHRASES
        .iter()
        .find(|(phrases, _)| phrases.iter().any(|p| text.contains(p)))
        .map(|(_, speed)| *speed);
    Some(phrased.unwrap_or(DEFAULT_WIND_SPEED_MS))
}

// ---------------------------------------------------------------------------
// Feed trait + HTTP implementation
// ---------------------------------------------------------------------------

/// Source of raw forecast bodies.
#[async_trait]
pub trait ForecastFeed: Send + Sync {
    async fn fetch_forecast(&self, forecast_code: &str) -> Result<String, FetchError>;
}

/// `ForecastFeed` over the public HTTP endpoint.
pub struct HttpForecastFeed {
    client: reqwest::Client,
    base_url: String,
}

impl HttpForecastFeed {
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        Ok(Self {
            client: build_http_client(user_agent, timeout)?,
            base_url: base_url.to_string(),
        })
    }
}

#[async_trait]
impl ForecastFeed for HttpForecastFeed {
    async fn fetch_forecast(&self, forecast_code: &str) -> Result<String, FetchError> {
        let url = format!(
            "{}?city={}",
            self.base_url.trim_end_matches('?'),
            urlencoding::encode(forecast_code)
        );
        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(FetchError::Http(status.as_u16()));
        }
        Ok(response.text().await?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
