//! Shared helpers for integration tests: scripted upstream feeds and
//! service construction against a temporary cache directory.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use pollen_service::config::ServiceConfig;
use pollen_service::ingest::baseline::{BaselineReading, StaticBaseline};
use pollen_service::ingest::forecast::ForecastFeed;
use pollen_service::ingest::pollen::PollenFeed;
use pollen_service::model::{DateKey, FetchError};
use pollen_service::regions::RegionRegistry;
use pollen_service::resolver::{ResolverSettings, SourceResolver};
use pollen_service::cache::DailyCacheStore;
use pollen_service::service::PollenService;

// ---------------------------------------------------------------------------
// Scripted feeds
// ---------------------------------------------------------------------------

/// What the pollen feed answers for one (city code, day) pair.
#[derive(Debug, Clone)]
pub enum Reply {
    Csv(String),
    Timeout,
}

/// Pollen feed answering from a fixed script. Unscripted requests are 404s.
#[derive(Default)]
pub struct ScriptedPollenFeed {
    replies: HashMap<(String, DateKey), Reply>,
    /// Fallback reply per city code, for any day not scripted explicitly.
    any_day: HashMap<String, Reply>,
    pub calls: AtomicUsize,
}

impl ScriptedPollenFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, code: &str, day: DateKey, reply: Reply) -> Self {
        self.replies.insert((code.to_string(), day), reply);
        self
    }

    pub fn reply_any_day(mut self, code: &str, reply: Reply) -> Self {
        self.any_day.insert(code.to_string(), reply);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PollenFeed for ScriptedPollenFeed {
    async fn fetch_csv(&self, city_code: &str, day: DateKey) -> Result<Option<String>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .replies
            .get(&(city_code.to_string(), day))
            .or_else(|| self.any_day.get(city_code));
        match reply {
            Some(Reply::Csv(body)) => Ok(Some(body.clone())),
            Some(Reply::Timeout) => Err(FetchError::Timeout(format!("{} timed out", city_code))),
            None => Ok(None),
        }
    }
}

/// Forecast feed returning one body for every code, or failing.
pub struct FixedForecastFeed {
    body: Option<String>,
    pub calls: AtomicUsize,
}

impl FixedForecastFeed {
    pub fn with_body(body: &str) -> Self {
        Self {
            body: Some(body.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            body: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ForecastFeed for FixedForecastFeed {
    async fn fetch_forecast(&self, _forecast_code: &str) -> Result<String, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.body.clone().ok_or(FetchError::Http(503))
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn key(s: &str) -> DateKey {
    s.parse().expect("valid date key")
}

/// One-row pollen CSV as the live API returns it.
pub fn pollen_csv(code: &str, day: DateKey, count: f64) -> String {
    format!("citycode,date,pollen\n{},{}T00:00:00+09:00,{}\n", code, day.iso(), count)
}

/// Baseline bundle holding a reading for tokyo's pollen station only.
pub fn tokyo_baseline(count: f64) -> StaticBaseline {
    let mut readings = HashMap::new();
    readings.insert(
        "441321000".to_string(),
        BaselineReading {
            count: Some(count),
            timestamp: None,
        },
    );
    StaticBaseline::from_parts(readings, HashMap::new())
}

pub fn resolver(
    dir: &Path,
    feed: Arc<ScriptedPollenFeed>,
    baseline: StaticBaseline,
    live_fetch_enabled: bool,
) -> SourceResolver {
    SourceResolver::new(
        Arc::new(RegionRegistry::builtin()),
        feed,
        Arc::new(baseline),
        DailyCacheStore::new(dir),
        ResolverSettings {
            lookback_days: 3,
            live_fetch_enabled,
            ..ResolverSettings::default()
        },
    )
}

pub fn service(
    dir: &Path,
    feed: Arc<ScriptedPollenFeed>,
    forecast: Arc<FixedForecastFeed>,
    baseline: StaticBaseline,
) -> PollenService {
    let config = ServiceConfig {
        cache_dir: dir.to_path_buf(),
        lookback_days: 3,
        ..ServiceConfig::default()
    };
    PollenService::new(
        config,
        Arc::new(RegionRegistry::builtin()),
        Arc::new(baseline),
        feed,
        forecast,
    )
}
