//! Weather side channel.
//!
//! A short-TTL cache of parsed forecast observations keyed by forecast
//! code. It sits beside the pollen tiers rather than inside them: a
//! missing observation only means placeholder weather in the assembled
//! payload.
//!
//! The forecast API only covers the near term, so lookups more than one
//! day away from today make no upstream calls at all. When a refresh
//! fails, the last observation for that code is served regardless of age.

use chrono::NaiveDate;
use dashmap::DashMap;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::ingest::forecast::{ForecastFeed, parse_forecast};
use crate::model::WeatherRecord;
use crate::regions::RegionSource;

/// Furthest distance from today, in days, that is worth a forecast call.
pub const FORECAST_HORIZON_DAYS: i64 = 1;

#[derive(Debug, Clone)]
struct CachedObservation {
    captured: Instant,
    record: WeatherRecord,
}

pub struct WeatherSideChannel {
    feed: Arc<dyn ForecastFeed>,
    ttl: Duration,
    cache: DashMap<String, CachedObservation>,
}

impl WeatherSideChannel {
    pub fn new(feed: Arc<dyn ForecastFeed>, ttl: Duration) -> Self {
        Self {
            feed,
            ttl,
            cache: DashMap::new(),
        }
    }

    /// Observations for `sources` on `target`, keyed by each source's
    /// forecast code, city code and region id. Sources sharing a forecast
    /// code trigger a single fetch.
    ///
    /// The cache is keyed by forecast code alone: within the TTL, an
    /// observation parsed for one day in the ±1-day horizon is served for
    /// the others too.
    pub async fn lookup(
        &self,
        sources: &[RegionSource],
        target: NaiveDate,
        today: NaiveDate,
    ) -> HashMap<String, WeatherRecord> {
        let mut results = HashMap::new();
        if (target - today).num_days().abs() > FORECAST_HORIZON_DAYS {
            debug!("Skipping weather for {}: outside forecast horizon", target);
            return results;
        }

        let mut grouped: Vec<(&str, Vec<&RegionSource>)> = Vec::new();
        for source in sources.iter().filter(|s| !s.forecast_city.is_empty()) {
            match grouped.iter_mut().find(|(code, _)| *code == source.forecast_city) {
                Some((_, members)) => members.push(source),
                None => grouped.push((source.forecast_city.as_str(), vec![source])),
            }
        }

        let observations = join_all(grouped.iter().map(|(code, _)| self.observation(code, target))).await;

        for ((_, members), observation) in grouped.iter().zip(observations) {
            let Some(record) = observation else {
                continue;
            };
            for source in members {
                results.insert(source.forecast_city.clone(), record.clone());
                if let Some(city) = source.city_code.as_ref().filter(|c| !c.is_empty()) {
                    results.insert(city.clone(), record.clone());
                }
                results.insert(source.id.clone(), record.clone());
            }
        }
        results
    }

    /// Observation for one forecast code: a fresh cache hit, else a fetch,
    /// else whatever was cached last.
    async fn observation(&self, code: &str, target: NaiveDate) -> Option<WeatherRecord> {
        let fresh = self
            .cache
            .get(code)
            .filter(|c| c.captured.elapsed() < self.ttl)
            .map(|c| c.record.clone());
        if fresh.is_some() {
            return fresh;
        }

        let parsed = match self.feed.fetch_forecast(code).await {
            Ok(body) => parse_forecast(&body, target),
            Err(e) => Err(e),
        };

        match parsed {
            Ok(Some(record)) => {
                self.cache.insert(
                    code.to_string(),
                    CachedObservation {
                        captured: Instant::now(),
                        record: record.clone(),
                    },
                );
                Some(record)
            }
            Ok(None) => {
                debug!("Forecast for {} held no entries", code);
                self.last_known(code)
            }
            Err(e) => {
                debug!("Failed to refresh weather for {}: {}", code, e);
                self.last_known(code)
            }
        }
    }

    fn last_known(&self, code: &str) -> Option<WeatherRecord> {
        self.cache.get(code).map(|c| c.record.clone())
    }

    /// Drops every cached observation.
    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
