//! Top-level service: region records for a date, cache refresh and warm-up.
//!
//! Wires the registry, resolver, weather side channel and assembler
//! together. Every public operation here is infallible from the caller's
//! point of view; degraded upstreams show up as older or placeholder data,
//! never as an error.

use chrono::{Local, NaiveDate, NaiveDateTime};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::cache::{DailyCacheStore, PruneReport};
use crate::config::ServiceConfig;
use crate::ingest::baseline::StaticBaseline;
use crate::ingest::forecast::{ForecastFeed, HttpForecastFeed};
use crate::ingest::pollen::{HttpPollenFeed, PollenFeed};
use crate::model::{DateKey, FetchError};
use crate::payload::{PayloadAssembler, RegionPayload};
use crate::regions::RegionRegistry;
use crate::resolver::{ResolverSettings, SourceResolver};
use crate::weather::WeatherSideChannel;

pub struct PollenService {
    config: ServiceConfig,
    registry: Arc<RegionRegistry>,
    resolver: SourceResolver,
    weather: WeatherSideChannel,
    assembler: PayloadAssembler,
}

impl PollenService {
    /// Builds the service from explicit collaborators.
    pub fn new(
        config: ServiceConfig,
        registry: Arc<RegionRegistry>,
        baseline: Arc<StaticBaseline>,
        pollen_feed: Arc<dyn PollenFeed>,
        forecast_feed: Arc<dyn ForecastFeed>,
    ) -> Self {
        let resolver = SourceResolver::new(
            Arc::clone(&registry),
            pollen_feed,
            Arc::clone(&baseline),
            DailyCacheStore::new(config.cache_dir.clone()),
            ResolverSettings::from(&config),
        );
        let weather = WeatherSideChannel::new(
            forecast_feed,
            Duration::from_secs(config.weather_cache_ttl_seconds),
        );

        Self {
            config,
            registry,
            resolver,
            weather,
            assembler: PayloadAssembler::new(baseline),
        }
    }

    /// Builds the service against the real upstream endpoints, loading the
    /// region list and static bundle named by `config`.
    ///
    /// # Errors
    /// - `FetchError::Transport` — the HTTP client could not be constructed.
    pub async fn from_config(config: ServiceConfig) -> Result<Self, FetchError> {
        let timeout = Duration::from_secs(config.http_timeout_seconds);
        let pollen_feed = HttpPollenFeed::new(&config.pollen_api_url, &config.user_agent, timeout)?;
        let forecast_feed = HttpForecastFeed::new(&config.weather_api_url, &config.user_agent, timeout)?;

        let registry = Arc::new(RegionRegistry::load(config.regions_file.as_deref()));
        let baseline = Arc::new(StaticBaseline::load(&config.static_dir, &config.sample_file, &registry).await);

        if config.disable_live_fetch {
            info!("Live pollen fetch disabled; serving cached and static data only");
        }

        Ok(Self::new(
            config,
            registry,
            baseline,
            Arc::new(pollen_feed),
            Arc::new(forecast_feed),
        ))
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn registry(&self) -> &RegionRegistry {
        &self.registry
    }

    pub fn resolver(&self) -> &SourceResolver {
        &self.resolver
    }

    pub fn weather(&self) -> &WeatherSideChannel {
        &self.weather
    }

    /// Records for `region_ids` on `target_date` (today when `None`), in
    /// request order. Unknown ids, and ids not matching `region_filter`,
    /// are skipped.
    pub async fn fetch_regions(
        &self,
        region_ids: &[String],
        region_filter: Option<&str>,
        target_date: Option<NaiveDate>,
        force_refresh: bool,
    ) -> Vec<RegionPayload> {
        self.fetch_regions_at(region_ids, region_filter, target_date, force_refresh, Local::now().naive_local())
            .await
    }

    /// `fetch_regions` with an explicit reference instant.
    pub async fn fetch_regions_at(
        &self,
        region_ids: &[String],
        region_filter: Option<&str>,
        target_date: Option<NaiveDate>,
        force_refresh: bool,
        now: NaiveDateTime,
    ) -> Vec<RegionPayload> {
        let sources = self.registry.resolve_ids(region_ids, region_filter);
        if sources.is_empty() {
            return Vec::new();
        }

        let date = target_date.unwrap_or(now.date());
        let resolved = self.resolver.resolve_date(DateKey::new(date), force_refresh).await;
        let weather = self.weather.lookup(&sources, date, now.date()).await;

        sources
            .iter()
            .map(|source| {
                self.assembler
                    .assemble(source, &resolved.record, &weather, target_date, now)
            })
            .collect()
    }

    /// Records for every registered region, in registry order.
    pub async fn fetch_all(
        &self,
        region_filter: Option<&str>,
        target_date: Option<NaiveDate>,
        force_refresh: bool,
    ) -> Vec<RegionPayload> {
        self.fetch_all_at(region_filter, target_date, force_refresh, Local::now().naive_local())
            .await
    }

    /// `fetch_all` with an explicit reference instant.
    pub async fn fetch_all_at(
        &self,
        region_filter: Option<&str>,
        target_date: Option<NaiveDate>,
        force_refresh: bool,
        now: NaiveDateTime,
    ) -> Vec<RegionPayload> {
        let ids: Vec<String> = self.registry.iter().map(|r| r.id.clone()).collect();
        self.fetch_regions_at(&ids, region_filter, target_date, force_refresh, now)
            .await
    }

    /// Re-resolves `today` from upstream and applies disk retention.
    ///
    /// Drops today's memory record and every cached weather observation
    /// first, so the next `fetch_regions` sees fresh data.
    pub async fn refresh_cache(&self, today: DateKey) -> PruneReport {
        self.resolver.evict(today);
        self.weather.clear();

        let resolved = self.resolver.resolve_date(today, true).await;
        info!("Refreshed pollen cache for {} ({:?})", today, resolved.resolution);

        match self
            .resolver
            .store()
            .prune_older_than(self.config.effective_retention_days(), today)
            .await
        {
            Ok(report) => report,
            Err(e) => {
                warn!("Cache retention pass failed: {}", e);
                PruneReport::default()
            }
        }
    }

    /// Warms today and the preceding `days` dates; memory keeps only today.
    pub async fn prefetch_history(&self, days: u32, force_refresh: bool) {
        self.resolver
            .prefetch_history(days, DateKey::today(), force_refresh)
            .await;
    }

    /// Persists every date in `[start, end]`; memory keeps only `keep_dates`.
    pub async fn prefetch_range(&self, start: DateKey, end: DateKey, keep_dates: &[DateKey], force_refresh: bool) {
        self.resolver
            .prefetch_range(start, end, keep_dates, force_refresh)
            .await;
    }
}
