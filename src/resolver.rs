//! Tiered source resolution for one calendar date.
//!
//! For a date key the resolver walks, in order:
//!
//! 1. memory            (skipped on forced refresh)
//! 2. disk aggregate    (skipped on forced refresh)
//! 3. live feed         (every source with a city code, concurrently, each
//!                       over its own lookback window)
//! 4. static baseline   (sources with a bundled baseline file)
//! 5. disk aggregate    (retried when step 2 failed or was skipped)
//! 6. nearest other date on disk, within the stale window
//! 7. empty
//!
//! Nothing here returns an error to the caller. Upstream and disk failures
//! are logged and the tier counts as a miss; exhausting every tier yields
//! an empty record, which is cached like any other.

use dashmap::DashMap;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::cache::{DailyCacheStore, MemoryCache};
use crate::config::{MEMORY_MAX_ENTRIES, STALE_WINDOW_DAYS, ServiceConfig};
use crate::ingest::baseline::StaticBaseline;
use crate::ingest::pollen::{PollenFeed, lookback_window, parse_csv, select_row};
use crate::model::{CacheRecord, DailyEntry, DateKey, Provenance, Resolution};
use crate::regions::{RegionRegistry, RegionSource};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverSettings {
    /// Days before the requested date to try on the live feed.
    pub lookback_days: u32,
    pub live_fetch_enabled: bool,
    pub stale_window_days: i64,
    pub memory_max_entries: usize,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            lookback_days: 7,
            live_fetch_enabled: true,
            stale_window_days: STALE_WINDOW_DAYS,
            memory_max_entries: MEMORY_MAX_ENTRIES,
        }
    }
}

impl From<&ServiceConfig> for ResolverSettings {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            lookback_days: config.lookback_days,
            live_fetch_enabled: !config.disable_live_fetch,
            ..Self::default()
        }
    }
}

/// A date's record and the tier that produced it.
#[derive(Debug, Clone)]
pub struct ResolvedDate {
    pub record: Arc<CacheRecord>,
    pub resolution: Resolution,
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

pub struct SourceResolver {
    registry: Arc<RegionRegistry>,
    feed: Arc<dyn PollenFeed>,
    baseline: Arc<StaticBaseline>,
    store: DailyCacheStore,
    settings: ResolverSettings,
    memory: Mutex<MemoryCache>,
    date_locks: DashMap<DateKey, Arc<tokio::sync::Mutex<()>>>,
}

impl SourceResolver {
    pub fn new(
        registry: Arc<RegionRegistry>,
        feed: Arc<dyn PollenFeed>,
        baseline: Arc<StaticBaseline>,
        store: DailyCacheStore,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            registry,
            feed,
            baseline,
            store,
            memory: Mutex::new(MemoryCache::new(settings.memory_max_entries)),
            settings,
            date_locks: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &RegionRegistry {
        &self.registry
    }

    pub fn store(&self) -> &DailyCacheStore {
        &self.store
    }

    pub fn settings(&self) -> ResolverSettings {
        self.settings
    }

    fn memory(&self) -> MutexGuard<'_, MemoryCache> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Entries for the requested aliases on `date`. Aliases with no data
    /// in any tier are absent from the result.
    pub async fn resolve<I, S>(&self, aliases: I, date: DateKey, force_refresh: bool) -> HashMap<String, Arc<DailyEntry>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let resolved = self.resolve_date(date, force_refresh).await;
        aliases
            .into_iter()
            .filter_map(|alias| {
                let alias = alias.as_ref();
                resolved
                    .record
                    .get(alias)
                    .map(|entry| (alias.to_string(), Arc::clone(entry)))
            })
            .collect()
    }

    /// Resolves the full alias map for `date`.
    pub async fn resolve_date(&self, date: DateKey, force_refresh: bool) -> ResolvedDate {
        let cached = if force_refresh { None } else { self.memory().get(date) };
        if let Some(record) = cached {
            return ResolvedDate {
                record,
                resolution: Resolution::MemoryHit,
            };
        }

        let lock = self.date_locks.entry(date).or_default().value().clone();
        let guard = lock.lock().await;

        // Another task may have finished this date while we waited.
        let cached = if force_refresh { None } else { self.memory().get(date) };
        let resolved = match cached {
            Some(record) => ResolvedDate {
                record,
                resolution: Resolution::MemoryHit,
            },
            None => {
                let resolved = self.resolve_tiers(date, force_refresh).await;
                self.memory().insert(Arc::clone(&resolved.record));
                resolved
            }
        };

        drop(guard);
        drop(lock);
        self.date_locks.remove_if(&date, |_, l| Arc::strong_count(l) == 1);
        resolved
    }

    async fn resolve_tiers(&self, date: DateKey, force_refresh: bool) -> ResolvedDate {
        let mut disk_read_failed = false;

        if !force_refresh {
            match self.store.read(date).await {
                Ok(Some(entries)) if !entries.is_empty() => {
                    debug!("Pollen cache hit on disk for {}", date);
                    return self.build(date, date, entries, Resolution::DiskHit);
                }
                Ok(Some(_)) => debug!("Pollen cache for {} is empty", date),
                Ok(None) => {}
                Err(e) => {
                    warn!("Failed to read pollen cache for {}: {}", date, e);
                    disk_read_failed = true;
                }
            }
        }

        if self.settings.live_fetch_enabled {
            let live = self.fetch_live(date).await;
            if !live.is_empty() {
                info!("Fetched live pollen data for {} ({} sources)", date, live.len());
                match self.store.write(date, &live).await {
                    Ok(()) => {
                        if let Err(e) = self.store.clear_raw(date).await {
                            debug!("Failed to clear raw captures for {}: {}", date, e);
                        }
                    }
                    Err(e) => warn!("Failed to persist pollen cache for {}: {}", date, e),
                }
                return self.build(date, date, live, Resolution::LiveFetched);
            }
        }

        let statics = self.baseline.static_entries(&self.registry, date);
        if !statics.is_empty() {
            info!("Using static pollen samples for {}", date);
            if !self.store.exists(date).await {
                if let Err(e) = self.store.write(date, &statics).await {
                    warn!("Failed to persist static pollen cache for {}: {}", date, e);
                }
            }
            return self.build(date, date, statics, Resolution::StaticFallback);
        }

        if (disk_read_failed || force_refresh) && self.store.exists(date).await {
            match self.store.read(date).await {
                Ok(Some(entries)) if !entries.is_empty() => {
                    info!("Reusing previously cached pollen data for {}", date);
                    return self.build(date, date, entries, Resolution::DiskHit);
                }
                Ok(_) => {}
                Err(e) => warn!("Failed to reload cached pollen data for {}: {}", date, e),
            }
        }

        match self.store.nearest(date, self.settings.stale_window_days).await {
            Ok(Some((found, entries))) => {
                info!("Using pollen cache from {} as fallback for {}", found, date);
                let entries = entries
                    .into_iter()
                    .map(|mut e| {
                        e.provenance = Provenance::Stale;
                        e
                    })
                    .collect();
                return self.build(date, found, entries, Resolution::StaleFallback);
            }
            Ok(None) => {}
            Err(e) => warn!("Stale cache scan failed for {}: {}", date, e),
        }

        warn!("No pollen data available for {}", date);
        ResolvedDate {
            record: Arc::new(CacheRecord::empty(date)),
            resolution: Resolution::Empty,
        }
    }

    /// Indexes `entries` by citycode and by every alias of the source each
    /// belongs to. Aliases share the entry's `Arc`.
    fn build(&self, date: DateKey, source_key: DateKey, entries: Vec<DailyEntry>, resolution: Resolution) -> ResolvedDate {
        let provenance = Provenance::summarize(&entries);

        let mut map: HashMap<String, Arc<DailyEntry>> = HashMap::new();
        for entry in entries {
            if entry.citycode.is_empty() {
                continue;
            }
            map.insert(entry.citycode.clone(), Arc::new(entry));
        }

        for source in self.registry.iter() {
            let Some(entry) = map.get(source.primary_code()).cloned() else {
                continue;
            };
            for alias in source.aliases() {
                if !alias.is_empty() {
                    map.entry(alias.to_string()).or_insert_with(|| Arc::clone(&entry));
                }
            }
        }

        ResolvedDate {
            record: Arc::new(CacheRecord {
                date,
                source_key,
                provenance,
                entries: map,
            }),
            resolution,
        }
    }

    /// Fetches every source with a city code concurrently.
    async fn fetch_live(&self, date: DateKey) -> Vec<DailyEntry> {
        let window = lookback_window(date, self.settings.lookback_days);
        let fetches = self.registry.iter().filter_map(|source| {
            let code = source.city_code.as_deref().filter(|c| !c.is_empty())?;
            Some(self.fetch_source(source, code, date, &window))
        });
        join_all(fetches).await.into_iter().flatten().collect()
    }

    /// Walks the lookback window for one source until a day yields a
    /// usable reading. Every failure is a skip to the next day.
    async fn fetch_source(
        &self,
        source: &RegionSource,
        code: &str,
        request_date: DateKey,
        window: &[DateKey],
    ) -> Option<DailyEntry> {
        for &day in window {
            let body = match self.feed.fetch_csv(code, day).await {
                Ok(Some(body)) => body,
                Ok(None) => {
                    debug!("No pollen data for {} on {}", code, day);
                    continue;
                }
                Err(e) => {
                    warn!("Failed to download pollen CSV for {} ({}): {}", code, day, e);
                    continue;
                }
            };

            let rows = match parse_csv(&body) {
                Ok(rows) => rows,
                Err(e) => {
                    warn!("Unreadable pollen CSV for {} ({}): {}", code, day, e);
                    continue;
                }
            };

            let Some(mut entry) = select_row(rows, code).and_then(|row| row.into_entry(code, day)) else {
                debug!("Pollen CSV for {} ({}) contained no usable reading", code, day);
                continue;
            };
            entry.region_id = Some(source.id.clone());

            if let Err(e) = self.store.write_raw(request_date, code, "csv", &body).await {
                debug!("Failed to persist raw pollen CSV for {} on {}: {}", code, request_date, e);
            }
            return Some(entry);
        }
        None
    }

    /// Persists every date in `[start, end]`. Afterwards memory holds only
    /// the dates in `keep_dates` (nothing when it is empty).
    pub async fn prefetch_range(&self, start: DateKey, end: DateKey, keep_dates: &[DateKey], force_refresh: bool) {
        if end < start {
            return;
        }
        let keep: HashSet<DateKey> = keep_dates.iter().copied().collect();

        let mut day = start;
        while day <= end {
            let resolved = self.resolve_date(day, force_refresh).await;
            debug!("Prefetched {} ({:?})", day, resolved.resolution);
            if !keep.contains(&day) {
                self.memory().remove(day);
            }
            day = day.offset_days(1);
        }

        self.memory().retain(|d| keep.contains(&d));
        info!("Prefetched pollen cache for {} through {}", start, end);
    }

    /// Resolves `today` and the preceding `days` dates. Afterwards memory
    /// retains only today.
    pub async fn prefetch_history(&self, days: u32, today: DateKey, force_refresh: bool) {
        let mut today_record = None;
        for offset in 0..=i64::from(days) {
            let day = today.offset_days(-offset);
            let resolved = self.resolve_date(day, force_refresh).await;
            if day == today {
                today_record = Some(resolved.record);
            } else {
                self.memory().remove(day);
            }
        }

        let mut memory = self.memory();
        memory.clear();
        if let Some(record) = today_record {
            memory.insert(record);
        }
        info!("Warmed pollen cache for the {} days before {}", days, today);
    }

    /// Drops `date` from memory. Returns whether it was cached.
    pub fn evict(&self, date: DateKey) -> bool {
        self.memory().remove(date).is_some()
    }

    pub fn clear_memory(&self) {
        self.memory().clear();
    }

    pub fn memory_len(&self) -> usize {
        self.memory().len()
    }

    /// Dates currently held in memory, oldest first.
    pub fn memory_dates(&self) -> Vec<DateKey> {
        self.memory().dates()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
