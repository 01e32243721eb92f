//! Long-running driver for the pollen service.
//!
//! On startup the daemon:
//! 1. Warms the trailing `warm_cache_days` dates (memory keeps only today)
//! 2. Optionally persists a selectable date range to disk
//!
//! It then loops forever, re-resolving today from upstream and applying
//! disk retention every `refresh_interval_minutes`. Nothing in the chain
//! returns an error, so a bad pass is simply logged and the next one runs
//! on schedule.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use crate::config::ServiceConfig;
use crate::model::DateKey;
use crate::service::PollenService;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Daemon configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    /// How often to refresh today's data (default: 60 minutes)
    pub refresh_interval_minutes: u64,

    /// How many past days to warm on startup (default: 1)
    pub warm_cache_days: u32,

    /// Width of the date range persisted on startup (default: 0, disabled)
    pub prefetch_range_days: u32,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            refresh_interval_minutes: 60,
            warm_cache_days: 1,
            prefetch_range_days: 0,
        }
    }
}

impl From<&ServiceConfig> for DaemonConfig {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            refresh_interval_minutes: config.refresh_interval_minutes,
            warm_cache_days: config.warm_cache_days,
            prefetch_range_days: config.prefetch_range_days,
        }
    }
}

// ---------------------------------------------------------------------------
// Daemon State
// ---------------------------------------------------------------------------

pub struct Daemon {
    config: DaemonConfig,
    service: Arc<PollenService>,
}

impl Daemon {
    /// Create a daemon with default configuration
    pub fn new(service: Arc<PollenService>) -> Self {
        Self::with_config(service, DaemonConfig::default())
    }

    /// Create daemon with custom configuration
    pub fn with_config(service: Arc<PollenService>, config: DaemonConfig) -> Self {
        Self { config, service }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Startup warm-up relative to `today`.
    pub async fn warm_up(&self, today: DateKey) {
        self.service
            .resolver()
            .prefetch_history(self.config.warm_cache_days, today, false)
            .await;

        if self.config.prefetch_range_days > 0 {
            let start = today.offset_days(-i64::from(self.config.prefetch_range_days));
            self.service.prefetch_range(start, today, &[today], false).await;
        }
    }

    /// One scheduled pass: refresh today and prune.
    pub async fn refresh_pass(&self, today: DateKey) {
        let report = self.service.refresh_cache(today).await;
        info!(
            "Refresh complete for {}: {} dates in memory, pruned {} files",
            today,
            self.service.resolver().memory_len(),
            report.files_removed
        );
    }

    /// Main daemon loop (runs indefinitely)
    pub async fn run(&self) {
        info!("Starting pollen daemon");
        info!("   Refresh interval: {} minutes", self.config.refresh_interval_minutes);
        info!("   Serving {} regions", self.service.registry().len());

        self.warm_up(DateKey::today()).await;

        let interval = Duration::from_secs(self.config.refresh_interval_minutes.max(1) * 60);
        let mut last_pass = Duration::ZERO;
        loop {
            // Sleep until next refresh interval
            tokio::time::sleep(interval.saturating_sub(last_pass)).await;

            let start = Instant::now();
            self.refresh_pass(DateKey::today()).await;
            last_pass = start.elapsed();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
