//! Service configuration loader - parses pollen.toml and environment overrides
//!
//! Separates paths, upstream endpoints and cache tuning from code, so the
//! service can be pointed at a different cache directory or feed without
//! recompiling. Loading is never fatal: a missing or malformed file is
//! logged and the built-in defaults are used.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Upper bound on date records held in memory (roughly one year).
pub const MEMORY_MAX_ENTRIES: usize = 370;

/// Furthest distance, in days, the stale-fallback scan will look.
pub const STALE_WINDOW_DAYS: i64 = 365;

/// Disk retention never drops below one year.
pub const MIN_RETENTION_DAYS: i64 = 365;

/// Environment variable naming an alternate config file.
pub const CONFIG_PATH_ENV: &str = "POLLEN_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "pollen.toml";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Problems with configuration inputs (config file, region list, static bundle).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("{0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Runtime configuration for the pollen service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Root directory for `pollen_<YYYYMMDD>.json` files and `raw/` captures.
    pub cache_dir: PathBuf,
    /// Directory holding the bundled `<pollenStation>.json` baselines.
    pub static_dir: PathBuf,
    /// Optional snapshot of pre-assembled region records.
    pub sample_file: PathBuf,
    /// Optional external region list; the built-in set is used when absent.
    pub regions_file: Option<PathBuf>,

    pub pollen_api_url: String,
    pub weather_api_url: String,
    pub user_agent: String,
    pub http_timeout_seconds: u64,

    pub weather_cache_ttl_seconds: u64,
    pub disable_live_fetch: bool,
    /// Extra days before the requested date to try on the pollen feed.
    pub lookback_days: u32,
    pub retention_days: i64,

    /// Daemon: days of history to warm on startup.
    pub warm_cache_days: u32,
    /// Daemon: width of the selectable date range to persist on startup (0 = off).
    pub prefetch_range_days: u32,
    pub refresh_interval_minutes: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("cache"),
            static_dir: PathBuf::from("static/pollen"),
            sample_file: PathBuf::from("static/sample_regions.json"),
            regions_file: None,
            pollen_api_url: "https://wxtech.weathernews.com/opendata/v1/pollen".to_string(),
            weather_api_url: "https://weather.tsukumijima.net/api/forecast".to_string(),
            user_agent: "pollen_service/0.1".to_string(),
            http_timeout_seconds: 10,
            weather_cache_ttl_seconds: 1800,
            disable_live_fetch: false,
            lookback_days: 7,
            retention_days: MIN_RETENTION_DAYS,
            warm_cache_days: 1,
            prefetch_range_days: 0,
            refresh_interval_minutes: 60,
        }
    }
}

impl ServiceConfig {
    /// Parses a TOML document. Fields not present keep their defaults.
    pub fn from_toml_str(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Reads a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents, path)
    }

    /// Loads configuration: defaults, then the TOML file (explicit path,
    /// `$POLLEN_CONFIG`, or `pollen.toml` if present), then environment
    /// overrides. Never fails.
    pub fn load(explicit: Option<&Path>) -> Self {
        dotenv::dotenv().ok();

        let env_path = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        let path = explicit.map(Path::to_path_buf).or(env_path);

        let mut config = match path {
            Some(path) => match Self::from_file(&path) {
                Ok(config) => {
                    info!("Loaded configuration from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("{}; using default configuration", e);
                    Self::default()
                }
            },
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Self::from_file(default_path).unwrap_or_else(|e| {
                        warn!("{}; using default configuration", e);
                        Self::default()
                    })
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Applies environment overrides through `lookup`. Unparsable values
    /// are logged and ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("POLLEN_CACHE_DIR") {
            self.cache_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("POLLEN_API_STATIC_DIR") {
            self.static_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("REALTIME_SAMPLE_FILE") {
            self.sample_file = PathBuf::from(v);
        }
        if let Some(v) = lookup("POLLEN_REGIONS_FILE") {
            self.regions_file = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("WEATHERNEWS_POLLEN_URL") {
            self.pollen_api_url = v;
        }
        if let Some(v) = lookup("TSUKUMIJIMA_FORECAST_URL") {
            self.weather_api_url = v;
        }
        if let Some(v) = lookup("POLLEN_USER_AGENT") {
            self.user_agent = v;
        }
        if let Some(v) = lookup("POLLEN_DISABLE_LIVE_FETCH") {
            self.disable_live_fetch = parse_flag(&v);
        }

        override_number(&lookup, "POLLEN_HTTP_TIMEOUT_SECONDS", &mut self.http_timeout_seconds);
        override_number(&lookup, "WEATHER_CACHE_TTL_SECONDS", &mut self.weather_cache_ttl_seconds);
        override_number(&lookup, "POLLEN_API_LOOKBACK_DAYS", &mut self.lookback_days);
        override_number(&lookup, "POLLEN_CACHE_RETENTION_DAYS", &mut self.retention_days);
        override_number(&lookup, "POLLEN_WARM_CACHE_DAYS", &mut self.warm_cache_days);
        override_number(&lookup, "POLLEN_PREFETCH_RANGE_DAYS", &mut self.prefetch_range_days);
        override_number(&lookup, "POLLEN_REFRESH_INTERVAL_MINUTES", &mut self.refresh_interval_minutes);
    }

    /// Retention in days, raised to the one-year floor.
    pub fn effective_retention_days(&self) -> i64 {
        self.retention_days.max(MIN_RETENTION_DAYS)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes")
}

fn override_number<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(_) => warn!("Ignoring {}={:?}: not a valid number", key, raw),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
