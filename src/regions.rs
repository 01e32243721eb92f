//! Region registry for the pollen service.
//!
//! Maps each region id to the alias keys the upstream feeds know it by:
//! the weather station (AMeDAS) code, the forecast area code, the pollen
//! station code and the administrative city code. This is the single
//! source of truth for those codes; other modules look regions up here
//! rather than hardcoding them.
//!
//! The registry is loaded once at startup from an optional TOML region
//! list. When that file is absent or unusable the built-in set is used.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::config::ConfigError;

// ---------------------------------------------------------------------------
// Region metadata
// ---------------------------------------------------------------------------

/// One monitored region and its upstream alias keys.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionSource {
    pub id: String,
    /// Display name.
    pub name: String,
    /// Administrative area.
    pub prefecture: String,
    /// WGS84 latitude.
    pub latitude: f64,
    /// WGS84 longitude.
    pub longitude: f64,
    /// Surface weather station code.
    pub amedas_station: String,
    /// Forecast area code used by the weather API.
    pub forecast_city: String,
    /// Station code used by the static baseline bundle.
    pub pollen_station: String,
    /// Administrative city code used by the live pollen feed.
    pub city_code: Option<String>,
}

impl RegionSource {
    /// Identifier this region's entries are stored under in a date file.
    pub fn primary_code(&self) -> &str {
        self.city_code
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or(&self.pollen_station)
    }

    /// Secondary keys that should resolve to the same entry as the primary code.
    pub fn aliases(&self) -> [&str; 4] {
        [
            &self.pollen_station,
            &self.forecast_city,
            &self.amedas_station,
            &self.id,
        ]
    }

    /// Keys tried, in order, when looking up a resolved entry for this region.
    pub fn lookup_keys(&self) -> Vec<&str> {
        let mut keys = Vec::with_capacity(5);
        if let Some(code) = self.city_code.as_deref() {
            keys.push(code);
        }
        keys.extend([
            self.forecast_city.as_str(),
            self.pollen_station.as_str(),
            self.amedas_station.as_str(),
            self.id.as_str(),
        ]);
        keys
    }
}

/// Compile-time region definition for the built-in set.
struct BuiltinRegion {
    id: &'static str,
    name: &'static str,
    prefecture: &'static str,
    latitude: f64,
    longitude: f64,
    amedas_station: &'static str,
    forecast_city: &'static str,
    pollen_station: &'static str,
    city_code: &'static str,
}

impl From<&BuiltinRegion> for RegionSource {
    fn from(r: &BuiltinRegion) -> Self {
        RegionSource {
            id: r.id.to_string(),
            name: r.name.to_string(),
            prefecture: r.prefecture.to_string(),
            latitude: r.latitude,
            longitude: r.longitude,
            amedas_station: r.amedas_station.to_string(),
            forecast_city: r.forecast_city.to_string(),
            pollen_station: r.pollen_station.to_string(),
            city_code: Some(r.city_code.to_string()),
        }
    }
}

/// Regions served when no external list is configured.
static BUILTIN_REGIONS: &[BuiltinRegion] = &[
    BuiltinRegion {
        id: "tokyo",
        name: "東京",
        prefecture: "東京都",
        latitude: 35.6762,
        longitude: 139.6503,
        amedas_station: "44132",
        forecast_city: "130010",
        pollen_station: "441321000",
        city_code: "13101",
    },
    BuiltinRegion {
        id: "osaka",
        name: "大阪",
        prefecture: "大阪府",
        latitude: 34.6937,
        longitude: 135.5023,
        amedas_station: "62078",
        forecast_city: "270000",
        pollen_station: "620780000",
        city_code: "27128",
    },
    BuiltinRegion {
        id: "kyoto",
        name: "京都",
        prefecture: "京都府",
        latitude: 35.0116,
        longitude: 135.7681,
        amedas_station: "61286",
        forecast_city: "260010",
        pollen_station: "612860000",
        city_code: "26104",
    },
    BuiltinRegion {
        id: "nagoya",
        name: "名古屋",
        prefecture: "愛知県",
        latitude: 35.1815,
        longitude: 136.9066,
        amedas_station: "51106",
        forecast_city: "230010",
        pollen_station: "511060000",
        city_code: "23106",
    },
    BuiltinRegion {
        id: "fukuoka",
        name: "福岡",
        prefecture: "福岡県",
        latitude: 33.5904,
        longitude: 130.4017,
        amedas_station: "82182",
        forecast_city: "400010",
        pollen_station: "821820000",
        city_code: "40133",
    },
    BuiltinRegion {
        id: "sapporo",
        name: "札幌",
        prefecture: "北海道",
        latitude: 43.0642,
        longitude: 141.3469,
        amedas_station: "47412",
        forecast_city: "016000",
        pollen_station: "474120000",
        city_code: "01101",
    },
    BuiltinRegion {
        id: "sendai",
        name: "仙台",
        prefecture: "宮城県",
        latitude: 38.2682,
        longitude: 140.8694,
        amedas_station: "54202",
        forecast_city: "040010",
        pollen_station: "542020000",
        city_code: "04101",
    },
    BuiltinRegion {
        id: "hiroshima",
        name: "広島",
        prefecture: "広島県",
        latitude: 34.3853,
        longitude: 132.4553,
        amedas_station: "67437",
        forecast_city: "340010",
        pollen_station: "674370000",
        city_code: "34101",
    },
];

// ---------------------------------------------------------------------------
// External region list
// ---------------------------------------------------------------------------

/// One `[[region]]` table. Everything is optional so that a single bad
/// entry can be skipped without rejecting the whole file.
#[derive(Debug, Deserialize)]
struct RegionEntry {
    id: Option<String>,
    name: Option<String>,
    prefecture: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    #[serde(alias = "amedasStation")]
    amedas_station: Option<String>,
    #[serde(alias = "forecastCity")]
    forecast_city: Option<String>,
    #[serde(alias = "pollenStation")]
    pollen_station: Option<String>,
    #[serde(alias = "cityCode")]
    city_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RegionList {
    #[serde(default)]
    region: Vec<RegionEntry>,
}

impl RegionEntry {
    fn into_source(self) -> Option<RegionSource> {
        let id = self.id.filter(|s| !s.trim().is_empty())?;
        let name = self.name.clone().or_else(|| self.prefecture.clone())?;
        let prefecture = self.prefecture.unwrap_or_else(|| name.clone());
        let or_id = |code: Option<String>| code.filter(|c| !c.is_empty()).unwrap_or_else(|| id.clone());

        Some(RegionSource {
            amedas_station: or_id(self.amedas_station),
            forecast_city: or_id(self.forecast_city),
            pollen_station: or_id(self.pollen_station),
            city_code: self.city_code.filter(|c| !c.is_empty()),
            latitude: self.latitude.unwrap_or(0.0),
            longitude: self.longitude.unwrap_or(0.0),
            name,
            prefecture,
            id,
        })
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Immutable, ordered set of regions.
#[derive(Debug, Clone)]
pub struct RegionRegistry {
    regions: Vec<RegionSource>,
}

impl RegionRegistry {
    /// The built-in region set.
    pub fn builtin() -> Self {
        Self::from_regions(BUILTIN_REGIONS.iter().map(RegionSource::from).collect())
    }

    /// Builds a registry; a later entry with a duplicate id replaces the
    /// earlier one in place.
    pub fn from_regions(regions: Vec<RegionSource>) -> Self {
        let mut deduped: Vec<RegionSource> = Vec::with_capacity(regions.len());
        for region in regions {
            match deduped.iter_mut().find(|r| r.id == region.id) {
                Some(existing) => *existing = region,
                None => deduped.push(region),
            }
        }
        Self { regions: deduped }
    }

    /// Parses a TOML region list. Entries missing `id` (or both name and
    /// prefecture) are skipped with a warning; a list with no usable
    /// entries is an error.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let list: RegionList =
            toml::from_str(contents).map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let mut regions = Vec::new();
        for (index, entry) in list.region.into_iter().enumerate() {
            match entry.into_source() {
                Some(source) => regions.push(source),
                None => warn!("Region entry #{} missing required field; skipped", index),
            }
        }

        if regions.is_empty() {
            return Err(ConfigError::Invalid("region list contained no usable entries".into()));
        }
        Ok(Self::from_regions(regions))
    }

    /// Loads the registry from `path`, falling back to the built-in set
    /// when no path is given or the file cannot be used.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            info!("Using built-in region set ({} regions)", BUILTIN_REGIONS.len());
            return Self::builtin();
        };

        let loaded = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
            .and_then(|contents| Self::from_toml_str(&contents));

        match loaded {
            Ok(registry) => {
                info!("Loaded {} regions from {}", registry.len(), path.display());
                registry
            }
            Err(e) => {
                warn!("Region list {} unusable ({}); using built-in set", path.display(), e);
                Self::builtin()
            }
        }
    }

    /// Looks up a region by id. Returns `None` if not found.
    pub fn get(&self, id: &str) -> Option<&RegionSource> {
        self.regions.iter().find(|r| r.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegionSource> {
        self.regions.iter()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Resolves requested ids to sources in request order, dropping unknown
    /// ids and anything not matching `filter`.
    pub fn resolve_ids(&self, ids: &[String], filter: Option<&str>) -> Vec<RegionSource> {
        ids.iter()
            .filter(|id| filter.is_none_or(|f| f == id.as_str()))
            .filter_map(|id| self.get(id).cloned())
            .collect()
    }
}

impl Default for RegionRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
