//! pollen_service: multi-tier pollen and weather cache for Japanese regions.
//!
//! # Module structure
//!
//! ```text
//! pollen_service
//! ├── model       — shared data types (DateKey, DailyEntry, CacheRecord, FetchError, …)
//! ├── config      — service configuration (pollen.toml + POLLEN_* environment)
//! ├── regions     — region registry with upstream station codes (regions.toml)
//! ├── cache
//! │   ├── memory  — bounded per-date record table
//! │   └── store   — daily aggregate files, raw captures, retention
//! ├── ingest
//! │   ├── pollen   — pollen CSV API: URL construction + CSV parsing
//! │   ├── forecast — forecast JSON API: weather extraction
//! │   ├── baseline — bundled static pollen samples
//! │   └── fixtures (test only) — representative API response payloads
//! ├── resolver    — memory → disk → live → static → stale → empty
//! ├── weather     — short-TTL forecast side channel
//! ├── payload     — per-region record assembly and severity
//! ├── service     — top-level fetch / refresh / prefetch operations
//! └── daemon      — warm-up and periodic refresh loop
//! ```

pub mod cache;
pub mod config;
pub mod daemon;
pub mod ingest;
pub mod model;
pub mod payload;
pub mod regions;
pub mod resolver;
pub mod service;
pub mod weather;
