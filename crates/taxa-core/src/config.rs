//! Configuration types for taxa components.
//!
//! The sync configuration is a TOML file naming the output database, the
//! regions (groups of iNaturalist place IDs) and the root taxa to sync:
//!
//! ```toml
//! database = "flora.db"
//!
//! [regions.bay_area]
//! name = "San Francisco Bay Area"
//! place_ids = [5245, 5246]
//!
//! [taxa.asteraceae]
//! name = "Asteraceae"
//! taxon_id = 47604
//!
//! [filters]
//! quality_grade = "research"
//! ```
//!
//! Validation happens entirely in [`TaxaConfig::from_toml_str`], before any
//! remote call, and reports problems as `AppError::ConfigError`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::AppError;

/// Quality grades accepted by the iNaturalist observation endpoints.
pub const QUALITY_GRADES: [&str; 3] = ["research", "needs_id", "casual"];

/// Retry policy for remote calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// Delay before the retry following the 0-based `attempt`:
    /// `min(base_delay * 2^attempt, max_delay)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// HTTP client configuration for the iNaturalist API.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.inaturalist.org/v1/".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Sync pipeline tuning, read from the optional `[sync]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Taxon IDs per detail request.
    pub batch_size: usize,
    /// Regional discovery calls in flight at once.
    pub concurrency: usize,
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 30,
            concurrency: 1,
            max_attempts: 3,
            base_delay_secs: 1,
            max_delay_secs: 60,
        }
    }
}

impl SyncConfig {
    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_secs(self.base_delay_secs),
            max_delay: Duration::from_secs(self.max_delay_secs),
        }
    }
}

/// A named group of iNaturalist places.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionConfig {
    pub name: String,
    pub place_ids: Vec<i64>,
}

/// A root taxon to sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonConfig {
    pub name: String,
    pub taxon_id: i64,
}

/// Parsed and validated configuration.
#[derive(Debug, Clone)]
pub struct TaxaConfig {
    pub database: PathBuf,
    pub regions: BTreeMap<String, RegionConfig>,
    pub taxa: BTreeMap<String, TaxonConfig>,
    pub quality_grade: Option<String>,
    pub sync: SyncConfig,
}

#[derive(Deserialize)]
struct RawConfig {
    database: Option<String>,
    #[serde(default)]
    regions: BTreeMap<String, RawRegion>,
    #[serde(default)]
    taxa: BTreeMap<String, RawTaxon>,
    #[serde(default)]
    filters: RawFilters,
    #[serde(default)]
    sync: SyncConfig,
}

#[derive(Deserialize)]
struct RawRegion {
    name: Option<String>,
    place_ids: Option<Vec<i64>>,
}

#[derive(Deserialize)]
struct RawTaxon {
    name: Option<String>,
    taxon_id: Option<i64>,
}

#[derive(Deserialize, Default)]
struct RawFilters {
    quality_grade: Option<String>,
}

fn missing(kind: &str, key: &str, field: &str) -> AppError {
    AppError::ConfigError(format!("{} '{}' missing required field: {}", kind, key, field))
}

impl TaxaConfig {
    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::ConfigError(format!("Config file not found: {}", path.display()))
            } else {
                AppError::ConfigError(format!("Cannot read {}: {}", path.display(), e))
            }
        })?;

        Self::from_toml_str(&content)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, AppError> {
        let raw: RawConfig = toml::from_str(content)
            .map_err(|e| AppError::ConfigError(format!("Invalid TOML: {}", e)))?;

        let database = raw
            .database
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| AppError::ConfigError("Missing required field: database".into()))?;

        if raw.regions.is_empty() {
            return Err(AppError::ConfigError(
                "Missing required field: regions".into(),
            ));
        }

        if raw.taxa.is_empty() {
            return Err(AppError::ConfigError("Missing required field: taxa".into()));
        }

        let mut regions = BTreeMap::new();
        for (key, region) in raw.regions {
            let name = region
                .name
                .filter(|n| !n.trim().is_empty())
                .ok_or_else(|| missing("Region", &key, "name"))?;
            let place_ids = region
                .place_ids
                .ok_or_else(|| missing("Region", &key, "place_ids"))?;
            if place_ids.is_empty() {
                return Err(AppError::ConfigError(format!(
                    "Region '{}' place_ids must list at least one place",
                    key
                )));
            }
            regions.insert(key, RegionConfig { name, place_ids });
        }

        let mut taxa = BTreeMap::new();
        for (key, taxon) in raw.taxa {
            let name = taxon
                .name
                .filter(|n| !n.trim().is_empty())
                .ok_or_else(|| missing("Taxon", &key, "name"))?;
            let taxon_id = taxon
                .taxon_id
                .ok_or_else(|| missing("Taxon", &key, "taxon_id"))?;
            taxa.insert(key, TaxonConfig { name, taxon_id });
        }

        if let Some(grade) = raw.filters.quality_grade.as_deref() {
            if !QUALITY_GRADES.contains(&grade) {
                return Err(AppError::ConfigError(format!(
                    "Unknown quality_grade '{}': expected one of {}",
                    grade,
                    QUALITY_GRADES.join(", ")
                )));
            }
        }

        let sync = raw.sync;
        for (field, value) in [
            ("batch_size", sync.batch_size),
            ("concurrency", sync.concurrency),
            ("max_attempts", sync.max_attempts as usize),
        ] {
            if value == 0 {
                return Err(AppError::ConfigError(format!(
                    "sync.{} must be at least 1",
                    field
                )));
            }
        }

        Ok(Self {
            database: PathBuf::from(database),
            regions,
            taxa,
            quality_grade: raw.filters.quality_grade,
            sync,
        })
    }

    /// Every (region key, place ID) pair, in region key order.
    pub fn region_places(&self) -> Vec<(&str, i64)> {
        self.regions
            .iter()
            .flat_map(|(key, region)| {
                region
                    .place_ids
                    .iter()
                    .map(move |place_id| (key.as_str(), *place_id))
            })
            .collect()
    }
}
