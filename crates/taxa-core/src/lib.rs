//! Taxa Core - Domain types, rank hierarchy, error handling, and configuration.
//!
//! This crate holds everything in taxa that does not touch the network or the
//! database: the fixed [`Rank`] hierarchy, API and row models, the ancestry
//! flattener, breakdown query generation, configuration loading, sync
//! statistics and progress metrics.

pub mod breakdown;
pub mod config;
pub mod error;
pub mod flatten;
pub mod metrics;
pub mod models;
pub mod rank;
pub mod sync;

pub use breakdown::{generate_breakdown_query, select_level, BreakdownQuery};
pub use config::{
    HttpConfig, RegionConfig, RetryConfig, SyncConfig, TaxaConfig, TaxonConfig, QUALITY_GRADES,
};
pub use error::AppError;
pub use flatten::flatten_taxon;
pub use metrics::MetricsTracker;
pub use models::{DatabaseStats, ObservationRow, RegionalTaxon, TaxaPage, TaxonRecord, TaxonRow};
pub use rank::Rank;
pub use sync::{
    missing_ids, DiscoveryAccumulator, PlaceCount, ShutdownReason, SyncProgress, SyncStats,
    SyncSummary, TaxonSyncResult,
};
