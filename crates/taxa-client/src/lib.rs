//! Taxa Client - iNaturalist API access for taxa
//!
//! This crate provides:
//!
//! - [`TaxaApi`] - the three remote operations the sync pipeline relies on
//! - [`inat`] - the HTTP implementation against the iNaturalist v1 API
//! - [`retry`] - exponential backoff around any fallible remote call
//! - [`fetch`] - descendant pagination, regional discovery and batched
//!   detail fetching built on top of [`TaxaApi`]
//!
//! # Overview
//!
//! The HTTP client only classifies failures; it never retries on its own.
//! Retrying is the caller's decision and goes through [`retry::with_retry`],
//! so every fetcher shares one policy and tests can substitute a mock
//! [`TaxaApi`] without touching the network.

pub mod fetch;
pub mod inat;
pub mod retry;

use async_trait::async_trait;
use taxa_core::error::AppError;
use taxa_core::models::{RegionalTaxon, TaxaPage, TaxonRecord};

// Re-export main client types
pub use fetch::{fetch_descendants, fetch_regional_taxa, fetch_taxa_batch, DescendantQuery};
pub use inat::INatClient;
pub use retry::with_retry;

/// Remote operations against a taxonomy service.
#[async_trait]
pub trait TaxaApi: Send + Sync {
    /// One page of taxa below `taxon_id`, ordered by ascending ID.
    ///
    /// `page` is 1-based. When `id_above` is set only taxa with a greater ID
    /// are returned.
    async fn list_taxa_page(
        &self,
        taxon_id: i64,
        page: u32,
        per_page: u32,
        id_above: Option<i64>,
    ) -> Result<TaxaPage, AppError>;

    /// Full records, including ancestor chains, for the given IDs.
    ///
    /// IDs the service does not know are silently absent from the result.
    async fn get_taxa_by_ids(&self, ids: &[i64]) -> Result<Vec<TaxonRecord>, AppError>;

    /// Every taxon below `taxon_id` observed in `place_id`, with counts.
    async fn get_regional_taxonomy(
        &self,
        taxon_id: i64,
        place_id: i64,
        quality_grade: Option<&str>,
    ) -> Result<Vec<RegionalTaxon>, AppError>;
}
