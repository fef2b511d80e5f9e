//! Sync service types: discovery accumulation and sync statistics.
//!
//! This module provides pure business logic for the sync pipeline,
//! decoupled from I/O operations and CLI orchestration.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::AppError;
use crate::models::{ObservationRow, RegionalTaxon};

/// Observation counts for one taxon in one place, gathered during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceCount {
    pub region_key: String,
    pub place_id: i64,
    pub descendant_obs_count: i64,
    pub direct_obs_count: i64,
}

/// Owned accumulator for the discovery phase of one root taxon.
///
/// Maps taxon ID → every (region, place) that reported it. Filled by the
/// single orchestrating task as regional results arrive, then drained by the
/// write phase one taxon at a time.
#[derive(Debug, Default)]
pub struct DiscoveryAccumulator {
    counts: BTreeMap<i64, Vec<PlaceCount>>,
}

impl DiscoveryAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the results of one regional discovery call.
    pub fn record(&mut self, region_key: &str, place_id: i64, taxa: &[RegionalTaxon]) {
        for taxon in taxa {
            let entries = self.counts.entry(taxon.id).or_default();
            // A place lists each taxon once; keep the first if it repeats.
            if entries.iter().any(|e| e.place_id == place_id) {
                tracing::debug!(taxon_id = taxon.id, place_id, "Duplicate regional entry ignored");
                continue;
            }
            entries.push(PlaceCount {
                region_key: region_key.to_string(),
                place_id,
                descendant_obs_count: taxon.descendant_obs_count,
                direct_obs_count: taxon.direct_obs_count,
            });
        }
    }

    /// The union of discovered taxon IDs, ascending.
    pub fn taxon_ids(&self) -> Vec<i64> {
        self.counts.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Removes and returns the observation rows gathered for `taxon_id`.
    ///
    /// The stored observation count is the descendant observation count,
    /// which is what the regional endpoint reports for a taxon in a place.
    pub fn take_observations(&mut self, taxon_id: i64) -> Vec<ObservationRow> {
        self.counts
            .remove(&taxon_id)
            .unwrap_or_default()
            .into_iter()
            .map(|count| ObservationRow {
                taxon_id,
                region_key: count.region_key,
                place_id: count.place_id,
                observation_count: count.descendant_obs_count,
                observer_count: None,
                research_grade_count: None,
                first_observed: None,
                last_observed: None,
            })
            .collect()
    }
}

/// Requested IDs that the detail endpoint did not return, ascending.
pub fn missing_ids(requested: &[i64], returned: impl IntoIterator<Item = i64>) -> Vec<i64> {
    let returned: BTreeSet<i64> = returned.into_iter().collect();
    let mut missing: Vec<i64> = requested
        .iter()
        .copied()
        .filter(|id| !returned.contains(id))
        .collect();
    missing.sort_unstable();
    missing.dedup();
    missing
}

/// Statistics for a sync run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncStats {
    /// Distinct taxa reported by regional discovery.
    pub discovered: usize,
    /// Full records written (insert or replace).
    pub taxa_written: usize,
    /// Ancestor rows newly inserted.
    pub ancestors_written: usize,
    pub observations_written: usize,
    /// Discovered IDs the detail endpoint did not return.
    pub missing: usize,
    /// Records rejected by the flattener.
    pub malformed: usize,
    pub api_calls: usize,
}

impl SyncStats {
    /// Creates a new empty stats tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds another tracker's counts to this one.
    pub fn merge(&mut self, other: &SyncStats) {
        self.discovered += other.discovered;
        self.taxa_written += other.taxa_written;
        self.ancestors_written += other.ancestors_written;
        self.observations_written += other.observations_written;
        self.missing += other.missing;
        self.malformed += other.malformed;
        self.api_calls += other.api_calls;
    }

    /// Returns the total number of taxon rows written.
    pub fn total_taxa(&self) -> usize {
        self.taxa_written + self.ancestors_written
    }
}

/// Result of syncing a single configured root taxon.
#[derive(Debug, Clone)]
pub struct TaxonSyncResult {
    /// Config key of the taxon.
    pub key: String,
    pub name: String,
    pub taxon_id: i64,
    pub stats: SyncStats,
    /// True when discovery found nothing and the taxon was skipped.
    pub skipped: bool,
}

impl TaxonSyncResult {
    /// Creates a completed result.
    pub fn synced(key: String, name: String, taxon_id: i64, stats: SyncStats) -> Self {
        Self {
            key,
            name,
            taxon_id,
            stats,
            skipped: false,
        }
    }

    /// Creates a result for a taxon with no regional observations.
    pub fn skipped(key: String, name: String, taxon_id: i64, stats: SyncStats) -> Self {
        Self {
            key,
            name,
            taxon_id,
            stats,
            skipped: true,
        }
    }
}

/// Aggregated results of a completed sync.
#[derive(Debug, Clone, Default)]
pub struct SyncSummary {
    pub results: Vec<TaxonSyncResult>,
    /// Path of the previous dataset, if one was moved aside.
    pub backup: Option<std::path::PathBuf>,
}

impl SyncSummary {
    /// Creates a new empty summary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a taxon result.
    pub fn add(&mut self, result: TaxonSyncResult) {
        self.results.push(result);
    }

    /// Stats summed over every taxon.
    pub fn totals(&self) -> SyncStats {
        let mut totals = SyncStats::new();
        for result in &self.results {
            totals.merge(&result.stats);
        }
        totals
    }

    /// Returns the count of skipped taxa.
    pub fn skipped_count(&self) -> usize {
        self.results.iter().filter(|r| r.skipped).count()
    }
}

/// How far a sync got, counted in committed root taxa.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncProgress {
    pub taxa_completed: usize,
    pub taxa_total: usize,
    /// Taxon rows (full records and ancestors) in committed transactions.
    pub rows_written: usize,
    pub observations_written: usize,
}

impl SyncProgress {
    pub fn new(taxa_total: usize) -> Self {
        Self {
            taxa_total,
            ..Self::default()
        }
    }

    /// Counts one finished root taxon.
    pub fn complete(&mut self, stats: &SyncStats) {
        self.taxa_completed += 1;
        self.rows_written += stats.total_taxa();
        self.observations_written += stats.observations_written;
    }
}

impl fmt::Display for SyncProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} root taxa done, {} taxon rows and {} observation rows staged",
            self.taxa_completed, self.taxa_total, self.rows_written, self.observations_written
        )
    }
}

/// Why a sync stopped before publishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl-C or another external signal.
    Interrupted,
    /// The whole-sync deadline, in seconds, expired.
    Deadline(u64),
}

impl ShutdownReason {
    /// The error reported for this reason at the given progress.
    pub fn into_error(self, progress: SyncProgress) -> AppError {
        match self {
            ShutdownReason::Interrupted => AppError::Interrupted(progress),
            ShutdownReason::Deadline(secs) => AppError::DeadlineExceeded { secs, progress },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulator_unions_ids_across_places() {
        let mut acc = DiscoveryAccumulator::new();
        acc.record(
            "bay_area",
            14,
            &[RegionalTaxon::new(3, 10, 5), RegionalTaxon::new(1, 20, 0)],
        );
        acc.record("oregon", 10, &[RegionalTaxon::new(3, 7, 7)]);

        assert_eq!(acc.len(), 2);
        assert_eq!(acc.taxon_ids(), vec![1, 3]);
    }

    #[test]
    fn test_accumulator_take_observations() {
        let mut acc = DiscoveryAccumulator::new();
        acc.record("bay_area", 14, &[RegionalTaxon::new(3, 100, 50)]);
        acc.record("oregon", 10, &[RegionalTaxon::new(3, 7, 7)]);

        let rows = acc.take_observations(3);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].region_key, "bay_area");
        assert_eq!(rows[0].place_id, 14);
        assert_eq!(rows[0].observation_count, 100);
        assert_eq!(rows[0].observer_count, None);
        assert_eq!(rows[1].place_id, 10);

        // consumed once
        assert!(acc.take_observations(3).is_empty());
        assert!(acc.is_empty());
    }

    #[test]
    fn test_accumulator_ignores_repeated_place() {
        let mut acc = DiscoveryAccumulator::new();
        acc.record("a", 1, &[RegionalTaxon::new(9, 5, 5)]);
        acc.record("b", 1, &[RegionalTaxon::new(9, 6, 6)]);

        let rows = acc.take_observations(9);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].region_key, "a");
    }

    #[test]
    fn test_missing_ids() {
        assert_eq!(missing_ids(&[1, 2, 3, 4], vec![2, 4]), vec![1, 3]);
        assert!(missing_ids(&[1, 2], vec![2, 1, 7]).is_empty());
    }

    #[test]
    fn test_sync_stats_default() {
        let stats = SyncStats::new();
        assert_eq!(stats.discovered, 0);
        assert_eq!(stats.total_taxa(), 0);
    }

    #[test]
    fn test_summary_totals_and_skipped() {
        let mut summary = SyncSummary::new();
        summary.add(TaxonSyncResult::synced(
            "asteraceae".into(),
            "Asteraceae".into(),
            47604,
            SyncStats {
                discovered: 10,
                taxa_written: 9,
                ancestors_written: 4,
                observations_written: 12,
                missing: 1,
                malformed: 0,
                api_calls: 3,
            },
        ));
        summary.add(TaxonSyncResult::skipped(
            "rosaceae".into(),
            "Rosaceae".into(),
            47148,
            SyncStats {
                api_calls: 2,
                ..SyncStats::default()
            },
        ));

        let totals = summary.totals();
        assert_eq!(totals.discovered, 10);
        assert_eq!(totals.total_taxa(), 13);
        assert_eq!(totals.api_calls, 5);
        assert_eq!(summary.skipped_count(), 1);
    }

    #[test]
    fn test_progress_counts_completed_taxa() {
        let mut progress = SyncProgress::new(3);
        progress.complete(&SyncStats {
            taxa_written: 9,
            ancestors_written: 4,
            observations_written: 12,
            ..SyncStats::default()
        });

        assert_eq!(progress.taxa_completed, 1);
        assert_eq!(progress.rows_written, 13);
        assert_eq!(
            progress.to_string(),
            "1/3 root taxa done, 13 taxon rows and 12 observation rows staged"
        );
    }

    #[test]
    fn test_shutdown_reason_into_error() {
        let progress = SyncProgress::new(2);

        let err = ShutdownReason::Interrupted.into_error(progress);
        assert!(matches!(err, AppError::Interrupted(p) if p.taxa_total == 2));

        let err = ShutdownReason::Deadline(600).into_error(progress);
        assert!(matches!(err, AppError::DeadlineExceeded { secs: 600, .. }));
        assert!(!err.is_retryable());
    }
}
