//! Sync orchestration: discovery, enrichment and the staged write.
//!
//! For every configured root taxon the orchestrator asks each (region, place)
//! which taxa below the root have been observed there, fetches full records
//! for the union of those IDs, and writes them into `<db>.new`. Only when
//! every taxon is written does the staging file replace the published
//! dataset.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use taxa_client::{fetch_regional_taxa, fetch_taxa_batch, TaxaApi};
use taxa_core::config::{RetryConfig, TaxaConfig, TaxonConfig};
use taxa_core::error::AppError;
use taxa_core::flatten::flatten_taxon;
use taxa_core::metrics::MetricsTracker;
use taxa_core::sync::{
    missing_ids, DiscoveryAccumulator, ShutdownReason, SyncProgress, SyncStats, SyncSummary,
    TaxonSyncResult,
};
use taxa_db::{
    insert_region, open_staging, publish_dataset, record_last_sync, remove_staging, staging_path,
    StagingWriter,
};

/// Rows between progress reports in the write phase.
const WRITE_REPORT_EVERY: usize = 1000;

/// What a sync would do, without doing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    pub database: PathBuf,
    pub staging: PathBuf,
    /// (key, name, place count)
    pub regions: Vec<(String, String, usize)>,
    /// (key, name, taxon ID)
    pub taxa: Vec<(String, String, i64)>,
    /// Regional discovery requests, one per taxon per place.
    pub discovery_calls: usize,
    pub quality_grade: Option<String>,
}

/// Describes the sync for `--dry-run`. Makes no requests and touches no files.
pub fn plan_sync(config: &TaxaConfig) -> SyncPlan {
    let places = config.region_places().len();

    SyncPlan {
        database: config.database.clone(),
        staging: staging_path(&config.database),
        regions: config
            .regions
            .iter()
            .map(|(key, r)| (key.clone(), r.name.clone(), r.place_ids.len()))
            .collect(),
        taxa: config
            .taxa
            .iter()
            .map(|(key, t)| (key.clone(), t.name.clone(), t.taxon_id))
            .collect(),
        discovery_calls: places * config.taxa.len(),
        quality_grade: config.quality_grade.clone(),
    }
}

/// Rebuilds the dataset at `config.database`.
///
/// The build races `shutdown`; if it resolves first, the matching error is
/// returned with the progress made so far. On any failure the staging file
/// is removed and the published dataset is left untouched.
pub async fn run_sync<A, S>(
    api: &A,
    config: &TaxaConfig,
    shutdown: S,
) -> Result<SyncSummary, AppError>
where
    A: TaxaApi + ?Sized,
    S: Future<Output = ShutdownReason>,
{
    let published = config.database.as_path();
    let staging = staging_path(published);

    if staging.exists() {
        warn!(path = %staging.display(), "Removing stale staging database");
    }
    remove_staging(&staging).await?;

    info!("Building database: {}", staging.display());
    let pool = match open_staging(&staging).await {
        Ok(pool) => pool,
        Err(e) => {
            discard(&staging).await;
            return Err(e);
        }
    };

    let progress = Mutex::new(SyncProgress::new(config.taxa.len()));
    let outcome = tokio::select! {
        result = build_dataset(api, config, &pool, &progress) => result,
        reason = shutdown => {
            let progress = progress
                .lock()
                .map(|p| *p)
                .unwrap_or_else(|poisoned| *poisoned.into_inner());
            warn!("Sync stopped: {}", progress);
            Err(reason.into_error(progress))
        }
    };
    pool.close().await;

    match outcome {
        Ok(mut summary) => {
            info!("Replacing database: {}", published.display());
            summary.backup = publish_dataset(&staging, published).await?;
            Ok(summary)
        }
        Err(e) => {
            discard(&staging).await;
            Err(e)
        }
    }
}

async fn discard(staging: &Path) {
    if let Err(e) = remove_staging(staging).await {
        warn!(path = %staging.display(), error = %e, "Could not remove staging database");
    }
}

async fn build_dataset<A>(
    api: &A,
    config: &TaxaConfig,
    pool: &SqlitePool,
    progress: &Mutex<SyncProgress>,
) -> Result<SyncSummary, AppError>
where
    A: TaxaApi + ?Sized,
{
    for (key, region) in &config.regions {
        insert_region(pool, key, region).await?;
    }

    let retry = config.sync.retry();
    let mut summary = SyncSummary::new();

    for (key, taxon) in &config.taxa {
        info!(
            "Fetching taxon: {} (ID: {})",
            taxon.name, taxon.taxon_id
        );
        let result = sync_taxon(api, config, &retry, pool, key, taxon).await?;
        info!(
            "{}: {} taxa, {} ancestors, {} observation rows",
            taxon.name,
            result.stats.taxa_written,
            result.stats.ancestors_written,
            result.stats.observations_written
        );
        if let Ok(mut progress) = progress.lock() {
            progress.complete(&result.stats);
        }
        summary.add(result);
    }

    record_last_sync(pool, Utc::now()).await?;
    Ok(summary)
}

async fn sync_taxon<A>(
    api: &A,
    config: &TaxaConfig,
    retry: &RetryConfig,
    pool: &SqlitePool,
    key: &str,
    taxon: &TaxonConfig,
) -> Result<TaxonSyncResult, AppError>
where
    A: TaxaApi + ?Sized,
{
    let mut stats = SyncStats::new();
    let mut accumulator = discover(api, config, retry, taxon.taxon_id, &mut stats).await?;
    stats.discovered = accumulator.len();

    if accumulator.is_empty() {
        warn!(
            "No observations found for {} in any region, skipping",
            taxon.name
        );
        return Ok(TaxonSyncResult::skipped(
            key.to_string(),
            taxon.name.clone(),
            taxon.taxon_id,
            stats,
        ));
    }

    // Enrichment
    let ids = accumulator.taxon_ids();
    let batch_size = config.sync.batch_size;
    info!("Fetching details for {} taxa", ids.len());
    let mut fetch_metrics = MetricsTracker::new(ids.len());
    let mut on_batch = |done: usize, total: usize| {
        let fetched = (done * batch_size).min(fetch_metrics.total());
        fetch_metrics.record_processed(fetched - fetch_metrics.processed());
        fetch_metrics.record_api_calls(1);
        info!("Batch {}/{}: {}", done, total, fetch_metrics.report());
    };
    let records = fetch_taxa_batch(api, retry, &ids, batch_size, Some(&mut on_batch)).await?;
    stats.api_calls += fetch_metrics.api_calls();

    let missing = missing_ids(&ids, records.iter().filter_map(|r| r.id));
    if !missing.is_empty() {
        warn!(
            "{} of {} discovered taxa were not returned by the detail endpoint",
            missing.len(),
            ids.len()
        );
        debug!(?missing, "Missing taxon IDs");
    }
    stats.missing = missing.len();

    // Write
    let mut write_metrics = MetricsTracker::new(records.len());
    let mut writer = StagingWriter::begin(pool).await?;
    for record in &records {
        write_metrics.record_processed(1);
        if write_metrics.processed() % WRITE_REPORT_EVERY == 0 {
            info!("Writing taxa: {}", write_metrics.report());
        }

        let row = match flatten_taxon(record) {
            Ok(row) => row,
            Err(e) => {
                warn!(id = ?record.id, error = %e, "Skipping malformed taxon");
                stats.malformed += 1;
                continue;
            }
        };
        writer.replace_taxon(&row).await?;
        stats.taxa_written += 1;

        for ancestor in record.ancestors.iter().flatten() {
            match flatten_taxon(ancestor) {
                Ok(ancestor_row) => {
                    if writer.insert_ancestor(&ancestor_row).await? {
                        stats.ancestors_written += 1;
                    }
                }
                Err(e) => debug!(taxon_id = row.id, error = %e, "Skipping malformed ancestor"),
            }
        }

        for observation in accumulator.take_observations(row.id) {
            writer.upsert_observation(&observation).await?;
            stats.observations_written += 1;
        }
    }
    writer.commit().await?;
    info!("Wrote {}: {}", taxon.name, write_metrics.report());

    Ok(TaxonSyncResult::synced(
        key.to_string(),
        taxon.name.clone(),
        taxon.taxon_id,
        stats,
    ))
}

/// Runs regional discovery for one root taxon over every configured place.
///
/// Up to `sync.concurrency` requests are in flight; results are folded into
/// the accumulator here, in place order.
async fn discover<A>(
    api: &A,
    config: &TaxaConfig,
    retry: &RetryConfig,
    taxon_id: i64,
    stats: &mut SyncStats,
) -> Result<DiscoveryAccumulator, AppError>
where
    A: TaxaApi + ?Sized,
{
    let quality_grade = config.quality_grade.as_deref();
    let places = config.region_places();
    let total = places.len();

    let mut results = stream::iter(places)
        .map(move |(region_key, place_id)| async move {
            let taxa =
                fetch_regional_taxa(api, retry, taxon_id, place_id, quality_grade, None).await?;
            Ok::<_, AppError>((region_key, place_id, taxa))
        })
        .buffered(config.sync.concurrency.max(1));

    let mut metrics = MetricsTracker::new(total);
    let mut accumulator = DiscoveryAccumulator::new();
    while let Some(result) = results.next().await {
        let (region_key, place_id, taxa) = result?;
        metrics.record_processed(1);
        metrics.record_api_calls(1);
        info!(
            "[{}/{}] {} place {}: {} taxa",
            metrics.processed(),
            total,
            region_key,
            place_id,
            taxa.len()
        );
        debug!("Discovery: {}", metrics.report());
        accumulator.record(region_key, place_id, &taxa);
    }
    stats.api_calls += metrics.api_calls();

    Ok(accumulator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use taxa_core::models::{RegionalTaxon, TaxaPage, TaxonRecord};
    use tempfile::TempDir;
    use tokio::sync::Notify;

    /// A fixed remote taxonomy: regional answers per place and detail
    /// records by ID.
    #[derive(Default)]
    struct MockApi {
        regional: HashMap<i64, Vec<RegionalTaxon>>,
        details: HashMap<i64, TaxonRecord>,
        regional_calls: Mutex<Vec<i64>>,
        batch_calls: Mutex<usize>,
        /// When set, detail fetches after the first `n` signal it and never
        /// complete.
        stall: Option<(std::sync::Arc<Notify>, usize)>,
    }

    #[async_trait]
    impl TaxaApi for MockApi {
        async fn list_taxa_page(
            &self,
            _taxon_id: i64,
            _page: u32,
            _per_page: u32,
            _id_above: Option<i64>,
        ) -> Result<TaxaPage, AppError> {
            Ok(TaxaPage::default())
        }

        async fn get_taxa_by_ids(&self, ids: &[i64]) -> Result<Vec<TaxonRecord>, AppError> {
            let calls = {
                let mut calls = self.batch_calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            if let Some((notify, after)) = &self.stall {
                if calls <= *after {
                    return Ok(ids
                        .iter()
                        .filter_map(|id| self.details.get(id).cloned())
                        .collect());
                }
                notify.notify_one();
                std::future::pending::<()>().await;
            }
            Ok(ids
                .iter()
                .filter_map(|id| self.details.get(id).cloned())
                .collect())
        }

        async fn get_regional_taxonomy(
            &self,
            _taxon_id: i64,
            place_id: i64,
            _quality_grade: Option<&str>,
        ) -> Result<Vec<RegionalTaxon>, AppError> {
            self.regional_calls.lock().unwrap().push(place_id);
            Ok(self.regional.get(&place_id).cloned().unwrap_or_default())
        }
    }

    fn asteraceae_api() -> MockApi {
        let lineage = || {
            vec![
                TaxonRecord::new(47126, "Plantae", "kingdom"),
                TaxonRecord::new(47605, "Asterales", "order"),
                TaxonRecord::new(47604, "Asteraceae", "family"),
            ]
        };

        let mut api = MockApi::default();
        api.regional.insert(
            5245,
            vec![RegionalTaxon::new(47604, 593, 3), RegionalTaxon::new(52821, 120, 120)],
        );
        api.regional
            .insert(10, vec![RegionalTaxon::new(52821, 8, 8), RegionalTaxon::new(99999, 1, 1)]);
        api.details.insert(
            47604,
            TaxonRecord::new(47604, "Asteraceae", "family").with_ancestors(vec![
                TaxonRecord::new(47126, "Plantae", "kingdom"),
                TaxonRecord::new(47605, "Asterales", "order"),
            ]),
        );
        api.details.insert(
            52821,
            TaxonRecord::new(52821, "Taraxacum officinale", "species").with_ancestors(lineage()),
        );
        api
    }

    fn config(dir: &TempDir, taxa: &str) -> TaxaConfig {
        let toml = format!(
            r#"
database = "{}"

[regions.bay_area]
name = "San Francisco Bay Area"
place_ids = [5245]

[regions.oregon]
name = "Oregon"
place_ids = [10]

{}
"#,
            dir.path().join("flora.db").display(),
            taxa
        );
        TaxaConfig::from_toml_str(&toml).unwrap()
    }

    const ASTERACEAE: &str = r#"
[taxa.asteraceae]
name = "Asteraceae"
taxon_id = 47604
"#;

    async fn query_i64(path: &Path, sql: &str) -> i64 {
        let reader = taxa_db::DatasetReader::open(path).await.unwrap();
        let results = reader.run_query(sql).await.unwrap();
        results.rows[0][0].as_i64().unwrap()
    }

    #[tokio::test]
    async fn test_sync_builds_and_publishes_dataset() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, ASTERACEAE);
        let api = asteraceae_api();

        let summary = run_sync(&api, &config, std::future::pending())
            .await
            .unwrap();

        let db = &config.database;
        assert!(db.exists());
        assert!(!staging_path(db).exists());
        assert!(summary.backup.is_none());

        let totals = summary.totals();
        assert_eq!(totals.discovered, 3);
        assert_eq!(totals.taxa_written, 2);
        assert_eq!(totals.missing, 1);
        assert_eq!(totals.observations_written, 3);
        // Plantae and Asterales; Asteraceae was already written in full
        assert_eq!(totals.ancestors_written, 2);
        assert_eq!(*api.regional_calls.lock().unwrap(), vec![5245, 10]);
        assert_eq!(*api.batch_calls.lock().unwrap(), 1);

        assert_eq!(query_i64(db, "SELECT COUNT(*) FROM taxa").await, 4);
        assert_eq!(query_i64(db, "SELECT COUNT(*) FROM regions").await, 2);
        assert_eq!(
            query_i64(db, "SELECT observation_count FROM observations WHERE taxon_id = 52821 AND place_id = 10").await,
            8
        );
        assert_eq!(
            query_i64(db, "SELECT COUNT(*) FROM taxa WHERE id = 52821 AND family = 'Asteraceae' AND order_name = 'Asterales' AND species = 'Taraxacum officinale'").await,
            1
        );
        assert_eq!(
            query_i64(db, "SELECT COUNT(*) FROM sync_info WHERE key = 'last_sync'").await,
            1
        );
    }

    #[tokio::test]
    async fn test_second_sync_backs_up_previous_dataset() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, ASTERACEAE);
        let api = asteraceae_api();

        run_sync(&api, &config, std::future::pending()).await.unwrap();
        let first = std::fs::read(&config.database).unwrap();

        let summary = run_sync(&api, &config, std::future::pending())
            .await
            .unwrap();

        let backup = summary.backup.expect("backup path");
        assert_eq!(backup, taxa_db::backup_path(&config.database));
        assert_eq!(std::fs::read(&backup).unwrap(), first);
    }

    #[tokio::test]
    async fn test_empty_discovery_skips_taxon() {
        let dir = TempDir::new().unwrap();
        let config = config(
            &dir,
            r#"
[taxa.asteraceae]
name = "Asteraceae"
taxon_id = 47604

[taxa.rosaceae]
name = "Rosaceae"
taxon_id = 47148
"#,
        );
        let mut api = asteraceae_api();
        // every place answers with nothing
        api.regional.clear();

        let summary = run_sync(&api, &config, std::future::pending())
            .await
            .unwrap();

        assert_eq!(summary.results.len(), 2);
        assert_eq!(summary.skipped_count(), 2);
        assert_eq!(*api.batch_calls.lock().unwrap(), 0);
        assert_eq!(query_i64(&config.database, "SELECT COUNT(*) FROM taxa").await, 0);
    }

    #[tokio::test]
    async fn test_malformed_record_is_skipped() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, ASTERACEAE);
        let mut api = asteraceae_api();
        api.details.insert(
            47604,
            TaxonRecord {
                id: Some(47604),
                ..TaxonRecord::default()
            },
        );

        let summary = run_sync(&api, &config, std::future::pending())
            .await
            .unwrap();

        let totals = summary.totals();
        assert_eq!(totals.malformed, 1);
        assert_eq!(totals.taxa_written, 1);
    }

    #[tokio::test]
    async fn test_interrupted_sync_leaves_published_dataset() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, ASTERACEAE);
        std::fs::write(&config.database, b"previous dataset").unwrap();

        let notify = std::sync::Arc::new(Notify::new());
        let mut api = asteraceae_api();
        api.stall = Some((notify.clone(), 0));

        let shutdown = async move {
            notify.notified().await;
            ShutdownReason::Interrupted
        };
        let err = run_sync(&api, &config, shutdown).await.unwrap_err();

        match err {
            AppError::Interrupted(progress) => {
                assert_eq!(progress.taxa_completed, 0);
                assert_eq!(progress.taxa_total, 1);
            }
            other => panic!("Expected Interrupted, got {:?}", other),
        }
        assert_eq!(
            std::fs::read(&config.database).unwrap(),
            b"previous dataset"
        );
        assert!(!staging_path(&config.database).exists());
        assert!(!taxa_db::backup_path(&config.database).exists());
    }

    #[tokio::test]
    async fn test_deadline_reports_completed_taxa() {
        let dir = TempDir::new().unwrap();
        let config = config(
            &dir,
            r#"
[taxa.asteraceae]
name = "Asteraceae"
taxon_id = 47604

[taxa.rosaceae]
name = "Rosaceae"
taxon_id = 47148
"#,
        );

        // asteraceae completes, rosaceae stalls in enrichment
        let notify = std::sync::Arc::new(Notify::new());
        let mut api = asteraceae_api();
        api.stall = Some((notify.clone(), 1));

        let shutdown = async move {
            notify.notified().await;
            ShutdownReason::Deadline(30)
        };
        let err = run_sync(&api, &config, shutdown).await.unwrap_err();

        match err {
            AppError::DeadlineExceeded { secs, progress } => {
                assert_eq!(secs, 30);
                assert_eq!(progress.taxa_completed, 1);
                assert_eq!(progress.taxa_total, 2);
                assert_eq!(progress.rows_written, 4);
                assert_eq!(progress.observations_written, 3);
            }
            other => panic!("Expected DeadlineExceeded, got {:?}", other),
        }
        assert!(!config.database.exists());
        assert!(!staging_path(&config.database).exists());
    }

    #[tokio::test]
    async fn test_stale_staging_file_is_replaced() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, ASTERACEAE);
        std::fs::write(staging_path(&config.database), b"leftover").unwrap();

        run_sync(&asteraceae_api(), &config, std::future::pending())
            .await
            .unwrap();

        assert_eq!(query_i64(&config.database, "SELECT COUNT(*) FROM taxa").await, 4);
    }

    #[test]
    fn test_plan_sync() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, ASTERACEAE);

        let plan = plan_sync(&config);

        assert_eq!(plan.discovery_calls, 2);
        assert_eq!(plan.regions.len(), 2);
        assert_eq!(
            plan.taxa,
            vec![("asteraceae".to_string(), "Asteraceae".to_string(), 47604)]
        );
        assert_eq!(plan.staging, staging_path(&config.database));
        assert!(!config.database.exists());
    }
}
