//! Writes to the staging dataset built during a sync.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use taxa_core::config::RegionConfig;
use taxa_core::error::AppError;
use taxa_core::models::{ObservationRow, TaxonRow};
use taxa_core::rank::Rank;

use crate::schema::create_schema;

/// `sync_info` key holding the RFC 3339 time of the last successful sync.
pub const LAST_SYNC_KEY: &str = "last_sync";

/// Creates (or reopens) the staging database at `path` with the full schema.
///
/// The pool holds a single connection and uses a rollback journal, so once
/// the pool is closed the dataset is one self-contained file that can be
/// renamed into place.
pub async fn open_staging(path: &Path) -> Result<SqlitePool, AppError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    create_schema(&pool).await?;
    Ok(pool)
}

/// Stores region metadata, with place IDs as a JSON array.
pub async fn insert_region(
    pool: &SqlitePool,
    key: &str,
    region: &RegionConfig,
) -> Result<(), AppError> {
    let place_ids = serde_json::to_string(&region.place_ids)?;

    sqlx::query("INSERT OR REPLACE INTO regions (key, name, place_ids) VALUES (?, ?, ?)")
        .bind(key)
        .bind(&region.name)
        .bind(place_ids)
        .execute(pool)
        .await?;

    Ok(())
}

/// Records `at` as the last successful sync time.
pub async fn record_last_sync(pool: &SqlitePool, at: DateTime<Utc>) -> Result<(), AppError> {
    sqlx::query("INSERT OR REPLACE INTO sync_info (key, value) VALUES (?, ?)")
        .bind(LAST_SYNC_KEY)
        .bind(at.to_rfc3339_opts(SecondsFormat::Secs, true))
        .execute(pool)
        .await?;

    Ok(())
}

fn taxon_insert_sql(verb: &str) -> String {
    let rank_columns: Vec<&str> = Rank::ALL.iter().map(|r| r.column()).collect();
    let placeholders = vec!["?"; rank_columns.len() + 6].join(", ");

    format!(
        "{} INTO taxa (id, scientific_name, common_name, rank, {}, is_active, iconic_taxon) VALUES ({})",
        verb,
        rank_columns.join(", "),
        placeholders
    )
}

/// One write transaction against the staging dataset.
///
/// The orchestrator opens one writer per root taxon, so a failure part way
/// through a taxon leaves nothing of it behind.
pub struct StagingWriter {
    tx: Transaction<'static, Sqlite>,
    replace_sql: String,
    ignore_sql: String,
}

impl StagingWriter {
    pub async fn begin(pool: &SqlitePool) -> Result<Self, AppError> {
        Ok(Self {
            tx: pool.begin().await?,
            replace_sql: taxon_insert_sql("INSERT OR REPLACE"),
            ignore_sql: taxon_insert_sql("INSERT OR IGNORE"),
        })
    }

    /// Writes a taxon from a full-detail fetch, replacing any earlier row.
    pub async fn replace_taxon(&mut self, row: &TaxonRow) -> Result<(), AppError> {
        let sql = self.replace_sql.clone();
        self.write_taxon(&sql, row).await?;
        Ok(())
    }

    /// Writes a taxon seen only as an ancestor. An existing row wins.
    ///
    /// Returns true if the row was inserted.
    pub async fn insert_ancestor(&mut self, row: &TaxonRow) -> Result<bool, AppError> {
        let sql = self.ignore_sql.clone();
        let affected = self.write_taxon(&sql, row).await?;
        Ok(affected > 0)
    }

    async fn write_taxon(&mut self, sql: &str, row: &TaxonRow) -> Result<u64, AppError> {
        let mut query = sqlx::query(sql)
            .bind(row.id)
            .bind(&row.scientific_name)
            .bind(&row.common_name)
            .bind(&row.rank);
        for name in &row.ranks {
            query = query.bind(name);
        }
        let result = query
            .bind(row.is_active)
            .bind(&row.iconic_taxon)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected())
    }

    /// Writes one observation aggregate, replacing any row for the same
    /// (taxon, place).
    pub async fn upsert_observation(&mut self, row: &ObservationRow) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO observations (
                taxon_id,
                region_key,
                place_id,
                observation_count,
                observer_count,
                research_grade_count,
                first_observed,
                last_observed
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(row.taxon_id)
        .bind(&row.region_key)
        .bind(row.place_id)
        .bind(row.observation_count)
        .bind(row.observer_count)
        .bind(row.research_grade_count)
        .bind(&row.first_observed)
        .bind(&row.last_observed)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    pub async fn commit(self) -> Result<(), AppError> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taxa_core::flatten::flatten_taxon;
    use taxa_core::models::TaxonRecord;
    use tempfile::TempDir;

    async fn staging() -> (TempDir, SqlitePool) {
        let dir = TempDir::new().unwrap();
        let pool = open_staging(&dir.path().join("flora.db.new")).await.unwrap();
        (dir, pool)
    }

    fn taraxacum() -> TaxonRow {
        flatten_taxon(
            &TaxonRecord::new(53, "Taraxacum", "genus").with_ancestors(vec![
                TaxonRecord::new(47126, "Plantae", "kingdom"),
                TaxonRecord::new(47604, "Asteraceae", "family"),
                TaxonRecord::new(47605, "Asterales", "order"),
            ]),
        )
        .unwrap()
    }

    #[test]
    fn test_insert_sql_binds_every_column() {
        let sql = taxon_insert_sql("INSERT OR IGNORE");
        assert!(sql.starts_with("INSERT OR IGNORE INTO taxa"));
        assert_eq!(sql.matches('?').count(), 22);
        assert!(sql.contains("order_name"));
    }

    #[tokio::test]
    async fn test_ancestor_write_never_overwrites() {
        let (_dir, pool) = staging().await;

        let mut writer = StagingWriter::begin(&pool).await.unwrap();
        writer.replace_taxon(&taraxacum()).await.unwrap();
        let bare = flatten_taxon(&TaxonRecord::new(53, "Taraxacum", "genus")).unwrap();
        let inserted = writer.insert_ancestor(&bare).await.unwrap();
        writer.commit().await.unwrap();

        assert!(!inserted);
        let (family, order): (Option<String>, Option<String>) =
            sqlx::query_as("SELECT family, order_name FROM taxa WHERE id = 53")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(family.as_deref(), Some("Asteraceae"));
        assert_eq!(order.as_deref(), Some("Asterales"));
    }

    #[tokio::test]
    async fn test_full_write_replaces_ancestor_row() {
        let (_dir, pool) = staging().await;

        let mut writer = StagingWriter::begin(&pool).await.unwrap();
        let bare = flatten_taxon(&TaxonRecord::new(53, "Taraxacum", "genus")).unwrap();
        assert!(writer.insert_ancestor(&bare).await.unwrap());
        writer.replace_taxon(&taraxacum()).await.unwrap();
        writer.commit().await.unwrap();

        let (count, family): (i64, Option<String>) =
            sqlx::query_as("SELECT COUNT(*), MAX(family) FROM taxa WHERE id = 53")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(count, 1);
        assert_eq!(family.as_deref(), Some("Asteraceae"));
    }

    #[tokio::test]
    async fn test_observation_upsert_replaces_same_place() {
        let (_dir, pool) = staging().await;
        let mut row = ObservationRow {
            taxon_id: 53,
            region_key: "bay_area".into(),
            place_id: 5245,
            observation_count: 10,
            observer_count: None,
            research_grade_count: None,
            first_observed: None,
            last_observed: None,
        };

        let mut writer = StagingWriter::begin(&pool).await.unwrap();
        writer.upsert_observation(&row).await.unwrap();
        row.observation_count = 12;
        writer.upsert_observation(&row).await.unwrap();
        writer.commit().await.unwrap();

        let rows: Vec<(i64,)> = sqlx::query_as("SELECT observation_count FROM observations")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(rows, vec![(12,)]);
    }

    #[tokio::test]
    async fn test_dropped_writer_rolls_back() {
        let (_dir, pool) = staging().await;

        {
            let mut writer = StagingWriter::begin(&pool).await.unwrap();
            writer.replace_taxon(&taraxacum()).await.unwrap();
        }

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM taxa")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_regions_and_last_sync() {
        let (_dir, pool) = staging().await;
        let region = RegionConfig {
            name: "San Francisco Bay Area".into(),
            place_ids: vec![5245, 5246],
        };

        insert_region(&pool, "bay_area", &region).await.unwrap();
        let at = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        record_last_sync(&pool, at).await.unwrap();

        let (name, place_ids): (String, String) =
            sqlx::query_as("SELECT name, place_ids FROM regions WHERE key = 'bay_area'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(name, "San Francisco Bay Area");
        assert_eq!(place_ids, "[5245,5246]");

        let (value,): (String,) =
            sqlx::query_as("SELECT value FROM sync_info WHERE key = 'last_sync'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(value, "2024-05-01T12:00:00Z");
    }
}
