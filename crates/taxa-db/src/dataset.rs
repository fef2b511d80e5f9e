//! Read-only access to a published taxa dataset.
//!
//! Everything here is a consumer: rank lookup, breakdown execution, ad-hoc
//! SQL and summary statistics. Nothing writes through a [`DatasetReader`].

use std::collections::BTreeSet;
use std::path::Path;

use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Executor, Row, SqlitePool, TypeInfo, ValueRef};
use taxa_core::breakdown::{select_level, BreakdownQuery};
use taxa_core::error::AppError;
use taxa_core::models::DatabaseStats;
use taxa_core::rank::Rank;

use crate::staging::LAST_SYNC_KEY;

/// Tabular result of a query, with values already converted to JSON scalars.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResults {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResults {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Reader over a published dataset.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use taxa_db::DatasetReader;
///
/// # async fn example() -> Result<(), taxa_core::AppError> {
/// let reader = DatasetReader::open(Path::new("flora.db")).await?;
/// let rank = reader.find_taxon_rank("Asteraceae").await?;
/// println!("Asteraceae is a {}", rank);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DatasetReader {
    pool: SqlitePool,
}

impl DatasetReader {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens an existing dataset read-only.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the file does not exist, so a
    /// mistyped path is never silently created.
    pub async fn open(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            return Err(AppError::ConfigError(format!(
                "Database not found: {}. Run 'taxa sync' first to create it",
                path.display()
            )));
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(Self::new(pool))
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Rank columns present in this dataset's `taxa` table.
    async fn available_ranks(&self) -> Result<Vec<Rank>, AppError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM pragma_table_info('taxa')")
            .fetch_all(&self.pool)
            .await?;
        let columns: BTreeSet<String> = rows.into_iter().map(|r| r.0).collect();

        Ok(Rank::ALL
            .into_iter()
            .filter(|rank| columns.contains(rank.column()))
            .collect())
    }

    /// Finds the single rank at which `name` appears.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ValidationError` if the name appears at no rank, or
    /// at more than one (the message lists them and suggests `--rank`).
    pub async fn find_taxon_rank(&self, name: &str) -> Result<Rank, AppError> {
        let mut found = Vec::new();

        for rank in self.available_ranks().await? {
            let sql = format!("SELECT 1 FROM taxa WHERE {} = ? LIMIT 1", rank.column());
            let hit = sqlx::query(&sql)
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
            if hit.is_some() {
                found.push(rank);
            }
        }

        match found.as_slice() {
            [] => Err(AppError::ValidationError(format!(
                "Taxon '{}' not found in database",
                name
            ))),
            [rank] => Ok(*rank),
            [first, ..] => {
                let names: Vec<&str> = found.iter().map(|r| r.column()).collect();
                Err(AppError::ValidationError(format!(
                    "Ambiguous taxon '{}' found at multiple ranks: {}\n   \
                     Specify with --rank: taxa breakdown {} --rank {}",
                    name,
                    names.join(", "),
                    name,
                    first
                )))
            }
        }
    }

    /// True if any taxon under `base_taxon` has a value at `rank`.
    async fn rank_populated(
        &self,
        base_taxon: &str,
        base_rank: Rank,
        rank: Rank,
    ) -> Result<bool, AppError> {
        let sql = format!(
            "SELECT 1 FROM taxa WHERE {} = ? AND {} IS NOT NULL LIMIT 1",
            base_rank.column(),
            rank.column()
        );
        let hit = sqlx::query(&sql)
            .bind(base_taxon)
            .fetch_optional(&self.pool)
            .await?;
        Ok(hit.is_some())
    }

    /// Picks a breakdown level when the caller gave none.
    ///
    /// Returns `(selected, expected)`; see [`select_level`]. Ranks are checked
    /// top-down and probing stops at the first populated one.
    pub async fn auto_select_level(
        &self,
        base_taxon: &str,
        base_rank: Rank,
    ) -> Result<(Rank, Rank), AppError> {
        let mut populated = BTreeSet::new();
        for rank in base_rank.below() {
            if self.rank_populated(base_taxon, base_rank, *rank).await? {
                populated.insert(*rank);
                break;
            }
        }

        select_level(base_taxon, base_rank, |rank| populated.contains(&rank))
    }

    /// Runs a generated breakdown query.
    pub async fn run_breakdown(&self, query: &BreakdownQuery) -> Result<QueryResults, AppError> {
        let mut q = sqlx::query(&query.sql);
        for param in &query.params {
            q = q.bind(param);
        }
        let rows = q.fetch_all(&self.pool).await?;

        let mut results = rows_to_results(&rows)?;
        if results.columns.is_empty() {
            results.columns = query.columns().into_iter().map(String::from).collect();
        }
        Ok(results)
    }

    /// Runs one arbitrary SQL statement.
    ///
    /// The connection is read-only, so statements that write fail with a
    /// database error.
    pub async fn run_query(&self, sql: &str) -> Result<QueryResults, AppError> {
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        let mut results = rows_to_results(&rows)?;

        if results.columns.is_empty() {
            let described = (&self.pool).describe(sql).await?;
            results.columns = described
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect();
        }
        Ok(results)
    }

    /// Row counts, regions and last sync time.
    pub async fn stats(&self) -> Result<DatabaseStats, AppError> {
        let (total_taxa, species_count): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN rank = 'species' THEN 1 ELSE 0 END), 0)
            FROM taxa
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let (observation_rows, total_observations): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(observation_count), 0) FROM observations",
        )
        .fetch_one(&self.pool)
        .await?;

        let regions: Vec<(String, String)> =
            sqlx::query_as("SELECT key, name FROM regions ORDER BY key")
                .fetch_all(&self.pool)
                .await?;

        let last_sync: Option<(Option<String>,)> =
            sqlx::query_as("SELECT value FROM sync_info WHERE key = ?")
                .bind(LAST_SYNC_KEY)
                .fetch_optional(&self.pool)
                .await?;

        Ok(DatabaseStats {
            total_taxa,
            species_count,
            observation_rows,
            total_observations,
            regions,
            last_sync: last_sync.and_then(|row| row.0),
        })
    }

    /// Distinct scientific names, sorted.
    pub async fn taxon_names(&self) -> Result<Vec<String>, AppError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT scientific_name FROM taxa ORDER BY scientific_name")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    /// Distinct region keys that have observations, sorted.
    pub async fn region_keys(&self) -> Result<Vec<String>, AppError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT region_key FROM observations ORDER BY region_key")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }
}

fn rows_to_results(rows: &[SqliteRow]) -> Result<QueryResults, AppError> {
    let Some(first) = rows.first() else {
        return Ok(QueryResults::default());
    };

    let columns = first
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    let rows = rows
        .iter()
        .map(|row| {
            (0..row.len())
                .map(|i| column_value(row, i))
                .collect::<Result<Vec<_>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(QueryResults { columns, rows })
}

/// Converts one cell by its runtime storage class.
fn column_value(row: &SqliteRow, index: usize) -> Result<Value, AppError> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }

    let type_name = raw.type_info().name().to_string();
    let value = match type_name.as_str() {
        "INTEGER" | "BOOLEAN" => Value::from(row.try_get_unchecked::<i64, _>(index)?),
        "REAL" | "NUMERIC" => Value::from(row.try_get_unchecked::<f64, _>(index)?),
        "BLOB" => {
            let bytes = row.try_get_unchecked::<Vec<u8>, _>(index)?;
            Value::String(format!("<{} bytes>", bytes.len()))
        }
        _ => Value::String(row.try_get_unchecked::<String, _>(index)?),
    };
    Ok(value)
}
