//! SQLite schema for a taxa dataset.
//!
//! The `taxa` table is wide: one nullable TEXT column per [`Rank`], in
//! hierarchical order, generated from [`Rank::ALL`] so the schema can never
//! drift from the flattener or the breakdown generator.

use sqlx::SqlitePool;
use taxa_core::error::AppError;
use taxa_core::rank::Rank;

/// Rank columns that get an index; the levels breakdowns group by most.
const INDEXED_RANKS: [Rank; 4] = [Rank::Family, Rank::Subfamily, Rank::Tribe, Rank::Genus];

/// `CREATE TABLE` statement for `taxa`.
pub fn taxa_table_ddl() -> String {
    let rank_columns: Vec<String> = Rank::ALL
        .iter()
        .map(|rank| format!("    {} TEXT,", rank.column()))
        .collect();

    format!(
        "CREATE TABLE IF NOT EXISTS taxa (\n    \
         id INTEGER PRIMARY KEY,\n    \
         scientific_name TEXT NOT NULL,\n    \
         common_name TEXT,\n    \
         rank TEXT NOT NULL,\n\
         {}\n    \
         is_active BOOLEAN NOT NULL DEFAULT 1,\n    \
         iconic_taxon TEXT\n)",
        rank_columns.join("\n")
    )
}

const OBSERVATIONS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS observations (
    taxon_id INTEGER NOT NULL,
    region_key TEXT NOT NULL,
    place_id INTEGER NOT NULL,
    observation_count INTEGER NOT NULL DEFAULT 0,
    observer_count INTEGER,
    research_grade_count INTEGER,
    first_observed TEXT,
    last_observed TEXT,
    PRIMARY KEY (taxon_id, place_id),
    FOREIGN KEY (taxon_id) REFERENCES taxa(id)
)
"#;

const REGIONS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS regions (
    key TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    place_ids TEXT NOT NULL
)
"#;

const SYNC_INFO_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS sync_info (
    key TEXT PRIMARY KEY,
    value TEXT
)
"#;

/// Creates every table and index. Safe to run on an existing dataset.
pub async fn create_schema(pool: &SqlitePool) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;

    sqlx::query(&taxa_table_ddl()).execute(&mut *tx).await?;
    sqlx::query(OBSERVATIONS_DDL).execute(&mut *tx).await?;
    sqlx::query(REGIONS_DDL).execute(&mut *tx).await?;
    sqlx::query(SYNC_INFO_DDL).execute(&mut *tx).await?;

    for rank in INDEXED_RANKS {
        let ddl = format!(
            "CREATE INDEX IF NOT EXISTS idx_taxa_{col} ON taxa({col})",
            col = rank.column()
        );
        sqlx::query(&ddl).execute(&mut *tx).await?;
    }
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_obs_region ON observations(region_key)")
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}
