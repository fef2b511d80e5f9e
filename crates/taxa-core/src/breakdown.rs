//! Breakdown query generation for hierarchical taxonomic reports.
//!
//! A breakdown of a base taxon by k descendant ranks is k `GROUP BY`
//! sub-queries combined with `UNION ALL`. Sub-query i groups by the first
//! i + 1 levels and projects NULL for the rest, so coarser subtotal rows and
//! the finest rows come back in one result set. Ordering puts NULLs first for
//! every level, which places each subtotal directly before its detail rows.

use crate::error::AppError;
use crate::rank::Rank;

/// A generated breakdown query with its positional parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakdownQuery {
    pub sql: String,
    pub params: Vec<String>,
    /// The requested levels after normalization into hierarchical order.
    pub levels: Vec<Rank>,
}

impl BreakdownQuery {
    /// Column names of the result set, in order.
    pub fn columns(&self) -> Vec<&'static str> {
        self.levels
            .iter()
            .map(|r| r.column())
            .chain(["observation_count", "species_count"])
            .collect()
    }
}

/// Generates the combined breakdown query for `base_taxon` at `base_rank`.
///
/// `levels` may be given in any order; they are sorted into hierarchical
/// order and de-duplicated. When `region_key` is set, only observations from
/// that region are counted.
///
/// Single-level requests do not filter out NULL group keys: descendants with
/// no value at the requested rank surface as one NULL-keyed row instead of
/// disappearing. Multi-level requests require every grouped column to be
/// non-NULL.
///
/// # Errors
///
/// Returns `AppError::ValidationError` if `levels` is empty or any level is
/// not strictly below `base_rank`.
///
/// # Examples
///
/// ```
/// use taxa_core::breakdown::generate_breakdown_query;
/// use taxa_core::rank::Rank;
///
/// let query = generate_breakdown_query("Asteraceae", Rank::Family, &[Rank::Subfamily], None).unwrap();
/// assert!(query.sql.contains("GROUP BY subfamily"));
/// assert_eq!(query.params, vec!["Asteraceae".to_string()]);
/// ```
pub fn generate_breakdown_query(
    base_taxon: &str,
    base_rank: Rank,
    levels: &[Rank],
    region_key: Option<&str>,
) -> Result<BreakdownQuery, AppError> {
    if levels.is_empty() {
        return Err(AppError::ValidationError(
            "At least one breakdown level is required".to_string(),
        ));
    }

    let levels = Rank::normalize(levels);
    Rank::validate_below(base_rank, &levels)?;

    let base_column = base_rank.column();
    let multi_level = levels.len() > 1;

    let mut subqueries = Vec::with_capacity(levels.len());
    let mut params = Vec::new();

    for depth in 0..levels.len() {
        let grouped = &levels[..=depth];

        let projection: Vec<String> = levels
            .iter()
            .enumerate()
            .map(|(i, rank)| {
                if i <= depth {
                    rank.column().to_string()
                } else {
                    format!("NULL AS {}", rank.column())
                }
            })
            .collect();

        let mut conditions = vec![format!("{} = ?", base_column)];
        params.push(base_taxon.to_string());

        if let Some(region) = region_key {
            conditions.push("observations.region_key = ?".to_string());
            params.push(region.to_string());
        }

        if multi_level {
            conditions.extend(
                grouped
                    .iter()
                    .map(|rank| format!("{} IS NOT NULL", rank.column())),
            );
        }

        let group_by: Vec<&str> = grouped.iter().map(|r| r.column()).collect();

        subqueries.push(format!(
            "SELECT {}, \
             SUM(observations.observation_count) AS observation_count, \
             COUNT(DISTINCT CASE WHEN taxa.rank = 'species' THEN taxa.id END) AS species_count \
             FROM taxa \
             JOIN observations ON observations.taxon_id = taxa.id \
             WHERE {} \
             GROUP BY {}",
            projection.join(", "),
            conditions.join(" AND "),
            group_by.join(", ")
        ));
    }

    let order_by: Vec<String> = levels
        .iter()
        .map(|rank| format!("{} NULLS FIRST", rank.column()))
        .chain(std::iter::once("observation_count DESC".to_string()))
        .collect();

    let sql = format!(
        "{}\nORDER BY {}",
        subqueries.join("\nUNION ALL\n"),
        order_by.join(", ")
    );

    Ok(BreakdownQuery {
        sql,
        params,
        levels,
    })
}

/// Picks the breakdown level for a caller who did not request one.
///
/// `is_populated(rank)` reports whether any descendant of the base taxon has
/// a non-NULL value at `rank`. Ranks are checked top-down starting at the one
/// immediately below `base_rank`. Returns `(selected, expected)` where
/// `expected` is the immediate next rank; when the two differ the caller
/// should tell the user that unpopulated ranks were skipped.
///
/// Async dataset probing lives in `taxa-db`; this function holds the
/// selection rule so it can be checked without a database.
///
/// # Errors
///
/// Returns `AppError::ValidationError` if `base_rank` is the lowest rank or
/// if no rank below it is populated.
pub fn select_level<F>(
    base_taxon: &str,
    base_rank: Rank,
    mut is_populated: F,
) -> Result<(Rank, Rank), AppError>
where
    F: FnMut(Rank) -> bool,
{
    let expected = base_rank.next().ok_or_else(|| {
        AppError::ValidationError(format!(
            "Cannot break down {}: {} is the lowest rank",
            base_taxon, base_rank
        ))
    })?;

    base_rank
        .below()
        .iter()
        .copied()
        .find(|rank| is_populated(*rank))
        .map(|selected| (selected, expected))
        .ok_or_else(|| {
            AppError::ValidationError(format!(
                "No ranks below {} have data for {}",
                base_rank, base_taxon
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_level_query() {
        let query =
            generate_breakdown_query("Asteraceae", Rank::Family, &[Rank::Subfamily], None)
                .unwrap();

        assert!(!query.sql.contains("UNION"));
        assert!(query.sql.contains("GROUP BY subfamily"));
        assert!(query.sql.contains("family = ?"));
        assert!(!query.sql.contains("IS NOT NULL"));
        assert_eq!(query.params, vec!["Asteraceae".to_string()]);
        assert_eq!(
            query.columns(),
            vec!["subfamily", "observation_count", "species_count"]
        );
    }

    #[test]
    fn test_multi_level_query_unions_subtotals() {
        let query = generate_breakdown_query(
            "Asteraceae",
            Rank::Family,
            &[Rank::Subfamily, Rank::Tribe],
            None,
        )
        .unwrap();

        let parts: Vec<&str> = query.sql.split("UNION ALL").collect();
        assert_eq!(parts.len(), 2);
        assert!(parts[0].contains("NULL AS tribe"));
        assert!(parts[0].trim_end().ends_with("GROUP BY subfamily"));
        assert!(parts[0].contains("subfamily IS NOT NULL"));
        assert!(parts[1].contains("GROUP BY subfamily, tribe"));
        assert!(parts[1].contains("tribe IS NOT NULL"));
        assert!(query
            .sql
            .contains("ORDER BY subfamily NULLS FIRST, tribe NULLS FIRST, observation_count DESC"));
        assert_eq!(query.params, vec!["Asteraceae", "Asteraceae"]);
    }

    #[test]
    fn test_levels_are_normalized() {
        let query = generate_breakdown_query(
            "Asteraceae",
            Rank::Family,
            &[Rank::Genus, Rank::Subfamily, Rank::Genus],
            None,
        )
        .unwrap();

        assert_eq!(query.levels, vec![Rank::Subfamily, Rank::Genus]);
        assert!(query.sql.contains("GROUP BY subfamily, genus"));
    }

    #[test]
    fn test_order_rank_uses_order_name_column() {
        let query =
            generate_breakdown_query("Magnoliopsida", Rank::Class, &[Rank::Order], None).unwrap();
        assert!(query.sql.contains("GROUP BY order_name"));
        assert!(query.sql.contains("class = ?"));
    }

    #[test]
    fn test_region_filter_params_repeat_per_subquery() {
        let query = generate_breakdown_query(
            "Asteraceae",
            Rank::Family,
            &[Rank::Subfamily, Rank::Tribe],
            Some("bay_area"),
        )
        .unwrap();

        assert!(query.sql.contains("observations.region_key = ?"));
        assert_eq!(
            query.params,
            vec!["Asteraceae", "bay_area", "Asteraceae", "bay_area"]
        );
    }

    #[test]
    fn test_level_not_below_base_rank() {
        let err = generate_breakdown_query("Asteraceae", Rank::Family, &[Rank::Order], None)
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));

        let err = generate_breakdown_query("Asteraceae", Rank::Family, &[Rank::Family], None)
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[test]
    fn test_empty_levels() {
        let err = generate_breakdown_query("Asteraceae", Rank::Family, &[], None).unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[test]
    fn test_select_level_immediate_rank() {
        let (selected, expected) =
            select_level("Rosaceae", Rank::Family, |r| r == Rank::Subfamily).unwrap();
        assert_eq!(selected, Rank::Subfamily);
        assert_eq!(expected, Rank::Subfamily);
    }

    #[test]
    fn test_select_level_skips_unpopulated() {
        let populated = [Rank::Genus, Rank::Species];
        let (selected, expected) =
            select_level("Dryadoideae", Rank::Subfamily, |r| populated.contains(&r)).unwrap();
        assert_eq!(selected, Rank::Genus);
        assert_eq!(expected, Rank::Tribe);
        assert_ne!(selected, expected);
    }

    #[test]
    fn test_select_level_lowest_rank() {
        let err = select_level("Rosa forma", Rank::Form, |_| true).unwrap_err();
        assert!(err.to_string().contains("lowest rank"));
    }

    #[test]
    fn test_select_level_nothing_populated() {
        let err = select_level("Rosaceae", Rank::Family, |_| false).unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }
}
