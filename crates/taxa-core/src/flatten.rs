//! Flattening of a taxon and its ancestor chain into a wide `taxa` row.

use crate::error::AppError;
use crate::models::{TaxonRecord, TaxonRow};
use crate::rank::Rank;

/// Flattens a taxon record into a [`TaxonRow`].
///
/// Every rank column starts unset. Each ancestor carrying both a name and a
/// rank from the fixed hierarchy fills its column; the rest are skipped. The
/// taxon's own rank column is written last, so it always holds its own name.
///
/// # Errors
///
/// Returns `AppError::ValidationError` if `id`, `name` or `rank` is missing.
///
/// # Examples
///
/// ```
/// use taxa_core::flatten::flatten_taxon;
/// use taxa_core::models::TaxonRecord;
/// use taxa_core::rank::Rank;
///
/// let taxon = TaxonRecord::new(47604, "Asteraceae", "family")
///     .with_ancestors(vec![TaxonRecord::new(47605, "Asterales", "order")]);
///
/// let row = flatten_taxon(&taxon).unwrap();
/// assert_eq!(row.rank_name(Rank::Family), Some("Asteraceae"));
/// assert_eq!(row.rank_name(Rank::Order), Some("Asterales"));
/// ```
pub fn flatten_taxon(taxon: &TaxonRecord) -> Result<TaxonRow, AppError> {
    let (id, name, rank) = match (taxon.id, taxon.name.as_deref(), taxon.rank.as_deref()) {
        (Some(id), Some(name), Some(rank)) => (id, name, rank),
        _ => {
            let missing: Vec<&str> = [
                ("id", taxon.id.is_none()),
                ("name", taxon.name.is_none()),
                ("rank", taxon.rank.is_none()),
            ]
            .into_iter()
            .filter_map(|(field, absent)| absent.then_some(field))
            .collect();

            return Err(AppError::ValidationError(format!(
                "Taxon missing required fields: {}",
                missing.join(", ")
            )));
        }
    };

    let mut row = TaxonRow {
        id,
        scientific_name: name.to_string(),
        common_name: taxon.preferred_common_name.clone(),
        rank: rank.to_string(),
        ranks: Default::default(),
        is_active: taxon.is_active.unwrap_or(true),
        iconic_taxon: taxon.iconic_taxon_name.clone(),
    };

    for ancestor in taxon.ancestors.iter().flatten() {
        let (Some(ancestor_name), Some(ancestor_rank)) =
            (ancestor.name.as_deref(), ancestor.rank.as_deref())
        else {
            tracing::debug!(
                taxon_id = id,
                ancestor_id = ?ancestor.id,
                "Skipping ancestor without name or rank"
            );
            continue;
        };

        if let Some(rank) = Rank::from_api(ancestor_rank) {
            row.set_rank_name(rank, ancestor_name);
        }
    }

    if let Some(own_rank) = Rank::from_api(rank) {
        row.set_rank_name(own_rank, name);
    }

    Ok(row)
}
