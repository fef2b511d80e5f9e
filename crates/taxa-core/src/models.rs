use serde::{Deserialize, Serialize};

use crate::rank::Rank;

/// A taxon as returned by the iNaturalist API.
///
/// Every field is optional on the wire: ancestor objects embedded in another
/// taxon's `ancestors` array are abbreviated, and malformed records must be
/// rejected by the flattener rather than by deserialization.
///
/// # Examples
///
/// ```
/// use taxa_core::models::TaxonRecord;
///
/// let json = r#"{
///     "id": 47604,
///     "name": "Asteraceae",
///     "rank": "family",
///     "preferred_common_name": "Sunflowers, Daisies, Asters, and Allies",
///     "ancestors": [{"id": 47126, "name": "Plantae", "rank": "kingdom"}]
/// }"#;
///
/// let taxon: TaxonRecord = serde_json::from_str(json).unwrap();
/// assert_eq!(taxon.id, Some(47604));
/// assert_eq!(taxon.ancestors.as_ref().map(Vec::len), Some(1));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaxonRecord {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub rank: Option<String>,
    #[serde(default)]
    pub preferred_common_name: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub iconic_taxon_name: Option<String>,
    #[serde(default)]
    pub ancestors: Option<Vec<TaxonRecord>>,
}

impl TaxonRecord {
    /// Builds a minimal record, mostly useful in tests and fixtures.
    pub fn new(id: i64, name: &str, rank: &str) -> Self {
        Self {
            id: Some(id),
            name: Some(name.to_string()),
            rank: Some(rank.to_string()),
            ..Self::default()
        }
    }

    /// Attaches an ancestor chain.
    pub fn with_ancestors(mut self, ancestors: Vec<TaxonRecord>) -> Self {
        self.ancestors = Some(ancestors);
        self
    }
}

/// One taxon observed within a place, from the regional taxonomy endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionalTaxon {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub rank: Option<String>,
    /// Observations of this taxon and everything below it.
    #[serde(default)]
    pub descendant_obs_count: i64,
    /// Observations identified exactly to this taxon.
    #[serde(default)]
    pub direct_obs_count: i64,
}

impl RegionalTaxon {
    pub fn new(id: i64, descendant_obs_count: i64, direct_obs_count: i64) -> Self {
        Self {
            id,
            name: None,
            rank: None,
            descendant_obs_count,
            direct_obs_count,
        }
    }
}

/// One page of the taxa search endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaxaPage {
    #[serde(default)]
    pub total_results: u64,
    #[serde(default)]
    pub results: Vec<TaxonRecord>,
}

/// A flattened `taxa` table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonRow {
    pub id: i64,
    pub scientific_name: String,
    pub common_name: Option<String>,
    pub rank: String,
    /// One entry per [`Rank::ALL`] position.
    pub ranks: [Option<String>; 16],
    pub is_active: bool,
    pub iconic_taxon: Option<String>,
}

impl TaxonRow {
    /// Name recorded at `rank`, if any.
    pub fn rank_name(&self, rank: Rank) -> Option<&str> {
        self.ranks[rank.index()].as_deref()
    }

    pub fn set_rank_name(&mut self, rank: Rank, name: &str) {
        self.ranks[rank.index()] = Some(name.to_string());
    }
}

/// A per-(taxon, place) aggregate destined for the `observations` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationRow {
    pub taxon_id: i64,
    pub region_key: String,
    pub place_id: i64,
    pub observation_count: i64,
    pub observer_count: Option<i64>,
    pub research_grade_count: Option<i64>,
    pub first_observed: Option<String>,
    pub last_observed: Option<String>,
}

/// Aggregated dataset statistics for `taxa info`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseStats {
    pub total_taxa: i64,
    pub species_count: i64,
    pub observation_rows: i64,
    pub total_observations: i64,
    pub regions: Vec<(String, String)>,
    pub last_sync: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxon_record_missing_fields_deserialize() {
        let taxon: TaxonRecord = serde_json::from_str(r#"{"name": "Anonymous"}"#).unwrap();
        assert_eq!(taxon.id, None);
        assert_eq!(taxon.rank, None);
        assert!(taxon.ancestors.is_none());
    }

    #[test]
    fn test_regional_taxon_deserialization() {
        let json = r#"{
            "id": 47604,
            "name": "Asteraceae",
            "rank": "family",
            "rank_level": 30,
            "descendant_obs_count": 1200,
            "direct_obs_count": 15
        }"#;

        let taxon: RegionalTaxon = serde_json::from_str(json).unwrap();
        assert_eq!(taxon.id, 47604);
        assert_eq!(taxon.descendant_obs_count, 1200);
        assert_eq!(taxon.direct_obs_count, 15);
    }

    #[test]
    fn test_taxa_page_deserialization() {
        let json = r#"{
            "total_results": 2,
            "page": 1,
            "per_page": 200,
            "results": [
                {"id": 1, "name": "A", "rank": "species"},
                {"id": 2, "name": "B", "rank": "species"}
            ]
        }"#;

        let page: TaxaPage = serde_json::from_str(json).unwrap();
        assert_eq!(page.total_results, 2);
        assert_eq!(page.results[1].name.as_deref(), Some("B"));
    }

    #[test]
    fn test_rank_name_accessors() {
        let mut row = TaxonRow {
            id: 1,
            scientific_name: "Taraxacum".into(),
            common_name: None,
            rank: "genus".into(),
            ranks: Default::default(),
            is_active: true,
            iconic_taxon: None,
        };
        assert_eq!(row.rank_name(Rank::Genus), None);
        row.set_rank_name(Rank::Genus, "Taraxacum");
        assert_eq!(row.rank_name(Rank::Genus), Some("Taraxacum"));
    }
}
