//! The fixed taxonomic rank hierarchy.
//!
//! [`Rank::ALL`] is the single ordered sequence used by schema creation,
//! ancestry flattening and breakdown query generation.

use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

/// A hierarchical rank, ordered from highest (kingdom) to lowest (form).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Rank {
    Kingdom,
    Phylum,
    Class,
    Order,
    Family,
    Subfamily,
    Tribe,
    Subtribe,
    Genus,
    Subgenus,
    Section,
    Subsection,
    Species,
    Subspecies,
    Variety,
    Form,
}

impl Rank {
    /// All ranks in hierarchical order.
    pub const ALL: [Rank; 16] = [
        Rank::Kingdom,
        Rank::Phylum,
        Rank::Class,
        Rank::Order,
        Rank::Family,
        Rank::Subfamily,
        Rank::Tribe,
        Rank::Subtribe,
        Rank::Genus,
        Rank::Subgenus,
        Rank::Section,
        Rank::Subsection,
        Rank::Species,
        Rank::Subspecies,
        Rank::Variety,
        Rank::Form,
    ];

    /// The rank name as reported by the remote API.
    pub fn as_str(self) -> &'static str {
        match self {
            Rank::Kingdom => "kingdom",
            Rank::Phylum => "phylum",
            Rank::Class => "class",
            Rank::Order => "order",
            Rank::Family => "family",
            Rank::Subfamily => "subfamily",
            Rank::Tribe => "tribe",
            Rank::Subtribe => "subtribe",
            Rank::Genus => "genus",
            Rank::Subgenus => "subgenus",
            Rank::Section => "section",
            Rank::Subsection => "subsection",
            Rank::Species => "species",
            Rank::Subspecies => "subspecies",
            Rank::Variety => "variety",
            Rank::Form => "form",
        }
    }

    /// The column holding this rank in the `taxa` table.
    ///
    /// `order` is a reserved SQL keyword, so it is stored as `order_name`.
    pub fn column(self) -> &'static str {
        match self {
            Rank::Order => "order_name",
            other => other.as_str(),
        }
    }

    /// Position in [`Rank::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// The rank immediately below this one, if any.
    pub fn next(self) -> Option<Rank> {
        Rank::ALL.get(self.index() + 1).copied()
    }

    /// Every rank strictly below this one, in hierarchical order.
    pub fn below(self) -> &'static [Rank] {
        static ALL: [Rank; 16] = Rank::ALL;
        &ALL[self.index() + 1..]
    }

    /// Returns true if `self` sits strictly below `other` in the hierarchy.
    pub fn is_below(self, other: Rank) -> bool {
        self > other
    }

    /// Parses a rank from a remote rank string, returning `None` for ranks
    /// outside the fixed hierarchy (e.g. `superfamily`, `hybrid`).
    pub fn from_api(rank: &str) -> Option<Rank> {
        rank.parse().ok()
    }

    /// Sorts ranks into hierarchical order and removes duplicates.
    pub fn normalize(ranks: &[Rank]) -> Vec<Rank> {
        let mut sorted = ranks.to_vec();
        sorted.sort();
        sorted.dedup();
        sorted
    }

    /// Checks that every rank in `ranks` is strictly below `base`.
    pub fn validate_below(base: Rank, ranks: &[Rank]) -> Result<(), AppError> {
        let invalid: Vec<&str> = ranks
            .iter()
            .filter(|r| !r.is_below(base))
            .map(|r| r.as_str())
            .collect();

        if invalid.is_empty() {
            Ok(())
        } else {
            Err(AppError::ValidationError(format!(
                "Levels must be below {} in the hierarchy: {}",
                base,
                invalid.join(", ")
            )))
        }
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Rank {
    type Err = AppError;

    /// Accepts either the rank name or its column name (`order_name`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Rank::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == normalized || r.column() == normalized)
            .ok_or_else(|| AppError::ValidationError(format!("Unknown rank: {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sixteen_ranks_in_order() {
        assert_eq!(Rank::ALL.len(), 16);
        assert_eq!(Rank::ALL[0], Rank::Kingdom);
        assert_eq!(Rank::ALL[15], Rank::Form);
        for (i, rank) in Rank::ALL.iter().enumerate() {
            assert_eq!(rank.index(), i);
        }
    }

    #[test]
    fn test_order_maps_to_order_name() {
        assert_eq!(Rank::Order.column(), "order_name");
        assert_eq!(Rank::Family.column(), "family");
        assert_eq!("order".parse::<Rank>().unwrap(), Rank::Order);
        assert_eq!("order_name".parse::<Rank>().unwrap(), Rank::Order);
    }

    #[test]
    fn test_parse_unknown_rank() {
        let err = "clade".parse::<Rank>().unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
        assert_eq!(Rank::from_api("superfamily"), None);
        assert_eq!(Rank::from_api("Genus"), Some(Rank::Genus));
    }

    #[test]
    fn test_next_and_below() {
        assert_eq!(Rank::Family.next(), Some(Rank::Subfamily));
        assert_eq!(Rank::Form.next(), None);
        assert!(Rank::Form.below().is_empty());
        assert_eq!(Rank::Variety.below(), &[Rank::Form]);
        assert_eq!(Rank::Family.below()[0], Rank::Subfamily);
    }

    #[test]
    fn test_normalize_sorts_and_dedups() {
        let ranks = [Rank::Genus, Rank::Subfamily, Rank::Genus, Rank::Tribe];
        assert_eq!(
            Rank::normalize(&ranks),
            vec![Rank::Subfamily, Rank::Tribe, Rank::Genus]
        );
    }

    #[test]
    fn test_validate_below() {
        assert!(Rank::validate_below(Rank::Family, &[Rank::Subfamily, Rank::Genus]).is_ok());

        let err = Rank::validate_below(Rank::Family, &[Rank::Family, Rank::Order]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("family"));
        assert!(msg.contains("order"));
    }
}
