use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::{
    category::CategoryId,
    database_id::{DatabaseId, UserId},
};

/// Database identifier for a bank category mapping.
pub type BankCategoryMappingId = DatabaseId;

/// The factor applied to the confidence of a fuzzy match.
pub const FUZZY_MATCH_FACTOR: Decimal = dec!(0.9);
/// The lowest confidence a mapping can be given.
pub const MIN_MAPPING_CONFIDENCE: Decimal = dec!(0.1);

/// A learned mapping from a category name supplied by the bank to a local category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BankCategoryMapping {
    pub id: BankCategoryMappingId,
    pub user_id: UserId,
    /// The category name as the bank or data provider spells it.
    pub provider_category: String,
    pub category_id: CategoryId,
    /// How much the mapping is trusted before any overrides, between 0 and 1.
    pub confidence: Decimal,
    /// How many times the mapping was applied to a transaction.
    pub application_count: i64,
    /// How many times the user replaced the mapped category.
    pub override_count: i64,
}

impl BankCategoryMapping {
    /// The fraction of the mapping's uses that the user overrode.
    pub fn override_rate(&self) -> Decimal {
        let uses = self.application_count + self.override_count;
        if uses <= 0 {
            return Decimal::ZERO;
        }

        (Decimal::from(self.override_count) / Decimal::from(uses))
            .clamp(Decimal::ZERO, Decimal::ONE)
    }
}

/// Whether a mapping was found by exact or fuzzy comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingMatchKind {
    Exact,
    Fuzzy,
}

/// A mapping found for a provider category.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingMatch {
    /// The mapping that matched.
    pub mapping: BankCategoryMapping,
    /// Whether the provider category matched exactly or fuzzily.
    pub kind: MappingMatchKind,
}

impl MappingMatch {
    /// The confidence of categorizing a transaction with this mapping.
    ///
    /// The mapping's confidence is reduced by its override rate and, for fuzzy
    /// matches, by [FUZZY_MATCH_FACTOR], then clamped to
    /// [MIN_MAPPING_CONFIDENCE, 1].
    pub fn confidence(&self) -> Decimal {
        let mut confidence =
            self.mapping.confidence * (Decimal::ONE - self.mapping.override_rate());

        if self.kind == MappingMatchKind::Fuzzy {
            confidence *= FUZZY_MATCH_FACTOR;
        }

        confidence.clamp(MIN_MAPPING_CONFIDENCE, Decimal::ONE)
    }
}

/// Normalise a provider category name for comparison.
///
/// Case, surrounding whitespace, repeated whitespace and the punctuation
/// providers use as separators are ignored.
pub fn normalize_provider_category(provider_category: &str) -> String {
    provider_category
        .to_lowercase()
        .replace(['&', '/', '-', '_', ','], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
