use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use crate::{
    Error,
    bank_category::MappingMatchKind,
    candidate::NewCandidate,
    categorization::{
        result::AutoApplied,
        stage::{CategorizationStage, StageKind, StageOutcome},
        stores::BankCategoryStore,
    },
    transaction::Transaction,
};

/// Categorizes transactions by mapping the category the bank supplied to one
/// of the user's categories.
pub struct BankCategoryStage {
    mappings: Arc<dyn BankCategoryStore>,
    auto_apply_threshold: Decimal,
}

impl BankCategoryStage {
    /// Create the stage over the mappings in `mappings`.
    pub fn new(mappings: Arc<dyn BankCategoryStore>, auto_apply_threshold: Decimal) -> Self {
        Self {
            mappings,
            auto_apply_threshold,
        }
    }
}

#[async_trait]
impl CategorizationStage for BankCategoryStage {
    fn kind(&self) -> StageKind {
        StageKind::BankCategory
    }

    async fn handle(
        &self,
        batch: Vec<Transaction>,
        cancellation: &CancellationToken,
    ) -> Result<StageOutcome, Error> {
        let mut outcome = StageOutcome::default();
        let mut transactions = batch.into_iter();

        while let Some(transaction) = transactions.next() {
            if cancellation.is_cancelled() {
                tracing::debug!(
                    "Bank category stage cancelled, passing on the remaining transactions"
                );
                outcome.unresolved.push(transaction);
                outcome.unresolved.extend(transactions);
                break;
            }

            let Some(bank_category) = transaction
                .bank_category
                .as_deref()
                .map(str::trim)
                .filter(|bank_category| !bank_category.is_empty())
                .map(str::to_owned)
            else {
                outcome.unresolved.push(transaction);
                continue;
            };

            let Some(found) = self
                .mappings
                .find_mapping(transaction.user_id, &bank_category)?
            else {
                outcome.unresolved.push(transaction);
                continue;
            };

            let confidence = found.confidence();

            if confidence >= self.auto_apply_threshold {
                outcome.auto_applied.push(AutoApplied {
                    transaction_id: transaction.id,
                    category_id: found.mapping.category_id,
                    confidence,
                    method: self.kind().method(),
                    processor: self.kind().name().to_owned(),
                    source_id: Some(found.mapping.id),
                });
            } else {
                let reasoning = match found.kind {
                    MappingMatchKind::Exact => {
                        format!("The bank categorized this as \"{bank_category}\"")
                    }
                    MappingMatchKind::Fuzzy => format!(
                        "The bank category \"{bank_category}\" is similar to \"{}\"",
                        found.mapping.provider_category
                    ),
                };

                outcome.candidates.push(NewCandidate {
                    transaction_id: transaction.id,
                    category_id: found.mapping.category_id,
                    method: self.kind().method(),
                    confidence,
                    reasoning: Some(reasoning),
                    processor: self.kind().name().to_owned(),
                    source_id: Some(found.mapping.id),
                    suggest_rule: false,
                });
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use time::macros::date;
    use tokio_util::sync::CancellationToken;

    use crate::{
        Error,
        bank_category::{
            BankCategoryMapping, BankCategoryMappingId, MappingMatch, MappingMatchKind,
            normalize_provider_category,
        },
        categorization::{stage::CategorizationStage, stores::BankCategoryStore},
        database_id::UserId,
        transaction::Transaction,
    };

    use super::BankCategoryStage;

    struct FakeMappings {
        mappings: Vec<BankCategoryMapping>,
    }

    impl BankCategoryStore for FakeMappings {
        fn find_mapping(
            &self,
            user_id: UserId,
            provider_category: &str,
        ) -> Result<Option<MappingMatch>, Error> {
            let wanted = normalize_provider_category(provider_category);

            Ok(self
                .mappings
                .iter()
                .filter(|mapping| mapping.user_id == user_id)
                .find_map(|mapping| {
                    let key = normalize_provider_category(&mapping.provider_category);
                    if key == wanted {
                        Some(MappingMatch {
                            mapping: mapping.clone(),
                            kind: MappingMatchKind::Exact,
                        })
                    } else if wanted.contains(&key) {
                        Some(MappingMatch {
                            mapping: mapping.clone(),
                            kind: MappingMatchKind::Fuzzy,
                        })
                    } else {
                        None
                    }
                }))
        }

        fn record_applications(&self, _mapping_ids: &[BankCategoryMappingId]) -> Result<(), Error> {
            Ok(())
        }

        fn record_override(&self, _mapping_id: BankCategoryMappingId) -> Result<(), Error> {
            Ok(())
        }
    }

    fn mapping(provider_category: &str, confidence: Decimal) -> BankCategoryMapping {
        BankCategoryMapping {
            id: 11,
            user_id: 1,
            provider_category: provider_category.to_owned(),
            category_id: 4,
            confidence,
            application_count: 0,
            override_count: 0,
        }
    }

    fn transaction(id: i64, bank_category: Option<&str>) -> Transaction {
        Transaction::build(1, dec!(-54.20), date!(2025 - 03 - 02), "WALMART #1234")
            .bank_category(bank_category)
            .finalise(id)
    }

    fn stage(mappings: Vec<BankCategoryMapping>) -> BankCategoryStage {
        BankCategoryStage::new(Arc::new(FakeMappings { mappings }), dec!(0.90))
    }

    #[tokio::test]
    async fn exact_mapping_is_auto_applied() {
        let stage = stage(vec![mapping("Groceries", dec!(0.95))]);

        let outcome = stage
            .handle(
                vec![transaction(1, Some("GROCERIES"))],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.auto_applied.len(), 1);
        assert_eq!(outcome.auto_applied[0].category_id, 4);
        assert_eq!(outcome.auto_applied[0].confidence, dec!(0.95));
        assert_eq!(outcome.auto_applied[0].source_id, Some(11));
    }

    #[tokio::test]
    async fn fuzzy_mapping_is_discounted_to_candidate() {
        let stage = stage(vec![mapping("Groceries", dec!(0.95))]);

        let outcome = stage
            .handle(
                vec![transaction(1, Some("Food - Groceries"))],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(outcome.auto_applied.is_empty());
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].confidence, dec!(0.855));
    }

    #[tokio::test]
    async fn transactions_without_bank_category_are_unresolved() {
        let stage = stage(vec![mapping("Groceries", dec!(0.95))]);

        let outcome = stage
            .handle(
                vec![
                    transaction(1, None),
                    transaction(2, Some("  ")),
                    transaction(3, Some("Travel")),
                ],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let unresolved: Vec<_> = outcome.unresolved.iter().map(|t| t.id).collect();
        assert_eq!(unresolved, vec![1, 2, 3]);
    }
}
