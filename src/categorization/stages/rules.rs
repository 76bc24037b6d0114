use std::{
    collections::{HashMap, hash_map::Entry},
    sync::Arc,
};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use crate::{
    Error,
    candidate::NewCandidate,
    categorization::{
        result::AutoApplied,
        stage::{CategorizationStage, StageKind, StageOutcome},
        stores::RuleStore,
    },
    database_id::UserId,
    rule::RuleMatcher,
    transaction::Transaction,
};

/// Categorizes transactions with the owner's rules.
pub struct RulesStage {
    rules: Arc<dyn RuleStore>,
    auto_apply_threshold: Decimal,
}

impl RulesStage {
    /// Create the stage over the rules in `rules`.
    pub fn new(rules: Arc<dyn RuleStore>, auto_apply_threshold: Decimal) -> Self {
        Self {
            rules,
            auto_apply_threshold,
        }
    }
}

#[async_trait]
impl CategorizationStage for RulesStage {
    fn kind(&self) -> StageKind {
        StageKind::Rules
    }

    async fn handle(
        &self,
        batch: Vec<Transaction>,
        cancellation: &CancellationToken,
    ) -> Result<StageOutcome, Error> {
        let mut outcome = StageOutcome::default();
        // Rules are loaded and sorted once per user for the whole batch.
        let mut matchers: HashMap<UserId, RuleMatcher> = HashMap::new();
        let mut transactions = batch.into_iter();

        while let Some(transaction) = transactions.next() {
            if cancellation.is_cancelled() {
                tracing::debug!("Rules stage cancelled, passing on the remaining transactions");
                outcome.unresolved.push(transaction);
                outcome.unresolved.extend(transactions);
                break;
            }

            let matcher = match matchers.entry(transaction.user_id) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let rules = self.rules.get_active_rules_for_user(transaction.user_id)?;
                    entry.insert(RuleMatcher::new(rules))
                }
            };

            let Some(found) = matcher.find_match(&transaction) else {
                outcome.unresolved.push(transaction);
                continue;
            };

            if found.confidence >= self.auto_apply_threshold {
                outcome.auto_applied.push(AutoApplied {
                    transaction_id: transaction.id,
                    category_id: found.category_id,
                    confidence: found.confidence,
                    method: self.kind().method(),
                    processor: self.kind().name().to_owned(),
                    source_id: Some(found.rule_id),
                });
            } else {
                outcome.candidates.push(NewCandidate {
                    transaction_id: transaction.id,
                    category_id: found.category_id,
                    method: self.kind().method(),
                    confidence: found.confidence,
                    reasoning: Some(format!("Matched rule \"{}\"", found.rule_name)),
                    processor: self.kind().name().to_owned(),
                    source_id: Some(found.rule_id),
                    suggest_rule: false,
                });
            }
        }

        Ok(outcome)
    }
}
