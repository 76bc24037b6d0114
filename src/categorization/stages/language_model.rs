use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    Error,
    candidate::NewCandidate,
    categorization::{
        classifier::{CategorySuggestion, LanguageModelClassifier, is_valid_confidence},
        stage::{CategorizationStage, StageKind, StageOutcome},
        stores::CategoryStore,
    },
    database_id::TransactionId,
    transaction::Transaction,
};

/// Asks a language model to suggest categories.
///
/// Suggestions always become candidates, this stage never auto-applies.
pub struct LanguageModelStage {
    classifier: Option<Arc<dyn LanguageModelClassifier>>,
    categories: Arc<dyn CategoryStore>,
    enabled: bool,
}

impl LanguageModelStage {
    pub fn new(
        classifier: Option<Arc<dyn LanguageModelClassifier>>,
        categories: Arc<dyn CategoryStore>,
        enabled: bool,
    ) -> Self {
        Self {
            classifier,
            categories,
            enabled,
        }
    }
}

#[async_trait]
impl CategorizationStage for LanguageModelStage {
    fn kind(&self) -> StageKind {
        StageKind::LanguageModel
    }

    async fn is_available(&self) -> bool {
        match (&self.classifier, self.enabled) {
            (Some(classifier), true) => classifier.is_available().await,
            _ => false,
        }
    }

    async fn handle(
        &self,
        batch: Vec<Transaction>,
        cancellation: &CancellationToken,
    ) -> Result<StageOutcome, Error> {
        let Some(classifier) = self.classifier.as_ref() else {
            return Ok(StageOutcome::unresolved(batch));
        };

        let categories = self.categories.get_all_categories()?;
        let responses = match classifier.suggest(&batch, &categories, cancellation).await {
            Ok(responses) => responses,
            Err(error) if error.is_anticipated() => {
                tracing::warn!(
                    "Language model failed, passing on {} transactions: {error}",
                    batch.len()
                );
                return Ok(StageOutcome::unresolved(batch));
            }
            Err(error) => return Err(Error::ClassifierError(error)),
        };

        let known_categories: HashSet<_> = categories.iter().map(|category| category.id).collect();
        let mut suggestions: HashMap<TransactionId, Vec<CategorySuggestion>> = HashMap::new();
        for response in responses {
            suggestions
                .entry(response.transaction_id)
                .or_default()
                .extend(response.suggestions);
        }

        let mut outcome = StageOutcome::default();

        for transaction in batch {
            let mut suggested_categories = HashSet::new();
            let candidates: Vec<NewCandidate> = suggestions
                .remove(&transaction.id)
                .unwrap_or_default()
                .into_iter()
                .filter(|suggestion| known_categories.contains(&suggestion.category_id))
                .filter(|suggestion| {
                    let valid = is_valid_confidence(suggestion.confidence);
                    if !valid {
                        tracing::warn!(
                            "Dropping suggestion for transaction {} with confidence {}",
                            transaction.id,
                            suggestion.confidence
                        );
                    }
                    valid
                })
                .filter(|suggestion| suggested_categories.insert(suggestion.category_id))
                .map(|suggestion| NewCandidate {
                    transaction_id: transaction.id,
                    category_id: suggestion.category_id,
                    method: self.kind().method(),
                    confidence: suggestion.confidence,
                    reasoning: suggestion.reasoning,
                    processor: self.kind().name().to_owned(),
                    source_id: None,
                    suggest_rule: suggestion.suggest_rule && !suggestion.requires_review,
                })
                .collect();

            if candidates.is_empty() {
                outcome.unresolved.push(transaction);
            } else {
                outcome.candidates.extend(candidates);
            }
        }

        Ok(outcome)
    }
}
