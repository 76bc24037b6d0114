use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use crate::{
    Error,
    candidate::NewCandidate,
    categorization::{
        classifier::{Prediction, StatisticalClassifier, is_valid_confidence},
        result::AutoApplied,
        stage::{CategorizationStage, StageKind, StageOutcome},
        stores::CategoryStore,
    },
    database_id::TransactionId,
    transaction::Transaction,
};

/// Categorizes transactions with an injected statistical model.
pub struct StatisticalStage {
    classifier: Option<Arc<dyn StatisticalClassifier>>,
    categories: Arc<dyn CategoryStore>,
    enabled: bool,
    auto_apply_threshold: Decimal,
}

impl StatisticalStage {
    pub fn new(
        classifier: Option<Arc<dyn StatisticalClassifier>>,
        categories: Arc<dyn CategoryStore>,
        enabled: bool,
        auto_apply_threshold: Decimal,
    ) -> Self {
        Self {
            classifier,
            categories,
            enabled,
            auto_apply_threshold,
        }
    }
}

#[async_trait]
impl CategorizationStage for StatisticalStage {
    fn kind(&self) -> StageKind {
        StageKind::StatisticalModel
    }

    async fn is_available(&self) -> bool {
        self.enabled && self.classifier.is_some()
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
        let predictions = match classifier.classify(&batch, &categories, cancellation).await {
            Ok(predictions) => predictions,
            Err(error) if error.is_anticipated() => {
                tracing::warn!(
                    "Statistical model failed, passing on {} transactions: {error}",
                    batch.len()
                );
                return Ok(StageOutcome::unresolved(batch));
            }
            Err(error) => return Err(Error::ClassifierError(error)),
        };

        let known_categories: HashSet<_> = categories.iter().map(|category| category.id).collect();
        let mut best: HashMap<TransactionId, Prediction> = HashMap::new();

        for prediction in predictions {
            if !known_categories.contains(&prediction.category_id) {
                tracing::debug!(
                    "Ignoring prediction with unknown category {} for transaction {}",
                    prediction.category_id,
                    prediction.transaction_id
                );
                continue;
            }

            if !is_valid_confidence(prediction.confidence) {
                tracing::warn!(
                    "Dropping prediction for transaction {} with confidence {}",
                    prediction.transaction_id,
                    prediction.confidence
                );
                continue;
            }

            match best.get(&prediction.transaction_id) {
                Some(existing) if existing.confidence >= prediction.confidence => {}
                _ => {
                    best.insert(prediction.transaction_id, prediction);
                }
            }
        }

        let mut outcome = StageOutcome::default();

        // Predictions for transactions outside the batch are dropped here.
        for transaction in batch {
            let Some(prediction) = best.remove(&transaction.id) else {
                outcome.unresolved.push(transaction);
                continue;
            };

            if prediction.confidence >= self.auto_apply_threshold {
                outcome.auto_applied.push(AutoApplied {
                    transaction_id: transaction.id,
                    category_id: prediction.category_id,
                    confidence: prediction.confidence,
                    method: self.kind().method(),
                    processor: self.kind().name().to_owned(),
                    source_id: None,
                });
            } else {
                outcome.candidates.push(NewCandidate {
                    transaction_id: transaction.id,
                    category_id: prediction.category_id,
                    method: self.kind().method(),
                    confidence: prediction.confidence,
                    reasoning: Some("Predicted from similar categorized transactions".to_owned()),
                    processor: self.kind().name().to_owned(),
                    source_id: None,
                    suggest_rule: false,
                });
            }
        }

        Ok(outcome)
    }
}
