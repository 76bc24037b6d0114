//! Interfaces to the external classifiers used by the model stages.
//!
//! The crate does not ship a model. A deployment injects implementations of
//! these traits, e.g. an HTTP client for a language model provider.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    category::{Category, CategoryId},
    database_id::TransactionId,
    transaction::Transaction,
};

/// The errors a classifier may return.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClassifierError {
    /// The classifier is switched off or not configured.
    #[error("the classifier is unavailable: {0}")]
    Unavailable(String),

    /// The classifier could not be reached.
    #[error("could not reach the classifier: {0}")]
    Network(String),

    /// The classifier did not answer in time.
    #[error("the classifier timed out")]
    Timeout,

    /// The request was cancelled by the caller.
    #[error("the classification was cancelled")]
    Cancelled,

    /// Anything else, e.g. a malformed response.
    #[error("the classifier failed: {0}")]
    Unexpected(String),
}

impl ClassifierError {
    /// Whether the failure is one the pipeline recovers from by leaving the
    /// stage's transactions for the next stage.
    pub fn is_anticipated(&self) -> bool {
        !matches!(self, ClassifierError::Unexpected(_))
    }
}

/// A category predicted by the statistical model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub transaction_id: TransactionId,
    pub category_id: CategoryId,
    /// Between 0 and 1.
    pub confidence: Decimal,
}

/// Whether `confidence` lies between 0 and 1 inclusive.
///
/// Classifiers are external, the stages drop any answer that fails this.
pub(crate) fn is_valid_confidence(confidence: Decimal) -> bool {
    (Decimal::ZERO..=Decimal::ONE).contains(&confidence)
}

/// A model trained on the user's categorized transactions.
#[async_trait]
pub trait StatisticalClassifier: Send + Sync {
    /// Predict categories for `transactions`.
    ///
    /// The classifier may return at most one prediction per transaction and
    /// may leave out transactions it cannot classify.
    async fn classify(
        &self,
        transactions: &[Transaction],
        categories: &[Category],
        cancellation: &CancellationToken,
    ) -> Result<Vec<Prediction>, ClassifierError>;
}

/// One category suggested by the language model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySuggestion {
    pub category_id: CategoryId,
    pub confidence: Decimal,
    pub reasoning: Option<String>,
    /// Whether the model itself flagged the suggestion as uncertain.
    /// A flagged suggestion never proposes a rule.
    pub requires_review: bool,
    /// Whether the model thinks a rule would categorize similar transactions.
    pub suggest_rule: bool,
}

/// The ranked suggestions for one transaction, best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionSuggestions {
    pub transaction_id: TransactionId,
    pub suggestions: Vec<CategorySuggestion>,
}

/// A large language model asked to suggest categories.
#[async_trait]
pub trait LanguageModelClassifier: Send + Sync {
    /// Check that the model can be reached.
    async fn is_available(&self) -> bool;

    /// Suggest categories for `transactions`, choosing from `categories`.
    async fn suggest(
        &self,
        transactions: &[Transaction],
        categories: &[Category],
        cancellation: &CancellationToken,
    ) -> Result<Vec<TransactionSuggestions>, ClassifierError>;
}
