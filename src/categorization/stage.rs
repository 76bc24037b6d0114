//! The contract shared by the pipeline stages.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    Error,
    candidate::NewCandidate,
    categorization::{CategorizationMethod, result::AutoApplied},
    transaction::Transaction,
};

/// The kinds of stage, from cheapest to most expensive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Rules,
    BankCategory,
    StatisticalModel,
    LanguageModel,
}

/// The order the pipeline runs its stages in.
///
/// Each stage only sees the transactions the stages before it left
/// unresolved, so cheap deterministic strategies shield the expensive ones.
pub const STAGE_ORDER: [StageKind; 4] = [
    StageKind::Rules,
    StageKind::BankCategory,
    StageKind::StatisticalModel,
    StageKind::LanguageModel,
];

impl StageKind {
    /// The name recorded as the processor of the categories a stage produces.
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Rules => "rules",
            StageKind::BankCategory => "bank_category",
            StageKind::StatisticalModel => "statistical_model",
            StageKind::LanguageModel => "language_model",
        }
    }

    /// The method recorded on transactions categorized by this stage.
    pub fn method(&self) -> CategorizationMethod {
        match self {
            StageKind::Rules => CategorizationMethod::Rule,
            StageKind::BankCategory => CategorizationMethod::BankCategory,
            StageKind::StatisticalModel => CategorizationMethod::Statistical,
            StageKind::LanguageModel => CategorizationMethod::LanguageModel,
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// What a stage decided for its input.
///
/// Every input transaction is in exactly one of: an auto-applied category,
/// one or more candidates, or `unresolved`.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StageOutcome {
    pub auto_applied: Vec<AutoApplied>,
    pub candidates: Vec<NewCandidate>,
    pub unresolved: Vec<Transaction>,
}

impl StageOutcome {
    /// An outcome that leaves every transaction for the next stage.
    pub fn unresolved(transactions: Vec<Transaction>) -> Self {
        Self {
            unresolved: transactions,
            ..Default::default()
        }
    }
}

/// One strategy for categorizing transactions.
#[async_trait]
pub trait CategorizationStage: Send + Sync {
    fn kind(&self) -> StageKind;

    /// Whether the stage is switched on and can reach what it depends on.
    ///
    /// The pipeline skips unavailable stages.
    async fn is_available(&self) -> bool {
        true
    }

    /// Categorize `batch`.
    ///
    /// Failures the stage can recover from leave the whole batch unresolved.
    ///
    /// # Errors
    /// Returns an error for unexpected failures, which abort the pipeline run.
    async fn handle(
        &self,
        batch: Vec<Transaction>,
        cancellation: &CancellationToken,
    ) -> Result<StageOutcome, Error>;
}
