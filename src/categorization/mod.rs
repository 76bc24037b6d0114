//! The categorization pipeline.
//!
//! A batch of transactions runs through a fixed sequence of stages: rules,
//! bank category mappings, a statistical model, then a language model. Each
//! stage either auto-applies a category, records candidates for review, or
//! leaves the transaction for the next stage. See [CategorizationPipeline].

mod classifier;
mod cost_guard;
mod endpoints;
mod job;
mod method;
mod pipeline;
mod result;
mod stage;
mod stages;
mod stores;

pub use classifier::{
    CategorySuggestion, ClassifierError, LanguageModelClassifier, Prediction,
    StatisticalClassifier, TransactionSuggestions,
};
pub use cost_guard::{Clock, CostGuard, SystemClock};
pub use endpoints::{
    accept_candidate_endpoint, categorize_endpoint, correct_category_endpoint,
    enqueue_categorization_endpoint, get_pending_candidates_endpoint, reject_candidate_endpoint,
};
pub use job::{CategorizationJob, JobQueue, spawn_categorization_worker};
pub use method::CategorizationMethod;
pub use pipeline::{Categorize, CategorizationPipeline, PipelineBuilder};
pub use result::{
    AutoApplied, CategorizationResult, CategorizationSummary, PipelineMetrics, StageMetrics,
    StageSummary,
};
pub use stage::{CategorizationStage, STAGE_ORDER, StageKind, StageOutcome};
pub use stages::{BankCategoryStage, LanguageModelStage, RulesStage, StatisticalStage};
pub use stores::{
    BankCategoryStore, CandidateStore, CategoryStore, PipelineStores, RuleStore,
    SQLiteCategorizationStore, TransactionStore,
};

#[cfg(test)]
pub(crate) use classifier::fakes;
