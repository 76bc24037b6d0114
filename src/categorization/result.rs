//! The aggregate returned by a pipeline run.

use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::{
    candidate::NewCandidate,
    categorization::{CategorizationMethod, stage::StageKind},
    category::CategoryId,
    database_id::{DatabaseId, TransactionId},
    transaction::Transaction,
};

/// A category that is written to a transaction without review.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutoApplied {
    pub transaction_id: TransactionId,
    pub category_id: CategoryId,
    pub confidence: Decimal,
    pub method: CategorizationMethod,
    pub processor: String,
    /// The rule or bank category mapping that produced the category.
    pub source_id: Option<DatabaseId>,
}

/// Counts and timing for one stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageMetrics {
    pub stage: StageKind,
    /// Transactions given to the stage.
    pub processed: usize,
    /// Transactions the stage categorized without review.
    pub auto_applied: usize,
    /// Candidates the stage created, possibly several per transaction.
    pub candidates: usize,
    /// Transactions the stage passed on.
    pub unresolved: usize,
    pub duration: Duration,
}

impl StageMetrics {
    /// Empty metrics for `stage`.
    pub fn new(stage: StageKind) -> Self {
        Self {
            stage,
            processed: 0,
            auto_applied: 0,
            candidates: 0,
            unresolved: 0,
            duration: Duration::ZERO,
        }
    }

    /// Transactions the stage either categorized or sent to review.
    pub fn resolved(&self) -> usize {
        self.processed.saturating_sub(self.unresolved)
    }

    fn merge(&mut self, other: &StageMetrics) {
        self.processed += other.processed;
        self.auto_applied += other.auto_applied;
        self.candidates += other.candidates;
        self.unresolved += other.unresolved;
        self.duration += other.duration;
    }
}

/// Metrics for a pipeline run.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct PipelineMetrics {
    pub total_transactions: usize,
    /// One entry for each stage that ran, in the order they ran.
    pub stages: Vec<StageMetrics>,
    pub duration: Duration,
    /// The language model cost avoided by resolving transactions in the earlier stages.
    pub estimated_cost_savings: Decimal,
    /// Errors that were logged and skipped during the run.
    pub errors: Vec<String>,
    /// Whether the run stopped early because it was cancelled.
    pub cancelled: bool,
}

impl PipelineMetrics {
    /// The metrics of `stage`, if it ran.
    pub fn stage(&self, stage: StageKind) -> Option<&StageMetrics> {
        self.stages.iter().find(|metrics| metrics.stage == stage)
    }

    pub(crate) fn record_stage(&mut self, metrics: StageMetrics) {
        match self
            .stages
            .iter_mut()
            .find(|existing| existing.stage == metrics.stage)
        {
            Some(existing) => existing.merge(&metrics),
            None => {
                self.stages.push(metrics);
                self.stages.sort_by_key(|metrics| metrics.stage);
            }
        }
    }

    fn merge(&mut self, other: PipelineMetrics) {
        self.total_transactions += other.total_transactions;
        for stage in other.stages {
            self.record_stage(stage);
        }
        self.duration += other.duration;
        self.estimated_cost_savings += other.estimated_cost_savings;
        self.errors.extend(other.errors);
        self.cancelled |= other.cancelled;
    }
}

/// Everything a pipeline run decided.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CategorizationResult {
    pub auto_applied: Vec<AutoApplied>,
    pub candidates: Vec<NewCandidate>,
    /// Transactions no stage could categorize or suggest a category for.
    pub remaining_transactions: Vec<Transaction>,
    pub metrics: PipelineMetrics,
}

impl CategorizationResult {
    /// A result for a run over `transactions` that categorized nothing.
    pub fn unresolved(transactions: Vec<Transaction>) -> Self {
        Self {
            metrics: PipelineMetrics {
                total_transactions: transactions.len(),
                ..Default::default()
            },
            remaining_transactions: transactions,
            ..Default::default()
        }
    }

    /// Accumulate the result of another run into this one.
    pub fn merge(&mut self, other: CategorizationResult) {
        self.auto_applied.extend(other.auto_applied);
        self.candidates.extend(other.candidates);
        self.remaining_transactions
            .extend(other.remaining_transactions);
        self.metrics.merge(other.metrics);
    }

    /// The number of transactions that were auto-applied or sent to review.
    pub fn resolved_count(&self) -> usize {
        self.metrics
            .total_transactions
            .saturating_sub(self.remaining_transactions.len())
    }

    pub fn summary(&self) -> CategorizationSummary {
        let total = self.metrics.total_transactions;

        CategorizationSummary {
            total_transactions: total,
            auto_applied: self.auto_applied.len(),
            candidates: self.candidates.len(),
            remaining: self.remaining_transactions.len(),
            success_rate: percentage(self.resolved_count(), total),
            stages: self
                .metrics
                .stages
                .iter()
                .map(|metrics| StageSummary {
                    stage: metrics.stage,
                    processed: metrics.processed,
                    auto_applied: metrics.auto_applied,
                    candidates: metrics.candidates,
                    unresolved: metrics.unresolved,
                    resolved_percentage: percentage(metrics.resolved(), total),
                    duration_ms: metrics.duration.as_millis(),
                })
                .collect(),
            duration_ms: self.metrics.duration.as_millis(),
            estimated_cost_savings: self.metrics.estimated_cost_savings,
            errors: self.metrics.errors.clone(),
            cancelled: self.metrics.cancelled,
        }
    }
}

/// A serializable report of a run, with percentages of the run's input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorizationSummary {
    pub total_transactions: usize,
    pub auto_applied: usize,
    pub candidates: usize,
    /// Transactions no stage could categorize.
    pub remaining: usize,
    /// Percentage of transactions that were auto-applied or sent to review.
    pub success_rate: Decimal,
    pub stages: Vec<StageSummary>,
    pub duration_ms: u128,
    pub estimated_cost_savings: Decimal,
    pub errors: Vec<String>,
    pub cancelled: bool,
}

/// The part of a [CategorizationSummary] for one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage: StageKind,
    pub processed: usize,
    pub auto_applied: usize,
    pub candidates: usize,
    pub unresolved: usize,
    /// Percentage of the run's input this stage resolved.
    pub resolved_percentage: Decimal,
    pub duration_ms: u128,
}

fn percentage(part: usize, total: usize) -> Decimal {
    if total == 0 {
        return Decimal::ZERO;
    }

    (Decimal::from(part) * dec!(100) / Decimal::from(total)).round_dp(2)
}
