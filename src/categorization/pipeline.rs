//! Runs batches of transactions through the stages and persists the outcome.

use std::{
    collections::HashSet,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use rust_decimal::Decimal;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use crate::{
    Error,
    candidate::NewCandidate,
    categorization::{
        CategorizationMethod,
        classifier::{LanguageModelClassifier, StatisticalClassifier},
        result::{AutoApplied, CategorizationResult, PipelineMetrics, StageMetrics},
        stage::{CategorizationStage, STAGE_ORDER, StageKind},
        stages::{BankCategoryStage, LanguageModelStage, RulesStage, StatisticalStage},
        stores::PipelineStores,
    },
    config::CategorizationConfig,
    transaction::{CategorizationMetadata, Transaction},
};

/// Something that categorizes batches of transactions.
///
/// Implementations never fail: problems are reported in the result's
/// [PipelineMetrics::errors] and the affected transactions are returned as
/// remaining.
#[async_trait]
pub trait Categorize: Send + Sync {
    async fn categorize(&self, transactions: Vec<Transaction>) -> CategorizationResult {
        self.categorize_with_cancellation(transactions, &CancellationToken::new())
            .await
    }

    /// Categorize `transactions`, stopping before the next stage once
    /// `cancellation` is cancelled.
    ///
    /// Work finished before the cancellation is kept and persisted.
    async fn categorize_with_cancellation(
        &self,
        transactions: Vec<Transaction>,
        cancellation: &CancellationToken,
    ) -> CategorizationResult;
}

/// The categorization pipeline.
///
/// Transactions go through the stages in [STAGE_ORDER]. A stage only receives
/// the transactions that the stages before it neither auto-applied nor turned
/// into candidates.
pub struct CategorizationPipeline {
    stages: Vec<Box<dyn CategorizationStage>>,
    stores: PipelineStores,
    config: CategorizationConfig,
}

impl CategorizationPipeline {
    /// Start building a pipeline.
    ///
    /// Every stage is added. A model stage without a classifier reports
    /// itself unavailable and passes its input through.
    pub fn builder(stores: PipelineStores, config: CategorizationConfig) -> PipelineBuilder {
        PipelineBuilder {
            stores,
            config,
            statistical_classifier: None,
            language_model: None,
        }
    }

    /// The kinds of the pipeline's stages in the order they run.
    pub fn stage_kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(|stage| stage.kind()).collect()
    }

    /// The thresholds and limits the pipeline runs with.
    pub fn config(&self) -> &CategorizationConfig {
        &self.config
    }

    async fn run_batch(
        &self,
        batch: Vec<Transaction>,
        cancellation: &CancellationToken,
    ) -> CategorizationResult {
        let start_time = Instant::now();
        let mut result = CategorizationResult::unresolved(batch.clone());

        match self
            .classify(batch, cancellation, &mut result.metrics)
            .await
        {
            Ok(classified) => {
                result.auto_applied = classified.auto_applied;
                result.candidates = classified.candidates;
                result.remaining_transactions = classified.remaining;
                result.metrics.estimated_cost_savings = Decimal::from(classified.resolved_early)
                    * self.config.cost_guard.cost_per_transaction;

                self.persist(&mut result);
            }
            Err(error) => {
                // The batch stays as it was and nothing decided so far is kept.
                tracing::error!(
                    "Categorization of {} transactions failed: {error}",
                    result.metrics.total_transactions
                );
                result.metrics.stages.clear();
                result
                    .metrics
                    .errors
                    .push(format!("categorization failed: {error}"));
            }
        }

        result.metrics.duration = start_time.elapsed();
        result
    }

    async fn classify(
        &self,
        batch: Vec<Transaction>,
        cancellation: &CancellationToken,
        metrics: &mut PipelineMetrics,
    ) -> Result<Classified, Error> {
        let mut classified = Classified {
            remaining: batch,
            ..Default::default()
        };
        let mut seen_candidates = HashSet::new();

        for stage in &self.stages {
            if classified.remaining.is_empty() {
                break;
            }

            if cancellation.is_cancelled() {
                tracing::info!(
                    "Categorization cancelled before the {} stage, {} transactions remain",
                    stage.kind(),
                    classified.remaining.len()
                );
                metrics.cancelled = true;
                break;
            }

            if !stage.is_available().await {
                tracing::debug!("Skipping the {} stage because it is unavailable", stage.kind());
                continue;
            }

            let stage_start = Instant::now();
            let input = std::mem::take(&mut classified.remaining);
            let processed = input.len();
            let outcome = stage.handle(input, cancellation).await?;

            let resolved: HashSet<_> = outcome
                .auto_applied
                .iter()
                .map(|applied| applied.transaction_id)
                .chain(
                    outcome
                        .candidates
                        .iter()
                        .map(|candidate| candidate.transaction_id),
                )
                .collect();

            classified.remaining = outcome
                .unresolved
                .into_iter()
                .filter(|transaction| !resolved.contains(&transaction.id))
                .collect();

            let candidate_count = outcome.candidates.len();
            let auto_applied_count = outcome.auto_applied.len();
            classified.auto_applied.extend(outcome.auto_applied);
            classified.candidates.extend(
                outcome
                    .candidates
                    .into_iter()
                    .filter(|candidate| seen_candidates.insert(candidate_key(candidate))),
            );

            let stage_metrics = StageMetrics {
                stage: stage.kind(),
                processed,
                auto_applied: auto_applied_count,
                candidates: candidate_count,
                unresolved: classified.remaining.len(),
                duration: stage_start.elapsed(),
            };

            tracing::debug!(
                "{} stage: {} processed, {} auto-applied, {} candidates, {} unresolved in {:.2}ms",
                stage_metrics.stage,
                stage_metrics.processed,
                stage_metrics.auto_applied,
                stage_metrics.candidates,
                stage_metrics.unresolved,
                stage_metrics.duration.as_secs_f64() * 1000.0
            );

            if stage.kind() != StageKind::LanguageModel {
                classified.resolved_early += stage_metrics.resolved();
            }

            metrics.record_stage(stage_metrics);
        }

        Ok(classified)
    }

    /// Write candidates and auto-applied categories, then update the rule and
    /// bank category mapping statistics.
    ///
    /// Failures are logged and recorded in the result, the remaining steps
    /// still run.
    fn persist(&self, result: &mut CategorizationResult) {
        let mut errors = Vec::new();

        // Only candidates actually inserted count, pending duplicates are skipped.
        let saved_candidates = match self.stores.candidates.create_many(&result.candidates) {
            Ok(saved) => saved,
            Err(error) => {
                tracing::error!("Could not save {} candidates: {error}", result.candidates.len());
                errors.push(format!("could not save candidates: {error}"));
                Vec::new()
            }
        };

        let categorized_at = OffsetDateTime::now_utc();
        let mut transactions = Vec::with_capacity(result.auto_applied.len());
        let mut applied = Vec::with_capacity(result.auto_applied.len());

        for auto_applied in &result.auto_applied {
            match self.stores.transactions.get_by_id(auto_applied.transaction_id) {
                Ok(mut transaction) => {
                    transaction.apply_category(
                        auto_applied.category_id,
                        CategorizationMetadata {
                            method: auto_applied.method,
                            confidence: auto_applied.confidence,
                            source_id: auto_applied.source_id,
                            processor: auto_applied.processor.clone(),
                            categorized_at,
                        },
                    );
                    transactions.push(transaction);
                    applied.push(auto_applied);
                }
                Err(error) => {
                    tracing::error!(
                        "Could not load transaction {} to apply its category: {error}",
                        auto_applied.transaction_id
                    );
                    errors.push(format!(
                        "could not load transaction {}: {error}",
                        auto_applied.transaction_id
                    ));
                }
            }
        }

        let categories_saved = match self.stores.transactions.bulk_save(&transactions) {
            Ok(()) => true,
            Err(error) => {
                tracing::error!("Could not save {} categories: {error}", transactions.len());
                errors.push(format!("could not save categories: {error}"));
                false
            }
        };

        let mut rule_ids = Vec::new();
        let mut mapping_ids = Vec::new();

        if categories_saved {
            for auto_applied in &applied {
                match (auto_applied.method, auto_applied.source_id) {
                    (CategorizationMethod::Rule, Some(rule_id)) => rule_ids.push(rule_id),
                    (CategorizationMethod::BankCategory, Some(mapping_id)) => {
                        mapping_ids.push(mapping_id)
                    }
                    _ => {}
                }
            }
        }

        rule_ids.extend(
            saved_candidates
                .iter()
                .filter(|candidate| candidate.method == CategorizationMethod::Rule)
                .filter_map(|candidate| candidate.source_id),
        );

        if let Err(error) = self.stores.rules.record_matches(&rule_ids) {
            tracing::error!("Could not update rule statistics: {error}");
            errors.push(format!("could not update rule statistics: {error}"));
        }

        if let Err(error) = self.stores.bank_categories.record_applications(&mapping_ids) {
            tracing::error!("Could not update bank category mapping statistics: {error}");
            errors.push(format!(
                "could not update bank category mapping statistics: {error}"
            ));
        }

        result.metrics.errors.extend(errors);
    }
}

#[async_trait]
impl Categorize for CategorizationPipeline {
    async fn categorize_with_cancellation(
        &self,
        transactions: Vec<Transaction>,
        cancellation: &CancellationToken,
    ) -> CategorizationResult {
        let start_time = Instant::now();
        let mut result = CategorizationResult::default();
        let mut transactions = transactions.into_iter().peekable();
        let chunk_size = self.config.max_batch_size.max(1);

        while transactions.peek().is_some() {
            let chunk: Vec<Transaction> = transactions.by_ref().take(chunk_size).collect();
            let chunk_result = self.run_batch(chunk, cancellation).await;
            result.merge(chunk_result);
        }

        result.metrics.duration = start_time.elapsed();
        log_summary(&result, result.metrics.duration);

        result
    }
}

/// Builds a [CategorizationPipeline] with the stages in [STAGE_ORDER].
pub struct PipelineBuilder {
    stores: PipelineStores,
    config: CategorizationConfig,
    statistical_classifier: Option<Arc<dyn StatisticalClassifier>>,
    language_model: Option<Arc<dyn LanguageModelClassifier>>,
}

impl PipelineBuilder {
    /// Add the statistical stage.
    pub fn statistical_classifier(mut self, classifier: Arc<dyn StatisticalClassifier>) -> Self {
        self.statistical_classifier = Some(classifier);
        self
    }

    /// Add the language model stage.
    pub fn language_model(mut self, classifier: Arc<dyn LanguageModelClassifier>) -> Self {
        self.language_model = Some(classifier);
        self
    }

    /// Finish the pipeline with its stages in pipeline order.
    pub fn build(self) -> CategorizationPipeline {
        let stages = STAGE_ORDER
            .iter()
            .map(|kind| -> Box<dyn CategorizationStage> {
                match kind {
                    StageKind::Rules => Box::new(RulesStage::new(
                        self.stores.rules.clone(),
                        self.config.rule_auto_apply_threshold,
                    )),
                    StageKind::BankCategory => Box::new(BankCategoryStage::new(
                        self.stores.bank_categories.clone(),
                        self.config.bank_category_auto_apply_threshold,
                    )),
                    StageKind::StatisticalModel => Box::new(StatisticalStage::new(
                        self.statistical_classifier.clone(),
                        self.stores.categories.clone(),
                        self.config.enable_statistical_model,
                        self.config.statistical_auto_apply_threshold,
                    )),
                    StageKind::LanguageModel => Box::new(LanguageModelStage::new(
                        self.language_model.clone(),
                        self.stores.categories.clone(),
                        self.config.enable_language_model,
                    )),
                }
            })
            .collect();

        CategorizationPipeline {
            stages,
            stores: self.stores,
            config: self.config,
        }
    }
}

#[derive(Default)]
struct Classified {
    auto_applied: Vec<AutoApplied>,
    candidates: Vec<NewCandidate>,
    remaining: Vec<Transaction>,
    /// Transactions resolved before the language model stage.
    resolved_early: usize,
}

fn candidate_key(candidate: &NewCandidate) -> (i64, CategorizationMethod, i64) {
    (
        candidate.transaction_id,
        candidate.method,
        candidate.category_id,
    )
}

fn log_summary(result: &CategorizationResult, duration: Duration) {
    let summary = result.summary();

    tracing::info!(
        "Categorized {} transactions in {:.2}ms: {} auto-applied, {} candidates, {} remaining ({}% resolved, estimated savings {})",
        summary.total_transactions,
        duration.as_secs_f64() * 1000.0,
        summary.auto_applied,
        summary.candidates,
        summary.remaining,
        summary.success_rate,
        summary.estimated_cost_savings,
    );

    if !summary.errors.is_empty() {
        tracing::warn!(
            "Categorization finished with {} errors: {:?}",
            summary.errors.len(),
            summary.errors
        );
    }
}
