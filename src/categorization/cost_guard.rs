//! Tracks the estimated language model spend per UTC day.

use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;
use time::{Date, OffsetDateTime};
use tokio_util::sync::CancellationToken;

use crate::{
    categorization::{Categorize, CategorizationResult, StageKind},
    config::CostGuardConfig,
    transaction::Transaction,
};

/// The source of the current time, replaceable in tests.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> OffsetDateTime;
}

/// Reads the system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

#[derive(Debug, Clone, Copy)]
struct DailySpend {
    day: Date,
    spent: Decimal,
}

/// Wraps a categorizer and warns when a run may go over the daily budget.
///
/// The guard never blocks a run. It estimates the cost of sending the whole
/// batch to the language model, logs a warning if that exceeds what is left
/// of today's budget, and then delegates. Afterwards it adds the cost of the
/// transactions the language model stage actually processed to today's spend.
pub struct CostGuard<C, K = SystemClock> {
    inner: C,
    config: CostGuardConfig,
    clock: K,
    spend: Mutex<DailySpend>,
}

impl<C: Categorize> CostGuard<C, SystemClock> {
    /// Wrap `inner` with a budget that follows the system clock.
    pub fn new(inner: C, config: CostGuardConfig) -> Self {
        Self::with_clock(inner, config, SystemClock)
    }
}

impl<C: Categorize, K: Clock> CostGuard<C, K> {
    /// Wrap `inner` with a budget that follows `clock`.
    pub fn with_clock(inner: C, config: CostGuardConfig, clock: K) -> Self {
        let day = clock.now_utc().date();

        Self {
            inner,
            config,
            clock,
            spend: Mutex::new(DailySpend {
                day,
                spent: Decimal::ZERO,
            }),
        }
    }

    /// The estimated language model spend for the current UTC day.
    pub fn spent_today(&self) -> Decimal {
        let today = self.clock.now_utc().date();
        let spend = self.lock_spend();

        if spend.day == today {
            spend.spent
        } else {
            Decimal::ZERO
        }
    }

    /// The budget left for the current UTC day, never negative.
    pub fn remaining_budget(&self) -> Decimal {
        (self.config.daily_budget - self.spent_today()).max(Decimal::ZERO)
    }

    fn check_budget(&self, batch_size: usize) {
        let estimate = self.config.cost_per_transaction * Decimal::from(batch_size);
        let remaining = self.remaining_budget();

        if estimate > remaining {
            tracing::warn!(
                "Categorizing {batch_size} transactions may cost up to {estimate}, \
                 which exceeds the remaining daily budget of {remaining}"
            );
        }
    }

    fn record_spend(&self, result: &CategorizationResult) {
        let processed = result
            .metrics
            .stage(StageKind::LanguageModel)
            .map_or(0, |metrics| metrics.processed);

        if processed == 0 {
            return;
        }

        let cost = self.config.cost_per_transaction * Decimal::from(processed);
        let today = self.clock.now_utc().date();
        let mut spend = self.lock_spend();

        if spend.day != today {
            *spend = DailySpend {
                day: today,
                spent: Decimal::ZERO,
            };
        }

        spend.spent += cost;
        tracing::debug!(
            "Language model spend today is {} of {}",
            spend.spent,
            self.config.daily_budget
        );
    }

    fn lock_spend(&self) -> std::sync::MutexGuard<'_, DailySpend> {
        self.spend
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl<C: Categorize, K: Clock> Categorize for CostGuard<C, K> {
    async fn categorize_with_cancellation(
        &self,
        transactions: Vec<Transaction>,
        cancellation: &CancellationToken,
    ) -> CategorizationResult {
        if !self.config.enabled {
            return self
                .inner
                .categorize_with_cancellation(transactions, cancellation)
                .await;
        }

        self.check_budget(transactions.len());

        let result = self
            .inner
            .categorize_with_cancellation(transactions, cancellation)
            .await;

        self.record_spend(&result);

        result
    }
}
