//! Configuration of the categorization pipeline.
//!
//! The configuration is a plain value passed to the pipeline when it is built.
//! It can be read from a JSON file where every field is optional:
//!
//! ```json
//! {
//!     "rule_auto_apply_threshold": 0.9,
//!     "enable_statistical_model": true,
//!     "cost_guard": { "daily_budget": "2.50" }
//! }
//! ```

use std::{fs, path::Path};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Confidence thresholds, batching and stage switches for the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategorizationConfig {
    /// Rule matches at or above this confidence are applied without review.
    pub rule_auto_apply_threshold: Decimal,
    /// Bank category mappings at or above this confidence are applied without review.
    pub bank_category_auto_apply_threshold: Decimal,
    /// Statistical predictions at or above this confidence are applied without review.
    pub statistical_auto_apply_threshold: Decimal,
    /// Accepted for compatibility with older configuration files.
    ///
    /// Language model suggestions always go to review, so this is never used.
    pub language_model_auto_apply_threshold: Option<Decimal>,
    /// The largest number of transactions sent through the stages at once.
    pub max_batch_size: usize,
    /// Statistical model stage switch, off until a model has been trained.
    pub enable_statistical_model: bool,
    /// Language model stage switch.
    pub enable_language_model: bool,
    /// Language model spend tracking.
    pub cost_guard: CostGuardConfig,
}

impl Default for CategorizationConfig {
    fn default() -> Self {
        Self {
            rule_auto_apply_threshold: dec!(0.95),
            bank_category_auto_apply_threshold: dec!(0.90),
            statistical_auto_apply_threshold: dec!(0.95),
            language_model_auto_apply_threshold: None,
            max_batch_size: 500,
            enable_statistical_model: false,
            enable_language_model: true,
            cost_guard: CostGuardConfig::default(),
        }
    }
}

/// Settings for the daily language model spending estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostGuardConfig {
    /// Whether spend is tracked and over-budget runs are logged.
    pub enabled: bool,
    /// The amount that may be spent on the language model per UTC day.
    pub daily_budget: Decimal,
    /// The estimated cost of sending one transaction to the language model.
    pub cost_per_transaction: Decimal,
}

impl Default for CostGuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            daily_budget: dec!(5.00),
            cost_per_transaction: dec!(0.002),
        }
    }
}

impl CategorizationConfig {
    /// Parse a configuration from JSON and validate it.
    ///
    /// # Errors
    /// Returns an [Error::InvalidConfig] if the JSON is malformed or the
    /// configuration is invalid.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(json)
            .map_err(|error| Error::InvalidConfig(format!("could not parse config: {error}")))?;
        config.validate()?;

        Ok(config)
    }

    /// Read a JSON configuration file and validate it.
    ///
    /// # Errors
    /// Returns an [Error::InvalidConfig] if the file cannot be read, is
    /// malformed or the configuration is invalid.
    pub fn load_from_file(path: &Path) -> Result<Self, Error> {
        let json = fs::read_to_string(path).map_err(|error| {
            Error::InvalidConfig(format!("could not read {}: {error}", path.display()))
        })?;

        Self::from_json(&json)
    }

    /// Check that thresholds are between 0 and 1, the batch size is not zero
    /// and the cost settings are not negative.
    ///
    /// # Errors
    /// Returns an [Error::InvalidConfig] describing the first invalid field.
    pub fn validate(&self) -> Result<(), Error> {
        let thresholds = [
            ("rule_auto_apply_threshold", self.rule_auto_apply_threshold),
            (
                "bank_category_auto_apply_threshold",
                self.bank_category_auto_apply_threshold,
            ),
            (
                "statistical_auto_apply_threshold",
                self.statistical_auto_apply_threshold,
            ),
        ];

        for (name, threshold) in thresholds {
            if threshold < Decimal::ZERO || threshold > Decimal::ONE {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be between 0 and 1, got {threshold}"
                )));
            }
        }

        if self.max_batch_size == 0 {
            return Err(Error::InvalidConfig(
                "max_batch_size must be greater than zero".to_owned(),
            ));
        }

        if self.cost_guard.daily_budget.is_sign_negative()
            || self.cost_guard.cost_per_transaction.is_sign_negative()
        {
            return Err(Error::InvalidConfig(
                "cost_guard amounts cannot be negative".to_owned(),
            ));
        }

        if self.language_model_auto_apply_threshold.is_some() {
            tracing::warn!(
                "language_model_auto_apply_threshold is set but language model suggestions are always reviewed"
            );
        }

        Ok(())
    }
}
