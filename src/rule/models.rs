use std::{fmt::Display, str::FromStr};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::{
    category::CategoryId,
    database_id::{DatabaseId, UserId},
};

/// Database identifier for a categorization rule.
pub type RuleId = DatabaseId;
/// Database identifier for a rule condition.
pub type RuleConditionId = DatabaseId;

/// The confidence of a rule that has not learned a confidence of its own yet.
pub const DEFAULT_RULE_CONFIDENCE: Decimal = dec!(0.8);

/// The transaction attribute that a [RuleCondition] inspects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionField {
    Description,
    UserDescription,
    Amount,
    AccountType,
    ReferenceNumber,
    Notes,
    /// A selector stored by a newer or older version of the app that this
    /// version does not know how to evaluate. Never matches.
    Unsupported(String),
}

impl ConditionField {
    /// The name stored in the database.
    pub fn as_str(&self) -> &str {
        match self {
            ConditionField::Description => "description",
            ConditionField::UserDescription => "user_description",
            ConditionField::Amount => "amount",
            ConditionField::AccountType => "account_type",
            ConditionField::ReferenceNumber => "reference_number",
            ConditionField::Notes => "notes",
            ConditionField::Unsupported(field) => field,
        }
    }
}

impl From<&str> for ConditionField {
    fn from(value: &str) -> Self {
        match value {
            "description" => ConditionField::Description,
            "user_description" => ConditionField::UserDescription,
            "amount" => ConditionField::Amount,
            "account_type" => ConditionField::AccountType,
            "reference_number" => ConditionField::ReferenceNumber,
            "notes" => ConditionField::Notes,
            other => ConditionField::Unsupported(other.to_owned()),
        }
    }
}

impl Display for ConditionField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a [RuleCondition] compares the field value to the condition value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Contains,
    NotContains,
    Equals,
    NotEquals,
    StartsWith,
    EndsWith,
    Regex,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    /// An operator this version does not know how to evaluate. Never matches.
    Unsupported(String),
}

impl ConditionOperator {
    /// The name stored in the database.
    pub fn as_str(&self) -> &str {
        match self {
            ConditionOperator::Contains => "contains",
            ConditionOperator::NotContains => "not_contains",
            ConditionOperator::Equals => "equals",
            ConditionOperator::NotEquals => "not_equals",
            ConditionOperator::StartsWith => "starts_with",
            ConditionOperator::EndsWith => "ends_with",
            ConditionOperator::Regex => "regex",
            ConditionOperator::GreaterThan => "greater_than",
            ConditionOperator::GreaterThanOrEqual => "greater_than_or_equal",
            ConditionOperator::LessThan => "less_than",
            ConditionOperator::LessThanOrEqual => "less_than_or_equal",
            ConditionOperator::Unsupported(operator) => operator,
        }
    }

    /// Whether the operator compares numbers rather than text.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ConditionOperator::GreaterThan
                | ConditionOperator::GreaterThanOrEqual
                | ConditionOperator::LessThan
                | ConditionOperator::LessThanOrEqual
        )
    }
}

impl From<&str> for ConditionOperator {
    fn from(value: &str) -> Self {
        match value {
            "contains" => ConditionOperator::Contains,
            "not_contains" => ConditionOperator::NotContains,
            "equals" => ConditionOperator::Equals,
            "not_equals" => ConditionOperator::NotEquals,
            "starts_with" => ConditionOperator::StartsWith,
            "ends_with" => ConditionOperator::EndsWith,
            "regex" => ConditionOperator::Regex,
            "greater_than" => ConditionOperator::GreaterThan,
            "greater_than_or_equal" => ConditionOperator::GreaterThanOrEqual,
            "less_than" => ConditionOperator::LessThan,
            "less_than_or_equal" => ConditionOperator::LessThanOrEqual,
            other => ConditionOperator::Unsupported(other.to_owned()),
        }
    }
}

impl Display for ConditionOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the conditions of a rule are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RuleLogic {
    /// Every condition must match.
    #[default]
    All,
    /// At least one condition must match.
    Any,
}

impl RuleLogic {
    /// The name stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleLogic::All => "all",
            RuleLogic::Any => "any",
        }
    }
}

impl FromStr for RuleLogic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(RuleLogic::All),
            "any" => Ok(RuleLogic::Any),
            other => Err(format!("unknown rule logic \"{other}\"")),
        }
    }
}

/// One atomic predicate of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleCondition {
    pub id: RuleConditionId,
    pub field: ConditionField,
    pub operator: ConditionOperator,
    /// The value to compare the field against.
    pub value: String,
    /// String comparisons ignore case unless this is set.
    pub is_case_sensitive: bool,
    /// Deleted conditions are kept for history but never evaluated.
    pub is_deleted: bool,
}

impl RuleCondition {
    /// Create a condition that has not been saved yet.
    pub fn new(field: ConditionField, operator: ConditionOperator, value: &str) -> Self {
        Self {
            id: 0,
            field,
            operator,
            value: value.to_owned(),
            is_case_sensitive: false,
            is_deleted: false,
        }
    }

    /// Make string comparisons for this condition case-sensitive.
    pub fn case_sensitive(mut self, is_case_sensitive: bool) -> Self {
        self.is_case_sensitive = is_case_sensitive;
        self
    }
}

/// A rule that maps matching transactions to a category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CategorizationRule {
    pub id: RuleId,
    pub user_id: UserId,
    pub name: String,
    /// The category to apply when this rule matches.
    pub category_id: CategoryId,
    /// Rules with a lower priority are evaluated first.
    pub priority: i64,
    pub is_active: bool,
    pub logic: RuleLogic,
    pub conditions: Vec<RuleCondition>,
    /// The pattern of a rule created before rules had conditions.
    ///
    /// Only used when the rule has no live conditions.
    pub pattern: Option<String>,
    /// The operator for [CategorizationRule::pattern], contains when unset.
    pub pattern_operator: Option<ConditionOperator>,
    /// The learned confidence of the rule, [DEFAULT_RULE_CONFIDENCE] when unset.
    pub confidence_score: Option<Decimal>,
    /// How many categorizations the rule has produced.
    pub match_count: i64,
    /// How many of the rule's categorizations were later corrected.
    pub correction_count: i64,
}

impl CategorizationRule {
    /// The fraction of the rule's categorizations that were not corrected.
    ///
    /// A rule without any history is assumed to be accurate.
    pub fn accuracy_rate(&self) -> Decimal {
        if self.match_count <= 0 {
            return Decimal::ONE;
        }

        let correct = Decimal::from(self.match_count - self.correction_count);
        let accuracy = correct / Decimal::from(self.match_count);

        accuracy.clamp(Decimal::ZERO, Decimal::ONE)
    }

    /// The conditions that have not been soft-deleted.
    pub fn live_conditions(&self) -> impl Iterator<Item = &RuleCondition> {
        self.conditions
            .iter()
            .filter(|condition| !condition.is_deleted)
    }
}

/// The data needed to create a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRule {
    pub user_id: UserId,
    pub name: String,
    pub category_id: CategoryId,
    /// Lower values are evaluated first.
    pub priority: i64,
    pub logic: RuleLogic,
    pub conditions: Vec<RuleCondition>,
    pub pattern: Option<String>,
    pub pattern_operator: Option<ConditionOperator>,
    pub confidence_score: Option<Decimal>,
}

impl NewRule {
    /// A rule with a single description condition.
    pub fn with_condition(
        user_id: UserId,
        name: &str,
        category_id: CategoryId,
        priority: i64,
        condition: RuleCondition,
    ) -> Self {
        Self {
            user_id,
            name: name.to_owned(),
            category_id,
            priority,
            logic: RuleLogic::All,
            conditions: vec![condition],
            pattern: None,
            pattern_operator: None,
            confidence_score: None,
        }
    }

    /// Set how the conditions are combined.
    pub fn logic(mut self, logic: RuleLogic) -> Self {
        self.logic = logic;
        self
    }

    /// Add another condition after the existing ones.
    pub fn condition(mut self, condition: RuleCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Set the learned base confidence.
    pub fn confidence_score(mut self, confidence_score: Option<Decimal>) -> Self {
        self.confidence_score = confidence_score;
        self
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::{CategorizationRule, ConditionField, ConditionOperator, RuleLogic};

    fn rule_with_history(match_count: i64, correction_count: i64) -> CategorizationRule {
        CategorizationRule {
            id: 1,
            user_id: 1,
            name: "test".to_owned(),
            category_id: 1,
            priority: 1,
            is_active: true,
            logic: RuleLogic::All,
            conditions: Vec::new(),
            pattern: None,
            pattern_operator: None,
            confidence_score: None,
            match_count,
            correction_count,
        }
    }

    #[test]
    fn accuracy_defaults_to_one_without_history() {
        assert_eq!(rule_with_history(0, 0).accuracy_rate(), dec!(1));
    }

    #[test]
    fn corrections_reduce_accuracy() {
        assert_eq!(rule_with_history(10, 3).accuracy_rate(), dec!(0.7));
    }

    #[test]
    fn accuracy_is_never_negative() {
        assert_eq!(rule_with_history(2, 5).accuracy_rate(), dec!(0));
    }

    #[test]
    fn unknown_selectors_are_preserved() {
        assert_eq!(
            ConditionField::from("merchant_code"),
            ConditionField::Unsupported("merchant_code".to_owned())
        );
        assert_eq!(ConditionField::from("merchant_code").as_str(), "merchant_code");
        assert_eq!(
            ConditionOperator::from("fuzzy"),
            ConditionOperator::Unsupported("fuzzy".to_owned())
        );
    }

    #[test]
    fn only_comparison_operators_are_numeric() {
        assert!(ConditionOperator::GreaterThan.is_numeric());
        assert!(ConditionOperator::LessThanOrEqual.is_numeric());
        assert!(!ConditionOperator::Equals.is_numeric());
        assert!(!ConditionOperator::Regex.is_numeric());
    }
}
