//! Selects the rule that categorizes a transaction.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::{
    category::CategoryId,
    rule::{
        condition::evaluate,
        models::{
            CategorizationRule, ConditionField, ConditionOperator, DEFAULT_RULE_CONFIDENCE,
            RuleCondition, RuleId, RuleLogic,
        },
    },
    transaction::Transaction,
};

/// The boost given to a match that was decided by an exact equality.
const EXACT_MATCH_BONUS: Decimal = dec!(0.05);
/// The lowest confidence a rule match is given.
pub const MIN_RULE_CONFIDENCE: Decimal = dec!(0.1);
/// The highest confidence a rule match is given.
pub const MAX_RULE_CONFIDENCE: Decimal = Decimal::ONE;

/// The rule that matched a transaction and how confident the match is.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub rule_id: RuleId,
    pub rule_name: String,
    pub category_id: CategoryId,
    pub confidence: Decimal,
}

/// Matches transactions against a fixed set of rules.
///
/// The rules are filtered and sorted once on construction so a batch of
/// transactions can be matched without re-sorting per transaction.
#[derive(Debug, Clone)]
pub struct RuleMatcher {
    rules: Vec<CategorizationRule>,
}

impl RuleMatcher {
    /// Create a matcher from `rules`, ignoring inactive rules.
    ///
    /// Rules are ordered by ascending priority, ties are broken by rule ID so
    /// that the order is deterministic.
    pub fn new(rules: Vec<CategorizationRule>) -> Self {
        let mut rules: Vec<CategorizationRule> =
            rules.into_iter().filter(|rule| rule.is_active).collect();
        rules.sort_by_key(|rule| (rule.priority, rule.id));

        Self { rules }
    }

    /// Find the first rule, in priority order, that `transaction` satisfies.
    pub fn find_match(&self, transaction: &Transaction) -> Option<RuleMatch> {
        self.rules.iter().find_map(|rule| {
            evaluate_rule(rule, transaction).map(|is_exact| RuleMatch {
                rule_id: rule.id,
                rule_name: rule.name.clone(),
                category_id: rule.category_id,
                confidence: match_confidence(rule, is_exact),
            })
        })
    }
}

/// Check whether `transaction` satisfies `rule`.
///
/// Returns `None` if the rule does not match, otherwise whether the match was
/// decided by an exact equality.
pub fn evaluate_rule(rule: &CategorizationRule, transaction: &Transaction) -> Option<bool> {
    let conditions: Vec<&RuleCondition> = rule.live_conditions().collect();

    if conditions.is_empty() {
        return evaluate_legacy_pattern(rule, transaction);
    }

    match rule.logic {
        RuleLogic::All => {
            if conditions
                .iter()
                .all(|condition| evaluate(condition, transaction))
            {
                Some(conditions.iter().any(|condition| is_exact(condition)))
            } else {
                None
            }
        }
        RuleLogic::Any => {
            let satisfied: Vec<&&RuleCondition> = conditions
                .iter()
                .filter(|condition| evaluate(condition, transaction))
                .collect();

            if satisfied.is_empty() {
                None
            } else {
                Some(satisfied.iter().any(|condition| is_exact(condition)))
            }
        }
    }
}

fn evaluate_legacy_pattern(rule: &CategorizationRule, transaction: &Transaction) -> Option<bool> {
    let pattern = rule.pattern.as_deref()?;
    let operator = rule
        .pattern_operator
        .clone()
        .unwrap_or(ConditionOperator::Contains);
    let condition = RuleCondition::new(ConditionField::Description, operator, pattern);

    evaluate(&condition, transaction).then(|| is_exact(&condition))
}

fn is_exact(condition: &RuleCondition) -> bool {
    condition.operator == ConditionOperator::Equals
}

/// The confidence of a match by `rule`.
///
/// Starts from the rule's learned confidence, scales it by the rule's
/// accuracy and adds a small bonus for exact matches. The result is clamped
/// to [MIN_RULE_CONFIDENCE, MAX_RULE_CONFIDENCE].
pub fn match_confidence(rule: &CategorizationRule, is_exact: bool) -> Decimal {
    let base = rule.confidence_score.unwrap_or(DEFAULT_RULE_CONFIDENCE);
    let mut confidence = base * rule.accuracy_rate();

    if is_exact {
        confidence += EXACT_MATCH_BONUS;
    }

    confidence.clamp(MIN_RULE_CONFIDENCE, MAX_RULE_CONFIDENCE)
}
