//! Categorization rules: conditions evaluated against transaction fields that
//! map matching transactions to a category.
//!
//! A rule holds an ordered list of conditions combined with ALL or ANY logic,
//! or, for rules created before conditions existed, a single pattern matched
//! against the description. Rules are evaluated in ascending priority order
//! and the first rule that matches wins.

mod condition;
mod db;
mod matcher;
mod models;

pub use db::{
    create_rule, create_rule_tables, delete_condition, delete_rule, get_active_rules_for_user,
    get_rule, record_rule_correction, record_rule_matches, set_rule_active,
};
pub use matcher::RuleMatcher;
pub use models::{
    CategorizationRule, ConditionField, ConditionOperator, NewRule, RuleCondition,
    RuleConditionId, RuleId, RuleLogic,
};
