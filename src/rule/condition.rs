//! Evaluates a single rule condition against a transaction.
//!
//! Evaluation never fails: a condition that cannot be evaluated (an invalid
//! regex, an amount that is not a number, an unknown field) does not match.

use std::{borrow::Cow, str::FromStr};

use regex::RegexBuilder;
use rust_decimal::Decimal;

use crate::{
    rule::models::{ConditionField, ConditionOperator, RuleCondition},
    transaction::Transaction,
};

/// Check whether `transaction` satisfies `condition`.
///
/// Null or empty field values never match. An empty condition value matches
/// any non-empty field for the contains style operators.
pub fn evaluate(condition: &RuleCondition, transaction: &Transaction) -> bool {
    if condition.is_deleted {
        return false;
    }

    let Some(field_value) = extract_field(&condition.field, transaction) else {
        return false;
    };

    if field_value.is_empty() {
        return false;
    }

    if matches!(condition.field, ConditionField::Amount) {
        return evaluate_amount(condition, transaction.amount.abs(), &field_value);
    }

    if condition.operator.is_numeric() {
        return false;
    }

    evaluate_text(condition, &field_value)
}

/// Get the text that `field` refers to.
///
/// Amounts are rendered as their absolute value since the sign is the
/// direction of the money, not its size.
fn extract_field<'a>(
    field: &ConditionField,
    transaction: &'a Transaction,
) -> Option<Cow<'a, str>> {
    match field {
        ConditionField::Description => Some(Cow::Borrowed(transaction.description.as_str())),
        ConditionField::UserDescription => {
            transaction.user_description.as_deref().map(Cow::Borrowed)
        }
        ConditionField::Amount => {
            Some(Cow::Owned(transaction.amount.abs().normalize().to_string()))
        }
        ConditionField::AccountType => Some(Cow::Borrowed(transaction.account_type.as_str())),
        ConditionField::ReferenceNumber => {
            transaction.reference_number.as_deref().map(Cow::Borrowed)
        }
        ConditionField::Notes => transaction.notes.as_deref().map(Cow::Borrowed),
        ConditionField::Unsupported(_) => None,
    }
}

fn evaluate_amount(condition: &RuleCondition, amount: Decimal, amount_text: &str) -> bool {
    let parsed_value = Decimal::from_str(condition.value.trim()).map(|value| value.abs());

    match (&condition.operator, parsed_value) {
        (ConditionOperator::GreaterThan, Ok(value)) => amount > value,
        (ConditionOperator::GreaterThanOrEqual, Ok(value)) => amount >= value,
        (ConditionOperator::LessThan, Ok(value)) => amount < value,
        (ConditionOperator::LessThanOrEqual, Ok(value)) => amount <= value,
        (operator, Err(_)) if operator.is_numeric() => false,
        (ConditionOperator::Equals, Ok(value)) => amount == value,
        (ConditionOperator::NotEquals, Ok(value)) => amount != value,
        _ => evaluate_text(condition, amount_text),
    }
}

fn evaluate_text(condition: &RuleCondition, field_value: &str) -> bool {
    if let ConditionOperator::Regex = condition.operator {
        return RegexBuilder::new(&condition.value)
            .case_insensitive(!condition.is_case_sensitive)
            .build()
            .map(|regex| regex.is_match(field_value))
            .unwrap_or(false);
    }

    let (field_value, value) = if condition.is_case_sensitive {
        (Cow::Borrowed(field_value), Cow::Borrowed(condition.value.as_str()))
    } else {
        (
            Cow::Owned(field_value.to_lowercase()),
            Cow::Owned(condition.value.to_lowercase()),
        )
    };

    match condition.operator {
        ConditionOperator::Contains => field_value.contains(value.as_ref()),
        ConditionOperator::NotContains => !field_value.contains(value.as_ref()),
        ConditionOperator::Equals => field_value == value,
        ConditionOperator::NotEquals => field_value != value,
        ConditionOperator::StartsWith => field_value.starts_with(value.as_ref()),
        ConditionOperator::EndsWith => field_value.ends_with(value.as_ref()),
        _ => false,
    }
}
