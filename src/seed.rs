//! Sample data for manual testing.

use rusqlite::Connection;
use rust_decimal_macros::dec;
use time::{Duration, macros::date};

use crate::{
    Error,
    bank_category::create_bank_category_mapping,
    category::{CategoryName, create_category},
    rule::{ConditionField, ConditionOperator, NewRule, RuleCondition, RuleLogic, create_rule},
    transaction::{Transaction, create_transaction},
};

/// The user that owns the sample data.
const TEST_USER_ID: i64 = 1;

/// Fill an initialized database with categories, rules, bank category
/// mappings and uncategorized transactions for one user.
///
/// The transactions are chosen so that a pipeline run exercises every
/// outcome: some are auto-applied by rules or bank mappings, some become
/// candidates and some are left for the model stages.
///
/// # Errors
/// Returns an error if any row cannot be inserted, e.g. because the database
/// has already been seeded.
pub fn seed_test_database(connection: &Connection) -> Result<(), Error> {
    let sql_transaction = connection.unchecked_transaction()?;

    let groceries = create_category(CategoryName::new("Groceries")?, &sql_transaction)?;
    let fuel = create_category(CategoryName::new("Fuel")?, &sql_transaction)?;
    let dining = create_category(CategoryName::new("Eating Out")?, &sql_transaction)?;
    let household = create_category(CategoryName::new("Household")?, &sql_transaction)?;
    let transport = create_category(CategoryName::new("Transport")?, &sql_transaction)?;

    create_rule(
        NewRule::with_condition(
            TEST_USER_ID,
            "Walmart",
            groceries.id,
            10,
            RuleCondition::new(
                ConditionField::Description,
                ConditionOperator::Contains,
                "walmart",
            ),
        )
        .confidence_score(Some(dec!(0.97))),
        &sql_transaction,
    )?;

    create_rule(
        NewRule::with_condition(
            TEST_USER_ID,
            "Petrol stations",
            fuel.id,
            20,
            RuleCondition::new(
                ConditionField::Description,
                ConditionOperator::StartsWith,
                "shell",
            ),
        )
        .condition(RuleCondition::new(
            ConditionField::Description,
            ConditionOperator::StartsWith,
            "z energy",
        ))
        .logic(RuleLogic::Any),
        &sql_transaction,
    )?;

    create_rule(
        NewRule::with_condition(
            TEST_USER_ID,
            "Rent",
            household.id,
            30,
            RuleCondition::new(
                ConditionField::Description,
                ConditionOperator::Contains,
                "rent",
            ),
        )
        .condition(RuleCondition::new(
            ConditionField::Amount,
            ConditionOperator::GreaterThanOrEqual,
            "1000",
        ))
        .confidence_score(Some(dec!(0.99))),
        &sql_transaction,
    )?;

    create_bank_category_mapping(
        TEST_USER_ID,
        "Supermarkets",
        groceries.id,
        dec!(0.95),
        &sql_transaction,
    )?;
    create_bank_category_mapping(
        TEST_USER_ID,
        "Restaurants & Cafes",
        dining.id,
        dec!(0.85),
        &sql_transaction,
    )?;
    create_bank_category_mapping(
        TEST_USER_ID,
        "Public Transport",
        transport.id,
        dec!(0.93),
        &sql_transaction,
    )?;

    let transactions = [
        ("WALMART STORE #4521", dec!(-54.20), None),
        ("SHELL SELECT NEWMARKET", dec!(-82.10), Some("Fuel")),
        ("Z ENERGY GREENLANE", dec!(-64.00), None),
        ("RENT PAYMENT JUNE", dec!(-1850.00), Some("Housing")),
        ("COUNTDOWN PONSONBY", dec!(-37.45), Some("Supermarkets")),
        ("CAFE HANOI", dec!(-28.50), Some("Restaurants & Cafes")),
        ("AT HOP TOP UP", dec!(-20.00), Some("Transport - Public Transport")),
        ("BUNNINGS WAREHOUSE", dec!(-119.98), Some("Hardware")),
        ("NETFLIX.COM", dec!(-22.99), None),
        ("SALARY ACME LTD", dec!(4200.00), Some("Income")),
    ];

    let first_day = date!(2025 - 06 - 01);

    for (offset, (description, amount, bank_category)) in (0..).zip(transactions) {
        let date = first_day.saturating_add(Duration::days(offset));

        create_transaction(
            Transaction::build(TEST_USER_ID, amount, date, description)
                .account(1, "Everyday")
                .bank_category(bank_category),
            &sql_transaction,
        )?;
    }

    sql_transaction.commit()?;

    tracing::info!(
        "Seeded {} transactions for user {TEST_USER_ID}",
        transactions.len()
    );

    Ok(())
}

#[cfg(test)]
mod seed_tests {
    use rusqlite::Connection;

    use crate::{
        db::initialize, rule::get_active_rules_for_user,
        transaction::get_uncategorized_transactions,
    };

    use super::{TEST_USER_ID, seed_test_database};

    #[test]
    fn seeds_uncategorized_transactions_and_rules() {
        let connection = Connection::open_in_memory().unwrap();
        initialize(&connection).unwrap();

        seed_test_database(&connection).unwrap();

        assert_eq!(
            get_uncategorized_transactions(TEST_USER_ID, &connection)
                .unwrap()
                .len(),
            10
        );
        assert_eq!(
            get_active_rules_for_user(TEST_USER_ID, &connection)
                .unwrap()
                .len(),
            3
        );
    }
}
