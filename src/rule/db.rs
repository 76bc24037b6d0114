use std::collections::HashMap;

use rusqlite::{Connection, Row};

use crate::{
    Error,
    database_id::UserId,
    db::{get_optional_decimal, with_transaction},
    rule::models::{
        CategorizationRule, ConditionField, ConditionOperator, NewRule, RuleCondition,
        RuleConditionId, RuleId, RuleLogic,
    },
};

const RULE_COLUMNS: &str = "id, user_id, name, category_id, priority, is_active, logic, pattern, \
    pattern_operator, confidence_score, match_count, correction_count";

/// Create a rule and its conditions in the database.
///
/// # Errors
/// This function will return a:
/// - [Error::InvalidCategory] if the rule's category does not exist,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn create_rule(
    new_rule: NewRule,
    connection: &Connection,
) -> Result<CategorizationRule, Error> {
    let (rule_id, conditions) = with_transaction(connection, |connection| {
        connection
            .execute(
                "INSERT INTO categorization_rule
                    (user_id, name, category_id, priority, is_active, logic, pattern,
                     pattern_operator, confidence_score)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?7, ?8);",
                rusqlite::params![
                    new_rule.user_id,
                    new_rule.name,
                    new_rule.category_id,
                    new_rule.priority,
                    new_rule.logic.as_str(),
                    new_rule.pattern,
                    new_rule
                        .pattern_operator
                        .as_ref()
                        .map(|operator| operator.as_str()),
                    new_rule.confidence_score.map(|score| score.to_string()),
                ],
            )
            .map_err(|error| match error {
                // Code 787 occurs when a FOREIGN KEY constraint failed.
                rusqlite::Error::SqliteFailure(error, Some(_)) if error.extended_code == 787 => {
                    Error::InvalidCategory(Some(new_rule.category_id))
                }
                error => error.into(),
            })?;

        let rule_id = connection.last_insert_rowid();

        let conditions = new_rule
            .conditions
            .iter()
            .enumerate()
            .map(|(position, condition)| {
                insert_condition(rule_id, position, condition, connection).map(|id| {
                    RuleCondition {
                        id,
                        ..condition.clone()
                    }
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok((rule_id, conditions))
    })?;

    Ok(CategorizationRule {
        id: rule_id,
        user_id: new_rule.user_id,
        name: new_rule.name,
        category_id: new_rule.category_id,
        priority: new_rule.priority,
        is_active: true,
        logic: new_rule.logic,
        conditions,
        pattern: new_rule.pattern,
        pattern_operator: new_rule.pattern_operator,
        confidence_score: new_rule.confidence_score,
        match_count: 0,
        correction_count: 0,
    })
}

fn insert_condition(
    rule_id: RuleId,
    position: usize,
    condition: &RuleCondition,
    connection: &Connection,
) -> Result<RuleConditionId, Error> {
    connection.execute(
        "INSERT INTO rule_condition
            (rule_id, position, field, operator, value, is_case_sensitive, is_deleted)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
        rusqlite::params![
            rule_id,
            position as i64,
            condition.field.as_str(),
            condition.operator.as_str(),
            condition.value,
            condition.is_case_sensitive,
            condition.is_deleted,
        ],
    )?;

    Ok(connection.last_insert_rowid())
}

/// Retrieve a rule and its conditions by `rule_id`.
///
/// Soft-deleted conditions are included so that callers can show the history
/// of a rule, they are skipped during evaluation.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if there is no rule with `rule_id`,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn get_rule(rule_id: RuleId, connection: &Connection) -> Result<CategorizationRule, Error> {
    let mut rule = connection
        .prepare(&format!(
            "SELECT {RULE_COLUMNS} FROM categorization_rule WHERE id = :id;"
        ))?
        .query_row(&[(":id", &rule_id)], map_rule_row)?;

    rule.conditions = connection
        .prepare(
            "SELECT id, rule_id, field, operator, value, is_case_sensitive, is_deleted
             FROM rule_condition WHERE rule_id = :rule_id ORDER BY position ASC, id ASC;",
        )?
        .query_map(&[(":rule_id", &rule_id)], map_condition_row)?
        .map(|maybe_condition| {
            maybe_condition
                .map(|(_, condition)| condition)
                .map_err(Error::from)
        })
        .collect::<Result<_, _>>()?;

    Ok(rule)
}

/// Retrieve the active rules of `user_id`, ordered by ascending priority.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn get_active_rules_for_user(
    user_id: UserId,
    connection: &Connection,
) -> Result<Vec<CategorizationRule>, Error> {
    let mut rules: Vec<CategorizationRule> = connection
        .prepare(&format!(
            "SELECT {RULE_COLUMNS} FROM categorization_rule
             WHERE user_id = :user_id AND is_active = 1
             ORDER BY priority ASC, id ASC;"
        ))?
        .query_map(&[(":user_id", &user_id)], map_rule_row)?
        .map(|maybe_rule| maybe_rule.map_err(Error::from))
        .collect::<Result<_, _>>()?;

    if rules.is_empty() {
        return Ok(rules);
    }

    let mut conditions_by_rule: HashMap<RuleId, Vec<RuleCondition>> = HashMap::new();
    let mut statement = connection.prepare(
        "SELECT c.id, c.rule_id, c.field, c.operator, c.value, c.is_case_sensitive, c.is_deleted
         FROM rule_condition c
         INNER JOIN categorization_rule r ON c.rule_id = r.id
         WHERE r.user_id = :user_id AND r.is_active = 1
         ORDER BY c.rule_id ASC, c.position ASC, c.id ASC;",
    )?;
    for maybe_condition in statement.query_map(&[(":user_id", &user_id)], map_condition_row)? {
        let (rule_id, condition) = maybe_condition?;
        conditions_by_rule.entry(rule_id).or_default().push(condition);
    }

    for rule in &mut rules {
        rule.conditions = conditions_by_rule.remove(&rule.id).unwrap_or_default();
    }

    Ok(rules)
}

/// Activate or deactivate a rule.
///
/// # Errors
/// This function will return a:
/// - [Error::UpdateMissingRule] if the rule does not exist,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn set_rule_active(
    rule_id: RuleId,
    is_active: bool,
    connection: &Connection,
) -> Result<(), Error> {
    let rows_affected = connection.execute(
        "UPDATE categorization_rule SET is_active = ?1 WHERE id = ?2",
        (is_active, rule_id),
    )?;

    if rows_affected == 0 {
        return Err(Error::UpdateMissingRule);
    }

    Ok(())
}

/// Soft-delete a condition so that it is no longer evaluated.
///
/// # Errors
/// This function will return a:
/// - [Error::UpdateMissingRule] if the condition does not exist,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn delete_condition(
    condition_id: RuleConditionId,
    connection: &Connection,
) -> Result<(), Error> {
    let rows_affected = connection.execute(
        "UPDATE rule_condition SET is_deleted = 1 WHERE id = ?1",
        [condition_id],
    )?;

    if rows_affected == 0 {
        return Err(Error::UpdateMissingRule);
    }

    Ok(())
}

/// Delete a rule and its conditions from the database.
///
/// # Errors
/// This function will return an error if there is an SQL error or if the rule doesn't exist.
pub fn delete_rule(rule_id: RuleId, connection: &Connection) -> Result<(), Error> {
    let rows_affected =
        connection.execute("DELETE FROM categorization_rule WHERE id = ?1", [rule_id])?;

    if rows_affected == 0 {
        return Err(Error::DeleteMissingRule);
    }

    Ok(())
}

/// Add one to the match count of each rule in `rule_ids`.
///
/// A rule that appears more than once is incremented once per appearance.
/// Rules that no longer exist are skipped.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn record_rule_matches(rule_ids: &[RuleId], connection: &Connection) -> Result<(), Error> {
    if rule_ids.is_empty() {
        return Ok(());
    }

    with_transaction(connection, |connection| {
        let mut statement = connection.prepare(
            "UPDATE categorization_rule SET match_count = match_count + 1 WHERE id = ?1",
        )?;

        for rule_id in rule_ids {
            statement.execute([rule_id])?;
        }

        Ok(())
    })
}

/// Record that a categorization produced by `rule_id` was corrected by the user.
///
/// # Errors
/// This function will return a:
/// - [Error::UpdateMissingRule] if the rule does not exist,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn record_rule_correction(rule_id: RuleId, connection: &Connection) -> Result<(), Error> {
    let rows_affected = connection.execute(
        "UPDATE categorization_rule SET correction_count = correction_count + 1 WHERE id = ?1",
        [rule_id],
    )?;

    if rows_affected == 0 {
        return Err(Error::UpdateMissingRule);
    }

    Ok(())
}

/// Create the rule and rule condition tables.
pub fn create_rule_tables(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS categorization_rule (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                category_id INTEGER NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 1,
                logic TEXT NOT NULL DEFAULT 'all',
                pattern TEXT,
                pattern_operator TEXT,
                confidence_score TEXT,
                match_count INTEGER NOT NULL DEFAULT 0,
                correction_count INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY(category_id) REFERENCES category(id) ON UPDATE CASCADE ON DELETE CASCADE
            );

        CREATE TABLE IF NOT EXISTS rule_condition (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                rule_id INTEGER NOT NULL,
                position INTEGER NOT NULL,
                field TEXT NOT NULL,
                operator TEXT NOT NULL,
                value TEXT NOT NULL,
                is_case_sensitive INTEGER NOT NULL DEFAULT 0,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY(rule_id) REFERENCES categorization_rule(id) ON UPDATE CASCADE ON DELETE CASCADE
            );

        CREATE INDEX IF NOT EXISTS idx_rule_user_priority ON categorization_rule(user_id, priority);
        CREATE INDEX IF NOT EXISTS idx_rule_condition_rule_id ON rule_condition(rule_id);",
    )?;

    Ok(())
}

fn map_rule_row(row: &Row) -> Result<CategorizationRule, rusqlite::Error> {
    let logic: String = row.get(6)?;
    let logic = logic.parse::<RuleLogic>().map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, error.into())
    })?;
    let pattern_operator: Option<String> = row.get(8)?;

    Ok(CategorizationRule {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        category_id: row.get(3)?,
        priority: row.get(4)?,
        is_active: row.get(5)?,
        logic,
        conditions: Vec::new(),
        pattern: row.get(7)?,
        pattern_operator: pattern_operator.as_deref().map(ConditionOperator::from),
        confidence_score: get_optional_decimal(row, 9)?,
        match_count: row.get(10)?,
        correction_count: row.get(11)?,
    })
}

fn map_condition_row(row: &Row) -> Result<(RuleId, RuleCondition), rusqlite::Error> {
    let field: String = row.get(2)?;
    let operator: String = row.get(3)?;

    Ok((
        row.get(1)?,
        RuleCondition {
            id: row.get(0)?,
            field: ConditionField::from(field.as_str()),
            operator: ConditionOperator::from(operator.as_str()),
            value: row.get(4)?,
            is_case_sensitive: row.get(5)?,
            is_deleted: row.get(6)?,
        },
    ))
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;
    use rust_decimal_macros::dec;

    use crate::{
        Error,
        category::{CategoryName, create_category},
        db::initialize,
        rule::models::{
            ConditionField, ConditionOperator, NewRule, RuleCondition, RuleLogic,
        },
    };

    use super::{
        create_rule, delete_condition, delete_rule, get_active_rules_for_user, get_rule,
        record_rule_correction, record_rule_matches, set_rule_active,
    };

    fn get_test_connection() -> (Connection, i64) {
        let connection = Connection::open_in_memory().unwrap();
        initialize(&connection).unwrap();
        let category = create_category(CategoryName::new_unchecked("Groceries"), &connection)
            .expect("Could not create category");
        (connection, category.id)
    }

    fn walmart_rule(user_id: i64, category_id: i64, priority: i64) -> NewRule {
        NewRule::with_condition(
            user_id,
            "Walmart",
            category_id,
            priority,
            RuleCondition::new(ConditionField::Description, ConditionOperator::Contains, "walmart"),
        )
    }

    #[test]
    fn create_rule_succeeds() {
        let (connection, category_id) = get_test_connection();

        let rule = create_rule(
            walmart_rule(1, category_id, 1)
                .logic(RuleLogic::Any)
                .condition(
                    RuleCondition::new(ConditionField::Amount, ConditionOperator::LessThan, "200")
                        .case_sensitive(true),
                )
                .confidence_score(Some(dec!(0.95))),
            &connection,
        )
        .expect("Could not create rule");

        assert!(rule.id > 0);
        assert_eq!(rule.conditions.len(), 2);
        assert!(rule.conditions.iter().all(|condition| condition.id > 0));
        assert_eq!(get_rule(rule.id, &connection), Ok(rule));
    }

    #[test]
    fn create_rule_with_invalid_category_fails() {
        let (connection, category_id) = get_test_connection();

        let result = create_rule(walmart_rule(1, category_id + 100, 1), &connection);

        assert_eq!(result, Err(Error::InvalidCategory(Some(category_id + 100))));
    }

    #[test]
    fn get_rule_with_invalid_id_returns_not_found() {
        let (connection, _) = get_test_connection();

        assert_eq!(get_rule(1234, &connection), Err(Error::NotFound));
    }

    #[test]
    fn active_rules_are_scoped_to_user_and_sorted_by_priority() {
        let (connection, category_id) = get_test_connection();
        let low = create_rule(walmart_rule(1, category_id, 10), &connection).unwrap();
        let high = create_rule(walmart_rule(1, category_id, 1), &connection).unwrap();
        let inactive = create_rule(walmart_rule(1, category_id, 0), &connection).unwrap();
        set_rule_active(inactive.id, false, &connection).unwrap();
        create_rule(walmart_rule(2, category_id, 0), &connection).unwrap();

        let got = get_active_rules_for_user(1, &connection).unwrap();

        assert_eq!(got, vec![high, low]);
    }

    #[test]
    fn legacy_pattern_rules_round_trip_without_conditions() {
        let (connection, category_id) = get_test_connection();
        let mut legacy = walmart_rule(1, category_id, 1);
        legacy.conditions.clear();
        legacy.pattern = Some("countdown".to_owned());
        legacy.pattern_operator = Some(ConditionOperator::StartsWith);

        let rule = create_rule(legacy, &connection).unwrap();
        let got = get_active_rules_for_user(1, &connection).unwrap();

        assert_eq!(got, vec![rule]);
        assert!(got[0].conditions.is_empty());
    }

    #[test]
    fn deleted_condition_is_kept_but_flagged() {
        let (connection, category_id) = get_test_connection();
        let rule = create_rule(walmart_rule(1, category_id, 1), &connection).unwrap();

        delete_condition(rule.conditions[0].id, &connection).unwrap();

        let got = get_rule(rule.id, &connection).unwrap();
        assert!(got.conditions[0].is_deleted);
        assert_eq!(got.live_conditions().count(), 0);
    }

    #[test]
    fn record_matches_and_corrections() {
        let (connection, category_id) = get_test_connection();
        let rule = create_rule(walmart_rule(1, category_id, 1), &connection).unwrap();

        record_rule_matches(&[rule.id, rule.id, rule.id + 42], &connection).unwrap();
        record_rule_correction(rule.id, &connection).unwrap();

        let got = get_rule(rule.id, &connection).unwrap();
        assert_eq!(got.match_count, 2);
        assert_eq!(got.correction_count, 1);
        assert_eq!(got.accuracy_rate(), dec!(0.5));
    }

    #[test]
    fn record_correction_for_missing_rule_fails() {
        let (connection, _) = get_test_connection();

        assert_eq!(
            record_rule_correction(999, &connection),
            Err(Error::UpdateMissingRule)
        );
    }

    #[test]
    fn delete_rule_removes_conditions() {
        let (connection, category_id) = get_test_connection();
        let rule = create_rule(walmart_rule(1, category_id, 1), &connection).unwrap();

        delete_rule(rule.id, &connection).unwrap();

        assert_eq!(get_rule(rule.id, &connection), Err(Error::NotFound));
        let remaining: i64 = connection
            .query_row("SELECT COUNT(*) FROM rule_condition", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
        assert_eq!(delete_rule(rule.id, &connection), Err(Error::DeleteMissingRule));
    }
}
