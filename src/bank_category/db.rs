//! Database operations for bank category mappings.

use rusqlite::{Connection, Row};
use rust_decimal::Decimal;

use crate::{
    Error,
    bank_category::models::{
        BankCategoryMapping, BankCategoryMappingId, MappingMatch, MappingMatchKind,
        normalize_provider_category,
    },
    category::CategoryId,
    database_id::UserId,
    db::{get_decimal, with_transaction},
};

/// Create a mapping from `provider_category` to `category_id` for `user_id`.
///
/// # Errors
/// This function will return a:
/// - [Error::InvalidCategory] if the category does not exist,
/// - [Error::DuplicateBankCategoryMapping] if the user already maps the provider category,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn create_bank_category_mapping(
    user_id: UserId,
    provider_category: &str,
    category_id: CategoryId,
    confidence: Decimal,
    connection: &Connection,
) -> Result<BankCategoryMapping, Error> {
    connection
        .execute(
            "INSERT INTO bank_category_mapping
                (user_id, provider_category, normalized_category, category_id, confidence)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            rusqlite::params![
                user_id,
                provider_category,
                normalize_provider_category(provider_category),
                category_id,
                confidence.to_string(),
            ],
        )
        .map_err(|error| match error {
            rusqlite::Error::SqliteFailure(error, Some(_)) if error.extended_code == 787 => {
                Error::InvalidCategory(Some(category_id))
            }
            // Code 2067 occurs when a UNIQUE constraint failed.
            rusqlite::Error::SqliteFailure(error, Some(_)) if error.extended_code == 2067 => {
                Error::DuplicateBankCategoryMapping(provider_category.to_owned())
            }
            error => error.into(),
        })?;

    Ok(BankCategoryMapping {
        id: connection.last_insert_rowid(),
        user_id,
        provider_category: provider_category.to_owned(),
        category_id,
        confidence,
        application_count: 0,
        override_count: 0,
    })
}

/// Retrieve a mapping by its ID.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if the mapping does not exist,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn get_bank_category_mapping(
    mapping_id: BankCategoryMappingId,
    connection: &Connection,
) -> Result<BankCategoryMapping, Error> {
    connection
        .prepare(
            "SELECT id, user_id, provider_category, category_id, confidence,
                application_count, override_count
             FROM bank_category_mapping WHERE id = :id",
        )?
        .query_row(&[(":id", &mapping_id)], map_row)
        .map_err(Error::from)
}

/// Find the mapping of `user_id` for `provider_category`.
///
/// An exact match on the normalised name is preferred. Otherwise the longest
/// mapping whose normalised name contains, or is contained in, the normalised
/// provider category is returned as a fuzzy match.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn find_bank_category_mapping(
    user_id: UserId,
    provider_category: &str,
    connection: &Connection,
) -> Result<Option<MappingMatch>, Error> {
    let normalized = normalize_provider_category(provider_category);
    if normalized.is_empty() {
        return Ok(None);
    }

    let mappings: Vec<(String, BankCategoryMapping)> = connection
        .prepare(
            "SELECT id, user_id, provider_category, category_id, confidence,
                application_count, override_count, normalized_category
             FROM bank_category_mapping WHERE user_id = :user_id
             ORDER BY id ASC",
        )?
        .query_map(&[(":user_id", &user_id)], |row| {
            Ok((row.get(7)?, map_row(row)?))
        })?
        .collect::<Result<_, _>>()?;

    if let Some((_, mapping)) = mappings.iter().find(|(candidate, _)| *candidate == normalized) {
        return Ok(Some(MappingMatch {
            mapping: mapping.clone(),
            kind: MappingMatchKind::Exact,
        }));
    }

    let fuzzy = mappings
        .into_iter()
        .filter(|(candidate, _)| {
            !candidate.is_empty()
                && (normalized.contains(candidate.as_str()) || candidate.contains(&normalized))
        })
        .max_by(|(left, left_mapping), (right, right_mapping)| {
            left.len()
                .cmp(&right.len())
                .then(right_mapping.id.cmp(&left_mapping.id))
        })
        .map(|(_, mapping)| MappingMatch {
            mapping,
            kind: MappingMatchKind::Fuzzy,
        });

    Ok(fuzzy)
}

/// Add one to the application count of each mapping in `mapping_ids`.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn record_mapping_applications(
    mapping_ids: &[BankCategoryMappingId],
    connection: &Connection,
) -> Result<(), Error> {
    if mapping_ids.is_empty() {
        return Ok(());
    }

    with_transaction(connection, |connection| {
        let mut statement = connection.prepare(
            "UPDATE bank_category_mapping SET application_count = application_count + 1
             WHERE id = ?1",
        )?;

        for mapping_id in mapping_ids {
            statement.execute([mapping_id])?;
        }

        Ok(())
    })
}

/// Record that the user replaced a category chosen by `mapping_id`.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if the mapping does not exist,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn record_mapping_override(
    mapping_id: BankCategoryMappingId,
    connection: &Connection,
) -> Result<(), Error> {
    let rows_affected = connection.execute(
        "UPDATE bank_category_mapping SET override_count = override_count + 1 WHERE id = ?1",
        [mapping_id],
    )?;

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}

/// Initialize the bank category mapping table and indexes.
pub fn create_bank_category_mapping_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS bank_category_mapping (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            provider_category TEXT NOT NULL,
            normalized_category TEXT NOT NULL,
            category_id INTEGER NOT NULL,
            confidence TEXT NOT NULL,
            application_count INTEGER NOT NULL DEFAULT 0,
            override_count INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(category_id) REFERENCES category(id) ON UPDATE CASCADE ON DELETE CASCADE,
            UNIQUE(user_id, normalized_category)
        );

        CREATE INDEX IF NOT EXISTS idx_bank_category_mapping_user
            ON bank_category_mapping(user_id);",
    )?;

    Ok(())
}

fn map_row(row: &Row) -> Result<BankCategoryMapping, rusqlite::Error> {
    Ok(BankCategoryMapping {
        id: row.get(0)?,
        user_id: row.get(1)?,
        provider_category: row.get(2)?,
        category_id: row.get(3)?,
        confidence: get_decimal(row, 4)?,
        application_count: row.get(5)?,
        override_count: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;
    use rust_decimal_macros::dec;

    use crate::{
        Error,
        bank_category::{MappingMatchKind, create_bank_category_mapping},
        category::{CategoryName, create_category},
        db::initialize,
    };

    use super::{
        find_bank_category_mapping, get_bank_category_mapping, record_mapping_applications,
        record_mapping_override,
    };

    fn get_test_connection() -> (Connection, i64) {
        let connection = Connection::open_in_memory().unwrap();
        initialize(&connection).unwrap();
        let category = create_category(CategoryName::new_unchecked("Dining"), &connection).unwrap();
        (connection, category.id)
    }

    #[test]
    fn exact_match_ignores_case_and_separators() {
        let (connection, category_id) = get_test_connection();
        let mapping =
            create_bank_category_mapping(1, "Food & Dining", category_id, dec!(0.9), &connection)
                .unwrap();

        let found = find_bank_category_mapping(1, "FOOD/DINING", &connection)
            .unwrap()
            .expect("mapping should be found");

        assert_eq!(found.kind, MappingMatchKind::Exact);
        assert_eq!(found.mapping, mapping);
    }

    #[test]
    fn fuzzy_match_prefers_most_specific_mapping() {
        let (connection, category_id) = get_test_connection();
        let other = create_category(CategoryName::new_unchecked("Fast Food"), &connection).unwrap();
        create_bank_category_mapping(1, "Food", category_id, dec!(0.9), &connection).unwrap();
        let specific =
            create_bank_category_mapping(1, "Fast Food", other.id, dec!(0.9), &connection).unwrap();

        let found = find_bank_category_mapping(1, "Restaurants - Fast Food", &connection)
            .unwrap()
            .expect("mapping should be found");

        assert_eq!(found.kind, MappingMatchKind::Fuzzy);
        assert_eq!(found.mapping.id, specific.id);
    }

    #[test]
    fn mappings_are_scoped_to_user() {
        let (connection, category_id) = get_test_connection();
        create_bank_category_mapping(2, "Groceries", category_id, dec!(0.9), &connection).unwrap();

        let found = find_bank_category_mapping(1, "Groceries", &connection).unwrap();

        assert_eq!(found, None);
    }

    #[test]
    fn blank_provider_category_finds_nothing() {
        let (connection, category_id) = get_test_connection();
        create_bank_category_mapping(1, "Groceries", category_id, dec!(0.9), &connection).unwrap();

        assert_eq!(find_bank_category_mapping(1, " - ", &connection), Ok(None));
    }

    #[test]
    fn duplicate_mapping_is_rejected() {
        let (connection, category_id) = get_test_connection();
        create_bank_category_mapping(1, "Groceries", category_id, dec!(0.9), &connection).unwrap();

        let result =
            create_bank_category_mapping(1, "GROCERIES", category_id, dec!(0.5), &connection);

        assert_eq!(
            result,
            Err(Error::DuplicateBankCategoryMapping("GROCERIES".to_owned()))
        );
    }

    #[test]
    fn counters_are_updated() {
        let (connection, category_id) = get_test_connection();
        let mapping =
            create_bank_category_mapping(1, "Groceries", category_id, dec!(0.9), &connection)
                .unwrap();

        record_mapping_applications(&[mapping.id, mapping.id], &connection).unwrap();
        record_mapping_override(mapping.id, &connection).unwrap();

        let got = get_bank_category_mapping(mapping.id, &connection).unwrap();
        assert_eq!(got.application_count, 2);
        assert_eq!(got.override_count, 1);
        assert_eq!(record_mapping_override(999, &connection), Err(Error::NotFound));
    }
}
