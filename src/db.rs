//! Database initialisation and column helpers shared by the domain modules.

use std::str::FromStr;

use rusqlite::{Connection, Row, TransactionBehavior, types::Type};
use rust_decimal::Decimal;

use crate::{
    Error, bank_category::create_bank_category_mapping_table,
    candidate::create_candidate_table, category::create_category_table,
    rule::create_rule_tables, transaction::create_transaction_table,
};

/// Create all the tables used by the categorization pipeline.
///
/// The tables are created in a single exclusive transaction, so either all of
/// them exist afterwards or none of the new ones do.
///
/// # Errors
/// Returns an [Error::SqlError] if any of the tables could not be created.
pub fn initialize(connection: &Connection) -> Result<(), Error> {
    connection.pragma_update(None, "foreign_keys", "ON")?;

    let transaction =
        rusqlite::Transaction::new_unchecked(connection, TransactionBehavior::Exclusive)?;

    create_category_table(&transaction)?;
    create_transaction_table(&transaction)?;
    create_rule_tables(&transaction)?;
    create_bank_category_mapping_table(&transaction)?;
    create_candidate_table(&transaction)?;

    transaction.commit()?;

    Ok(())
}

/// Run `operation` inside a transaction.
///
/// SQLite does not nest transactions, so if `connection` is already inside
/// one, `operation` runs as part of it and the caller decides when to commit.
///
/// # Errors
/// Returns the error from `operation`, in which case a transaction opened
/// here is rolled back, or an [Error::SqlError] if the transaction could not
/// be started or committed.
pub fn with_transaction<T>(
    connection: &Connection,
    operation: impl FnOnce(&Connection) -> Result<T, Error>,
) -> Result<T, Error> {
    if !connection.is_autocommit() {
        return operation(connection);
    }

    let transaction = connection.unchecked_transaction()?;
    let value = operation(&transaction)?;
    transaction.commit()?;

    Ok(value)
}

/// Read a decimal that was stored as TEXT in column `index`.
pub fn get_decimal(row: &Row, index: usize) -> Result<Decimal, rusqlite::Error> {
    let raw: String = row.get(index)?;

    parse_decimal_column(&raw, index)
}

/// Read a nullable decimal that was stored as TEXT in column `index`.
pub fn get_optional_decimal(row: &Row, index: usize) -> Result<Option<Decimal>, rusqlite::Error> {
    let raw: Option<String> = row.get(index)?;

    raw.map(|raw| parse_decimal_column(&raw, index)).transpose()
}

fn parse_decimal_column(raw: &str, index: usize) -> Result<Decimal, rusqlite::Error> {
    Decimal::from_str(raw).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(error))
    })
}
