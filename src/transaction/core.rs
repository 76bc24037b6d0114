//! Defines the core data models and database queries for transactions.

use rusqlite::{Connection, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

use crate::{
    Error,
    categorization::CategorizationMethod,
    category::CategoryId,
    database_id::{AccountId, DatabaseId, TransactionId, UserId},
    db::{get_decimal, get_optional_decimal, with_transaction},
};

// ============================================================================
// MODELS
// ============================================================================

/// An expense or income, i.e. an event where money was either spent or earned.
///
/// Transactions are created by the import and manual entry subsystems. The
/// categorization pipeline only ever changes [Transaction::category_id] and
/// [Transaction::categorization].
///
/// To create a new `Transaction`, use [Transaction::build].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// The ID of the transaction.
    pub id: TransactionId,
    /// The user that owns the transaction.
    pub user_id: UserId,
    /// The account the money moved in or out of.
    pub account_id: AccountId,
    /// The type name of the account, e.g. "Checking" or "Credit Card".
    ///
    /// Denormalized from the account so that rules can match on it without
    /// loading the account.
    pub account_type: String,
    /// The description supplied by the bank or entered by the user.
    pub description: String,
    /// A description the user has edited to replace the bank's description.
    pub user_description: Option<String>,
    /// The amount of money spent (negative) or earned (positive).
    pub amount: Decimal,
    /// When the transaction happened.
    pub date: Date,
    /// The reference number supplied by the bank, if any.
    pub reference_number: Option<String>,
    /// Free-text notes.
    pub notes: Option<String>,
    /// The category name supplied by the bank or data provider, if any.
    pub bank_category: Option<String>,
    /// The ID of the category the transaction belongs to.
    pub category_id: Option<CategoryId>,
    /// How the current category was decided, if it was decided by the pipeline
    /// or during review.
    pub categorization: Option<CategorizationMetadata>,
}

/// Records how a transaction's category was chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorizationMetadata {
    /// The strategy that produced the category.
    pub method: CategorizationMethod,
    /// The confidence of the strategy in the category, between 0 and 1.
    pub confidence: Decimal,
    /// The rule or bank category mapping that produced the category.
    pub source_id: Option<DatabaseId>,
    /// The name of the component that wrote the category.
    pub processor: String,
    /// When the category was written.
    pub categorized_at: OffsetDateTime,
}

impl Transaction {
    /// Create a new transaction.
    ///
    /// Shortcut for [TransactionBuilder] for discoverability.
    pub fn build(
        user_id: UserId,
        amount: Decimal,
        date: Date,
        description: &str,
    ) -> TransactionBuilder {
        TransactionBuilder {
            user_id,
            account_id: 0,
            account_type: String::new(),
            description: description.to_owned(),
            user_description: None,
            amount,
            date,
            reference_number: None,
            notes: None,
            bank_category: None,
            category_id: None,
        }
    }

    /// Set the category and record how it was chosen.
    pub fn apply_category(&mut self, category_id: CategoryId, metadata: CategorizationMetadata) {
        self.category_id = Some(category_id);
        self.categorization = Some(metadata);
    }
}

/// A builder for creating [Transaction] instances.
///
/// # Examples
///
/// ```ignore
/// use rust_decimal_macros::dec;
/// use time::macros::date;
///
/// let builder = Transaction::build(1, dec!(-45.99), date!(2025 - 01 - 15), "Coffee shop")
///     .account(3, "Credit Card")
///     .bank_category(Some("Dining"));
/// ```
#[derive(Debug, PartialEq, Clone)]
pub struct TransactionBuilder {
    pub user_id: UserId,
    pub account_id: AccountId,
    pub account_type: String,
    pub description: String,
    pub user_description: Option<String>,
    /// Positive values represent income/credits, negative values represent
    /// expenses/debits.
    pub amount: Decimal,
    pub date: Date,
    pub reference_number: Option<String>,
    pub notes: Option<String>,
    pub bank_category: Option<String>,
    pub category_id: Option<CategoryId>,
}

impl TransactionBuilder {
    /// Set the account the transaction belongs to and its type name.
    pub fn account(mut self, account_id: AccountId, account_type: &str) -> Self {
        self.account_id = account_id;
        self.account_type = account_type.to_owned();
        self
    }

    /// Set the user edited description.
    pub fn user_description(mut self, user_description: Option<&str>) -> Self {
        self.user_description = user_description.map(str::to_owned);
        self
    }

    /// Set the bank's reference number.
    pub fn reference_number(mut self, reference_number: Option<&str>) -> Self {
        self.reference_number = reference_number.map(str::to_owned);
        self
    }

    /// Set the notes.
    pub fn notes(mut self, notes: Option<&str>) -> Self {
        self.notes = notes.map(str::to_owned);
        self
    }

    /// Set the category supplied by the bank.
    pub fn bank_category(mut self, bank_category: Option<&str>) -> Self {
        self.bank_category = bank_category.map(str::to_owned);
        self
    }

    /// Set the category id for the transaction.
    pub fn category_id(mut self, category_id: Option<CategoryId>) -> Self {
        self.category_id = category_id;
        self
    }

    /// Build the transaction with `id` without saving it.
    pub fn finalise(self, id: TransactionId) -> Transaction {
        Transaction {
            id,
            user_id: self.user_id,
            account_id: self.account_id,
            account_type: self.account_type,
            description: self.description,
            user_description: self.user_description,
            amount: self.amount,
            date: self.date,
            reference_number: self.reference_number,
            notes: self.notes,
            bank_category: self.bank_category,
            category_id: self.category_id,
            categorization: None,
        }
    }
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

const TRANSACTION_COLUMNS: &str = "id, user_id, account_id, account_type, description, \
    user_description, amount, date, reference_number, notes, bank_category, category_id, \
    categorization_method, categorization_confidence, categorization_source_id, \
    categorized_by, categorized_at";

/// Create a new transaction in the database from a builder.
///
/// # Errors
/// This function will return a:
/// - [Error::InvalidCategory] if the category ID does not refer to a real category,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn create_transaction(
    builder: TransactionBuilder,
    connection: &Connection,
) -> Result<Transaction, Error> {
    let category_id = builder.category_id;

    let transaction = connection
        .prepare(&format!(
            "INSERT INTO \"transaction\" (user_id, account_id, account_type, description,
                user_description, amount, date, reference_number, notes, bank_category, category_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             RETURNING {TRANSACTION_COLUMNS}"
        ))?
        .query_row(
            rusqlite::params![
                builder.user_id,
                builder.account_id,
                builder.account_type,
                builder.description,
                builder.user_description,
                builder.amount.to_string(),
                builder.date,
                builder.reference_number,
                builder.notes,
                builder.bank_category,
                builder.category_id,
            ],
            map_transaction_row,
        )
        .map_err(|error| match error {
            rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error {
                    code: _,
                    extended_code: rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY,
                },
                _,
            ) => Error::InvalidCategory(category_id),
            error => error.into(),
        })?;

    Ok(transaction)
}

/// Retrieve a transaction from the database by its `id`.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if `id` does not refer to a valid transaction,
/// - or [Error::SqlError] there is some other SQL error.
pub fn get_transaction(id: TransactionId, connection: &Connection) -> Result<Transaction, Error> {
    let transaction = connection
        .prepare(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM \"transaction\" WHERE id = :id"
        ))?
        .query_row(&[(":id", &id)], map_transaction_row)?;

    Ok(transaction)
}

/// Retrieve the transactions of `user_id` that do not have a category yet,
/// oldest first.
///
/// # Errors
/// This function will return a [Error::SqlError] if there is an SQL error.
pub fn get_uncategorized_transactions(
    user_id: UserId,
    connection: &Connection,
) -> Result<Vec<Transaction>, Error> {
    connection
        .prepare(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM \"transaction\"
             WHERE user_id = :user_id AND category_id IS NULL
             ORDER BY date ASC, id ASC"
        ))?
        .query_map(&[(":user_id", &user_id)], map_transaction_row)?
        .map(|maybe_transaction| maybe_transaction.map_err(Error::from))
        .collect()
}

/// Write the category and categorization metadata of `transaction` to the database.
///
/// Only the categorization fields are written, the rest of the row belongs to
/// the subsystems that created the transaction.
///
/// # Errors
/// This function will return a:
/// - [Error::UpdateMissingTransaction] if the transaction is not in the database,
/// - [Error::InvalidCategory] if the category does not exist,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn update_transaction_category(
    transaction: &Transaction,
    connection: &Connection,
) -> Result<(), Error> {
    let metadata = transaction.categorization.as_ref();

    let rows_affected = connection
        .execute(
            "UPDATE \"transaction\" SET
                category_id = ?2,
                categorization_method = ?3,
                categorization_confidence = ?4,
                categorization_source_id = ?5,
                categorized_by = ?6,
                categorized_at = ?7
             WHERE id = ?1",
            rusqlite::params![
                transaction.id,
                transaction.category_id,
                metadata.map(|metadata| metadata.method.to_string()),
                metadata.map(|metadata| metadata.confidence.to_string()),
                metadata.and_then(|metadata| metadata.source_id),
                metadata.map(|metadata| metadata.processor.as_str()),
                metadata.map(|metadata| metadata.categorized_at),
            ],
        )
        .map_err(|error| match error {
            rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error {
                    code: _,
                    extended_code: rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY,
                },
                _,
            ) => Error::InvalidCategory(transaction.category_id),
            error => error.into(),
        })?;

    if rows_affected == 0 {
        return Err(Error::UpdateMissingTransaction);
    }

    Ok(())
}

/// Write the categorization fields of many transactions in one SQL transaction.
///
/// Either every transaction is written or none are.
///
/// # Errors
/// Returns the first error from [update_transaction_category].
pub fn save_transaction_categories(
    transactions: &[Transaction],
    connection: &Connection,
) -> Result<(), Error> {
    if transactions.is_empty() {
        return Ok(());
    }

    with_transaction(connection, |connection| {
        transactions
            .iter()
            .try_for_each(|transaction| update_transaction_category(transaction, connection))
    })
}

/// Create the transaction table in the database.
///
/// # Errors
/// Returns an error if the table could not be created or if there is an SQL error.
pub fn create_transaction_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS \"transaction\" (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                account_id INTEGER NOT NULL,
                account_type TEXT NOT NULL,
                description TEXT NOT NULL,
                user_description TEXT,
                amount TEXT NOT NULL,
                date TEXT NOT NULL,
                reference_number TEXT,
                notes TEXT,
                bank_category TEXT,
                category_id INTEGER,
                categorization_method TEXT,
                categorization_confidence TEXT,
                categorization_source_id INTEGER,
                categorized_by TEXT,
                categorized_at TEXT,
                FOREIGN KEY(category_id) REFERENCES category(id) ON UPDATE CASCADE ON DELETE SET NULL
                )",
        (),
    )?;

    // Used when fetching the transactions that still need a category.
    connection.execute(
        "CREATE INDEX IF NOT EXISTS idx_transaction_user_category ON \"transaction\"(user_id, category_id);",
        (),
    )?;

    Ok(())
}

/// Map a database row to a Transaction.
///
/// The row must contain the columns in the order of `TRANSACTION_COLUMNS`.
pub fn map_transaction_row(row: &Row) -> Result<Transaction, rusqlite::Error> {
    let method: Option<String> = row.get(12)?;
    let categorization = match method {
        Some(method) => Some(CategorizationMetadata {
            method: method.parse().map_err(|error| {
                rusqlite::Error::FromSqlConversionFailure(
                    12,
                    rusqlite::types::Type::Text,
                    Box::new(error),
                )
            })?,
            confidence: get_optional_decimal(row, 13)?.unwrap_or_default(),
            source_id: row.get(14)?,
            processor: row.get::<_, Option<String>>(15)?.unwrap_or_default(),
            categorized_at: row
                .get::<_, Option<OffsetDateTime>>(16)?
                .unwrap_or(OffsetDateTime::UNIX_EPOCH),
        }),
        None => None,
    };

    Ok(Transaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        account_id: row.get(2)?,
        account_type: row.get(3)?,
        description: row.get(4)?,
        user_description: row.get(5)?,
        amount: get_decimal(row, 6)?,
        date: row.get(7)?,
        reference_number: row.get(8)?,
        notes: row.get(9)?,
        bank_category: row.get(10)?,
        category_id: row.get(11)?,
        categorization,
    })
}

// ============================================================================
// TESTS
// ============================================================================
