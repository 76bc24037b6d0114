//! Database ID type definitions.

/// Alias for the integer type used for mapping to database IDs.
pub type DatabaseId = i64;

/// Database identifier for a transaction.
pub type TransactionId = DatabaseId;

/// Database identifier for the user who owns transactions, rules and mappings.
///
/// Users are managed by the authentication subsystem, this crate only stores
/// the foreign key.
pub type UserId = DatabaseId;

/// Database identifier for a bank account.
pub type AccountId = DatabaseId;
