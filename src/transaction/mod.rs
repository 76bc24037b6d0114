//! Transactions as seen by the categorization pipeline.
//!
//! Transactions are created elsewhere (CSV import, bank sync, manual entry).
//! This module defines the model, a builder for tests and seeding, and the
//! queries needed to read uncategorized transactions and write categories.

mod core;

pub use core::{
    CategorizationMetadata, Transaction, TransactionBuilder, create_transaction,
    create_transaction_table, get_transaction, get_uncategorized_transactions,
    save_transaction_categories, update_transaction_category,
};
