//! The persistence interfaces the pipeline depends on and their SQLite
//! implementation.

use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;

use crate::{
    Error,
    bank_category::{
        BankCategoryMappingId, MappingMatch, find_bank_category_mapping,
        record_mapping_applications, record_mapping_override,
    },
    candidate::{CategorizationCandidate, NewCandidate, create_candidates},
    category::{Category, get_all_categories},
    database_id::{TransactionId, UserId},
    rule::{
        CategorizationRule, RuleId, get_active_rules_for_user, record_rule_correction,
        record_rule_matches,
    },
    transaction::{
        Transaction, get_transaction, get_uncategorized_transactions, save_transaction_categories,
        update_transaction_category,
    },
};

/// Reads transactions and writes their categories.
pub trait TransactionStore: Send + Sync {
    fn get_by_id(&self, transaction_id: TransactionId) -> Result<Transaction, Error>;

    /// Write the category fields of one transaction.
    fn update(&self, transaction: &Transaction) -> Result<(), Error>;

    /// Write the category fields of many transactions, all or nothing.
    fn bulk_save(&self, transactions: &[Transaction]) -> Result<(), Error>;

    fn get_uncategorized_for_user(&self, user_id: UserId) -> Result<Vec<Transaction>, Error>;
}

/// Reads rules and updates their statistics.
pub trait RuleStore: Send + Sync {
    fn get_active_rules_for_user(&self, user_id: UserId)
    -> Result<Vec<CategorizationRule>, Error>;

    fn record_matches(&self, rule_ids: &[RuleId]) -> Result<(), Error>;

    fn record_correction(&self, rule_id: RuleId) -> Result<(), Error>;
}

/// Looks up bank category mappings and updates their statistics.
pub trait BankCategoryStore: Send + Sync {
    fn find_mapping(
        &self,
        user_id: UserId,
        provider_category: &str,
    ) -> Result<Option<MappingMatch>, Error>;

    fn record_applications(&self, mapping_ids: &[BankCategoryMappingId]) -> Result<(), Error>;

    fn record_override(&self, mapping_id: BankCategoryMappingId) -> Result<(), Error>;
}

/// Lists the categories predictions may use.
pub trait CategoryStore: Send + Sync {
    fn get_all_categories(&self) -> Result<Vec<Category>, Error>;
}

/// Saves candidates for review.
pub trait CandidateStore: Send + Sync {
    fn create_many(
        &self,
        candidates: &[NewCandidate],
    ) -> Result<Vec<CategorizationCandidate>, Error>;
}

/// Implements every store on one shared SQLite connection.
#[derive(Debug, Clone)]
pub struct SQLiteCategorizationStore {
    connection: Arc<Mutex<Connection>>,
}

impl SQLiteCategorizationStore {
    /// Create a store over a shared database connection.
    pub fn new(connection: Arc<Mutex<Connection>>) -> Self {
        Self { connection }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, Error> {
        self.connection.lock().map_err(|error| {
            tracing::error!("could not acquire database lock: {error}");
            Error::DatabaseLockError
        })
    }
}

impl TransactionStore for SQLiteCategorizationStore {
    fn get_by_id(&self, transaction_id: TransactionId) -> Result<Transaction, Error> {
        let connection = self.lock()?;
        get_transaction(transaction_id, &connection)
    }

    fn update(&self, transaction: &Transaction) -> Result<(), Error> {
        let connection = self.lock()?;
        update_transaction_category(transaction, &connection)
    }

    fn bulk_save(&self, transactions: &[Transaction]) -> Result<(), Error> {
        let connection = self.lock()?;
        save_transaction_categories(transactions, &connection)
    }

    fn get_uncategorized_for_user(&self, user_id: UserId) -> Result<Vec<Transaction>, Error> {
        let connection = self.lock()?;
        get_uncategorized_transactions(user_id, &connection)
    }
}

impl RuleStore for SQLiteCategorizationStore {
    fn get_active_rules_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<CategorizationRule>, Error> {
        let connection = self.lock()?;
        get_active_rules_for_user(user_id, &connection)
    }

    fn record_matches(&self, rule_ids: &[RuleId]) -> Result<(), Error> {
        let connection = self.lock()?;
        record_rule_matches(rule_ids, &connection)
    }

    fn record_correction(&self, rule_id: RuleId) -> Result<(), Error> {
        let connection = self.lock()?;
        record_rule_correction(rule_id, &connection)
    }
}

impl BankCategoryStore for SQLiteCategorizationStore {
    fn find_mapping(
        &self,
        user_id: UserId,
        provider_category: &str,
    ) -> Result<Option<MappingMatch>, Error> {
        let connection = self.lock()?;
        find_bank_category_mapping(user_id, provider_category, &connection)
    }

    fn record_applications(&self, mapping_ids: &[BankCategoryMappingId]) -> Result<(), Error> {
        let connection = self.lock()?;
        record_mapping_applications(mapping_ids, &connection)
    }

    fn record_override(&self, mapping_id: BankCategoryMappingId) -> Result<(), Error> {
        let connection = self.lock()?;
        record_mapping_override(mapping_id, &connection)
    }
}

impl CategoryStore for SQLiteCategorizationStore {
    fn get_all_categories(&self) -> Result<Vec<Category>, Error> {
        let connection = self.lock()?;
        get_all_categories(&connection)
    }
}

impl CandidateStore for SQLiteCategorizationStore {
    fn create_many(
        &self,
        candidates: &[NewCandidate],
    ) -> Result<Vec<CategorizationCandidate>, Error> {
        let connection = self.lock()?;
        create_candidates(candidates, &connection)
    }
}

/// The stores a pipeline reads from and writes to.
#[derive(Clone)]
pub struct PipelineStores {
    pub transactions: Arc<dyn TransactionStore>,
    pub rules: Arc<dyn RuleStore>,
    pub bank_categories: Arc<dyn BankCategoryStore>,
    pub categories: Arc<dyn CategoryStore>,
    pub candidates: Arc<dyn CandidateStore>,
}

impl PipelineStores {
    /// Use `store` for every kind of store.
    pub fn sqlite(store: SQLiteCategorizationStore) -> Self {
        let store = Arc::new(store);

        Self {
            transactions: store.clone(),
            rules: store.clone(),
            bank_categories: store.clone(),
            categories: store.clone(),
            candidates: store,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use rusqlite::Connection;
    use rust_decimal_macros::dec;
    use time::macros::date;

    use crate::{
        category::{CategoryName, create_category},
        db::initialize,
        transaction::{Transaction, create_transaction},
    };

    use super::{CategoryStore, SQLiteCategorizationStore, TransactionStore};

    #[test]
    fn store_reads_through_shared_connection() {
        let connection = Connection::open_in_memory().unwrap();
        initialize(&connection).unwrap();
        create_category(CategoryName::new_unchecked("Groceries"), &connection).unwrap();
        let transaction = create_transaction(
            Transaction::build(1, dec!(-12.50), date!(2025 - 02 - 14), "FLOWERS"),
            &connection,
        )
        .unwrap();
        let store = SQLiteCategorizationStore::new(Arc::new(Mutex::new(connection)));

        assert_eq!(store.get_by_id(transaction.id), Ok(transaction.clone()));
        assert_eq!(store.get_uncategorized_for_user(1), Ok(vec![transaction]));
        assert_eq!(store.get_all_categories().unwrap().len(), 1);
    }
}
