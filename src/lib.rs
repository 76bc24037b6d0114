//! [![github]](https://github.com/AnthonyDickson/budgeteur-rs)&ensp;
//!
//! [github]: https://img.shields.io/badge/github-8da0cb?style=for-the-badge&labelColor=555555&logo=github
//!
//! <br>
//!
//! Budgeteur Categorize assigns categories to the transactions of a personal
//! finance ledger.
//!
//! Transactions go through a fixed chain of stages: user-defined rules, the
//! categories supplied by the bank, a statistical model and a language model.
//! Confident results are applied straight away, the rest are stored as
//! candidates for the user to review. This library provides the pipeline and
//! a small JSON API around it.

#![warn(missing_docs)]

use std::{net::SocketAddr, time::Duration};

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_server::Handle;
use serde_json::json;
use tokio::signal;

mod app_state;
mod bank_category;
mod candidate;
mod categorization;
mod category;
mod config;
mod database_id;
mod db;
mod endpoints;
mod logging;
mod routing;
mod rule;
mod seed;
mod transaction;

pub use app_state::AppState;
pub use bank_category::{
    BankCategoryMapping, BankCategoryMappingId, MappingMatch, MappingMatchKind,
    create_bank_category_mapping, get_bank_category_mapping,
};
pub use candidate::{
    CandidateId, CandidateStatus, CategorizationCandidate, NewCandidate, accept_candidate,
    correct_transaction_category, get_pending_candidates_for_user, reject_candidate,
};
pub use categorization::{
    AutoApplied, BankCategoryStore, CandidateStore, CategorizationJob, CategorizationMethod,
    CategorizationPipeline, CategorizationResult, CategorizationSummary, Categorize,
    CategoryStore, CategorySuggestion, ClassifierError, Clock, CostGuard, JobQueue,
    LanguageModelClassifier, PipelineBuilder, PipelineMetrics, PipelineStores, Prediction,
    RuleStore, SQLiteCategorizationStore, StageKind, StageMetrics, StageSummary,
    StatisticalClassifier, SystemClock, TransactionStore, TransactionSuggestions,
    spawn_categorization_worker,
};
pub use category::{Category, CategoryId, CategoryName, create_category, get_all_categories};
pub use config::{CategorizationConfig, CostGuardConfig};
pub use database_id::{AccountId, DatabaseId, TransactionId, UserId};
pub use db::initialize as initialize_db;
pub use logging::{LOG_BODY_LENGTH_LIMIT, logging_middleware};
pub use routing::build_router;
pub use rule::{
    CategorizationRule, ConditionField, ConditionOperator, NewRule, RuleCondition,
    RuleConditionId, RuleId, RuleLogic, create_rule, delete_condition, delete_rule, get_rule,
    set_rule_active,
};
pub use seed::seed_test_database;
pub use transaction::{
    CategorizationMetadata, Transaction, TransactionBuilder, create_transaction, get_transaction,
    get_uncategorized_transactions,
};


/// An async task that waits for either the ctrl+c or terminate signal, whichever comes first, and
/// then signals the server to shut down gracefully.
///
/// `handle` is a handle to an Axum `Server`.
pub async fn graceful_shutdown(handle: Handle<SocketAddr>) {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {error}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(error) => {
                tracing::error!("failed to install the terminate signal handler: {error}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::debug!("Received ctrl+c signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
        _ = terminate => {
            tracing::debug!("Received terminate signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
    }
}

/// The errors that may occur in the application.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// An empty string was used to create a category name.
    #[error("Category name cannot be empty")]
    EmptyCategoryName,

    /// The category ID used for a rule, mapping, candidate or transaction did
    /// not match a valid category.
    #[error("the category ID {0:?} does not refer to a valid category")]
    InvalidCategory(Option<CategoryId>),

    /// The user already maps this bank category to one of their categories.
    #[error("the bank category \"{0}\" is already mapped")]
    DuplicateBankCategoryMapping(String),

    /// A categorization method stored in the database is not one this
    /// version knows about.
    #[error("unknown categorization method \"{0}\"")]
    UnknownCategorizationMethod(String),

    /// A candidate status stored in the database is not one this version
    /// knows about.
    #[error("unknown candidate status \"{0}\"")]
    UnknownCandidateStatus(String),

    /// The candidate was already accepted or rejected.
    #[error("candidate {0} has already been reviewed")]
    CandidateAlreadyReviewed(CandidateId),

    /// The categorization configuration is malformed or out of range.
    #[error("invalid categorization config: {0}")]
    InvalidConfig(String),

    /// A classifier failed in a way the pipeline does not recover from.
    #[error("{0}")]
    ClassifierError(ClassifierError),

    /// The background categorization worker has stopped.
    #[error("the categorization job queue is closed")]
    JobQueueClosed,

    /// The background categorization queue is at capacity.
    #[error("the categorization job queue is full")]
    JobQueueFull,

    /// The requested resource was not found.
    ///
    /// For HTTP request handlers, the client should check that the parameters
    /// (e.g., ID) are correct and that the resource has been created.
    ///
    /// Internally, this error may occur when a query returns no rows.
    #[error("the requested resource could not be found")]
    NotFound,

    /// An unhandled/unexpected SQL error.
    #[error("an unexpected SQL error occurred: {0}")]
    SqlError(rusqlite::Error),

    /// Could not acquire the database lock
    #[error("could not acquire the database lock")]
    DatabaseLockError,

    /// Tried to update a transaction that does not exist
    #[error("tried to update a transaction that is not in the database")]
    UpdateMissingTransaction,

    /// Tried to update a rule that does not exist
    #[error("tried to update a rule that is not in the database")]
    UpdateMissingRule,

    /// Tried to delete a rule that does not exist
    #[error("tried to delete a rule that is not in the database")]
    DeleteMissingRule,

    /// Tried to update a candidate that does not exist
    #[error("tried to update a candidate that is not in the database")]
    UpdateMissingCandidate,
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            error => {
                tracing::error!("an unhandled SQL error occurred: {}", error);
                Error::SqlError(error)
            }
        }
    }
}

impl Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::NotFound
            | Error::UpdateMissingTransaction
            | Error::UpdateMissingRule
            | Error::DeleteMissingRule
            | Error::UpdateMissingCandidate => StatusCode::NOT_FOUND,
            Error::EmptyCategoryName | Error::InvalidCategory(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Error::DuplicateBankCategoryMapping(_) | Error::CandidateAlreadyReviewed(_) => {
                StatusCode::CONFLICT
            }
            Error::JobQueueClosed | Error::JobQueueFull => StatusCode::SERVICE_UNAVAILABLE,
            Error::ClassifierError(_) => StatusCode::BAD_GATEWAY,
            Error::UnknownCategorizationMethod(_)
            | Error::UnknownCandidateStatus(_)
            | Error::InvalidConfig(_)
            | Error::SqlError(_)
            | Error::DatabaseLockError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Internal details are only meant for the server logs.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("An unexpected error occurred: {}", self);
            "An unexpected error occurred, check the server logs for more details.".to_owned()
        } else {
            self.to_string()
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod error_tests {
    use axum::{body::to_bytes, http::StatusCode, response::IntoResponse};

    use crate::Error;

    async fn body_of(error: Error) -> (StatusCode, serde_json::Value) {
        let response = error.into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();

        (status, serde_json::from_slice(&body).unwrap())
    }

    #[test]
    fn no_rows_is_not_found() {
        assert_eq!(
            Error::from(rusqlite::Error::QueryReturnedNoRows),
            Error::NotFound
        );
    }

    #[tokio::test]
    async fn client_errors_include_message() {
        let (status, body) = body_of(Error::CandidateAlreadyReviewed(3)).await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "candidate 3 has already been reviewed");
    }

    #[tokio::test]
    async fn internal_errors_hide_details() {
        let (status, body) = body_of(Error::InvalidConfig("secret path".to_owned())).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body["error"].as_str().unwrap().contains("secret path"));
    }
}
