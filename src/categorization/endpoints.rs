//! JSON route handlers for running the pipeline and reviewing its output.

use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::{
    Error,
    app_state::{CategorizeState, JobState, ReviewState},
    candidate::{
        CandidateId, CategorizationCandidate, accept_candidate, correct_transaction_category,
        get_pending_candidates_for_user, reject_candidate,
    },
    categorization::{CategorizationJob, CategorizationSummary},
    category::CategoryId,
    database_id::{TransactionId, UserId},
    transaction::{Transaction, get_uncategorized_transactions},
};

/// The body of a manual category correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryUpdate {
    pub category_id: CategoryId,
}

/// The body of the response to a queued background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub user_id: UserId,
}

fn lock_connection(
    db_connection: &Arc<Mutex<Connection>>,
) -> Result<MutexGuard<'_, Connection>, Error> {
    db_connection.lock().map_err(|error| {
        tracing::error!("could not acquire database lock: {error}");
        Error::DatabaseLockError
    })
}

fn load_uncategorized(
    user_id: UserId,
    db_connection: &Arc<Mutex<Connection>>,
) -> Result<Vec<Transaction>, Error> {
    let connection = lock_connection(db_connection)?;
    get_uncategorized_transactions(user_id, &connection)
}

/// A route handler that categorizes a user's uncategorized transactions and
/// responds with a summary of the run.
pub async fn categorize_endpoint(
    Path(user_id): Path<UserId>,
    State(state): State<CategorizeState>,
) -> Result<Json<CategorizationSummary>, Error> {
    let transactions = load_uncategorized(user_id, &state.db_connection)?;
    let result = state.categorizer.categorize(transactions).await;

    Ok(Json(result.summary()))
}

/// A route handler that queues a background categorization job.
pub async fn enqueue_categorization_endpoint(
    Path(user_id): Path<UserId>,
    State(state): State<JobState>,
) -> Result<(StatusCode, Json<QueuedJob>), Error> {
    state
        .job_queue
        .enqueue(CategorizationJob { user_id })
        .inspect_err(|error| {
            tracing::warn!("Could not queue categorization for user {user_id}: {error}")
        })?;

    Ok((StatusCode::ACCEPTED, Json(QueuedJob { user_id })))
}

/// A route handler that lists a user's pending candidates.
pub async fn get_pending_candidates_endpoint(
    Path(user_id): Path<UserId>,
    State(state): State<ReviewState>,
) -> Result<Json<Vec<CategorizationCandidate>>, Error> {
    let connection = lock_connection(&state.db_connection)?;
    get_pending_candidates_for_user(user_id, &connection).map(Json)
}

/// A route handler for accepting a candidate, responds with the updated transaction.
pub async fn accept_candidate_endpoint(
    Path(candidate_id): Path<CandidateId>,
    State(state): State<ReviewState>,
) -> Result<Json<Transaction>, Error> {
    let connection = lock_connection(&state.db_connection)?;
    accept_candidate(candidate_id, &connection).map(Json)
}

/// A route handler for rejecting a pending candidate.
pub async fn reject_candidate_endpoint(
    Path(candidate_id): Path<CandidateId>,
    State(state): State<ReviewState>,
) -> Result<Json<CategorizationCandidate>, Error> {
    let connection = lock_connection(&state.db_connection)?;
    reject_candidate(candidate_id, &connection).map(Json)
}

/// A route handler for setting a transaction's category by hand.
pub async fn correct_category_endpoint(
    Path(transaction_id): Path<TransactionId>,
    State(state): State<ReviewState>,
    Json(update): Json<CategoryUpdate>,
) -> Result<Json<Transaction>, Error> {
    let connection = lock_connection(&state.db_connection)?;
    correct_transaction_category(transaction_id, update.category_id, &connection).map(Json)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use rusqlite::Connection;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use time::macros::date;
    use tokio::sync::mpsc::Receiver;

    use crate::{
        AppState,
        candidate::{CandidateStatus, CategorizationCandidate},
        categorization::{
            CategorizationJob, CategorizationMethod, CategorizationSummary, JobQueue,
        },
        category::{CategoryName, create_category},
        config::CategorizationConfig,
        endpoints::{self, format_endpoint},
        routing::build_router,
        rule::{ConditionField, ConditionOperator, NewRule, RuleCondition, create_rule},
        transaction::{Transaction, create_transaction, get_transaction},
    };

    struct Fixture {
        server: TestServer,
        state: AppState,
        groceries_id: i64,
        // Dropping the receiver would close the queue.
        _receiver: Receiver<CategorizationJob>,
    }

    /// A server whose database holds one category, a rule for Walmart with
    /// the given confidence and one Walmart transaction.
    fn fixture(rule_confidence: rust_decimal::Decimal) -> Fixture {
        let (queue, receiver) = JobQueue::new(1);
        let state = AppState::new(
            Connection::open_in_memory().unwrap(),
            CategorizationConfig::default(),
            queue,
        )
        .unwrap();

        let groceries_id = {
            let connection = state.db_connection.lock().unwrap();
            let groceries =
                create_category(CategoryName::new_unchecked("Groceries"), &connection).unwrap();
            create_rule(
                NewRule::with_condition(
                    1,
                    "Walmart",
                    groceries.id,
                    1,
                    RuleCondition::new(
                        ConditionField::Description,
                        ConditionOperator::Contains,
                        "walmart",
                    ),
                )
                .confidence_score(Some(rule_confidence)),
                &connection,
            )
            .unwrap();
            create_transaction(
                Transaction::build(1, dec!(-54.20), date!(2025 - 03 - 02), "WALMART STORE #4521"),
                &connection,
            )
            .unwrap();
            groceries.id
        };

        let server = TestServer::new(build_router(state.clone()))
            .expect("Could not create test server.");

        Fixture {
            server,
            state,
            groceries_id,
            _receiver: receiver,
        }
    }

    #[tokio::test]
    async fn categorize_responds_with_summary() {
        let fixture = fixture(dec!(0.99));

        let response = fixture
            .server
            .post(&format_endpoint(endpoints::CATEGORIZE, 1))
            .await;

        response.assert_status_ok();
        let summary = response.json::<CategorizationSummary>();
        assert_eq!(summary.total_transactions, 1);
        assert_eq!(summary.auto_applied, 1);
        assert_eq!(summary.remaining, 0);

        let connection = fixture.state.db_connection.lock().unwrap();
        assert_eq!(
            get_transaction(1, &connection).unwrap().category_id,
            Some(fixture.groceries_id)
        );
    }

    #[tokio::test]
    async fn background_categorization_is_accepted() {
        let fixture = fixture(dec!(0.99));

        let response = fixture
            .server
            .post(&format_endpoint(endpoints::CATEGORIZE_BACKGROUND, 1))
            .await;

        response.assert_status(StatusCode::ACCEPTED);
        response.assert_json(&json!({ "user_id": 1 }));
    }

    #[tokio::test]
    async fn full_queue_is_unavailable() {
        let fixture = fixture(dec!(0.99));
        let endpoint = format_endpoint(endpoints::CATEGORIZE_BACKGROUND, 1);

        fixture.server.post(&endpoint).await;
        let response = fixture.server.post(&endpoint).await;

        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn candidate_can_be_listed_and_accepted() {
        let fixture = fixture(dec!(0.80));
        fixture
            .server
            .post(&format_endpoint(endpoints::CATEGORIZE, 1))
            .await
            .assert_status_ok();

        let candidates = fixture
            .server
            .get(&format_endpoint(endpoints::USER_CANDIDATES, 1))
            .await
            .json::<Vec<CategorizationCandidate>>();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].method, CategorizationMethod::Rule);

        let response = fixture
            .server
            .post(&format_endpoint(endpoints::ACCEPT_CANDIDATE, candidates[0].id))
            .await;

        response.assert_status_ok();
        let transaction = response.json::<Transaction>();
        assert_eq!(transaction.category_id, Some(fixture.groceries_id));

        fixture
            .server
            .post(&format_endpoint(endpoints::ACCEPT_CANDIDATE, candidates[0].id))
            .await
            .assert_status(StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn candidate_can_be_rejected() {
        let fixture = fixture(dec!(0.80));
        fixture
            .server
            .post(&format_endpoint(endpoints::CATEGORIZE, 1))
            .await;
        let candidates = fixture
            .server
            .get(&format_endpoint(endpoints::USER_CANDIDATES, 1))
            .await
            .json::<Vec<CategorizationCandidate>>();

        let response = fixture
            .server
            .post(&format_endpoint(endpoints::REJECT_CANDIDATE, candidates[0].id))
            .await;

        response.assert_status_ok();
        assert_eq!(
            response.json::<CategorizationCandidate>().status,
            CandidateStatus::Rejected
        );
    }

    #[tokio::test]
    async fn missing_candidate_is_not_found() {
        let fixture = fixture(dec!(0.80));

        fixture
            .server
            .post(&format_endpoint(endpoints::ACCEPT_CANDIDATE, 999))
            .await
            .assert_status_not_found();
    }

    #[tokio::test]
    async fn category_can_be_corrected() {
        let fixture = fixture(dec!(0.99));

        let response = fixture
            .server
            .put(&format_endpoint(endpoints::TRANSACTION_CATEGORY, 1))
            .json(&json!({ "category_id": fixture.groceries_id }))
            .await;

        response.assert_status_ok();
        let transaction = response.json::<Transaction>();
        assert_eq!(transaction.category_id, Some(fixture.groceries_id));
        assert_eq!(
            transaction.categorization.unwrap().method,
            CategorizationMethod::Manual
        );
    }

    #[tokio::test]
    async fn correcting_to_unknown_category_fails() {
        let fixture = fixture(dec!(0.99));

        fixture
            .server
            .put(&format_endpoint(endpoints::TRANSACTION_CATEGORY, 1))
            .json(&json!({ "category_id": 999 }))
            .await
            .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    }
}
