//! Reviewing candidates and correcting categories.
//!
//! Every review updates the statistics of the rule or bank category mapping
//! that produced the suggestion, so the confidence of future suggestions
//! reflects how often the user agreed with them.

use rusqlite::Connection;
use rust_decimal::Decimal;
use time::OffsetDateTime;

use crate::{
    Error,
    bank_category::{record_mapping_applications, record_mapping_override},
    candidate::{
        db::{get_candidate, reject_pending_candidates, set_candidate_status},
        models::{CandidateId, CandidateStatus, CategorizationCandidate},
    },
    categorization::CategorizationMethod,
    category::{CategoryId, get_category},
    database_id::{DatabaseId, TransactionId},
    rule::record_rule_correction,
    transaction::{
        CategorizationMetadata, Transaction, get_transaction, update_transaction_category,
    },
};

/// The processor name recorded on categories written during review.
pub const REVIEW_PROCESSOR: &str = "review";

/// Accept a pending candidate.
///
/// The candidate's category is written to its transaction and the other
/// pending candidates of the transaction are rejected.
///
/// Returns the updated transaction.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if the candidate does not exist,
/// - [Error::CandidateAlreadyReviewed] if the candidate is not pending,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn accept_candidate(
    candidate_id: CandidateId,
    connection: &Connection,
) -> Result<Transaction, Error> {
    let sql_transaction = connection.unchecked_transaction()?;

    let candidate = get_pending_candidate(candidate_id, &sql_transaction)?;
    set_candidate_status(candidate.id, CandidateStatus::Accepted, &sql_transaction)?;
    reject_pending_candidates(candidate.transaction_id, Some(candidate.id), &sql_transaction)?;

    let mut transaction = get_transaction(candidate.transaction_id, &sql_transaction)?;
    transaction.apply_category(
        candidate.category_id,
        CategorizationMetadata {
            method: candidate.method,
            confidence: candidate.confidence,
            source_id: candidate.source_id,
            processor: REVIEW_PROCESSOR.to_owned(),
            categorized_at: OffsetDateTime::now_utc(),
        },
    );
    update_transaction_category(&transaction, &sql_transaction)?;

    if let (CategorizationMethod::BankCategory, Some(mapping_id)) =
        (candidate.method, candidate.source_id)
    {
        record_mapping_applications(&[mapping_id], &sql_transaction)?;
    }

    sql_transaction.commit()?;

    tracing::debug!(
        "Accepted candidate {} for transaction {}",
        candidate.id,
        candidate.transaction_id
    );

    Ok(transaction)
}

/// Reject a pending candidate.
///
/// Returns the rejected candidate.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if the candidate does not exist,
/// - [Error::CandidateAlreadyReviewed] if the candidate is not pending,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn reject_candidate(
    candidate_id: CandidateId,
    connection: &Connection,
) -> Result<CategorizationCandidate, Error> {
    let sql_transaction = connection.unchecked_transaction()?;

    let mut candidate = get_pending_candidate(candidate_id, &sql_transaction)?;
    set_candidate_status(candidate.id, CandidateStatus::Rejected, &sql_transaction)?;
    record_correction(candidate.method, candidate.source_id, &sql_transaction)?;

    sql_transaction.commit()?;
    candidate.status = CandidateStatus::Rejected;

    tracing::debug!(
        "Rejected candidate {} for transaction {}",
        candidate.id,
        candidate.transaction_id
    );

    Ok(candidate)
}

/// Set the category of a transaction by hand.
///
/// When the replaced category was chosen by a rule or bank category mapping,
/// the change counts as a correction of that rule or mapping. Pending
/// candidates of the transaction are rejected.
///
/// Returns the updated transaction.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if the transaction does not exist,
/// - [Error::InvalidCategory] if the category does not exist,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn correct_transaction_category(
    transaction_id: TransactionId,
    category_id: CategoryId,
    connection: &Connection,
) -> Result<Transaction, Error> {
    let sql_transaction = connection.unchecked_transaction()?;

    get_category(category_id, &sql_transaction).map_err(|error| match error {
        Error::NotFound => Error::InvalidCategory(Some(category_id)),
        error => error,
    })?;
    let mut transaction = get_transaction(transaction_id, &sql_transaction)?;

    if transaction.category_id != Some(category_id)
        && let Some(previous) = transaction.categorization.as_ref()
    {
        record_correction(previous.method, previous.source_id, &sql_transaction)?;
    }

    reject_pending_candidates(transaction.id, None, &sql_transaction)?;

    transaction.apply_category(
        category_id,
        CategorizationMetadata {
            method: CategorizationMethod::Manual,
            confidence: Decimal::ONE,
            source_id: None,
            processor: REVIEW_PROCESSOR.to_owned(),
            categorized_at: OffsetDateTime::now_utc(),
        },
    );
    update_transaction_category(&transaction, &sql_transaction)?;

    sql_transaction.commit()?;

    Ok(transaction)
}

fn get_pending_candidate(
    candidate_id: CandidateId,
    connection: &Connection,
) -> Result<CategorizationCandidate, Error> {
    let candidate = get_candidate(candidate_id, connection)?;

    if candidate.status != CandidateStatus::Pending {
        return Err(Error::CandidateAlreadyReviewed(candidate.id));
    }

    Ok(candidate)
}

/// Count a correction against the rule or mapping that produced a category.
///
/// The rule or mapping may have been deleted since, which is not an error.
fn record_correction(
    method: CategorizationMethod,
    source_id: Option<DatabaseId>,
    connection: &Connection,
) -> Result<(), Error> {
    let Some(source_id) = source_id else {
        return Ok(());
    };

    let result = match method {
        CategorizationMethod::Rule => record_rule_correction(source_id, connection),
        CategorizationMethod::BankCategory => record_mapping_override(source_id, connection),
        _ => Ok(()),
    };

    match result {
        Err(Error::UpdateMissingRule | Error::NotFound) => {
            tracing::debug!("{method} {source_id} no longer exists, skipping correction");
            Ok(())
        }
        result => result,
    }
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;
    use rust_decimal_macros::dec;
    use time::macros::date;

    use crate::{
        Error,
        bank_category::{create_bank_category_mapping, get_bank_category_mapping},
        candidate::{
            CandidateStatus, NewCandidate, create_candidates, get_candidate,
            get_candidates_for_transaction,
        },
        categorization::CategorizationMethod,
        category::{CategoryName, create_category},
        db::initialize,
        rule::{
            ConditionField, ConditionOperator, NewRule, RuleCondition, create_rule, get_rule,
        },
        transaction::{
            CategorizationMetadata, Transaction, create_transaction, get_transaction,
            update_transaction_category,
        },
    };

    use super::{REVIEW_PROCESSOR, accept_candidate, correct_transaction_category, reject_candidate};

    struct Fixture {
        connection: Connection,
        transaction: Transaction,
        groceries_id: i64,
        shopping_id: i64,
    }

    fn get_fixture() -> Fixture {
        let connection = Connection::open_in_memory().unwrap();
        initialize(&connection).unwrap();
        let groceries =
            create_category(CategoryName::new_unchecked("Groceries"), &connection).unwrap();
        let shopping =
            create_category(CategoryName::new_unchecked("Shopping"), &connection).unwrap();
        let transaction = create_transaction(
            Transaction::build(1, dec!(-54.20), date!(2025 - 03 - 02), "WALMART #1234")
                .bank_category(Some("Merchandise")),
            &connection,
        )
        .unwrap();

        Fixture {
            connection,
            transaction,
            groceries_id: groceries.id,
            shopping_id: shopping.id,
        }
    }

    fn candidate(
        fixture: &Fixture,
        category_id: i64,
        method: CategorizationMethod,
        source_id: Option<i64>,
    ) -> NewCandidate {
        NewCandidate {
            transaction_id: fixture.transaction.id,
            category_id,
            method,
            confidence: dec!(0.75),
            reasoning: None,
            processor: "test".to_owned(),
            source_id,
            suggest_rule: false,
        }
    }

    #[test]
    fn accept_applies_category_and_rejects_siblings() {
        let fixture = get_fixture();
        let created = create_candidates(
            &[
                candidate(
                    &fixture,
                    fixture.groceries_id,
                    CategorizationMethod::LanguageModel,
                    None,
                ),
                candidate(&fixture, fixture.shopping_id, CategorizationMethod::LanguageModel, None),
            ],
            &fixture.connection,
        )
        .unwrap();

        let transaction = accept_candidate(created[0].id, &fixture.connection).unwrap();

        assert_eq!(transaction.category_id, Some(fixture.groceries_id));
        let metadata = transaction.categorization.as_ref().unwrap();
        assert_eq!(metadata.method, CategorizationMethod::LanguageModel);
        assert_eq!(metadata.processor, REVIEW_PROCESSOR);
        assert_eq!(
            get_transaction(transaction.id, &fixture.connection).unwrap(),
            transaction
        );

        let statuses: Vec<_> =
            get_candidates_for_transaction(fixture.transaction.id, &fixture.connection)
                .unwrap()
                .into_iter()
                .map(|candidate| candidate.status)
                .collect();
        assert_eq!(
            statuses,
            vec![CandidateStatus::Accepted, CandidateStatus::Rejected]
        );
    }

    #[test]
    fn accept_bank_category_candidate_counts_application() {
        let fixture = get_fixture();
        let mapping = create_bank_category_mapping(
            1,
            "Merchandise",
            fixture.shopping_id,
            dec!(0.8),
            &fixture.connection,
        )
        .unwrap();
        let created = create_candidates(
            &[candidate(
                &fixture,
                fixture.shopping_id,
                CategorizationMethod::BankCategory,
                Some(mapping.id),
            )],
            &fixture.connection,
        )
        .unwrap();

        accept_candidate(created[0].id, &fixture.connection).unwrap();

        let mapping = get_bank_category_mapping(mapping.id, &fixture.connection).unwrap();
        assert_eq!(mapping.application_count, 1);
    }

    #[test]
    fn reviewing_twice_fails() {
        let fixture = get_fixture();
        let created = create_candidates(
            &[candidate(&fixture, fixture.groceries_id, CategorizationMethod::Statistical, None)],
            &fixture.connection,
        )
        .unwrap();
        let id = created[0].id;

        accept_candidate(id, &fixture.connection).unwrap();

        assert_eq!(
            accept_candidate(id, &fixture.connection),
            Err(Error::CandidateAlreadyReviewed(id))
        );
        assert_eq!(
            reject_candidate(id, &fixture.connection),
            Err(Error::CandidateAlreadyReviewed(id))
        );
    }

    #[test]
    fn reject_rule_candidate_counts_correction() {
        let fixture = get_fixture();
        let rule = create_rule(
            NewRule::with_condition(
                1,
                "Walmart",
                fixture.groceries_id,
                1,
                RuleCondition::new(
                    ConditionField::Description,
                    ConditionOperator::Contains,
                    "walmart",
                ),
            ),
            &fixture.connection,
        )
        .unwrap();
        let created = create_candidates(
            &[candidate(
                &fixture,
                fixture.groceries_id,
                CategorizationMethod::Rule,
                Some(rule.id),
            )],
            &fixture.connection,
        )
        .unwrap();

        let rejected = reject_candidate(created[0].id, &fixture.connection).unwrap();

        assert_eq!(rejected.status, CandidateStatus::Rejected);
        assert_eq!(
            get_candidate(rejected.id, &fixture.connection).unwrap().status,
            CandidateStatus::Rejected
        );
        assert_eq!(
            get_rule(rule.id, &fixture.connection).unwrap().correction_count,
            1
        );
        assert_eq!(
            get_transaction(fixture.transaction.id, &fixture.connection)
                .unwrap()
                .category_id,
            None
        );
    }

    #[test]
    fn reject_candidate_of_deleted_mapping_succeeds() {
        let fixture = get_fixture();
        let created = create_candidates(
            &[candidate(
                &fixture,
                fixture.groceries_id,
                CategorizationMethod::BankCategory,
                Some(999),
            )],
            &fixture.connection,
        )
        .unwrap();

        assert!(reject_candidate(created[0].id, &fixture.connection).is_ok());
    }

    #[test]
    fn correction_counts_against_bank_mapping() {
        let fixture = get_fixture();
        let mapping = create_bank_category_mapping(
            1,
            "Merchandise",
            fixture.shopping_id,
            dec!(0.95),
            &fixture.connection,
        )
        .unwrap();
        let mut transaction = fixture.transaction.clone();
        transaction.apply_category(
            fixture.shopping_id,
            CategorizationMetadata {
                method: CategorizationMethod::BankCategory,
                confidence: dec!(0.95),
                source_id: Some(mapping.id),
                processor: "bank_category".to_owned(),
                categorized_at: time::OffsetDateTime::UNIX_EPOCH,
            },
        );
        update_transaction_category(&transaction, &fixture.connection).unwrap();

        let corrected =
            correct_transaction_category(transaction.id, fixture.groceries_id, &fixture.connection)
                .unwrap();

        assert_eq!(corrected.category_id, Some(fixture.groceries_id));
        assert_eq!(
            corrected.categorization.as_ref().map(|metadata| metadata.method),
            Some(CategorizationMethod::Manual)
        );
        assert_eq!(
            get_bank_category_mapping(mapping.id, &fixture.connection)
                .unwrap()
                .override_count,
            1
        );
    }

    #[test]
    fn correction_to_same_category_is_not_counted() {
        let fixture = get_fixture();
        let rule = create_rule(
            NewRule::with_condition(
                1,
                "Walmart",
                fixture.groceries_id,
                1,
                RuleCondition::new(
                    ConditionField::Description,
                    ConditionOperator::Contains,
                    "walmart",
                ),
            ),
            &fixture.connection,
        )
        .unwrap();
        let mut transaction = fixture.transaction.clone();
        transaction.apply_category(
            fixture.groceries_id,
            CategorizationMetadata {
                method: CategorizationMethod::Rule,
                confidence: dec!(0.96),
                source_id: Some(rule.id),
                processor: "rules".to_owned(),
                categorized_at: time::OffsetDateTime::UNIX_EPOCH,
            },
        );
        update_transaction_category(&transaction, &fixture.connection).unwrap();

        correct_transaction_category(transaction.id, fixture.groceries_id, &fixture.connection)
            .unwrap();

        assert_eq!(
            get_rule(rule.id, &fixture.connection).unwrap().correction_count,
            0
        );
    }

    #[test]
    fn correction_with_unknown_category_fails() {
        let fixture = get_fixture();

        assert_eq!(
            correct_transaction_category(fixture.transaction.id, 999, &fixture.connection),
            Err(Error::InvalidCategory(Some(999)))
        );
    }
}
