//! Database operations for categorization candidates.

use rusqlite::{Connection, Row, types::Type};
use time::OffsetDateTime;

use crate::{
    Error,
    candidate::models::{CandidateId, CandidateStatus, CategorizationCandidate, NewCandidate},
    database_id::{TransactionId, UserId},
    db::{get_decimal, with_transaction},
};

const CANDIDATE_COLUMNS: &str = "id, transaction_id, category_id, method, confidence, reasoning, \
    status, processor, source_id, suggest_rule, created_at";

/// Create many candidates in one SQL transaction.
///
/// A candidate that repeats the transaction, method and category of a
/// candidate that is still pending is skipped, so running the pipeline again
/// over the same transactions does not pile up duplicate suggestions.
///
/// Returns the candidates that were created.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error,
/// in which case no candidates are created.
pub fn create_candidates(
    candidates: &[NewCandidate],
    connection: &Connection,
) -> Result<Vec<CategorizationCandidate>, Error> {
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let created_at = OffsetDateTime::now_utc();
    with_transaction(connection, |connection| {
        let mut created = Vec::with_capacity(candidates.len());
        let mut statement = connection.prepare(&format!(
            "INSERT OR IGNORE INTO categorization_candidate (transaction_id, category_id, method,
                confidence, reasoning, status, processor, source_id, suggest_rule, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             RETURNING {CANDIDATE_COLUMNS}"
        ))?;

        for candidate in candidates {
            let mut rows = statement.query(rusqlite::params![
                candidate.transaction_id,
                candidate.category_id,
                candidate.method.as_str(),
                candidate.confidence.to_string(),
                candidate.reasoning,
                CandidateStatus::Pending.as_str(),
                candidate.processor,
                candidate.source_id,
                candidate.suggest_rule,
                created_at,
            ])?;

            if let Some(row) = rows.next()? {
                created.push(map_candidate_row(row)?);
            }
        }

        Ok(created)
    })
}

/// Retrieve a candidate by its ID.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if the candidate does not exist,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn get_candidate(
    candidate_id: CandidateId,
    connection: &Connection,
) -> Result<CategorizationCandidate, Error> {
    connection
        .prepare(&format!(
            "SELECT {CANDIDATE_COLUMNS} FROM categorization_candidate WHERE id = :id"
        ))?
        .query_row(&[(":id", &candidate_id)], map_candidate_row)
        .map_err(Error::from)
}

/// Retrieve the pending candidates for the transactions of `user_id`.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn get_pending_candidates_for_user(
    user_id: UserId,
    connection: &Connection,
) -> Result<Vec<CategorizationCandidate>, Error> {
    connection
        .prepare(
            "SELECT c.id, c.transaction_id, c.category_id, c.method, c.confidence, c.reasoning,
                c.status, c.processor, c.source_id, c.suggest_rule, c.created_at
             FROM categorization_candidate c
             INNER JOIN \"transaction\" t ON t.id = c.transaction_id
             WHERE t.user_id = :user_id AND c.status = 'pending'
             ORDER BY c.transaction_id ASC, c.id ASC",
        )?
        .query_map(&[(":user_id", &user_id)], map_candidate_row)?
        .map(|maybe_candidate| maybe_candidate.map_err(Error::from))
        .collect()
}

/// Retrieve every candidate for `transaction_id`, regardless of status.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn get_candidates_for_transaction(
    transaction_id: TransactionId,
    connection: &Connection,
) -> Result<Vec<CategorizationCandidate>, Error> {
    connection
        .prepare(&format!(
            "SELECT {CANDIDATE_COLUMNS} FROM categorization_candidate
             WHERE transaction_id = :transaction_id
             ORDER BY id ASC"
        ))?
        .query_map(&[(":transaction_id", &transaction_id)], map_candidate_row)?
        .map(|maybe_candidate| maybe_candidate.map_err(Error::from))
        .collect()
}

/// Set the status of a candidate.
///
/// # Errors
/// This function will return a:
/// - [Error::UpdateMissingCandidate] if the candidate does not exist,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn set_candidate_status(
    candidate_id: CandidateId,
    status: CandidateStatus,
    connection: &Connection,
) -> Result<(), Error> {
    let rows_affected = connection.execute(
        "UPDATE categorization_candidate SET status = ?2 WHERE id = ?1",
        rusqlite::params![candidate_id, status.as_str()],
    )?;

    if rows_affected == 0 {
        return Err(Error::UpdateMissingCandidate);
    }

    Ok(())
}

/// Reject the pending candidates of `transaction_id`, except `keep` if given.
///
/// Returns the number of candidates that were rejected.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn reject_pending_candidates(
    transaction_id: TransactionId,
    keep: Option<CandidateId>,
    connection: &Connection,
) -> Result<usize, Error> {
    let rows_affected = connection.execute(
        "UPDATE categorization_candidate SET status = 'rejected'
         WHERE transaction_id = ?1 AND status = 'pending' AND (?2 IS NULL OR id != ?2)",
        rusqlite::params![transaction_id, keep],
    )?;

    Ok(rows_affected)
}

/// Create the candidate table.
///
/// Candidates are deleted along with their transaction.
pub fn create_candidate_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS categorization_candidate (
            id INTEGER PRIMARY KEY,
            transaction_id INTEGER NOT NULL,
            category_id INTEGER NOT NULL,
            method TEXT NOT NULL,
            confidence TEXT NOT NULL,
            reasoning TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            processor TEXT NOT NULL,
            source_id INTEGER,
            suggest_rule INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY(transaction_id) REFERENCES \"transaction\"(id) ON UPDATE CASCADE ON DELETE CASCADE,
            FOREIGN KEY(category_id) REFERENCES category(id) ON UPDATE CASCADE ON DELETE CASCADE
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_candidate_pending_unique
            ON categorization_candidate(transaction_id, method, category_id)
            WHERE status = 'pending';",
    )?;

    Ok(())
}

fn map_candidate_row(row: &Row) -> Result<CategorizationCandidate, rusqlite::Error> {
    let method: String = row.get(3)?;
    let status: String = row.get(6)?;

    Ok(CategorizationCandidate {
        id: row.get(0)?,
        transaction_id: row.get(1)?,
        category_id: row.get(2)?,
        method: method
            .parse()
            .map_err(|error| {
                rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(error))
            })?,
        confidence: get_decimal(row, 4)?,
        reasoning: row.get(5)?,
        status: status
            .parse()
            .map_err(|error| {
                rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(error))
            })?,
        processor: row.get(7)?,
        source_id: row.get(8)?,
        suggest_rule: row.get(9)?,
        created_at: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;
    use rust_decimal_macros::dec;
    use time::macros::date;

    use crate::{
        Error,
        candidate::{CandidateStatus, NewCandidate},
        categorization::CategorizationMethod,
        category::{CategoryName, create_category},
        db::initialize,
        transaction::{Transaction, create_transaction},
    };

    use super::{
        create_candidates, get_candidate, get_candidates_for_transaction,
        get_pending_candidates_for_user, reject_pending_candidates, set_candidate_status,
    };

    struct Fixture {
        connection: Connection,
        transaction_id: i64,
        category_id: i64,
    }

    fn get_fixture() -> Fixture {
        let connection = Connection::open_in_memory().unwrap();
        initialize(&connection).unwrap();
        let category =
            create_category(CategoryName::new_unchecked("Groceries"), &connection).unwrap();
        let transaction = create_transaction(
            Transaction::build(1, dec!(-54.20), date!(2025 - 03 - 02), "WALMART #1234"),
            &connection,
        )
        .unwrap();

        Fixture {
            connection,
            transaction_id: transaction.id,
            category_id: category.id,
        }
    }

    fn new_candidate(fixture: &Fixture, method: CategorizationMethod) -> NewCandidate {
        NewCandidate {
            transaction_id: fixture.transaction_id,
            category_id: fixture.category_id,
            method,
            confidence: dec!(0.7),
            reasoning: Some("Walmart sells groceries".to_owned()),
            processor: "test".to_owned(),
            source_id: None,
            suggest_rule: true,
        }
    }

    #[test]
    fn create_candidates_are_pending() {
        let fixture = get_fixture();

        let created = create_candidates(
            &[new_candidate(&fixture, CategorizationMethod::LanguageModel)],
            &fixture.connection,
        )
        .unwrap();

        assert_eq!(created.len(), 1);
        let candidate = &created[0];
        assert_eq!(candidate.status, CandidateStatus::Pending);
        assert_eq!(candidate.confidence, dec!(0.7));
        assert!(candidate.suggest_rule);
        assert_eq!(
            get_candidate(candidate.id, &fixture.connection).as_ref(),
            Ok(candidate)
        );
    }

    #[test]
    fn duplicate_pending_candidates_are_skipped() {
        let fixture = get_fixture();
        let candidate = new_candidate(&fixture, CategorizationMethod::Rule);

        let first = create_candidates(&[candidate.clone()], &fixture.connection).unwrap();
        let second = create_candidates(&[candidate], &fixture.connection).unwrap();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(
            get_candidates_for_transaction(fixture.transaction_id, &fixture.connection)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn pending_candidates_are_scoped_to_user() {
        let fixture = get_fixture();
        create_candidates(
            &[new_candidate(&fixture, CategorizationMethod::Rule)],
            &fixture.connection,
        )
        .unwrap();

        assert_eq!(
            get_pending_candidates_for_user(1, &fixture.connection)
                .unwrap()
                .len(),
            1
        );
        assert!(
            get_pending_candidates_for_user(2, &fixture.connection)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn reject_pending_keeps_the_chosen_candidate() {
        let fixture = get_fixture();
        let created = create_candidates(
            &[
                new_candidate(&fixture, CategorizationMethod::Rule),
                new_candidate(&fixture, CategorizationMethod::LanguageModel),
            ],
            &fixture.connection,
        )
        .unwrap();

        let rejected = reject_pending_candidates(
            fixture.transaction_id,
            Some(created[0].id),
            &fixture.connection,
        )
        .unwrap();

        assert_eq!(rejected, 1);
        let statuses: Vec<_> =
            get_candidates_for_transaction(fixture.transaction_id, &fixture.connection)
                .unwrap()
                .into_iter()
                .map(|candidate| candidate.status)
                .collect();
        assert_eq!(
            statuses,
            vec![CandidateStatus::Pending, CandidateStatus::Rejected]
        );
    }

    #[test]
    fn set_status_on_missing_candidate_fails() {
        let fixture = get_fixture();

        assert_eq!(
            set_candidate_status(42, CandidateStatus::Accepted, &fixture.connection),
            Err(Error::UpdateMissingCandidate)
        );
    }

    #[test]
    fn candidates_are_deleted_with_their_transaction() {
        let fixture = get_fixture();
        create_candidates(
            &[new_candidate(&fixture, CategorizationMethod::Rule)],
            &fixture.connection,
        )
        .unwrap();

        fixture
            .connection
            .execute(
                "DELETE FROM \"transaction\" WHERE id = ?1",
                [fixture.transaction_id],
            )
            .unwrap();

        assert!(
            get_candidates_for_transaction(fixture.transaction_id, &fixture.connection)
                .unwrap()
                .is_empty()
        );
    }
}
