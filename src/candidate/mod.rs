//! Categorization candidates: suggested categories that wait for the user to
//! accept or reject them.

mod db;
mod models;
mod review;

pub use db::{
    create_candidate_table, create_candidates, get_candidate, get_candidates_for_transaction,
    get_pending_candidates_for_user, reject_pending_candidates, set_candidate_status,
};
pub use models::{CandidateId, CandidateStatus, CategorizationCandidate, NewCandidate};
pub use review::{accept_candidate, correct_transaction_category, reject_candidate};
