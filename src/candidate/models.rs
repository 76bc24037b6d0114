use std::{fmt::Display, str::FromStr};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    Error,
    categorization::CategorizationMethod,
    category::CategoryId,
    database_id::{DatabaseId, TransactionId},
};

/// Database identifier for a categorization candidate.
pub type CandidateId = DatabaseId;

/// Where a candidate is in the review workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    /// Waiting for the user to review it.
    Pending,
    /// The user accepted the suggested category.
    Accepted,
    /// The user rejected the suggested category.
    Rejected,
}

impl CandidateStatus {
    /// The label stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStatus::Pending => "pending",
            CandidateStatus::Accepted => "accepted",
            CandidateStatus::Rejected => "rejected",
        }
    }
}

impl Display for CandidateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CandidateStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CandidateStatus::Pending),
            "accepted" => Ok(CandidateStatus::Accepted),
            "rejected" => Ok(CandidateStatus::Rejected),
            other => Err(Error::UnknownCandidateStatus(other.to_owned())),
        }
    }
}

/// A suggested category that has not been written to the database yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewCandidate {
    pub transaction_id: TransactionId,
    pub category_id: CategoryId,
    pub method: CategorizationMethod,
    /// Between 0 and 1.
    pub confidence: Decimal,
    /// Why the category was suggested, shown to the reviewer.
    pub reasoning: Option<String>,
    /// The name of the stage that produced the suggestion.
    pub processor: String,
    /// The rule or bank category mapping behind the suggestion, if any.
    pub source_id: Option<DatabaseId>,
    /// Whether the reviewer should be offered to turn the suggestion into a rule.
    pub suggest_rule: bool,
}

/// A suggested category for a transaction that needs review before it is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorizationCandidate {
    pub id: CandidateId,
    pub transaction_id: TransactionId,
    pub category_id: CategoryId,
    pub method: CategorizationMethod,
    pub confidence: Decimal,
    pub reasoning: Option<String>,
    pub status: CandidateStatus,
    pub processor: String,
    pub source_id: Option<DatabaseId>,
    pub suggest_rule: bool,
    pub created_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use crate::Error;

    use super::CandidateStatus;

    #[test]
    fn status_labels_parse_back() {
        for status in [
            CandidateStatus::Pending,
            CandidateStatus::Accepted,
            CandidateStatus::Rejected,
        ] {
            assert_eq!(status.as_str().parse::<CandidateStatus>(), Ok(status));
        }
    }

    #[test]
    fn unknown_status_is_an_error() {
        assert_eq!(
            "archived".parse::<CandidateStatus>(),
            Err(Error::UnknownCandidateStatus("archived".to_owned()))
        );
    }
}
