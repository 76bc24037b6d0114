//! The stage implementations, one per [StageKind](super::StageKind).

mod bank_category;
mod language_model;
mod rules;
mod statistical;

pub use bank_category::BankCategoryStage;
pub use language_model::LanguageModelStage;
pub use rules::RulesStage;
pub use statistical::StatisticalStage;
