//! Mappings from the category names banks and data providers attach to
//! transactions to the user's own categories.

mod db;
mod models;

pub use db::{
    create_bank_category_mapping, create_bank_category_mapping_table, find_bank_category_mapping,
    get_bank_category_mapping, record_mapping_applications, record_mapping_override,
};
pub use models::{
    BankCategoryMapping, BankCategoryMappingId, MappingMatch, MappingMatchKind,
    normalize_provider_category,
};
