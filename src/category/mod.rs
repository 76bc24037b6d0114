//! Categories that transactions are sorted into.

mod db;
mod domain;

pub use db::{create_category, create_category_table, get_all_categories, get_category};
pub use domain::{Category, CategoryId, CategoryName};
