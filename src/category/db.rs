//! Database operations for categories.

use rusqlite::{Connection, Row};

use crate::{
    Error,
    category::{Category, CategoryId, CategoryName},
};

/// Create a category and return it with its generated ID.
pub fn create_category(name: CategoryName, connection: &Connection) -> Result<Category, Error> {
    connection.execute(
        "INSERT INTO category (name) VALUES (?1);",
        (name.as_ref(),),
    )?;

    let id = connection.last_insert_rowid();

    Ok(Category { id, name })
}

/// Retrieve a single category by ID.
pub fn get_category(category_id: CategoryId, connection: &Connection) -> Result<Category, Error> {
    connection
        .prepare("SELECT id, name FROM category WHERE id = :id;")?
        .query_row(&[(":id", &category_id)], map_row)
        .map_err(|error| error.into())
}

/// Retrieve all categories ordered alphabetically by name.
pub fn get_all_categories(connection: &Connection) -> Result<Vec<Category>, Error> {
    connection
        .prepare("SELECT id, name FROM category ORDER BY name ASC;")?
        .query_map([], map_row)?
        .map(|maybe_category| maybe_category.map_err(|error| error.into()))
        .collect()
}

/// Initialize the category table and indexes.
pub fn create_category_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS category (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        );

        CREATE INDEX IF NOT EXISTS idx_category_name ON category(name);",
    )?;

    Ok(())
}

fn map_row(row: &Row) -> Result<Category, rusqlite::Error> {
    let id = row.get(0)?;
    let raw_name: String = row.get(1)?;
    let name = CategoryName::new_unchecked(&raw_name);

    Ok(Category { id, name })
}


#[cfg(test)]
mod category_query_tests {
    use rusqlite::Connection;

    use crate::{
        Error,
        category::{CategoryName, create_category, get_all_categories, get_category},
    };

    use super::create_category_table;

    fn get_test_connection() -> Connection {
        let connection = Connection::open_in_memory().unwrap();
        create_category_table(&connection).expect("Could not create category table");
        connection
    }

    #[test]
    fn create_and_get_category() {
        let connection = get_test_connection();
        let name = CategoryName::new("Groceries").unwrap();

        let category = create_category(name.clone(), &connection).unwrap();
        let got = get_category(category.id, &connection).unwrap();

        assert_eq!(got.name, name);
        assert_eq!(got, category);
    }

    #[test]
    fn get_missing_category_returns_not_found() {
        let connection = get_test_connection();

        let result = get_category(42, &connection);

        assert_eq!(result, Err(Error::NotFound));
    }

    #[test]
    fn get_all_categories_sorts_by_name() {
        let connection = get_test_connection();
        create_category(CategoryName::new_unchecked("Transport"), &connection).unwrap();
        create_category(CategoryName::new_unchecked("Groceries"), &connection).unwrap();

        let names: Vec<String> = get_all_categories(&connection)
            .unwrap()
            .into_iter()
            .map(|category| category.name.to_string())
            .collect();

        assert_eq!(names, vec!["Groceries", "Transport"]);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let connection = get_test_connection();
        create_category(CategoryName::new_unchecked("Rent"), &connection).unwrap();

        let result = create_category(CategoryName::new_unchecked("Rent"), &connection);

        assert!(matches!(result, Err(Error::SqlError(_))));
    }
}
