//! SQL statement builders for the SQLite backend

use super::{ColumnSpec, ID_COLUMN, INDEX_COLUMN};

/// Quote an identifier for SQLite
pub fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// SQL to create a table with the reserved columns
pub fn create_table(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({} INTEGER PRIMARY KEY AUTOINCREMENT, {} TEXT NOT NULL)",
        quote(table),
        quote(INDEX_COLUMN),
        quote(ID_COLUMN),
    )
}

/// Index over the external key; not unique so duplicate identities stay detectable
pub fn create_id_index(table: &str) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {}({})",
        quote(&format!("idx_{}_id", table)),
        quote(table),
        quote(ID_COLUMN),
    )
}

pub fn drop_table(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote(table))
}

pub fn table_exists() -> &'static str {
    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1"
}

pub fn table_info(table: &str) -> String {
    format!("PRAGMA table_info({})", quote(table))
}

/// `ALTER TABLE ... ADD COLUMN` with the default rendered as a literal.
///
/// SQLite requires a non-NULL default when adding a NOT NULL column.
pub fn add_column(table: &str, column: &ColumnSpec<'_>) -> String {
    let mut sql = format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quote(table),
        quote(column.name),
        column.physical_type,
    );
    if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    if !column.default.is_null() {
        sql.push_str(" DEFAULT ");
        sql.push_str(&column.default.to_sql_literal());
    }
    sql
}

pub fn drop_column(table: &str, column: &str) -> String {
    format!("ALTER TABLE {} DROP COLUMN {}", quote(table), quote(column))
}

pub fn select_rows(table: &str) -> String {
    format!(
        "SELECT * FROM {} WHERE {} = ?1 ORDER BY {}",
        quote(table),
        quote(ID_COLUMN),
        quote(INDEX_COLUMN),
    )
}

/// Equality-conjunction lookup; `IS` keeps NULL conditions meaningful
pub fn select_matching(table: &str, columns: &[&str], exclude: &[i64]) -> String {
    let mut clauses: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} IS ?{}", quote(c), i + 1))
        .collect();

    if !exclude.is_empty() {
        let list: Vec<String> = exclude.iter().map(|i| i.to_string()).collect();
        clauses.push(format!("{} NOT IN ({})", quote(INDEX_COLUMN), list.join(", ")));
    }

    format!(
        "SELECT {}, {} FROM {} WHERE {} ORDER BY {}",
        quote(INDEX_COLUMN),
        quote(ID_COLUMN),
        quote(table),
        clauses.join(" AND "),
        quote(INDEX_COLUMN),
    )
}

pub fn insert_row(table: &str) -> String {
    format!("INSERT INTO {} ({}) VALUES (?1)", quote(table), quote(ID_COLUMN))
}

/// Single UPDATE keyed by `id`; the id binds as the last parameter
pub fn update_row(table: &str, columns: &[&str]) -> String {
    let sets: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ?{}", quote(c), i + 1))
        .collect();

    format!(
        "UPDATE {} SET {} WHERE {} = ?{}",
        quote(table),
        sets.join(", "),
        quote(ID_COLUMN),
        columns.len() + 1,
    )
}

pub fn delete_row(table: &str) -> String {
    format!("DELETE FROM {} WHERE {} = ?1", quote(table), quote(ID_COLUMN))
}
