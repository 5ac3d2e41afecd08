//! Storage Layer - physical schema and row operations
//!
//! Backends implement [`StorageBackend`]. Every table carries two reserved
//! columns:
//! - `index`: storage-assigned ordinal (integer)
//! - `id`: the stable external key (string)
//!
//! Backend failures are classified into a small closed [`BackendErrorKind`]
//! so the managers can treat duplicate/unknown column conditions as
//! idempotent outcomes.

pub mod memory;
pub mod schema;
pub mod sqlite;

use async_trait::async_trait;

use crate::value::RawValue;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

/// Reserved column holding the external key
pub const ID_COLUMN: &str = "id";
/// Reserved column holding the storage ordinal
pub const INDEX_COLUMN: &str = "index";

/// True for `id` and `index`, compared case-insensitively
pub fn is_reserved(name: &str) -> bool {
    name.eq_ignore_ascii_case(ID_COLUMN) || name.eq_ignore_ascii_case(INDEX_COLUMN)
}

/// Which family of store a backend talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Sqlite,
    KeyValue,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Sqlite => "sqlite",
            BackendKind::KeyValue => "key-value",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Closed classification of backend failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// add-column on a column that already exists
    DuplicateColumn,
    /// drop/query on a column that does not exist
    UnknownColumn,
    /// No live connection
    Connection,
    Other,
}

/// A failure reported by a storage backend, already classified
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Other, message)
    }

    pub fn disconnected() -> Self {
        Self::new(BackendErrorKind::Connection, "no live connection to the backend")
    }

    pub fn is_duplicate_column(&self) -> bool {
        self.kind == BackendErrorKind::DuplicateColumn
    }

    pub fn is_unknown_column(&self) -> bool {
        self.kind == BackendErrorKind::UnknownColumn
    }
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// A full stored row, reserved columns split out
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub index: i64,
    pub id: String,
    /// Non-reserved fields in physical column order
    pub fields: Vec<(String, RawValue)>,
}

/// Column definition handed to `add_column`
#[derive(Debug, Clone)]
pub struct ColumnSpec<'a> {
    pub name: &'a str,
    pub physical_type: &'a str,
    pub default: &'a RawValue,
    pub nullable: bool,
}

/// Physical schema and row operations consumed by the managers.
///
/// All operations are async; blocking backends move their work onto the
/// runtime's blocking pool.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Whether conditional retrieval (`select_matching`) is available
    fn supports_retrieval(&self) -> bool {
        true
    }

    async fn is_connected(&self) -> bool;

    // ========== Schema Operations ==========

    async fn table_exists(&self, table: &str) -> BackendResult<bool>;

    /// Create the table with its reserved columns if absent
    async fn create_table(&self, table: &str) -> BackendResult<()>;

    async fn drop_table(&self, table: &str) -> BackendResult<()>;

    async fn add_column(&self, table: &str, column: ColumnSpec<'_>) -> BackendResult<()>;

    /// Backend-specific physical type adjustment; a no-op where the column
    /// type is fixed at creation
    async fn set_column_type(&self, table: &str, column: &str, physical_type: &str) -> BackendResult<()>;

    async fn drop_column(&self, table: &str, column: &str) -> BackendResult<()>;

    async fn column_exists(&self, table: &str, column: &str) -> BackendResult<bool>;

    // ========== Row Operations ==========

    /// All rows whose `id` equals `id`
    async fn select_rows(&self, table: &str, id: &str) -> BackendResult<Vec<RawRow>>;

    /// `(index, id)` of rows matching every `column = value` pair, skipping
    /// `exclude` indices, ordered ascending by index
    async fn select_matching(
        &self,
        table: &str,
        predicate: &[(String, RawValue)],
        exclude: &[i64],
    ) -> BackendResult<Vec<(i64, String)>>;

    async fn insert_row(&self, table: &str, id: &str) -> BackendResult<()>;

    async fn update_row(&self, table: &str, id: &str, fields: &[(String, RawValue)]) -> BackendResult<()>;

    async fn delete_row(&self, table: &str, id: &str) -> BackendResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_names() {
        assert!(is_reserved("id"));
        assert!(is_reserved("INDEX"));
        assert!(!is_reserved("identity"));
    }
}
