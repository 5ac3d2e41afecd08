//! # Receptordb - record layer with live schema evolution
//!
//! Receptordb exposes stored rows as [`Receptor`]s whose fields are governed by
//! independently loadable [`Variable`]s.
//!
//! Receptordb provides:
//! - Field containers that stay lossless while variables are loaded, unloaded,
//!   re-typed or dropped on a live table
//! - Pluggable storage backends (SQLite, in-process key-value)
//! - A table-scoped identity cache so one stored row maps to one in-memory receptor
//! - Equality-conjunction retrieval that merges cached and stored matches

pub mod value;
pub mod types;
pub mod variable;
pub mod container;
pub mod receptor;
pub mod table;
pub mod database;
pub mod manager;
pub mod cache;
pub mod retrieval;
pub mod storage;
pub mod config;
pub mod output;

// Re-exports for convenient access
pub use value::{RawValue, Value};
pub use types::VariableType;
pub use variable::Variable;
pub use container::{ActiveContainer, Container, InactiveContainer};
pub use receptor::Receptor;
pub use table::Table;
pub use database::Database;
pub use retrieval::{Condition, retrieve};
pub use storage::{BackendError, BackendErrorKind, MemoryBackend, SqliteBackend, StorageBackend};

/// Result type alias for Receptordb operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Receptordb operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid state: {0}")]
    State(String),

    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Backend error: {0}")]
    Backend(BackendError),

    #[error("Task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<BackendError> for Error {
    fn from(err: BackendError) -> Self {
        match err.kind {
            BackendErrorKind::Connection => Error::Connection(err.message),
            _ => Error::Backend(err),
        }
    }
}
