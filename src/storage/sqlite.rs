//! SQLite storage implementation

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{Connection, params_from_iter};

use super::{
    BackendError, BackendErrorKind, BackendKind, BackendResult, ColumnSpec, RawRow,
    StorageBackend, ID_COLUMN, INDEX_COLUMN, schema,
};
use crate::value::RawValue;

/// Classify a SQLite failure for the idempotence checks
pub fn classify(err: &rusqlite::Error) -> BackendErrorKind {
    let message = err.to_string();
    if message.contains("duplicate column name") {
        BackendErrorKind::DuplicateColumn
    } else if message.contains("no such column") {
        BackendErrorKind::UnknownColumn
    } else {
        BackendErrorKind::Other
    }
}

impl From<rusqlite::Error> for BackendError {
    fn from(err: rusqlite::Error) -> Self {
        BackendError::new(classify(&err), err.to_string())
    }
}

/// SQLite-backed storage.
///
/// rusqlite is blocking, so every statement runs on the tokio blocking pool
/// while holding the connection mutex.
#[derive(Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteBackend {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path) -> BackendResult<Self> {
        let conn = Connection::open(path)?;
        Ok(Self::from_connection(conn))
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> BackendResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        }
    }

    /// Drop the connection; later operations fail with a connection error
    pub fn close(&self) {
        if let Ok(mut guard) = self.conn.lock() {
            guard.take();
        }
    }

    /// Run raw SQL outside the managed API (maintenance and tests)
    pub async fn execute_batch(&self, sql: &str) -> BackendResult<()> {
        let sql = sql.to_string();
        self.with_conn(move |conn| conn.execute_batch(&sql)).await
    }

    async fn with_conn<T, F>(&self, f: F) -> BackendResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| BackendError::other("sqlite connection mutex poisoned"))?;
            let conn = guard.as_ref().ok_or_else(BackendError::disconnected)?;
            f(conn).map_err(BackendError::from)
        })
        .await
        .map_err(|e| BackendError::other(format!("sqlite worker failed: {}", e)))?
    }
}

/// Helper to convert a `SELECT *` row into a RawRow
fn row_to_raw(row: &rusqlite::Row, columns: &[String]) -> rusqlite::Result<RawRow> {
    let mut index = None;
    let mut id = None;
    let mut fields = Vec::with_capacity(columns.len().saturating_sub(2));

    for (i, name) in columns.iter().enumerate() {
        let value: rusqlite::types::Value = row.get(i)?;
        if name.eq_ignore_ascii_case(INDEX_COLUMN) {
            if let rusqlite::types::Value::Integer(v) = value {
                index = Some(v);
            }
        } else if name.eq_ignore_ascii_case(ID_COLUMN) {
            if let rusqlite::types::Value::Text(v) = value {
                id = Some(v);
            }
        } else {
            fields.push((name.clone(), RawValue::from(value)));
        }
    }

    match (index, id) {
        (Some(index), Some(id)) => Ok(RawRow { index, id, fields }),
        _ => Err(rusqlite::Error::InvalidColumnName(format!(
            "row lacks reserved `{}`/`{}` columns",
            INDEX_COLUMN, ID_COLUMN
        ))),
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    async fn is_connected(&self) -> bool {
        self.conn.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }

    async fn table_exists(&self, table: &str) -> BackendResult<bool> {
        let table = table.to_string();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(schema::table_exists(), [&table], |row| row.get(0))?;
            Ok(count > 0)
        })
        .await
    }

    async fn create_table(&self, table: &str) -> BackendResult<()> {
        let create = schema::create_table(table);
        let index = schema::create_id_index(table);
        tracing::debug!("{}", create);
        self.with_conn(move |conn| {
            conn.execute(&create, [])?;
            conn.execute(&index, [])?;
            Ok(())
        })
        .await
    }

    async fn drop_table(&self, table: &str) -> BackendResult<()> {
        let sql = schema::drop_table(table);
        tracing::debug!("{}", sql);
        self.with_conn(move |conn| conn.execute(&sql, []).map(|_| ())).await
    }

    async fn add_column(&self, table: &str, column: ColumnSpec<'_>) -> BackendResult<()> {
        let sql = schema::add_column(table, &column);
        tracing::debug!("{}", sql);
        self.with_conn(move |conn| conn.execute(&sql, []).map(|_| ())).await
    }

    async fn set_column_type(&self, table: &str, column: &str, physical_type: &str) -> BackendResult<()> {
        // SQLite column affinity is fixed by ADD COLUMN
        tracing::trace!("sqlite keeps declared type for {}.{} ({})", table, column, physical_type);
        Ok(())
    }

    async fn drop_column(&self, table: &str, column: &str) -> BackendResult<()> {
        let sql = schema::drop_column(table, column);
        tracing::debug!("{}", sql);
        self.with_conn(move |conn| conn.execute(&sql, []).map(|_| ())).await
    }

    async fn column_exists(&self, table: &str, column: &str) -> BackendResult<bool> {
        let sql = schema::table_info(table);
        let column = column.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(1))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(names.iter().any(|name| name.eq_ignore_ascii_case(&column)))
        })
        .await
    }

    async fn select_rows(&self, table: &str, id: &str) -> BackendResult<Vec<RawRow>> {
        let sql = schema::select_rows(table);
        let id = id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
            let rows = stmt
                .query_map([&id], |row| row_to_raw(row, &columns))?
                .collect::<rusqlite::Result<Vec<RawRow>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn select_matching(
        &self,
        table: &str,
        predicate: &[(String, RawValue)],
        exclude: &[i64],
    ) -> BackendResult<Vec<(i64, String)>> {
        let columns: Vec<&str> = predicate.iter().map(|(c, _)| c.as_str()).collect();
        let sql = schema::select_matching(table, &columns, exclude);
        let values: Vec<rusqlite::types::Value> =
            predicate.iter().map(|(_, v)| v.clone().into()).collect();
        tracing::debug!("{}", sql);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(values.iter()), |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<(i64, String)>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn insert_row(&self, table: &str, id: &str) -> BackendResult<()> {
        let sql = schema::insert_row(table);
        let id = id.to_string();
        self.with_conn(move |conn| conn.execute(&sql, [&id]).map(|_| ())).await
    }

    async fn update_row(&self, table: &str, id: &str, fields: &[(String, RawValue)]) -> BackendResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let columns: Vec<&str> = fields.iter().map(|(c, _)| c.as_str()).collect();
        let sql = schema::update_row(table, &columns);
        let mut values: Vec<rusqlite::types::Value> =
            fields.iter().map(|(_, v)| v.clone().into()).collect();
        values.push(rusqlite::types::Value::Text(id.to_string()));
        tracing::debug!("{}", sql);
        self.with_conn(move |conn| conn.execute(&sql, params_from_iter(values.iter())).map(|_| ()))
            .await
    }

    async fn delete_row(&self, table: &str, id: &str) -> BackendResult<()> {
        let sql = schema::delete_row(table);
        let id = id.to_string();
        self.with_conn(move |conn| conn.execute(&sql, [&id]).map(|_| ())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec<'a>(name: &'a str, physical_type: &'a str, default: &'a RawValue) -> ColumnSpec<'a> {
        ColumnSpec { name, physical_type, default, nullable: true }
    }

    #[tokio::test]
    async fn test_row_crud() {
        let store = SqliteBackend::open_in_memory().unwrap();
        store.create_table("users").await.unwrap();
        store.add_column("users", spec("score", "INTEGER", &RawValue::Integer(0))).await.unwrap();

        store.insert_row("users", "alice").await.unwrap();
        let rows = store.select_rows("users", "alice").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "alice");
        assert_eq!(rows[0].fields, vec![("score".to_string(), RawValue::Integer(0))]);

        store
            .update_row("users", "alice", &[("score".to_string(), RawValue::Integer(10))])
            .await
            .unwrap();
        let matching = store
            .select_matching("users", &[("score".to_string(), RawValue::Integer(10))], &[])
            .await
            .unwrap();
        assert_eq!(matching, vec![(rows[0].index, "alice".to_string())]);

        store.delete_row("users", "alice").await.unwrap();
        assert!(store.select_rows("users", "alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_error_classification() {
        let store = SqliteBackend::open_in_memory().unwrap();
        store.create_table("users").await.unwrap();
        store.add_column("users", spec("nickname", "TEXT", &RawValue::Null)).await.unwrap();

        let dup = store
            .add_column("users", spec("nickname", "TEXT", &RawValue::Null))
            .await
            .unwrap_err();
        assert!(dup.is_duplicate_column());

        let missing = store.drop_column("users", "ghost").await.unwrap_err();
        assert!(missing.is_unknown_column());
    }

    #[tokio::test]
    async fn test_column_exists_is_case_insensitive() {
        let store = SqliteBackend::open_in_memory().unwrap();
        store.create_table("users").await.unwrap();
        store.add_column("users", spec("Nickname", "TEXT", &RawValue::Null)).await.unwrap();

        assert!(store.column_exists("users", "nickname").await.unwrap());
        assert!(!store.column_exists("users", "score").await.unwrap());
        assert!(!store.column_exists("missing_table", "score").await.unwrap());
    }

    #[tokio::test]
    async fn test_closed_connection() {
        let store = SqliteBackend::open_in_memory().unwrap();
        assert!(store.is_connected().await);
        store.close();
        assert!(!store.is_connected().await);

        let err = store.table_exists("users").await.unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::Connection);
    }

    #[tokio::test]
    async fn test_file_backed_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.db");
        {
            let store = SqliteBackend::open(&path).unwrap();
            store.create_table("users").await.unwrap();
            store.insert_row("users", "bob").await.unwrap();
        }
        let store = SqliteBackend::open(&path).unwrap();
        assert_eq!(store.select_rows("users", "bob").await.unwrap().len(), 1);
    }
}
