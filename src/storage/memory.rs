//! In-process key-value backend
//!
//! Each table is a keyspace of rows addressed by storage ordinal. Field
//! values are held as JSON-encoded strings, the way a key-value store keeps
//! them, and the declared field set stands in for a physical schema.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::{
    BackendError, BackendErrorKind, BackendKind, BackendResult, ColumnSpec, RawRow,
    StorageBackend,
};
use crate::value::RawValue;

#[derive(Debug, Default)]
struct Keyspace {
    /// Declared fields in creation order
    fields: Vec<String>,
    /// Lowercased field name -> JSON-encoded default for new rows
    defaults: HashMap<String, String>,
    next_index: i64,
    rows: BTreeMap<i64, Entry>,
}

impl Keyspace {
    fn field_position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone)]
struct Entry {
    id: String,
    /// Lowercased field name -> JSON-encoded raw value
    values: HashMap<String, String>,
}

/// In-memory key-value storage backend.
///
/// Thread-safe with `RwLock`; cloning shares the same keyspaces.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    keyspaces: Arc<RwLock<HashMap<String, Keyspace>>>,
    connected: Arc<AtomicBool>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            keyspaces: Arc::new(RwLock::new(HashMap::new())),
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate losing the connection to the store
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn reconnect(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    fn read(&self) -> BackendResult<RwLockReadGuard<'_, HashMap<String, Keyspace>>> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(BackendError::disconnected());
        }
        self.keyspaces
            .read()
            .map_err(|_| BackendError::other("key-value store lock poisoned"))
    }

    fn write(&self) -> BackendResult<RwLockWriteGuard<'_, HashMap<String, Keyspace>>> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(BackendError::disconnected());
        }
        self.keyspaces
            .write()
            .map_err(|_| BackendError::other("key-value store lock poisoned"))
    }
}

fn encode(raw: &RawValue) -> BackendResult<String> {
    serde_json::to_string(raw).map_err(|e| BackendError::other(e.to_string()))
}

fn decode(stored: &str) -> BackendResult<RawValue> {
    serde_json::from_str(stored).map_err(|e| BackendError::other(e.to_string()))
}

fn no_such_table(table: &str) -> BackendError {
    BackendError::other(format!("no such keyspace: {}", table))
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::KeyValue
    }

    fn supports_retrieval(&self) -> bool {
        false
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn table_exists(&self, table: &str) -> BackendResult<bool> {
        Ok(self.read()?.contains_key(table))
    }

    async fn create_table(&self, table: &str) -> BackendResult<()> {
        self.write()?.entry(table.to_string()).or_default();
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> BackendResult<()> {
        self.write()?.remove(table);
        Ok(())
    }

    async fn add_column(&self, table: &str, column: ColumnSpec<'_>) -> BackendResult<()> {
        let mut keyspaces = self.write()?;
        let keyspace = keyspaces.get_mut(table).ok_or_else(|| no_such_table(table))?;

        if keyspace.field_position(column.name).is_some() {
            return Err(BackendError::new(
                BackendErrorKind::DuplicateColumn,
                format!("duplicate field name: {}", column.name),
            ));
        }

        keyspace.fields.push(column.name.to_string());
        if !column.default.is_null() {
            let stored = encode(column.default)?;
            let key = column.name.to_lowercase();
            for entry in keyspace.rows.values_mut() {
                entry.values.insert(key.clone(), stored.clone());
            }
            keyspace.defaults.insert(key, stored);
        }
        Ok(())
    }

    async fn set_column_type(&self, _table: &str, _column: &str, _physical_type: &str) -> BackendResult<()> {
        // Values are untyped strings in a key-value store
        Ok(())
    }

    async fn drop_column(&self, table: &str, column: &str) -> BackendResult<()> {
        let mut keyspaces = self.write()?;
        let keyspace = keyspaces.get_mut(table).ok_or_else(|| no_such_table(table))?;

        let position = keyspace.field_position(column).ok_or_else(|| {
            BackendError::new(BackendErrorKind::UnknownColumn, format!("no such field: {}", column))
        })?;
        keyspace.fields.remove(position);

        let key = column.to_lowercase();
        keyspace.defaults.remove(&key);
        for entry in keyspace.rows.values_mut() {
            entry.values.remove(&key);
        }
        Ok(())
    }

    async fn column_exists(&self, table: &str, column: &str) -> BackendResult<bool> {
        Ok(self
            .read()?
            .get(table)
            .is_some_and(|keyspace| keyspace.field_position(column).is_some()))
    }

    async fn select_rows(&self, table: &str, id: &str) -> BackendResult<Vec<RawRow>> {
        let keyspaces = self.read()?;
        let keyspace = keyspaces.get(table).ok_or_else(|| no_such_table(table))?;

        let mut rows = Vec::new();
        for (index, entry) in keyspace.rows.iter().filter(|(_, e)| e.id == id) {
            let mut fields = Vec::with_capacity(keyspace.fields.len());
            for name in &keyspace.fields {
                let raw = match entry.values.get(&name.to_lowercase()) {
                    Some(stored) => decode(stored)?,
                    None => RawValue::Null,
                };
                fields.push((name.clone(), raw));
            }
            rows.push(RawRow {
                index: *index,
                id: entry.id.clone(),
                fields,
            });
        }
        Ok(rows)
    }

    async fn select_matching(
        &self,
        _table: &str,
        _predicate: &[(String, RawValue)],
        _exclude: &[i64],
    ) -> BackendResult<Vec<(i64, String)>> {
        Err(BackendError::other("conditional retrieval is not supported by the key-value backend"))
    }

    async fn insert_row(&self, table: &str, id: &str) -> BackendResult<()> {
        let mut keyspaces = self.write()?;
        let keyspace = keyspaces.get_mut(table).ok_or_else(|| no_such_table(table))?;

        keyspace.next_index += 1;
        let index = keyspace.next_index;
        keyspace.rows.insert(
            index,
            Entry {
                id: id.to_string(),
                values: keyspace.defaults.clone(),
            },
        );
        Ok(())
    }

    async fn update_row(&self, table: &str, id: &str, fields: &[(String, RawValue)]) -> BackendResult<()> {
        let mut keyspaces = self.write()?;
        let keyspace = keyspaces.get_mut(table).ok_or_else(|| no_such_table(table))?;

        let mut encoded = Vec::with_capacity(fields.len());
        for (name, raw) in fields {
            if keyspace.field_position(name).is_none() {
                return Err(BackendError::new(
                    BackendErrorKind::UnknownColumn,
                    format!("no such field: {}", name),
                ));
            }
            encoded.push((name.to_lowercase(), encode(raw)?));
        }

        for entry in keyspace.rows.values_mut().filter(|e| e.id == id) {
            for (key, stored) in &encoded {
                entry.values.insert(key.clone(), stored.clone());
            }
        }
        Ok(())
    }

    async fn delete_row(&self, table: &str, id: &str) -> BackendResult<()> {
        let mut keyspaces = self.write()?;
        if let Some(keyspace) = keyspaces.get_mut(table) {
            keyspace.rows.retain(|_, e| e.id != id);
        }
        Ok(())
    }
}
