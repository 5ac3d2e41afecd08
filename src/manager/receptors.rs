//! Receptors manager - row I/O and field partitioning

use std::sync::Arc;

use crate::container::Containers;
use crate::receptor::{Receptor, ReceptorState};
use crate::storage::{RawRow, StorageBackend};
use crate::table::TableState;
use crate::value::RawValue;
use crate::{Error, Result};

pub struct ReceptorsManager {
    backend: Arc<dyn StorageBackend>,
}

impl ReceptorsManager {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Fetch the single row for the receptor's id, `None` when absent
    async fn fetch(&self, receptor: &Receptor) -> Result<Option<RawRow>> {
        let mut rows = self.backend.select_rows(receptor.table().id(), receptor.id()).await?;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(rows.pop()),
            n => Err(Error::DataIntegrity(format!(
                "{} rows share id '{}' in table '{}'",
                n,
                receptor.id(),
                receptor.table().id()
            ))),
        }
    }

    /// Load a receptor, inserting a bare row when none exists
    pub async fn load(&self, receptor: &Arc<Receptor>) -> Result<()> {
        let table = receptor.table();
        let database = table.database();
        database.ensure_loaded()?;

        let mut table_state = table.state().await;
        table_state.ensure_loaded(table.id())?;
        let mut state = receptor.state().await;
        if state.loaded {
            return Err(Error::State(format!("receptor '{}' is already loaded", receptor.id())));
        }
        database.ensure_connected().await?;

        let (row, is_new) = match self.fetch(receptor).await? {
            Some(row) => (row, false),
            None => {
                self.backend.insert_row(table.id(), receptor.id()).await?;
                let row = self.fetch(receptor).await?.ok_or_else(|| {
                    Error::DataIntegrity(format!(
                        "receptor '{}' could not be created in table '{}'",
                        receptor.id(),
                        table.id()
                    ))
                })?;
                (row, true)
            }
        };

        let containers = Containers::partition(row.fields, &table_state.variables)?;
        let active = containers.active().count();
        let inactive = containers.len() - active;

        state.index = Some(row.index);
        state.is_new = is_new;
        state.containers = containers;
        state.loaded = true;
        table_state.receptors.insert(receptor.id().to_string(), Arc::clone(receptor));
        database.cache().register(table.id(), row.index, receptor);

        tracing::debug!(
            "Receptor '{}.{}' loaded (index: {}, new: {}, active: {}, inactive: {})",
            table.id(),
            receptor.id(),
            row.index,
            is_new,
            active,
            inactive
        );
        Ok(())
    }

    /// Persist every Active container in a single update
    pub async fn save(&self, receptor: &Receptor) -> Result<()> {
        let state = receptor.state().await;
        self.save_locked(receptor, &state).await
    }

    async fn save_locked(&self, receptor: &Receptor, state: &ReceptorState) -> Result<()> {
        state.ensure_loaded(receptor.id())?;
        receptor.table().database().ensure_connected().await?;

        let mut fields: Vec<(String, RawValue)> = Vec::new();
        for active in state.containers.active() {
            // Unloaded variables are demoted by the variable lifecycle; never write them
            if !active.variable().is_loaded() {
                continue;
            }
            fields.push((active.variable().id().to_string(), active.encode()?));
        }

        if fields.is_empty() {
            tracing::trace!("Receptor '{}' has no active fields to save", receptor.id());
            return Ok(());
        }

        self.backend
            .update_row(receptor.table().id(), receptor.id(), &fields)
            .await?;
        tracing::debug!("Receptor '{}.{}' saved ({} fields)", receptor.table().id(), receptor.id(), fields.len());
        Ok(())
    }

    /// Unload, saving first when `save` is set
    pub async fn unload(&self, receptor: &Arc<Receptor>, save: bool) -> Result<()> {
        let mut table_state = receptor.table().state().await;
        self.unload_locked(&mut table_state, receptor, save).await
    }

    /// Unload with the table lock already held
    pub(crate) async fn unload_locked(
        &self,
        table_state: &mut TableState,
        receptor: &Arc<Receptor>,
        save: bool,
    ) -> Result<()> {
        let mut state = receptor.state().await;
        state.ensure_loaded(receptor.id())?;
        if save {
            self.save_locked(receptor, &state).await?;
        }

        state.loaded = false;
        table_state.receptors.remove(receptor.id());
        tracing::debug!("Receptor '{}.{}' unloaded", receptor.table().id(), receptor.id());
        Ok(())
    }

    /// Delete the stored row; a loaded receptor is detached and evicted as well
    pub async fn delete(&self, receptor: &Arc<Receptor>) -> Result<()> {
        let table = receptor.table();
        table.database().ensure_connected().await?;

        let mut table_state = table.state().await;
        let mut state = receptor.state().await;
        self.backend.delete_row(table.id(), receptor.id()).await?;

        if state.loaded {
            state.loaded = false;
            table_state.receptors.remove(receptor.id());
        }
        table.database().cache().evict(table.id(), receptor.id(), state.index);
        state.index = None;
        state.containers.clear();

        tracing::debug!("Receptor '{}.{}' deleted", table.id(), receptor.id());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;
    use crate::database::Database;
    use crate::storage::{MemoryBackend, SqliteBackend};
    use crate::table::Table;
    use crate::types::{BooleanType, IntegerType, TextType};
    use crate::value::Value;
    use crate::variable::Variable;

    async fn sqlite_table() -> (SqliteBackend, Arc<Table>) {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let db = Database::new("main", Arc::new(backend.clone())).unwrap();
        db.load().await.unwrap();
        let table = db.table("users").unwrap();
        table.load().await.unwrap();
        (backend, table)
    }

    #[tokio::test]
    async fn test_load_inserts_missing_row() {
        let (backend, table) = sqlite_table().await;
        let alice = table.receptor("alice");
        alice.load().await.unwrap();

        assert!(alice.is_loaded().await);
        assert!(alice.is_new().await);
        assert!(alice.index().await.is_some());
        assert_eq!(backend.select_rows("users", "alice").await.unwrap().len(), 1);

        alice.unload(false).await.unwrap();
        alice.load().await.unwrap();
        assert!(!alice.is_new().await);
    }

    #[tokio::test]
    async fn test_partition_splits_active_and_inactive() {
        let (backend, table) = sqlite_table().await;
        backend
            .execute_batch(
                r#"ALTER TABLE "users" ADD COLUMN "nickname" TEXT;
                   ALTER TABLE "users" ADD COLUMN "admin" INTEGER;
                   INSERT INTO "users" ("id", "nickname", "admin") VALUES ('alice', 'Bob', 1);"#,
            )
            .await
            .unwrap();

        let admin = Variable::new(&table, "admin", Arc::new(BooleanType), Some(Value::Bool(false)), false).unwrap();
        admin.load().await.unwrap();

        let alice = table.receptor("alice");
        alice.load().await.unwrap();

        let snapshot = alice.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert!(matches!(&snapshot[0], Container::Active(a) if a.value() == &Value::Bool(true)));
        assert!(matches!(&snapshot[1], Container::Inactive(i) if i.raw() == &RawValue::Text("Bob".into())));
        assert_eq!(alice.field_names().await, vec!["admin".to_string(), "nickname".to_string()]);
    }

    #[tokio::test]
    async fn test_duplicate_identity_is_fatal() {
        let (backend, table) = sqlite_table().await;
        backend.insert_row("users", "twin").await.unwrap();
        backend.insert_row("users", "twin").await.unwrap();

        let twin = table.receptor("twin");
        assert!(matches!(twin.load().await, Err(Error::DataIntegrity(_))));
        assert!(!twin.is_loaded().await);
    }

    #[tokio::test]
    async fn test_save_writes_active_fields_only() {
        let (backend, table) = sqlite_table().await;
        backend
            .execute_batch(r#"ALTER TABLE "users" ADD COLUMN "nickname" TEXT; INSERT INTO "users" ("id", "nickname") VALUES ('alice', 'Bob');"#)
            .await
            .unwrap();

        let score = Variable::new(&table, "score", Arc::new(IntegerType), Some(Value::Integer(0)), false).unwrap();
        score.load().await.unwrap();

        let alice = table.receptor("alice");
        alice.load().await.unwrap();
        alice.set("score", Value::Integer(10)).await.unwrap();
        assert!(matches!(alice.set("score", Value::Text("ten".into())).await, Err(Error::TypeMismatch(_))));
        assert!(matches!(alice.set("nickname", Value::Text("Al".into())).await, Err(Error::State(_))));
        alice.save().await.unwrap();

        let row = backend.select_rows("users", "alice").await.unwrap().remove(0);
        assert!(row.fields.contains(&("score".to_string(), RawValue::Integer(10))));
        assert!(row.fields.contains(&("nickname".to_string(), RawValue::Text("Bob".into()))));
    }

    #[tokio::test]
    async fn test_unload_with_save_persists() {
        let (backend, table) = sqlite_table().await;
        let score = Variable::new(&table, "score", Arc::new(IntegerType), Some(Value::Integer(0)), false).unwrap();
        score.load().await.unwrap();

        let alice = table.receptor("alice");
        alice.load().await.unwrap();
        alice.set("score", Value::Integer(3)).await.unwrap();
        alice.unload(true).await.unwrap();

        assert!(!alice.is_loaded().await);
        assert!(table.loaded_receptors().await.is_empty());
        assert!(matches!(alice.save().await, Err(Error::State(_))));
        assert!(matches!(alice.unload(true).await, Err(Error::State(_))));

        let row = backend.select_rows("users", "alice").await.unwrap().remove(0);
        assert_eq!(row.fields, vec![("score".to_string(), RawValue::Integer(3))]);
    }

    #[tokio::test]
    async fn test_delete_without_loading() {
        let (backend, table) = sqlite_table().await;
        backend.insert_row("users", "ghost").await.unwrap();

        let ghost = table.receptor("ghost");
        ghost.delete().await.unwrap();
        assert!(backend.select_rows("users", "ghost").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_loaded_detaches() {
        let (_, table) = sqlite_table().await;
        let alice = table.receptor("alice");
        alice.load().await.unwrap();
        alice.delete().await.unwrap();

        assert!(!alice.is_loaded().await);
        assert!(table.loaded_receptors().await.is_empty());
        assert!(!Arc::ptr_eq(&alice, &table.receptor("alice")));
    }

    #[tokio::test]
    async fn test_load_requires_loaded_table() {
        let backend = MemoryBackend::new();
        let db = Database::new("main", Arc::new(backend)).unwrap();
        db.load().await.unwrap();
        let table = db.table("users").unwrap();

        let alice = table.receptor("alice");
        assert!(matches!(alice.load().await, Err(Error::State(_))));

        table.load().await.unwrap();
        alice.load().await.unwrap();
        assert!(matches!(alice.load().await, Err(Error::State(_))));
    }

    #[tokio::test]
    async fn test_key_value_new_receptor_gets_declared_default() {
        let backend = MemoryBackend::new();
        let db = Database::new("kv", Arc::new(backend.clone())).unwrap();
        db.load().await.unwrap();
        let table = db.table("players").unwrap();
        table.load().await.unwrap();

        let score = Variable::new(&table, "score", Arc::new(IntegerType), Some(Value::Integer(0)), false).unwrap();
        score.load().await.unwrap();

        let bob = table.receptor("bob");
        bob.load().await.unwrap();
        assert!(bob.is_new().await);
        assert_eq!(bob.get("score").await.unwrap(), Value::Integer(0));

        let row = backend.select_rows("players", "bob").await.unwrap().remove(0);
        assert_eq!(row.fields, vec![("score".to_string(), RawValue::Integer(0))]);
    }

    #[tokio::test]
    async fn test_key_value_round_trip() {
        let backend = MemoryBackend::new();
        let db = Database::new("kv", Arc::new(backend)).unwrap();
        db.load().await.unwrap();
        let table = db.table("profiles").unwrap();
        table.load().await.unwrap();

        let nickname = Variable::new(&table, "nickname", Arc::new(TextType), None, true).unwrap();
        nickname.load().await.unwrap();

        let bob = table.receptor("bob");
        bob.load().await.unwrap();
        assert_eq!(bob.get("nickname").await.unwrap(), Value::Null);
        bob.set("nickname", "Bobby").await.unwrap();
        bob.unload(true).await.unwrap();

        bob.load().await.unwrap();
        assert_eq!(bob.get("nickname").await.unwrap(), Value::Text("Bobby".into()));
    }
}
