//! Variables manager - schema changes and container re-partitioning

use std::sync::Arc;

use crate::receptor::Receptor;
use crate::storage::{ColumnSpec, StorageBackend};
use crate::table::TableState;
use crate::value::{RawValue, Value};
use crate::variable::Variable;
use crate::{Error, Result};

pub struct VariablesManager {
    backend: Arc<dyn StorageBackend>,
}

impl VariablesManager {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Load a variable.
    ///
    /// New columns are added physically and every loaded receptor receives the
    /// default; existing columns promote each receptor's Inactive container.
    pub async fn load(&self, variable: &Arc<Variable>) -> Result<()> {
        if variable.is_loaded() {
            return Err(Error::State(format!("variable '{}' is already loaded", variable.id())));
        }

        let table = variable.table();
        let database = table.database();
        database.ensure_loaded()?;

        let mut state = table.state().await;
        state.ensure_loaded(table.id())?;
        if variable.is_loaded() {
            return Err(Error::State(format!("variable '{}' is already loaded", variable.id())));
        }
        let key = variable.id().to_lowercase();
        if state.variables.contains_key(&key) {
            return Err(Error::Validation(format!(
                "another variable named '{}' is already loaded on table '{}'",
                variable.id(),
                table.id()
            )));
        }

        database.ensure_connected().await?;
        if !self.backend.table_exists(table.id()).await? {
            return Err(Error::State(format!("backing table '{}' does not exist", table.id())));
        }

        let is_new = !self.column_exists(variable).await?;
        variable.ty().configure(variable, self.backend.as_ref()).await?;
        if is_new {
            self.add_column(variable).await?;
        }

        // Decode everything before touching any receptor, so a type failure
        // leaves all containers as they were
        let receptors: Vec<Arc<Receptor>> = state.receptors.values().cloned().collect();
        let mut guards = Vec::with_capacity(receptors.len());
        for receptor in &receptors {
            guards.push(receptor.state().await);
        }
        let mut values: Vec<Option<Value>> = Vec::with_capacity(guards.len());
        for guard in &guards {
            if is_new {
                values.push(Some(variable.default_value().clone()));
            } else {
                values.push(guard.containers.promotion_candidate(variable)?);
            }
        }

        state.variables.insert(key, Arc::clone(variable));

        let mut bound = 0;
        for (guard, value) in guards.iter_mut().zip(values) {
            if let Some(value) = value {
                guard.containers.activate(variable, value);
                bound += 1;
            }
        }

        variable.set_loaded(true);
        tracing::debug!(
            "Variable '{}.{}' loaded (new column: {}, receptors bound: {})",
            table.id(),
            variable.id(),
            is_new,
            bound
        );
        Ok(())
    }

    /// Unload a variable, demoting its Active containers to raw Inactive ones
    pub async fn unload(&self, variable: &Arc<Variable>) -> Result<()> {
        if !variable.is_loaded() {
            return Err(Error::State(format!("variable '{}' is not loaded", variable.id())));
        }
        let mut state = variable.table().state().await;
        self.unload_locked(&mut state, variable).await
    }

    /// Unload with the table lock already held
    pub(crate) async fn unload_locked(&self, state: &mut TableState, variable: &Arc<Variable>) -> Result<()> {
        if !variable.is_loaded() {
            return Err(Error::State(format!("variable '{}' is not loaded", variable.id())));
        }

        let receptors: Vec<Arc<Receptor>> = state.receptors.values().cloned().collect();
        let mut guards = Vec::with_capacity(receptors.len());
        for receptor in &receptors {
            guards.push(receptor.state().await);
        }
        // Keep the encoded form: decoded values may not survive a type change
        let mut raws: Vec<Option<RawValue>> = Vec::with_capacity(guards.len());
        for guard in &guards {
            raws.push(guard.containers.demotion_candidate(variable)?);
        }

        let mut released = 0;
        for (guard, raw) in guards.iter_mut().zip(raws) {
            if let Some(raw) = raw {
                guard.containers.deactivate(variable, raw);
                released += 1;
            }
        }

        let key = variable.id().to_lowercase();
        if state.variables.get(&key).is_some_and(|v| Arc::ptr_eq(v, variable)) {
            state.variables.remove(&key);
        }
        variable.set_loaded(false);
        tracing::debug!(
            "Variable '{}.{}' unloaded (receptors released: {})",
            variable.table_id(),
            variable.id(),
            released
        );
        Ok(())
    }

    /// Drop the physical column, unloading first.
    ///
    /// Returns `false` when the column did not exist.
    pub async fn delete(&self, variable: &Arc<Variable>) -> Result<bool> {
        variable.table().database().ensure_connected().await?;

        if variable.is_loaded() {
            self.unload(variable).await?;
        }

        match self.backend.drop_column(variable.table_id(), variable.id()).await {
            Ok(()) => {
                tracing::info!("Dropped column '{}.{}'", variable.table_id(), variable.id());
                Ok(true)
            }
            Err(e) if e.is_unknown_column() => {
                tracing::warn!("Column '{}.{}' does not exist, nothing to drop", variable.table_id(), variable.id());
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Whether the physical column exists
    pub async fn exists(&self, variable: &Variable) -> Result<bool> {
        variable.table().database().ensure_connected().await?;
        self.column_exists(variable).await
    }

    async fn column_exists(&self, variable: &Variable) -> Result<bool> {
        match self.backend.column_exists(variable.table_id(), variable.id()).await {
            Ok(exists) => Ok(exists),
            Err(e) if e.is_unknown_column() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn add_column(&self, variable: &Variable) -> Result<()> {
        let default = variable.encode(variable.default_value())?;
        let column = ColumnSpec {
            name: variable.id(),
            physical_type: variable.ty().physical_type(self.backend.kind()),
            default: &default,
            nullable: variable.is_nullable(),
        };

        match self.backend.add_column(variable.table_id(), column).await {
            Ok(()) => {
                tracing::info!("Added column '{}.{}'", variable.table_id(), variable.id());
                Ok(())
            }
            Err(e) if e.is_duplicate_column() => {
                tracing::warn!("Column '{}.{}' already exists", variable.table_id(), variable.id());
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::storage::{MemoryBackend, SqliteBackend};
    use crate::table::Table;
    use crate::types::{IntegerType, TextType};

    async fn sqlite_table() -> (SqliteBackend, Arc<Table>) {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let db = Database::new("main", Arc::new(backend.clone())).unwrap();
        db.load().await.unwrap();
        let table = db.table("users").unwrap();
        table.load().await.unwrap();
        (backend, table)
    }

    fn score(table: &Arc<Table>) -> Arc<Variable> {
        Variable::new(table, "score", Arc::new(IntegerType), Some(Value::Integer(0)), false).unwrap()
    }

    #[tokio::test]
    async fn test_new_column_gives_loaded_receptors_the_default() {
        let (_, table) = sqlite_table().await;
        let alice = table.receptor("alice");
        alice.load().await.unwrap();

        let score = score(&table);
        assert!(!score.exists().await.unwrap());
        score.load().await.unwrap();

        assert!(score.exists().await.unwrap());
        assert!(score.is_loaded());
        assert_eq!(alice.get("score").await.unwrap(), Value::Integer(0));
    }

    #[tokio::test]
    async fn test_existing_column_promotes_inactive_without_requery() {
        let (backend, table) = sqlite_table().await;
        backend
            .execute_batch(r#"ALTER TABLE "users" ADD COLUMN "nickname" TEXT; INSERT INTO "users" ("id", "nickname") VALUES ('alice', 'Bob');"#)
            .await
            .unwrap();

        let alice = table.receptor("alice");
        alice.load().await.unwrap();
        assert_eq!(alice.raw("nickname").await, Some(RawValue::Text("Bob".into())));

        // Later storage changes must not leak in: promotion reuses the held raw value
        backend
            .execute_batch(r#"UPDATE "users" SET "nickname" = 'Changed'"#)
            .await
            .unwrap();

        let nickname = Variable::new(&table, "nickname", Arc::new(TextType), None, true).unwrap();
        nickname.load().await.unwrap();
        assert_eq!(alice.get("nickname").await.unwrap(), Value::Text("Bob".into()));
        assert_eq!(alice.raw("nickname").await, None);
    }

    #[tokio::test]
    async fn test_load_is_idempotent_on_existing_column() {
        let (_, table) = sqlite_table().await;
        let first = score(&table);
        first.load().await.unwrap();
        first.unload().await.unwrap();

        let again = score(&table);
        again.load().await.unwrap();
        assert!(again.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_load_state_errors() {
        let (_, table) = sqlite_table().await;
        let score = score(&table);
        assert!(matches!(score.unload().await, Err(Error::State(_))));
        score.load().await.unwrap();
        assert!(matches!(score.load().await, Err(Error::State(_))));

        let twin = Variable::new(&table, "SCORE", Arc::new(IntegerType), Some(Value::Integer(1)), false).unwrap();
        assert!(matches!(twin.load().await, Err(Error::Validation(_))));

        table.unload(false).await.unwrap();
        let other = Variable::new(&table, "level", Arc::new(IntegerType), Some(Value::Integer(1)), false).unwrap();
        assert!(matches!(other.load().await, Err(Error::State(_))));
    }

    #[tokio::test]
    async fn test_failed_promotion_leaves_containers_untouched() {
        let (backend, table) = sqlite_table().await;
        backend
            .execute_batch(
                r#"ALTER TABLE "users" ADD COLUMN "score" TEXT;
                   INSERT INTO "users" ("id", "score") VALUES ('alice', '5'), ('bob', 'ten');"#,
            )
            .await
            .unwrap();

        let alice = table.receptor("alice");
        alice.load().await.unwrap();
        let bob = table.receptor("bob");
        bob.load().await.unwrap();

        let score = score(&table);
        assert!(matches!(score.load().await, Err(Error::TypeMismatch(_))));

        assert!(!score.is_loaded());
        assert!(table.loaded_variable("score").await.is_none());
        assert_eq!(alice.raw("score").await, Some(RawValue::Text("5".into())));
        assert_eq!(bob.raw("score").await, Some(RawValue::Text("ten".into())));
        for receptor in [&alice, &bob] {
            assert!(receptor.snapshot().await.iter().all(|c| !c.is_active()));
        }
    }

    #[tokio::test]
    async fn test_unload_then_reload_is_lossless() {
        let (_, table) = sqlite_table().await;
        let score = score(&table);
        score.load().await.unwrap();

        let alice = table.receptor("alice");
        alice.load().await.unwrap();
        alice.set("score", Value::Integer(42)).await.unwrap();

        score.unload().await.unwrap();
        assert_eq!(alice.raw("score").await, Some(RawValue::Integer(42)));
        assert!(matches!(alice.get("score").await, Err(Error::State(_))));

        score.load().await.unwrap();
        assert_eq!(alice.get("score").await.unwrap(), Value::Integer(42));
    }

    #[tokio::test]
    async fn test_retyping_through_unload() {
        let (_, table) = sqlite_table().await;
        let as_int = score(&table);
        as_int.load().await.unwrap();
        let alice = table.receptor("alice");
        alice.load().await.unwrap();
        alice.set("score", Value::Integer(7)).await.unwrap();
        as_int.unload().await.unwrap();

        let as_text = Variable::new(&table, "score", Arc::new(TextType), None, true).unwrap();
        as_text.load().await.unwrap();
        assert_eq!(alice.get("score").await.unwrap(), Value::Text("7".into()));
    }

    #[tokio::test]
    async fn test_delete_missing_column_returns_false() {
        let (_, table) = sqlite_table().await;
        let score = score(&table);
        assert!(!score.delete().await.unwrap());
        assert!(!score.is_loaded());
    }

    #[tokio::test]
    async fn test_delete_loaded_variable_unloads_first() {
        let (_, table) = sqlite_table().await;
        let score = score(&table);
        score.load().await.unwrap();
        let alice = table.receptor("alice");
        alice.load().await.unwrap();

        assert!(score.delete().await.unwrap());
        assert!(!score.is_loaded());
        assert!(!score.exists().await.unwrap());
        assert!(table.loaded_variable("score").await.is_none());
        for container in alice.snapshot().await {
            assert!(!container.is_active());
        }
        assert_eq!(alice.raw("score").await, Some(RawValue::Integer(0)));
    }

    #[tokio::test]
    async fn test_delete_requires_connection() {
        let (backend, table) = sqlite_table().await;
        let score = score(&table);
        backend.close();
        assert!(matches!(score.delete().await, Err(Error::Connection(_))));
        assert!(matches!(score.exists().await, Err(Error::Connection(_))));
    }

    #[tokio::test]
    async fn test_key_value_backend_schema_changes() {
        let backend = MemoryBackend::new();
        let db = Database::new("cache", Arc::new(backend)).unwrap();
        db.load().await.unwrap();
        let table = db.table("sessions").unwrap();
        table.load().await.unwrap();

        let token = Variable::new(&table, "token", Arc::new(TextType), Some("none".into()), false).unwrap();
        let session = table.receptor("s1");
        session.load().await.unwrap();
        token.load().await.unwrap();
        assert_eq!(session.get("token").await.unwrap(), Value::Text("none".into()));

        assert!(token.delete().await.unwrap());
        assert!(!token.delete().await.unwrap());
    }
}
