//! Receptors - in-memory record instances
//!
//! A receptor is identified by its external `id` and carries the storage
//! ordinal (`index`) once loaded. Its fields live in [`Containers`], split
//! into Active and Inactive according to which variables are loaded.
//!
//! Receptors are obtained through [`Table::receptor`] or retrieval, never
//! constructed directly, so the identity cache sees every instance.

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::container::{Container, Containers};
use crate::retrieval::Condition;
use crate::table::Table;
use crate::value::{RawValue, Value};
use crate::{Error, Result};

#[derive(Debug, Default)]
pub(crate) struct ReceptorState {
    pub index: Option<i64>,
    pub loaded: bool,
    pub is_new: bool,
    pub containers: Containers,
}

impl ReceptorState {
    pub fn ensure_loaded(&self, id: &str) -> Result<()> {
        if self.loaded {
            Ok(())
        } else {
            Err(Error::State(format!("receptor '{}' is not loaded", id)))
        }
    }
}

pub struct Receptor {
    id: String,
    table: Arc<Table>,
    state: Mutex<ReceptorState>,
}

impl Receptor {
    pub(crate) fn new(table: Arc<Table>, id: impl Into<String>, index: Option<i64>) -> Self {
        Self {
            id: id.into(),
            table,
            state: Mutex::new(ReceptorState {
                index,
                ..ReceptorState::default()
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    pub(crate) async fn state(&self) -> MutexGuard<'_, ReceptorState> {
        self.state.lock().await
    }

    /// Storage ordinal, known once loaded or retrieved
    pub async fn index(&self) -> Option<i64> {
        self.state.lock().await.index
    }

    pub async fn is_loaded(&self) -> bool {
        self.state.lock().await.loaded
    }

    /// Whether the last load had to insert the row
    pub async fn is_new(&self) -> bool {
        self.state.lock().await.is_new
    }

    // ========== Field Access ==========

    /// Decoded value of a field bound to a loaded variable
    pub async fn get(&self, field: &str) -> Result<Value> {
        let state = self.state.lock().await;
        state.ensure_loaded(&self.id)?;
        match state.containers.get(field) {
            Some(Container::Active(active)) => Ok(active.value().clone()),
            Some(Container::Inactive(_)) => Err(Error::State(format!(
                "field '{}' of receptor '{}' has no loaded variable",
                field, self.id
            ))),
            None => Err(Error::State(format!("receptor '{}' has no field '{}'", self.id, field))),
        }
    }

    /// Replace the value of an Active field, type-checked by its variable
    pub async fn set(&self, field: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let mut state = self.state.lock().await;
        state.ensure_loaded(&self.id)?;
        match state.containers.get_mut(field) {
            Some(Container::Active(active)) => {
                active.variable().encode(&value)?;
                active.set_value(value);
                Ok(())
            }
            Some(Container::Inactive(_)) => Err(Error::State(format!(
                "field '{}' of receptor '{}' has no loaded variable",
                field, self.id
            ))),
            None => Err(Error::State(format!("receptor '{}' has no field '{}'", self.id, field))),
        }
    }

    /// Untouched stored value of an Inactive field
    pub async fn raw(&self, field: &str) -> Option<RawValue> {
        match self.state.lock().await.containers.get(field) {
            Some(Container::Inactive(inactive)) => Some(inactive.raw().clone()),
            _ => None,
        }
    }

    pub async fn field_names(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.containers.iter().map(|c| c.name().to_string()).collect()
    }

    /// Copy of every container, ordered by field name
    pub async fn snapshot(&self) -> Vec<Container> {
        self.state.lock().await.containers.iter().cloned().collect()
    }

    /// Whether the Active fields satisfy every condition
    pub async fn matches(&self, conditions: &[Condition]) -> Result<bool> {
        let state = self.state.lock().await;
        crate::retrieval::matches_state(self, &state, conditions)
    }

    // ========== Lifecycle ==========

    /// Fetch (inserting when absent) and partition the stored row
    pub async fn load(self: &Arc<Self>) -> Result<()> {
        self.table.database().receptors().load(self).await
    }

    /// Write every Active field in one update
    pub async fn save(&self) -> Result<()> {
        self.table.database().receptors().save(self).await
    }

    pub async fn unload(self: &Arc<Self>, save: bool) -> Result<()> {
        self.table.database().receptors().unload(self, save).await
    }

    /// Remove the stored row; the receptor need not be loaded
    pub async fn delete(self: &Arc<Self>) -> Result<()> {
        self.table.database().receptors().delete(self).await
    }
}

impl std::fmt::Debug for Receptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receptor")
            .field("id", &self.id)
            .field("table", &self.table.id())
            .finish()
    }
}
