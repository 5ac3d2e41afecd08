//! Tables - the fan-out point for schema and record synchronization
//!
//! A table owns the authoritative list of its loaded variables and loaded
//! receptors. Its state sits behind one async mutex, so schema transitions,
//! receptor loads and retrievals on the same table never interleave.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::database::Database;
use crate::receptor::Receptor;
use crate::retrieval::{self, Condition};
use crate::variable::Variable;
use crate::{Error, Result};

#[derive(Default)]
pub(crate) struct TableState {
    pub loaded: bool,
    /// Loaded variables keyed by lowercased id
    pub variables: BTreeMap<String, Arc<Variable>>,
    /// Loaded receptors keyed by external id
    pub receptors: BTreeMap<String, Arc<Receptor>>,
}

impl TableState {
    pub fn ensure_loaded(&self, table: &str) -> Result<()> {
        if self.loaded {
            Ok(())
        } else {
            Err(Error::State(format!("table '{}' is not loaded", table)))
        }
    }
}

pub struct Table {
    id: String,
    database: Arc<Database>,
    state: Mutex<TableState>,
}

impl Table {
    pub(crate) fn new(id: impl Into<String>, database: Arc<Database>) -> Self {
        Self {
            id: id.into(),
            database,
            state: Mutex::new(TableState::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    pub(crate) async fn state(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().await
    }

    pub async fn is_loaded(&self) -> bool {
        self.state.lock().await.loaded
    }

    /// The loaded variable claiming `name`, if any
    pub async fn loaded_variable(&self, name: &str) -> Option<Arc<Variable>> {
        self.state.lock().await.variables.get(&name.to_lowercase()).cloned()
    }

    pub async fn loaded_variables(&self) -> Vec<Arc<Variable>> {
        self.state.lock().await.variables.values().cloned().collect()
    }

    pub async fn loaded_receptors(&self) -> Vec<Arc<Receptor>> {
        self.state.lock().await.receptors.values().cloned().collect()
    }

    /// The receptor for `id`, shared with every other live handle to the same row
    pub fn receptor(self: &Arc<Self>, id: &str) -> Arc<Receptor> {
        self.database.cache().receptor(self, id)
    }

    /// Receptors matching every condition; see [`retrieval::retrieve`]
    pub async fn retrieve(self: &Arc<Self>, conditions: &[Condition]) -> Result<Vec<Arc<Receptor>>> {
        retrieval::retrieve(self, conditions).await
    }

    // ========== Lifecycle ==========

    /// Create the backing table if absent and mark loaded
    pub async fn load(&self) -> Result<()> {
        self.database.ensure_loaded()?;
        let mut state = self.state.lock().await;
        if state.loaded {
            return Err(Error::State(format!("table '{}' is already loaded", self.id)));
        }
        self.database.ensure_connected().await?;

        self.database.backend().create_table(&self.id).await?;
        state.loaded = true;
        tracing::info!("Loaded table '{}'", self.id);
        Ok(())
    }

    /// Unload receptors (saving when `save`) and variables, then evict cached receptors
    pub async fn unload(&self, save: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        state.ensure_loaded(&self.id)?;

        let receptors: Vec<Arc<Receptor>> = state.receptors.values().cloned().collect();
        for receptor in &receptors {
            self.database.receptors().unload_locked(&mut state, receptor, save).await?;
        }

        let variables: Vec<Arc<Variable>> = state.variables.values().cloned().collect();
        for variable in &variables {
            self.database.variables().unload_locked(&mut state, variable).await?;
        }

        state.loaded = false;
        self.database.cache().evict_table(&self.id);
        tracing::info!(
            "Unloaded table '{}' ({} receptors, {} variables)",
            self.id,
            receptors.len(),
            variables.len()
        );
        Ok(())
    }

    pub async fn exists(&self) -> Result<bool> {
        self.database.ensure_connected().await?;
        Ok(self.database.backend().table_exists(&self.id).await?)
    }

    /// Unload without saving and drop the backing table
    pub async fn delete(&self) -> Result<()> {
        self.database.ensure_connected().await?;
        if self.is_loaded().await {
            self.unload(false).await?;
        }
        self.database.backend().drop_table(&self.id).await?;
        self.database.cache().evict_table(&self.id);
        tracing::info!("Deleted table '{}'", self.id);
        Ok(())
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("id", &self.id)
            .field("database", &self.database.id())
            .finish()
    }
}
