//! Database handle - backend, managers, identity cache and table registry

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::cache::IdentityCache;
use crate::manager::{ReceptorsManager, VariablesManager};
use crate::storage::StorageBackend;
use crate::table::Table;
use crate::variable::validate_id;
use crate::{Error, Result};

pub struct Database {
    id: String,
    backend: Arc<dyn StorageBackend>,
    loaded: AtomicBool,
    /// Live table handles, one per id
    tables: Mutex<HashMap<String, Weak<Table>>>,
    cache: IdentityCache,
    variables: VariablesManager,
    receptors: ReceptorsManager,
}

impl Database {
    pub fn new(id: impl Into<String>, backend: Arc<dyn StorageBackend>) -> Result<Arc<Self>> {
        let id = id.into();
        validate_id("database", &id)?;

        Ok(Arc::new(Self {
            id,
            variables: VariablesManager::new(Arc::clone(&backend)),
            receptors: ReceptorsManager::new(Arc::clone(&backend)),
            backend,
            loaded: AtomicBool::new(false),
            tables: Mutex::new(HashMap::new()),
            cache: IdentityCache::new(),
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn cache(&self) -> &IdentityCache {
        &self.cache
    }

    pub fn variables(&self) -> &VariablesManager {
        &self.variables
    }

    pub fn receptors(&self) -> &ReceptorsManager {
        &self.receptors
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    /// The table handle for `id`; the same `Arc` while any handle is alive
    pub fn table(self: &Arc<Self>, id: &str) -> Result<Arc<Table>> {
        validate_id("table", id)?;

        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(table) = tables.get(id).and_then(Weak::upgrade) {
            return Ok(table);
        }
        tables.retain(|_, weak| weak.strong_count() > 0);

        let table = Arc::new(Table::new(id, Arc::clone(self)));
        tables.insert(id.to_string(), Arc::downgrade(&table));
        Ok(table)
    }

    fn live_tables(&self) -> Vec<Arc<Table>> {
        let tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        tables.values().filter_map(Weak::upgrade).collect()
    }

    pub(crate) fn ensure_loaded(&self) -> Result<()> {
        if self.is_loaded() {
            Ok(())
        } else {
            Err(Error::State(format!("database '{}' is not loaded", self.id)))
        }
    }

    pub(crate) async fn ensure_connected(&self) -> Result<()> {
        if self.backend.is_connected().await {
            Ok(())
        } else {
            Err(Error::Connection(format!(
                "database '{}' has no live {} connection",
                self.id,
                self.backend.kind()
            )))
        }
    }

    // ========== Lifecycle ==========

    pub async fn load(&self) -> Result<()> {
        if self.is_loaded() {
            return Err(Error::State(format!("database '{}' is already loaded", self.id)));
        }
        self.ensure_connected().await?;
        self.loaded.store(true, Ordering::SeqCst);
        tracing::info!("Loaded database '{}' ({})", self.id, self.backend.kind());
        Ok(())
    }

    /// Unload every loaded table (saving receptors when `save`), then the database
    pub async fn unload(&self, save: bool) -> Result<()> {
        self.ensure_loaded()?;
        for table in self.live_tables() {
            if table.is_loaded().await {
                table.unload(save).await?;
            }
        }
        self.loaded.store(false, Ordering::SeqCst);
        tracing::info!("Unloaded database '{}'", self.id);
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("id", &self.id)
            .field("backend", &self.backend.kind())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
