//! Record identity cache
//!
//! Guarantees at most one live [`Receptor`] per stored row. Entries are weak,
//! so a receptor nobody holds drops out on its own; dead entries are pruned
//! whenever a table's entries are scanned. Explicit eviction happens on
//! receptor delete and on table unload or delete.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::receptor::Receptor;
use crate::table::Table;

#[derive(Default)]
struct TableEntries {
    by_id: HashMap<String, Weak<Receptor>>,
    by_index: BTreeMap<i64, Weak<Receptor>>,
}

impl TableEntries {
    fn prune(&mut self) {
        self.by_id.retain(|_, weak| weak.strong_count() > 0);
        self.by_index.retain(|_, weak| weak.strong_count() > 0);
    }

    fn is_empty(&self) -> bool {
        self.by_id.is_empty() && self.by_index.is_empty()
    }
}

#[derive(Default)]
pub struct IdentityCache {
    tables: Mutex<HashMap<String, TableEntries>>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TableEntries>> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The live receptor for `id`, creating and registering one when absent
    pub fn receptor(&self, table: &Arc<Table>, id: &str) -> Arc<Receptor> {
        let mut tables = self.lock();
        let entries = tables.entry(table.id().to_string()).or_default();
        if let Some(receptor) = entries.by_id.get(id).and_then(Weak::upgrade) {
            return receptor;
        }

        let receptor = Arc::new(Receptor::new(Arc::clone(table), id, None));
        entries.by_id.insert(id.to_string(), Arc::downgrade(&receptor));
        receptor
    }

    /// Record the storage ordinal of a receptor once it is known
    pub fn register(&self, table_id: &str, index: i64, receptor: &Arc<Receptor>) {
        let mut tables = self.lock();
        let entries = tables.entry(table_id.to_string()).or_default();
        entries.by_id.insert(receptor.id().to_string(), Arc::downgrade(receptor));
        entries.by_index.insert(index, Arc::downgrade(receptor));
    }

    /// The live receptor for a retrieved row, reusing any cached instance by index or id
    pub fn materialize(&self, table: &Arc<Table>, index: i64, id: &str) -> Arc<Receptor> {
        let mut tables = self.lock();
        let entries = tables.entry(table.id().to_string()).or_default();

        let cached = entries
            .by_index
            .get(&index)
            .and_then(Weak::upgrade)
            .or_else(|| entries.by_id.get(id).and_then(Weak::upgrade));
        let receptor = match cached {
            Some(receptor) => receptor,
            None => {
                tracing::trace!("Materializing receptor '{}.{}' at index {}", table.id(), id, index);
                Arc::new(Receptor::new(Arc::clone(table), id, Some(index)))
            }
        };

        entries.by_id.insert(id.to_string(), Arc::downgrade(&receptor));
        entries.by_index.insert(index, Arc::downgrade(&receptor));
        receptor
    }

    /// Every live receptor cached for a table, pruning dead entries
    pub fn live(&self, table_id: &str) -> Vec<Arc<Receptor>> {
        let mut tables = self.lock();
        let Some(entries) = tables.get_mut(table_id) else {
            return Vec::new();
        };
        entries.prune();

        let mut seen: Vec<Arc<Receptor>> = Vec::with_capacity(entries.by_id.len());
        for receptor in entries.by_id.values().filter_map(Weak::upgrade) {
            if !seen.iter().any(|r| Arc::ptr_eq(r, &receptor)) {
                seen.push(receptor);
            }
        }
        seen
    }

    pub fn evict(&self, table_id: &str, id: &str, index: Option<i64>) {
        let mut tables = self.lock();
        if let Some(entries) = tables.get_mut(table_id) {
            entries.by_id.remove(id);
            if let Some(index) = index {
                entries.by_index.remove(&index);
            }
            if entries.is_empty() {
                tables.remove(table_id);
            }
        }
    }

    pub fn evict_table(&self, table_id: &str) {
        if self.lock().remove(table_id).is_some() {
            tracing::debug!("Evicted cached receptors of table '{}'", table_id);
        }
    }

    /// Number of live cached receptors across all tables
    pub fn len(&self) -> usize {
        let mut tables = self.lock();
        tables
            .values_mut()
            .map(|entries| {
                entries.prune();
                entries.by_id.len()
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::storage::MemoryBackend;

    fn table() -> Arc<Table> {
        let db = Database::new("main", Arc::new(MemoryBackend::new())).unwrap();
        db.table("users").unwrap()
    }

    #[test]
    fn test_same_id_same_instance() {
        let table = table();
        let cache = IdentityCache::new();
        let a = cache.receptor(&table, "alice");
        let b = cache.receptor(&table, "alice");
        let c = cache.receptor(&table, "bob");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_dropped_receptors_fall_out() {
        let table = table();
        let cache = IdentityCache::new();
        let a = cache.receptor(&table, "alice");
        drop(cache.receptor(&table, "bob"));

        assert_eq!(cache.live("users").len(), 1);
        drop(a);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_materialize_reuses_by_index_and_id() {
        let table = table();
        let cache = IdentityCache::new();
        let alice = cache.receptor(&table, "alice");
        cache.register("users", 7, &alice);

        assert!(Arc::ptr_eq(&alice, &cache.materialize(&table, 7, "alice")));

        let bob = cache.receptor(&table, "bob");
        assert!(Arc::ptr_eq(&bob, &cache.materialize(&table, 9, "bob")));

        let carol = cache.materialize(&table, 11, "carol");
        assert!(Arc::ptr_eq(&carol, &cache.receptor(&table, "carol")));
    }

    #[test]
    fn test_eviction() {
        let table = table();
        let cache = IdentityCache::new();
        let alice = cache.receptor(&table, "alice");
        cache.register("users", 1, &alice);
        let _bob = cache.receptor(&table, "bob");

        cache.evict("users", "alice", Some(1));
        assert!(!Arc::ptr_eq(&alice, &cache.receptor(&table, "alice")));

        cache.evict_table("users");
        assert!(cache.live("users").is_empty());
    }
}
