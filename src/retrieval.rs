//! Conditional retrieval over cached and stored receptors
//!
//! A retrieval is an equality conjunction over loaded variables of one table.
//! Loaded receptors in the identity cache that match in memory are taken as
//! they are and their rows are left out of the backend query. Every row the
//! backend matches comes back through the cache, so a row already tracked
//! keeps its receptor instance.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::container::Container;
use crate::receptor::{Receptor, ReceptorState};
use crate::table::Table;
use crate::value::{RawValue, Value};
use crate::variable::Variable;
use crate::{Error, Result};

/// `variable == value`
#[derive(Debug, Clone)]
pub struct Condition {
    variable: Arc<Variable>,
    value: Value,
}

impl Condition {
    pub fn new(variable: &Arc<Variable>, value: impl Into<Value>) -> Self {
        Self {
            variable: Arc::clone(variable),
            value: value.into(),
        }
    }

    pub fn variable(&self) -> &Arc<Variable> {
        &self.variable
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

fn check_condition(table: &Table, condition: &Condition) -> Result<()> {
    let variable = &condition.variable;
    if !std::ptr::eq(variable.table().as_ref(), table) {
        return Err(Error::Validation(format!(
            "variable '{}' belongs to table '{}', not '{}'",
            variable.id(),
            variable.table_id(),
            table.id()
        )));
    }
    if !variable.is_loaded() {
        return Err(Error::Validation(format!("variable '{}' is not loaded", variable.id())));
    }
    Ok(())
}

pub(crate) fn matches_state(receptor: &Receptor, state: &ReceptorState, conditions: &[Condition]) -> Result<bool> {
    state.ensure_loaded(receptor.id())?;
    for condition in conditions {
        check_condition(receptor.table(), condition)?;
    }

    Ok(conditions.iter().all(|condition| {
        match state.containers.get(condition.variable.id()) {
            Some(Container::Active(active)) => active.value() == &condition.value,
            _ => false,
        }
    }))
}

/// Validate conditions and encode them into a backend predicate
fn prepare(table: &Table, conditions: &[Condition]) -> Result<Vec<(String, RawValue)>> {
    if conditions.is_empty() {
        return Err(Error::Validation("retrieval needs at least one condition".to_string()));
    }

    let mut seen = HashSet::new();
    let mut predicate = Vec::with_capacity(conditions.len());
    for condition in conditions {
        check_condition(table, condition)?;
        if !seen.insert(condition.variable.id().to_lowercase()) {
            return Err(Error::Validation(format!(
                "variable '{}' appears in more than one condition",
                condition.variable.id()
            )));
        }
        let raw = condition.variable.encode(&condition.value).map_err(|err| match err {
            Error::TypeMismatch(msg) => Error::Validation(msg),
            other => other,
        })?;
        predicate.push((condition.variable.id().to_string(), raw));
    }
    Ok(predicate)
}

/// Receptors of `table` matching every condition, ordered by index
pub async fn retrieve(table: &Arc<Table>, conditions: &[Condition]) -> Result<Vec<Arc<Receptor>>> {
    let database = table.database();
    database.ensure_loaded()?;
    if !database.backend().supports_retrieval() {
        return Err(Error::State(format!(
            "the {} backend of database '{}' does not support retrieval",
            database.backend().kind(),
            database.id()
        )));
    }
    let predicate = prepare(table, conditions)?;

    let table_state = table.state().await;
    table_state.ensure_loaded(table.id())?;
    database.ensure_connected().await?;

    let mut found: BTreeMap<i64, Arc<Receptor>> = BTreeMap::new();
    let mut exclude = Vec::new();
    let mut cache_hits = 0usize;
    for receptor in database.cache().live(table.id()) {
        let state = receptor.state().await;
        if !state.loaded {
            continue;
        }
        let Some(index) = state.index else { continue };
        if matches_state(&receptor, &state, conditions)? {
            drop(state);
            exclude.push(index);
            found.insert(index, receptor);
            cache_hits += 1;
        }
    }

    let rows = database
        .backend()
        .select_matching(table.id(), &predicate, &exclude)
        .await?;
    let stored = rows.len();
    for (index, id) in rows {
        found
            .entry(index)
            .or_insert_with(|| database.cache().materialize(table, index, &id));
    }

    tracing::debug!(
        "Retrieved {} receptors from '{}' ({} cached, {} stored)",
        found.len(),
        table.id(),
        cache_hits,
        stored
    );
    Ok(found.into_values().collect())
}
