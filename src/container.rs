//! Variable containers - per-receptor field holders
//!
//! A receptor keeps exactly one container per field name (case-insensitive):
//! - `Active`: bound to a loaded [`Variable`], value decoded through its type
//! - `Inactive`: no loaded variable claims the name, raw value kept untouched
//!
//! Containers live inside their receptor's state, so the receptor they belong
//! to is implied by ownership.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::storage::is_reserved;
use crate::value::{RawValue, Value};
use crate::variable::Variable;
use crate::Result;

/// Field value bound to a loaded variable
#[derive(Debug, Clone)]
pub struct ActiveContainer {
    variable: Arc<Variable>,
    value: Value,
}

impl ActiveContainer {
    pub fn new(variable: Arc<Variable>, value: Value) -> Self {
        Self { variable, value }
    }

    pub fn variable(&self) -> &Arc<Variable> {
        &self.variable
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub(crate) fn set_value(&mut self, value: Value) {
        self.value = value;
    }

    /// Encoded form, as it would be written to storage
    pub fn encode(&self) -> Result<RawValue> {
        self.variable.encode(&self.value)
    }
}

/// Field value with no loaded variable, kept in backend representation
#[derive(Debug, Clone, PartialEq)]
pub struct InactiveContainer {
    name: String,
    raw: RawValue,
}

impl InactiveContainer {
    pub fn new(name: impl Into<String>, raw: RawValue) -> Self {
        Self { name: name.into(), raw }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raw(&self) -> &RawValue {
        &self.raw
    }
}

#[derive(Debug, Clone)]
pub enum Container {
    Active(ActiveContainer),
    Inactive(InactiveContainer),
}

impl Container {
    /// Field name as declared by the variable or the storage column
    pub fn name(&self) -> &str {
        match self {
            Container::Active(c) => c.variable.id(),
            Container::Inactive(c) => &c.name,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Container::Active(_))
    }
}

fn key(name: &str) -> String {
    name.to_lowercase()
}

/// The container set of one receptor, keyed by lowercased field name
#[derive(Debug, Default, Clone)]
pub struct Containers {
    entries: BTreeMap<String, Container>,
}

impl Containers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a stored row's fields against the table's loaded variables.
    ///
    /// `variables` is keyed by lowercased variable id. Reserved columns are skipped.
    pub fn partition(
        fields: Vec<(String, RawValue)>,
        variables: &BTreeMap<String, Arc<Variable>>,
    ) -> Result<Self> {
        let mut containers = Self::new();
        for (name, raw) in fields {
            if is_reserved(&name) {
                continue;
            }
            let k = key(&name);
            let container = match variables.get(&k) {
                Some(variable) => {
                    let value = variable.decode(&raw)?;
                    Container::Active(ActiveContainer::new(Arc::clone(variable), value))
                }
                None => Container::Inactive(InactiveContainer::new(name, raw)),
            };
            containers.entries.insert(k, container);
        }
        Ok(containers)
    }

    pub fn get(&self, name: &str) -> Option<&Container> {
        self.entries.get(&key(name))
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut Container> {
        self.entries.get_mut(&key(name))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Container> {
        self.entries.values()
    }

    pub fn active(&self) -> impl Iterator<Item = &ActiveContainer> {
        self.entries.values().filter_map(|c| match c {
            Container::Active(a) => Some(a),
            Container::Inactive(_) => None,
        })
    }

    pub fn inactive(&self) -> impl Iterator<Item = &InactiveContainer> {
        self.entries.values().filter_map(|c| match c {
            Container::Inactive(i) => Some(i),
            Container::Active(_) => None,
        })
    }

    /// Decoded value an Inactive container would take if `variable` claimed it
    pub fn promotion_candidate(&self, variable: &Variable) -> Result<Option<Value>> {
        match self.get(variable.id()) {
            Some(Container::Inactive(inactive)) => variable.decode(&inactive.raw).map(Some),
            _ => Ok(None),
        }
    }

    /// Raw value an Active container bound to `variable` would be demoted to
    pub fn demotion_candidate(&self, variable: &Arc<Variable>) -> Result<Option<RawValue>> {
        match self.get(variable.id()) {
            Some(Container::Active(active)) if Arc::ptr_eq(&active.variable, variable) => {
                active.encode().map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Bind `variable` with `value`, replacing whatever held the field name
    pub fn activate(&mut self, variable: &Arc<Variable>, value: Value) {
        self.entries.insert(
            key(variable.id()),
            Container::Active(ActiveContainer::new(Arc::clone(variable), value)),
        );
    }

    /// Replace the Active container for `variable` with an Inactive one
    pub fn deactivate(&mut self, variable: &Variable, raw: RawValue) {
        self.entries.insert(
            key(variable.id()),
            Container::Inactive(InactiveContainer::new(variable.id(), raw)),
        );
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
