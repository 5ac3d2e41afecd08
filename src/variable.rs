//! Variables - schema-level field descriptors
//!
//! A variable names a field of a table, gives it a type, a default and a
//! nullability rule, and can be loaded and unloaded independently of every
//! other variable. Loading binds the matching field of every loaded receptor;
//! unloading hands the field back to them as raw data.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::storage::is_reserved;
use crate::table::Table;
use crate::types::VariableType;
use crate::value::{RawValue, Value};
use crate::{Error, Result};

/// Longest accepted variable id
pub const MAX_ID_LEN: usize = 63;

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]{1,63}$").expect("static pattern compiles"))
}

/// Check an identifier against `[A-Za-z0-9_]{1,63}`
pub fn validate_id(kind: &str, id: &str) -> Result<()> {
    if id_pattern().is_match(id) {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "{} id '{}' must match [A-Za-z0-9_] and be 1-{} characters long",
            kind, id, MAX_ID_LEN
        )))
    }
}

pub struct Variable {
    id: String,
    table: Arc<Table>,
    ty: Arc<dyn VariableType>,
    default: Value,
    nullable: bool,
    loaded: AtomicBool,
}

impl Variable {
    /// Describe a variable of `table`.
    ///
    /// `default` of `None` (or `Some(Value::Null)`) means no default, which
    /// requires the variable to be nullable.
    pub fn new(
        table: &Arc<Table>,
        id: impl Into<String>,
        ty: Arc<dyn VariableType>,
        default: Option<Value>,
        nullable: bool,
    ) -> Result<Arc<Self>> {
        let id = id.into();
        validate_id("variable", &id)?;

        if is_reserved(&id) {
            return Err(Error::Validation(format!("variable id '{}' is a reserved column", id)));
        }

        let default = default.unwrap_or(Value::Null);
        if default.is_null() && !nullable {
            return Err(Error::Validation(format!(
                "variable '{}' has no default value but is not nullable",
                id
            )));
        }
        if !default.is_null() {
            ty.encode(&default).map_err(|e| {
                Error::Validation(format!("default value of variable '{}' is invalid: {}", id, e))
            })?;
        }

        Ok(Arc::new(Self {
            id,
            table: Arc::clone(table),
            ty,
            default,
            nullable,
            loaded: AtomicBool::new(false),
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    pub fn table_id(&self) -> &str {
        self.table.id()
    }

    pub fn ty(&self) -> &Arc<dyn VariableType> {
        &self.ty
    }

    pub fn default_value(&self) -> &Value {
        &self.default
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    pub(crate) fn set_loaded(&self, loaded: bool) {
        self.loaded.store(loaded, Ordering::SeqCst);
    }

    /// Encode a value for storage, enforcing nullability
    pub fn encode(&self, value: &Value) -> Result<RawValue> {
        if value.is_null() {
            if self.nullable && self.ty.supports_null() {
                Ok(RawValue::Null)
            } else {
                Err(Error::TypeMismatch(format!("variable '{}' is not nullable", self.id)))
            }
        } else {
            self.ty.encode(value)
        }
    }

    pub fn decode(&self, raw: &RawValue) -> Result<Value> {
        self.ty.decode(raw, self.nullable)
    }

    // ========== Lifecycle ==========

    /// Load: add the physical column if needed and bind every loaded receptor's field
    pub async fn load(self: &Arc<Self>) -> Result<()> {
        self.table.database().variables().load(self).await
    }

    /// Unload: hand the field back to loaded receptors as raw data
    pub async fn unload(self: &Arc<Self>) -> Result<()> {
        self.table.database().variables().unload(self).await
    }

    /// Drop the physical column, unloading first. `false` if it never existed.
    pub async fn delete(self: &Arc<Self>) -> Result<bool> {
        self.table.database().variables().delete(self).await
    }

    /// Whether the physical column exists
    pub async fn exists(&self) -> Result<bool> {
        self.table.database().variables().exists(self).await
    }
}

impl std::fmt::Debug for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Variable")
            .field("id", &self.id)
            .field("table", &self.table.id())
            .field("type", &self.ty.name())
            .field("default", &self.default)
            .field("nullable", &self.nullable)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::storage::MemoryBackend;
    use crate::types::{IntegerType, TextType};

    fn table() -> Arc<Table> {
        let db = Database::new("main", Arc::new(MemoryBackend::new())).unwrap();
        db.table("users").unwrap()
    }

    #[test]
    fn test_id_pattern() {
        let table = table();
        assert!(Variable::new(&table, "score_2", Arc::new(IntegerType), Some(Value::Integer(0)), false).is_ok());
        assert!(matches!(
            Variable::new(&table, "bad-name", Arc::new(TextType), None, true),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            Variable::new(&table, "x".repeat(64), Arc::new(TextType), None, true),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            Variable::new(&table, "Index", Arc::new(IntegerType), None, true),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_missing_default_requires_nullable() {
        let table = table();
        let err = Variable::new(&table, "score", Arc::new(IntegerType), None, false).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(Variable::new(&table, "score", Arc::new(IntegerType), None, true).is_ok());
    }

    #[test]
    fn test_default_must_match_type() {
        let table = table();
        let err = Variable::new(&table, "score", Arc::new(IntegerType), Some("zero".into()), false).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_encode_enforces_nullability() {
        let table = table();
        let strict = Variable::new(&table, "score", Arc::new(IntegerType), Some(Value::Integer(0)), false).unwrap();
        assert!(matches!(strict.encode(&Value::Null), Err(Error::TypeMismatch(_))));

        let loose = Variable::new(&table, "nickname", Arc::new(TextType), None, true).unwrap();
        assert_eq!(loose.encode(&Value::Null).unwrap(), RawValue::Null);
        assert_eq!(loose.decode(&RawValue::Null).unwrap(), Value::Null);
    }
}
