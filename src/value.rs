//! Field values
//!
//! Two representations travel through the crate:
//! - [`Value`]: the domain value held by an Active container, already decoded
//!   by the owning variable's type.
//! - [`RawValue`]: the untouched backend representation, held by Inactive
//!   containers and exchanged with storage backends.

use serde::{Deserialize, Serialize};

/// A decoded, typed field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the runtime variant, used in type mismatch messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Json(_) => "json",
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::Text(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Json(j) => write!(f, "{}", j),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// Backend representation of a stored field.
///
/// Mirrors the SQLite storage classes; the key-value backend serializes it
/// to JSON strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum RawValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl RawValue {
    pub fn is_null(&self) -> bool {
        matches!(self, RawValue::Null)
    }

    /// Render as a SQL literal, for DDL where parameters cannot be bound
    pub fn to_sql_literal(&self) -> String {
        match self {
            RawValue::Null => "NULL".to_string(),
            RawValue::Integer(i) => i.to_string(),
            RawValue::Real(r) => {
                let s = r.to_string();
                if s.contains(['.', 'e', 'E']) || !r.is_finite() {
                    s
                } else {
                    format!("{}.0", s)
                }
            }
            RawValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
            RawValue::Blob(b) => {
                let hex: String = b.iter().map(|byte| format!("{:02X}", byte)).collect();
                format!("X'{}'", hex)
            }
        }
    }
}

impl std::fmt::Display for RawValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawValue::Null => write!(f, "NULL"),
            RawValue::Integer(i) => write!(f, "{}", i),
            RawValue::Real(r) => write!(f, "{}", r),
            RawValue::Text(s) => write!(f, "{:?}", s),
            RawValue::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<rusqlite::types::Value> for RawValue {
    fn from(v: rusqlite::types::Value) -> Self {
        use rusqlite::types::Value as Sql;
        match v {
            Sql::Null => RawValue::Null,
            Sql::Integer(i) => RawValue::Integer(i),
            Sql::Real(r) => RawValue::Real(r),
            Sql::Text(s) => RawValue::Text(s),
            Sql::Blob(b) => RawValue::Blob(b),
        }
    }
}

impl From<RawValue> for rusqlite::types::Value {
    fn from(v: RawValue) -> Self {
        use rusqlite::types::Value as Sql;
        match v {
            RawValue::Null => Sql::Null,
            RawValue::Integer(i) => Sql::Integer(i),
            RawValue::Real(r) => Sql::Real(r),
            RawValue::Text(s) => Sql::Text(s),
            RawValue::Blob(b) => Sql::Blob(b),
        }
    }
}
