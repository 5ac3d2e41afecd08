//! Variable types - the per-field type contract
//!
//! A [`VariableType`] maps domain [`Value`]s to the backend's [`RawValue`]
//! representation and back, and gets a `configure` hook once per variable
//! load to set up the physical column type.

use std::sync::Arc;

use async_trait::async_trait;

use crate::storage::{BackendKind, StorageBackend};
use crate::value::{RawValue, Value};
use crate::variable::Variable;
use crate::{Error, Result};

/// Type contract implemented once per supported domain type.
///
/// `encode` never sees a null value: nullability is enforced by the
/// [`Variable`] before the type is consulted.
#[async_trait]
pub trait VariableType: Send + Sync + std::fmt::Debug {
    /// Stable type name (used by the CLI and in messages)
    fn name(&self) -> &'static str;

    /// Physical column type on the given backend
    fn physical_type(&self, backend: BackendKind) -> &'static str;

    fn encode(&self, value: &Value) -> Result<RawValue>;

    /// Decode a non-null raw value
    fn decode_present(&self, raw: &RawValue) -> Result<Value>;

    /// Whether statements may bind NULL for this type
    fn supports_null(&self) -> bool {
        true
    }

    /// Decode a raw value; null yields [`Value::Null`] only when allowed
    fn decode(&self, raw: &RawValue, nullable: bool) -> Result<Value> {
        if raw.is_null() {
            if nullable && self.supports_null() {
                Ok(Value::Null)
            } else {
                Err(Error::TypeMismatch(format!("{} field does not accept null", self.name())))
            }
        } else {
            self.decode_present(raw)
        }
    }

    /// Backend-specific physical type setup, run before any record I/O
    async fn configure(&self, variable: &Variable, backend: &dyn StorageBackend) -> Result<()> {
        backend
            .set_column_type(variable.table_id(), variable.id(), self.physical_type(backend.kind()))
            .await?;
        Ok(())
    }
}

fn cannot_encode(ty: &dyn VariableType, value: &Value) -> Error {
    Error::TypeMismatch(format!("{} type cannot hold a {} value", ty.name(), value.kind_name()))
}

fn cannot_decode(ty: &dyn VariableType, raw: &RawValue) -> Error {
    Error::TypeMismatch(format!("{} type cannot decode stored value {}", ty.name(), raw))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TextType;

impl VariableType for TextType {
    fn name(&self) -> &'static str {
        "text"
    }

    fn physical_type(&self, backend: BackendKind) -> &'static str {
        match backend {
            BackendKind::Sqlite => "TEXT",
            BackendKind::KeyValue => "string",
        }
    }

    fn encode(&self, value: &Value) -> Result<RawValue> {
        match value {
            Value::Text(s) => Ok(RawValue::Text(s.clone())),
            other => Err(cannot_encode(self, other)),
        }
    }

    fn decode_present(&self, raw: &RawValue) -> Result<Value> {
        match raw {
            RawValue::Text(s) => Ok(Value::Text(s.clone())),
            // Numeric affinity can coerce text that looks like a number
            RawValue::Integer(i) => Ok(Value::Text(i.to_string())),
            RawValue::Real(r) => Ok(Value::Text(r.to_string())),
            other => Err(cannot_decode(self, other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IntegerType;

impl VariableType for IntegerType {
    fn name(&self) -> &'static str {
        "integer"
    }

    fn physical_type(&self, backend: BackendKind) -> &'static str {
        match backend {
            BackendKind::Sqlite => "INTEGER",
            BackendKind::KeyValue => "string",
        }
    }

    fn encode(&self, value: &Value) -> Result<RawValue> {
        match value {
            Value::Integer(i) => Ok(RawValue::Integer(*i)),
            other => Err(cannot_encode(self, other)),
        }
    }

    fn decode_present(&self, raw: &RawValue) -> Result<Value> {
        match raw {
            RawValue::Integer(i) => Ok(Value::Integer(*i)),
            RawValue::Real(r) if r.fract() == 0.0 => Ok(Value::Integer(*r as i64)),
            RawValue::Text(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| cannot_decode(self, raw)),
            other => Err(cannot_decode(self, other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RealType;

impl VariableType for RealType {
    fn name(&self) -> &'static str {
        "real"
    }

    fn physical_type(&self, backend: BackendKind) -> &'static str {
        match backend {
            BackendKind::Sqlite => "REAL",
            BackendKind::KeyValue => "string",
        }
    }

    fn encode(&self, value: &Value) -> Result<RawValue> {
        match value {
            Value::Real(r) => Ok(RawValue::Real(*r)),
            Value::Integer(i) => Ok(RawValue::Real(*i as f64)),
            other => Err(cannot_encode(self, other)),
        }
    }

    fn decode_present(&self, raw: &RawValue) -> Result<Value> {
        match raw {
            RawValue::Real(r) => Ok(Value::Real(*r)),
            RawValue::Integer(i) => Ok(Value::Real(*i as f64)),
            RawValue::Text(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Real)
                .map_err(|_| cannot_decode(self, raw)),
            other => Err(cannot_decode(self, other)),
        }
    }
}

/// Boolean stored as INTEGER 0/1 on SQLite, which has no native boolean
#[derive(Debug, Clone, Copy, Default)]
pub struct BooleanType;

impl VariableType for BooleanType {
    fn name(&self) -> &'static str {
        "boolean"
    }

    fn physical_type(&self, backend: BackendKind) -> &'static str {
        match backend {
            BackendKind::Sqlite => "INTEGER",
            BackendKind::KeyValue => "string",
        }
    }

    fn encode(&self, value: &Value) -> Result<RawValue> {
        match value {
            Value::Bool(b) => Ok(RawValue::Integer(i64::from(*b))),
            other => Err(cannot_encode(self, other)),
        }
    }

    fn decode_present(&self, raw: &RawValue) -> Result<Value> {
        match raw {
            RawValue::Integer(i) => Ok(Value::Bool(*i != 0)),
            RawValue::Text(s) if s.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
            RawValue::Text(s) if s.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
            other => Err(cannot_decode(self, other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BytesType;

impl VariableType for BytesType {
    fn name(&self) -> &'static str {
        "bytes"
    }

    fn physical_type(&self, backend: BackendKind) -> &'static str {
        match backend {
            BackendKind::Sqlite => "BLOB",
            BackendKind::KeyValue => "string",
        }
    }

    fn encode(&self, value: &Value) -> Result<RawValue> {
        match value {
            Value::Bytes(b) => Ok(RawValue::Blob(b.clone())),
            other => Err(cannot_encode(self, other)),
        }
    }

    fn decode_present(&self, raw: &RawValue) -> Result<Value> {
        match raw {
            RawValue::Blob(b) => Ok(Value::Bytes(b.clone())),
            RawValue::Text(s) => Ok(Value::Bytes(s.as_bytes().to_vec())),
            other => Err(cannot_decode(self, other)),
        }
    }
}

/// Structured JSON document stored as TEXT
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonType;

impl VariableType for JsonType {
    fn name(&self) -> &'static str {
        "json"
    }

    fn physical_type(&self, backend: BackendKind) -> &'static str {
        match backend {
            BackendKind::Sqlite => "TEXT",
            BackendKind::KeyValue => "string",
        }
    }

    fn encode(&self, value: &Value) -> Result<RawValue> {
        match value {
            Value::Json(json) => Ok(RawValue::Text(json.to_string())),
            other => Err(cannot_encode(self, other)),
        }
    }

    fn decode_present(&self, raw: &RawValue) -> Result<Value> {
        match raw {
            RawValue::Text(s) => serde_json::from_str(s)
                .map(Value::Json)
                .map_err(|e| Error::TypeMismatch(format!("json type cannot parse stored text: {}", e))),
            other => Err(cannot_decode(self, other)),
        }
    }
}

/// Look up a built-in type by name
pub fn by_name(name: &str) -> Option<Arc<dyn VariableType>> {
    let ty: Arc<dyn VariableType> = match name.to_lowercase().as_str() {
        "text" | "string" | "str" => Arc::new(TextType),
        "integer" | "int" | "i64" => Arc::new(IntegerType),
        "real" | "float" | "double" | "f64" => Arc::new(RealType),
        "boolean" | "bool" => Arc::new(BooleanType),
        "bytes" | "blob" => Arc::new(BytesType),
        "json" => Arc::new(JsonType),
        _ => return None,
    };
    Some(ty)
}

/// Parse a command-line literal into a value of the given type
pub fn parse_literal(ty: &dyn VariableType, literal: &str) -> Result<Value> {
    if literal.eq_ignore_ascii_case("null") {
        return Ok(Value::Null);
    }
    ty.decode_present(&RawValue::Text(literal.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boolean_uses_integer_storage() {
        let ty = BooleanType;
        assert_eq!(ty.physical_type(BackendKind::Sqlite), "INTEGER");
        assert_eq!(ty.encode(&Value::Bool(true)).unwrap(), RawValue::Integer(1));
        assert_eq!(ty.decode(&RawValue::Integer(0), false).unwrap(), Value::Bool(false));
        assert_eq!(ty.decode(&RawValue::Text("TRUE".into()), false).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_encode_rejects_wrong_runtime_type() {
        let err = IntegerType.encode(&Value::Text("ten".into())).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch(_)));
        assert!(matches!(TextType.encode(&Value::Integer(3)), Err(Error::TypeMismatch(_))));
    }

    #[test]
    fn test_null_decoding_follows_nullability() {
        assert_eq!(TextType.decode(&RawValue::Null, true).unwrap(), Value::Null);
        assert!(matches!(TextType.decode(&RawValue::Null, false), Err(Error::TypeMismatch(_))));
    }

    #[test]
    fn test_json_round_trip() {
        let doc = serde_json::json!({"level": 3, "tags": ["a", "b"]});
        let raw = JsonType.encode(&Value::Json(doc.clone())).unwrap();
        assert_eq!(JsonType.decode(&raw, false).unwrap(), Value::Json(doc));
    }

    #[test]
    fn test_lookup_and_literals() {
        let ty = by_name("INT").unwrap();
        assert_eq!(ty.name(), "integer");
        assert_eq!(parse_literal(ty.as_ref(), "42").unwrap(), Value::Integer(42));
        assert_eq!(parse_literal(ty.as_ref(), "null").unwrap(), Value::Null);
        assert!(parse_literal(ty.as_ref(), "forty").is_err());
        assert!(by_name("uuid").is_none());
    }
}
