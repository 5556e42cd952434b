//! Coercion of raw request JSON into typed values.
//!
//! Requests arrive as JSON objects, often produced by HTML forms, so scalar
//! strings are parsed into the declared type where that is unambiguous
//! (`"254"` for an integer slot, `"true"` for a bool slot).

use crate::error::Violation;
use crate::value::{ArtifactRef, Value, ValueType};

/// Coerce a raw JSON value into the slot's declared type.
pub fn coerce(slot: &str, json: &serde_json::Value, expected: ValueType) -> Result<Value, Violation> {
  let mismatch = || Violation::TypeMismatch {
    slot: slot.to_string(),
    expected,
    found: json_type_name(json).to_string(),
  };

  match expected {
    ValueType::Any => Ok(Value::from_json(json)),
    ValueType::Bool => match json {
      serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
      serde_json::Value::String(s) => match s.to_lowercase().as_str() {
        "true" => Ok(Value::Bool(true)),
        "false" => Ok(Value::Bool(false)),
        _ => Err(mismatch()),
      },
      _ => Err(mismatch()),
    },
    ValueType::Integer => match json {
      serde_json::Value::Number(n) => n.as_i64().map(Value::Integer).ok_or_else(mismatch),
      serde_json::Value::String(s) => s.trim().parse::<i64>().map(Value::Integer).map_err(|_| mismatch()),
      _ => Err(mismatch()),
    },
    ValueType::Number => match json {
      serde_json::Value::Number(n) => n.as_f64().map(Value::Number).ok_or_else(mismatch),
      serde_json::Value::String(s) => s.trim().parse::<f64>().map(Value::Number).map_err(|_| mismatch()),
      _ => Err(mismatch()),
    },
    ValueType::String => match json {
      serde_json::Value::String(s) => Ok(Value::String(s.clone())),
      serde_json::Value::Number(n) => Ok(Value::String(n.to_string())),
      serde_json::Value::Bool(b) => Ok(Value::String(b.to_string())),
      _ => Err(mismatch()),
    },
    ValueType::List => match json {
      serde_json::Value::Array(_) => Ok(Value::from_json(json)),
      _ => Err(mismatch()),
    },
    ValueType::Map => match json {
      serde_json::Value::Object(_) => Ok(Value::from_json(json)),
      _ => Err(mismatch()),
    },
    ValueType::Artifact => match json {
      serde_json::Value::String(s) => Ok(Value::Artifact(ArtifactRef::new(s.clone()))),
      serde_json::Value::Object(_) => serde_json::from_value::<ArtifactRef>(json.clone())
        .map(Value::Artifact)
        .map_err(|_| mismatch()),
      _ => Err(mismatch()),
    },
  }
}

/// Check an already-typed value against a declared type.
pub fn check(slot: &str, value: &Value, expected: ValueType) -> Result<(), Violation> {
  if value.value_type().satisfies(expected) {
    Ok(())
  } else {
    Err(Violation::TypeMismatch {
      slot: slot.to_string(),
      expected,
      found: value.value_type().to_string(),
    })
  }
}

fn json_type_name(json: &serde_json::Value) -> &'static str {
  match json {
    serde_json::Value::Null => "null",
    serde_json::Value::Bool(_) => "bool",
    serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
    serde_json::Value::Number(_) => "number",
    serde_json::Value::String(_) => "string",
    serde_json::Value::Array(_) => "list",
    serde_json::Value::Object(_) => "map",
  }
}
