//! Typed values carried between stages.
//!
//! Every entry in a job's values context is a [`Value`]. Slots declare the
//! [`ValueType`] they accept or produce, which lets the graph builder check
//! that a producer and its consumers agree before any job runs.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Opaque reference to an artifact written by an export stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
  /// Location understood by the artifact store (path, URL, object key).
  pub location: String,
  /// MIME type of the artifact, if the producer knows it.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub content_type: Option<String>,
}

impl ArtifactRef {
  pub fn new(location: impl Into<String>) -> Self {
    Self {
      location: location.into(),
      content_type: None,
    }
  }

  pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
    self.content_type = Some(content_type.into());
    self
  }
}

/// The declared type of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
  Any,
  Bool,
  Integer,
  Number,
  String,
  List,
  Map,
  Artifact,
}

impl ValueType {
  /// Whether a value produced as `self` may be consumed where `expected` is declared.
  pub fn satisfies(self, expected: ValueType) -> bool {
    match (self, expected) {
      (_, ValueType::Any) | (ValueType::Any, _) => true,
      (ValueType::Integer, ValueType::Number) => true,
      (produced, expected) => produced == expected,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      ValueType::Any => "any",
      ValueType::Bool => "bool",
      ValueType::Integer => "integer",
      ValueType::Number => "number",
      ValueType::String => "string",
      ValueType::List => "list",
      ValueType::Map => "map",
      ValueType::Artifact => "artifact",
    }
  }
}

impl fmt::Display for ValueType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Error returned when parsing an unknown type name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown value type '{0}'")]
pub struct UnknownValueType(pub String);

impl FromStr for ValueType {
  type Err = UnknownValueType;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "any" => Ok(ValueType::Any),
      "bool" | "boolean" => Ok(ValueType::Bool),
      "integer" | "int" => Ok(ValueType::Integer),
      "number" | "float" | "double" => Ok(ValueType::Number),
      "string" => Ok(ValueType::String),
      "list" | "array" => Ok(ValueType::List),
      "map" | "object" => Ok(ValueType::Map),
      "artifact" => Ok(ValueType::Artifact),
      _ => Err(UnknownValueType(s.to_string())),
    }
  }
}

/// A single typed entry in the values context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
  Null,
  Bool(bool),
  Integer(i64),
  Number(f64),
  String(String),
  List(Vec<Value>),
  Map(BTreeMap<String, Value>),
  Artifact(ArtifactRef),
}

impl Value {
  /// The type this value carries. `Null` reports `Any`.
  pub fn value_type(&self) -> ValueType {
    match self {
      Value::Null => ValueType::Any,
      Value::Bool(_) => ValueType::Bool,
      Value::Integer(_) => ValueType::Integer,
      Value::Number(_) => ValueType::Number,
      Value::String(_) => ValueType::String,
      Value::List(_) => ValueType::List,
      Value::Map(_) => ValueType::Map,
      Value::Artifact(_) => ValueType::Artifact,
    }
  }

  pub fn is_null(&self) -> bool {
    matches!(self, Value::Null)
  }

  pub fn as_bool(&self) -> Option<bool> {
    match self {
      Value::Bool(b) => Some(*b),
      _ => None,
    }
  }

  pub fn as_i64(&self) -> Option<i64> {
    match self {
      Value::Integer(n) => Some(*n),
      _ => None,
    }
  }

  /// Numeric view of the value; integers widen to `f64`.
  pub fn as_f64(&self) -> Option<f64> {
    match self {
      Value::Integer(n) => Some(*n as f64),
      Value::Number(n) => Some(*n),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::String(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_list(&self) -> Option<&[Value]> {
    match self {
      Value::List(items) => Some(items),
      _ => None,
    }
  }

  pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
    match self {
      Value::Map(map) => Some(map),
      _ => None,
    }
  }

  pub fn as_artifact(&self) -> Option<&ArtifactRef> {
    match self {
      Value::Artifact(artifact) => Some(artifact),
      _ => None,
    }
  }

  /// Convert an untyped JSON value without a target type.
  pub fn from_json(json: &serde_json::Value) -> Value {
    match json {
      serde_json::Value::Null => Value::Null,
      serde_json::Value::Bool(b) => Value::Bool(*b),
      serde_json::Value::Number(n) => match n.as_i64() {
        Some(i) => Value::Integer(i),
        None => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
      },
      serde_json::Value::String(s) => Value::String(s.clone()),
      serde_json::Value::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
      serde_json::Value::Object(map) => Value::Map(
        map
          .iter()
          .map(|(k, v)| (k.clone(), Value::from_json(v)))
          .collect(),
      ),
    }
  }

  /// Plain JSON rendering, used for logs and CLI output.
  pub fn to_json(&self) -> serde_json::Value {
    match self {
      Value::Null => serde_json::Value::Null,
      Value::Bool(b) => serde_json::Value::Bool(*b),
      Value::Integer(n) => serde_json::Value::Number((*n).into()),
      Value::Number(n) => serde_json::Number::from_f64(*n)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null),
      Value::String(s) => serde_json::Value::String(s.clone()),
      Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
      Value::Map(map) => serde_json::Value::Object(
        map
          .iter()
          .map(|(k, v)| (k.clone(), v.to_json()))
          .collect(),
      ),
      Value::Artifact(artifact) => {
        let mut object = serde_json::Map::new();
        object.insert(
          "location".to_string(),
          serde_json::Value::String(artifact.location.clone()),
        );
        if let Some(content_type) = &artifact.content_type {
          object.insert(
            "content_type".to_string(),
            serde_json::Value::String(content_type.clone()),
          );
        }
        serde_json::Value::Object(object)
      }
    }
  }
}

impl From<bool> for Value {
  fn from(value: bool) -> Self {
    Value::Bool(value)
  }
}

impl From<i64> for Value {
  fn from(value: i64) -> Self {
    Value::Integer(value)
  }
}

impl From<f64> for Value {
  fn from(value: f64) -> Self {
    Value::Number(value)
  }
}

impl From<&str> for Value {
  fn from(value: &str) -> Self {
    Value::String(value.to_string())
  }
}

impl From<String> for Value {
  fn from(value: String) -> Self {
    Value::String(value)
  }
}

impl From<ArtifactRef> for Value {
  fn from(value: ArtifactRef) -> Self {
    Value::Artifact(value)
  }
}

impl From<Vec<Value>> for Value {
  fn from(value: Vec<Value>) -> Self {
    Value::List(value)
  }
}

impl From<BTreeMap<String, Value>> for Value {
  fn from(value: BTreeMap<String, Value>) -> Self {
    Value::Map(value)
  }
}
