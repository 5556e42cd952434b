use serde::{Deserialize, Serialize};

/// How a declared slot treats absence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKindDef {
  Required,
  HasDefault,
  Internal,
}

/// A slot as written in a template file.
///
/// ```json
/// { "name": "dpi", "type": "integer", "default": 72 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotDef {
  pub name: String,

  /// Type name, e.g. "string", "integer", "artifact". Defaults to "any".
  #[serde(rename = "type", default = "default_type")]
  pub value_type: String,

  /// Explicit kind. When omitted, a slot with a `default` has a default
  /// and every other slot is required.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub kind: Option<SlotKindDef>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub default: Option<serde_json::Value>,

  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub requires: Vec<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub one_of: Option<String>,
}

impl SlotDef {
  /// The effective kind after applying the `default` shorthand.
  pub fn effective_kind(&self) -> SlotKindDef {
    match self.kind {
      Some(kind) => kind,
      None if self.default.is_some() => SlotKindDef::HasDefault,
      None => SlotKindDef::Required,
    }
  }
}

fn default_type() -> String {
  "any".to_string()
}
