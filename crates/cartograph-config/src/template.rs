use serde::{Deserialize, Serialize};

use crate::slot::SlotDef;
use crate::stage::StageDef;

/// A print template: its top-level attributes and the stages that render it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateDef {
  /// Application identifier used when submitting jobs.
  pub app_id: String,

  /// Top-level request attributes.
  #[serde(default)]
  pub attributes: Vec<SlotDef>,

  pub stages: Vec<StageDef>,

  /// Context name holding the finished artifact.
  #[serde(default = "default_artifact_slot")]
  pub artifact_slot: String,

  /// minijinja template for the download file name.
  /// Variables: `app_id`, `reference_id`, `date`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub output_filename: Option<String>,

  /// Roles allowed to use this template. Empty means public.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub access: Vec<String>,

  /// Overrides the job manager's default deadline.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,

  /// Reject request parameters the template does not declare.
  #[serde(default = "default_strict")]
  pub strict_parameters: bool,
}

impl TemplateDef {
  pub fn stage(&self, name: &str) -> Option<&StageDef> {
    self.stages.iter().find(|s| s.name == name)
  }
}

fn default_artifact_slot() -> String {
  "artifact".to_string()
}

fn default_strict() -> bool {
  true
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::slot::SlotKindDef;
  use serde_json::json;

  #[test]
  fn test_parse_template() {
    let def: TemplateDef = serde_json::from_value(json!({
      "app_id": "city-map",
      "attributes": [
        { "name": "bbox", "type": "list" },
        { "name": "dpi", "type": "integer", "default": 72 }
      ],
      "stages": [
        {
          "name": "render",
          "kind": "map",
          "inputs": [{ "name": "extent", "type": "list" }],
          "outputs": [{ "name": "image", "type": "artifact" }],
          "input_mapping": { "extent": "bbox" }
        }
      ]
    }))
    .unwrap();

    assert_eq!(def.artifact_slot, "artifact");
    assert!(def.strict_parameters);
    assert!(def.access.is_empty());
    assert_eq!(def.attributes[0].effective_kind(), SlotKindDef::Required);
    assert_eq!(def.attributes[1].effective_kind(), SlotKindDef::HasDefault);
    assert_eq!(def.stage("render").unwrap().input_mapping["extent"], "bbox");
  }

  #[test]
  fn test_slot_type_defaults_to_any() {
    let slot: SlotDef = serde_json::from_value(json!({ "name": "debug", "kind": "internal" })).unwrap();
    assert_eq!(slot.value_type, "any");
    assert_eq!(slot.effective_kind(), SlotKindDef::Internal);
  }
}
