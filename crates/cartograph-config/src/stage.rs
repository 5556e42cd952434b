use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::slot::SlotDef;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDef {
  /// Unique name of the stage within its template.
  pub name: String,

  /// Key of the stage implementation in the stage catalog, e.g. "map".
  pub kind: String,

  #[serde(default)]
  pub inputs: Vec<SlotDef>,

  #[serde(default)]
  pub outputs: Vec<SlotDef>,

  /// Input slot name -> context name it reads.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub input_mapping: BTreeMap<String, String>,

  /// Output slot name -> context name it writes.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub output_mapping: BTreeMap<String, String>,
}
