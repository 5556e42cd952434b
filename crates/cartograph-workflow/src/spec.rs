use std::collections::BTreeMap;

use cartograph_contract::Contract;
use serde::{Deserialize, Serialize};

/// A stage's declared contracts and name mappings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
  pub name: String,
  pub inputs: Contract,
  pub outputs: Contract,
  /// Input slot -> context name it reads.
  #[serde(default)]
  pub input_mapping: BTreeMap<String, String>,
  /// Output slot -> context name it writes.
  #[serde(default)]
  pub output_mapping: BTreeMap<String, String>,
}

impl StageSpec {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      ..Self::default()
    }
  }

  pub fn with_inputs(mut self, inputs: Contract) -> Self {
    self.inputs = inputs;
    self
  }

  pub fn with_outputs(mut self, outputs: Contract) -> Self {
    self.outputs = outputs;
    self
  }

  pub fn map_input(mut self, slot: impl Into<String>, context_name: impl Into<String>) -> Self {
    self.input_mapping.insert(slot.into(), context_name.into());
    self
  }

  pub fn map_output(mut self, slot: impl Into<String>, context_name: impl Into<String>) -> Self {
    self.output_mapping.insert(slot.into(), context_name.into());
    self
  }

  /// Context name read for an input slot.
  pub fn input_name<'a>(&'a self, slot: &'a str) -> &'a str {
    self.input_mapping.get(slot).map(String::as_str).unwrap_or(slot)
  }

  /// Context name written for an output slot.
  pub fn output_name<'a>(&'a self, slot: &'a str) -> &'a str {
    self.output_mapping.get(slot).map(String::as_str).unwrap_or(slot)
  }
}

/// `base` with a short random suffix, used to keep internal names unique.
pub fn suffixed_name(base: &str) -> String {
  let token = uuid::Uuid::new_v4().simple().to_string();
  format!("{base}_{}", &token[..8])
}
