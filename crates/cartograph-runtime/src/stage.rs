//! The stage trait and the context a stage runs against.

use std::collections::BTreeMap;

use async_trait::async_trait;
use cartograph_contract::{ContractError, Value, ValueType, check};
use cartograph_workflow::StageSpec;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::context::ContextError;

#[derive(Debug, Error)]
pub enum StageError {
  #[error("input '{name}' is not declared by this stage")]
  UndeclaredInput { name: String },

  #[error("output '{name}' is not declared by this stage")]
  UndeclaredOutput { name: String },

  #[error("input '{name}' was not supplied")]
  MissingInput { name: String },

  #[error("required output '{name}' was not produced")]
  MissingOutput { name: String },

  #[error("output '{name}' was set twice")]
  DuplicateOutput { name: String },

  #[error("'{name}' expected {expected}, got {found}")]
  WrongType {
    name: String,
    expected: ValueType,
    found: ValueType,
  },

  #[error(transparent)]
  Contract(#[from] ContractError),

  #[error(transparent)]
  Context(#[from] ContextError),

  #[error("stage cancelled")]
  Cancelled,

  #[error("stage panicked: {message}")]
  Panicked { message: String },

  #[error("{message}")]
  Failed { message: String },
}

impl StageError {
  pub fn failed(message: impl Into<String>) -> Self {
    StageError::Failed {
      message: message.into(),
    }
  }
}

/// A unit of work in a pipeline.
///
/// Implementations read their bound inputs from the [`StageContext`] and
/// record outputs on it. Outputs are only committed to the job's values
/// context if `run` returns `Ok`. Long-running stages should observe
/// `cancel` and return [`StageError::Cancelled`] promptly.
#[async_trait]
pub trait Stage: Send + Sync {
  async fn run(&self, ctx: &mut StageContext, cancel: CancellationToken) -> Result<(), StageError>;
}

/// Inputs and pending outputs of one running stage.
#[derive(Debug)]
pub struct StageContext {
  execution_id: String,
  spec: StageSpec,
  inputs: BTreeMap<String, Value>,
  outputs: BTreeMap<String, Value>,
}

impl StageContext {
  /// `inputs` are keyed by slot name and already bound against the stage's
  /// input contract.
  pub fn new(execution_id: impl Into<String>, spec: StageSpec, inputs: BTreeMap<String, Value>) -> Self {
    Self {
      execution_id: execution_id.into(),
      spec,
      inputs,
      outputs: BTreeMap::new(),
    }
  }

  pub fn execution_id(&self) -> &str {
    &self.execution_id
  }

  pub fn stage_name(&self) -> &str {
    &self.spec.name
  }

  pub fn spec(&self) -> &StageSpec {
    &self.spec
  }

  /// An input that must be present.
  pub fn input(&self, slot: &str) -> Result<&Value, StageError> {
    self
      .optional_input(slot)?
      .ok_or_else(|| StageError::MissingInput { name: slot.to_string() })
  }

  /// An input that may be absent (an optional slot with no default).
  pub fn optional_input(&self, slot: &str) -> Result<Option<&Value>, StageError> {
    if !self.spec.inputs.contains(slot) {
      return Err(StageError::UndeclaredInput { name: slot.to_string() });
    }
    Ok(self.inputs.get(slot))
  }

  pub fn input_str(&self, slot: &str) -> Result<&str, StageError> {
    let value = self.input(slot)?;
    value.as_str().ok_or_else(|| wrong_type(slot, ValueType::String, value))
  }

  pub fn input_i64(&self, slot: &str) -> Result<i64, StageError> {
    let value = self.input(slot)?;
    value.as_i64().ok_or_else(|| wrong_type(slot, ValueType::Integer, value))
  }

  pub fn input_f64(&self, slot: &str) -> Result<f64, StageError> {
    let value = self.input(slot)?;
    value.as_f64().ok_or_else(|| wrong_type(slot, ValueType::Number, value))
  }

  pub fn input_bool(&self, slot: &str) -> Result<bool, StageError> {
    let value = self.input(slot)?;
    value.as_bool().ok_or_else(|| wrong_type(slot, ValueType::Bool, value))
  }

  /// Record an output. Only declared outputs of the declared type are accepted.
  pub fn set_output(&mut self, slot: &str, value: impl Into<Value>) -> Result<(), StageError> {
    let value = value.into();
    let declared = self
      .spec
      .outputs
      .get(slot)
      .ok_or_else(|| StageError::UndeclaredOutput { name: slot.to_string() })?;
    if check(slot, &value, declared.value_type).is_err() {
      return Err(wrong_type(slot, declared.value_type, &value));
    }
    if self.outputs.contains_key(slot) {
      return Err(StageError::DuplicateOutput { name: slot.to_string() });
    }
    self.outputs.insert(slot.to_string(), value);
    Ok(())
  }

  pub fn outputs(&self) -> &BTreeMap<String, Value> {
    &self.outputs
  }

  pub(crate) fn into_outputs(self) -> (StageSpec, BTreeMap<String, Value>) {
    (self.spec, self.outputs)
  }
}

fn wrong_type(slot: &str, expected: ValueType, value: &Value) -> StageError {
  StageError::WrongType {
    name: slot.to_string(),
    expected,
    found: value.value_type(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use cartograph_contract::{Contract, Slot};

  fn context() -> StageContext {
    let spec = StageSpec::new("map")
      .with_inputs(Contract::from_slots([
        Slot::required("dpi", ValueType::Integer),
        Slot::internal("debug", ValueType::Any),
      ]))
      .with_outputs(Contract::from_slots([Slot::required("image", ValueType::Artifact)]));
    let mut inputs = BTreeMap::new();
    inputs.insert("dpi".to_string(), Value::Integer(254));
    StageContext::new("exec-1", spec, inputs)
  }

  #[test]
  fn test_typed_input_access() {
    let ctx = context();
    assert_eq!(ctx.input_i64("dpi").unwrap(), 254);
    assert_eq!(ctx.input_f64("dpi").unwrap(), 254.0);
    assert!(matches!(ctx.input_str("dpi"), Err(StageError::WrongType { .. })));
  }

  #[test]
  fn test_undeclared_and_missing_inputs() {
    let ctx = context();
    assert!(matches!(ctx.input("scale"), Err(StageError::UndeclaredInput { .. })));
    assert!(matches!(ctx.input("debug"), Err(StageError::MissingInput { .. })));
    assert!(ctx.optional_input("debug").unwrap().is_none());
  }

  #[test]
  fn test_set_output_rejects_undeclared() {
    let mut ctx = context();
    let err = ctx.set_output("legend", Value::from("x")).unwrap_err();
    assert!(matches!(err, StageError::UndeclaredOutput { name } if name == "legend"));
  }

  #[test]
  fn test_set_output_type_checked() {
    let mut ctx = context();
    assert!(matches!(
      ctx.set_output("image", 3_i64),
      Err(StageError::WrongType {
        expected: ValueType::Artifact,
        found: ValueType::Integer,
        ..
      })
    ));
    ctx
      .set_output("image", cartograph_contract::ArtifactRef::new("/tmp/map.png"))
      .unwrap();
    assert!(matches!(
      ctx.set_output("image", cartograph_contract::ArtifactRef::new("/tmp/other.png")),
      Err(StageError::DuplicateOutput { .. })
    ));
  }
}
