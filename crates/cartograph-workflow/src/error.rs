use std::fmt;

use cartograph_contract::ValueType;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
  #[error("duplicate stage name '{stage}'")]
  DuplicateStage { stage: String },

  #[error("stage '{stage}' maps undeclared slot '{slot}'")]
  UnknownMapping { stage: String, slot: String },

  #[error("'{name}' is produced by more than one stage: {}", .stages.join(", "))]
  AmbiguousProducer { name: String, stages: Vec<String> },

  #[error("stage '{stage}' output '{name}' shadows a top-level attribute")]
  ShadowsAttribute { stage: String, name: String },

  #[error("dependency cycle: {}", .stages.join(" -> "))]
  Cycle { stages: Vec<String> },

  #[error("stage '{stage}' requires '{name}', which no stage or attribute provides")]
  UnsatisfiableInput { stage: String, name: String },

  #[error("stage '{stage}' requires one of [{}], none of which is provided", .members.join(", "))]
  UnsatisfiableGroup {
    stage: String,
    group: String,
    members: Vec<String>,
  },

  #[error("'{name}' is {produced} from '{producer}' but stage '{consumer}' expects {expected}")]
  TypeMismatch {
    name: String,
    producer: String,
    consumer: String,
    produced: ValueType,
    expected: ValueType,
  },

  #[error("failed to fingerprint graph: {message}")]
  Fingerprint { message: String },
}

/// All configuration errors found while building a graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct GraphErrors(pub Vec<GraphError>);

impl GraphErrors {
  pub fn errors(&self) -> &[GraphError] {
    &self.0
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl fmt::Display for GraphErrors {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "invalid pipeline: ")?;
    for (i, error) in self.0.iter().enumerate() {
      if i > 0 {
        write!(f, "; ")?;
      }
      write!(f, "{error}")?;
    }
    Ok(())
  }
}

impl From<GraphError> for GraphErrors {
  fn from(error: GraphError) -> Self {
    GraphErrors(vec![error])
  }
}
