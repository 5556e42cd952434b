use std::fmt;

use thiserror::Error;

use crate::value::ValueType;

/// A single way in which a set of values fails to satisfy a contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
  #[error("missing required parameter '{slot}'")]
  MissingRequired { slot: String },

  #[error("parameter '{slot}' is required when '{trigger}' is supplied")]
  MissingRequiredBy { slot: String, trigger: String },

  #[error("exactly one of [{}] is required (group '{group}')", .members.join(", "))]
  NoneOfGroup { group: String, members: Vec<String> },

  #[error("only one of [{}] may be supplied (group '{group}')", .present.join(", "))]
  ManyOfGroup { group: String, present: Vec<String> },

  #[error("parameter '{slot}' expected {expected}, got {found}")]
  TypeMismatch {
    slot: String,
    expected: ValueType,
    found: String,
  },

  #[error("unexpected parameter '{slot}'")]
  Unexpected { slot: String },
}

impl Violation {
  /// The slot (or group) the violation is about.
  pub fn subject(&self) -> &str {
    match self {
      Violation::MissingRequired { slot }
      | Violation::MissingRequiredBy { slot, .. }
      | Violation::TypeMismatch { slot, .. }
      | Violation::Unexpected { slot } => slot,
      Violation::NoneOfGroup { group, .. } | Violation::ManyOfGroup { group, .. } => group,
    }
  }
}

/// Every violation found while binding values against a contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ContractError {
  pub violations: Vec<Violation>,
}

impl fmt::Display for ContractError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "invalid parameters: ")?;
    for (i, violation) in self.violations.iter().enumerate() {
      if i > 0 {
        write!(f, "; ")?;
      }
      write!(f, "{violation}")?;
    }
    Ok(())
  }
}
