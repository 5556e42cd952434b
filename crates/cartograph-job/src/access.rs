//! Access assertions and the checks that evaluate them.
//!
//! Every job carries the conjunction of its template's assertion and the
//! assertion supplied at submit time. Status, cancel and artifact requests
//! are checked against it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccessAssertion {
  #[default]
  AlwaysAllow,
  /// The requester must be authenticated and hold at least one role.
  Roles { roles: BTreeSet<String> },
  /// Every assertion must pass.
  And { assertions: Vec<AccessAssertion> },
}

impl AccessAssertion {
  /// A role assertion. No roles means public.
  pub fn roles<I, S>(roles: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let roles: BTreeSet<String> = roles.into_iter().map(Into::into).collect();
    if roles.is_empty() {
      AccessAssertion::AlwaysAllow
    } else {
      AccessAssertion::Roles { roles }
    }
  }

  /// Conjunction, flattening nested `And`s and dropping `AlwaysAllow`.
  pub fn and(self, other: AccessAssertion) -> Self {
    let mut assertions = Vec::new();
    for assertion in [self, other] {
      match assertion {
        AccessAssertion::AlwaysAllow => {}
        AccessAssertion::And { assertions: inner } => assertions.extend(inner),
        other => assertions.push(other),
      }
    }
    match assertions.len() {
      0 => AccessAssertion::AlwaysAllow,
      1 => assertions.remove(0),
      _ => AccessAssertion::And { assertions },
    }
  }
}

/// Who is making a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capability {
  pub principal: Option<String>,
  pub roles: BTreeSet<String>,
}

impl Capability {
  pub fn anonymous() -> Self {
    Self::default()
  }

  pub fn user<I, S>(principal: impl Into<String>, roles: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      principal: Some(principal.into()),
      roles: roles.into_iter().map(Into::into).collect(),
    }
  }

  pub fn is_authenticated(&self) -> bool {
    self.principal.is_some()
  }
}

/// Evaluates access assertions.
pub trait AccessControl: Send + Sync {
  fn check(&self, assertion: &AccessAssertion, capability: &Capability) -> bool;
}

/// Role membership check.
#[derive(Debug, Clone, Default)]
pub struct RoleAccessControl;

impl AccessControl for RoleAccessControl {
  fn check(&self, assertion: &AccessAssertion, capability: &Capability) -> bool {
    match assertion {
      AccessAssertion::AlwaysAllow => true,
      AccessAssertion::Roles { roles } => {
        capability.is_authenticated() && roles.iter().any(|role| capability.roles.contains(role))
      }
      AccessAssertion::And { assertions } => assertions.iter().all(|a| self.check(a, capability)),
    }
  }
}
