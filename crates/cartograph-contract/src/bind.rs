//! Binding raw parameters against a contract.
//!
//! Binding never stops at the first problem: every violation is collected so
//! a caller can report all of them at once.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::coerce::{check, coerce};
use crate::error::{ContractError, Violation};
use crate::slot::{Contract, SlotKind};
use crate::value::Value;

/// What to do with supplied names the contract does not declare.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtraParameterPolicy {
  /// Each unknown name is a violation.
  #[default]
  Reject,
  /// Unknown names are dropped and reported as warnings.
  Warn,
}

/// Result of binding values against a contract.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Binding {
  /// Bound values, including defaults filled in for absent slots.
  pub values: BTreeMap<String, Value>,
  pub violations: Vec<Violation>,
  pub warnings: Vec<String>,
}

impl Binding {
  pub fn is_valid(&self) -> bool {
    self.violations.is_empty()
  }

  pub fn into_result(self) -> Result<BTreeMap<String, Value>, ContractError> {
    if self.violations.is_empty() {
      Ok(self.values)
    } else {
      Err(ContractError {
        violations: self.violations,
      })
    }
  }
}

impl Contract {
  /// Bind a raw JSON request. JSON `null` is treated as absent.
  pub fn bind(
    &self,
    raw: &serde_json::Map<String, serde_json::Value>,
    policy: ExtraParameterPolicy,
  ) -> Binding {
    let mut supplied = BTreeMap::new();
    let mut violations = Vec::new();
    let mut warnings = Vec::new();

    for slot in self.slots() {
      let Some(json) = raw.get(&slot.name).filter(|v| !v.is_null()) else {
        continue;
      };
      match coerce(&slot.name, json, slot.value_type) {
        Ok(value) => {
          supplied.insert(slot.name.clone(), value);
        }
        Err(violation) => {
          // Present but malformed still counts as supplied for group checks.
          supplied.insert(slot.name.clone(), Value::Null);
          violations.push(violation);
        }
      }
    }

    for key in raw.keys().filter(|key| !self.contains(key)) {
      match policy {
        ExtraParameterPolicy::Reject => violations.push(Violation::Unexpected { slot: key.clone() }),
        ExtraParameterPolicy::Warn => {
          warn!(parameter = %key, "unexpected_parameter_ignored");
          warnings.push(format!("unexpected parameter '{key}' was ignored"));
        }
      }
    }

    let mut binding = self.resolve(supplied);
    violations.append(&mut binding.violations);
    binding.violations = violations;
    binding.warnings = warnings;
    binding
  }

  /// Bind already-typed values, checking each against its declared type.
  pub fn bind_values(&self, values: BTreeMap<String, Value>) -> Binding {
    let mut violations = Vec::new();
    let mut supplied = BTreeMap::new();

    for (name, value) in values {
      if value.is_null() {
        continue;
      }
      match self.get(&name) {
        Some(slot) => {
          if let Err(violation) = check(&name, &value, slot.value_type) {
            violations.push(violation);
          }
          supplied.insert(name, value);
        }
        None => violations.push(Violation::Unexpected { slot: name }),
      }
    }

    let mut binding = self.resolve(supplied);
    violations.append(&mut binding.violations);
    binding.violations = violations;
    binding
  }

  /// Apply presence rules and defaults to the supplied values.
  fn resolve(&self, supplied: BTreeMap<String, Value>) -> Binding {
    let present: BTreeSet<String> = supplied.keys().cloned().collect();
    let mut violations = Vec::new();
    let mut values: BTreeMap<String, Value> = supplied
      .into_iter()
      .filter(|(_, value)| !value.is_null())
      .collect();

    for slot in self.slots() {
      if present.contains(&slot.name) {
        continue;
      }
      match &slot.kind {
        SlotKind::Required if slot.one_of.is_none() => violations.push(Violation::MissingRequired {
          slot: slot.name.clone(),
        }),
        SlotKind::HasDefault(default) => {
          values.insert(slot.name.clone(), default.clone());
        }
        _ => {}
      }
    }

    for trigger in self.slots().iter().filter(|s| present.contains(&s.name)) {
      for dependent in &trigger.requires {
        if present.contains(dependent) {
          continue;
        }
        let dependent_slot = self.get(dependent);
        // Already reported as MissingRequired.
        if dependent_slot.is_some_and(|s| s.is_required()) {
          continue;
        }
        if dependent_slot.and_then(|s| s.default_value()).is_some() {
          continue;
        }
        violations.push(Violation::MissingRequiredBy {
          slot: dependent.clone(),
          trigger: trigger.name.clone(),
        });
      }
    }

    for (group, members) in self.one_of_groups() {
      let supplied_members: Vec<String> = members
        .iter()
        .filter(|m| present.contains(**m))
        .map(|m| m.to_string())
        .collect();
      match supplied_members.len() {
        0 => violations.push(Violation::NoneOfGroup {
          group: group.to_string(),
          members: members.iter().map(|m| m.to_string()).collect(),
        }),
        1 => {}
        _ => violations.push(Violation::ManyOfGroup {
          group: group.to_string(),
          present: supplied_members,
        }),
      }
    }

    Binding {
      values,
      violations,
      warnings: Vec::new(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::slot::Slot;
  use crate::value::ValueType;
  use serde_json::json;

  fn raw(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    value.as_object().cloned().unwrap_or_default()
  }

  fn report_contract() -> Contract {
    Contract::from_slots([
      Slot::required("layout", ValueType::String),
      Slot::with_default("dpi", ValueType::Integer, 72),
      Slot::required("bbox", ValueType::List).one_of("extent"),
      Slot::required("center", ValueType::List)
        .one_of("extent")
        .requires(["scale"]),
      Slot::with_default("rotation", ValueType::Number, 0.0),
      Slot::internal("debug_tiles", ValueType::Any),
    ])
    .with_slot(Slot::required("scale", ValueType::Number).one_of("scale_group"))
  }

  #[test]
  fn test_bind_fills_defaults() {
    let binding = Contract::from_slots([
      Slot::required("layout", ValueType::String),
      Slot::with_default("dpi", ValueType::Integer, 72),
    ])
    .bind(&raw(json!({ "layout": "A4 portrait" })), ExtraParameterPolicy::Reject);

    assert!(binding.is_valid());
    assert_eq!(binding.values["dpi"], Value::Integer(72));
    assert_eq!(binding.values["layout"], Value::from("A4 portrait"));
  }

  #[test]
  fn test_bind_reports_every_violation() {
    let binding = report_contract().bind(
      &raw(json!({ "bbox": [0, 0, 1, 1], "center": [0, 0], "dpi": "high", "extra": 1 })),
      ExtraParameterPolicy::Reject,
    );

    let violations = &binding.violations;
    assert!(violations.contains(&Violation::MissingRequired {
      slot: "layout".to_string()
    }));
    assert!(violations.contains(&Violation::ManyOfGroup {
      group: "extent".to_string(),
      present: vec!["bbox".to_string(), "center".to_string()],
    }));
    assert!(violations.contains(&Violation::Unexpected {
      slot: "extra".to_string()
    }));
    assert!(violations.iter().any(|v| matches!(v, Violation::TypeMismatch { slot, .. } if slot == "dpi")));
  }

  #[test]
  fn test_none_of_group() {
    let contract = Contract::from_slots([
      Slot::required("bbox", ValueType::List).one_of("extent"),
      Slot::required("center", ValueType::List).one_of("extent"),
    ]);
    let binding = contract.bind(&raw(json!({})), ExtraParameterPolicy::Reject);
    assert_eq!(
      binding.violations,
      vec![Violation::NoneOfGroup {
        group: "extent".to_string(),
        members: vec!["bbox".to_string(), "center".to_string()],
      }]
    );
  }

  #[test]
  fn test_requires_without_default() {
    let contract = Contract::from_slots([
      Slot::with_default("center", ValueType::List, Value::List(Vec::new())).requires(["scale"]),
      Slot::internal("scale", ValueType::Number),
    ]);
    let binding = contract.bind(&raw(json!({ "center": [5, 5] })), ExtraParameterPolicy::Reject);
    assert_eq!(
      binding.violations,
      vec![Violation::MissingRequiredBy {
        slot: "scale".to_string(),
        trigger: "center".to_string(),
      }]
    );
  }

  #[test]
  fn test_requires_satisfied_by_default() {
    let contract = Contract::from_slots([
      Slot::with_default("center", ValueType::List, Value::List(Vec::new())).requires(["scale"]),
      Slot::with_default("scale", ValueType::Number, 25000.0),
    ]);
    let binding = contract.bind(&raw(json!({ "center": [5, 5] })), ExtraParameterPolicy::Reject);
    assert!(binding.is_valid());
    assert_eq!(binding.values["scale"], Value::Number(25000.0));
  }

  #[test]
  fn test_requires_not_triggered_by_default() {
    let contract = Contract::from_slots([
      Slot::with_default("center", ValueType::List, Value::List(Vec::new())).requires(["scale"]),
      Slot::internal("scale", ValueType::Number),
    ]);
    let binding = contract.bind(&raw(json!({})), ExtraParameterPolicy::Reject);
    assert!(binding.is_valid());
  }

  #[test]
  fn test_extra_parameters_warn_policy() {
    let contract = Contract::from_slots([Slot::with_default("dpi", ValueType::Integer, 72)]);
    let binding = contract.bind(&raw(json!({ "outputFormat": "pdf" })), ExtraParameterPolicy::Warn);
    assert!(binding.is_valid());
    assert_eq!(binding.warnings.len(), 1);
    assert!(!binding.values.contains_key("outputFormat"));
  }

  #[test]
  fn test_null_is_absent() {
    let contract = Contract::from_slots([Slot::required("layout", ValueType::String)]);
    let binding = contract.bind(&raw(json!({ "layout": null })), ExtraParameterPolicy::Reject);
    assert_eq!(
      binding.violations,
      vec![Violation::MissingRequired {
        slot: "layout".to_string()
      }]
    );
  }

  #[test]
  fn test_bind_values_type_checks() {
    let contract = Contract::from_slots([
      Slot::required("scale", ValueType::Number),
      Slot::required("layers", ValueType::List),
    ]);
    let mut values = BTreeMap::new();
    values.insert("scale".to_string(), Value::Integer(5000));
    values.insert("layers".to_string(), Value::from("osm"));

    let binding = contract.bind_values(values);
    assert_eq!(binding.violations.len(), 1);
    assert!(matches!(
      &binding.violations[0],
      Violation::TypeMismatch { slot, expected: ValueType::List, .. } if slot == "layers"
    ));
  }

  #[test]
  fn test_into_result_error_message() {
    let contract = Contract::from_slots([Slot::required("layout", ValueType::String)]);
    let err = contract
      .bind(&raw(json!({})), ExtraParameterPolicy::Reject)
      .into_result()
      .unwrap_err();
    assert_eq!(err.to_string(), "invalid parameters: missing required parameter 'layout'");
  }
}
