//! Slot declarations and the contracts built from them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::{Value, ValueType};

/// How a slot behaves when no value is supplied for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "default", rename_all = "snake_case")]
pub enum SlotKind {
  /// Must be supplied, unless the slot belongs to a one-of group.
  Required,
  /// Falls back to the carried value.
  HasDefault(Value),
  /// Debug-only value; never required and never validated for presence.
  Internal,
}

/// A named, typed entry in a contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
  pub name: String,
  #[serde(rename = "type")]
  pub value_type: ValueType,
  pub kind: SlotKind,
  /// Slots that must also be present when this one is supplied.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub requires: Vec<String>,
  /// Exactly one member of a named group must be supplied.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub one_of: Option<String>,
}

impl Slot {
  fn new(name: impl Into<String>, value_type: ValueType, kind: SlotKind) -> Self {
    Self {
      name: name.into(),
      value_type,
      kind,
      requires: Vec::new(),
      one_of: None,
    }
  }

  pub fn required(name: impl Into<String>, value_type: ValueType) -> Self {
    Self::new(name, value_type, SlotKind::Required)
  }

  pub fn with_default(name: impl Into<String>, value_type: ValueType, default: impl Into<Value>) -> Self {
    Self::new(name, value_type, SlotKind::HasDefault(default.into()))
  }

  pub fn internal(name: impl Into<String>, value_type: ValueType) -> Self {
    Self::new(name, value_type, SlotKind::Internal)
  }

  /// Declare slots that become required once this slot is supplied.
  pub fn requires<I, S>(mut self, names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.requires.extend(names.into_iter().map(Into::into));
    self
  }

  /// Place the slot in a one-of group.
  pub fn one_of(mut self, group: impl Into<String>) -> Self {
    self.one_of = Some(group.into());
    self
  }

  pub fn default_value(&self) -> Option<&Value> {
    match &self.kind {
      SlotKind::HasDefault(value) => Some(value),
      _ => None,
    }
  }

  /// Required on its own. One-of members are only required as a group.
  pub fn is_required(&self) -> bool {
    matches!(self.kind, SlotKind::Required) && self.one_of.is_none()
  }

  pub fn is_internal(&self) -> bool {
    matches!(self.kind, SlotKind::Internal)
  }
}

/// An ordered set of slots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Contract {
  slots: Vec<Slot>,
}

impl Contract {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn from_slots(slots: impl IntoIterator<Item = Slot>) -> Self {
    let mut contract = Self::new();
    for slot in slots {
      contract.push(slot);
    }
    contract
  }

  pub fn with_slot(mut self, slot: Slot) -> Self {
    self.push(slot);
    self
  }

  /// Add a slot. A later declaration with the same name replaces the earlier one.
  pub fn push(&mut self, slot: Slot) {
    match self.slots.iter_mut().find(|s| s.name == slot.name) {
      Some(existing) => *existing = slot,
      None => self.slots.push(slot),
    }
  }

  pub fn slots(&self) -> &[Slot] {
    &self.slots
  }

  pub fn get(&self, name: &str) -> Option<&Slot> {
    self.slots.iter().find(|s| s.name == name)
  }

  pub fn contains(&self, name: &str) -> bool {
    self.get(name).is_some()
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.slots.iter().map(|s| s.name.as_str())
  }

  pub fn len(&self) -> usize {
    self.slots.len()
  }

  pub fn is_empty(&self) -> bool {
    self.slots.is_empty()
  }

  /// One-of groups and their members, in declaration order.
  pub fn one_of_groups(&self) -> BTreeMap<&str, Vec<&str>> {
    let mut groups: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for slot in &self.slots {
      if let Some(group) = &slot.one_of {
        groups.entry(group.as_str()).or_default().push(slot.name.as_str());
      }
    }
    groups
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_one_of_member_is_not_individually_required() {
    let slot = Slot::required("bbox", ValueType::List).one_of("extent");
    assert!(!slot.is_required());
    assert!(Slot::required("layout", ValueType::String).is_required());
  }

  #[test]
  fn test_push_replaces_same_name() {
    let contract = Contract::new()
      .with_slot(Slot::required("dpi", ValueType::Integer))
      .with_slot(Slot::with_default("dpi", ValueType::Integer, 72));
    assert_eq!(contract.len(), 1);
    assert_eq!(contract.get("dpi").unwrap().default_value(), Some(&Value::Integer(72)));
  }

  #[test]
  fn test_one_of_groups() {
    let contract = Contract::from_slots([
      Slot::required("bbox", ValueType::List).one_of("extent"),
      Slot::required("center", ValueType::List).one_of("extent"),
      Slot::required("layout", ValueType::String),
    ]);
    let groups = contract.one_of_groups();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups["extent"], vec!["bbox", "center"]);
  }
}
