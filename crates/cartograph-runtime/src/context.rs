//! The per-job values context.
//!
//! A single map of named values shared by every stage of one execution.
//! Names are write-once: the first write wins and later writes to the same
//! name fail, except for internal values which are renamed instead.

use std::collections::BTreeMap;
use std::sync::RwLock;

use cartograph_contract::Value;
use cartograph_workflow::suffixed_name;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
  #[error("'{name}' has already been written")]
  AlreadyWritten { name: String },

  #[error("'{name}' is not available")]
  NotAvailable { name: String },
}

/// One output being committed to the context.
#[derive(Debug, Clone, PartialEq)]
pub struct Write {
  pub name: String,
  pub value: Value,
  /// Rename on conflict instead of failing.
  pub internal: bool,
}

#[derive(Debug, Default)]
pub struct ValuesContext {
  values: RwLock<BTreeMap<String, Value>>,
}

impl ValuesContext {
  pub fn new() -> Self {
    Self::default()
  }

  /// A context pre-populated with bound attributes.
  pub fn with_seed(seed: BTreeMap<String, Value>) -> Self {
    Self {
      values: RwLock::new(seed),
    }
  }

  pub fn get(&self, name: &str) -> Result<Value, ContextError> {
    self
      .values
      .read()
      .unwrap_or_else(|e| e.into_inner())
      .get(name)
      .cloned()
      .ok_or_else(|| ContextError::NotAvailable { name: name.to_string() })
  }

  pub fn contains(&self, name: &str) -> bool {
    self.values.read().unwrap_or_else(|e| e.into_inner()).contains_key(name)
  }

  pub fn put(&self, name: &str, value: Value) -> Result<(), ContextError> {
    let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
    if values.contains_key(name) {
      return Err(ContextError::AlreadyWritten { name: name.to_string() });
    }
    values.insert(name.to_string(), value);
    Ok(())
  }

  /// Write an internal value, returning the name it was stored under.
  pub fn put_internal(&self, name: &str, value: Value) -> String {
    let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
    let stored = unique_name(&values, name);
    values.insert(stored.clone(), value);
    stored
  }

  /// Commit a stage's outputs atomically. Nothing is written if any
  /// non-internal name is already taken.
  pub fn commit(&self, writes: Vec<Write>) -> Result<Vec<String>, ContextError> {
    let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
    if let Some(taken) = writes.iter().find(|w| !w.internal && values.contains_key(&w.name)) {
      return Err(ContextError::AlreadyWritten {
        name: taken.name.clone(),
      });
    }

    let mut stored = Vec::with_capacity(writes.len());
    for write in writes {
      let name = if write.internal {
        unique_name(&values, &write.name)
      } else {
        write.name
      };
      values.insert(name.clone(), write.value);
      stored.push(name);
    }
    Ok(stored)
  }

  /// A copy of every value currently held.
  pub fn snapshot(&self) -> BTreeMap<String, Value> {
    self.values.read().unwrap_or_else(|e| e.into_inner()).clone()
  }

  pub fn len(&self) -> usize {
    self.values.read().unwrap_or_else(|e| e.into_inner()).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

fn unique_name(values: &BTreeMap<String, Value>, name: &str) -> String {
  let mut candidate = name.to_string();
  while values.contains_key(&candidate) {
    candidate = suffixed_name(name);
  }
  candidate
}
