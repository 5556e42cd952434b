use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{Error, Record, Registry, ensure_flat};

/// Process-local registry, for tests and single-instance deployments.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
  records: Mutex<HashMap<String, Record>>,
}

impl InMemoryRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[async_trait]
impl Registry for InMemoryRegistry {
  async fn put(&self, key: &str, record: Record) -> Result<(), Error> {
    ensure_flat(&record)?;
    let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
    records.insert(key.to_string(), record);
    Ok(())
  }

  async fn get(&self, key: &str) -> Result<Option<Record>, Error> {
    let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
    Ok(records.get(key).cloned())
  }

  async fn contains_key(&self, key: &str) -> Result<bool, Error> {
    let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
    Ok(records.contains_key(key))
  }

  async fn put_if_absent(&self, key: &str, record: Record) -> Result<bool, Error> {
    ensure_flat(&record)?;
    let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
    if records.contains_key(key) {
      return Ok(false);
    }
    records.insert(key.to_string(), record);
    Ok(true)
  }

  async fn compare_and_put(&self, key: &str, expected: &Record, record: Record) -> Result<bool, Error> {
    ensure_flat(&record)?;
    let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
    match records.get_mut(key) {
      Some(current) if current == expected => {
        *current = record;
        Ok(true)
      }
      _ => Ok(false),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn record(value: serde_json::Value) -> Record {
    value.as_object().cloned().unwrap_or_default()
  }

  #[tokio::test]
  async fn test_put_and_get() {
    let registry = InMemoryRegistry::new();
    registry.put("job-1", record(json!({ "appId": "city-map" }))).await.unwrap();

    assert!(registry.contains_key("job-1").await.unwrap());
    assert_eq!(
      registry.get("job-1").await.unwrap(),
      Some(record(json!({ "appId": "city-map" })))
    );
    assert_eq!(registry.get("job-2").await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_put_if_absent() {
    let registry = InMemoryRegistry::new();
    assert!(registry.put_if_absent("job-1", record(json!({ "n": 1 }))).await.unwrap());
    assert!(!registry.put_if_absent("job-1", record(json!({ "n": 2 }))).await.unwrap());
    assert_eq!(registry.get("job-1").await.unwrap(), Some(record(json!({ "n": 1 }))));
  }

  #[tokio::test]
  async fn test_compare_and_put() {
    let registry = InMemoryRegistry::new();
    let pending = record(json!({ "running": false }));
    registry.put("job-1", pending.clone()).await.unwrap();

    let stale = record(json!({ "running": true }));
    assert!(!registry.compare_and_put("job-1", &stale, record(json!({ "done": true }))).await.unwrap());
    assert!(registry.compare_and_put("job-1", &pending, record(json!({ "done": true }))).await.unwrap());
    assert!(!registry.compare_and_put("missing", &pending, record(json!({}))).await.unwrap());
  }

  #[tokio::test]
  async fn test_rejects_nested_values() {
    let registry = InMemoryRegistry::new();
    let err = registry.put("job-1", record(json!({ "bbox": [1, 2] }))).await.unwrap_err();
    assert!(matches!(err, Error::NonPrimitive { .. }));
    assert!(registry.is_empty());
  }
}
