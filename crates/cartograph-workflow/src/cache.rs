//! Graph caching.
//!
//! Building a graph is deterministic in its inputs, so templates that share
//! the same stage declarations and attributes share one built graph. The key
//! is a SHA-256 fingerprint of the serialized declarations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use cartograph_contract::Contract;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{GraphError, GraphErrors};
use crate::graph::Graph;
use crate::spec::StageSpec;

#[derive(Serialize)]
struct Fingerprinted<'a> {
  stages: &'a [StageSpec],
  attributes: &'a Contract,
}

/// Hex SHA-256 over the stage declarations and attributes.
pub fn fingerprint(stages: &[StageSpec], attributes: &Contract) -> Result<String, GraphError> {
  let bytes = serde_json::to_vec(&Fingerprinted { stages, attributes }).map_err(|e| GraphError::Fingerprint {
    message: e.to_string(),
  })?;
  Ok(format!("{:x}", Sha256::digest(&bytes)))
}

/// Caches built graphs by fingerprint.
pub struct GraphCache {
  cache: RwLock<HashMap<String, Arc<Graph>>>,
}

impl GraphCache {
  pub fn new() -> Self {
    Self {
      cache: RwLock::new(HashMap::new()),
    }
  }

  /// Get a built graph from cache, or build and cache it.
  pub fn get_or_build(&self, stages: Vec<StageSpec>, attributes: &Contract) -> Result<Arc<Graph>, GraphErrors> {
    let key = fingerprint(&stages, attributes)?;

    {
      let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
      if let Some(graph) = cache.get(&key) {
        debug!(fingerprint = %key, "graph_cache_hit");
        return Ok(graph.clone());
      }
    }

    let graph = Arc::new(Graph::build(stages, attributes)?);

    let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
    let graph = cache.entry(key).or_insert(graph).clone();
    Ok(graph)
  }

  pub fn len(&self) -> usize {
    self.cache.read().unwrap_or_else(|e| e.into_inner()).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Clear the cache.
  pub fn clear(&self) {
    let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
    cache.clear();
  }
}

impl Default for GraphCache {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use cartograph_contract::{Slot, ValueType};

  fn stages() -> Vec<StageSpec> {
    vec![
      StageSpec::new("map").with_outputs(Contract::from_slots([Slot::required("image", ValueType::Artifact)])),
      StageSpec::new("report").with_inputs(Contract::from_slots([Slot::required("image", ValueType::Artifact)])),
    ]
  }

  #[test]
  fn test_fingerprint_is_stable() {
    let a = fingerprint(&stages(), &Contract::new()).unwrap();
    let b = fingerprint(&stages(), &Contract::new()).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.len(), 64);

    let attributes = Contract::from_slots([Slot::required("bbox", ValueType::List)]);
    assert_ne!(a, fingerprint(&stages(), &attributes).unwrap());
  }

  #[test]
  fn test_identical_declarations_share_graph() {
    let cache = GraphCache::new();
    let first = cache.get_or_build(stages(), &Contract::new()).unwrap();
    let second = cache.get_or_build(stages(), &Contract::new()).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.len(), 1);

    cache.clear();
    assert!(cache.is_empty());
  }

  #[test]
  fn test_invalid_graph_is_not_cached() {
    let cache = GraphCache::new();
    let stages = vec![StageSpec::new("report").with_inputs(Contract::from_slots([Slot::required(
      "image",
      ValueType::Artifact,
    )]))];
    assert!(cache.get_or_build(stages, &Contract::new()).is_err());
    assert!(cache.is_empty());
  }
}
