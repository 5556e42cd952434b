//! Cartograph Store
//!
//! The registry is a key/value store of flat job status records shared by
//! every job manager that serves the same jobs. Records map field names to
//! primitive JSON values (null, bool, number, string).
//!
//! Terminal transitions must happen exactly once even with several writers,
//! so the [`Registry`] trait carries two conditional writes:
//! [`Registry::put_if_absent`] and [`Registry::compare_and_put`].

mod memory;
mod sqlite;

pub use memory::InMemoryRegistry;
pub use sqlite::SqliteRegistry;

use async_trait::async_trait;

/// A flat status record.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Error type for registry operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("migration error: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),

  /// Field values must be primitives.
  #[error("record field '{field}' is not a primitive value")]
  NonPrimitive { field: String },

  #[error("failed to encode record: {0}")]
  Encode(#[from] serde_json::Error),

  #[error("stored record for '{key}' is corrupt: {message}")]
  Corrupt { key: String, message: String },
}

#[async_trait]
pub trait Registry: Send + Sync {
  /// Insert or overwrite a record.
  async fn put(&self, key: &str, record: Record) -> Result<(), Error>;

  async fn get(&self, key: &str) -> Result<Option<Record>, Error>;

  async fn contains_key(&self, key: &str) -> Result<bool, Error>;

  /// Insert only if no record exists. Returns whether it was inserted.
  async fn put_if_absent(&self, key: &str, record: Record) -> Result<bool, Error>;

  /// Replace the record only if it currently equals `expected`.
  /// Returns whether it was replaced.
  async fn compare_and_put(&self, key: &str, expected: &Record, record: Record) -> Result<bool, Error>;
}

/// Reject records holding arrays or objects.
pub fn ensure_flat(record: &Record) -> Result<(), Error> {
  match record.iter().find(|(_, v)| v.is_array() || v.is_object()) {
    Some((field, _)) => Err(Error::NonPrimitive { field: field.clone() }),
    None => Ok(()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_ensure_flat() {
    let flat = json!({ "appId": "city-map", "success": true, "requestCount": 3, "error": null });
    assert!(ensure_flat(flat.as_object().unwrap()).is_ok());

    let nested = json!({ "appId": "city-map", "layers": ["osm"] });
    assert!(matches!(
      ensure_flat(nested.as_object().unwrap()),
      Err(Error::NonPrimitive { field }) if field == "layers"
    ));
  }
}
