use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::debug;

use crate::{Error, Record, Registry, ensure_flat};

/// SQLite-backed registry. Records are stored as JSON text.
#[derive(Debug, Clone)]
pub struct SqliteRegistry {
  pool: SqlitePool,
}

impl SqliteRegistry {
  /// Create a registry with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if needed) a database file and run migrations.
  pub async fn open(path: &Path) -> Result<Self, Error> {
    let options = SqliteConnectOptions::new().filename(path).create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    let registry = Self::new(pool);
    registry.migrate().await?;
    Ok(registry)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), Error> {
    sqlx::migrate!("../../migrations").run(&self.pool).await?;
    Ok(())
  }
}

/// Serialize with sorted keys so equal records have equal text.
fn encode(record: &Record) -> Result<String, Error> {
  let sorted: BTreeMap<&String, &serde_json::Value> = record.iter().collect();
  Ok(serde_json::to_string(&sorted)?)
}

fn decode(key: &str, text: &str) -> Result<Record, Error> {
  serde_json::from_str(text).map_err(|e| Error::Corrupt {
    key: key.to_string(),
    message: e.to_string(),
  })
}

#[async_trait]
impl Registry for SqliteRegistry {
  async fn put(&self, key: &str, record: Record) -> Result<(), Error> {
    ensure_flat(&record)?;
    sqlx::query(
      r#"
      INSERT INTO registry (key, record, updated_at)
      VALUES (?, ?, ?)
      ON CONFLICT(key) DO UPDATE SET record = excluded.record, updated_at = excluded.updated_at
      "#,
    )
    .bind(key)
    .bind(encode(&record)?)
    .bind(Utc::now())
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn get(&self, key: &str) -> Result<Option<Record>, Error> {
    let text: Option<String> = sqlx::query_scalar("SELECT record FROM registry WHERE key = ?")
      .bind(key)
      .fetch_optional(&self.pool)
      .await?;

    text.map(|t| decode(key, &t)).transpose()
  }

  async fn contains_key(&self, key: &str) -> Result<bool, Error> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM registry WHERE key = ?")
      .bind(key)
      .fetch_one(&self.pool)
      .await?;

    Ok(count > 0)
  }

  async fn put_if_absent(&self, key: &str, record: Record) -> Result<bool, Error> {
    ensure_flat(&record)?;
    let result = sqlx::query(
      r#"
      INSERT INTO registry (key, record, updated_at)
      VALUES (?, ?, ?)
      ON CONFLICT(key) DO NOTHING
      "#,
    )
    .bind(key)
    .bind(encode(&record)?)
    .bind(Utc::now())
    .execute(&self.pool)
    .await?;

    Ok(result.rows_affected() == 1)
  }

  async fn compare_and_put(&self, key: &str, expected: &Record, record: Record) -> Result<bool, Error> {
    ensure_flat(&record)?;
    let result = sqlx::query(
      r#"
      UPDATE registry
      SET record = ?, updated_at = ?
      WHERE key = ? AND record = ?
      "#,
    )
    .bind(encode(&record)?)
    .bind(Utc::now())
    .bind(key)
    .bind(encode(expected)?)
    .execute(&self.pool)
    .await?;

    let replaced = result.rows_affected() == 1;
    if !replaced {
      debug!(key, "compare_and_put lost race");
    }
    Ok(replaced)
  }
}
