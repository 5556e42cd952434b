//! Job status records.
//!
//! A job's status lives in the registry as a flat record under
//! `resultMetadata_<reference_id>`. Timestamps are epoch milliseconds and
//! the access assertion is embedded as a JSON string, so every field stays
//! primitive.

use cartograph_contract::ArtifactRef;
use cartograph_store::Record;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as Json;

use crate::access::AccessAssertion;
use crate::error::JobError;

pub const RESULT_METADATA_PREFIX: &str = "resultMetadata_";

/// Error value reserved for cancelled jobs.
pub const CANCELLED_ERROR: &str = "cancelled";

const APP_ID: &str = "appId";
const FILE_NAME: &str = "fileName";
const SUCCESS: &str = "success";
const START_DATE: &str = "startDate";
const COMPLETION_DATE: &str = "completionDate";
const REQUEST_COUNT: &str = "requestCount";
const ACCESS: &str = "access";
const RUNNING: &str = "running";
const ERROR: &str = "error";
const ARTIFACT: &str = "artifact";
const CONTENT_TYPE: &str = "contentType";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
  Pending { running: bool },
  Success { artifact: ArtifactRef },
  Failure { error: String },
  Cancelled,
}

impl JobState {
  pub fn is_terminal(&self) -> bool {
    !matches!(self, JobState::Pending { .. })
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      JobState::Pending { running: false } => "pending",
      JobState::Pending { running: true } => "running",
      JobState::Success { .. } => "success",
      JobState::Failure { .. } => "failure",
      JobState::Cancelled => "cancelled",
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
  pub reference_id: String,
  pub app_id: String,
  pub file_name: String,
  pub submitted_at: DateTime<Utc>,
  pub completed_at: Option<DateTime<Utc>>,
  pub request_count: u64,
  pub access: AccessAssertion,
  pub state: JobState,
}

impl JobRecord {
  /// Registry key for a reference id.
  pub fn key(reference_id: &str) -> String {
    format!("{RESULT_METADATA_PREFIX}{reference_id}")
  }

  pub fn pending(
    reference_id: impl Into<String>,
    app_id: impl Into<String>,
    file_name: impl Into<String>,
    access: AccessAssertion,
    request_count: u64,
    submitted_at: DateTime<Utc>,
  ) -> Self {
    Self {
      reference_id: reference_id.into(),
      app_id: app_id.into(),
      file_name: file_name.into(),
      submitted_at,
      completed_at: None,
      request_count,
      access,
      state: JobState::Pending { running: false },
    }
  }

  pub fn is_terminal(&self) -> bool {
    self.state.is_terminal()
  }

  /// Time since submission, frozen at completion.
  pub fn elapsed(&self, now: DateTime<Utc>) -> chrono::Duration {
    self.completed_at.unwrap_or(now) - self.submitted_at
  }

  pub fn started(mut self) -> Self {
    self.state = JobState::Pending { running: true };
    self
  }

  pub fn completed(mut self, state: JobState, at: DateTime<Utc>) -> Self {
    self.state = state;
    self.completed_at = Some(at);
    self
  }

  pub fn to_record(&self) -> Result<Record, JobError> {
    let access = serde_json::to_string(&self.access).map_err(|e| self.corrupt(e.to_string()))?;

    let mut record = Record::new();
    record.insert(APP_ID.to_string(), Json::from(self.app_id.clone()));
    record.insert(FILE_NAME.to_string(), Json::from(self.file_name.clone()));
    record.insert(START_DATE.to_string(), Json::from(self.submitted_at.timestamp_millis()));
    record.insert(REQUEST_COUNT.to_string(), Json::from(self.request_count));
    record.insert(ACCESS.to_string(), Json::from(access));

    if let Some(completed_at) = self.completed_at {
      record.insert(COMPLETION_DATE.to_string(), Json::from(completed_at.timestamp_millis()));
    }

    match &self.state {
      JobState::Pending { running } => {
        record.insert(RUNNING.to_string(), Json::from(*running));
      }
      JobState::Success { artifact } => {
        record.insert(SUCCESS.to_string(), Json::from(true));
        record.insert(ARTIFACT.to_string(), Json::from(artifact.location.clone()));
        if let Some(content_type) = &artifact.content_type {
          record.insert(CONTENT_TYPE.to_string(), Json::from(content_type.clone()));
        }
      }
      JobState::Failure { error } => {
        record.insert(SUCCESS.to_string(), Json::from(false));
        record.insert(ERROR.to_string(), Json::from(error.clone()));
      }
      JobState::Cancelled => {
        record.insert(SUCCESS.to_string(), Json::from(false));
        record.insert(ERROR.to_string(), Json::from(CANCELLED_ERROR));
      }
    }

    Ok(record)
  }

  pub fn from_record(reference_id: &str, record: &Record) -> Result<Self, JobError> {
    let fields = Fields { reference_id, record };

    let access_text = fields.string(ACCESS)?;
    let access: AccessAssertion =
      serde_json::from_str(&access_text).map_err(|e| fields.corrupt(format!("field '{ACCESS}': {e}")))?;

    let completed_at = fields.optional_millis(COMPLETION_DATE)?;
    let state = if completed_at.is_none() {
      JobState::Pending {
        running: fields.optional_bool(RUNNING)?.unwrap_or(false),
      }
    } else if fields.optional_bool(SUCCESS)?.unwrap_or(false) {
      let mut artifact = ArtifactRef::new(fields.string(ARTIFACT)?);
      artifact.content_type = fields.optional_string(CONTENT_TYPE)?;
      JobState::Success { artifact }
    } else {
      match fields.optional_string(ERROR)? {
        Some(error) if error == CANCELLED_ERROR => JobState::Cancelled,
        Some(error) => JobState::Failure { error },
        None => JobState::Failure {
          error: "unknown error".to_string(),
        },
      }
    };

    Ok(Self {
      reference_id: reference_id.to_string(),
      app_id: fields.string(APP_ID)?,
      file_name: fields.string(FILE_NAME)?,
      submitted_at: fields.millis(START_DATE)?,
      completed_at,
      request_count: fields.optional_u64(REQUEST_COUNT)?.unwrap_or(0),
      access,
      state,
    })
  }

  fn corrupt(&self, message: String) -> JobError {
    JobError::CorruptRecord {
      reference_id: self.reference_id.clone(),
      message,
    }
  }
}

/// Typed field access over a raw record.
struct Fields<'a> {
  reference_id: &'a str,
  record: &'a Record,
}

impl Fields<'_> {
  fn corrupt(&self, message: String) -> JobError {
    JobError::CorruptRecord {
      reference_id: self.reference_id.to_string(),
      message,
    }
  }

  fn present(&self, name: &str) -> Option<&Json> {
    self.record.get(name).filter(|v| !v.is_null())
  }

  fn optional_string(&self, name: &str) -> Result<Option<String>, JobError> {
    match self.present(name) {
      None => Ok(None),
      Some(Json::String(s)) => Ok(Some(s.clone())),
      Some(_) => Err(self.corrupt(format!("field '{name}' is not a string"))),
    }
  }

  fn string(&self, name: &str) -> Result<String, JobError> {
    self
      .optional_string(name)?
      .ok_or_else(|| self.corrupt(format!("field '{name}' is missing")))
  }

  fn optional_bool(&self, name: &str) -> Result<Option<bool>, JobError> {
    match self.present(name) {
      None => Ok(None),
      Some(Json::Bool(b)) => Ok(Some(*b)),
      Some(_) => Err(self.corrupt(format!("field '{name}' is not a bool"))),
    }
  }

  fn optional_u64(&self, name: &str) -> Result<Option<u64>, JobError> {
    match self.present(name) {
      None => Ok(None),
      Some(value) => value
        .as_u64()
        .map(Some)
        .ok_or_else(|| self.corrupt(format!("field '{name}' is not a count"))),
    }
  }

  fn optional_millis(&self, name: &str) -> Result<Option<DateTime<Utc>>, JobError> {
    match self.present(name) {
      None => Ok(None),
      Some(value) => value
        .as_i64()
        .and_then(DateTime::from_timestamp_millis)
        .map(Some)
        .ok_or_else(|| self.corrupt(format!("field '{name}' is not a timestamp"))),
    }
  }

  fn millis(&self, name: &str) -> Result<DateTime<Utc>, JobError> {
    self
      .optional_millis(name)?
      .ok_or_else(|| self.corrupt(format!("field '{name}' is missing")))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;
  use serde_json::json;

  fn at(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).unwrap()
  }

  fn pending() -> JobRecord {
    JobRecord::pending(
      "4f1c",
      "city-map",
      "city-map-4f1c",
      AccessAssertion::roles(["planner"]),
      3,
      at(1_717_200_000_000),
    )
  }

  #[test]
  fn test_key_prefix() {
    assert_eq!(JobRecord::key("4f1c"), "resultMetadata_4f1c");
  }

  #[test]
  fn test_pending_record_layout() {
    let record = pending().to_record().unwrap();
    assert_eq!(record["appId"], json!("city-map"));
    assert_eq!(record["fileName"], json!("city-map-4f1c"));
    assert_eq!(record["startDate"], json!(1_717_200_000_000_i64));
    assert_eq!(record["requestCount"], json!(3));
    assert_eq!(record["running"], json!(false));
    assert!(record["access"].is_string());
    assert!(!record.contains_key("completionDate"));
    assert!(cartograph_store::ensure_flat(&record).is_ok());
  }

  #[test]
  fn test_states_survive_record_form() {
    let states = [
      JobState::Pending { running: true },
      JobState::Success {
        artifact: ArtifactRef::new("/srv/prints/4f1c.pdf").with_content_type("application/pdf"),
      },
      JobState::Failure {
        error: "stage 'map' failed: timeout".to_string(),
      },
      JobState::Cancelled,
    ];
    for state in states {
      let record = match &state {
        JobState::Pending { .. } => pending().started(),
        _ => pending().completed(state.clone(), at(1_717_200_004_500)),
      };
      let loaded = JobRecord::from_record("4f1c", &record.to_record().unwrap()).unwrap();
      assert_eq!(loaded, record);
    }
  }

  #[test]
  fn test_cancelled_uses_reserved_error() {
    let record = pending()
      .completed(JobState::Cancelled, at(1_717_200_001_000))
      .to_record()
      .unwrap();
    assert_eq!(record["success"], json!(false));
    assert_eq!(record["error"], json!("cancelled"));
  }

  #[test]
  fn test_elapsed() {
    let record = pending();
    assert_eq!(record.elapsed(at(1_717_200_002_000)).num_milliseconds(), 2000);

    let done = record.completed(JobState::Cancelled, at(1_717_200_000_750));
    assert_eq!(done.elapsed(at(1_717_200_009_000)).num_milliseconds(), 750);
  }

  #[test]
  fn test_missing_field_is_corrupt() {
    let mut record = pending().to_record().unwrap();
    record.remove("appId");
    let err = JobRecord::from_record("4f1c", &record).unwrap_err();
    assert!(matches!(err, JobError::CorruptRecord { message, .. } if message.contains("appId")));
  }
}
