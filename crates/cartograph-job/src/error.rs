use cartograph_contract::{ContractError, UnknownValueType, Violation};
use cartograph_runtime::RuntimeError;
use cartograph_workflow::GraphErrors;
use thiserror::Error;

/// Errors raised while resolving a template definition.
#[derive(Debug, Error)]
pub enum TemplateError {
  #[error("stage '{stage}' uses unknown stage kind '{kind}'")]
  UnknownStageKind { stage: String, kind: String },

  #[error("slot '{slot}': {source}")]
  UnknownType { slot: String, source: UnknownValueType },

  #[error("slot '{slot}' is declared has_default but carries no default")]
  MissingDefault { slot: String },

  #[error("slot '{slot}' has an invalid default: {source}")]
  InvalidDefault { slot: String, source: Violation },

  #[error("artifact slot '{slot}' is not produced by any stage")]
  UnknownArtifactSlot { slot: String },

  #[error("invalid output file name template: {message}")]
  InvalidFileName { message: String },

  #[error(transparent)]
  Graph(#[from] GraphErrors),

  #[error(transparent)]
  Runtime(#[from] RuntimeError),
}

/// Errors returned by status, cancel and artifact requests.
#[derive(Debug, Error)]
pub enum JobError {
  #[error("no job with reference '{reference_id}'")]
  NoSuchReference { reference_id: String },

  #[error("access denied")]
  AccessDenied,

  #[error("job '{reference_id}' has not finished")]
  NotReady { reference_id: String },

  #[error("job '{reference_id}' failed: {error}")]
  Failed { reference_id: String, error: String },

  #[error("job '{reference_id}' was cancelled")]
  Cancelled { reference_id: String },

  #[error("status record for '{reference_id}' is invalid: {message}")]
  CorruptRecord { reference_id: String, message: String },

  #[error(transparent)]
  Store(#[from] cartograph_store::Error),
}

/// Errors returned synchronously by `submit`.
#[derive(Debug, Error)]
pub enum SubmitError {
  #[error("no template registered for app '{app_id}'")]
  UnknownApp { app_id: String },

  #[error(transparent)]
  Contract(#[from] ContractError),

  #[error("failed to render output file name: {message}")]
  FileName { message: String },

  #[error("reference '{reference_id}' already exists")]
  DuplicateReference { reference_id: String },

  #[error("job manager is shutting down")]
  ShuttingDown,

  #[error(transparent)]
  Job(#[from] JobError),

  #[error(transparent)]
  Store(#[from] cartograph_store::Error),
}
