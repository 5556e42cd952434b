//! Print job lifecycle.
//!
//! `submit` binds the request, writes a pending record and returns a
//! reference id right away. The pipeline runs on a background task that
//! flips the record to running, executes the pipeline and writes exactly one
//! terminal state. Every registry transition after creation is a
//! compare-and-put, so a cancel racing with completion leaves whichever
//! terminal state landed first.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use cartograph_config::TemplateDef;
use cartograph_contract::{ArtifactRef, ExtraParameterPolicy, Value};
use cartograph_runtime::{ExecutionOutcome, ExecutionReport, Executor};
use cartograph_store::Registry;
use cartograph_workflow::GraphCache;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};
use uuid::Uuid;

use crate::access::{AccessAssertion, AccessControl, Capability, RoleAccessControl};
use crate::error::{JobError, SubmitError, TemplateError};
use crate::filename::render_file_name;
use crate::record::{JobRecord, JobState};
use crate::template::{StageCatalog, Template};

/// Attempts at writing a job's terminal state before giving up.
const COMPLETE_ATTEMPTS: u32 = 3;
const COMPLETE_BACKOFF: Duration = Duration::from_millis(50);

/// Service-wide job settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
  /// Deadline for templates that do not set their own.
  pub default_timeout_ms: Option<u64>,
  /// When false, unknown request parameters are only warned about, even
  /// for strict templates.
  pub strict_parameters: bool,
}

impl Default for JobConfig {
  fn default() -> Self {
    Self {
      default_timeout_ms: None,
      strict_parameters: true,
    }
  }
}

/// What a caller sees when polling a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatus {
  pub reference_id: String,
  pub app_id: String,
  #[serde(flatten)]
  pub state: JobState,
  pub submitted_at: DateTime<Utc>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub completed_at: Option<DateTime<Utc>>,
  pub request_count: u64,
  pub file_name: String,
  /// Time since submission, or total run time once terminal.
  pub elapsed: Duration,
}

impl JobStatus {
  pub fn from_record(record: &JobRecord, now: DateTime<Utc>) -> Self {
    Self {
      reference_id: record.reference_id.clone(),
      app_id: record.app_id.clone(),
      state: record.state.clone(),
      submitted_at: record.submitted_at,
      completed_at: record.completed_at,
      request_count: record.request_count,
      file_name: record.file_name.clone(),
      elapsed: record.elapsed(now).to_std().unwrap_or_default(),
    }
  }

  pub fn is_terminal(&self) -> bool {
    self.state.is_terminal()
  }
}

struct RunningJob {
  cancel: CancellationToken,
  done: watch::Receiver<bool>,
}

struct Inner {
  registry: Arc<dyn Registry>,
  executor: Arc<Executor>,
  access: Arc<dyn AccessControl>,
  templates: RwLock<HashMap<String, Arc<Template>>>,
  graphs: GraphCache,
  jobs: Mutex<HashMap<String, RunningJob>>,
  shutdown: CancellationToken,
  config: JobConfig,
}

/// Accepts print jobs for registered templates and tracks them to completion.
#[derive(Clone)]
pub struct JobManager {
  inner: Arc<Inner>,
}

impl JobManager {
  /// Create a manager that checks access with [`RoleAccessControl`].
  pub fn new(registry: Arc<dyn Registry>, executor: Arc<Executor>, config: JobConfig) -> Self {
    Self::with_access_control(registry, executor, Arc::new(RoleAccessControl), config)
  }

  pub fn with_access_control(
    registry: Arc<dyn Registry>,
    executor: Arc<Executor>,
    access: Arc<dyn AccessControl>,
    config: JobConfig,
  ) -> Self {
    Self {
      inner: Arc::new(Inner {
        registry,
        executor,
        access,
        templates: RwLock::new(HashMap::new()),
        graphs: GraphCache::new(),
        jobs: Mutex::new(HashMap::new()),
        shutdown: CancellationToken::new(),
        config,
      }),
    }
  }

  pub fn config(&self) -> &JobConfig {
    &self.inner.config
  }

  /// Resolve a template and make it available under its app id, replacing
  /// any template registered before. Jobs already running keep the
  /// template they were submitted with.
  pub fn register_template(&self, def: &TemplateDef, catalog: &StageCatalog) -> Result<(), TemplateError> {
    let template = Template::resolve(def, catalog, &self.inner.graphs)?;
    info!(app_id = %def.app_id, stages = def.stages.len(), "template_registered");
    self
      .inner
      .templates
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(def.app_id.clone(), Arc::new(template));
    Ok(())
  }

  pub fn app_ids(&self) -> Vec<String> {
    let templates = self.inner.templates.read().unwrap_or_else(PoisonError::into_inner);
    let mut ids: Vec<String> = templates.keys().cloned().collect();
    ids.sort();
    ids
  }

  fn template(&self, app_id: &str) -> Option<Arc<Template>> {
    self
      .inner
      .templates
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(app_id)
      .cloned()
  }

  /// Submit a print job.
  ///
  /// Binding problems are returned here, all at once, and no record is
  /// written. On success the job runs in the background and the returned
  /// reference id can be polled. `access` is combined with the template's
  /// own access roles.
  #[instrument(name = "job_submit", skip_all, fields(app_id = %app_id))]
  pub async fn submit(
    &self,
    app_id: &str,
    request: &serde_json::Map<String, serde_json::Value>,
    access: AccessAssertion,
  ) -> Result<String, SubmitError> {
    if self.inner.shutdown.is_cancelled() {
      return Err(SubmitError::ShuttingDown);
    }

    let template = self.template(app_id).ok_or_else(|| SubmitError::UnknownApp {
      app_id: app_id.to_string(),
    })?;

    let policy = if self.inner.config.strict_parameters {
      template.extra_parameters()
    } else {
      ExtraParameterPolicy::Warn
    };
    let seed = template.attributes().bind(request, policy).into_result()?;

    let reference_id = Uuid::new_v4().to_string();
    let submitted_at = Utc::now();
    let file_name = render_file_name(template.file_name(), app_id, &reference_id, submitted_at)
      .map_err(|message| SubmitError::FileName { message })?;

    let record = JobRecord::pending(
      &reference_id,
      app_id,
      file_name,
      template.access().clone().and(access),
      request.len() as u64,
      submitted_at,
    );
    let key = JobRecord::key(&reference_id);
    if !self.inner.registry.put_if_absent(&key, record.to_record()?).await? {
      return Err(SubmitError::DuplicateReference { reference_id });
    }

    let cancel = self.inner.shutdown.child_token();
    let (done_tx, done_rx) = watch::channel(false);
    self
      .inner
      .jobs
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(
        reference_id.clone(),
        RunningJob {
          cancel: cancel.clone(),
          done: done_rx,
        },
      );

    if let Some(timeout_ms) = template.timeout_ms().or(self.inner.config.default_timeout_ms) {
      spawn_deadline(reference_id.clone(), timeout_ms, cancel.clone());
    }

    let inner = self.inner.clone();
    let span = info_span!("job_run", reference_id = %reference_id, app_id = %app_id);
    tokio::spawn(
      async move {
        let reference_id = record.reference_id.clone();
        if let Err(e) = inner.run_job(&template, record, seed, &cancel).await {
          error!(reference_id = %reference_id, error = %e, "job_record_failed");
        }
        inner
          .jobs
          .lock()
          .unwrap_or_else(PoisonError::into_inner)
          .remove(&reference_id);
        // releases the deadline timer
        cancel.cancel();
        let _ = done_tx.send(true);
      }
      .instrument(span),
    );

    info!(reference_id = %reference_id, app_id = %app_id, "job_submitted");
    Ok(reference_id)
  }

  /// Current status of a job.
  pub async fn poll_status(&self, reference_id: &str, capability: &Capability) -> Result<JobStatus, JobError> {
    let record = self.authorized(reference_id, capability).await?;
    Ok(JobStatus::from_record(&record, Utc::now()))
  }

  /// Cancel a job that has not reached a terminal state.
  ///
  /// The record is marked cancelled immediately. Stages already running
  /// are left to finish but their result is discarded. Cancelling a
  /// terminal job succeeds without changing it.
  #[instrument(name = "job_cancel", skip_all, fields(reference_id = %reference_id))]
  pub async fn cancel(&self, reference_id: &str, capability: &Capability) -> Result<(), JobError> {
    let record = self.authorized(reference_id, capability).await?;
    if record.is_terminal() {
      debug!(reference_id = %reference_id, state = record.state.as_str(), "job_cancel_ignored");
      return Ok(());
    }

    let token = self
      .inner
      .jobs
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .get(reference_id)
      .map(|job| job.cancel.clone());
    if let Some(token) = token {
      token.cancel();
    }

    if self.inner.complete(reference_id, JobState::Cancelled).await? {
      info!(reference_id = %reference_id, "job_cancelled");
    }
    Ok(())
  }

  /// Location of the artifact produced by a successful job.
  pub async fn artifact(&self, reference_id: &str, capability: &Capability) -> Result<ArtifactRef, JobError> {
    let record = self.authorized(reference_id, capability).await?;
    match record.state {
      JobState::Success { artifact } => Ok(artifact),
      JobState::Pending { .. } => Err(JobError::NotReady {
        reference_id: reference_id.to_string(),
      }),
      JobState::Failure { error } => Err(JobError::Failed {
        reference_id: reference_id.to_string(),
        error,
      }),
      JobState::Cancelled => Err(JobError::Cancelled {
        reference_id: reference_id.to_string(),
      }),
    }
  }

  /// Wait for the background task of a job submitted through this manager,
  /// then return its status. Jobs unknown to this manager are loaded as-is.
  pub async fn wait(&self, reference_id: &str) -> Result<JobStatus, JobError> {
    let done = self
      .inner
      .jobs
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .get(reference_id)
      .map(|job| job.done.clone());
    if let Some(mut done) = done {
      let _ = done.wait_for(|finished| *finished).await;
    }

    let record = self.inner.load(reference_id).await?;
    Ok(JobStatus::from_record(&record, Utc::now()))
  }

  /// Refuse new jobs, cancel every running one and wait for their tasks.
  pub async fn shutdown(&self) {
    self.inner.shutdown.cancel();
    let pending: Vec<watch::Receiver<bool>> = self
      .inner
      .jobs
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .values()
      .map(|job| job.done.clone())
      .collect();

    info!(jobs = pending.len(), "job_manager_shutdown");
    join_all(pending.into_iter().map(|mut done| async move {
      let _ = done.wait_for(|finished| *finished).await;
    }))
    .await;
  }

  async fn authorized(&self, reference_id: &str, capability: &Capability) -> Result<JobRecord, JobError> {
    let record = self.inner.load(reference_id).await?;
    if !self.inner.access.check(&record.access, capability) {
      warn!(reference_id = %reference_id, "job_access_denied");
      return Err(JobError::AccessDenied);
    }
    Ok(record)
  }
}

impl std::fmt::Debug for JobManager {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("JobManager")
      .field("app_ids", &self.app_ids())
      .field("config", &self.inner.config)
      .finish()
  }
}

fn spawn_deadline(reference_id: String, timeout_ms: u64, cancel: CancellationToken) {
  tokio::spawn(async move {
    tokio::select! {
      _ = cancel.cancelled() => {}
      _ = tokio::time::sleep(Duration::from_millis(timeout_ms)) => {
        warn!(reference_id = %reference_id, timeout_ms, "job_deadline_exceeded");
        cancel.cancel();
      }
    }
  });
}

impl Inner {
  async fn load(&self, reference_id: &str) -> Result<JobRecord, JobError> {
    let raw = self
      .registry
      .get(&JobRecord::key(reference_id))
      .await?
      .ok_or_else(|| JobError::NoSuchReference {
        reference_id: reference_id.to_string(),
      })?;
    JobRecord::from_record(reference_id, &raw)
  }

  async fn run_job(
    &self,
    template: &Template,
    record: JobRecord,
    seed: BTreeMap<String, Value>,
    cancel: &CancellationToken,
  ) -> Result<(), JobError> {
    let reference_id = record.reference_id.clone();

    let state = if cancel.is_cancelled() {
      JobState::Cancelled
    } else {
      let key = JobRecord::key(&reference_id);
      let pending = record.to_record()?;
      let running = record.started().to_record()?;
      if !self.registry.compare_and_put(&key, &pending, running).await? {
        debug!(reference_id = %reference_id, "job_start_skipped");
        return Ok(());
      }

      let report = self.executor.execute(template.pipeline(), seed, cancel.clone()).await;
      terminal_state(template, &report)
    };

    if let Err(e) = self.complete_with_retry(&reference_id, &state).await {
      if !matches!(state, JobState::Failure { .. }) {
        let fallback = JobState::Failure {
          error: format!("could not record job result: {e}"),
        };
        if let Err(fallback_error) = self.complete(&reference_id, fallback).await {
          error!(reference_id = %reference_id, error = %fallback_error, "job_failure_record_failed");
        }
      }
      return Err(e);
    }
    Ok(())
  }

  /// [`Inner::complete`], retried on registry errors.
  async fn complete_with_retry(&self, reference_id: &str, state: &JobState) -> Result<bool, JobError> {
    let mut attempt = 1;
    loop {
      match self.complete(reference_id, state.clone()).await {
        Err(JobError::Store(e)) if attempt < COMPLETE_ATTEMPTS => {
          warn!(reference_id = %reference_id, attempt, error = %e, "job_complete_retry");
          tokio::time::sleep(COMPLETE_BACKOFF * attempt).await;
          attempt += 1;
        }
        result => return result,
      }
    }
  }

  /// Write a terminal state unless one is already recorded. Returns
  /// whether this call wrote it.
  async fn complete(&self, reference_id: &str, state: JobState) -> Result<bool, JobError> {
    let key = JobRecord::key(reference_id);
    loop {
      let raw = self
        .registry
        .get(&key)
        .await?
        .ok_or_else(|| JobError::NoSuchReference {
          reference_id: reference_id.to_string(),
        })?;
      let current = JobRecord::from_record(reference_id, &raw)?;
      if current.is_terminal() {
        debug!(
          reference_id = %reference_id,
          recorded = current.state.as_str(),
          dropped = state.as_str(),
          "job_already_terminal"
        );
        return Ok(false);
      }

      let done = current.completed(state.clone(), Utc::now());
      if self.registry.compare_and_put(&key, &raw, done.to_record()?).await? {
        info!(reference_id = %reference_id, state = state.as_str(), "job_completed");
        return Ok(true);
      }
    }
  }
}

fn terminal_state(template: &Template, report: &ExecutionReport) -> JobState {
  match report.outcome {
    ExecutionOutcome::Completed => match report.values.get(template.artifact_slot()) {
      Some(Value::Artifact(artifact)) => JobState::Success {
        artifact: artifact.clone(),
      },
      Some(Value::String(location)) => JobState::Success {
        artifact: ArtifactRef::new(location.clone()),
      },
      _ => JobState::Failure {
        error: format!("artifact '{}' was not produced", template.artifact_slot()),
      },
    },
    ExecutionOutcome::Failed => JobState::Failure {
      error: report
        .failure_summary()
        .unwrap_or_else(|| "execution failed".to_string()),
    },
    ExecutionOutcome::Cancelled => JobState::Cancelled,
  }
}
