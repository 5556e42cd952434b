//! Concurrent pipeline executor.
//!
//! A stage is dispatched once every predecessor is done. Dispatched stages
//! run as tokio tasks, bounded by a semaphore shared by all executions of
//! one [`Executor`]. A failed stage marks its transitive dependents skipped
//! while unrelated branches continue. Cancellation stops new dispatch; stages
//! already running are left to finish and their outputs are kept.

use std::any::Any;
use std::collections::{BTreeMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use cartograph_contract::{SlotKind, Value};
use cartograph_workflow::StageSpec;
use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::context::{ValuesContext, Write};
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::pipeline::Pipeline;
use crate::report::{ExecutionOutcome, ExecutionReport, StageReport, StageState};
use crate::stage::{Stage, StageContext, StageError};

/// Configuration for the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
  /// Upper bound on stages running at once, across all executions.
  pub max_concurrency: usize,
}

impl Default for ExecutorConfig {
  fn default() -> Self {
    Self {
      max_concurrency: std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4),
    }
  }
}

pub struct Executor {
  config: ExecutorConfig,
  permits: Arc<Semaphore>,
  notifier: Arc<dyn ExecutionNotifier>,
}

type StageOutcome = (usize, Result<Vec<String>, StageError>);

impl Executor {
  /// Create an executor that discards execution events.
  pub fn new(config: ExecutorConfig) -> Self {
    Self::with_notifier(config, Arc::new(NoopNotifier))
  }

  pub fn with_notifier(config: ExecutorConfig, notifier: Arc<dyn ExecutionNotifier>) -> Self {
    Self {
      permits: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
      config,
      notifier,
    }
  }

  pub fn config(&self) -> &ExecutorConfig {
    &self.config
  }

  /// Run a pipeline to completion, failure, or cancellation.
  ///
  /// `seed` holds the bound top-level attributes. The report always
  /// contains one entry per stage and the final values context.
  pub async fn execute(
    &self,
    pipeline: &Pipeline,
    seed: BTreeMap<String, Value>,
    cancel: CancellationToken,
  ) -> ExecutionReport {
    let execution_id = Uuid::new_v4().to_string();
    self.execute_with_id(execution_id, pipeline, seed, cancel).await
  }

  #[instrument(
    name = "pipeline_execute",
    skip_all,
    fields(execution_id = %execution_id, stages = pipeline.len())
  )]
  pub async fn execute_with_id(
    &self,
    execution_id: String,
    pipeline: &Pipeline,
    seed: BTreeMap<String, Value>,
    cancel: CancellationToken,
  ) -> ExecutionReport {
    let mut run = Run::new(execution_id, pipeline, seed, self.notifier.clone());

    info!(execution_id = %run.execution_id, stages = pipeline.len(), "execution_started");
    run.notifier.notify(ExecutionEvent::ExecutionStarted {
      execution_id: run.execution_id.clone(),
      stages: pipeline.len(),
    });

    let mut in_flight: JoinSet<StageOutcome> = JoinSet::new();
    let mut cancelled = false;

    loop {
      if !cancelled && cancel.is_cancelled() {
        cancelled = true;
        warn!(
          execution_id = %run.execution_id,
          in_flight = in_flight.len(),
          "execution cancelled, no further stages will start"
        );
      }

      if !cancelled {
        while !run.ready.is_empty() {
          let Ok(permit) = self.permits.clone().try_acquire_owned() else {
            break;
          };
          if let Some(next) = run.ready.pop_front() {
            run.dispatch(next, permit, &mut in_flight, &cancel);
          }
        }
      }

      if in_flight.is_empty() {
        if cancelled || run.ready.is_empty() {
          break;
        }
        // Every permit is held by other executions.
        tokio::select! {
          permit = self.permits.clone().acquire_owned() => match permit {
            Ok(permit) => {
              if let Some(next) = run.ready.pop_front() {
                run.dispatch(next, permit, &mut in_flight, &cancel);
              }
            }
            Err(e) => {
              error!(execution_id = %run.execution_id, error = %e, "stage permits unavailable");
              break;
            }
          },
          _ = cancel.cancelled() => {}
        }
        continue;
      }

      tokio::select! {
        joined = in_flight.join_next() => match joined {
          Some(Ok((index, result))) => run.finish(index, result),
          Some(Err(e)) => error!(execution_id = %run.execution_id, error = %e, "stage task aborted"),
          None => {}
        },
        _ = cancel.cancelled(), if !cancelled => {}
      }
    }

    // a signal that lands while the last stage runs still cancels the run
    run.into_report(cancelled || cancel.is_cancelled())
  }
}

/// Mutable state of one execution.
struct Run<'a> {
  execution_id: String,
  pipeline: &'a Pipeline,
  context: Arc<ValuesContext>,
  notifier: Arc<dyn ExecutionNotifier>,
  reports: Vec<StageReport>,
  /// Predecessors not yet done, per stage.
  remaining: Vec<usize>,
  ready: VecDeque<usize>,
}

impl<'a> Run<'a> {
  fn new(
    execution_id: String,
    pipeline: &'a Pipeline,
    seed: BTreeMap<String, Value>,
    notifier: Arc<dyn ExecutionNotifier>,
  ) -> Self {
    let graph = pipeline.graph();
    let mut run = Self {
      execution_id,
      pipeline,
      context: Arc::new(ValuesContext::with_seed(seed)),
      notifier,
      reports: graph.stages().iter().map(|s| StageReport::waiting(&s.name)).collect(),
      remaining: (0..graph.len()).map(|i| graph.predecessors(i).len()).collect(),
      ready: VecDeque::new(),
    };
    for root in graph.roots() {
      run.mark_ready(root);
    }
    run
  }

  fn mark_ready(&mut self, index: usize) {
    self.reports[index].state = StageState::Ready;
    self.ready.push_back(index);
  }

  fn dispatch(
    &mut self,
    index: usize,
    permit: OwnedSemaphorePermit,
    in_flight: &mut JoinSet<StageOutcome>,
    cancel: &CancellationToken,
  ) {
    let spec = self.pipeline.graph().stage(index).clone();
    let stage = self.pipeline.stage(index).clone();
    let context = self.context.clone();
    let execution_id = self.execution_id.clone();
    let cancel = cancel.clone();

    let report = &mut self.reports[index];
    report.state = StageState::Running;
    report.started_at = Some(Utc::now());

    info!(execution_id = %self.execution_id, stage = %spec.name, "stage_started");
    self.notifier.notify(ExecutionEvent::StageStarted {
      execution_id: self.execution_id.clone(),
      stage: spec.name.clone(),
    });

    in_flight.spawn(async move {
      let _permit = permit;
      let result = AssertUnwindSafe(run_stage(stage, spec, context, execution_id, cancel))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
          Err(StageError::Panicked {
            message: panic_message(panic.as_ref()),
          })
        });
      (index, result)
    });
  }

  fn finish(&mut self, index: usize, result: Result<Vec<String>, StageError>) {
    let name = self.reports[index].stage.clone();
    self.reports[index].finished_at = Some(Utc::now());

    match result {
      Ok(outputs) => {
        self.reports[index].state = StageState::Done;
        info!(execution_id = %self.execution_id, stage = %name, outputs = ?outputs, "stage_completed");
        self.notifier.notify(ExecutionEvent::StageCompleted {
          execution_id: self.execution_id.clone(),
          stage: name,
          outputs,
        });

        let graph = self.pipeline.graph().clone();
        for &dependent in graph.dependents(index) {
          if self.reports[dependent].state != StageState::Waiting {
            continue;
          }
          self.remaining[dependent] -= 1;
          if self.remaining[dependent] == 0 {
            self.mark_ready(dependent);
          }
        }
      }
      Err(e) => {
        let message = e.to_string();
        self.reports[index].state = StageState::Failed;
        self.reports[index].error = Some(message.clone());
        error!(execution_id = %self.execution_id, stage = %name, error = %message, "stage_failed");
        self.notifier.notify(ExecutionEvent::StageFailed {
          execution_id: self.execution_id.clone(),
          stage: name.clone(),
          error: message,
        });

        let reason = format!("upstream stage '{name}' failed");
        for dependent in self.pipeline.graph().transitive_dependents(index) {
          if matches!(self.reports[dependent].state, StageState::Waiting | StageState::Ready) {
            self.ready.retain(|&i| i != dependent);
            self.skip(dependent, &reason);
          }
        }
      }
    }
  }

  fn skip(&mut self, index: usize, reason: &str) {
    let report = &mut self.reports[index];
    report.state = StageState::Skipped;
    report.error = Some(reason.to_string());
    info!(execution_id = %self.execution_id, stage = %report.stage, reason, "stage_skipped");
    self.notifier.notify(ExecutionEvent::StageSkipped {
      execution_id: self.execution_id.clone(),
      stage: report.stage.clone(),
      reason: reason.to_string(),
    });
  }

  fn into_report(mut self, cancelled: bool) -> ExecutionReport {
    let reason = if cancelled { "execution cancelled" } else { "not reached" };
    for index in 0..self.reports.len() {
      match self.reports[index].state {
        StageState::Waiting | StageState::Ready => self.skip(index, reason),
        StageState::Running => {
          let report = &mut self.reports[index];
          report.state = StageState::Failed;
          report.error = Some("stage task was lost".to_string());
        }
        _ => {}
      }
    }

    let all_done = self.reports.iter().all(|r| r.state == StageState::Done);
    let outcome = if cancelled {
      ExecutionOutcome::Cancelled
    } else if all_done {
      ExecutionOutcome::Completed
    } else {
      ExecutionOutcome::Failed
    };

    let report = ExecutionReport {
      execution_id: self.execution_id.clone(),
      outcome,
      values: self.context.snapshot(),
      stages: self.reports,
    };

    match outcome {
      ExecutionOutcome::Completed => {
        info!(execution_id = %report.execution_id, "execution_completed");
        self.notifier.notify(ExecutionEvent::ExecutionCompleted {
          execution_id: report.execution_id.clone(),
        });
      }
      ExecutionOutcome::Cancelled => {
        let summary = report.failure_summary().unwrap_or_default();
        warn!(execution_id = %report.execution_id, detail = %summary, "execution_cancelled");
        self.notifier.notify(ExecutionEvent::ExecutionCancelled {
          execution_id: report.execution_id.clone(),
        });
      }
      ExecutionOutcome::Failed => {
        let summary = report.failure_summary().unwrap_or_default();
        error!(execution_id = %report.execution_id, error = %summary, "execution_failed");
        self.notifier.notify(ExecutionEvent::ExecutionFailed {
          execution_id: report.execution_id.clone(),
          error: summary,
        });
      }
    }

    report
  }
}

/// Bind a stage's inputs, run it, and commit its outputs.
/// Returns the context names written.
async fn run_stage(
  stage: Arc<dyn Stage>,
  spec: StageSpec,
  context: Arc<ValuesContext>,
  execution_id: String,
  cancel: CancellationToken,
) -> Result<Vec<String>, StageError> {
  let mut supplied = BTreeMap::new();
  for slot in spec.inputs.slots() {
    if let Ok(value) = context.get(spec.input_name(&slot.name)) {
      supplied.insert(slot.name.clone(), value);
    }
  }
  let inputs = spec.inputs.bind_values(supplied).into_result()?;

  let mut ctx = StageContext::new(execution_id, spec, inputs);
  stage.run(&mut ctx, cancel).await?;
  let (spec, mut outputs) = ctx.into_outputs();

  for slot in spec.outputs.slots() {
    if outputs.contains_key(&slot.name) {
      continue;
    }
    match &slot.kind {
      SlotKind::HasDefault(default) => {
        outputs.insert(slot.name.clone(), default.clone());
      }
      _ if slot.is_required() => {
        return Err(StageError::MissingOutput {
          name: slot.name.clone(),
        });
      }
      _ => {}
    }
  }

  let writes = outputs
    .into_iter()
    .map(|(slot, value)| Write {
      name: spec.output_name(&slot).to_string(),
      internal: spec.outputs.get(&slot).is_some_and(|s| s.is_internal()),
      value,
    })
    .collect();

  Ok(context.commit(writes)?)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
  if let Some(message) = panic.downcast_ref::<&str>() {
    message.to_string()
  } else if let Some(message) = panic.downcast_ref::<String>() {
    message.clone()
  } else {
    "unknown panic".to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use cartograph_contract::{Contract, Slot, ValueType};

  struct Constant(&'static str, Value);

  #[async_trait]
  impl Stage for Constant {
    async fn run(&self, ctx: &mut StageContext, _cancel: CancellationToken) -> Result<(), StageError> {
      ctx.set_output(self.0, self.1.clone())
    }
  }

  struct Silent;

  #[async_trait]
  impl Stage for Silent {
    async fn run(&self, _ctx: &mut StageContext, _cancel: CancellationToken) -> Result<(), StageError> {
      Ok(())
    }
  }

  struct Panics;

  #[async_trait]
  impl Stage for Panics {
    async fn run(&self, _ctx: &mut StageContext, _cancel: CancellationToken) -> Result<(), StageError> {
      panic!("renderer crashed")
    }
  }

  fn single(spec: StageSpec, stage: Arc<dyn Stage>) -> Pipeline {
    Pipeline::from_stages(&Contract::new(), vec![(spec, stage)]).unwrap()
  }

  #[tokio::test]
  async fn test_empty_pipeline_completes() {
    let pipeline = Pipeline::from_stages(&Contract::new(), Vec::new()).unwrap();
    let report = Executor::new(ExecutorConfig::default())
      .execute(&pipeline, BTreeMap::new(), CancellationToken::new())
      .await;
    assert_eq!(report.outcome, ExecutionOutcome::Completed);
    assert!(report.stages.is_empty());
  }

  #[tokio::test]
  async fn test_default_output_is_filled() {
    let spec = StageSpec::new("scale").with_outputs(Contract::from_slots([Slot::with_default(
      "scale",
      ValueType::Number,
      25000.0,
    )]));
    let report = Executor::new(ExecutorConfig::default())
      .execute(&single(spec, Arc::new(Silent)), BTreeMap::new(), CancellationToken::new())
      .await;
    assert!(report.is_success());
    assert_eq!(report.values["scale"], Value::Number(25000.0));
  }

  #[tokio::test]
  async fn test_missing_required_output_fails_stage() {
    let spec = StageSpec::new("map").with_outputs(Contract::from_slots([Slot::required("image", ValueType::Any)]));
    let report = Executor::new(ExecutorConfig::default())
      .execute(&single(spec, Arc::new(Silent)), BTreeMap::new(), CancellationToken::new())
      .await;
    assert_eq!(report.outcome, ExecutionOutcome::Failed);
    assert_eq!(report.stages[0].state, StageState::Failed);
    assert_eq!(
      report.stages[0].error.as_deref(),
      Some("required output 'image' was not produced")
    );
  }

  #[tokio::test]
  async fn test_panic_becomes_stage_failure() {
    let spec = StageSpec::new("map");
    let report = Executor::new(ExecutorConfig::default())
      .execute(&single(spec, Arc::new(Panics)), BTreeMap::new(), CancellationToken::new())
      .await;
    assert_eq!(report.outcome, ExecutionOutcome::Failed);
    assert_eq!(
      report.stages[0].error.as_deref(),
      Some("stage panicked: renderer crashed")
    );
  }

  #[tokio::test]
  async fn test_internal_output_is_renamed_when_seeded() {
    let spec = StageSpec::new("map").with_outputs(Contract::from_slots([Slot::internal("timing", ValueType::Any)]));
    let mut seed = BTreeMap::new();
    seed.insert("timing".to_string(), Value::Integer(1));

    let report = Executor::new(ExecutorConfig::default())
      .execute(
        &single(spec, Arc::new(Constant("timing", Value::Integer(2)))),
        seed,
        CancellationToken::new(),
      )
      .await;

    assert!(report.is_success());
    assert_eq!(report.values["timing"], Value::Integer(1));
    assert_eq!(report.values.len(), 2);
  }
}
