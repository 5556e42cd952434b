use std::collections::BTreeMap;

use cartograph_contract::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a stage within one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
  Waiting,
  Ready,
  Running,
  Done,
  Failed,
  Skipped,
}

impl StageState {
  pub fn is_terminal(self) -> bool {
    matches!(self, StageState::Done | StageState::Failed | StageState::Skipped)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
  pub stage: String,
  pub state: StageState,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub started_at: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub finished_at: Option<DateTime<Utc>>,
  /// Failure message, or the reason a stage was skipped.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl StageReport {
  pub(crate) fn waiting(stage: impl Into<String>) -> Self {
    Self {
      stage: stage.into(),
      state: StageState::Waiting,
      started_at: None,
      finished_at: None,
      error: None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
  Completed,
  Failed,
  Cancelled,
}

/// Everything known about a finished execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
  pub execution_id: String,
  pub outcome: ExecutionOutcome,
  /// Final contents of the values context.
  pub values: BTreeMap<String, Value>,
  /// One entry per stage, in declaration order.
  pub stages: Vec<StageReport>,
}

impl ExecutionReport {
  pub fn is_success(&self) -> bool {
    self.outcome == ExecutionOutcome::Completed
  }

  pub fn stage(&self, name: &str) -> Option<&StageReport> {
    self.stages.iter().find(|s| s.stage == name)
  }

  pub fn stages_in(&self, state: StageState) -> Vec<&str> {
    self
      .stages
      .iter()
      .filter(|s| s.state == state)
      .map(|s| s.stage.as_str())
      .collect()
  }

  /// Human-readable reason the execution did not complete. Failed stages
  /// and skipped stages are listed for cancelled runs as well.
  pub fn failure_summary(&self) -> Option<String> {
    let detail = self.stage_detail();
    match self.outcome {
      ExecutionOutcome::Completed => None,
      ExecutionOutcome::Cancelled if detail.is_empty() => Some("execution cancelled".to_string()),
      ExecutionOutcome::Cancelled => Some(format!("execution cancelled: {detail}")),
      ExecutionOutcome::Failed => Some(detail),
    }
  }

  fn stage_detail(&self) -> String {
    let failures: Vec<String> = self
      .stages
      .iter()
      .filter(|s| s.state == StageState::Failed)
      .map(|s| format!("stage '{}' failed: {}", s.stage, s.error.as_deref().unwrap_or("unknown error")))
      .collect();
    let mut detail = failures.join("; ");
    let skipped = self.stages_in(StageState::Skipped);
    if !skipped.is_empty() {
      if !detail.is_empty() {
        detail.push(' ');
      }
      detail.push_str(&format!("(skipped: {})", skipped.join(", ")));
    }
    detail
  }
}
