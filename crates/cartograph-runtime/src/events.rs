//! Execution events and notifiers.
//!
//! The executor emits one event per state transition so callers can persist
//! progress or stream it elsewhere without polling the report.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionEvent {
  ExecutionStarted { execution_id: String, stages: usize },

  StageStarted { execution_id: String, stage: String },

  /// `outputs` are the context names the stage wrote.
  StageCompleted {
    execution_id: String,
    stage: String,
    outputs: Vec<String>,
  },

  StageFailed {
    execution_id: String,
    stage: String,
    error: String,
  },

  StageSkipped {
    execution_id: String,
    stage: String,
    reason: String,
  },

  ExecutionCompleted { execution_id: String },

  ExecutionFailed { execution_id: String, error: String },

  ExecutionCancelled { execution_id: String },
}

/// Receives execution events. Called inline by the executor, so
/// implementations must not block.
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// Forwards events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Receiver may have been dropped.
    let _ = self.sender.send(event);
  }
}
