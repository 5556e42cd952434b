//! Cartograph Runtime
//!
//! Executes a [`Pipeline`] against a per-job [`ValuesContext`]. Stages run
//! concurrently as soon as their inputs are available, bounded by the
//! executor's concurrency limit, and the outcome is returned as an
//! [`ExecutionReport`].

mod context;
mod error;
mod events;
mod executor;
mod pipeline;
mod report;
mod stage;

pub use context::{ContextError, ValuesContext, Write};
pub use error::RuntimeError;
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use executor::{Executor, ExecutorConfig};
pub use pipeline::Pipeline;
pub use report::{ExecutionOutcome, ExecutionReport, StageReport, StageState};
pub use stage::{Stage, StageContext, StageError};
