use cartograph_workflow::GraphErrors;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
  #[error(transparent)]
  Graph(#[from] GraphErrors),

  #[error("pipeline has {graph} stages but {stages} implementations")]
  StageCountMismatch { graph: usize, stages: usize },
}
