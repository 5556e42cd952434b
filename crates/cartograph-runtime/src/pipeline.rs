use std::fmt;
use std::sync::Arc;

use cartograph_contract::Contract;
use cartograph_workflow::{Graph, StageSpec};

use crate::error::RuntimeError;
use crate::stage::Stage;

/// A validated graph paired with one implementation per stage.
#[derive(Clone)]
pub struct Pipeline {
  graph: Arc<Graph>,
  stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
  /// `stages` must be in the graph's declaration order.
  pub fn new(graph: Arc<Graph>, stages: Vec<Arc<dyn Stage>>) -> Result<Self, RuntimeError> {
    if graph.len() != stages.len() {
      return Err(RuntimeError::StageCountMismatch {
        graph: graph.len(),
        stages: stages.len(),
      });
    }
    Ok(Self { graph, stages })
  }

  /// Build the graph and pipeline in one step.
  pub fn from_stages(attributes: &Contract, stages: Vec<(StageSpec, Arc<dyn Stage>)>) -> Result<Self, RuntimeError> {
    let (specs, implementations): (Vec<_>, Vec<_>) = stages.into_iter().unzip();
    let graph = Graph::build(specs, attributes)?;
    Self::new(Arc::new(graph), implementations)
  }

  pub fn graph(&self) -> &Arc<Graph> {
    &self.graph
  }

  pub fn stage(&self, index: usize) -> &Arc<dyn Stage> {
    &self.stages[index]
  }

  pub fn len(&self) -> usize {
    self.stages.len()
  }

  pub fn is_empty(&self) -> bool {
    self.stages.is_empty()
  }
}

impl fmt::Debug for Pipeline {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Pipeline")
      .field("stages", &self.graph.stages().iter().map(|s| &s.name).collect::<Vec<_>>())
      .finish()
  }
}
