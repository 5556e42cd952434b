use std::collections::{BTreeMap, BTreeSet, VecDeque};

use cartograph_contract::{Contract, Slot, SlotKind};
use tracing::debug;

use crate::error::{GraphError, GraphErrors};
use crate::spec::{StageSpec, suffixed_name};

/// Validated dependency graph over a set of stages.
///
/// Stages are addressed by their declaration index. Every list returned by
/// the graph is sorted by that index so iteration order is deterministic.
#[derive(Debug, Clone)]
pub struct Graph {
  stages: Vec<StageSpec>,
  attributes: Contract,
  /// stage -> stages it depends on.
  predecessors: Vec<Vec<usize>>,
  /// stage -> stages that depend on it.
  dependents: Vec<Vec<usize>>,
  /// context name -> producing stage.
  producers: BTreeMap<String, usize>,
  order: Vec<usize>,
}

impl Graph {
  /// Derive edges from the stages' declared inputs and outputs.
  ///
  /// Unmapped internal outputs that collide with any other name are renamed
  /// with a random suffix; the rename is recorded in the stored stage's
  /// output mapping.
  pub fn build(stages: Vec<StageSpec>, attributes: &Contract) -> Result<Self, GraphErrors> {
    let mut stages = stages;
    let mut errors = Vec::new();

    let mut seen = BTreeSet::new();
    for stage in &stages {
      if !seen.insert(stage.name.as_str()) {
        errors.push(GraphError::DuplicateStage {
          stage: stage.name.clone(),
        });
      }
    }

    for stage in &stages {
      let unknown_inputs = stage.input_mapping.keys().filter(|slot| !stage.inputs.contains(slot));
      let unknown_outputs = stage.output_mapping.keys().filter(|slot| !stage.outputs.contains(slot));
      for slot in unknown_inputs.chain(unknown_outputs) {
        errors.push(GraphError::UnknownMapping {
          stage: stage.name.clone(),
          slot: slot.clone(),
        });
      }
    }

    let producers = index_producers(&stages, attributes, &mut errors);
    rename_internal_outputs(&mut stages, &producers, attributes);

    let n = stages.len();
    let mut predecessors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
    for (i, stage) in stages.iter().enumerate() {
      // group -> (member context names, satisfied)
      let mut groups: BTreeMap<&str, (Vec<String>, bool)> = BTreeMap::new();

      for slot in stage.inputs.slots() {
        // Internal inputs never order stages. They see whatever the context
        // holds when the stage starts.
        if slot.is_internal() {
          continue;
        }
        let name = stage.input_name(&slot.name);
        let provided = if let Some(&producer) = producers.get(name) {
          if producer == i {
            errors.push(GraphError::Cycle {
              stages: vec![stage.name.clone(), stage.name.clone()],
            });
          } else {
            predecessors[i].insert(producer);
          }
          if let Some(produced) = output_slot(&stages[producer], name) {
            check_types(name, &stages[producer].name, produced, stage, slot, &mut errors);
          }
          true
        } else if let Some(attribute) = attributes.get(name) {
          check_types(name, "attributes", attribute, stage, slot, &mut errors);
          true
        } else {
          false
        };

        if let Some(group) = &slot.one_of {
          let entry = groups.entry(group.as_str()).or_default();
          entry.0.push(name.to_string());
          entry.1 |= provided;
        } else if !provided && matches!(slot.kind, SlotKind::Required) {
          errors.push(GraphError::UnsatisfiableInput {
            stage: stage.name.clone(),
            name: name.to_string(),
          });
        }
      }

      for (group, (members, provided)) in groups {
        if !provided {
          errors.push(GraphError::UnsatisfiableGroup {
            stage: stage.name.clone(),
            group: group.to_string(),
            members,
          });
        }
      }
    }

    let predecessors: Vec<Vec<usize>> = predecessors
      .into_iter()
      .map(|set| set.into_iter().collect())
      .collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, preds) in predecessors.iter().enumerate() {
      for &p in preds {
        dependents[p].push(i);
      }
    }

    // Kahn's algorithm, always taking the lowest declaration index first.
    let mut remaining: Vec<usize> = predecessors.iter().map(Vec::len).collect();
    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| remaining[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(i) = ready.pop_first() {
      order.push(i);
      for &d in &dependents[i] {
        remaining[d] -= 1;
        if remaining[d] == 0 {
          ready.insert(d);
        }
      }
    }

    if order.len() < n {
      let blocked: Vec<bool> = remaining.iter().map(|&r| r > 0).collect();
      let cycle = find_cycle(&dependents, &blocked);
      errors.push(GraphError::Cycle {
        stages: cycle.into_iter().map(|i| stages[i].name.clone()).collect(),
      });
    }

    if !errors.is_empty() {
      return Err(GraphErrors(errors));
    }

    debug!(stages = n, values = producers.len(), "graph_built");

    Ok(Self {
      stages,
      attributes: attributes.clone(),
      predecessors,
      dependents,
      producers,
      order,
    })
  }

  pub fn len(&self) -> usize {
    self.stages.len()
  }

  pub fn is_empty(&self) -> bool {
    self.stages.is_empty()
  }

  pub fn stages(&self) -> &[StageSpec] {
    &self.stages
  }

  /// Stage by index. Panics on an index the graph did not hand out.
  pub fn stage(&self, index: usize) -> &StageSpec {
    &self.stages[index]
  }

  pub fn index_of(&self, name: &str) -> Option<usize> {
    self.stages.iter().position(|s| s.name == name)
  }

  pub fn attributes(&self) -> &Contract {
    &self.attributes
  }

  /// A topological order, ties broken by declaration order.
  pub fn topological_order(&self) -> &[usize] {
    &self.order
  }

  pub fn predecessors(&self, index: usize) -> &[usize] {
    self.predecessors.get(index).map(Vec::as_slice).unwrap_or(&[])
  }

  pub fn dependents(&self, index: usize) -> &[usize] {
    self.dependents.get(index).map(Vec::as_slice).unwrap_or(&[])
  }

  /// Stages with no predecessors.
  pub fn roots(&self) -> Vec<usize> {
    (0..self.stages.len())
      .filter(|&i| self.predecessors[i].is_empty())
      .collect()
  }

  /// Every stage reachable through dependent edges, sorted.
  pub fn transitive_dependents(&self, index: usize) -> Vec<usize> {
    let mut visited = BTreeSet::new();
    let mut queue: VecDeque<usize> = self.dependents(index).iter().copied().collect();
    while let Some(next) = queue.pop_front() {
      if visited.insert(next) {
        queue.extend(self.dependents(next).iter().copied());
      }
    }
    visited.into_iter().collect()
  }

  /// The stage that writes a context name.
  pub fn producer_of(&self, name: &str) -> Option<usize> {
    self.producers.get(name).copied()
  }
}

/// Map every explicitly named output to its producer, reporting collisions.
fn index_producers(
  stages: &[StageSpec],
  attributes: &Contract,
  errors: &mut Vec<GraphError>,
) -> BTreeMap<String, usize> {
  let mut claimed: BTreeMap<String, Vec<usize>> = BTreeMap::new();
  for (i, stage) in stages.iter().enumerate() {
    for slot in stage.outputs.slots() {
      if slot.is_internal() && !stage.output_mapping.contains_key(&slot.name) {
        continue;
      }
      claimed
        .entry(stage.output_name(&slot.name).to_string())
        .or_default()
        .push(i);
    }
  }

  let mut producers = BTreeMap::new();
  for (name, owners) in claimed {
    if owners.len() > 1 {
      errors.push(GraphError::AmbiguousProducer {
        name: name.clone(),
        stages: owners.iter().map(|&i| stages[i].name.clone()).collect(),
      });
    }
    if attributes.contains(&name) {
      for &owner in &owners {
        errors.push(GraphError::ShadowsAttribute {
          stage: stages[owner].name.clone(),
          name: name.clone(),
        });
      }
    }
    producers.insert(name, owners[0]);
  }
  producers
}

fn rename_internal_outputs(stages: &mut [StageSpec], producers: &BTreeMap<String, usize>, attributes: &Contract) {
  let mut taken = BTreeSet::new();
  for stage in stages.iter_mut() {
    let internal: Vec<String> = stage
      .outputs
      .slots()
      .iter()
      .filter(|s| s.is_internal() && !stage.output_mapping.contains_key(&s.name))
      .map(|s| s.name.clone())
      .collect();

    for slot in internal {
      let mut name = slot.clone();
      while producers.contains_key(&name) || attributes.contains(&name) || taken.contains(&name) {
        name = suffixed_name(&slot);
      }
      if name != slot {
        debug!(stage = %stage.name, slot = %slot, renamed = %name, "internal_output_renamed");
        stage.output_mapping.insert(slot, name.clone());
      }
      taken.insert(name);
    }
  }
}

fn output_slot<'a>(stage: &'a StageSpec, context_name: &str) -> Option<&'a Slot> {
  stage
    .outputs
    .slots()
    .iter()
    .find(|s| stage.output_name(&s.name) == context_name)
}

fn check_types(
  name: &str,
  producer: &str,
  produced: &Slot,
  consumer: &StageSpec,
  consumed: &Slot,
  errors: &mut Vec<GraphError>,
) {
  if !produced.value_type.satisfies(consumed.value_type) {
    errors.push(GraphError::TypeMismatch {
      name: name.to_string(),
      producer: producer.to_string(),
      consumer: consumer.name.clone(),
      produced: produced.value_type,
      expected: consumed.value_type,
    });
  }
}

/// DFS with coloring over the stages Kahn's algorithm could not order.
/// Returns the cycle as a closed path, e.g. `[a, b, a]`.
fn find_cycle(dependents: &[Vec<usize>], blocked: &[bool]) -> Vec<usize> {
  fn visit(
    node: usize,
    dependents: &[Vec<usize>],
    blocked: &[bool],
    color: &mut [u8],
    path: &mut Vec<usize>,
  ) -> Option<Vec<usize>> {
    color[node] = 1;
    path.push(node);
    for &next in &dependents[node] {
      if !blocked[next] {
        continue;
      }
      match color[next] {
        1 => {
          let start = path.iter().position(|&p| p == next)?;
          let mut cycle = path[start..].to_vec();
          cycle.push(next);
          return Some(cycle);
        }
        0 => {
          if let Some(cycle) = visit(next, dependents, blocked, color, path) {
            return Some(cycle);
          }
        }
        _ => {}
      }
    }
    path.pop();
    color[node] = 2;
    None
  }

  let mut color = vec![0u8; dependents.len()];
  let mut path = Vec::new();
  for start in 0..dependents.len() {
    if blocked[start] && color[start] == 0 {
      if let Some(cycle) = visit(start, dependents, blocked, &mut color, &mut path) {
        return cycle;
      }
    }
  }
  Vec::new()
}

#[cfg(test)]
mod tests {
  use super::*;
  use cartograph_contract::ValueType;

  fn attributes() -> Contract {
    Contract::from_slots([Slot::required("bbox", ValueType::List)])
  }

  fn outputs(names: &[(&str, ValueType)]) -> Contract {
    Contract::from_slots(names.iter().map(|(n, t)| Slot::required(*n, *t)))
  }

  fn inputs(names: &[(&str, ValueType)]) -> Contract {
    outputs(names)
  }

  fn report_stages() -> Vec<StageSpec> {
    vec![
      StageSpec::new("map")
        .with_inputs(inputs(&[("bbox", ValueType::List)]))
        .with_outputs(outputs(&[("image", ValueType::Artifact)])),
      StageSpec::new("legend").with_outputs(outputs(&[("legend", ValueType::Artifact)])),
      StageSpec::new("report")
        .with_inputs(inputs(&[("image", ValueType::Artifact), ("legend", ValueType::Artifact)]))
        .with_outputs(outputs(&[("artifact", ValueType::Artifact)])),
    ]
  }

  #[test]
  fn test_build_report_graph() {
    let graph = Graph::build(report_stages(), &attributes()).unwrap();

    assert_eq!(graph.roots(), vec![0, 1]);
    assert_eq!(graph.predecessors(2), &[0, 1]);
    assert_eq!(graph.dependents(0), &[2]);
    assert_eq!(graph.topological_order(), &[0, 1, 2]);
    assert_eq!(graph.producer_of("image"), Some(0));
    assert_eq!(graph.producer_of("bbox"), None);
  }

  #[test]
  fn test_topological_order_follows_edges_not_declaration() {
    let stages = vec![
      StageSpec::new("report")
        .with_inputs(inputs(&[("image", ValueType::Any)]))
        .with_outputs(outputs(&[("artifact", ValueType::Artifact)])),
      StageSpec::new("map").with_outputs(outputs(&[("image", ValueType::Artifact)])),
    ];
    let graph = Graph::build(stages, &Contract::new()).unwrap();
    assert_eq!(graph.topological_order(), &[1, 0]);
  }

  #[test]
  fn test_ambiguous_producer() {
    let stages = vec![
      StageSpec::new("a").with_outputs(outputs(&[("image", ValueType::Artifact)])),
      StageSpec::new("b").with_outputs(outputs(&[("image", ValueType::Artifact)])),
    ];
    let err = Graph::build(stages, &Contract::new()).unwrap_err();
    assert_eq!(
      err.errors(),
      &[GraphError::AmbiguousProducer {
        name: "image".to_string(),
        stages: vec!["a".to_string(), "b".to_string()],
      }]
    );
  }

  #[test]
  fn test_cycle_is_reported_as_path() {
    let stages = vec![
      StageSpec::new("a")
        .with_inputs(inputs(&[("y", ValueType::Any)]))
        .with_outputs(outputs(&[("x", ValueType::Any)])),
      StageSpec::new("b")
        .with_inputs(inputs(&[("x", ValueType::Any)]))
        .with_outputs(outputs(&[("y", ValueType::Any)])),
    ];
    let err = Graph::build(stages, &Contract::new()).unwrap_err();
    assert_eq!(
      err.errors(),
      &[GraphError::Cycle {
        stages: vec!["a".to_string(), "b".to_string(), "a".to_string()],
      }]
    );
    assert_eq!(err.to_string(), "invalid pipeline: dependency cycle: a -> b -> a");
  }

  #[test]
  fn test_stage_consuming_own_output() {
    let stages = vec![
      StageSpec::new("loop")
        .with_inputs(inputs(&[("x", ValueType::Any)]))
        .with_outputs(outputs(&[("x", ValueType::Any)])),
    ];
    let err = Graph::build(stages, &Contract::new()).unwrap_err();
    assert!(matches!(&err.errors()[0], GraphError::Cycle { stages } if stages == &["loop", "loop"]));
  }

  #[test]
  fn test_errors_are_aggregated() {
    let stages = vec![
      StageSpec::new("a")
        .with_inputs(inputs(&[("y", ValueType::Any), ("missing", ValueType::Any)]))
        .with_outputs(outputs(&[("x", ValueType::Any), ("dup", ValueType::Any)])),
      StageSpec::new("b")
        .with_inputs(inputs(&[("x", ValueType::Any)]))
        .with_outputs(outputs(&[("y", ValueType::Any), ("dup", ValueType::Any)])),
    ];
    let err = Graph::build(stages, &Contract::new()).unwrap_err();
    assert_eq!(err.len(), 3);
    assert!(err.errors().iter().any(|e| matches!(e, GraphError::AmbiguousProducer { .. })));
    assert!(err.errors().iter().any(|e| matches!(e, GraphError::Cycle { .. })));
    assert!(err.errors().iter().any(|e| matches!(e, GraphError::UnsatisfiableInput { name, .. } if name == "missing")));
  }

  #[test]
  fn test_default_input_needs_no_producer() {
    let stages = vec![
      StageSpec::new("map")
        .with_inputs(Contract::from_slots([Slot::with_default("dpi", ValueType::Integer, 72)]))
        .with_outputs(outputs(&[("image", ValueType::Artifact)])),
    ];
    assert!(Graph::build(stages, &Contract::new()).is_ok());
  }

  #[test]
  fn test_unsatisfiable_one_of_group() {
    let stages = vec![
      StageSpec::new("map").with_inputs(Contract::from_slots([
        Slot::required("center", ValueType::List).one_of("extent"),
        Slot::required("extent", ValueType::List).one_of("extent"),
      ])),
    ];
    let err = Graph::build(stages, &Contract::new()).unwrap_err();
    assert!(matches!(&err.errors()[0], GraphError::UnsatisfiableGroup { group, .. } if group == "extent"));

    let stages = vec![
      StageSpec::new("map").with_inputs(Contract::from_slots([
        Slot::required("center", ValueType::List).one_of("extent"),
        Slot::required("bbox", ValueType::List).one_of("extent"),
      ])),
    ];
    assert!(Graph::build(stages, &attributes()).is_ok());
  }

  #[test]
  fn test_type_mismatch_between_stages() {
    let stages = vec![
      StageSpec::new("scale").with_outputs(outputs(&[("scale", ValueType::String)])),
      StageSpec::new("map").with_inputs(inputs(&[("scale", ValueType::Number)])),
    ];
    let err = Graph::build(stages, &Contract::new()).unwrap_err();
    assert!(matches!(
      &err.errors()[0],
      GraphError::TypeMismatch { name, produced: ValueType::String, expected: ValueType::Number, .. } if name == "scale"
    ));
  }

  #[test]
  fn test_integer_feeds_number() {
    let stages = vec![
      StageSpec::new("scale").with_outputs(outputs(&[("scale", ValueType::Integer)])),
      StageSpec::new("map").with_inputs(inputs(&[("scale", ValueType::Number)])),
    ];
    assert!(Graph::build(stages, &Contract::new()).is_ok());
  }

  #[test]
  fn test_output_shadowing_attribute() {
    let stages = vec![StageSpec::new("extent").with_outputs(outputs(&[("bbox", ValueType::List)]))];
    let err = Graph::build(stages, &attributes()).unwrap_err();
    assert_eq!(
      err.errors(),
      &[GraphError::ShadowsAttribute {
        stage: "extent".to_string(),
        name: "bbox".to_string(),
      }]
    );
  }

  #[test]
  fn test_mappings_rename_edges() {
    let stages = vec![
      StageSpec::new("overview")
        .with_outputs(outputs(&[("image", ValueType::Artifact)]))
        .map_output("image", "overview_image"),
      StageSpec::new("report")
        .with_inputs(inputs(&[("inset", ValueType::Artifact)]))
        .map_input("inset", "overview_image"),
    ];
    let graph = Graph::build(stages, &Contract::new()).unwrap();
    assert_eq!(graph.predecessors(1), &[0]);
  }

  #[test]
  fn test_unknown_mapping() {
    let stages = vec![StageSpec::new("map").map_input("nope", "bbox")];
    let err = Graph::build(stages, &attributes()).unwrap_err();
    assert!(matches!(&err.errors()[0], GraphError::UnknownMapping { slot, .. } if slot == "nope"));
  }

  #[test]
  fn test_internal_output_renamed_on_collision() {
    let stages = vec![
      StageSpec::new("map").with_outputs(Contract::from_slots([
        Slot::required("image", ValueType::Artifact),
        Slot::internal("bbox", ValueType::Any),
      ])),
      StageSpec::new("legend").with_outputs(Contract::from_slots([Slot::internal("timing", ValueType::Any)])),
      StageSpec::new("scalebar").with_outputs(Contract::from_slots([Slot::internal("timing", ValueType::Any)])),
    ];
    let graph = Graph::build(stages, &attributes()).unwrap();

    let renamed = graph.stage(0).output_name("bbox");
    assert!(renamed.starts_with("bbox_"));
    assert_eq!(renamed.len(), "bbox_".len() + 8);
    assert_eq!(graph.stage(1).output_name("timing"), "timing");
    assert!(graph.stage(2).output_name("timing").starts_with("timing_"));
  }

  #[test]
  fn test_internal_input_adds_no_edge() {
    let stages = vec![
      StageSpec::new("a").with_outputs(outputs(&[("timing", ValueType::Any)])),
      StageSpec::new("b").with_inputs(Contract::from_slots([Slot::internal("timing", ValueType::Any)])),
    ];
    let graph = Graph::build(stages, &Contract::new()).unwrap();
    assert!(graph.predecessors(1).is_empty());
    assert_eq!(graph.roots(), vec![0, 1]);
    assert!(graph.dependents(0).is_empty());
  }

  #[test]
  fn test_internal_input_does_not_close_cycle() {
    let stages = vec![
      StageSpec::new("a")
        .with_inputs(Contract::from_slots([Slot::internal("y", ValueType::Any)]))
        .with_outputs(outputs(&[("x", ValueType::Any)])),
      StageSpec::new("b")
        .with_inputs(inputs(&[("x", ValueType::Any)]))
        .with_outputs(outputs(&[("y", ValueType::Any)])),
    ];
    let graph = Graph::build(stages, &Contract::new()).unwrap();
    assert_eq!(graph.topological_order(), &[0, 1]);
    assert_eq!(graph.predecessors(1), &[0]);
  }

  #[test]
  fn test_transitive_dependents() {
    let stages = vec![
      StageSpec::new("a").with_outputs(outputs(&[("x", ValueType::Any)])),
      StageSpec::new("b")
        .with_inputs(inputs(&[("x", ValueType::Any)]))
        .with_outputs(outputs(&[("y", ValueType::Any)])),
      StageSpec::new("c").with_inputs(inputs(&[("y", ValueType::Any)])),
      StageSpec::new("d"),
    ];
    let graph = Graph::build(stages, &Contract::new()).unwrap();
    assert_eq!(graph.transitive_dependents(0), vec![1, 2]);
    assert!(graph.transitive_dependents(3).is_empty());
  }

  #[test]
  fn test_duplicate_stage_name() {
    let stages = vec![StageSpec::new("map"), StageSpec::new("map")];
    let err = Graph::build(stages, &Contract::new()).unwrap_err();
    assert_eq!(
      err.errors(),
      &[GraphError::DuplicateStage {
        stage: "map".to_string()
      }]
    );
  }
}
