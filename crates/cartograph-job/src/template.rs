//! Resolving template definitions into runnable pipelines.

use std::collections::HashMap;
use std::sync::Arc;

use cartograph_config::{SlotDef, SlotKindDef, StageDef, TemplateDef};
use cartograph_contract::{Contract, ExtraParameterPolicy, Slot, ValueType, coerce};
use cartograph_runtime::{Pipeline, Stage};
use cartograph_workflow::{GraphCache, StageSpec};
use tracing::debug;

use crate::access::AccessAssertion;
use crate::error::TemplateError;
use crate::filename::{DEFAULT_FILE_NAME, validate_file_name};

/// Stage implementations keyed by the `kind` used in template files.
#[derive(Clone, Default)]
pub struct StageCatalog {
  stages: HashMap<String, Arc<dyn Stage>>,
}

impl StageCatalog {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&mut self, kind: impl Into<String>, stage: Arc<dyn Stage>) {
    self.stages.insert(kind.into(), stage);
  }

  pub fn with(mut self, kind: impl Into<String>, stage: Arc<dyn Stage>) -> Self {
    self.register(kind, stage);
    self
  }

  pub fn get(&self, kind: &str) -> Option<&Arc<dyn Stage>> {
    self.stages.get(kind)
  }

  pub fn kinds(&self) -> Vec<&str> {
    let mut kinds: Vec<&str> = self.stages.keys().map(String::as_str).collect();
    kinds.sort_unstable();
    kinds
  }
}

impl std::fmt::Debug for StageCatalog {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("StageCatalog").field("kinds", &self.kinds()).finish()
  }
}

fn slot_from_def(def: &SlotDef) -> Result<Slot, TemplateError> {
  let value_type: ValueType = def.value_type.parse().map_err(|source| TemplateError::UnknownType {
    slot: def.name.clone(),
    source,
  })?;

  let mut slot = match def.effective_kind() {
    SlotKindDef::Required => Slot::required(&def.name, value_type),
    SlotKindDef::Internal => Slot::internal(&def.name, value_type),
    SlotKindDef::HasDefault => {
      let raw = def
        .default
        .as_ref()
        .ok_or_else(|| TemplateError::MissingDefault { slot: def.name.clone() })?;
      let default = coerce(&def.name, raw, value_type).map_err(|source| TemplateError::InvalidDefault {
        slot: def.name.clone(),
        source,
      })?;
      Slot::with_default(&def.name, value_type, default)
    }
  };

  if !def.requires.is_empty() {
    slot = slot.requires(def.requires.iter().cloned());
  }
  if let Some(group) = &def.one_of {
    slot = slot.one_of(group.clone());
  }
  Ok(slot)
}

fn contract_from_defs(defs: &[SlotDef]) -> Result<Contract, TemplateError> {
  let slots = defs.iter().map(slot_from_def).collect::<Result<Vec<_>, _>>()?;
  Ok(Contract::from_slots(slots))
}

fn stage_spec(def: &StageDef) -> Result<StageSpec, TemplateError> {
  let mut spec = StageSpec::new(&def.name)
    .with_inputs(contract_from_defs(&def.inputs)?)
    .with_outputs(contract_from_defs(&def.outputs)?);
  for (slot, name) in &def.input_mapping {
    spec = spec.map_input(slot, name);
  }
  for (slot, name) in &def.output_mapping {
    spec = spec.map_output(slot, name);
  }
  Ok(spec)
}

/// The attribute contract and stage specs of a template definition,
/// without binding any stage implementations.
pub fn stage_specs(def: &TemplateDef) -> Result<(Contract, Vec<StageSpec>), TemplateError> {
  let attributes = contract_from_defs(&def.attributes)?;
  let specs = def.stages.iter().map(stage_spec).collect::<Result<Vec<_>, _>>()?;
  Ok((attributes, specs))
}

/// A template ready to accept jobs.
#[derive(Debug, Clone)]
pub struct Template {
  app_id: String,
  attributes: Contract,
  pipeline: Pipeline,
  artifact_slot: String,
  file_name: String,
  access: AccessAssertion,
  timeout_ms: Option<u64>,
  extra_parameters: ExtraParameterPolicy,
}

impl Template {
  /// Resolve a definition against the stage catalog.
  ///
  /// Every stage kind must be registered, every slot type known and every
  /// default valid for its slot. The graph is built (or reused) through
  /// `cache` and must produce the artifact slot.
  pub fn resolve(def: &TemplateDef, catalog: &StageCatalog, cache: &GraphCache) -> Result<Self, TemplateError> {
    let mut implementations = Vec::with_capacity(def.stages.len());
    for stage in &def.stages {
      let implementation = catalog.get(&stage.kind).ok_or_else(|| TemplateError::UnknownStageKind {
        stage: stage.name.clone(),
        kind: stage.kind.clone(),
      })?;
      implementations.push(implementation.clone());
    }

    let file_name = def.output_filename.clone().unwrap_or_else(|| DEFAULT_FILE_NAME.to_string());
    validate_file_name(&file_name).map_err(|message| TemplateError::InvalidFileName { message })?;

    let (attributes, specs) = stage_specs(def)?;
    let graph = cache.get_or_build(specs, &attributes)?;
    if graph.producer_of(&def.artifact_slot).is_none() {
      return Err(TemplateError::UnknownArtifactSlot {
        slot: def.artifact_slot.clone(),
      });
    }
    let pipeline = Pipeline::new(graph, implementations)?;

    debug!(app_id = %def.app_id, stages = pipeline.len(), "template_resolved");

    Ok(Self {
      app_id: def.app_id.clone(),
      attributes,
      pipeline,
      artifact_slot: def.artifact_slot.clone(),
      file_name,
      access: AccessAssertion::roles(def.access.iter().cloned()),
      timeout_ms: def.timeout_ms,
      extra_parameters: if def.strict_parameters {
        ExtraParameterPolicy::Reject
      } else {
        ExtraParameterPolicy::Warn
      },
    })
  }

  pub fn app_id(&self) -> &str {
    &self.app_id
  }

  pub fn attributes(&self) -> &Contract {
    &self.attributes
  }

  pub fn pipeline(&self) -> &Pipeline {
    &self.pipeline
  }

  pub fn artifact_slot(&self) -> &str {
    &self.artifact_slot
  }

  /// The unrendered file name template.
  pub fn file_name(&self) -> &str {
    &self.file_name
  }

  pub fn access(&self) -> &AccessAssertion {
    &self.access
  }

  pub fn timeout_ms(&self) -> Option<u64> {
    self.timeout_ms
  }

  pub fn extra_parameters(&self) -> ExtraParameterPolicy {
    self.extra_parameters
  }
}
