use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use cartograph_config::TemplateDef;
use cartograph_contract::ExtraParameterPolicy;
use cartograph_job::{Capability, JobConfig, JobManager, stage_specs};
use cartograph_runtime::{Executor, ExecutorConfig};
use cartograph_store::SqliteRegistry;
use cartograph_workflow::Graph;

/// Cartograph - dependency-driven map print jobs
#[derive(Parser)]
#[command(name = "cartograph")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.cartograph)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Check a template file and print its stage order
  Validate {
    /// Path to the template file (JSON)
    template_file: PathBuf,
  },

  /// Bind a request read from stdin against a template's attributes
  Bind {
    /// Path to the template file (JSON)
    template_file: PathBuf,
  },

  /// Show the recorded status of a job
  Status {
    reference_id: String,

    /// Principal to check access as
    #[arg(long)]
    user: Option<String>,

    /// Role held by the principal (repeatable)
    #[arg(long = "role")]
    roles: Vec<String>,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".cartograph"),
  };

  match cli.command {
    Some(Commands::Validate { template_file }) => validate(&template_file)?,
    Some(Commands::Bind { template_file }) => bind(&template_file)?,
    Some(Commands::Status {
      reference_id,
      user,
      roles,
    }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(status(&data_dir, &reference_id, user, roles))?;
    }
    None => {
      println!("cartograph - use --help to see available commands");
    }
  }

  Ok(())
}

fn load_template(template_file: &Path) -> Result<TemplateDef> {
  let content = std::fs::read_to_string(template_file)
    .with_context(|| format!("failed to read template file: {}", template_file.display()))?;

  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse template file: {}", template_file.display()))
}

fn validate(template_file: &Path) -> Result<()> {
  let def = load_template(template_file)?;
  let (attributes, specs) = stage_specs(&def).context("invalid template")?;

  let graph = match Graph::build(specs, &attributes) {
    Ok(graph) => graph,
    Err(errors) => {
      for error in errors.errors() {
        eprintln!("error: {error}");
      }
      bail!("template '{}' has {} configuration error(s)", def.app_id, errors.len());
    }
  };

  if graph.producer_of(&def.artifact_slot).is_none() {
    bail!("artifact slot '{}' is not produced by any stage", def.artifact_slot);
  }

  let order: Vec<&str> = graph
    .topological_order()
    .iter()
    .map(|&i| graph.stage(i).name.as_str())
    .collect();

  eprintln!("Template '{}' is valid", def.app_id);
  let output = serde_json::json!({
    "app_id": def.app_id,
    "attributes": attributes.names().collect::<Vec<_>>(),
    "stages": order,
    "artifact_slot": def.artifact_slot,
  });
  println!("{}", serde_json::to_string_pretty(&output)?);

  Ok(())
}

fn bind(template_file: &Path) -> Result<()> {
  let def = load_template(template_file)?;
  let (attributes, _) = stage_specs(&def).context("invalid template")?;

  let request = read_request_from_stdin()?;
  let policy = if def.strict_parameters {
    ExtraParameterPolicy::Reject
  } else {
    ExtraParameterPolicy::Warn
  };

  let binding = attributes.bind(&request, policy);
  for warning in &binding.warnings {
    eprintln!("warning: {warning}");
  }
  let values = binding.into_result()?;

  let output: serde_json::Map<String, serde_json::Value> =
    values.into_iter().map(|(name, value)| (name, value.to_json())).collect();
  println!("{}", serde_json::to_string_pretty(&output)?);

  Ok(())
}

async fn status(data_dir: &Path, reference_id: &str, user: Option<String>, roles: Vec<String>) -> Result<()> {
  let path = data_dir.join("registry.db");
  if !path.exists() {
    bail!("no registry found at {}", path.display());
  }

  let registry = SqliteRegistry::open(&path)
    .await
    .with_context(|| format!("failed to open registry: {}", path.display()))?;
  let executor = Arc::new(Executor::new(ExecutorConfig::default()));
  let manager = JobManager::new(Arc::new(registry), executor, JobConfig::default());

  let capability = match user {
    Some(user) => Capability::user(user, roles),
    None => Capability::anonymous(),
  };

  let status = manager
    .poll_status(reference_id, &capability)
    .await
    .with_context(|| format!("failed to read status of '{reference_id}'"))?;

  println!("{}", serde_json::to_string_pretty(&status)?);

  Ok(())
}

fn read_request_from_stdin() -> Result<serde_json::Map<String, serde_json::Value>> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    return Ok(serde_json::Map::new());
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read request from stdin")?;

  if input.trim().is_empty() {
    return Ok(serde_json::Map::new());
  }

  match serde_json::from_str(&input).context("failed to parse request JSON from stdin")? {
    serde_json::Value::Object(map) => Ok(map),
    other => bail!("request must be a JSON object, got {other}"),
  }
}
