//! `build feedstock`: build the recipes of a single feedstock checkout.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use super::{ContainerRequest, VariantSelection, check_conda_build_configs, run_in_container};
use crate::consts::DEFAULT_PKG_FORMAT;
use crate::error::OpenCeError;
use crate::execute::{CondaBuilder, DebugSettings, ExecuteConfig, RunReport, UnitBuilder, execute_units};
use crate::graph::{BuildGraph, GraphBuilder, GraphOptions, GraphSource};
use crate::util::resolve_existing;
use crate::variant::VariantMatrix;

#[derive(Debug, Clone)]
pub struct FeedstockBuildOptions {
  pub working_directory: PathBuf,
  pub recipe_config_file: Option<PathBuf>,
  /// Build only these recipes of the feedstock.
  pub recipes: Vec<String>,
  pub variants: VariantSelection,
  pub graph: GraphOptions,
  pub execute: ExecuteConfig,
  pub conda_pkg_format: String,
  /// Prepare a `conda debug` environment instead of building.
  pub debug: bool,
  /// fnmatch pattern selecting the output to debug.
  pub debug_output_id: Option<String>,
  pub container: Option<ContainerRequest>,
}

impl FeedstockBuildOptions {
  pub fn new(working_directory: PathBuf, graph: GraphOptions) -> Self {
    Self {
      working_directory,
      recipe_config_file: None,
      recipes: Vec::new(),
      variants: VariantSelection::default(),
      graph,
      execute: ExecuteConfig::default(),
      conda_pkg_format: DEFAULT_PKG_FORMAT.to_string(),
      debug: false,
      debug_output_id: None,
      container: None,
    }
  }
}

/// Run `build feedstock`. Returns `None` when the build ran in a container.
pub async fn build_feedstock(options: &FeedstockBuildOptions) -> Result<Option<RunReport>, OpenCeError> {
  let mut builder = CondaBuilder::new(options.conda_pkg_format.clone());
  if options.debug {
    builder.debug = Some(DebugSettings {
      output_id: options.debug_output_id.clone(),
    });
  }
  build_feedstock_with(options, Arc::new(builder)).await
}

pub(crate) async fn build_feedstock_with(
  options: &FeedstockBuildOptions,
  builder: Arc<dyn UnitBuilder>,
) -> Result<Option<RunReport>, OpenCeError> {
  check_conda_build_configs(&options.graph.conda_build_configs)?;
  let matrix = options.variants.matrix()?;

  if let Some(request) = &options.container {
    run_in_container(request, &matrix).await?;
    return Ok(None);
  }

  let dir = resolve_existing(&options.working_directory.to_string_lossy(), std::path::Path::new(".")).map_err(|_| {
    OpenCeError::InvalidArguments(format!(
      "working directory '{}' does not exist",
      options.working_directory.display()
    ))
  })?;
  let source = GraphSource::Feedstock {
    dir,
    recipe_config_file: options.recipe_config_file.clone(),
    recipes: options.recipes.clone(),
  };
  let graph = GraphBuilder::new(options.graph.clone()).build(&source, &matrix).await?;
  info!(units = graph.dag.unit_count(), "feedstock recipes resolved");

  // A feedstock build always rebuilds its recipes; markers are only honoured by `build env`.
  let mut config = options.execute.clone();
  config.reuse_completed = false;
  if options.debug {
    check_debug_target(&graph, &matrix, options.debug_output_id.as_deref())?;
    config.parallelism = 1;
  }

  let mut report = execute_units(&graph.dag, builder, &config).await?;
  report.pruned = graph.pruned.clone();
  Ok(Some(report))
}

/// `--debug` works on exactly one recipe in exactly one variant, and the
/// output pattern must select one of its outputs.
fn check_debug_target(graph: &BuildGraph, matrix: &VariantMatrix, output_id: Option<&str>) -> Result<(), OpenCeError> {
  if matrix.len() != 1 {
    return Err(OpenCeError::InvalidArguments(format!(
      "--debug requires exactly one variant, but {} were requested",
      matrix.len()
    )));
  }
  let units = graph.dag.units();
  let [unit] = units else {
    return Err(OpenCeError::InvalidArguments(format!(
      "--debug requires exactly one recipe, but {} were selected; use --recipes to pick one",
      units.len()
    )));
  };

  if let Some(pattern) = output_id {
    let glob = glob::Pattern::new(pattern)
      .map_err(|e| OpenCeError::InvalidArguments(format!("invalid --debug_output_id '{}': {}", pattern, e)))?;
    if !unit.output_names().any(|name| glob.matches(name)) {
      return Err(OpenCeError::InvalidArguments(format!(
        "--debug_output_id '{}' matches none of the outputs of {}: {}",
        pattern,
        unit.recipe,
        unit.output_names().collect::<Vec<_>>().join(", ")
      )));
    }
  }
  Ok(())
}
