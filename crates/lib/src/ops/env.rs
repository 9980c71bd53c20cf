//! `build env`: build every package of one or more environment files.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use super::{ContainerRequest, VariantSelection, check_conda_build_configs, run_in_container};
use crate::consts::DEFAULT_PKG_FORMAT;
use crate::env_file::{EmittedEnvFile, emit_env_files};
use crate::error::OpenCeError;
use crate::execute::{CondaBuilder, ExecuteConfig, RunReport, UnitBuilder, execute_units};
use crate::graph::{BuildGraph, GraphBuilder, GraphOptions, GraphSource};
use crate::test_runner::{process_test_results, run_tests};

#[derive(Debug, Clone)]
pub struct EnvBuildOptions {
  /// Environment files: paths, URLs, or bare names of envs in the open-ce repository.
  pub env_files: Vec<String>,
  pub variants: VariantSelection,
  pub graph: GraphOptions,
  pub execute: ExecuteConfig,
  pub conda_pkg_format: String,
  /// Only write the environment files.
  pub skip_build_packages: bool,
  pub run_tests: bool,
  pub test_labels: Vec<String>,
  /// Run the whole build in a container when set.
  pub container: Option<ContainerRequest>,
}

impl EnvBuildOptions {
  pub fn new(env_files: Vec<String>, graph: GraphOptions) -> Self {
    Self {
      env_files,
      variants: VariantSelection::default(),
      graph,
      execute: ExecuteConfig::default(),
      conda_pkg_format: DEFAULT_PKG_FORMAT.to_string(),
      skip_build_packages: false,
      run_tests: false,
      test_labels: Vec::new(),
      container: None,
    }
  }
}

/// What a `build env` run produced.
#[derive(Debug, Default)]
pub struct EnvBuildOutcome {
  pub env_files: Vec<EmittedEnvFile>,
  /// `None` when no packages were built on the host.
  pub report: Option<RunReport>,
  pub test_results: Option<PathBuf>,
  pub containerized: bool,
}

/// Run `build env` with the production conda builder.
pub async fn build_env(options: &EnvBuildOptions) -> Result<EnvBuildOutcome, OpenCeError> {
  let builder = Arc::new(CondaBuilder::new(options.conda_pkg_format.clone()));
  build_env_with(options, builder).await
}

pub(crate) async fn build_env_with(
  options: &EnvBuildOptions,
  builder: Arc<dyn UnitBuilder>,
) -> Result<EnvBuildOutcome, OpenCeError> {
  check_conda_build_configs(&options.graph.conda_build_configs)?;
  let matrix = options.variants.matrix()?;

  if let Some(request) = &options.container {
    run_in_container(request, &matrix).await?;
    return Ok(EnvBuildOutcome {
      containerized: true,
      ..Default::default()
    });
  }

  let mut graph_builder = GraphBuilder::new(options.graph.clone());
  let graph = graph_builder
    .build(&GraphSource::Envs(options.env_files.clone()), &matrix)
    .await?;
  info!(units = graph.dag.unit_count(), variants = matrix.len(), "build graph resolved");

  let cuda_in_name = matrix.cuda_versions().len() > 1;
  let env_files = emit_env_files(&graph, &options.execute.output_folder, cuda_in_name)?;
  info!(
    count = env_files.len(),
    "conda environment files can be used with \"conda env create -f <file>\""
  );

  if options.skip_build_packages {
    return Ok(EnvBuildOutcome {
      env_files,
      ..Default::default()
    });
  }

  let report = build_graph(&graph, builder, &options.execute).await?;
  if !report.is_success() {
    return Ok(EnvBuildOutcome {
      env_files,
      report: Some(report),
      ..Default::default()
    });
  }

  let test_results = if options.run_tests {
    let paths: Vec<PathBuf> = env_files.iter().map(|f| f.path.clone()).collect();
    let results = run_tests(&graph.feedstocks, &paths, &options.test_labels).await?;
    Some(process_test_results(
      &results,
      &options.execute.output_folder,
      &options.test_labels,
    )?)
  } else {
    None
  };

  Ok(EnvBuildOutcome {
    env_files,
    report: Some(report),
    test_results,
    containerized: false,
  })
}

async fn build_graph(
  graph: &BuildGraph,
  builder: Arc<dyn UnitBuilder>,
  config: &ExecuteConfig,
) -> Result<RunReport, OpenCeError> {
  let mut report = execute_units(&graph.dag, builder, config).await?;
  if !graph.pruned.is_empty() {
    warn!(count = graph.pruned.len(), "some dependencies are not built for every variant");
  }
  report.pruned = graph.pruned.clone();
  Ok(report)
}
