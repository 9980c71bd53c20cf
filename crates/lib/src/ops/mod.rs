//! The operations behind `open-ce build env` and `open-ce build feedstock`.
//!
//! Each operation takes a plain options struct, so the CLI only has to map
//! flags onto it.

mod env;
mod feedstock;

use std::path::{Path, PathBuf};

use tracing::info;

use crate::consts::{DEFAULT_BUILD_TYPES, DEFAULT_CUDA_VERSIONS, DEFAULT_MPI_TYPES, DEFAULT_PPC_ARCH, DEFAULT_PYTHON_VERSIONS};
use crate::container::{
  BuilderImage, ContainerError, ContainerSettings, plan_container_invocation, run_container_build, select_tool,
  which_probe,
};
use crate::error::OpenCeError;
use crate::execute::RunReport;
use crate::util::{expand_path, is_url, parse_arg_list};
use crate::variant::{VariantError, VariantMatrix};

pub use env::{EnvBuildOptions, EnvBuildOutcome, build_env};
pub use feedstock::{FeedstockBuildOptions, build_feedstock};

/// The variant axes of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantSelection {
  pub python_versions: Vec<String>,
  pub build_types: Vec<String>,
  pub mpi_types: Vec<String>,
  pub cuda_versions: Vec<String>,
  pub ppc_arch: String,
}

impl Default for VariantSelection {
  fn default() -> Self {
    Self {
      python_versions: parse_arg_list(&[DEFAULT_PYTHON_VERSIONS]),
      build_types: parse_arg_list(&[DEFAULT_BUILD_TYPES]),
      mpi_types: parse_arg_list(&[DEFAULT_MPI_TYPES]),
      cuda_versions: parse_arg_list(&[DEFAULT_CUDA_VERSIONS]),
      ppc_arch: DEFAULT_PPC_ARCH.to_string(),
    }
  }
}

impl VariantSelection {
  pub fn matrix(&self) -> Result<VariantMatrix, VariantError> {
    VariantMatrix::new(
      &self.python_versions,
      &self.build_types,
      &self.mpi_types,
      &self.cuda_versions,
      &self.ppc_arch,
    )
  }
}

/// A request to run the build inside a container instead of on the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerRequest {
  pub tool: Option<String>,
  pub build_args: Vec<String>,
  pub local_files: Option<PathBuf>,
  /// The host command line without the program name.
  pub host_args: Vec<String>,
}

/// Every local (non-URL) conda build config must exist.
pub fn check_conda_build_configs(configs: &[String]) -> Result<(), OpenCeError> {
  for config in configs {
    if !is_url(config) && !expand_path(config, Path::new(".")).exists() {
      return Err(OpenCeError::MissingBuildConfig(config.clone()));
    }
  }
  Ok(())
}

/// A run that finished with failures is an error, reported after the summary is shown.
pub fn ensure_success(report: &RunReport) -> Result<(), OpenCeError> {
  if report.is_success() {
    Ok(())
  } else {
    Err(OpenCeError::BuildFailed {
      summary: report.summary(),
    })
  }
}

/// Re-run the current command inside a builder container rooted at the working directory.
async fn run_in_container(request: &ContainerRequest, matrix: &VariantMatrix) -> Result<(), OpenCeError> {
  let image = BuilderImage::for_matrix(matrix)?;
  let cwd = std::env::current_dir().map_err(|source| ContainerError::Context {
    path: PathBuf::from("."),
    source,
  })?;
  let invocation = plan_container_invocation(&request.host_args, &cwd, &cwd, request.local_files.as_deref())?;
  let tool = select_tool(request.tool.as_deref(), which_probe)?;
  let executable = std::env::current_exe().map_err(|source| ContainerError::Context {
    path: PathBuf::from("open-ce"),
    source,
  })?;

  info!(tool = %tool, image = %image.name(), "starting container build");
  let settings = ContainerSettings {
    tool,
    build_args: request.build_args.clone(),
    executable,
  };
  run_container_build(&settings, &image, &invocation).await?;
  Ok(())
}
