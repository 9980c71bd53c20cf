//! Flag groups shared between the build subcommands.

use std::path::PathBuf;

use clap::Args;

use opence_lib::consts::{
  DEFAULT_BUILD_TYPES, DEFAULT_CUDA_VERSIONS, DEFAULT_GIT_LOCATION, DEFAULT_MPI_TYPES, DEFAULT_OUTPUT_FOLDER,
  DEFAULT_PKG_FORMAT, DEFAULT_PPC_ARCH, DEFAULT_PYTHON_VERSIONS, DEFAULT_REPOSITORY_FOLDER,
};
use opence_lib::env_config::EnvLoadOptions;
use opence_lib::execute::{ExecuteConfig, default_parallelism};
use opence_lib::feedstock::FeedstockSettings;
use opence_lib::graph::GraphOptions;
use opence_lib::ops::{ContainerRequest, VariantSelection};
use opence_lib::util::parse_arg_list;

/// The variant matrix axes.
#[derive(Args, Debug, Clone)]
pub struct VariantArgs {
  /// Comma delimited list of python versions to build for
  #[arg(long = "python_versions", default_value = DEFAULT_PYTHON_VERSIONS)]
  pub python_versions: String,

  /// Comma delimited list of build types, such as "cpu" or "cuda"
  #[arg(long = "build_types", default_value = DEFAULT_BUILD_TYPES)]
  pub build_types: String,

  /// Comma delimited list of MPI types, such as "openmpi" or "system"
  #[arg(long = "mpi_types", default_value = DEFAULT_MPI_TYPES)]
  pub mpi_types: String,

  /// CUDA version to build for
  #[arg(long = "cuda_versions", default_value = DEFAULT_CUDA_VERSIONS)]
  pub cuda_versions: String,

  /// Power architecture to target
  #[arg(long = "ppc_arch", default_value = DEFAULT_PPC_ARCH, value_parser = ["p9", "p10"])]
  pub ppc_arch: String,
}

impl VariantArgs {
  pub fn selection(&self) -> VariantSelection {
    VariantSelection {
      python_versions: parse_arg_list(&[&self.python_versions]),
      build_types: parse_arg_list(&[&self.build_types]),
      mpi_types: parse_arg_list(&[&self.mpi_types]),
      cuda_versions: parse_arg_list(&[&self.cuda_versions]),
      ppc_arch: self.ppc_arch.clone(),
    }
  }
}

/// Flags every package build accepts.
#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
  /// Location of conda_build_config.yaml files; a comma delimited list of paths or URLs
  #[arg(long = "conda_build_configs", default_value = "")]
  pub conda_build_configs: String,

  /// Path where built conda packages will be saved
  #[arg(long = "output_folder", default_value = DEFAULT_OUTPUT_FOLDER)]
  pub output_folder: PathBuf,

  /// Conda channels to be used; may be repeated
  #[arg(long = "channels")]
  pub channels: Vec<String>,

  /// The default location to clone git repositories from
  #[arg(long = "git_location", env = "OPEN_CE_GIT_LOCATION", default_value = DEFAULT_GIT_LOCATION)]
  pub git_location: String,

  /// Package format of the built packages
  #[arg(long = "conda_pkg_format", default_value = DEFAULT_PKG_FORMAT, value_parser = ["conda", "tar.bz2"])]
  pub conda_pkg_format: String,

  /// Number of packages to build in parallel
  #[arg(long = "jobs", short = 'j')]
  pub jobs: Option<usize>,
}

impl BuildArgs {
  pub fn execute_config(&self) -> ExecuteConfig {
    ExecuteConfig {
      parallelism: self.jobs.unwrap_or_else(default_parallelism).max(1),
      output_folder: self.output_folder.clone(),
      reuse_completed: true,
    }
  }

  pub fn graph_options(&self, repository_folder: PathBuf, git_tag_for_env: Option<String>) -> GraphOptions {
    GraphOptions {
      feedstocks: FeedstockSettings {
        repository_folder,
        git_location: self.git_location.clone(),
        git_tag_for_env: git_tag_for_env.clone(),
      },
      env: EnvLoadOptions {
        git_location: self.git_location.clone(),
        git_tag_for_env,
      },
      packages: Vec::new(),
      channels: parse_arg_list(&self.channels),
      conda_build_configs: parse_arg_list(&[&self.conda_build_configs]),
      local_src_dir: None,
    }
  }
}

/// Flags that move the build into a container.
#[derive(Args, Debug, Clone)]
pub struct ContainerArgs {
  /// Run the build inside a container
  #[arg(long = "container_build", alias = "docker_build")]
  pub container_build: bool,

  /// Container tool to use, such as podman or docker
  #[arg(long = "container_tool", env = "OPEN_CE_CONTAINER_TOOL")]
  pub container_tool: Option<String>,

  /// Extra arguments for the container image build, as a single quoted string
  #[arg(long = "container_build_args", default_value = "", allow_hyphen_values = true)]
  pub container_build_args: String,

  /// Directory mounted into the container at /home/builder/local_files
  #[arg(long = "local_files")]
  pub local_files: Option<PathBuf>,
}

impl ContainerArgs {
  /// The container request for this invocation, if `--container_build` was given.
  pub fn request(&self) -> Option<ContainerRequest> {
    self.container_build.then(|| ContainerRequest {
      tool: self.container_tool.clone(),
      build_args: opence_lib::container::split_build_args(&self.container_build_args),
      local_files: self.local_files.clone(),
      host_args: std::env::args().skip(1).collect(),
    })
  }
}

pub fn default_repository_folder() -> PathBuf {
  PathBuf::from(DEFAULT_REPOSITORY_FOLDER)
}
