//! Implementation of the `open-ce build image` command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use opence_lib::OpenCeError;
use opence_lib::consts::DEFAULT_OUTPUT_FOLDER;
use opence_lib::container::split_build_args;
use opence_lib::image::{ImageBuildOptions, build_runtime_images};
use opence_lib::util::parse_arg_list;

use crate::output::{print_info, print_success, symbols};

#[derive(Args, Debug)]
pub struct ImageArgs {
  /// Local conda channel holding the built packages
  #[arg(long = "local_conda_channel", default_value = DEFAULT_OUTPUT_FOLDER)]
  pub local_conda_channel: PathBuf,

  /// Comma delimited list of conda environment files to build images for
  #[arg(long = "conda_env_files", required = true)]
  pub conda_env_files: String,

  /// Extra arguments for the image build, as a single quoted string
  #[arg(long = "container_build_args", default_value = "", allow_hyphen_values = true)]
  pub container_build_args: String,

  /// Container tool to use, such as podman or docker
  #[arg(long = "container_tool", env = "OPEN_CE_CONTAINER_TOOL")]
  pub container_tool: Option<String>,
}

impl ImageArgs {
  fn options(&self) -> ImageBuildOptions {
    ImageBuildOptions {
      local_conda_channel: self.local_conda_channel.clone(),
      conda_env_files: parse_arg_list(&[&self.conda_env_files])
        .into_iter()
        .map(PathBuf::from)
        .collect(),
      container_build_args: split_build_args(&self.container_build_args),
      container_tool: self.container_tool.clone(),
    }
  }
}

/// Execute `build image`: one runtime image per environment file.
pub fn cmd_build_image(args: &ImageArgs) -> Result<()> {
  let options = args.options();

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let images = rt.block_on(build_runtime_images(&options)).map_err(OpenCeError::from)?;

  print_success(&format!("Built {} image(s)", images.len()));
  for image in &images {
    println!("  {} {}", symbols::ARROW, image);
  }
  print_info("Run an image with \"<container_tool> run -it <image>\"");
  Ok(())
}
