//! Runtime images built from a local channel and an environment file.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::consts::{CONDA_ENV_FILENAME_PREFIX, IMAGE_STAGING_DIR, RUNTIME_IMAGE_NAME, RUNTIME_IMAGE_USER, RUNTIME_TARGET_DIR};
use crate::container::{ContainerError, ContainerTool, dockerfile, select_tool, which_probe};
use crate::env_file::{EnvFileError, local_packages_of_env_file, open_ce_version_of_env_file, rewrite_local_channels};
use crate::execute::conda::list_packages;
use crate::util::{Cmd, CmdError, absolute};

#[derive(Debug, Error)]
pub enum ImageBuildError {
  #[error("local conda channel '{0}' does not exist")]
  ChannelNotFound(PathBuf),

  #[error("conda environment file '{0}' does not exist")]
  EnvFileNotFound(PathBuf),

  #[error("{env_file} references packages missing from the local channel: {}", .packages.join(", "))]
  MissingPackages { env_file: PathBuf, packages: Vec<String> },

  #[error(transparent)]
  EnvFile(#[from] EnvFileError),

  #[error(transparent)]
  Container(#[from] ContainerError),

  #[error("failed to stage image files in '{path}': {source}")]
  Staging {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failure building image {image}: {source}")]
  Build {
    image: String,
    #[source]
    source: CmdError,
  },
}

#[derive(Debug, Clone, Default)]
pub struct ImageBuildOptions {
  pub local_conda_channel: PathBuf,
  pub conda_env_files: Vec<PathBuf>,
  pub container_build_args: Vec<String>,
  pub container_tool: Option<String>,
}

/// `open-ce:<version>-<variant>` for the environment file at `env_file`.
pub fn image_name(env_file: &Path) -> Result<String, EnvFileError> {
  let version = open_ce_version_of_env_file(env_file)?;
  let stem = env_file.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
  let variant = stem.strip_prefix(CONDA_ENV_FILENAME_PREFIX).unwrap_or(&stem);
  Ok(format!("{}:{}-{}", RUNTIME_IMAGE_NAME, version, variant))
}

/// Local packages listed in `env_file` with no matching package file in `channel`.
pub fn missing_packages(channel: &Path, env_file: &Path) -> Result<Vec<String>, EnvFileError> {
  let available: HashSet<String> = list_packages(channel)
    .iter()
    .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
    .collect();
  Ok(
    local_packages_of_env_file(env_file)?
      .into_iter()
      .filter(|pkg| {
        let prefix = format!("{}-{}-", pkg.name, pkg.version);
        !available.iter().any(|file| file.starts_with(&prefix))
      })
      .map(|pkg| format!("{} {}", pkg.name, pkg.version))
      .collect(),
  )
}

/// Build one runtime image per environment file. Returns the image names.
///
/// Every environment file is checked against the channel before any image is
/// built.
pub async fn build_runtime_images(options: &ImageBuildOptions) -> Result<Vec<String>, ImageBuildError> {
  let channel = absolute(&options.local_conda_channel).map_err(|source| ImageBuildError::Staging {
    path: options.local_conda_channel.clone(),
    source,
  })?;
  if !channel.is_dir() {
    return Err(ImageBuildError::ChannelNotFound(options.local_conda_channel.clone()));
  }

  let mut env_files = Vec::new();
  for file in &options.conda_env_files {
    let file = absolute(file).unwrap_or_else(|_| file.clone());
    if !file.is_file() {
      return Err(ImageBuildError::EnvFileNotFound(file));
    }
    let missing = missing_packages(&channel, &file)?;
    if !missing.is_empty() {
      return Err(ImageBuildError::MissingPackages {
        env_file: file,
        packages: missing,
      });
    }
    env_files.push(file);
  }

  let tool = select_tool(options.container_tool.as_deref(), which_probe)?;

  let staging = channel.join(IMAGE_STAGING_DIR);
  let result = build_images(&tool, &channel, &staging, &env_files, &options.container_build_args).await;
  if let Err(e) = fs::remove_dir_all(&staging) {
    warn!(path = %staging.display(), error = %e, "failed to remove temporary image files");
  }
  result
}

async fn build_images(
  tool: &ContainerTool,
  channel: &Path,
  staging: &Path,
  env_files: &[PathBuf],
  build_args: &[String],
) -> Result<Vec<String>, ImageBuildError> {
  let staging_err = |source: std::io::Error| ImageBuildError::Staging {
    path: staging.to_path_buf(),
    source,
  };
  fs::create_dir_all(staging).map_err(staging_err)?;
  let dockerfile_path = staging.join("Dockerfile");
  fs::write(&dockerfile_path, dockerfile::runtime_dockerfile()).map_err(staging_err)?;

  let mut images = Vec::new();
  for env_file in env_files {
    let stem = env_file.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let runtime_file = format!("{}-runtime.yaml", stem);
    rewrite_local_channels(env_file, &staging.join(&runtime_file), &format!("file:/{}", RUNTIME_TARGET_DIR))?;

    let image = image_name(env_file)?;
    let cmd = Cmd::new(tool.program())
      .arg("build")
      .arg("-f")
      .arg(dockerfile_path.to_string_lossy())
      .arg("-t")
      .arg(image.as_str())
      .arg("--build-arg")
      .arg(format!("OPENCE_USER={}", RUNTIME_IMAGE_USER))
      .arg("--build-arg")
      .arg("LOCAL_CONDA_CHANNEL=./")
      .arg("--build-arg")
      .arg(format!("CONDA_ENV_FILE={}/{}", IMAGE_STAGING_DIR, runtime_file))
      .arg("--build-arg")
      .arg(format!("TARGET_DIR={}", RUNTIME_TARGET_DIR))
      .args(build_args.iter().cloned())
      .arg(channel.to_string_lossy());

    info!(image = %image, "building runtime image");
    cmd.run().await.map_err(|source| ImageBuildError::Build {
      image: image.clone(),
      source,
    })?;
    info!(image = %image, "runtime image built");
    images.push(image);
  }
  Ok(images)
}
