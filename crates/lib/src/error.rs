//! The error every `open-ce` operation can end in.

use thiserror::Error;

use crate::container::ContainerError;
use crate::env_config::EnvConfigError;
use crate::env_file::EnvFileError;
use crate::execute::BuildError;
use crate::feedstock::{FetchError, RecipeError};
use crate::graph::GraphError;
use crate::image::ImageBuildError;
use crate::test_runner::TestRunError;
use crate::variant::VariantError;

#[derive(Debug, Error)]
pub enum OpenCeError {
  #[error(transparent)]
  EnvConfig(#[from] EnvConfigError),

  #[error(transparent)]
  Variant(#[from] VariantError),

  #[error(transparent)]
  Recipe(#[from] RecipeError),

  #[error(transparent)]
  Fetch(#[from] FetchError),

  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error(transparent)]
  Build(#[from] BuildError),

  #[error("build failed: {summary}")]
  BuildFailed { summary: String },

  #[error(transparent)]
  Container(#[from] ContainerError),

  #[error(transparent)]
  Image(#[from] ImageBuildError),

  #[error(transparent)]
  Test(#[from] TestRunError),

  #[error(transparent)]
  EnvFile(#[from] EnvFileError),

  #[error("conda build config file '{0}' does not exist")]
  MissingBuildConfig(String),

  #[error("{0}")]
  InvalidArguments(String),
}

/// Coarse classification of an [`OpenCeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  Config,
  Resolution,
  Build,
  Container,
  Image,
  Test,
}

impl OpenCeError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      OpenCeError::EnvConfig(_)
      | OpenCeError::Variant(_)
      | OpenCeError::Recipe(_)
      | OpenCeError::Fetch(_)
      | OpenCeError::MissingBuildConfig(_)
      | OpenCeError::InvalidArguments(_) => ErrorKind::Config,
      OpenCeError::Graph(GraphError::Env(_) | GraphError::Fetch(_) | GraphError::Recipe(_)) => ErrorKind::Config,
      OpenCeError::Graph(_) => ErrorKind::Resolution,
      OpenCeError::Build(_) | OpenCeError::BuildFailed { .. } | OpenCeError::EnvFile(_) => ErrorKind::Build,
      OpenCeError::Container(_) => ErrorKind::Container,
      OpenCeError::Image(_) => ErrorKind::Image,
      OpenCeError::Test(_) => ErrorKind::Test,
    }
  }
}
