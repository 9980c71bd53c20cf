//! Containerized builds.
//!
//! A container build builds a builder image, then re-runs the same
//! `open-ce build ...` command inside it with path arguments rewritten
//! (see [`plan_container_invocation`]).

pub mod dockerfile;
pub mod plan;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::consts::{BUILDER_IMAGE_PREFIX, CONTAINER_TOOLS};
use crate::util::{Cmd, CmdError};
use crate::variant::{BuildType, VariantMatrix};

pub use plan::{ContainerInvocation, Mount, plan_container_invocation};

#[derive(Debug, Error)]
pub enum ContainerError {
  #[error("{}", tool_unavailable(.tool))]
  ToolUnavailable { tool: Option<String> },

  #[error("'{path}' is outside of '{root}'; only files under the project root are visible to a container build")]
  PathOutsideRoot { path: PathBuf, root: PathBuf },

  #[error("only one cuda version can be built with a container build at a time, got {}", .versions.join(", "))]
  TooManyCudaVersions { versions: Vec<String> },

  #[error("invalid arguments for a container build: {message}")]
  InvalidArguments { message: String },

  #[error("failed to prepare container build context '{path}': {source}")]
  Context {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("container {step} failed: {source}")]
  Command {
    step: &'static str,
    #[source]
    source: CmdError,
  },
}

fn tool_unavailable(tool: &Option<String>) -> String {
  match tool {
    Some(tool) => format!("container tool '{}' was not found on PATH", tool),
    None => format!("no container tool found on the system (tried {})", CONTAINER_TOOLS.join(", ")),
  }
}

/// The engine used for container builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerTool {
  Podman,
  Docker,
  Other(PathBuf),
}

impl ContainerTool {
  pub fn program(&self) -> String {
    match self {
      ContainerTool::Podman => "podman".to_string(),
      ContainerTool::Docker => "docker".to_string(),
      ContainerTool::Other(path) => path.to_string_lossy().into_owned(),
    }
  }
}

impl fmt::Display for ContainerTool {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.program())
  }
}

/// Look `name` up on PATH.
pub fn which_probe(name: &str) -> Option<PathBuf> {
  which::which(name).ok()
}

/// Pick the container engine.
///
/// An explicit tool is used as given but must be found by `probe`. Without
/// one, podman is preferred over docker.
pub fn select_tool<F>(explicit: Option<&str>, probe: F) -> Result<ContainerTool, ContainerError>
where
  F: Fn(&str) -> Option<PathBuf>,
{
  if let Some(name) = explicit.map(str::trim).filter(|n| !n.is_empty()) {
    let found = probe(name).ok_or_else(|| ContainerError::ToolUnavailable {
      tool: Some(name.to_string()),
    })?;
    return Ok(match name {
      "podman" => ContainerTool::Podman,
      "docker" => ContainerTool::Docker,
      _ => ContainerTool::Other(found),
    });
  }

  for name in CONTAINER_TOOLS {
    if probe(name).is_some() {
      debug!(tool = name, "selected container tool");
      return Ok(if *name == "podman" {
        ContainerTool::Podman
      } else {
        ContainerTool::Docker
      });
    }
  }
  Err(ContainerError::ToolUnavailable { tool: None })
}

/// Split `--container_build_args` into separate arguments, honouring quotes.
pub fn split_build_args(args: &str) -> Vec<String> {
  let mut out = Vec::new();
  let mut current = String::new();
  let mut quote: Option<char> = None;
  let mut in_word = false;
  for c in args.chars() {
    match (quote, c) {
      (Some(q), c) if c == q => quote = None,
      (Some(_), c) => current.push(c),
      (None, '"' | '\'') => {
        quote = Some(c);
        in_word = true;
      }
      (None, c) if c.is_whitespace() => {
        if in_word {
          out.push(std::mem::take(&mut current));
          in_word = false;
        }
      }
      (None, c) => {
        current.push(c);
        in_word = true;
      }
    }
  }
  if in_word {
    out.push(current);
  }
  out
}

/// The image a containerized build runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderImage {
  pub build_type: BuildType,
  pub cuda: Option<String>,
}

impl BuilderImage {
  /// A cuda image when the matrix includes cuda builds, otherwise a cpu image.
  pub fn for_matrix(matrix: &VariantMatrix) -> Result<Self, ContainerError> {
    let cudas = matrix.cuda_versions();
    if cudas.len() > 1 {
      return Err(ContainerError::TooManyCudaVersions {
        versions: cudas.to_vec(),
      });
    }
    Ok(match cudas.first() {
      Some(cuda) => Self {
        build_type: BuildType::Cuda,
        cuda: Some(cuda.clone()),
      },
      None => Self {
        build_type: BuildType::Cpu,
        cuda: None,
      },
    })
  }

  /// `open-ce-builder-<bt>[-cuda<ver>]`.
  pub fn name(&self) -> String {
    match &self.cuda {
      Some(cuda) => format!("{}-{}-cuda{}", BUILDER_IMAGE_PREFIX, self.build_type, cuda),
      None => format!("{}-{}", BUILDER_IMAGE_PREFIX, self.build_type),
    }
  }
}

/// Host-side settings for a container build.
#[derive(Debug, Clone)]
pub struct ContainerSettings {
  pub tool: ContainerTool,
  /// Extra arguments for `<tool> build`.
  pub build_args: Vec<String>,
  /// The `open-ce` executable copied into the builder image.
  pub executable: PathBuf,
}

/// The `<tool> build` command for the builder image in `context`.
pub fn builder_build_command(settings: &ContainerSettings, image: &BuilderImage, context: &Path) -> Cmd {
  Cmd::new(settings.tool.program())
    .arg("build")
    .arg("-f")
    .arg(context.join("Dockerfile").to_string_lossy())
    .arg("-t")
    .arg(image.name())
    .args(settings.build_args.iter().cloned())
    .arg(context.to_string_lossy())
}

/// The `<tool> run` command that re-invokes the build inside `image`.
pub fn builder_run_command(settings: &ContainerSettings, image: &BuilderImage, invocation: &ContainerInvocation) -> Cmd {
  let mut cmd = Cmd::new(settings.tool.program()).arg("run").arg("--rm");
  for mount in &invocation.mounts {
    cmd = cmd
      .arg("-v")
      .arg(format!("{}:{}:Z", mount.host.display(), mount.container.display()));
  }
  cmd
    .arg("-w")
    .arg(invocation.workdir.to_string_lossy())
    .arg(image.name())
    .args(invocation.args.iter().cloned())
}

/// Build the builder image and run `invocation` in it.
pub async fn run_container_build(
  settings: &ContainerSettings,
  image: &BuilderImage,
  invocation: &ContainerInvocation,
) -> Result<(), ContainerError> {
  let context = tempfile::Builder::new()
    .prefix("open-ce-container-")
    .tempdir()
    .map_err(|source| ContainerError::Context {
      path: std::env::temp_dir(),
      source,
    })?;
  let ctx = context.path();
  let context_err = |path: PathBuf| move |source: std::io::Error| ContainerError::Context { path, source };

  let dockerfile_path = ctx.join("Dockerfile");
  fs::write(&dockerfile_path, dockerfile::builder_dockerfile(image.build_type, image.cuda.as_deref()))
    .map_err(context_err(dockerfile_path.clone()))?;
  fs::copy(&settings.executable, ctx.join("open-ce")).map_err(context_err(settings.executable.clone()))?;

  info!(image = %image.name(), tool = %settings.tool, "building builder image");
  builder_build_command(settings, image, ctx)
    .run()
    .await
    .map_err(|source| ContainerError::Command {
      step: "image build",
      source,
    })?;

  info!(image = %image.name(), workdir = %invocation.workdir.display(), "running build in container");
  builder_run_command(settings, image, invocation)
    .run()
    .await
    .map_err(|source| ContainerError::Command { step: "run", source })?;
  Ok(())
}
