//! Mapping a host command line onto the same command inside a build container.
//!
//! Only the project root (and an optional local-files directory) is mounted,
//! so every path argument is rewritten from its host location to the matching
//! location under the container's home. Nothing here touches the filesystem.

use std::path::{Component, Path, PathBuf};

use super::ContainerError;
use crate::consts::{CONTAINER_HOME, CONTAINER_LOCAL_FILES};
use crate::util::is_url;

/// Flags whose value is a path, or a comma separated list of paths.
const PATH_FLAGS: &[&str] = &[
  "--output_folder",
  "--repository_folder",
  "--conda_build_configs",
  "--local_src_dir",
  "--working_directory",
  "--recipe-config-file",
  "--recipe_config_file",
];

/// Host-only flags that take a value and are dropped.
const HOST_VALUE_FLAGS: &[&str] = &["--container_tool", "--container_build_args", "--jobs", "-j", "--local_files"];

/// Host-only switches that are dropped.
const HOST_SWITCHES: &[&str] = &["--container_build", "--docker_build"];

/// Other flags that take a value, passed through untouched.
const VALUE_FLAGS: &[&str] = &[
  "--channels",
  "--packages",
  "--python_versions",
  "--build_types",
  "--mpi_types",
  "--cuda_versions",
  "--git_location",
  "--git_tag_for_env",
  "--test_labels",
  "--conda_pkg_format",
  "--ppc_arch",
  "--recipes",
  "--debug_output_id",
];

/// Number of leading positionals that name the subcommand (`build env`).
const COMMAND_WORDS: usize = 2;

/// A bind mount from the host into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
  pub host: PathBuf,
  pub container: PathBuf,
}

/// The command to run inside the container and what it needs mounted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInvocation {
  /// Full command line, starting with the program name.
  pub args: Vec<String>,
  pub mounts: Vec<Mount>,
  pub workdir: PathBuf,
}

/// Translate `host_args` (without the program name) for a container that sees
/// `root` at `/home/builder/<root name>`.
///
/// Relative paths are resolved against `cwd`. `root` and `cwd` must be absolute.
pub fn plan_container_invocation(
  host_args: &[String],
  root: &Path,
  cwd: &Path,
  local_files: Option<&Path>,
) -> Result<ContainerInvocation, ContainerError> {
  let root = normalize(root);
  let root_name = root.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
  let container_root = Path::new(CONTAINER_HOME).join(&root_name);
  let translate = |value: &str| -> Result<String, ContainerError> {
    let list: Result<Vec<String>, ContainerError> = value
      .split(',')
      .map(|item| {
        let item = item.trim();
        if item.is_empty() || is_url(item) {
          return Ok(item.to_string());
        }
        let rel = relative_to_root(&cwd.join(item), &root)?;
        Ok(container_root.join(rel).to_string_lossy().into_owned())
      })
      .collect();
    Ok(list?.join(","))
  };

  let mut args = vec!["open-ce".to_string()];
  let mut positionals = 0;
  let mut iter = host_args.iter();
  while let Some(arg) = iter.next() {
    let (flag, inline) = match arg.split_once('=') {
      Some((flag, value)) if arg.starts_with("--") => (flag, Some(value.to_string())),
      _ => (arg.as_str(), None),
    };

    if HOST_SWITCHES.contains(&flag) {
      continue;
    }
    let takes_value = PATH_FLAGS.contains(&flag) || HOST_VALUE_FLAGS.contains(&flag) || VALUE_FLAGS.contains(&flag);
    if !takes_value {
      if !arg.starts_with('-') {
        positionals += 1;
        if positionals > COMMAND_WORDS && looks_like_path(arg) {
          args.push(translate(arg)?);
          continue;
        }
      }
      args.push(arg.clone());
      continue;
    }

    let value = match inline {
      Some(value) => value,
      None => iter.next().cloned().ok_or_else(|| ContainerError::InvalidArguments {
        message: format!("{} requires a value", flag),
      })?,
    };
    if HOST_VALUE_FLAGS.contains(&flag) {
      continue;
    }
    args.push(flag.to_string());
    if PATH_FLAGS.contains(&flag) {
      args.push(translate(&value)?);
    } else {
      args.push(value);
    }
  }

  let workdir = container_root.join(relative_to_root(cwd, &root).unwrap_or_default());
  let mut mounts = vec![Mount {
    host: root.clone(),
    container: container_root,
  }];
  if let Some(local) = local_files {
    mounts.push(Mount {
      host: normalize(&cwd.join(local)),
      container: Path::new(CONTAINER_HOME).join(CONTAINER_LOCAL_FILES),
    });
  }

  Ok(ContainerInvocation { args, mounts, workdir })
}

/// Env file arguments that are bare names (`tensorflow-env`) are looked up
/// remotely, so they are passed through unchanged.
fn looks_like_path(arg: &str) -> bool {
  !is_url(arg) && (arg.contains('/') || arg.ends_with(".yaml") || arg.ends_with(".yml"))
}

fn relative_to_root(path: &Path, root: &Path) -> Result<PathBuf, ContainerError> {
  let path = normalize(path);
  path
    .strip_prefix(root)
    .map(Path::to_path_buf)
    .map_err(|_| ContainerError::PathOutsideRoot {
      path,
      root: root.to_path_buf(),
    })
}

/// Resolve `.` and `..` lexically.
fn normalize(path: &Path) -> PathBuf {
  let mut out = PathBuf::new();
  for component in path.components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir => {
        out.pop();
      }
      other => out.push(other.as_os_str()),
    }
  }
  out
}
