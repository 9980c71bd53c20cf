//! Conda environment files.
//!
//! One file is emitted per variant of the matrix, listing the locally built
//! runtime packages, their run requirements and the environment's external
//! dependencies. The files are emitted before anything is built, so a
//! plan-only run still produces them, and rewritten only when their content
//! changes.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::consts::{
  CONDA_ENV_FILENAME_PREFIX, OPEN_CE_LOCAL_PACKAGES_HEADER, OPEN_CE_VARIANT_HEADER, OPEN_CE_VERSION,
  OPEN_CE_VERSION_HEADER,
};
use crate::feedstock::package_name;
use crate::graph::{BuildGraph, VariantEnv};
use crate::util::{absolute, write_if_changed};
use crate::variant::BuildVariant;

static VERSION_SPEC: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^([\w-]+)([\s=<>]*)(\d[.\d*\w*]*)([=\s]*.*)").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

#[derive(Debug, Error)]
pub enum EnvFileError {
  #[error("failed to write conda environment file '{path}': {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to read conda environment file '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("malformed conda environment file '{path}': {source}")]
  Yaml {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },
}

/// The YAML body of an environment file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CondaEnv {
  pub name: String,
  pub channels: Vec<String>,
  pub dependencies: Vec<String>,
}

/// A package built into the local channel, as listed in the local-packages header.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalPackage {
  pub name: String,
  pub version: String,
}

/// An environment file emitted for one variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedEnvFile {
  pub path: PathBuf,
  pub variant: BuildVariant,
  /// False when the file already had identical content.
  pub changed: bool,
}

/// `open-ce-conda-env-py<py>-<bt>-<mpi>[-<cuda>].yaml`.
///
/// The cuda version is only part of the name when `cuda_in_name` is set,
/// which the caller does when the matrix holds more than one cuda version.
pub fn env_file_name(variant: &BuildVariant, cuda_in_name: bool) -> String {
  format!("{}{}.yaml", CONDA_ENV_FILENAME_PREFIX, env_file_variant(variant, cuda_in_name))
}

fn env_file_variant(variant: &BuildVariant, cuda_in_name: bool) -> String {
  let mut s = format!("py{}-{}-{}", variant.python, variant.build_type, variant.mpi_type);
  if cuda_in_name && let Some(cuda) = &variant.cuda {
    s.push('-');
    s.push_str(cuda);
  }
  s
}

/// Add `.*` to an exact version so conda accepts any build of it.
///
/// `numpy 1.19` becomes `numpy 1.19.*` and `pack==1.0` becomes `pack==1.0.*`;
/// ranges, already wildcarded versions and bare names are left alone.
pub fn generalize_version(spec: &str) -> String {
  let spec = WHITESPACE.replace_all(spec, " ").into_owned();
  let Some(caps) = VERSION_SPEC.captures(&spec) else {
    return spec;
  };
  let name = &caps[1];
  let operator = &caps[2];
  let version = &caps[3];
  let build = &caps[4];

  let exact = matches!(operator.trim(), "==" | "");
  let ends_with_digit = version.chars().last().is_some_and(|c| c.is_ascii_digit());
  if !operator.is_empty() && exact && ends_with_digit && !version.ends_with(".*") {
    format!("{}{}{}.*{}", name, operator, version, build)
  } else {
    spec
  }
}

fn has_constraint(spec: &str) -> bool {
  spec.trim() != package_name(spec)
}

/// Deduplicate by package name. The first spec with a constraint wins; a bare
/// name survives only when no spec for that package carries one.
pub fn installable_packages<I>(specs: I) -> Vec<String>
where
  I: IntoIterator<Item = String>,
{
  let mut out: Vec<String> = Vec::new();
  for spec in specs {
    let spec = spec.trim().to_string();
    let name = package_name(&spec).to_string();
    if name.is_empty() {
      continue;
    }
    match out.iter().position(|s| package_name(s) == name) {
      Some(i) if !has_constraint(&out[i]) && has_constraint(&spec) => out[i] = spec,
      Some(_) => {}
      None => out.push(spec),
    }
  }
  out
}

/// Build the environment file for one variant of `graph`.
pub fn render_env_file(graph: &BuildGraph, env: &VariantEnv, output_folder: &Path, cuda_in_name: bool) -> String {
  let units: Vec<_> = graph.units_for(&env.variant).collect();
  let excluded: HashSet<&str> = units
    .iter()
    .filter(|u| !u.runtime_package)
    .flat_map(|u| u.output_names())
    .collect();

  let mut local = Vec::new();
  let mut specs = Vec::new();
  for unit in units.iter().filter(|u| u.runtime_package) {
    for output in &unit.outputs {
      local.push(format!("{} {}", output.name, output.version));
      specs.push(format!("{} {}", output.name, output.version));
    }
  }
  specs.extend(units.iter().filter(|u| u.runtime_package).flat_map(|u| u.run_dependencies.iter().cloned()));
  specs.extend(env.external_dependencies.iter().cloned());

  let mut dependencies = installable_packages(
    specs
      .into_iter()
      .filter(|s| !excluded.contains(package_name(s)))
      .map(|s| generalize_version(&s)),
  );
  dependencies.sort();

  let mut channels = vec![format!("file:/{}", output_folder.display())];
  for channel in &env.channels {
    if !channels.contains(channel) {
      channels.push(channel.clone());
    }
  }
  if !channels.iter().any(|c| c == "defaults") {
    channels.push("defaults".to_string());
  }

  let body = CondaEnv {
    name: format!(
      "{}{}",
      CONDA_ENV_FILENAME_PREFIX,
      env_file_variant(&env.variant, cuda_in_name)
    ),
    channels,
    dependencies,
  };

  let mut text = String::new();
  text.push_str(&format!("{}{}\n", OPEN_CE_VERSION_HEADER, OPEN_CE_VERSION));
  text.push_str(&format!("{}{}\n", OPEN_CE_VARIANT_HEADER, env.variant.variant_string()));
  text.push_str(&format!("{}{}\n", OPEN_CE_LOCAL_PACKAGES_HEADER, local.join(",")));
  // CondaEnv only holds strings, so serialization cannot fail.
  text.push_str(&serde_yaml::to_string(&body).unwrap_or_default());
  text
}

/// Write one environment file per variant into `output_folder`.
pub fn emit_env_files(
  graph: &BuildGraph,
  output_folder: &Path,
  cuda_in_name: bool,
) -> Result<Vec<EmittedEnvFile>, EnvFileError> {
  let output_folder = absolute(output_folder).map_err(|source| EnvFileError::Write {
    path: output_folder.to_path_buf(),
    source,
  })?;

  let mut emitted = Vec::new();
  for env in &graph.variant_envs {
    let path = output_folder.join(env_file_name(&env.variant, cuda_in_name));
    let text = render_env_file(graph, env, &output_folder, cuda_in_name);
    let changed = write_if_changed(&path, &text).map_err(|source| EnvFileError::Write {
      path: path.clone(),
      source,
    })?;
    if changed {
      info!(path = %path.display(), variant = %env.variant, "wrote conda environment file");
    } else {
      debug!(path = %path.display(), "conda environment file unchanged");
    }
    emitted.push(EmittedEnvFile {
      path,
      variant: env.variant.clone(),
      changed,
    });
  }
  Ok(emitted)
}

fn read(path: &Path) -> Result<String, EnvFileError> {
  fs::read_to_string(path).map_err(|source| EnvFileError::Read {
    path: path.to_path_buf(),
    source,
  })
}

fn header_value<'a>(text: &'a str, header: &str) -> Option<&'a str> {
  text.lines().find_map(|line| line.strip_prefix(header)).map(str::trim)
}

/// The variant string recorded in an environment file, if any.
pub fn variant_of_env_file(path: &Path) -> Result<Option<String>, EnvFileError> {
  Ok(header_value(&read(path)?, OPEN_CE_VARIANT_HEADER).map(str::to_string))
}

/// The tool version recorded in an environment file, or `open-ce` when absent.
pub fn open_ce_version_of_env_file(path: &Path) -> Result<String, EnvFileError> {
  Ok(
    header_value(&read(path)?, OPEN_CE_VERSION_HEADER)
      .filter(|v| !v.is_empty())
      .unwrap_or("open-ce")
      .to_string(),
  )
}

/// Locally built packages listed in an environment file's header.
pub fn local_packages_of_env_file(path: &Path) -> Result<Vec<LocalPackage>, EnvFileError> {
  let text = read(path)?;
  let Some(list) = header_value(&text, OPEN_CE_LOCAL_PACKAGES_HEADER) else {
    return Ok(Vec::new());
  };
  Ok(
    list
      .split(',')
      .filter_map(|entry| {
        let mut parts = entry.split_whitespace();
        let name = parts.next()?;
        Some(LocalPackage {
          name: name.to_string(),
          version: parts.next().unwrap_or_default().to_string(),
        })
      })
      .collect(),
  )
}

/// Copy the environment file at `src` to `dest`, pointing every `file:` channel at `channel`.
///
/// Header comments are carried over unchanged.
pub fn rewrite_local_channels(src: &Path, dest: &Path, channel: &str) -> Result<(), EnvFileError> {
  let text = read(src)?;
  let mut env: CondaEnv = serde_yaml::from_str(&text).map_err(|source| EnvFileError::Yaml {
    path: src.to_path_buf(),
    source,
  })?;
  for c in env.channels.iter_mut().filter(|c| c.starts_with("file:")) {
    *c = channel.to_string();
  }

  let mut out: String = text.lines().filter(|l| l.starts_with('#')).map(|l| format!("{}\n", l)).collect();
  out.push_str(&serde_yaml::to_string(&env).map_err(|source| EnvFileError::Yaml {
    path: src.to_path_buf(),
    source,
  })?);
  fs::write(dest, out).map_err(|source| EnvFileError::Write {
    path: dest.to_path_buf(),
    source,
  })
}
