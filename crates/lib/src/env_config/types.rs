//! Schema of environment files.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

/// Treat an explicit YAML `null` the same as a missing key.
///
/// Selectors can strip every entry from a list, leaving `packages:` with no value.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
  D: Deserializer<'de>,
  T: Default + Deserialize<'de>,
{
  Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn default_true() -> bool {
  true
}

/// One environment file after rendering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvConfig {
  #[serde(default)]
  pub builder_version: Option<String>,
  #[serde(default, deserialize_with = "null_as_default")]
  pub imported_envs: Vec<String>,
  #[serde(default, deserialize_with = "null_as_default")]
  pub conda_build_configs: Vec<String>,
  #[serde(default, deserialize_with = "null_as_default")]
  pub channels: Vec<String>,
  #[serde(default)]
  pub git_tag_for_env: Option<String>,
  #[serde(default, deserialize_with = "null_as_default")]
  pub external_dependencies: Vec<String>,
  #[serde(default, deserialize_with = "null_as_default")]
  pub packages: Vec<PackageRef>,
}

/// A feedstock entry in an environment file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageRef {
  pub feedstock: String,
  #[serde(default)]
  pub git_tag: Option<String>,
  /// Subset of the feedstock's recipes to build; empty means all.
  #[serde(default, deserialize_with = "null_as_default")]
  pub recipes: Vec<String>,
  #[serde(default, deserialize_with = "null_as_default")]
  pub channels: Vec<String>,
  #[serde(default, deserialize_with = "null_as_default")]
  pub patches: Vec<String>,
  #[serde(default = "default_true")]
  pub runtime_package: bool,
  #[serde(default)]
  pub recipe_path: Option<String>,
}

/// Where an environment file came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EnvSource {
  File(PathBuf),
  Url(String),
}

impl EnvSource {
  /// Resolve `import` the way a relative link in this file would resolve.
  pub fn join(&self, import: &str) -> EnvSource {
    if crate::util::is_url(import) {
      return EnvSource::Url(import.to_string());
    }
    match self {
      EnvSource::File(path) => {
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let path = crate::util::expand_path(import, base);
        EnvSource::File(dunce::canonicalize(&path).unwrap_or(path))
      }
      EnvSource::Url(url) => {
        let base = url.rsplit_once('/').map(|(b, _)| b).unwrap_or(url);
        EnvSource::Url(format!("{}/{}", base, import.trim_start_matches("./")))
      }
    }
  }
}

impl fmt::Display for EnvSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EnvSource::File(path) => write!(f, "{}", path.display()),
      EnvSource::Url(url) => f.write_str(url),
    }
  }
}

/// An environment file together with where it was loaded from.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedEnv {
  pub source: EnvSource,
  pub config: EnvConfig,
}

impl LoadedEnv {
  /// Directory that relative paths inside this file resolve against.
  ///
  /// Remote files have no directory; the current directory is used.
  pub fn base_dir(&self) -> PathBuf {
    match &self.source {
      EnvSource::File(path) => path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(".")),
      EnvSource::Url(_) => PathBuf::from("."),
    }
  }
}
