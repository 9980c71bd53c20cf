//! Loading of environment files and their imports.
//!
//! Environment files are rendered per variant, so the same file can list
//! different feedstocks for cpu and cuda builds. Imports are followed depth
//! first; an imported file is placed before the file that imports it and each
//! distinct file is loaded once.

mod types;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::consts::{DEFAULT_ENVS_BRANCH, DEFAULT_ENVS_REPO, OPEN_CE_VERSION};
use crate::render::{RenderError, render};
use crate::util::{is_url, version_satisfies};

pub use types::{EnvConfig, EnvSource, LoadedEnv, PackageRef};

#[derive(Debug, Error)]
pub enum EnvConfigError {
  #[error("environment file not found: {0}")]
  NotFound(PathBuf),

  #[error("failed to read environment file '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to download environment file '{url}': {message}")]
  Download { url: String, message: String },

  #[error("error in {file}: {source}")]
  Render {
    file: String,
    #[source]
    source: RenderError,
  },

  #[error("error in {file}: {source}")]
  Parse {
    file: String,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("error in {file}: An environment file needs to specify packages or import another environment file.")]
  MissingContent { file: String },

  #[error("error in {file}: builder_version '{spec}' does not match the current version {version}")]
  VersionMismatch { file: String, spec: String, version: String },
}

/// Settings that influence where environment files are found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvLoadOptions {
  /// Organization URL used to locate remote env files, e.g. `https://github.com/open-ce`.
  pub git_location: String,
  /// Branch or tag of the envs repository for remote env files.
  pub git_tag_for_env: Option<String>,
}

/// All environment files loaded for one variant, in load order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvironmentConfig {
  pub envs: Vec<LoadedEnv>,
}

impl EnvironmentConfig {
  /// Every package entry with the file it came from, first occurrence of a feedstock wins.
  pub fn packages(&self) -> Vec<(&PackageRef, &LoadedEnv)> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for env in &self.envs {
      for package in &env.config.packages {
        if seen.insert(package.feedstock.as_str()) {
          out.push((package, env));
        }
      }
    }
    out
  }

  pub fn channels(&self) -> Vec<String> {
    merged(self.envs.iter().flat_map(|e| e.config.channels.iter()))
  }

  pub fn external_dependencies(&self) -> Vec<String> {
    merged(self.envs.iter().flat_map(|e| e.config.external_dependencies.iter()))
  }

  /// Conda build config files, with local paths made absolute against their env file.
  pub fn conda_build_configs(&self) -> Vec<String> {
    merged(self.envs.iter().flat_map(|env| {
      let base = env.base_dir();
      env.config.conda_build_configs.iter().map(move |c| {
        if is_url(c) {
          c.clone()
        } else {
          crate::util::expand_path(c, &base).to_string_lossy().into_owned()
        }
      })
    }))
  }

  /// The first `git_tag_for_env` any loaded file sets.
  pub fn git_tag_for_env(&self) -> Option<&str> {
    self.envs.iter().find_map(|e| e.config.git_tag_for_env.as_deref())
  }
}

fn merged<I, S>(items: I) -> Vec<String>
where
  I: IntoIterator<Item = S>,
  S: AsRef<str>,
{
  let mut seen = HashSet::new();
  items
    .into_iter()
    .filter_map(|s| {
      let s = s.as_ref().to_string();
      seen.insert(s.clone()).then_some(s)
    })
    .collect()
}

/// Loads environment files, caching downloads across variants.
pub struct EnvLoader {
  options: EnvLoadOptions,
  downloads: HashMap<String, String>,
}

struct Frame {
  source: EnvSource,
  config: EnvConfig,
  next_import: usize,
}

impl EnvLoader {
  pub fn new(options: EnvLoadOptions) -> Self {
    Self {
      options,
      downloads: HashMap::new(),
    }
  }

  /// Decide where a root env file argument lives.
  ///
  /// A local path that does not exist falls back to the envs repository of
  /// the configured git organization.
  pub fn resolve_root(&self, arg: &str) -> EnvSource {
    if is_url(arg) {
      return EnvSource::Url(arg.to_string());
    }
    let path = crate::util::expand_path(arg, &std::env::current_dir().unwrap_or_default());
    if path.exists() {
      return EnvSource::File(dunce::canonicalize(&path).unwrap_or(path));
    }

    let organization = self.options.git_location.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
    let branch = self.options.git_tag_for_env.as_deref().unwrap_or(DEFAULT_ENVS_BRANCH);
    let file_name = Path::new(arg).file_name().map(|f| f.to_string_lossy().into_owned()).unwrap_or_default();
    let file_name = if Path::new(&file_name).extension().is_some() {
      file_name
    } else {
      format!("{}.yaml", file_name)
    };
    let url = format!(
      "https://raw.githubusercontent.com/{}/{}/{}/envs/{}",
      organization, DEFAULT_ENVS_REPO, branch, file_name
    );
    info!(file = arg, url = %url, "unable to find env file locally, using remote");
    EnvSource::Url(url)
  }

  /// Load `roots` and everything they import, rendered with `vars`.
  pub async fn load(
    &mut self,
    roots: &[String],
    vars: &BTreeMap<String, String>,
  ) -> Result<EnvironmentConfig, EnvConfigError> {
    let mut seen: HashSet<EnvSource> = HashSet::new();
    let mut envs = Vec::new();

    for root in roots {
      let source = self.resolve_root(root);
      if !seen.insert(source.clone()) {
        continue;
      }
      let config = self.load_one(&source, vars).await?;
      let mut stack = vec![Frame {
        source,
        config,
        next_import: 0,
      }];

      while let Some(top) = stack.last_mut() {
        let import = top.config.imported_envs.get(top.next_import).map(|i| top.source.join(i));
        top.next_import += 1;

        match import {
          Some(import) => {
            if seen.insert(import.clone()) {
              debug!(import = %import, "loading imported env file");
              let config = self.load_one(&import, vars).await?;
              stack.push(Frame {
                source: import,
                config,
                next_import: 0,
              });
            }
          }
          None => {
            if let Some(done) = stack.pop() {
              envs.push(LoadedEnv {
                source: done.source,
                config: done.config,
              });
            }
          }
        }
      }
    }

    Ok(EnvironmentConfig { envs })
  }

  async fn load_one(&mut self, source: &EnvSource, vars: &BTreeMap<String, String>) -> Result<EnvConfig, EnvConfigError> {
    let text = self.read(source).await?;
    let file = source.to_string();
    parse_env_config(&text, &file, vars)
  }

  async fn read(&mut self, source: &EnvSource) -> Result<String, EnvConfigError> {
    match source {
      EnvSource::File(path) => {
        if !path.exists() {
          return Err(EnvConfigError::NotFound(path.clone()));
        }
        tokio::fs::read_to_string(path).await.map_err(|e| EnvConfigError::Read {
          path: path.clone(),
          source: e,
        })
      }
      EnvSource::Url(url) => {
        if let Some(text) = self.downloads.get(url) {
          return Ok(text.clone());
        }
        let text = download(url).await?;
        self.downloads.insert(url.clone(), text.clone());
        Ok(text)
      }
    }
  }
}

async fn download(url: &str) -> Result<String, EnvConfigError> {
  info!(url = %url, "downloading env file");
  let response = reqwest::get(url).await.map_err(|e| EnvConfigError::Download {
    url: url.to_string(),
    message: e.to_string(),
  })?;
  if !response.status().is_success() {
    return Err(EnvConfigError::Download {
      url: url.to_string(),
      message: format!("HTTP {}", response.status()),
    });
  }
  response.text().await.map_err(|e| EnvConfigError::Download {
    url: url.to_string(),
    message: e.to_string(),
  })
}

/// Render and validate one environment file.
pub fn parse_env_config(text: &str, file: &str, vars: &BTreeMap<String, String>) -> Result<EnvConfig, EnvConfigError> {
  // A permissive first pass so a version mismatch is reported even when the
  // file uses variables this version does not know.
  let loose = render(text, vars, true).map_err(|source| EnvConfigError::Render {
    file: file.to_string(),
    source,
  })?;
  let loose: serde_yaml::Value = serde_yaml::from_str(&loose).map_err(|source| EnvConfigError::Parse {
    file: file.to_string(),
    source,
  })?;
  match loose.get("builder_version").and_then(|v| v.as_str()) {
    Some(spec) if !version_satisfies(OPEN_CE_VERSION, spec) => {
      return Err(EnvConfigError::VersionMismatch {
        file: file.to_string(),
        spec: spec.to_string(),
        version: OPEN_CE_VERSION.to_string(),
      });
    }
    Some(_) => {}
    None => warn!(file, "environment file does not specify builder_version"),
  }

  let rendered = render(text, vars, false).map_err(|source| EnvConfigError::Render {
    file: file.to_string(),
    source,
  })?;
  let value: serde_yaml::Value = serde_yaml::from_str(&rendered).map_err(|source| EnvConfigError::Parse {
    file: file.to_string(),
    source,
  })?;
  if value.get("packages").is_none() && value.get("imported_envs").is_none() {
    return Err(EnvConfigError::MissingContent { file: file.to_string() });
  }
  serde_yaml::from_value(value).map_err(|source| EnvConfigError::Parse {
    file: file.to_string(),
    source,
  })
}
