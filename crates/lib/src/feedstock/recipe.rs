//! Recipe configuration (`config/build-config.yaml`) and recipe metadata (`meta.yaml`).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;
use thiserror::Error;

use crate::consts::DEFAULT_RECIPE_CONFIG_FILE;
use crate::render::{RenderError, render};

#[derive(Debug, Error)]
pub enum RecipeError {
  #[error("unable to open provided config file: {0}")]
  ConfigNotFound(PathBuf),

  #[error("failed to read '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("error in {file}: {source}")]
  Render {
    file: PathBuf,
    #[source]
    source: RenderError,
  },

  #[error("error in {file}: {source}")]
  Parse {
    file: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("no meta.yaml found in recipe directory {0}")]
  MetaNotFound(PathBuf),

  #[error("recipe in {0} does not declare a package name")]
  MissingName(PathBuf),

  #[error("local_src_dir path \"{0}\" specified doesn't exist")]
  LocalSrcDirNotFound(PathBuf),
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
  D: Deserializer<'de>,
  T: Default + Deserialize<'de>,
{
  Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// One entry of a feedstock's recipe config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RecipeEntry {
  pub name: String,
  pub path: String,
  #[serde(default)]
  pub local_src_dir: Option<String>,
}

/// Contents of `config/build-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RecipeConfig {
  #[serde(default, deserialize_with = "null_as_default")]
  pub recipes: Vec<RecipeEntry>,
  #[serde(default, deserialize_with = "null_as_default")]
  pub channels: Vec<String>,
  /// File the config was read from, if any. Relative `local_src_dir` values resolve against it.
  #[serde(skip)]
  pub source: Option<PathBuf>,
}

impl RecipeConfig {
  /// Load the recipe config of `feedstock_dir`.
  ///
  /// `recipe_path` names a single recipe directory and bypasses the config.
  /// An explicit `config_file` must exist; the default one may be absent, in
  /// which case the feedstock holds one recipe in `recipe/`.
  pub fn load(
    feedstock_dir: &Path,
    config_file: Option<&Path>,
    recipe_path: Option<&str>,
    vars: &BTreeMap<String, String>,
  ) -> Result<Self, RecipeError> {
    let dir_name = feedstock_dir
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_default();
    let single = |path: &str| RecipeConfig {
      recipes: vec![RecipeEntry {
        name: dir_name.clone(),
        path: path.to_string(),
        local_src_dir: None,
      }],
      channels: Vec::new(),
      source: None,
    };

    if let Some(recipe_path) = recipe_path {
      return Ok(single(recipe_path));
    }

    let file = match config_file {
      Some(file) => {
        let file = if file.is_absolute() { file.to_path_buf() } else { feedstock_dir.join(file) };
        if !file.exists() {
          return Err(RecipeError::ConfigNotFound(file));
        }
        file
      }
      None => {
        let file = feedstock_dir.join(DEFAULT_RECIPE_CONFIG_FILE);
        if !file.exists() {
          return Ok(single("recipe"));
        }
        file
      }
    };

    let text = fs::read_to_string(&file).map_err(|source| RecipeError::Read {
      path: file.clone(),
      source,
    })?;
    let rendered = render(&text, vars, true).map_err(|source| RecipeError::Render {
      file: file.clone(),
      source,
    })?;
    let mut config: RecipeConfig = if rendered.trim().is_empty() {
      RecipeConfig::default()
    } else {
      serde_yaml::from_str(&rendered).map_err(|source| RecipeError::Parse {
        file: file.clone(),
        source,
      })?
    };
    config.source = Some(file);
    Ok(config)
  }

  /// Resolve the local source directory for `entry`.
  ///
  /// A command-line value wins over the config; config values are relative to the config file.
  pub fn local_src_dir(&self, entry: &RecipeEntry, override_dir: Option<&Path>) -> Result<Option<PathBuf>, RecipeError> {
    let dir = match (override_dir, &entry.local_src_dir) {
      (Some(dir), _) => dir.to_path_buf(),
      (None, Some(dir)) => {
        let base = self
          .source
          .as_deref()
          .and_then(Path::parent)
          .map(Path::to_path_buf)
          .unwrap_or_default();
        crate::util::expand_path(dir, &base)
      }
      (None, None) => return Ok(None),
    };
    if !dir.exists() {
      return Err(RecipeError::LocalSrcDirNotFound(dir));
    }
    Ok(Some(dir))
  }
}

/// Name part of a dependency spec: `numpy >=1.19` and `numpy>=1.19` both give `numpy`.
pub fn package_name(spec: &str) -> &str {
  let first = spec.split_whitespace().next().unwrap_or("");
  let end = first.find(['=', '<', '>', '!', '~']).unwrap_or(first.len());
  &first[..end]
}

/// One package a recipe produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeOutput {
  pub name: String,
  pub version: String,
  pub run_requirements: Vec<String>,
}

/// The parts of a rendered `meta.yaml` that drive scheduling and env files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipeMeta {
  pub name: String,
  pub version: String,
  pub build_number: u64,
  pub build_string: Option<String>,
  /// `build.skip` rendered true for this variant.
  pub skip: bool,
  pub outputs: Vec<RecipeOutput>,
  /// Every requirement spec across build, host, run, test and all outputs.
  pub requirements: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawMeta {
  #[serde(default)]
  package: Option<RawPackage>,
  #[serde(default)]
  build: Option<RawBuild>,
  #[serde(default)]
  requirements: Option<Value>,
  #[serde(default)]
  test: Option<RawTest>,
  #[serde(default, deserialize_with = "null_as_default")]
  outputs: Vec<RawOutput>,
}

#[derive(Debug, Default, Deserialize)]
struct RawPackage {
  #[serde(default)]
  name: Option<String>,
  #[serde(default)]
  version: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawBuild {
  #[serde(default)]
  number: Option<Value>,
  #[serde(default)]
  skip: Option<Value>,
  #[serde(default)]
  string: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawTest {
  #[serde(default, deserialize_with = "null_as_default")]
  requires: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawOutput {
  name: String,
  #[serde(default)]
  version: Option<Value>,
  #[serde(default)]
  requirements: Option<Value>,
  #[serde(default)]
  test: Option<RawTest>,
}

fn scalar(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    _ => None,
  }
}

fn truthy(value: &Value) -> bool {
  match value {
    Value::Bool(b) => *b,
    Value::String(s) => matches!(s.as_str(), "true" | "True" | "yes"),
    Value::Number(n) => n.as_u64().is_some_and(|n| n != 0),
    _ => false,
  }
}

fn spec_list(value: Option<&Value>) -> Vec<String> {
  match value {
    Some(Value::Sequence(items)) => items.iter().filter_map(scalar).filter(|s| !s.trim().is_empty()).collect(),
    _ => Vec::new(),
  }
}

/// `(all, run)` specs of a requirements block.
///
/// Output requirements may be a bare list, which conda-build treats as run requirements.
fn requirement_specs(requirements: Option<&Value>) -> (Vec<String>, Vec<String>) {
  match requirements {
    Some(list @ Value::Sequence(_)) => {
      let run = spec_list(Some(list));
      (run.clone(), run)
    }
    Some(map @ Value::Mapping(_)) => {
      let mut all = Vec::new();
      for key in ["build", "host", "run"] {
        all.extend(spec_list(map.get(key)));
      }
      (all, spec_list(map.get("run")))
    }
    _ => (Vec::new(), Vec::new()),
  }
}

impl RecipeMeta {
  /// Render and parse `<recipe_dir>/meta.yaml` for a variant.
  pub fn load(recipe_dir: &Path, vars: &BTreeMap<String, String>) -> Result<Self, RecipeError> {
    let file = ["meta.yaml", "meta.yml"]
      .iter()
      .map(|f| recipe_dir.join(f))
      .find(|p| p.exists())
      .ok_or_else(|| RecipeError::MetaNotFound(recipe_dir.to_path_buf()))?;
    let text = fs::read_to_string(&file).map_err(|source| RecipeError::Read {
      path: file.clone(),
      source,
    })?;
    Self::parse(&text, &file, vars)
  }

  pub fn parse(text: &str, file: &Path, vars: &BTreeMap<String, String>) -> Result<Self, RecipeError> {
    let rendered = render(text, vars, true).map_err(|source| RecipeError::Render {
      file: file.to_path_buf(),
      source,
    })?;
    let raw: RawMeta = serde_yaml::from_str(&rendered).map_err(|source| RecipeError::Parse {
      file: file.to_path_buf(),
      source,
    })?;

    let package = raw.package.unwrap_or_default();
    let name = package
      .name
      .filter(|n| !n.trim().is_empty())
      .ok_or_else(|| RecipeError::MissingName(file.to_path_buf()))?;
    let version = package.version.as_ref().and_then(scalar).unwrap_or_default();
    let build = raw.build.unwrap_or_default();

    let (mut requirements, top_run) = requirement_specs(raw.requirements.as_ref());
    if let Some(test) = &raw.test {
      requirements.extend(test.requires.iter().filter_map(scalar));
    }

    let outputs = if raw.outputs.is_empty() {
      vec![RecipeOutput {
        name: name.clone(),
        version: version.clone(),
        run_requirements: top_run,
      }]
    } else {
      raw
        .outputs
        .iter()
        .map(|out| {
          let (all, run) = requirement_specs(out.requirements.as_ref());
          requirements.extend(all);
          if let Some(test) = &out.test {
            requirements.extend(test.requires.iter().filter_map(scalar));
          }
          RecipeOutput {
            name: out.name.clone(),
            version: out.version.as_ref().and_then(scalar).unwrap_or_else(|| version.clone()),
            run_requirements: run,
          }
        })
        .collect()
    };

    Ok(RecipeMeta {
      name,
      version,
      build_number: build.number.as_ref().and_then(scalar).and_then(|n| n.parse().ok()).unwrap_or(0),
      build_string: build.string.as_ref().and_then(scalar),
      skip: build.skip.as_ref().is_some_and(truthy),
      outputs,
      requirements,
    })
  }

  pub fn output_names(&self) -> impl Iterator<Item = &str> {
    self.outputs.iter().map(|o| o.name.as_str())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn vars(build_type: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
      ("build_type".to_string(), build_type.to_string()),
      ("python".to_string(), "3.9".to_string()),
    ])
  }

  const META: &str = r#"{% set version = "2.4.1" %}
package:
  name: horovod
  version: {{ version }}
build:
  number: 3
  skip: true  # [build_type != 'cuda']
requirements:
  build:
    - {{ compiler('c') }}
  host:
    - python {{ python }}
    - nccl  # [build_type == 'cuda']
  run:
    - python
    - tensorflow >=2.4
test:
  requires:
    - pytest
"#;

  #[test]
  fn parses_single_output_recipe() {
    let meta = RecipeMeta::parse(META, Path::new("meta.yaml"), &vars("cuda")).unwrap();
    assert_eq!(meta.name, "horovod");
    assert_eq!(meta.version, "2.4.1");
    assert_eq!(meta.build_number, 3);
    assert!(!meta.skip);
    assert_eq!(meta.outputs.len(), 1);
    assert_eq!(meta.outputs[0].run_requirements, vec!["python", "tensorflow >=2.4"]);
    let names: Vec<&str> = meta.requirements.iter().map(|r| package_name(r)).collect();
    assert_eq!(names, vec!["compiler('c')", "python", "nccl", "python", "tensorflow", "pytest"]);
  }

  #[test]
  fn skip_selector_prunes_variant() {
    let meta = RecipeMeta::parse(META, Path::new("meta.yaml"), &vars("cpu")).unwrap();
    assert!(meta.skip);
  }

  #[test]
  fn multi_output_recipe() {
    let text = r#"
package:
  name: pytorch-split
  version: "1.10"
outputs:
  - name: pytorch-base
    requirements:
      host: [numpy]
      run: [numpy, libprotobuf]
  - name: pytorch
    version: "1.10.2"
    requirements:
      - pytorch-base
"#;
    let meta = RecipeMeta::parse(text, Path::new("meta.yaml"), &vars("cpu")).unwrap();
    assert_eq!(meta.output_names().collect::<Vec<_>>(), vec!["pytorch-base", "pytorch"]);
    assert_eq!(meta.outputs[0].version, "1.10");
    assert_eq!(meta.outputs[1].version, "1.10.2");
    assert_eq!(meta.outputs[1].run_requirements, vec!["pytorch-base"]);
    assert!(meta.requirements.contains(&"libprotobuf".to_string()));
  }

  #[test]
  fn package_names_strip_constraints() {
    assert_eq!(package_name("numpy >=1.19"), "numpy");
    assert_eq!(package_name("numpy>=1.19"), "numpy");
    assert_eq!(package_name("pack4=1.15.0=py38h6ffa863_0"), "pack4");
    assert_eq!(package_name("  python  "), "python");
  }

  #[test]
  fn default_config_is_single_recipe() {
    let dir = TempDir::new().unwrap();
    let feedstock = dir.path().join("numpy-feedstock");
    fs::create_dir(&feedstock).unwrap();
    let config = RecipeConfig::load(&feedstock, None, None, &vars("cpu")).unwrap();
    assert_eq!(config.recipes.len(), 1);
    assert_eq!(config.recipes[0].name, "numpy-feedstock");
    assert_eq!(config.recipes[0].path, "recipe");
  }

  #[test]
  fn explicit_config_must_exist() {
    let dir = TempDir::new().unwrap();
    let err = RecipeConfig::load(dir.path(), Some(Path::new("missing.yaml")), None, &vars("cpu")).unwrap_err();
    assert!(matches!(err, RecipeError::ConfigNotFound(_)));
  }

  #[test]
  fn config_file_is_rendered() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("config")).unwrap();
    fs::write(
      dir.path().join(DEFAULT_RECIPE_CONFIG_FILE),
      "recipes:\n  - name: base\n    path: recipes/base\n  - {name: gpu, path: recipes/gpu}  # [build_type == 'cuda']\n",
    )
    .unwrap();
    assert_eq!(RecipeConfig::load(dir.path(), None, None, &vars("cpu")).unwrap().recipes.len(), 1);
    assert_eq!(RecipeConfig::load(dir.path(), None, None, &vars("cuda")).unwrap().recipes.len(), 2);
  }

  #[test]
  fn local_src_dir_resolution() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("config")).unwrap();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::write(
      dir.path().join(DEFAULT_RECIPE_CONFIG_FILE),
      "recipes:\n  - name: a\n    path: recipe\n    local_src_dir: ../src\n  - name: b\n    path: recipe\n    local_src_dir: ../nope\n",
    )
    .unwrap();
    let config = RecipeConfig::load(dir.path(), None, None, &vars("cpu")).unwrap();
    let found = config.local_src_dir(&config.recipes[0], None).unwrap().unwrap();
    assert!(found.ends_with("src"));
    assert!(matches!(
      config.local_src_dir(&config.recipes[1], None),
      Err(RecipeError::LocalSrcDirNotFound(_))
    ));
    assert_eq!(
      config.local_src_dir(&config.recipes[1], Some(dir.path())).unwrap().as_deref(),
      Some(dir.path())
    );
  }
}
