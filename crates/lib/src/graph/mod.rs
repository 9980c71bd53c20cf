//! Dependency graph construction.
//!
//! [`GraphBuilder`] expands environment files (or a single feedstock) across
//! the variant matrix into [`BuildUnit`]s and connects each unit to the units
//! of the same variant that produce the packages it requires.
//!
//! A required package falls into one of three classes:
//! - produced by a unit of the same variant: an edge is added;
//! - produced only in other variants: the edge is pruned and recorded as a
//!   [`PrunedDependency`] so it shows up in the final report;
//! - produced by no loaded feedstock: it is expected to come from a channel.

mod dag;
mod unit;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::env_config::{EnvConfigError, EnvLoadOptions, EnvLoader};
use crate::feedstock::{
  FeedstockRef, FeedstockSettings, FetchError, RecipeConfig, RecipeError, RecipeMeta, acquire, feedstock_build_config,
};
use crate::variant::{BuildVariant, VariantMatrix};

pub use dag::BuildDag;
pub use unit::{BuildUnit, UnitId};

#[derive(Debug, Error)]
pub enum GraphError {
  #[error(transparent)]
  Env(#[from] EnvConfigError),

  #[error(transparent)]
  Fetch(#[from] FetchError),

  #[error(transparent)]
  Recipe(#[from] RecipeError),

  #[error("dependency cycle detected: {}", .cycles.join("; "))]
  Cycle { cycles: Vec<String> },

  #[error("no loaded feedstock provides the requested package(s): {}", .packages.join(", "))]
  UnresolvedDependency { packages: Vec<String> },

  #[error("feedstock '{feedstock}' has no recipe named '{recipe}'")]
  UnknownRecipe { feedstock: String, recipe: String },

  #[error("build unit {0} is defined more than once")]
  DuplicateUnit(UnitId),
}

/// A dependency edge dropped because the producer is not built for the unit's variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PrunedDependency {
  pub unit: UnitId,
  pub package: String,
  pub variant: String,
}

impl fmt::Display for PrunedDependency {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} requires {}, which no feedstock builds for {}",
      self.unit, self.package, self.variant
    )
  }
}

/// Where the recipes of a run come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphSource {
  /// Environment files, as given on the command line.
  Envs(Vec<String>),
  /// One feedstock checkout, as used by `build feedstock`.
  Feedstock {
    dir: PathBuf,
    recipe_config_file: Option<PathBuf>,
    recipes: Vec<String>,
  },
}

#[derive(Debug, Clone)]
pub struct GraphOptions {
  pub feedstocks: FeedstockSettings,
  pub env: EnvLoadOptions,
  /// Restrict the graph to units producing these packages and their dependencies.
  pub packages: Vec<String>,
  pub channels: Vec<String>,
  pub conda_build_configs: Vec<String>,
  pub local_src_dir: Option<PathBuf>,
}

/// Per-variant settings taken from the environment files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantEnv {
  pub variant: BuildVariant,
  pub channels: Vec<String>,
  pub external_dependencies: Vec<String>,
}

/// A feedstock that contributed units, with its checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedstockDir {
  pub name: String,
  pub dir: PathBuf,
}

/// The resolved graph of a run.
#[derive(Debug, Clone)]
pub struct BuildGraph {
  pub dag: BuildDag,
  pub pruned: Vec<PrunedDependency>,
  /// One entry per variant of the matrix, in matrix order.
  pub variant_envs: Vec<VariantEnv>,
  pub feedstocks: Vec<FeedstockDir>,
}

impl BuildGraph {
  pub fn units_for<'a>(&'a self, variant: &'a BuildVariant) -> impl Iterator<Item = &'a BuildUnit> + 'a {
    self.dag.units().iter().filter(move |u| &u.variant == variant)
  }
}

struct FeedstockSpec {
  name: String,
  dir: PathBuf,
  config_file: Option<PathBuf>,
  recipe_path: Option<String>,
  recipes: Vec<String>,
  channels: Vec<String>,
  runtime_package: bool,
}

/// Builds a [`BuildGraph`], caching env downloads and feedstock checkouts across variants.
pub struct GraphBuilder {
  options: GraphOptions,
  loader: EnvLoader,
  acquired: HashMap<String, PathBuf>,
}

impl GraphBuilder {
  pub fn new(options: GraphOptions) -> Self {
    let loader = EnvLoader::new(options.env.clone());
    Self {
      options,
      loader,
      acquired: HashMap::new(),
    }
  }

  pub async fn build(&mut self, source: &GraphSource, matrix: &VariantMatrix) -> Result<BuildGraph, GraphError> {
    let mut units: Vec<BuildUnit> = Vec::new();
    let mut variant_envs = Vec::new();
    let mut feedstocks: Vec<FeedstockDir> = Vec::new();
    let mut skipped_outputs: HashSet<String> = HashSet::new();

    for variant in matrix.variants() {
      let vars = variant.selector_context();
      let (specs, env) = self.feedstocks_for(source, &variant, &vars).await?;
      let before = units.len();

      for spec in specs {
        if !feedstocks.iter().any(|f| f.dir == spec.dir) {
          feedstocks.push(FeedstockDir {
            name: spec.name.clone(),
            dir: spec.dir.clone(),
          });
        }

        let config = RecipeConfig::load(&spec.dir, spec.config_file.as_deref(), spec.recipe_path.as_deref(), &vars)?;
        if let Some(missing) = spec.recipes.iter().find(|r| !config.recipes.iter().any(|e| &e.name == *r)) {
          return Err(GraphError::UnknownRecipe {
            feedstock: spec.name.clone(),
            recipe: missing.clone(),
          });
        }

        let mut conda_build_configs = self.options.conda_build_configs.clone();
        conda_build_configs.extend(env.conda_build_configs.iter().cloned());
        if let Some(own) = feedstock_build_config(&spec.dir) {
          conda_build_configs.push(own.to_string_lossy().into_owned());
        }
        let channels = merged([&env.channels, &spec.channels, &config.channels]);

        for entry in config
          .recipes
          .iter()
          .filter(|e| spec.recipes.is_empty() || spec.recipes.contains(&e.name))
        {
          let recipe_dir = spec.dir.join(&entry.path);
          let meta = RecipeMeta::load(&recipe_dir, &vars)?;
          if meta.skip {
            debug!(recipe = %entry.name, variant = %variant, "recipe skipped for variant");
            skipped_outputs.extend(meta.output_names().map(str::to_string));
            continue;
          }
          let local_src_dir = config.local_src_dir(entry, self.options.local_src_dir.as_deref())?;

          units.push(BuildUnit {
            id: UnitId::new(&entry.name, &variant),
            recipe: entry.name.clone(),
            feedstock: spec.name.clone(),
            variant: variant.clone(),
            run_dependencies: meta
              .outputs
              .iter()
              .flat_map(|o| o.run_requirements.iter().cloned())
              .collect(),
            outputs: meta.outputs,
            dependencies: meta.requirements,
            channels: channels.clone(),
            runtime_package: spec.runtime_package,
            feedstock_dir: spec.dir.clone(),
            recipe_dir,
            local_src_dir,
            conda_build_configs: conda_build_configs.clone(),
          });
        }
      }

      info!(variant = %variant, units = units.len() - before, "resolved build units");
      variant_envs.push(VariantEnv {
        variant,
        channels: env.channels,
        external_dependencies: env.external_dependencies,
      });
    }

    let (edges, pruned) = resolve_edges(&units, &skipped_outputs);
    for p in &pruned {
      warn!(unit = %p.unit, package = %p.package, variant = %p.variant, "dependency not built for this variant");
    }

    let roots = self.requested_roots(&units)?;
    let mut dag = BuildDag::new(units, &edges)?;
    if let Some(roots) = roots {
      dag = dag.restricted_to(&roots);
      debug!(units = dag.unit_count(), "restricted graph to requested packages");
    }
    let pruned = pruned.into_iter().filter(|p| dag.unit(&p.unit).is_some()).collect();

    Ok(BuildGraph {
      dag,
      pruned,
      variant_envs,
      feedstocks,
    })
  }

  async fn feedstocks_for(
    &mut self,
    source: &GraphSource,
    variant: &BuildVariant,
    vars: &std::collections::BTreeMap<String, String>,
  ) -> Result<(Vec<FeedstockSpec>, LoadedVariantEnv), GraphError> {
    match source {
      GraphSource::Feedstock {
        dir,
        recipe_config_file,
        recipes,
      } => {
        let name = feedstock_name(dir);
        let spec = FeedstockSpec {
          name,
          dir: dir.clone(),
          config_file: recipe_config_file.clone(),
          recipe_path: None,
          recipes: recipes.clone(),
          channels: Vec::new(),
          runtime_package: true,
        };
        let env = LoadedVariantEnv {
          channels: self.options.channels.clone(),
          ..Default::default()
        };
        Ok((vec![spec], env))
      }
      GraphSource::Envs(files) => {
        let config = self.loader.load(files, vars).await?;
        debug!(variant = %variant, env_files = config.envs.len(), "loaded environment files");

        let mut settings = self.options.feedstocks.clone();
        if settings.git_tag_for_env.is_none() {
          settings.git_tag_for_env = config.git_tag_for_env().map(str::to_string);
        }

        let mut specs = Vec::new();
        for (package, env) in config.packages() {
          let feedstock = FeedstockRef::from_package(package, &env.base_dir(), &settings.git_location);
          let dir = match self.acquired.get(&feedstock.repo_dir_name) {
            Some(dir) => dir.clone(),
            None => {
              let dir = acquire(&feedstock, &settings).await?;
              self.acquired.insert(feedstock.repo_dir_name.clone(), dir.clone());
              dir
            }
          };
          specs.push(FeedstockSpec {
            name: feedstock.name,
            dir,
            config_file: None,
            recipe_path: package.recipe_path.clone(),
            recipes: package.recipes.clone(),
            channels: package.channels.clone(),
            runtime_package: package.runtime_package,
          });
        }

        let env = LoadedVariantEnv {
          channels: merged([&self.options.channels, &config.channels()]),
          external_dependencies: config.external_dependencies(),
          conda_build_configs: config.conda_build_configs(),
        };
        Ok((specs, env))
      }
    }
  }

  /// Units producing the `--packages` selection, or `None` when there is no selection.
  fn requested_roots(&self, units: &[BuildUnit]) -> Result<Option<Vec<UnitId>>, GraphError> {
    if self.options.packages.is_empty() {
      return Ok(None);
    }
    let mut roots = Vec::new();
    let mut missing = Vec::new();
    for package in &self.options.packages {
      let producers: Vec<UnitId> = units.iter().filter(|u| u.produces(package)).map(|u| u.id.clone()).collect();
      if producers.is_empty() {
        missing.push(package.clone());
      }
      roots.extend(producers);
    }
    if !missing.is_empty() {
      return Err(GraphError::UnresolvedDependency { packages: missing });
    }
    Ok(Some(roots))
  }
}

#[derive(Default)]
struct LoadedVariantEnv {
  channels: Vec<String>,
  external_dependencies: Vec<String>,
  conda_build_configs: Vec<String>,
}

/// `numpy` for `.../numpy-feedstock`.
fn feedstock_name(dir: &Path) -> String {
  let name = dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
  name.trim_end_matches("-feedstock").to_string()
}

fn merged<'a, const N: usize>(lists: [&'a Vec<String>; N]) -> Vec<String> {
  let mut out: Vec<String> = Vec::new();
  for item in lists.into_iter().flatten() {
    if !out.contains(item) {
      out.push(item.clone());
    }
  }
  out
}

/// Connect each unit to the producers of its dependencies within the same variant.
///
/// Returns `(dependency, dependent)` edges and the dependencies that are only
/// produced in other variants.
fn resolve_edges(units: &[BuildUnit], skipped_outputs: &HashSet<String>) -> (Vec<(UnitId, UnitId)>, Vec<PrunedDependency>) {
  let mut producers: HashMap<(&BuildVariant, &str), &UnitId> = HashMap::new();
  let mut produced_anywhere: HashSet<&str> = skipped_outputs.iter().map(String::as_str).collect();
  for unit in units {
    for output in unit.output_names() {
      produced_anywhere.insert(output);
      if let Some(existing) = producers.insert((&unit.variant, output), &unit.id)
        && existing != &unit.id
      {
        warn!(package = output, first = %existing, second = %unit.id, "package produced by more than one recipe");
        producers.insert((&unit.variant, output), existing);
      }
    }
  }

  let mut edges = Vec::new();
  let mut pruned = Vec::new();
  for unit in units {
    for name in unit.dependency_names() {
      if unit.produces(name) {
        continue;
      }
      match producers.get(&(&unit.variant, name)) {
        Some(producer) => edges.push(((*producer).clone(), unit.id.clone())),
        None if produced_anywhere.contains(name) => pruned.push(PrunedDependency {
          unit: unit.id.clone(),
          package: name.to_string(),
          variant: unit.variant.variant_string(),
        }),
        None => {}
      }
    }
  }
  (edges, pruned)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::{simple_meta, unit_with, write_feedstock};
  use std::fs;
  use tempfile::TempDir;
  use tracing_test::traced_test;

  fn options(repo: &Path) -> GraphOptions {
    GraphOptions {
      feedstocks: FeedstockSettings {
        repository_folder: repo.to_path_buf(),
        git_location: "https://invalid.example/open-ce".into(),
        git_tag_for_env: None,
      },
      env: EnvLoadOptions {
        git_location: "https://invalid.example/open-ce".into(),
        git_tag_for_env: None,
      },
      packages: vec![],
      channels: vec![],
      conda_build_configs: vec![],
      local_src_dir: None,
    }
  }

  fn matrix(build_types: &[&str]) -> VariantMatrix {
    VariantMatrix::new(&["3.9"], build_types, &["openmpi"], &["11.2"], "p9").unwrap()
  }

  fn env_file(dir: &Path, packages: &[&str]) -> Vec<String> {
    let mut text = String::from("packages:\n");
    for p in packages {
      text.push_str(&format!("  - feedstock: {}\n", p));
    }
    let path = dir.join("env.yaml");
    fs::write(&path, text).unwrap();
    vec![path.to_string_lossy().into_owned()]
  }

  #[test]
  fn edges_follow_same_variant_producers() {
    let units = vec![
      unit_with("a", "cpu", &["a"], &[]),
      unit_with("b", "cpu", &["b"], &["a >=1.0", "python"]),
      unit_with("a", "cuda", &["a"], &[]),
      unit_with("b", "cuda", &["b"], &["a"]),
    ];
    let (edges, pruned) = resolve_edges(&units, &HashSet::new());
    assert_eq!(edges.len(), 2);
    assert!(edges.contains(&(units[0].id.clone(), units[1].id.clone())));
    assert!(edges.contains(&(units[2].id.clone(), units[3].id.clone())));
    assert!(pruned.is_empty());
  }

  #[test]
  fn producer_in_other_variant_is_pruned() {
    let units = vec![
      unit_with("nccl", "cuda", &["nccl"], &[]),
      unit_with("horovod", "cpu", &["horovod"], &["nccl"]),
    ];
    let (edges, pruned) = resolve_edges(&units, &HashSet::new());
    assert!(edges.is_empty());
    assert_eq!(
      pruned,
      vec![PrunedDependency {
        unit: units[1].id.clone(),
        package: "nccl".into(),
        variant: "py3.9-cpu-openmpi".into(),
      }]
    );
  }

  #[test]
  fn intra_recipe_outputs_do_not_self_depend() {
    let units = vec![unit_with("pytorch", "cpu", &["pytorch-base", "pytorch"], &["pytorch-base"])];
    let (edges, pruned) = resolve_edges(&units, &HashSet::new());
    assert!(edges.is_empty());
    assert!(pruned.is_empty());
  }

  #[tokio::test]
  async fn builds_units_per_variant_with_edges() {
    let dir = TempDir::new().unwrap();
    write_feedstock(dir.path(), "a", &simple_meta("a", "1.0", &[]));
    write_feedstock(dir.path(), "b", &simple_meta("b", "2.0", &["a"]));
    let envs = env_file(dir.path(), &["a", "b"]);

    let graph = GraphBuilder::new(options(dir.path()))
      .build(&GraphSource::Envs(envs), &matrix(&["cpu", "cuda"]))
      .await
      .unwrap();

    assert_eq!(graph.dag.unit_count(), 4);
    assert_eq!(graph.variant_envs.len(), 2);
    assert_eq!(graph.feedstocks.len(), 2);
    let waves = graph.dag.unit_waves().unwrap();
    assert_eq!(waves.len(), 2);
    assert!(waves[0].iter().all(|id| id.0.starts_with("a-feedstock@")));
  }

  #[tokio::test]
  #[traced_test]
  async fn cuda_only_recipe_is_pruned_and_reported() {
    let dir = TempDir::new().unwrap();
    write_feedstock(
      dir.path(),
      "nccl",
      "package:\n  name: nccl\n  version: 2.8\nbuild:\n  skip: true  # [build_type != 'cuda']\n",
    );
    write_feedstock(dir.path(), "horovod", &simple_meta("horovod", "0.21", &["nccl"]));
    let envs = env_file(dir.path(), &["nccl", "horovod"]);

    let graph = GraphBuilder::new(options(dir.path()))
      .build(&GraphSource::Envs(envs), &matrix(&["cpu", "cuda"]))
      .await
      .unwrap();

    assert_eq!(graph.dag.unit_count(), 3);
    assert_eq!(graph.pruned.len(), 1);
    assert_eq!(graph.pruned[0].package, "nccl");
    assert_eq!(graph.pruned[0].variant, "py3.9-cpu-openmpi");
    assert!(logs_contain("dependency not built for this variant"));
  }

  #[tokio::test]
  async fn cycle_schedules_nothing() {
    let dir = TempDir::new().unwrap();
    write_feedstock(dir.path(), "a", &simple_meta("a", "1.0", &["b"]));
    write_feedstock(dir.path(), "b", &simple_meta("b", "1.0", &["a"]));
    let envs = env_file(dir.path(), &["a", "b"]);

    let err = GraphBuilder::new(options(dir.path()))
      .build(&GraphSource::Envs(envs), &matrix(&["cpu"]))
      .await
      .unwrap_err();
    assert!(matches!(err, GraphError::Cycle { .. }));
  }

  #[tokio::test]
  async fn requested_packages_restrict_the_graph() {
    let dir = TempDir::new().unwrap();
    write_feedstock(dir.path(), "a", &simple_meta("a", "1.0", &[]));
    write_feedstock(dir.path(), "b", &simple_meta("b", "1.0", &["a"]));
    write_feedstock(dir.path(), "c", &simple_meta("c", "1.0", &[]));
    let envs = env_file(dir.path(), &["a", "b", "c"]);

    let mut opts = options(dir.path());
    opts.packages = vec!["b".into()];
    let graph = GraphBuilder::new(opts.clone())
      .build(&GraphSource::Envs(envs.clone()), &matrix(&["cpu"]))
      .await
      .unwrap();
    assert_eq!(graph.dag.unit_count(), 2);

    opts.packages = vec!["missing".into()];
    let err = GraphBuilder::new(opts)
      .build(&GraphSource::Envs(envs), &matrix(&["cpu"]))
      .await
      .unwrap_err();
    assert!(matches!(err, GraphError::UnresolvedDependency { packages } if packages == vec!["missing"]));
  }

  #[tokio::test]
  async fn unknown_recipe_is_rejected() {
    let dir = TempDir::new().unwrap();
    write_feedstock(dir.path(), "a", &simple_meta("a", "1.0", &[]));
    fs::write(
      dir.path().join("env.yaml"),
      "packages:\n  - feedstock: a\n    recipes: [nope]\n",
    )
    .unwrap();
    let envs = vec![dir.path().join("env.yaml").to_string_lossy().into_owned()];

    let err = GraphBuilder::new(options(dir.path()))
      .build(&GraphSource::Envs(envs), &matrix(&["cpu"]))
      .await
      .unwrap_err();
    assert!(matches!(err, GraphError::UnknownRecipe { recipe, .. } if recipe == "nope"));
  }

  #[tokio::test]
  async fn single_feedstock_source() {
    let dir = TempDir::new().unwrap();
    let feedstock = write_feedstock(dir.path(), "numpy", &simple_meta("numpy", "1.19", &["python"]));

    let graph = GraphBuilder::new(options(dir.path()))
      .build(
        &GraphSource::Feedstock {
          dir: feedstock,
          recipe_config_file: None,
          recipes: vec![],
        },
        &matrix(&["cpu"]),
      )
      .await
      .unwrap();
    assert_eq!(graph.dag.unit_count(), 1);
    assert_eq!(graph.dag.units()[0].feedstock, "numpy");
    assert_eq!(graph.dag.units()[0].run_dependencies, vec!["python"]);
  }
}
