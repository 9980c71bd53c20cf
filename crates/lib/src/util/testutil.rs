//! Test fixtures shared across the crate's unit tests.

use std::fs;
use std::path::{Path, PathBuf};

use crate::feedstock::RecipeOutput;
use crate::graph::{BuildUnit, UnitId};
use crate::variant::{BuildType, BuildVariant};

/// A python 3.9 / openmpi variant of the given build type (`cpu` or `cuda`).
pub fn variant(build_type: &str) -> BuildVariant {
  let build_type: BuildType = build_type.parse().unwrap();
  BuildVariant {
    python: "3.9".into(),
    build_type,
    mpi_type: "openmpi".into(),
    cuda: (build_type == BuildType::Cuda).then(|| "11.2".to_string()),
    ppc_arch: "p9".into(),
  }
}

/// A unit for `name` producing a package of the same name at version 1.0.
pub fn unit(name: &str, build_type: &str) -> BuildUnit {
  unit_with(name, build_type, &[name], &[])
}

pub fn unit_with(name: &str, build_type: &str, outputs: &[&str], dependencies: &[&str]) -> BuildUnit {
  let variant = variant(build_type);
  BuildUnit {
    id: UnitId::new(name, &variant),
    recipe: name.to_string(),
    feedstock: name.to_string(),
    variant,
    outputs: outputs
      .iter()
      .map(|o| RecipeOutput {
        name: o.to_string(),
        version: "1.0".into(),
        run_requirements: Vec::new(),
      })
      .collect(),
    dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
    run_dependencies: Vec::new(),
    channels: Vec::new(),
    runtime_package: true,
    feedstock_dir: PathBuf::from(format!("/feedstocks/{}-feedstock", name)),
    recipe_dir: PathBuf::from(format!("/feedstocks/{}-feedstock/recipe", name)),
    local_src_dir: None,
    conda_build_configs: Vec::new(),
  }
}

/// Write `<root>/<name>-feedstock/recipe/meta.yaml` and return the feedstock directory.
pub fn write_feedstock(root: &Path, name: &str, meta: &str) -> PathBuf {
  let dir = root.join(format!("{}-feedstock", name));
  fs::create_dir_all(dir.join("recipe")).unwrap();
  fs::write(dir.join("recipe").join("meta.yaml"), meta).unwrap();
  dir
}

/// A minimal `meta.yaml` for `name` with the given run requirements.
pub fn simple_meta(name: &str, version: &str, run: &[&str]) -> String {
  let mut meta = format!("package:\n  name: {}\n  version: {}\nrequirements:\n  run:\n", name, version);
  for dep in run {
    meta.push_str(&format!("    - {}\n", dep));
  }
  meta
}

/// Returns the shell command and args to execute a shell script.
pub fn shell_cmd(script: &str) -> (&'static str, Vec<String>) {
  ("/bin/sh", vec!["-c".to_string(), script.to_string()])
}
