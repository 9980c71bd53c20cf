//! Build units: one recipe rendered for one variant.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::feedstock::{RecipeOutput, package_name};
use crate::util::hash::Fingerprintable;
use crate::variant::BuildVariant;

/// `<recipe>@<variant_string>`, unique per recipe and variant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitId(pub String);

impl UnitId {
  pub fn new(recipe: &str, variant: &BuildVariant) -> Self {
    UnitId(format!("{}@{}", recipe, variant.variant_string()))
  }

  /// A form of the id that is safe to use as a file name.
  pub fn file_name(&self) -> String {
    self
      .0
      .chars()
      .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '@') { c } else { '_' })
      .collect()
  }
}

impl fmt::Display for UnitId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// The schedulable node of the build graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildUnit {
  pub id: UnitId,
  pub recipe: String,
  pub feedstock: String,
  pub variant: BuildVariant,
  pub outputs: Vec<RecipeOutput>,
  /// Declared specs from build, host, run and test requirements.
  pub dependencies: Vec<String>,
  /// Run requirements of every output.
  pub run_dependencies: Vec<String>,
  /// Channels the feedstock's package entry and recipe config add.
  pub channels: Vec<String>,
  pub runtime_package: bool,
  pub feedstock_dir: PathBuf,
  pub recipe_dir: PathBuf,
  pub local_src_dir: Option<PathBuf>,
  pub conda_build_configs: Vec<String>,
}

impl Fingerprintable for BuildUnit {}

impl BuildUnit {
  pub fn output_names(&self) -> impl Iterator<Item = &str> {
    self.outputs.iter().map(|o| o.name.as_str())
  }

  pub fn produces(&self, package: &str) -> bool {
    self.output_names().any(|name| name == package)
  }

  /// Names of every package this unit declares a dependency on, without duplicates.
  pub fn dependency_names(&self) -> Vec<&str> {
    let mut names: Vec<&str> = Vec::new();
    for spec in &self.dependencies {
      let name = package_name(spec);
      if !name.is_empty() && !names.contains(&name) {
        names.push(name);
      }
    }
    names
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::variant::BuildType;

  fn variant() -> BuildVariant {
    BuildVariant {
      python: "3.9".into(),
      build_type: BuildType::Cuda,
      mpi_type: "openmpi".into(),
      cuda: Some("11.2".into()),
      ppc_arch: "p9".into(),
    }
  }

  #[test]
  fn unit_id_format() {
    let id = UnitId::new("pytorch", &variant());
    assert_eq!(id.to_string(), "pytorch@py3.9-cuda-openmpi-11.2");
    assert_eq!(UnitId("a/b c@v".into()).file_name(), "a_b_c@v");
  }

  #[test]
  fn dependency_names_are_unique() {
    let unit = BuildUnit {
      id: UnitId::new("x", &variant()),
      recipe: "x".into(),
      feedstock: "x".into(),
      variant: variant(),
      outputs: vec![],
      dependencies: vec!["numpy >=1.19".into(), "numpy".into(), "python 3.9".into()],
      run_dependencies: vec![],
      channels: vec![],
      runtime_package: true,
      feedstock_dir: PathBuf::new(),
      recipe_dir: PathBuf::new(),
      local_src_dir: None,
      conda_build_configs: vec![],
    };
    assert_eq!(unit.dependency_names(), vec!["numpy", "python"]);
  }
}
