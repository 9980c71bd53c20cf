//! `conda build` invocation for a single unit.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, error, info};
use walkdir::WalkDir;

use super::UnitBuilder;
use super::types::{BuildError, ExecuteConfig, UnitArtifacts};
use crate::consts::PACKAGE_EXTENSIONS;
use crate::graph::BuildUnit;
use crate::util::Cmd;

/// Settings for `conda debug` instead of `conda build`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugSettings {
  /// Output to prepare when the recipe has several.
  pub output_id: Option<String>,
}

/// Builds units with the conda build tool.
#[derive(Debug, Clone)]
pub struct CondaBuilder {
  pub conda: String,
  pub package_format: String,
  pub debug: Option<DebugSettings>,
}

impl CondaBuilder {
  pub fn new(package_format: impl Into<String>) -> Self {
    Self {
      conda: "conda".to_string(),
      package_format: package_format.into(),
      debug: None,
    }
  }

  /// The command that builds `unit` into `output_folder`.
  pub fn command(&self, unit: &BuildUnit, output_folder: &Path) -> Cmd {
    let cmd = Cmd::new(&self.conda);
    let cmd = match &self.debug {
      Some(debug) => {
        let mut cmd = cmd.arg("debug").arg(unit.recipe_dir.to_string_lossy());
        if let Some(id) = &debug.output_id {
          cmd = cmd.arg("--output-id").arg(id);
        }
        cmd
      }
      None => self.build_args(cmd.arg("build"), unit, output_folder),
    };
    self.common_args(cmd, unit, output_folder)
  }

  /// `conda build --output`: prints the package paths the build will produce.
  pub fn output_command(&self, unit: &BuildUnit, output_folder: &Path) -> Cmd {
    let cmd = self.build_args(Cmd::new(&self.conda).arg("build").arg("--output"), unit, output_folder);
    self.common_args(cmd, unit, output_folder)
  }

  fn build_args(&self, cmd: Cmd, unit: &BuildUnit, output_folder: &Path) -> Cmd {
    cmd
      .arg(unit.recipe_dir.to_string_lossy())
      .arg("--output-folder")
      .arg(output_folder.to_string_lossy())
      .args(["--package-format", self.package_format.as_str()])
  }

  fn common_args(&self, mut cmd: Cmd, unit: &BuildUnit, output_folder: &Path) -> Cmd {
    let output = output_folder.to_string_lossy().into_owned();
    cmd = cmd.args(["-c", output.as_str()]);
    for channel in &unit.channels {
      cmd = cmd.args(["-c", channel.as_str()]);
    }
    for config in &unit.conda_build_configs {
      cmd = cmd.args(["-m", config.as_str()]);
    }
    cmd = cmd
      .arg("--variants")
      .arg(unit.variant.conda_build_variants())
      .cwd(&unit.feedstock_dir)
      .env("PPC_ARCH", &unit.variant.ppc_arch);
    if let Some(src) = &unit.local_src_dir {
      cmd = cmd.env("LOCAL_SRC_DIR", src.to_string_lossy());
    }
    cmd
  }

  /// Package paths `unit` will write into `output_folder`.
  ///
  /// Asked of conda before the build, so each unit records exactly its own
  /// packages even when siblings write into the same channel concurrently.
  pub async fn expected_packages(&self, unit: &BuildUnit, output_folder: &Path) -> Result<Vec<PathBuf>, BuildError> {
    let output = self
      .output_command(unit, output_folder)
      .output()
      .await
      .map_err(|source| BuildError::Cmd {
        unit: unit.id.clone(),
        source,
      })?;
    if !output.success() {
      debug!(unit = %unit.id, stderr = %output.stderr, "conda build --output stderr");
      return Err(BuildError::Tool {
        unit: unit.id.clone(),
        code: output.code,
      });
    }
    let packages = parse_output_paths(&output.stdout);
    if packages.is_empty() {
      return Err(BuildError::NoOutputs { unit: unit.id.clone() });
    }
    Ok(packages)
  }
}

/// Package paths in `conda build --output` stdout, which may also carry log lines.
fn parse_output_paths(stdout: &str) -> Vec<PathBuf> {
  stdout
    .lines()
    .map(str::trim)
    .filter(|line| PACKAGE_EXTENSIONS.iter().any(|ext| line.ends_with(ext)))
    .map(PathBuf::from)
    .collect()
}

#[async_trait]
impl UnitBuilder for CondaBuilder {
  async fn build(&self, unit: &BuildUnit, config: &ExecuteConfig) -> Result<UnitArtifacts, BuildError> {
    let expected = match self.debug {
      Some(_) => Vec::new(),
      None => self.expected_packages(unit, &config.output_folder).await?,
    };
    let cmd = self.command(unit, &config.output_folder);
    info!(unit = %unit.id, "building unit");

    let output = cmd.output().await.map_err(|source| BuildError::Cmd {
      unit: unit.id.clone(),
      source,
    })?;
    if !output.success() {
      error!(unit = %unit.id, code = ?output.code, "conda build failed");
      debug!(unit = %unit.id, stderr = %output.stderr, "conda build stderr");
      return Err(BuildError::Tool {
        unit: unit.id.clone(),
        code: output.code,
      });
    }

    let missing: Vec<PathBuf> = expected.iter().filter(|p| !p.is_file()).cloned().collect();
    if !missing.is_empty() {
      return Err(BuildError::MissingPackages {
        unit: unit.id.clone(),
        packages: missing,
      });
    }
    Ok(UnitArtifacts { packages: expected })
  }
}

/// Package files currently in the channel's platform subdirectories.
pub fn list_packages(channel: &Path) -> HashSet<PathBuf> {
  WalkDir::new(channel)
    .min_depth(2)
    .max_depth(2)
    .into_iter()
    .filter_map(Result::ok)
    .filter(|e| e.file_type().is_file())
    .map(|e| e.into_path())
    .filter(|p| {
      p.file_name()
        .map(|n| n.to_string_lossy())
        .is_some_and(|n| PACKAGE_EXTENSIONS.iter().any(|ext| n.ends_with(ext)))
    })
    .collect()
}
