//! Types for unit execution.
//!
//! This module defines the error types, result types, and configuration
//! for running the build units of a [`BuildDag`](crate::graph::BuildDag).

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::{DEFAULT_OUTPUT_FOLDER, MAX_PARALLELISM};
use crate::graph::{PrunedDependency, UnitId};
use crate::util::CmdError;

/// Identifies what caused a unit to be skipped.
///
/// `dependency` is the direct dependency that did not succeed; `root` is the
/// unit whose build actually failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedDependency {
  pub dependency: UnitId,
  pub root: UnitId,
}

impl std::fmt::Display for FailedDependency {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    if self.dependency == self.root {
      write!(f, "dependency {} failed", self.dependency)
    } else {
      write!(f, "dependency {} was skipped ({} failed)", self.dependency, self.root)
    }
  }
}

/// Errors that can occur while building a single unit.
#[derive(Debug, Error)]
pub enum BuildError {
  /// The build tool ran and exited non-zero.
  #[error("{unit}: build tool exited with code {}", .code.map(|c| c.to_string()).unwrap_or_else(|| "none".into()))]
  Tool { unit: UnitId, code: Option<i32> },

  /// The build tool could not be run.
  #[error("{unit}: {source}")]
  Cmd {
    unit: UnitId,
    #[source]
    source: CmdError,
  },

  /// `conda build --output` named no package files.
  #[error("{unit}: the build tool reports no package outputs")]
  NoOutputs { unit: UnitId },

  /// The build succeeded but some expected packages were not written.
  #[error("{unit}: expected packages were not produced: {}", .packages.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", "))]
  MissingPackages { unit: UnitId, packages: Vec<PathBuf> },

  #[error("{unit}: io error: {source}")]
  Io {
    unit: UnitId,
    #[source]
    source: std::io::Error,
  },

  /// The task running the build panicked or was cancelled.
  #[error("{unit}: build task aborted: {message}")]
  Aborted { unit: UnitId, message: String },
}

impl BuildError {
  pub fn unit(&self) -> &UnitId {
    match self {
      BuildError::Tool { unit, .. }
      | BuildError::Cmd { unit, .. }
      | BuildError::NoOutputs { unit }
      | BuildError::MissingPackages { unit, .. }
      | BuildError::Io { unit, .. }
      | BuildError::Aborted { unit, .. } => unit,
    }
  }
}

/// Packages a successful unit placed in the output channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitArtifacts {
  pub packages: Vec<PathBuf>,
}

/// Aggregate outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
  AllSuccess,
  PartialFailure { failed: Vec<UnitId>, skipped: Vec<UnitId> },
  /// A structural error prevented any unit from being scheduled.
  Fatal(String),
}

/// Result of executing the whole DAG.
#[derive(Debug, Default)]
pub struct RunReport {
  /// Units built in this run.
  pub built: BTreeMap<UnitId, UnitArtifacts>,

  /// Units whose completion marker from an earlier run was still valid.
  pub reused: BTreeMap<UnitId, UnitArtifacts>,

  pub failed: BTreeMap<UnitId, BuildError>,

  /// Units never attempted because a dependency did not succeed.
  pub skipped: BTreeMap<UnitId, FailedDependency>,

  /// Dependency edges dropped during graph construction.
  pub pruned: Vec<PrunedDependency>,
}

impl RunReport {
  pub fn status(&self) -> RunStatus {
    if self.failed.is_empty() && self.skipped.is_empty() {
      RunStatus::AllSuccess
    } else {
      RunStatus::PartialFailure {
        failed: self.failed.keys().cloned().collect(),
        skipped: self.skipped.keys().cloned().collect(),
      }
    }
  }

  pub fn is_success(&self) -> bool {
    self.status() == RunStatus::AllSuccess
  }

  /// Returns the total number of units processed.
  pub fn total(&self) -> usize {
    self.built.len() + self.reused.len() + self.failed.len() + self.skipped.len()
  }

  /// Every package file produced or reused, in unit order.
  pub fn packages(&self) -> Vec<&PathBuf> {
    self
      .built
      .values()
      .chain(self.reused.values())
      .flat_map(|a| a.packages.iter())
      .collect()
  }

  /// One-line summary such as `3 built, 1 reused, 1 failed, 2 skipped`.
  pub fn summary(&self) -> String {
    format!(
      "{} built, {} reused, {} failed, {} skipped",
      self.built.len(),
      self.reused.len(),
      self.failed.len(),
      self.skipped.len()
    )
  }
}

/// Configuration for unit execution.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Maximum number of units to build in parallel.
  pub parallelism: usize,

  /// The local channel every unit writes into.
  pub output_folder: PathBuf,

  /// Skip units whose completion marker is still valid, and write markers for new builds.
  pub reuse_completed: bool,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      parallelism: default_parallelism(),
      output_folder: PathBuf::from(DEFAULT_OUTPUT_FOLDER),
      reuse_completed: true,
    }
  }
}

/// Available CPUs, capped at [`MAX_PARALLELISM`].
pub fn default_parallelism() -> usize {
  std::thread::available_parallelism()
    .map(|p| p.get())
    .unwrap_or(4)
    .min(MAX_PARALLELISM)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn id(name: &str) -> UnitId {
    UnitId(format!("{}@py3.9-cpu-openmpi", name))
  }

  #[test]
  fn empty_report_is_success() {
    let report = RunReport::default();
    assert!(report.is_success());
    assert_eq!(report.total(), 0);
    assert_eq!(report.summary(), "0 built, 0 reused, 0 failed, 0 skipped");
  }

  #[test]
  fn failure_makes_partial_status() {
    let mut report = RunReport::default();
    report.built.insert(id("a"), UnitArtifacts::default());
    report.failed.insert(
      id("b"),
      BuildError::Tool {
        unit: id("b"),
        code: Some(1),
      },
    );
    report.skipped.insert(
      id("c"),
      FailedDependency {
        dependency: id("b"),
        root: id("b"),
      },
    );

    assert_eq!(
      report.status(),
      RunStatus::PartialFailure {
        failed: vec![id("b")],
        skipped: vec![id("c")],
      }
    );
    assert_eq!(report.total(), 3);
  }

  #[test]
  fn pruned_edges_alone_do_not_fail_a_run() {
    let report = RunReport {
      pruned: vec![PrunedDependency {
        unit: id("a"),
        package: "nccl".into(),
        variant: "py3.9-cpu-openmpi".into(),
      }],
      ..Default::default()
    };
    assert!(report.is_success());
  }

  #[test]
  fn failed_dependency_display() {
    let direct = FailedDependency {
      dependency: id("a"),
      root: id("a"),
    };
    let transitive = FailedDependency {
      dependency: id("b"),
      root: id("a"),
    };
    assert_eq!(direct.to_string(), "dependency a@py3.9-cpu-openmpi failed");
    assert_eq!(
      transitive.to_string(),
      "dependency b@py3.9-cpu-openmpi was skipped (a@py3.9-cpu-openmpi failed)"
    );
  }

  #[test]
  fn error_messages_name_the_unit() {
    let err = BuildError::Tool {
      unit: id("numpy"),
      code: Some(2),
    };
    assert_eq!(err.to_string(), "numpy@py3.9-cpu-openmpi: build tool exited with code 2");
    assert_eq!(err.unit(), &id("numpy"));
  }

  #[test]
  fn default_parallelism_is_capped() {
    let config = ExecuteConfig::default();
    assert!(config.parallelism >= 1 && config.parallelism <= MAX_PARALLELISM);
    assert!(config.reuse_completed);
  }
}
