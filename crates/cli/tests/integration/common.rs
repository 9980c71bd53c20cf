//! Shared test helpers for CLI integration tests.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Get path to a fixture file or directory.
pub fn fixture_path(name: &str) -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    .join("tests")
    .join("fixtures")
    .join(name)
}

fn copy_tree(from: &Path, to: &Path) {
  fs::create_dir_all(to).unwrap();
  for entry in fs::read_dir(from).unwrap() {
    let entry = entry.unwrap();
    let target = to.join(entry.file_name());
    if entry.file_type().unwrap().is_dir() {
      copy_tree(&entry.path(), &target);
    } else {
      fs::copy(entry.path(), &target).unwrap();
    }
  }
}

/// Isolated test environment.
///
/// Each test gets its own temporary project directory holding copies of the
/// fixture feedstocks and environment files, so generated files never land in
/// the source tree.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    copy_tree(&fixture_path("feedstocks"), &temp.path().join("feedstocks"));
    copy_tree(&fixture_path("envs"), &temp.path().join("envs"));
    Self { temp }
  }

  pub fn root(&self) -> PathBuf {
    dunce::canonicalize(self.temp.path()).unwrap()
  }

  pub fn env_file(&self, name: &str) -> PathBuf {
    self.root().join("envs").join(name)
  }

  pub fn feedstock(&self, name: &str) -> PathBuf {
    self.root().join("feedstocks").join(name)
  }

  pub fn repository_folder(&self) -> PathBuf {
    self.root().join("feedstocks")
  }

  /// Output channel (isolated per test).
  pub fn output_path(&self) -> PathBuf {
    self.root().join("condabuild")
  }

  /// Write a file relative to the temp directory.
  pub fn write_file(&self, relative_path: &str, content: &str) -> PathBuf {
    let path = self.root().join(relative_path);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
  }

  /// Get a pre-configured Command for the open-ce binary.
  ///
  /// Runs from the project directory with a git location that cannot be
  /// reached, so a missing fixture fails fast instead of cloning.
  pub fn open_ce_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("open-ce");
    cmd.current_dir(self.root());
    cmd.env("OPEN_CE_GIT_LOCATION", "https://invalid.example/open-ce");
    cmd.env_remove("OPEN_CE_CONTAINER_TOOL");
    cmd.env("NO_COLOR", "1");
    cmd
  }

  /// `open-ce build env <env> --repository_folder <feedstocks> --output_folder <out> --skip_build_packages`.
  pub fn plan_env(&self, env: &str) -> Command {
    let mut cmd = self.open_ce_cmd();
    cmd
      .arg("build")
      .arg("env")
      .arg(self.env_file(env))
      .arg("--repository_folder")
      .arg(self.repository_folder())
      .arg("--output_folder")
      .arg(self.output_path())
      .arg("--skip_build_packages");
    cmd
  }
}
