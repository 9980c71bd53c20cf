//! Integration tests for `open-ce build feedstock`.

use assert_cmd::Command;
use predicates::prelude::*;

use super::common::TestEnv;

fn build_feedstock(env: &TestEnv, feedstock: &str) -> Command {
  let mut cmd = env.open_ce_cmd();
  cmd
    .arg("build")
    .arg("feedstock")
    .arg("--working_directory")
    .arg(env.feedstock(feedstock))
    .arg("--output_folder")
    .arg(env.output_path());
  cmd
}

#[test]
fn debug_requires_a_single_variant() {
  let env = TestEnv::new();

  build_feedstock(&env, "zlib-feedstock")
    .args(["--debug", "--python_versions", "3.9,3.10"])
    .assert()
    .code(1)
    .stderr(predicate::str::contains("exactly one variant"));
}

#[test]
fn debug_requires_a_single_recipe() {
  let env = TestEnv::new();

  build_feedstock(&env, "imaging-feedstock")
    .args(["--debug", "--build_types", "cpu"])
    .assert()
    .code(1)
    .stderr(predicate::str::contains("exactly one recipe"));
}

#[test]
fn debug_output_id_must_match_an_output() {
  let env = TestEnv::new();

  build_feedstock(&env, "imaging-feedstock")
    .args(["--debug", "--build_types", "cpu", "--recipes", "imageio"])
    .args(["--debug_output_id", "tensorflow*"])
    .assert()
    .code(1)
    .stderr(predicate::str::contains("matches none of the outputs"));
}

#[test]
fn debug_output_id_requires_debug() {
  let env = TestEnv::new();

  build_feedstock(&env, "imaging-feedstock")
    .args(["--debug_output_id", "imageio*"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("--debug"));
}

#[test]
fn unknown_recipe_is_rejected() {
  let env = TestEnv::new();

  build_feedstock(&env, "imaging-feedstock")
    .args(["--recipes", "nope"])
    .assert()
    .code(1)
    .stderr(predicate::str::contains("no recipe named 'nope'"));
}

#[test]
fn missing_recipe_config_file_is_rejected() {
  let env = TestEnv::new();

  build_feedstock(&env, "zlib-feedstock")
    .args(["--recipe_config_file", "missing.yaml"])
    .assert()
    .code(1)
    .stderr(predicate::str::contains("unable to open provided config file"));
}

#[test]
fn missing_working_directory_is_rejected() {
  let env = TestEnv::new();

  build_feedstock(&env, "gone-feedstock")
    .assert()
    .code(1)
    .stderr(predicate::str::contains("does not exist"));
}
