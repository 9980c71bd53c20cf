//! Integration tests for `open-ce build image`.

use std::fs;

use predicates::prelude::*;

use super::common::TestEnv;

const CPU_ENV: &str = "open-ce-conda-env-py3.9-cpu-openmpi.yaml";

/// Write a cpu env file listing zlib as its only local package.
fn plan_zlib_env(env: &TestEnv) {
  env
    .plan_env("imaging-env.yaml")
    .args(["--packages", "zlib", "--build_types", "cpu"])
    .assert()
    .success();
}

#[test]
fn missing_channel_is_rejected() {
  let env = TestEnv::new();

  env
    .open_ce_cmd()
    .args(["build", "image", "--local_conda_channel", "no-such-channel"])
    .args(["--conda_env_files", "env.yaml"])
    .assert()
    .code(1)
    .stderr(predicate::str::contains("no-such-channel"));
}

#[test]
fn packages_missing_from_the_channel_are_rejected() {
  let env = TestEnv::new();
  plan_zlib_env(&env);

  env
    .open_ce_cmd()
    .args(["build", "image", "--local_conda_channel"])
    .arg(env.output_path())
    .arg("--conda_env_files")
    .arg(env.output_path().join(CPU_ENV))
    .assert()
    .code(1)
    .stderr(predicate::str::contains("missing from the local channel"))
    .stderr(predicate::str::contains("zlib 1.2.13"));
}

#[test]
fn conda_env_files_is_required() {
  let env = TestEnv::new();

  env
    .open_ce_cmd()
    .args(["build", "image"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("--conda_env_files"));
}

#[cfg(unix)]
#[test]
fn builds_an_image_with_the_given_tool() {
  use std::os::unix::fs::PermissionsExt;

  let env = TestEnv::new();
  plan_zlib_env(&env);
  env.write_file("condabuild/linux-ppc64le/zlib-1.2.13-h1234_0.conda", "");

  let log = env.root().join("tool.log");
  let tool = env.write_file("fake-tool", &format!("#!/bin/sh\necho \"$@\" >> {}\n", log.display()));
  fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();

  env
    .open_ce_cmd()
    .args(["build", "image", "--local_conda_channel"])
    .arg(env.output_path())
    .arg("--conda_env_files")
    .arg(env.output_path().join(CPU_ENV))
    .arg("--container_tool")
    .arg(&tool)
    .assert()
    .success()
    .stdout(predicate::str::contains("Built 1 image(s)"))
    .stdout(predicate::str::contains("py3.9-cpu-openmpi"));

  let invocation = fs::read_to_string(&log).unwrap();
  assert!(invocation.starts_with("build "));
  assert!(invocation.contains("-t open-ce:"));
  assert!(invocation.contains("CONDA_ENV_FILE=.open-ce-image/"));
  assert!(!env.output_path().join(".open-ce-image").exists());
}
