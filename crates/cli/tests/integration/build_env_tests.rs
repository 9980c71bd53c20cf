//! Integration tests for `open-ce build env`.

use std::fs;

use predicates::prelude::*;

use super::common::TestEnv;

const CPU_ENV: &str = "open-ce-conda-env-py3.9-cpu-openmpi.yaml";
const CUDA_ENV: &str = "open-ce-conda-env-py3.9-cuda-openmpi.yaml";

#[test]
fn skip_build_packages_writes_one_env_file_per_variant() {
  let env = TestEnv::new();

  env
    .plan_env("imaging-env.yaml")
    .assert()
    .success()
    .stdout(predicate::str::contains("packages were not built"));

  let cpu = fs::read_to_string(env.output_path().join(CPU_ENV)).unwrap();
  let cuda = fs::read_to_string(env.output_path().join(CUDA_ENV)).unwrap();

  assert!(cpu.starts_with("#Open-CE Version:"));
  assert!(cpu.contains("#open-ce-variant:"));
  assert!(cpu.contains("#open-ce-local-packages:"));
  assert!(cpu.contains("numpy 1.23.5.*"));
  assert!(cpu.contains("zlib 1.2.13"));
  assert!(cpu.contains("libpng 1.6.39"));
  assert!(cpu.contains("- conda-forge"));
  assert!(cpu.contains("- defaults"));

  assert!(!cpu.contains("nccl"));
  assert!(cuda.contains("nccl 2.16.2"));
}

#[test]
fn python_and_build_type_matrix_writes_four_env_files() {
  let env = TestEnv::new();

  env
    .plan_env("imaging-env.yaml")
    .args(["--python_versions", "3.8,3.9", "--build_types", "cpu,cuda", "--mpi_types", "openmpi"])
    .assert()
    .success();

  let mut written: Vec<String> = fs::read_dir(env.output_path())
    .unwrap()
    .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
    .filter(|name| name.starts_with("open-ce-conda-env-") && name.ends_with(".yaml"))
    .collect();
  written.sort();

  assert_eq!(
    written,
    vec![
      "open-ce-conda-env-py3.8-cpu-openmpi.yaml",
      "open-ce-conda-env-py3.8-cuda-openmpi.yaml",
      "open-ce-conda-env-py3.9-cpu-openmpi.yaml",
      "open-ce-conda-env-py3.9-cuda-openmpi.yaml",
    ]
  );
}

#[test]
fn rerunning_the_plan_is_byte_identical() {
  let env = TestEnv::new();

  env.plan_env("imaging-env.yaml").assert().success();
  let first = fs::read(env.output_path().join(CUDA_ENV)).unwrap();

  env.plan_env("imaging-env.yaml").assert().success();
  let second = fs::read(env.output_path().join(CUDA_ENV)).unwrap();

  assert_eq!(first, second);
}

#[test]
fn multiple_cuda_versions_are_part_of_the_file_name() {
  let env = TestEnv::new();

  env
    .plan_env("imaging-env.yaml")
    .args(["--build_types", "cuda", "--cuda_versions", "11.2,11.4"])
    .assert()
    .success();

  assert!(env.output_path().join("open-ce-conda-env-py3.9-cuda-openmpi-11.2.yaml").is_file());
  assert!(env.output_path().join("open-ce-conda-env-py3.9-cuda-openmpi-11.4.yaml").is_file());
  assert!(!env.output_path().join(CUDA_ENV).exists());
}

#[test]
fn dependency_cycle_is_reported() {
  let env = TestEnv::new();

  env
    .plan_env("cycle-env.yaml")
    .assert()
    .code(1)
    .stderr(predicate::str::contains("cycle"));

  assert!(!env.output_path().join(CPU_ENV).exists());
}

#[test]
fn unknown_env_file_key_is_rejected() {
  let env = TestEnv::new();

  env
    .plan_env("broken-env.yaml")
    .assert()
    .code(1)
    .stderr(predicate::str::contains("unexpected_key"));
}

#[test]
fn unresolved_package_is_rejected() {
  let env = TestEnv::new();

  env
    .plan_env("imaging-env.yaml")
    .args(["--packages", "nosuchpackage"])
    .assert()
    .code(1)
    .stderr(predicate::str::contains("nosuchpackage"));
}

#[test]
fn packages_filter_limits_the_env_file() {
  let env = TestEnv::new();

  env
    .plan_env("imaging-env.yaml")
    .args(["--packages", "zlib", "--build_types", "cpu"])
    .assert()
    .success();

  let cpu = fs::read_to_string(env.output_path().join(CPU_ENV)).unwrap();
  assert!(cpu.contains("zlib 1.2.13"));
  assert!(!cpu.contains("libpng"));
}

#[test]
fn missing_conda_build_config_is_rejected() {
  let env = TestEnv::new();

  env
    .plan_env("imaging-env.yaml")
    .args(["--conda_build_configs", "missing_config.yaml"])
    .assert()
    .code(1)
    .stderr(predicate::str::contains("missing_config.yaml"));
}

#[test]
fn json_output_lists_env_files() {
  let env = TestEnv::new();

  let output = env
    .plan_env("imaging-env.yaml")
    .args(["--build_types", "cpu", "-o", "json"])
    .output()
    .unwrap();
  assert!(output.status.success());

  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  let files = json["env_files"].as_array().unwrap();
  assert_eq!(files.len(), 1);
  assert!(files[0].as_str().unwrap().ends_with(CPU_ENV));
  assert!(json["failed"].as_array().unwrap().is_empty());
}
