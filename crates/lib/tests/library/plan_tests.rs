//! Plan-only `build env` runs and image validation against the emitted files.

use std::fs;
use std::path::{Path, PathBuf};

use opence_lib::consts::DEFAULT_GIT_LOCATION;
use opence_lib::env_config::EnvLoadOptions;
use opence_lib::env_file::{local_packages_of_env_file, variant_of_env_file};
use opence_lib::feedstock::FeedstockSettings;
use opence_lib::graph::GraphOptions;
use opence_lib::image::{ImageBuildError, ImageBuildOptions, build_runtime_images, missing_packages};
use opence_lib::ops::{EnvBuildOptions, build_env};
use opence_lib::{ErrorKind, OpenCeError};
use tempfile::TempDir;

fn feedstock(root: &Path, name: &str, meta: &str) {
  let dir = root.join(format!("{}-feedstock", name)).join("recipe");
  fs::create_dir_all(&dir).unwrap();
  fs::write(dir.join("meta.yaml"), meta).unwrap();
}

fn graph_options(root: &Path) -> GraphOptions {
  GraphOptions {
    feedstocks: FeedstockSettings {
      repository_folder: root.to_path_buf(),
      git_location: DEFAULT_GIT_LOCATION.to_string(),
      git_tag_for_env: None,
    },
    env: EnvLoadOptions {
      git_location: DEFAULT_GIT_LOCATION.to_string(),
      git_tag_for_env: None,
    },
    packages: Vec::new(),
    channels: Vec::new(),
    conda_build_configs: Vec::new(),
    local_src_dir: None,
  }
}

/// A project with `base` and `app` feedstocks and an env file listing both.
fn project() -> (TempDir, PathBuf) {
  let dir = TempDir::new().unwrap();
  feedstock(dir.path(), "base", "package:\n  name: base\n  version: 2.0.1\n");
  feedstock(
    dir.path(),
    "app",
    "package:\n  name: app\n  version: 1.4.2\nrequirements:\n  run:\n    - base >=2\n    - six\n",
  );
  let env = dir.path().join("app-env.yaml");
  fs::write(
    &env,
    "packages:\n  - feedstock: base\n  - feedstock: app\nexternal_dependencies:\n  - requests 2.28\n",
  )
  .unwrap();
  (dir, env)
}

fn plan_options(dir: &TempDir, env: &Path) -> EnvBuildOptions {
  let mut options = EnvBuildOptions::new(vec![env.display().to_string()], graph_options(dir.path()));
  options.variants.build_types = vec!["cpu".into()];
  options.execute.output_folder = dir.path().join("condabuild");
  options.skip_build_packages = true;
  options
}

#[tokio::test]
async fn plan_only_run_writes_env_file_without_building() {
  let (dir, env) = project();

  let outcome = build_env(&plan_options(&dir, &env)).await.unwrap();

  assert!(outcome.report.is_none());
  assert_eq!(outcome.env_files.len(), 1);
  let file = &outcome.env_files[0].path;
  assert!(file.ends_with("open-ce-conda-env-py3.9-cpu-openmpi.yaml"));

  assert_eq!(variant_of_env_file(file).unwrap().as_deref(), Some("py3.9-cpu-openmpi"));
  let mut local: Vec<String> = local_packages_of_env_file(file)
    .unwrap()
    .into_iter()
    .map(|p| format!("{} {}", p.name, p.version))
    .collect();
  local.sort();
  assert_eq!(local, vec!["app 1.4.2", "base 2.0.1"]);

  let text = fs::read_to_string(file).unwrap();
  assert!(text.contains("requests 2.28.*"));
  assert!(text.contains("- six"));
}

#[tokio::test]
async fn second_plan_leaves_env_file_untouched() {
  let (dir, env) = project();
  let options = plan_options(&dir, &env);

  let first = build_env(&options).await.unwrap();
  let second = build_env(&options).await.unwrap();

  assert!(first.env_files[0].changed);
  assert!(!second.env_files[0].changed);
}

#[tokio::test]
async fn image_build_reports_missing_packages() {
  let (dir, env) = project();
  let outcome = build_env(&plan_options(&dir, &env)).await.unwrap();
  let env_file = outcome.env_files[0].path.clone();
  let channel = dir.path().join("condabuild");

  fs::create_dir_all(channel.join("noarch")).unwrap();
  fs::write(channel.join("noarch").join("base-2.0.1-py_0.conda"), "").unwrap();
  assert_eq!(missing_packages(&channel, &env_file).unwrap(), vec!["app 1.4.2"]);

  let err = build_runtime_images(&ImageBuildOptions {
    local_conda_channel: channel,
    conda_env_files: vec![env_file],
    container_build_args: Vec::new(),
    container_tool: None,
  })
  .await
  .unwrap_err();

  assert!(matches!(err, ImageBuildError::MissingPackages { ref packages, .. } if packages == &["app 1.4.2"]));
  assert_eq!(OpenCeError::from(err).kind(), ErrorKind::Image);
}

#[tokio::test]
async fn unknown_package_selection_is_a_resolution_error() {
  let (dir, env) = project();
  let mut options = plan_options(&dir, &env);
  options.graph.packages = vec!["missing".into()];

  let err = build_env(&options).await.unwrap_err();

  assert_eq!(err.kind(), ErrorKind::Resolution);
  assert!(err.to_string().contains("missing"));
}
