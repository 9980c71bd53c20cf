//! Implementation of the `open-ce build env` command.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;
use tracing::debug;

use opence_lib::ops::{EnvBuildOptions, build_env, ensure_success};
use opence_lib::util::parse_arg_list;

use crate::args::{BuildArgs, ContainerArgs, VariantArgs, default_repository_folder};
use crate::output::{
  OutputFormat, ReportJson, print_env_files, print_info, print_json, print_report, print_stat, print_success,
};

#[derive(Args, Debug)]
pub struct EnvArgs {
  /// Environment files, URLs, or names of environments in the open-ce repository
  #[arg(required = true, num_args = 1..)]
  pub env_config_file: Vec<String>,

  /// Only build these packages and their dependencies; a comma delimited list
  #[arg(long = "packages", default_value = "")]
  pub packages: String,

  /// Directory that contains (or receives) the feedstock repositories
  #[arg(long = "repository_folder", default_value_os_t = default_repository_folder())]
  pub repository_folder: PathBuf,

  /// Git tag to check out for every feedstock and imported environment file
  #[arg(long = "git_tag_for_env")]
  pub git_tag_for_env: Option<String>,

  /// Only write the conda environment files
  #[arg(long = "skip_build_packages")]
  pub skip_build_packages: bool,

  /// Run the feedstock tests after a successful build
  #[arg(long = "run_tests")]
  pub run_tests: bool,

  /// Comma delimited list of labels enabling optional tests
  #[arg(long = "test_labels", default_value = "")]
  pub test_labels: String,

  /// Output format
  #[arg(short = 'o', long, value_enum, default_value = "text")]
  pub output: OutputFormat,

  #[command(flatten)]
  pub build: BuildArgs,

  #[command(flatten)]
  pub variants: VariantArgs,

  #[command(flatten)]
  pub container: ContainerArgs,
}

impl EnvArgs {
  fn options(&self) -> EnvBuildOptions {
    let mut graph = self
      .build
      .graph_options(self.repository_folder.clone(), self.git_tag_for_env.clone());
    graph.packages = parse_arg_list(&[&self.packages]);

    let mut options = EnvBuildOptions::new(self.env_config_file.clone(), graph);
    options.variants = self.variants.selection();
    options.execute = self.build.execute_config();
    options.conda_pkg_format = self.build.conda_pkg_format.clone();
    options.skip_build_packages = self.skip_build_packages;
    options.run_tests = self.run_tests;
    options.test_labels = parse_arg_list(&[&self.test_labels]);
    options.container = self.container.request();
    options
  }
}

/// Execute `build env`.
///
/// Writes one conda environment file per variant, then builds every package
/// unless `--skip_build_packages` is given. A run with failed units prints
/// the full report before returning the failure.
pub fn cmd_build_env(args: &EnvArgs) -> Result<()> {
  let options = args.options();
  debug!(env_files = ?options.env_files, variants = ?options.variants, "starting env build");
  let started = Instant::now();

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let outcome = rt.block_on(build_env(&options))?;

  if args.output.is_json() {
    print_json(&ReportJson::new(&outcome.env_files, outcome.report.as_ref()))?;
    if let Some(report) = &outcome.report {
      ensure_success(report)?;
    }
    return Ok(());
  }

  if outcome.containerized {
    print_success("Container build complete");
    return Ok(());
  }

  print_env_files(&outcome.env_files);
  let Some(report) = &outcome.report else {
    print_success("Conda environment files written; packages were not built");
    return Ok(());
  };

  print_report(report, started.elapsed());
  ensure_success(report)?;

  println!();
  print_success(&format!("Build complete: {}", report.summary()));
  if let Some(results) = &outcome.test_results {
    print_stat("Test results", &results.display().to_string());
  }
  print_info("Create an environment with \"conda env create -f <conda_env_file>\"");
  Ok(())
}
