//! Implementation of the `open-ce build feedstock` command.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;
use tracing::debug;

use opence_lib::ops::{FeedstockBuildOptions, build_feedstock, ensure_success};
use opence_lib::util::parse_arg_list;

use crate::args::{BuildArgs, ContainerArgs, VariantArgs, default_repository_folder};
use crate::output::{print_report, print_success};

#[derive(Args, Debug)]
pub struct FeedstockArgs {
  /// Recipe config file, relative to the working directory
  #[arg(long = "recipe-config-file", alias = "recipe_config_file")]
  pub recipe_config_file: Option<PathBuf>,

  /// Comma delimited list of recipe names to build
  #[arg(long = "recipes", default_value = "")]
  pub recipes: String,

  /// Feedstock directory to build
  #[arg(long = "working_directory", default_value = ".")]
  pub working_directory: PathBuf,

  /// Local source directory, exported to the build as LOCAL_SRC_DIR
  #[arg(long = "local_src_dir")]
  pub local_src_dir: Option<PathBuf>,

  /// Prepare a conda debug environment instead of building
  #[arg(long = "debug")]
  pub debug: bool,

  /// Pattern selecting the output to debug in a multi-output recipe
  #[arg(long = "debug_output_id", requires = "debug")]
  pub debug_output_id: Option<String>,

  #[command(flatten)]
  pub build: BuildArgs,

  #[command(flatten)]
  pub variants: VariantArgs,

  #[command(flatten)]
  pub container: ContainerArgs,
}

impl FeedstockArgs {
  fn options(&self) -> FeedstockBuildOptions {
    let mut graph = self.build.graph_options(default_repository_folder(), None);
    graph.local_src_dir = self.local_src_dir.clone();

    let mut options = FeedstockBuildOptions::new(self.working_directory.clone(), graph);
    options.recipe_config_file = self.recipe_config_file.clone();
    options.recipes = parse_arg_list(&[&self.recipes]);
    options.variants = self.variants.selection();
    options.execute = self.build.execute_config();
    options.conda_pkg_format = self.build.conda_pkg_format.clone();
    options.debug = self.debug;
    options.debug_output_id = self.debug_output_id.clone();
    options.container = self.container.request();
    options
  }
}

/// Execute `build feedstock`.
pub fn cmd_build_feedstock(args: &FeedstockArgs) -> Result<()> {
  let options = args.options();
  debug!(working_directory = %options.working_directory.display(), debug = options.debug, "starting feedstock build");
  let started = Instant::now();

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let Some(report) = rt.block_on(build_feedstock(&options))? else {
    print_success("Container build complete");
    return Ok(());
  };

  print_report(&report, started.elapsed());
  ensure_success(&report)?;

  println!();
  if args.debug {
    print_success("Debug environment prepared");
  } else {
    print_success(&format!("Build complete: {}", report.summary()));
  }
  Ok(())
}
