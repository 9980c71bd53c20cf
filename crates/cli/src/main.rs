mod args;
mod cmd;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use opence_lib::OpenCeError;

use cmd::{BuildCommand, cmd_build_env, cmd_build_feedstock, cmd_build_image};
use output::print_error;

/// Open-CE - build conda packages and environments for Open-CE
#[derive(Parser)]
#[command(name = "open-ce")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build packages, environments, or images
  Build {
    #[command(subcommand)]
    command: BuildCommand,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let result = match cli.command {
    Commands::Build { command } => match command {
      BuildCommand::Env(args) => cmd_build_env(&args),
      BuildCommand::Feedstock(args) => cmd_build_feedstock(&args),
      BuildCommand::Image(args) => cmd_build_image(&args),
    },
  };

  if let Err(err) = &result
    && let Some(domain) = err.chain().find_map(|e| e.downcast_ref::<OpenCeError>())
  {
    print_error(&domain.to_string());
    std::process::exit(1);
  }
  result
}
