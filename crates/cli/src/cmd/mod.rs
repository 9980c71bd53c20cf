mod build_env;
mod build_feedstock;
mod build_image;

use clap::Subcommand;

pub use build_env::{EnvArgs, cmd_build_env};
pub use build_feedstock::{FeedstockArgs, cmd_build_feedstock};
pub use build_image::{ImageArgs, cmd_build_image};

#[derive(Subcommand, Debug)]
pub enum BuildCommand {
  /// Build conda environments from Open-CE environment files
  Env(EnvArgs),

  /// Build the recipes of a single feedstock
  Feedstock(FeedstockArgs),

  /// Build runtime container images from conda environment files
  Image(ImageArgs),
}
