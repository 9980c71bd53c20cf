//! Feedstock repositories: locating or cloning them and reading their recipes.

pub mod git;
pub mod recipe;

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::consts::CONDA_BUILD_CONFIG_FILE;
use crate::env_config::PackageRef;
use crate::util::{expand_path, is_git_remote};

pub use git::{FetchError, apply_patches, clone_repo};
pub use recipe::{RecipeConfig, RecipeEntry, RecipeError, RecipeMeta, RecipeOutput, package_name};

const FEEDSTOCK_SUFFIX: &str = "-feedstock";

/// Where feedstocks live and where missing ones are cloned from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedstockSettings {
  pub repository_folder: PathBuf,
  pub git_location: String,
  /// Overrides every package's `git_tag` when set.
  pub git_tag_for_env: Option<String>,
}

/// A feedstock reference from an environment file, normalised for acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedstockRef {
  /// Short name, e.g. `numpy` for `numpy-feedstock`.
  pub name: String,
  /// Directory name under the repository folder.
  pub repo_dir_name: String,
  pub url: String,
  pub git_tag: Option<String>,
  pub patches: Vec<PathBuf>,
}

impl FeedstockRef {
  /// Normalise `package`. Patch paths resolve against `base_dir`, the directory of the env file.
  pub fn from_package(package: &PackageRef, base_dir: &Path, git_location: &str) -> Self {
    let value = package.feedstock.trim();
    let (name, repo_dir_name, url) = if is_git_remote(value) {
      let url = if value.ends_with(".git") { value.to_string() } else { format!("{}.git", value) };
      let repo = url
        .trim_end_matches(".git")
        .rsplit(['/', ':'])
        .next()
        .unwrap_or_default()
        .to_string();
      (repo.trim_end_matches(FEEDSTOCK_SUFFIX).to_string(), repo, url)
    } else {
      let name = value.trim_end_matches(FEEDSTOCK_SUFFIX).to_string();
      let repo = format!("{}{}", name, FEEDSTOCK_SUFFIX);
      let url = format!("{}/{}.git", git_location.trim_end_matches('/'), repo);
      (name, repo, url)
    };

    FeedstockRef {
      name,
      repo_dir_name,
      url,
      git_tag: package.git_tag.clone(),
      patches: package.patches.iter().map(|p| expand_path(p, base_dir)).collect(),
    }
  }

  pub fn repo_dir(&self, repository_folder: &Path) -> PathBuf {
    repository_folder.join(&self.repo_dir_name)
  }
}

/// Make `feedstock` available locally and return its directory.
///
/// An existing directory is reused as is; otherwise the repository is cloned
/// at the env-wide tag, or the package's own tag, and its patches applied.
pub async fn acquire(feedstock: &FeedstockRef, settings: &FeedstockSettings) -> Result<PathBuf, FetchError> {
  let dir = feedstock.repo_dir(&settings.repository_folder);
  if dir.exists() {
    debug!(feedstock = %feedstock.name, path = %dir.display(), "reusing existing feedstock");
  } else {
    let tag = settings.git_tag_for_env.as_deref().or(feedstock.git_tag.as_deref());
    clone_repo(&feedstock.url, &dir, tag).await?;
    info!(feedstock = %feedstock.name, path = %dir.display(), "cloned feedstock");
  }
  apply_patches(&dir, &feedstock.patches).await?;
  Ok(dir)
}

/// The feedstock's own `config/conda_build_config.yaml`, if it has one.
pub fn feedstock_build_config(feedstock_dir: &Path) -> Option<PathBuf> {
  let path = feedstock_dir.join("config").join(CONDA_BUILD_CONFIG_FILE);
  path.exists().then_some(path)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::TempDir;

  fn package(feedstock: &str) -> PackageRef {
    serde_yaml::from_str(&format!("feedstock: {}\ngit_tag: v1\npatches: [fix.patch]\n", feedstock)).unwrap()
  }

  #[test]
  fn bare_name_uses_git_location() {
    let r = FeedstockRef::from_package(&package("numpy"), Path::new("/envs"), "https://github.com/open-ce/");
    assert_eq!(r.name, "numpy");
    assert_eq!(r.repo_dir_name, "numpy-feedstock");
    assert_eq!(r.url, "https://github.com/open-ce/numpy-feedstock.git");
    assert_eq!(r.git_tag.as_deref(), Some("v1"));
    assert_eq!(r.patches, vec![PathBuf::from("/envs/fix.patch")]);
  }

  #[test]
  fn suffix_is_not_doubled() {
    let r = FeedstockRef::from_package(&package("numpy-feedstock"), Path::new("/"), "https://github.com/open-ce");
    assert_eq!(r.name, "numpy");
    assert_eq!(r.repo_dir_name, "numpy-feedstock");
  }

  #[test]
  fn urls_are_used_verbatim() {
    let r = FeedstockRef::from_package(
      &package("git@github.com:my-org/pytorch-feedstock"),
      Path::new("/"),
      "https://github.com/open-ce",
    );
    assert_eq!(r.url, "git@github.com:my-org/pytorch-feedstock.git");
    assert_eq!(r.repo_dir_name, "pytorch-feedstock");
    assert_eq!(r.name, "pytorch");
  }

  #[tokio::test]
  async fn existing_checkout_is_reused() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("numpy-feedstock")).unwrap();
    let mut package = package("numpy");
    package.patches.clear();
    let r = FeedstockRef::from_package(&package, dir.path(), "https://invalid.example");
    let settings = FeedstockSettings {
      repository_folder: dir.path().to_path_buf(),
      git_location: "https://invalid.example".into(),
      git_tag_for_env: None,
    };
    assert_eq!(acquire(&r, &settings).await.unwrap(), dir.path().join("numpy-feedstock"));
  }

  #[test]
  fn build_config_lookup() {
    let dir = TempDir::new().unwrap();
    assert!(feedstock_build_config(dir.path()).is_none());
    fs::create_dir(dir.path().join("config")).unwrap();
    fs::write(dir.path().join("config/conda_build_config.yaml"), "").unwrap();
    assert!(feedstock_build_config(dir.path()).is_some());
  }
}
