//! Cloning feedstock repositories and applying local patches.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::consts::PATCHED_MARKER;
use crate::util::{Cmd, CmdError};

/// Errors that can occur while acquiring a feedstock.
#[derive(Debug, Error)]
pub enum FetchError {
  /// Failed to create the repository directory.
  #[error("failed to create repository directory '{0}': {1}")]
  CreateDir(PathBuf, #[source] std::io::Error),

  /// Failed to clone a git repository.
  #[error("unable to clone repository '{url}': {source}")]
  Clone {
    url: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  /// Failed to check out the requested tag or branch.
  #[error("failed to checkout '{rev}' of '{url}': {source}")]
  Checkout {
    url: String,
    rev: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  /// A patch listed in an environment file does not exist.
  #[error("patch file not found: {0}")]
  PatchNotFound(PathBuf),

  /// `git apply` rejected a patch.
  #[error("failed to apply patch '{patch}' to '{repo}': {source}")]
  Patch {
    patch: PathBuf,
    repo: PathBuf,
    #[source]
    source: CmdError,
  },

  #[error("clone task failed: {0}")]
  Join(String),
}

/// Clone `url` into `dest`, checking out `rev` when given.
pub async fn clone_repo(url: &str, dest: &Path, rev: Option<&str>) -> Result<(), FetchError> {
  if let Some(parent) = dest.parent() {
    fs::create_dir_all(parent).map_err(|e| FetchError::CreateDir(parent.to_path_buf(), e))?;
  }
  info!(url, rev = rev.unwrap_or("HEAD"), path = %dest.display(), "cloning repository");

  let url = url.to_string();
  let dest = dest.to_path_buf();
  let rev = rev.map(str::to_string);
  tokio::task::spawn_blocking(move || clone_blocking(&url, &dest, rev.as_deref()))
    .await
    .map_err(|e| FetchError::Join(e.to_string()))?
}

fn clone_blocking(url: &str, dest: &Path, rev: Option<&str>) -> Result<(), FetchError> {
  let mut prepared = gix::prepare_clone(url, dest).map_err(|e| FetchError::Clone {
    url: url.to_string(),
    source: Box::new(e),
  })?;

  if let Some(rev) = rev {
    prepared = prepared.with_ref_name(Some(rev)).map_err(|e| FetchError::Checkout {
      url: url.to_string(),
      rev: rev.to_string(),
      source: Box::new(e),
    })?;
  }

  let (mut checkout, _outcome) = prepared
    .fetch_then_checkout(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| FetchError::Clone {
      url: url.to_string(),
      source: Box::new(e),
    })?;

  checkout
    .main_worktree(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| FetchError::Checkout {
      url: url.to_string(),
      rev: rev.unwrap_or("HEAD").to_string(),
      source: Box::new(e),
    })?;

  Ok(())
}

/// Apply `patches` to the repository at `repo` with `git apply`.
///
/// A marker file records that patches were applied so reusing an existing
/// checkout does not apply them twice.
pub async fn apply_patches(repo: &Path, patches: &[PathBuf]) -> Result<(), FetchError> {
  if patches.is_empty() {
    return Ok(());
  }
  let marker = repo.join(PATCHED_MARKER);
  if marker.exists() {
    debug!(repo = %repo.display(), "patches already applied");
    return Ok(());
  }

  for patch in patches {
    if !patch.exists() {
      return Err(FetchError::PatchNotFound(patch.clone()));
    }
    Cmd::new("git")
      .arg("apply")
      .arg(patch.to_string_lossy())
      .cwd(repo)
      .run()
      .await
      .map_err(|source| FetchError::Patch {
        patch: patch.clone(),
        repo: repo.to_path_buf(),
        source,
      })?;
    info!(patch = %patch.display(), repo = %repo.display(), "applied patch");
  }

  fs::write(&marker, "").map_err(|e| FetchError::CreateDir(repo.to_path_buf(), e))?;
  Ok(())
}
