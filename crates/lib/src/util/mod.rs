//! Shared utilities.
//!
//! Argument list parsing, path resolution, version comparison, subprocess
//! execution and fingerprint hashing used across the crate.

pub mod cmd;
pub mod hash;

#[cfg(test)]
pub mod testutil;

use std::cmp::Ordering;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub use cmd::{Cmd, CmdError, CmdOutput};

/// Split comma-separated flag values into a flat list.
///
/// Accepts repeated flags as well, so `["3.8,3.9", "3.10"]` yields three items.
/// Blank entries are dropped and whitespace is trimmed.
pub fn parse_arg_list<S: AsRef<str>>(values: &[S]) -> Vec<String> {
  values
    .iter()
    .flat_map(|v| v.as_ref().split(','))
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(str::to_string)
    .collect()
}

/// True for anything that should be fetched rather than read from disk.
pub fn is_url(location: &str) -> bool {
  location.starts_with("https://") || location.starts_with("http://")
}

/// True for git locations that name a full remote rather than an org prefix.
pub fn is_git_remote(location: &str) -> bool {
  is_url(location) || location.starts_with("git@")
}

/// The user's home directory, falling back to `/` when `HOME` is unset.
pub fn home_dir() -> PathBuf {
  std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("/"))
}

/// Expand `~` and make `path` absolute relative to `base`. Does not touch the filesystem.
pub fn expand_path(path: &str, base: &Path) -> PathBuf {
  if let Some(rest) = path.strip_prefix("~/") {
    home_dir().join(rest)
  } else if path == "~" {
    home_dir()
  } else if Path::new(path).is_absolute() {
    PathBuf::from(path)
  } else {
    base.join(path)
  }
}

/// Like [`expand_path`], but canonicalizes and therefore requires the path to exist.
pub fn resolve_existing(path: &str, base: &Path) -> io::Result<PathBuf> {
  dunce::canonicalize(expand_path(path, base))
}

/// Absolute form of `path` without requiring it to exist.
pub fn absolute(path: &Path) -> io::Result<PathBuf> {
  if path.is_absolute() {
    Ok(path.to_path_buf())
  } else {
    Ok(std::env::current_dir()?.join(path))
  }
}

/// Write `contents` only when the file is missing or differs. Returns whether it wrote.
pub fn write_if_changed(path: &Path, contents: &str) -> io::Result<bool> {
  if let Ok(existing) = fs::read_to_string(path)
    && existing == contents
  {
    return Ok(false);
  }
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent)?;
  }
  let tmp = path.with_extension("tmp");
  fs::write(&tmp, contents)?;
  fs::rename(&tmp, path)?;
  Ok(true)
}

/// Compare dotted version strings numerically where possible.
///
/// `3.10` sorts after `3.9`; non-numeric segments compare lexically; missing
/// trailing segments count as zero.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
  let split = |v: &str| -> Vec<String> { v.split(['.', '-', '_']).map(str::to_string).collect() };
  let (left, right) = (split(a), split(b));
  let len = left.len().max(right.len());
  for i in 0..len {
    let l = left.get(i).map(String::as_str).unwrap_or("0");
    let r = right.get(i).map(String::as_str).unwrap_or("0");
    let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
      (Ok(x), Ok(y)) => x.cmp(&y),
      _ => l.cmp(r),
    };
    if ord != Ordering::Equal {
      return ord;
    }
  }
  Ordering::Equal
}

/// Check `version` against a constraint list such as `">=1.2,<2"`.
///
/// Each clause may start with one of `>=`, `<=`, `==`, `!=`, `>`, `<`, `=`;
/// a bare version means equality.
pub fn version_satisfies(version: &str, constraints: &str) -> bool {
  constraints
    .split(',')
    .map(str::trim)
    .filter(|c| !c.is_empty())
    .all(|clause| {
      let (op, want) = ["<=", ">=", "==", "!=", "<", ">", "="]
        .iter()
        .find_map(|op| clause.strip_prefix(op).map(|rest| (*op, rest.trim())))
        .unwrap_or(("==", clause));
      let ord = compare_versions(version, want);
      match op {
        "<=" => ord != Ordering::Greater,
        ">=" => ord != Ordering::Less,
        "<" => ord == Ordering::Less,
        ">" => ord == Ordering::Greater,
        "!=" => ord != Ordering::Equal,
        _ => ord == Ordering::Equal,
      }
    })
}
