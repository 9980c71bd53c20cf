//! Completion markers for idempotent re-entry.
//!
//! A marker is written after a unit succeeds. A later run that finds a marker
//! with the same unit fingerprint and all recorded artifacts still present
//! reuses the unit instead of building it again.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::UnitArtifacts;
use crate::consts::MARKER_DIR;
use crate::graph::{BuildUnit, UnitId};
use crate::util::hash::{Fingerprint, Fingerprintable};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitMarker {
  pub unit: UnitId,
  pub variant: String,
  pub fingerprint: Fingerprint,
  pub outputs: Vec<String>,
  pub artifacts: UnitArtifacts,
  pub completed_at: DateTime<Utc>,
}

pub fn marker_path(output_folder: &Path, unit: &UnitId) -> PathBuf {
  output_folder.join(MARKER_DIR).join(format!("{}.json", unit.file_name()))
}

/// Artifacts recorded for `unit` by an earlier run, if they are still usable.
pub fn read_marker(output_folder: &Path, unit: &BuildUnit) -> Option<UnitArtifacts> {
  let path = marker_path(output_folder, &unit.id);
  let text = fs::read_to_string(&path).ok()?;
  let marker: UnitMarker = match serde_json::from_str(&text) {
    Ok(marker) => marker,
    Err(e) => {
      debug!(path = %path.display(), error = %e, "ignoring unreadable marker");
      return None;
    }
  };

  let current = unit.fingerprint().ok()?;
  if marker.fingerprint != current {
    debug!(unit = %unit.id, "marker fingerprint does not match, rebuilding");
    return None;
  }
  if marker.artifacts.packages.is_empty() {
    debug!(unit = %unit.id, "marker records no packages, rebuilding");
    return None;
  }
  if let Some(missing) = marker.artifacts.packages.iter().find(|p| !p.exists()) {
    debug!(unit = %unit.id, missing = %missing.display(), "recorded artifact is gone, rebuilding");
    return None;
  }
  Some(marker.artifacts)
}

/// Record that `unit` completed. The file is written to a temp name and renamed into place.
pub fn write_marker(output_folder: &Path, unit: &BuildUnit, artifacts: &UnitArtifacts) -> io::Result<()> {
  let marker = UnitMarker {
    unit: unit.id.clone(),
    variant: unit.variant.variant_string(),
    fingerprint: unit.fingerprint().map_err(io::Error::other)?,
    outputs: unit.output_names().map(str::to_string).collect(),
    artifacts: artifacts.clone(),
    completed_at: Utc::now(),
  };
  let path = marker_path(output_folder, &unit.id);
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent)?;
  }
  let json = serde_json::to_string_pretty(&marker).map_err(io::Error::other)?;
  let tmp = path.with_extension("json.tmp");
  fs::write(&tmp, json)?;
  fs::rename(&tmp, &path)
}
