//! Incremental rebuild tracking.
//!
//! After a stage succeeds the tracker records a [`StageMarker`] holding the
//! values of that stage's dirty-set options. A stage is dirty when its
//! marker is missing or out of date, or when the stage before it is dirty.
//! Recording or invalidating a stage drops every downstream marker, so a
//! re-run upstream always forces the rest of the lifecycle to follow.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::unit::{BuildUnit, LifecycleState, Stage};
use crate::util::fs::remove_path;

/// Bumped whenever the marker format changes; older markers count as stale.
pub const MARKER_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum DirtyError {
  #[error("failed to read marker {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write marker {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to remove marker {path}: {source}")]
  Remove {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// What a stage completed with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageMarker {
  pub version: u32,
  pub backend: String,
  pub stage: Stage,
  pub values: BTreeMap<String, Value>,
}

pub fn marker_path(unit: &BuildUnit, stage: Stage) -> PathBuf {
  unit.dirs.state.join(format!("{}.json", stage))
}

/// Reads the marker for `stage`. Unreadable JSON counts as no marker.
pub fn read_marker(unit: &BuildUnit, stage: Stage) -> Result<Option<StageMarker>, DirtyError> {
  let path = marker_path(unit, stage);
  let contents = match fs::read_to_string(&path) {
    Ok(contents) => contents,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
    Err(source) => return Err(DirtyError::Read { path, source }),
  };

  match serde_json::from_str(&contents) {
    Ok(marker) => Ok(Some(marker)),
    Err(e) => {
      warn!(unit = %unit.name, stage = %stage, path = %path.display(), error = %e, "ignoring corrupt stage marker");
      Ok(None)
    }
  }
}

/// Current values of `stage`'s dirty-set options.
pub fn current_values(unit: &BuildUnit, stage: Stage) -> BTreeMap<String, Value> {
  unit.config.snapshot(unit.schema.dirty_set(stage))
}

/// Whether `stage`'s own marker is missing or disagrees with the current configuration.
pub fn is_stale(unit: &BuildUnit, stage: Stage) -> Result<bool, DirtyError> {
  let Some(marker) = read_marker(unit, stage)? else {
    return Ok(true);
  };
  if marker.version != MARKER_VERSION || marker.backend != unit.backend {
    return Ok(true);
  }
  Ok(marker.values != current_values(unit, stage))
}

pub fn is_dirty(unit: &BuildUnit, stage: Stage) -> Result<bool, DirtyError> {
  if is_stale(unit, stage)? {
    debug!(unit = %unit.name, stage = %stage, "stage is dirty");
    return Ok(true);
  }
  match stage.previous() {
    Some(previous) => is_dirty(unit, previous),
    None => Ok(false),
  }
}

/// Records that `stage` completed under the current configuration.
///
/// Downstream markers are removed: they were produced from older inputs.
pub fn record(unit: &BuildUnit, stage: Stage) -> Result<(), DirtyError> {
  invalidate_downstream(unit, stage)?;

  let marker = StageMarker {
    version: MARKER_VERSION,
    backend: unit.backend.clone(),
    stage,
    values: current_values(unit, stage),
  };
  let path = marker_path(unit, stage);
  let write_err = |source| DirtyError::Write {
    path: path.clone(),
    source,
  };

  fs::create_dir_all(&unit.dirs.state).map_err(write_err)?;
  let json = serde_json::to_string_pretty(&marker).map_err(|e| write_err(io::Error::other(e)))?;
  let temp_path = unit.dirs.state.join(format!("{}.json.tmp", stage));
  fs::write(&temp_path, json).map_err(write_err)?;
  fs::rename(&temp_path, &path).map_err(write_err)?;

  debug!(unit = %unit.name, stage = %stage, "recorded stage marker");
  Ok(())
}

/// Drops the markers of `stage` and everything after it.
pub fn invalidate_from(unit: &BuildUnit, stage: Stage) -> Result<(), DirtyError> {
  remove_marker(&marker_path(unit, stage))?;
  invalidate_downstream(unit, stage)
}

fn invalidate_downstream(unit: &BuildUnit, stage: Stage) -> Result<(), DirtyError> {
  for downstream in stage.downstream() {
    remove_marker(&marker_path(unit, *downstream))?;
  }
  Ok(())
}

/// Forgets every stage of the unit.
pub fn clear_all(unit: &BuildUnit) -> Result<(), DirtyError> {
  remove_path(&unit.dirs.state).map_err(|source| DirtyError::Remove {
    path: unit.dirs.state.clone(),
    source,
  })
}

fn remove_marker(path: &Path) -> Result<(), DirtyError> {
  remove_path(path).map_err(|source| DirtyError::Remove {
    path: path.to_path_buf(),
    source,
  })
}

/// How far the unit got, judged by consecutive markers from `pull`.
pub fn state(unit: &BuildUnit) -> LifecycleState {
  let mut reached = LifecycleState::Uninitialized;
  for stage in Stage::LIFECYCLE {
    if !marker_path(unit, stage).is_file() {
      return reached;
    }
    reached = LifecycleState::after(stage);
  }
  if marker_path(unit, Stage::Test).is_file() {
    reached = LifecycleState::Tested;
  }
  reached
}
