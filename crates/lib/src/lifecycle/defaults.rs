//! Default stage behavior shared by backends.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{StageContext, StageError};
use crate::source;
use crate::unit::{BuildUnit, Stage, UnitDirs};
use crate::util::fs::{copy_tree, is_entry_name, remove_path, reset_dir};

/// Directory names never copied from the pull directory into the build directory.
const VCS_DIRS: &[&str] = &[".git", ".hg", ".svn"];

/// File under the unit root listing what the unit last put in the deploy root.
const DEPLOYED_RECORD: &str = "deployed.json";

#[derive(Debug, Error)]
pub enum DeployError {
  #[error("deploy allow-list is empty")]
  EmptyAllowList,

  #[error("deploy entry '{0}' must be a single top-level name")]
  InvalidEntry(String),

  #[error("failed to deploy '{entry}': {source}")]
  Copy {
    entry: String,
    #[source]
    source: io::Error,
  },

  #[error("failed to update deployed file record {path}: {source}")]
  Record {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to remove previously deployed {path}: {source}")]
  Retract {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// What [`deploy_entries`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployReport {
  pub deployed: Vec<String>,
  pub missing: Vec<String>,
  /// Files and symlinks written, relative to the deploy root.
  pub files: Vec<PathBuf>,
}

/// Fetches the unit's `source` (at `source-ref`) into the pull directory.
///
/// A unit without a `source` gets an empty pull directory. A local source that
/// contains the work directory or the toolchain cache is copied without them.
pub fn default_pull(ctx: &StageContext<'_>) -> Result<(), StageError> {
  let pull_dir = &ctx.dirs().pull;
  let Some(location) = ctx.config().get_str("source") else {
    warn!(unit = %ctx.name(), "no source configured; pull directory left empty");
    return reset_dir(pull_dir).map_err(|e| ctx.io_error(pull_dir, e));
  };

  let skip = [ctx.dirs().work.as_path(), ctx.toolchains.root()];
  source::fetch(location, ctx.config().get_str("source-ref"), pull_dir, ctx.project_dir, &skip)
    .map(|_| ())
    .map_err(|source| StageError::SourceFetch {
      unit: ctx.name().to_string(),
      source,
    })
}

/// Gives the build a fresh copy of the pulled sources and an empty stage root.
///
/// Called before every build so in-tree builds never modify the pull
/// directory and stale installed files never survive a rebuild.
pub fn prepare_build(unit: &BuildUnit) -> Result<(), StageError> {
  let dirs = &unit.dirs;
  if !dirs.pull.is_dir() {
    return Err(StageError::NotReady {
      unit: unit.name.clone(),
      stage: Stage::Build,
      missing: Stage::Pull,
    });
  }

  let io_err = |path: &Path| {
    let path = path.to_path_buf();
    let unit = unit.name.clone();
    move |source| StageError::Io { unit, path, source }
  };

  reset_dir(&dirs.build).map_err(io_err(&dirs.build))?;
  let files = copy_tree(&dirs.pull, &dirs.build, VCS_DIRS).map_err(io_err(&dirs.build))?;
  reset_dir(&dirs.stage).map_err(io_err(&dirs.stage))?;

  debug!(unit = %unit.name, files, "prepared build directory");
  Ok(())
}

/// Deploys the unit's allow-list, or `fallback` when it has none.
///
/// Files deployed by the unit's previous run are removed first, so entries
/// dropped from the allow-list disappear from the deploy root.
pub fn default_deploy(ctx: &StageContext<'_>, fallback: &[&str]) -> Result<DeployReport, StageError> {
  let deploy_err = |source| StageError::Deploy {
    unit: ctx.name().to_string(),
    source,
  };
  let allow = ctx.deploy_allow_list(fallback);
  check_allow_list(&allow).map_err(deploy_err)?;

  let retracted = retract_deployed(ctx.dirs()).map_err(deploy_err)?;
  if retracted > 0 {
    debug!(unit = %ctx.name(), files = retracted, "removed previously deployed files");
  }

  let report = deploy_entries(&ctx.dirs().stage, &ctx.dirs().deploy, &allow).map_err(deploy_err)?;
  write_deployed(ctx.dirs(), &report.files).map_err(deploy_err)?;

  for entry in &report.missing {
    warn!(unit = %ctx.name(), entry = %entry, "deploy entry not staged, skipping");
  }
  info!(unit = %ctx.name(), entries = ?report.deployed, files = report.files.len(), "deployed");
  Ok(report)
}

fn check_allow_list(allow: &[String]) -> Result<(), DeployError> {
  if allow.is_empty() {
    return Err(DeployError::EmptyAllowList);
  }
  match allow.iter().find(|entry| !is_entry_name(entry)) {
    Some(entry) => Err(DeployError::InvalidEntry(entry.clone())),
    None => Ok(()),
  }
}

/// Recursively copies each allowed top-level entry of `stage_root` into `deploy_root`.
///
/// Every entry must be a single name; nothing is copied if one is not.
/// Entries not present in the stage root are skipped and listed in the report.
pub fn deploy_entries(stage_root: &Path, deploy_root: &Path, allow: &[String]) -> Result<DeployReport, DeployError> {
  check_allow_list(allow)?;

  let mut report = DeployReport::default();
  for entry in allow {
    let src = stage_root.join(entry);
    let copy_err = |source| DeployError::Copy {
      entry: entry.clone(),
      source,
    };

    let metadata = match src.symlink_metadata() {
      Ok(metadata) => metadata,
      Err(_) => {
        report.missing.push(entry.clone());
        continue;
      }
    };

    let dst = deploy_root.join(entry);
    if metadata.is_dir() {
      copy_tree(&src, &dst, &[]).map_err(copy_err)?;
      for file in WalkDir::new(&src).follow_links(false) {
        let file = file.map_err(|e| copy_err(io::Error::other(e)))?;
        if !file.file_type().is_dir()
          && let Ok(rel) = file.path().strip_prefix(stage_root)
        {
          report.files.push(rel.to_path_buf());
        }
      }
    } else {
      fs::create_dir_all(deploy_root).map_err(copy_err)?;
      remove_path(&dst).map_err(copy_err)?;
      fs::copy(&src, &dst).map_err(copy_err)?;
      report.files.push(PathBuf::from(entry));
    }
    report.deployed.push(entry.clone());
  }

  Ok(report)
}

/// Removes every file the unit deployed on its last run and forgets the record.
///
/// Directories left empty are pruned up to the deploy root. Returns how many
/// files were removed.
pub fn retract_deployed(dirs: &UnitDirs) -> Result<usize, DeployError> {
  let record = dirs.root.join(DEPLOYED_RECORD);
  let files: Vec<PathBuf> = match fs::read(&record) {
    Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
      warn!(path = %record.display(), error = %e, "ignoring corrupt deployed file record");
      Vec::new()
    }),
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
    Err(source) => return Err(DeployError::Record { path: record, source }),
  };

  let mut removed = 0;
  for rel in &files {
    if !rel.components().all(|c| matches!(c, Component::Normal(_))) {
      warn!(path = %rel.display(), "skipping unsafe path in deployed file record");
      continue;
    }
    let path = dirs.deploy.join(rel);
    if path.symlink_metadata().is_err() {
      continue;
    }
    remove_path(&path).map_err(|source| DeployError::Retract {
      path: path.clone(),
      source,
    })?;
    removed += 1;
    prune_empty_parents(&path, &dirs.deploy);
  }

  remove_path(&record).map_err(|source| DeployError::Record { path: record, source })?;
  Ok(removed)
}

fn prune_empty_parents(path: &Path, deploy_root: &Path) {
  let mut dir = path.parent();
  while let Some(current) = dir
    && current != deploy_root
    && current.starts_with(deploy_root)
  {
    if fs::remove_dir(current).is_err() {
      break;
    }
    dir = current.parent();
  }
}

fn write_deployed(dirs: &UnitDirs, files: &[PathBuf]) -> Result<(), DeployError> {
  let path = dirs.root.join(DEPLOYED_RECORD);
  let write_err = |source| DeployError::Record {
    path: path.clone(),
    source,
  };

  fs::create_dir_all(&dirs.root).map_err(write_err)?;
  let json = serde_json::to_string_pretty(files).map_err(|e| write_err(io::Error::other(e)))?;
  let temp_path = dirs.root.join(format!("{}.tmp", DEPLOYED_RECORD));
  fs::write(&temp_path, json).map_err(write_err)?;
  fs::rename(&temp_path, &path).map_err(write_err)
}
