use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::SourceError;
use crate::platform::paths::home_dir;
use crate::util::fs::{copy_tree_skipping, reset_dir};

/// Resolves a local source path.
///
/// Handles `~` expansion and paths relative to `project_dir`, and checks the
/// path exists.
pub fn resolve_path(path_str: &str, project_dir: &Path) -> Result<PathBuf, SourceError> {
  let expanded = if let Some(rest) = path_str.strip_prefix("~/") {
    home_dir().join(rest)
  } else if path_str == "~" {
    home_dir()
  } else if Path::new(path_str).is_absolute() {
    PathBuf::from(path_str)
  } else {
    project_dir.join(path_str)
  };

  let canonical = dunce::canonicalize(&expanded).map_err(|e| {
    if e.kind() == std::io::ErrorKind::NotFound {
      SourceError::PathNotFound(expanded.clone())
    } else {
      SourceError::CanonicalizePath {
        path: expanded.clone(),
        source: e,
      }
    }
  })?;

  debug!(path = %canonical.display(), "resolved local source");
  Ok(canonical)
}

/// Replaces `dest` with a copy of the canonical directory `src`.
///
/// `dest` itself and every path in `skip` that sits inside `src` are left
/// out of the copy, so a source tree holding the work directory never copies
/// into itself.
pub(super) fn copy_into(src: &Path, dest: &Path, skip: &[&Path]) -> Result<u64, SourceError> {
  if !src.is_dir() {
    return Err(SourceError::NotADirectory(src.to_path_buf()));
  }
  let copy_err = |source| SourceError::Copy {
    dest: dest.to_path_buf(),
    source,
  };

  fs::create_dir_all(dest).map_err(copy_err)?;
  let dest_canonical = dunce::canonicalize(dest).map_err(copy_err)?;
  if src.starts_with(&dest_canonical) {
    return Err(SourceError::DestinationContainsSource {
      src: src.to_path_buf(),
      dest: dest_canonical,
    });
  }

  let nested: Vec<PathBuf> = std::iter::once(dest_canonical)
    .chain(skip.iter().filter_map(|path| dunce::canonicalize(path).ok()))
    .filter(|path| path.starts_with(src) && path != src)
    .collect();
  if !nested.is_empty() {
    debug!(skipped = ?nested, "leaving nested work directories out of the copy");
  }

  reset_dir(dest).map_err(copy_err)?;
  copy_tree_skipping(src, dest, &[], &nested).map_err(copy_err)
}
