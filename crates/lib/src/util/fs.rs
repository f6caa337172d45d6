//! Directory tree helpers shared by sources, stages and the toolchain cache.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

/// Recursively copy `src` into `dst`, merging with anything already at `dst`.
///
/// Top-level entries whose name is in `exclude` are skipped along with their
/// contents. Symlinks are recreated rather than followed on Unix. Existing
/// files at the destination are overwritten.
pub fn copy_tree(src: &Path, dst: &Path, exclude: &[&str]) -> io::Result<u64> {
  copy_tree_skipping(src, dst, exclude, &[])
}

/// Like [`copy_tree`], but also skips the subtrees rooted at `skip`.
///
/// `skip` paths are compared against `src`-joined paths, so they must be
/// spelled the same way as `src` (both canonical, or both as given).
pub fn copy_tree_skipping(src: &Path, dst: &Path, exclude: &[&str], skip: &[PathBuf]) -> io::Result<u64> {
  fs::create_dir_all(dst)?;
  let mut copied = 0;

  let walker = WalkDir::new(src).follow_links(false).into_iter().filter_entry(|e| {
    let excluded = e.depth() == 1
      && e
        .file_name()
        .to_str()
        .map(|name| exclude.contains(&name))
        .unwrap_or(false);
    !excluded && !skip.iter().any(|p| p == e.path())
  });

  for entry in walker {
    let entry = entry.map_err(io::Error::other)?;
    let rel = entry.path().strip_prefix(src).map_err(io::Error::other)?;
    if rel.as_os_str().is_empty() {
      continue;
    }
    let target = dst.join(rel);
    let file_type = entry.file_type();

    if file_type.is_dir() {
      fs::create_dir_all(&target)?;
    } else if file_type.is_symlink() {
      copy_symlink(entry.path(), &target)?;
      copied += 1;
    } else {
      if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
      }
      if target.is_symlink() {
        fs::remove_file(&target)?;
      }
      fs::copy(entry.path(), &target)?;
      copied += 1;
    }
  }

  Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
  let link_target = fs::read_link(src)?;
  if dst.symlink_metadata().is_ok() {
    remove_path(dst)?;
  }
  std::os::unix::fs::symlink(link_target, dst)
}

#[cfg(windows)]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
  if src.is_dir() {
    copy_tree(src, dst, &[]).map(|_| ())
  } else {
    fs::copy(src, dst).map(|_| ())
  }
}

/// Whether `name` is exactly one plain path component.
///
/// Rejects empty names, `.`, `..`, absolute paths and anything containing a
/// separator.
pub fn is_entry_name(name: &str) -> bool {
  let mut components = Path::new(name).components();
  matches!(
    (components.next(), components.next()),
    (Some(Component::Normal(first)), None) if first == OsStr::new(name)
  )
}

/// Remove a file, symlink or directory tree. Missing paths are not an error.
pub fn remove_path(path: &Path) -> io::Result<()> {
  let metadata = match path.symlink_metadata() {
    Ok(metadata) => metadata,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
    Err(e) => return Err(e),
  };

  if metadata.is_dir() {
    fs::remove_dir_all(path)
  } else {
    fs::remove_file(path)
  }
}

/// Remove `path` if present and recreate it as an empty directory.
pub fn reset_dir(path: &Path) -> io::Result<()> {
  remove_path(path)?;
  fs::create_dir_all(path)
}
