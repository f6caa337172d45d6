use std::path::{Path, PathBuf};

use crate::consts::{APP_NAME, CACHE_DIR_ENV, DEFAULT_WORK_DIR, WORK_DIR_ENV};

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  std::env::var_os("USERPROFILE")
    .map(PathBuf::from)
    .unwrap_or_else(std::env::temp_dir)
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  std::env::var_os("HOME")
    .map(PathBuf::from)
    .unwrap_or_else(std::env::temp_dir)
}

/// Returns the directory for cache files for the application
#[cfg(windows)]
pub fn cache_dir() -> PathBuf {
  std::env::var_os("LOCALAPPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(|| home_dir().join("AppData").join("Local"))
    .join(APP_NAME)
    .join("Cache")
}

/// Returns the directory for cache files for the application
#[cfg(not(windows))]
pub fn cache_dir() -> PathBuf {
  let cache_home = std::env::var("XDG_CACHE_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".cache"));
  cache_home.join(APP_NAME)
}

/// Returns the shared toolchain cache directory.
///
/// `PARTKIT_CACHE_DIR` takes precedence over the platform cache directory.
pub fn toolchain_cache_dir() -> PathBuf {
  if let Ok(path) = std::env::var(CACHE_DIR_ENV) {
    return PathBuf::from(path);
  }
  cache_dir().join("toolchains")
}

/// Returns the work directory for a project rooted at `project_dir`.
///
/// `PARTKIT_WORK_DIR` takes precedence; relative overrides resolve against the project.
pub fn work_dir(project_dir: &Path) -> PathBuf {
  match std::env::var(WORK_DIR_ENV) {
    Ok(path) => project_dir.join(path),
    Err(_) => project_dir.join(DEFAULT_WORK_DIR),
  }
}
