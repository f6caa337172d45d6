use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::download::{DownloadError, Downloader};
use super::unpack::{is_tar_gz, unpack_tar_gz};
use super::{ProvisionError, RetryPolicy, ToolchainKey, ToolchainSpec};
use crate::lock::{FileLock, LockMode};
use crate::util::fs::{copy_tree, remove_path, reset_dir};
use crate::util::hash::hash_file;

const LOCKS_DIR: &str = ".locks";
const UNPACKED_DIR: &str = "unpacked";
const COMPLETE_MARKER: &str = ".complete";

#[derive(Debug, Serialize, Deserialize)]
struct CompleteMarker {
  key: ToolchainKey,
  url: String,
  sha256: String,
}

/// One (kind, version) directory inside the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  pub key: ToolchainKey,
  dir: PathBuf,
}

impl CacheEntry {
  pub fn dir(&self) -> &Path {
    &self.dir
  }

  pub fn unpacked_dir(&self) -> PathBuf {
    self.dir.join(UNPACKED_DIR)
  }

  pub fn artifact_path(&self, spec: &ToolchainSpec) -> PathBuf {
    self.dir.join(spec.file_name())
  }

  /// An entry is usable once its unpacked tree has been promoted.
  pub fn is_complete(&self) -> bool {
    self.dir.join(COMPLETE_MARKER).is_file() && self.unpacked_dir().is_dir()
  }
}

/// Process-wide toolchain cache shared by every unit.
pub struct ToolchainCache {
  root: PathBuf,
  downloader: Arc<dyn Downloader>,
  retry: RetryPolicy,
}

impl std::fmt::Debug for ToolchainCache {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ToolchainCache")
      .field("root", &self.root)
      .field("retry", &self.retry)
      .finish_non_exhaustive()
  }
}

impl ToolchainCache {
  pub fn new(root: impl Into<PathBuf>, downloader: Arc<dyn Downloader>) -> Self {
    Self {
      root: root.into(),
      downloader,
      retry: RetryPolicy::default(),
    }
  }

  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn entry(&self, key: &ToolchainKey) -> CacheEntry {
    CacheEntry {
      key: key.clone(),
      dir: self.root.join(&key.kind).join(&key.version),
    }
  }

  fn lock_path(&self, key: &ToolchainKey) -> PathBuf {
    self.root.join(LOCKS_DIR).join(format!("{}.lock", key))
  }

  fn lock(&self, key: &ToolchainKey, mode: LockMode, command: &str) -> Result<FileLock, ProvisionError> {
    Ok(FileLock::acquire(&self.lock_path(key), mode, command)?)
  }

  /// Makes sure the entry for `spec` is downloaded and unpacked.
  ///
  /// Idempotent: a complete entry, or a verified artifact already on disk,
  /// is never downloaded again. Holds the entry's exclusive lock throughout,
  /// so concurrent callers for the same key wait and then find it cached.
  pub fn ensure_downloaded(&self, spec: &ToolchainSpec) -> Result<CacheEntry, ProvisionError> {
    let entry = self.entry(&spec.key);
    let _lock = self.lock(&spec.key, LockMode::Exclusive, "ensure toolchain")?;

    if entry.is_complete() {
      debug!(toolchain = %spec.key, "toolchain already cached");
      return Ok(entry);
    }
    if !is_tar_gz(spec.file_name()) {
      return Err(ProvisionError::UnsupportedArchive { url: spec.url.clone() });
    }

    std::fs::create_dir_all(entry.dir()).map_err(|source| ProvisionError::Io {
      path: entry.dir().to_path_buf(),
      source,
    })?;

    let artifact = entry.artifact_path(spec);
    if verify_artifact(spec, &artifact).is_ok() {
      debug!(toolchain = %spec.key, "reusing downloaded artifact");
    } else {
      self.download_with_retry(spec, &entry)?;
    }

    self.unpack(spec, &entry, &artifact)?;
    Ok(entry)
  }

  /// Copies the toolchain for `spec` into `target`, downloading it first if needed.
  ///
  /// `clean_target` wipes `target` before copying. With
  /// `keep_cached_artifact` unset the downloaded archive is deleted
  /// afterwards; the unpacked tree stays cached.
  pub fn provision(
    &self,
    spec: &ToolchainSpec,
    target: &Path,
    clean_target: bool,
    keep_cached_artifact: bool,
  ) -> Result<(), ProvisionError> {
    let entry = self.ensure_downloaded(spec)?;

    {
      let _lock = self.lock(&spec.key, LockMode::Shared, "provision toolchain")?;
      if !entry.is_complete() {
        return Err(ProvisionError::Evicted(spec.key.clone()));
      }

      let io_err = |source| ProvisionError::Io {
        path: target.to_path_buf(),
        source,
      };
      if clean_target {
        reset_dir(target).map_err(io_err)?;
      }
      let files = copy_tree(&entry.unpacked_dir(), target, &[]).map_err(io_err)?;
      info!(toolchain = %spec.key, target = %target.display(), files, "provisioned toolchain");
    }

    if !keep_cached_artifact {
      let _lock = self.lock(&spec.key, LockMode::Exclusive, "prune toolchain artifact")?;
      let artifact = entry.artifact_path(spec);
      remove_path(&artifact).map_err(|source| ProvisionError::Io { path: artifact, source })?;
    }

    Ok(())
  }

  /// Removes the cache entry for `key`. The next request downloads it again.
  pub fn clean(&self, key: &ToolchainKey) -> Result<(), ProvisionError> {
    let entry = self.entry(key);
    let _lock = self.lock(key, LockMode::Exclusive, "clean toolchain")?;
    remove_path(entry.dir()).map_err(|source| ProvisionError::Io {
      path: entry.dir().to_path_buf(),
      source,
    })?;
    info!(toolchain = %key, "removed cached toolchain");
    Ok(())
  }

  fn download_with_retry(&self, spec: &ToolchainSpec, entry: &CacheEntry) -> Result<(), ProvisionError> {
    let mut attempt = 1;
    loop {
      info!(toolchain = %spec.key, url = %spec.url, attempt, "downloading toolchain");
      match self.download_once(spec, entry) {
        Ok(bytes) => {
          debug!(toolchain = %spec.key, bytes, "download complete");
          return Ok(());
        }
        Err(err) if attempt < self.retry.max_attempts => {
          let delay = self.retry.delay_for(attempt);
          warn!(toolchain = %spec.key, attempt, error = %err, delay = ?delay, "download failed, retrying");
          thread::sleep(delay);
          attempt += 1;
        }
        Err(source) => {
          return Err(ProvisionError::Download {
            key: spec.key.clone(),
            attempts: attempt,
            source,
          });
        }
      }
    }
  }

  /// Downloads into a temporary file inside the entry and renames it into
  /// place only once it verifies.
  fn download_once(&self, spec: &ToolchainSpec, entry: &CacheEntry) -> Result<u64, DownloadError> {
    let mut tmp = tempfile::Builder::new()
      .prefix(".download-")
      .tempfile_in(entry.dir())?;

    let written = {
      let mut writer = BufWriter::new(tmp.as_file_mut());
      let written = self.downloader.download(&spec.url, &mut writer)?;
      writer.flush()?;
      written
    };

    verify_artifact(spec, tmp.path())?;
    tmp.persist(entry.artifact_path(spec)).map_err(|e| DownloadError::Io(e.error))?;
    Ok(written)
  }

  fn unpack(&self, spec: &ToolchainSpec, entry: &CacheEntry, artifact: &Path) -> Result<(), ProvisionError> {
    let unpack_err = |source| ProvisionError::Unpack {
      key: spec.key.clone(),
      source,
    };

    let staging = tempfile::Builder::new()
      .prefix(".unpack-")
      .tempdir_in(entry.dir())
      .map_err(unpack_err)?;
    let files = unpack_tar_gz(artifact, staging.path()).map_err(unpack_err)?;

    let unpacked = entry.unpacked_dir();
    remove_path(&unpacked).map_err(unpack_err)?;
    std::fs::rename(staging.path(), &unpacked).map_err(unpack_err)?;

    let sha256 = hash_file(artifact).map_err(unpack_err)?;
    let marker = CompleteMarker {
      key: spec.key.clone(),
      url: spec.url.clone(),
      sha256: sha256.0,
    };
    let json = serde_json::to_vec_pretty(&marker).map_err(|e| unpack_err(std::io::Error::other(e)))?;
    std::fs::write(entry.dir().join(COMPLETE_MARKER), json).map_err(unpack_err)?;

    debug!(toolchain = %spec.key, files, "unpacked toolchain");
    Ok(())
  }
}

/// Checks size and SHA-256 when known, otherwise that the file is non-empty.
fn verify_artifact(spec: &ToolchainSpec, path: &Path) -> Result<(), DownloadError> {
  let len = std::fs::metadata(path)?.len();
  if len == 0 {
    return Err(DownloadError::Empty);
  }
  if let Some(expected) = spec.size
    && expected != len
  {
    return Err(DownloadError::SizeMismatch { expected, actual: len });
  }
  if let Some(expected) = &spec.sha256 {
    let actual = hash_file(path)?;
    if !actual.matches(expected) {
      return Err(DownloadError::ChecksumMismatch {
        expected: expected.clone(),
        actual: actual.0,
      });
    }
  }
  Ok(())
}
