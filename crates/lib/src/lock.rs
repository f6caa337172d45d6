//! Advisory file locks for mutual exclusion across threads and processes.
//!
//! Locks are taken on an open file handle, so two handles in the same process
//! contend exactly like two processes do. That lets the toolchain cache use
//! one lock file per toolchain for both concurrent units and concurrent
//! `partkit` invocations sharing a cache directory.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
  Shared,
  Exclusive,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: u64,
  pub command: String,
}

#[derive(Debug, Error)]
pub enum LockError {
  #[error(
    "{lock_path} is locked by another process: {command} (PID {pid}, started at unix time {started_at_unix})\n\
     If you're sure no partkit process is running, remove the lock file."
  )]
  Contention {
    command: String,
    pid: u32,
    started_at_unix: u64,
    lock_path: PathBuf,
  },

  #[error(
    "{lock_path} is locked (could not read lock metadata)\n\
     If you're sure no partkit process is running, remove the lock file."
  )]
  ContentionUnknown { lock_path: PathBuf },

  #[error("failed to create lock directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to open lock file {path}: {source}")]
  OpenFile {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write lock metadata: {0}")]
  WriteMetadata(#[source] io::Error),

  #[error("failed to acquire lock on {path}: {source}")]
  LockFailed {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// A held lock. Released when dropped.
#[derive(Debug)]
pub struct FileLock {
  file: File,
  lock_path: PathBuf,
}

impl FileLock {
  /// Blocks until the lock is granted.
  pub fn acquire(lock_path: &Path, mode: LockMode, command: &str) -> Result<Self, LockError> {
    let file = open_lock_file(lock_path)?;
    lock(&file, mode, true).map_err(|source| LockError::LockFailed {
      path: lock_path.to_path_buf(),
      source,
    })?;
    Self::granted(file, lock_path, mode, command)
  }

  /// Fails with [`LockError::Contention`] instead of waiting.
  pub fn try_acquire(lock_path: &Path, mode: LockMode, command: &str) -> Result<Self, LockError> {
    let file = open_lock_file(lock_path)?;
    if let Err(err) = lock(&file, mode, false) {
      if err.kind() == io::ErrorKind::WouldBlock {
        return Err(read_contention_error(lock_path));
      }
      return Err(LockError::LockFailed {
        path: lock_path.to_path_buf(),
        source: err,
      });
    }
    Self::granted(file, lock_path, mode, command)
  }

  fn granted(file: File, lock_path: &Path, mode: LockMode, command: &str) -> Result<Self, LockError> {
    if mode == LockMode::Exclusive {
      write_metadata(&file, command)?;
    }
    Ok(FileLock {
      file,
      lock_path: lock_path.to_path_buf(),
    })
  }

  /// Reads metadata through the held handle. Opening a second handle would
  /// fail on Windows, where locks are mandatory.
  pub fn read_metadata(&self) -> io::Result<LockMetadata> {
    use std::io::{Seek, SeekFrom};

    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }
}

fn open_lock_file(lock_path: &Path) -> Result<File, LockError> {
  if let Some(parent) = lock_path.parent()
    && !parent.exists()
  {
    std::fs::create_dir_all(parent).map_err(|source| LockError::CreateDir {
      path: parent.to_path_buf(),
      source,
    })?;
  }

  OpenOptions::new()
    .read(true)
    .write(true)
    .create(true)
    .truncate(false)
    .open(lock_path)
    .map_err(|source| LockError::OpenFile {
      path: lock_path.to_path_buf(),
      source,
    })
}

fn write_metadata(file: &File, command: &str) -> Result<(), LockError> {
  let metadata = LockMetadata {
    version: 1,
    pid: std::process::id(),
    started_at_unix: SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .unwrap_or_default()
      .as_secs(),
    command: command.to_string(),
  };

  file.set_len(0).map_err(LockError::WriteMetadata)?;
  let mut writer = io::BufWriter::new(file);
  serde_json::to_writer_pretty(&mut writer, &metadata).map_err(|e| LockError::WriteMetadata(io::Error::other(e)))?;
  writer.flush().map_err(LockError::WriteMetadata)?;

  Ok(())
}

fn read_contention_error(lock_path: &Path) -> LockError {
  if let Ok(mut file) = File::open(lock_path) {
    let mut contents = String::new();
    if file.read_to_string(&mut contents).is_ok()
      && let Ok(metadata) = serde_json::from_str::<LockMetadata>(&contents)
    {
      return LockError::Contention {
        command: metadata.command,
        pid: metadata.pid,
        started_at_unix: metadata.started_at_unix,
        lock_path: lock_path.to_path_buf(),
      };
    }
  }

  LockError::ContentionUnknown {
    lock_path: lock_path.to_path_buf(),
  }
}

#[cfg(unix)]
fn lock(file: &File, mode: LockMode, wait: bool) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  let operation = match (mode, wait) {
    (LockMode::Shared, true) => FlockOperation::LockShared,
    (LockMode::Exclusive, true) => FlockOperation::LockExclusive,
    (LockMode::Shared, false) => FlockOperation::NonBlockingLockShared,
    (LockMode::Exclusive, false) => FlockOperation::NonBlockingLockExclusive,
  };

  flock(file.as_fd(), operation).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn lock(file: &File, mode: LockMode, wait: bool) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;
  let mut flags = match mode {
    LockMode::Shared => 0,
    LockMode::Exclusive => LOCKFILE_EXCLUSIVE_LOCK,
  };
  if !wait {
    flags |= LOCKFILE_FAIL_IMMEDIATELY;
  }

  // SAFETY: OVERLAPPED is a plain data struct that is valid when zero-initialized.
  // LockFileEx is safe to call with a valid file handle and zeroed OVERLAPPED.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(handle, flags, 0, 1, 0, &mut overlapped)
  };

  if result != 0 {
    return Ok(());
  }
  let err = io::Error::last_os_error();
  if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) {
    return Err(io::Error::from(io::ErrorKind::WouldBlock));
  }
  Err(err)
}
