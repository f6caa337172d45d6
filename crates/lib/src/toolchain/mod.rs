//! Toolchain provisioning.
//!
//! Backends that need a private runtime (for example a specific Node.js
//! release) describe it with a [`ToolchainSpec`]. The process-wide
//! [`ToolchainCache`] downloads each (kind, version) once, unpacks it and
//! copies it into per-unit runtime directories on request.
//!
//! # Cache layout
//!
//! ```text
//! <cache>/
//! ├── .locks/<kind>-<version>.lock
//! └── <kind>/<version>/
//!     ├── <artifact file>     # downloaded archive (optional once unpacked)
//!     ├── unpacked/           # read-only toolchain tree
//!     └── .complete           # written last; entry is valid only with it
//! ```

mod cache;
mod download;
mod unpack;

pub use cache::{CacheEntry, ToolchainCache};
pub use download::{DownloadError, Downloader, HttpDownloader};

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lock::LockError;

/// Identifies a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ToolchainKey {
  pub kind: String,
  pub version: String,
}

impl ToolchainKey {
  pub fn new(kind: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      kind: kind.into(),
      version: version.into(),
    }
  }
}

impl fmt::Display for ToolchainKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-{}", self.kind, self.version)
  }
}

/// Where to get a toolchain and how to verify it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainSpec {
  pub key: ToolchainKey,
  pub url: String,
  pub sha256: Option<String>,
  pub size: Option<u64>,
}

impl ToolchainSpec {
  pub fn new(key: ToolchainKey, url: impl Into<String>) -> Self {
    Self {
      key,
      url: url.into(),
      sha256: None,
      size: None,
    }
  }

  pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
    self.sha256 = Some(sha256.into());
    self
  }

  pub fn with_size(mut self, size: u64) -> Self {
    self.size = Some(size);
    self
  }

  /// Name of the artifact inside its cache entry, taken from the URL.
  pub fn file_name(&self) -> &str {
    self
      .url
      .rsplit('/')
      .next()
      .filter(|name| !name.is_empty())
      .unwrap_or("artifact")
  }
}

/// Bounded exponential backoff for downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub initial_delay: Duration,
  pub multiplier: u32,
  pub max_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      initial_delay: Duration::from_millis(500),
      multiplier: 2,
      max_delay: Duration::from_secs(10),
    }
  }
}

impl RetryPolicy {
  /// Delay after failed attempt number `attempt` (1-based).
  pub fn delay_for(&self, attempt: u32) -> Duration {
    let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
    self.initial_delay.saturating_mul(factor).min(self.max_delay)
  }
}

#[derive(Debug, Error)]
pub enum ProvisionError {
  #[error("failed to download toolchain {key} after {attempts} attempt(s): {source}")]
  Download {
    key: ToolchainKey,
    attempts: u32,
    #[source]
    source: DownloadError,
  },

  #[error("failed to unpack toolchain {key}: {source}")]
  Unpack {
    key: ToolchainKey,
    #[source]
    source: std::io::Error,
  },

  #[error("unsupported archive format: {url}")]
  UnsupportedArchive { url: String },

  #[error("toolchain {0} was removed from the cache while provisioning")]
  Evicted(ToolchainKey),

  #[error("no {kind} toolchain is available for this platform: {reason}")]
  UnsupportedPlatform { kind: String, reason: String },

  #[error("I/O error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error(transparent)]
  Lock(#[from] LockError),
}
