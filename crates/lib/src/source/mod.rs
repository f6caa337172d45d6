//! Source fetching for the pull stage.
//!
//! A unit's `source` option names where its sources come from:
//!
//! - a local directory, absolute, relative to the project directory, `~/...`
//!   or `file://...`; copied into the pull directory
//! - a git repository (`git+<url>`, `git://`, `ssh://`, `git@host:path` or
//!   any URL ending in `.git`); cloned, optionally at `source-ref`
//!
//! Any other URL scheme is rejected.

mod git;
mod local;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

pub use local::resolve_path;

#[derive(Debug, Error)]
pub enum SourceError {
  #[error("unsupported source '{0}'")]
  UnsupportedScheme(String),

  #[error("source path does not exist: {0}")]
  PathNotFound(PathBuf),

  #[error("source path is not a directory: {0}")]
  NotADirectory(PathBuf),

  #[error("pull directory {dest} contains its own source {src}")]
  DestinationContainsSource { src: PathBuf, dest: PathBuf },

  #[error("failed to resolve path '{path}': {source}")]
  CanonicalizePath {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to copy sources into {dest}: {source}")]
  Copy {
    dest: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to clone repository '{url}': {source}")]
  Clone {
    url: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("failed to checkout '{rev}': {source}")]
  Checkout {
    rev: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("failed to resolve HEAD: {0}")]
  ResolveHead(String),
}

/// Where a unit's sources come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
  Local(String),
  Git(String),
}

impl SourceLocation {
  pub fn parse(source: &str) -> Result<Self, SourceError> {
    if let Some(url) = source.strip_prefix("git+") {
      return Ok(SourceLocation::Git(url.to_string()));
    }
    if let Some(path) = source.strip_prefix("file://") {
      return Ok(SourceLocation::Local(path.to_string()));
    }
    if source.starts_with("git://")
      || source.starts_with("ssh://")
      || source.starts_with("git@")
      || (source.contains("://") && source.trim_end_matches('/').ends_with(".git"))
    {
      return Ok(SourceLocation::Git(source.to_string()));
    }
    if source.contains("://") {
      return Err(SourceError::UnsupportedScheme(source.to_string()));
    }
    Ok(SourceLocation::Local(source.to_string()))
  }
}

/// What a fetch produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
  /// Commit checked out, for git sources.
  pub revision: Option<String>,
}

/// Fetches `source` into `dest`, replacing whatever `dest` held.
///
/// Relative local paths resolve against `project_dir`. `rev` selects a
/// branch or tag for git sources and is ignored for local ones.
///
/// Local copies leave out any path in `skip` that lies inside the source tree.
pub fn fetch(
  source: &str,
  rev: Option<&str>,
  dest: &Path,
  project_dir: &Path,
  skip: &[&Path],
) -> Result<FetchOutcome, SourceError> {
  match SourceLocation::parse(source)? {
    SourceLocation::Local(path) => {
      if let Some(rev) = rev {
        warn!(source, rev, "source-ref is ignored for local sources");
      }
      let src = resolve_path(&path, project_dir)?;
      let files = local::copy_into(&src, dest, skip)?;
      info!(source = %src.display(), files, "copied local sources");
      Ok(FetchOutcome { revision: None })
    }
    SourceLocation::Git(url) => {
      let revision = git::clone_into(&url, rev, dest)?;
      info!(url = %url, rev = %revision, "cloned sources");
      Ok(FetchOutcome {
        revision: Some(revision),
      })
    }
  }
}
