use std::path::Path;

use tracing::debug;

use super::SourceError;
use crate::util::fs::remove_path;

/// Clones `url` into `dest`, returning the checked-out commit.
///
/// The clone goes to a sibling staging directory first and replaces `dest`
/// only once checkout succeeded, so a failed pull leaves the previous
/// sources in place.
pub(super) fn clone_into(url: &str, rev: Option<&str>, dest: &Path) -> Result<String, SourceError> {
  let parent = dest.parent().unwrap_or(dest);
  std::fs::create_dir_all(parent).map_err(|source| SourceError::Copy {
    dest: dest.to_path_buf(),
    source,
  })?;
  let staging = tempfile::Builder::new()
    .prefix(".clone-")
    .tempdir_in(parent)
    .map_err(|source| SourceError::Copy {
      dest: dest.to_path_buf(),
      source,
    })?;
  let checkout_dir = staging.path().join("repo");

  let clone_err = |e: Box<dyn std::error::Error + Send + Sync>| SourceError::Clone {
    url: url.to_string(),
    source: e,
  };

  let mut prepared = gix::prepare_clone(url, &checkout_dir).map_err(|e| clone_err(Box::new(e)))?;
  if let Some(rev) = rev {
    debug!(url, rev, "cloning at ref");
    prepared = prepared
      .with_ref_name(Some(rev))
      .map_err(|e| SourceError::Checkout {
        rev: rev.to_string(),
        source: Box::new(e),
      })?;
  }

  let (mut checkout, _outcome) = prepared
    .fetch_then_checkout(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| clone_err(Box::new(e)))?;

  let (repo, _outcome) = checkout
    .main_worktree(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| SourceError::Checkout {
      rev: rev.unwrap_or("HEAD").to_string(),
      source: Box::new(e),
    })?;

  let revision = head_commit(&repo)?;
  drop(repo);

  let promote_err = |source| SourceError::Copy {
    dest: dest.to_path_buf(),
    source,
  };
  remove_path(dest).map_err(promote_err)?;
  std::fs::rename(&checkout_dir, dest).map_err(promote_err)?;

  Ok(revision)
}

fn head_commit(repo: &gix::Repository) -> Result<String, SourceError> {
  let mut head = repo.head().map_err(|e| SourceError::ResolveHead(e.to_string()))?;
  let commit = head
    .peel_to_commit()
    .map_err(|e| SourceError::ResolveHead(e.to_string()))?;
  Ok(commit.id.to_string())
}
