//! Loading project manifests.

mod types;

pub use types::*;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("failed to read manifest {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse manifest {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },
}

impl Manifest {
  pub fn load(path: &Path) -> Result<Self, ManifestError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let manifest = Self::parse(&contents).map_err(|source| ManifestError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    debug!(path = %path.display(), units = manifest.units.len(), "loaded manifest");
    Ok(manifest)
  }

  pub fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }
}
