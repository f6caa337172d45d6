use std::path::{Path, PathBuf};

use crate::platform::paths;
use crate::toolchain::RetryPolicy;

/// Engine-wide settings.
///
/// Directory defaults honor `PARTKIT_WORK_DIR` and `PARTKIT_CACHE_DIR`; the
/// CLI overrides individual fields from its flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
  /// Directory relative local sources resolve against.
  pub project_dir: PathBuf,
  /// Root of all unit directories and the shared deploy root.
  pub work_dir: PathBuf,
  /// Toolchain cache shared between projects.
  pub cache_dir: PathBuf,
  /// Maximum number of units processed at once.
  pub parallelism: usize,
  pub retry: RetryPolicy,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self::for_project(Path::new("."))
  }
}

impl EngineConfig {
  pub fn for_project(project_dir: &Path) -> Self {
    Self {
      project_dir: project_dir.to_path_buf(),
      work_dir: paths::work_dir(project_dir),
      cache_dir: paths::toolchain_cache_dir(),
      parallelism: default_parallelism(),
      retry: RetryPolicy::default(),
    }
  }

  pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
    self.work_dir = work_dir.into();
    self
  }

  pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
    self.cache_dir = cache_dir.into();
    self
  }

  pub fn with_parallelism(mut self, parallelism: usize) -> Self {
    self.parallelism = parallelism.max(1);
    self
  }

  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  /// Shared deploy root.
  pub fn deploy_dir(&self) -> PathBuf {
    self.work_dir.join("deploy")
  }
}

fn default_parallelism() -> usize {
  std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}
