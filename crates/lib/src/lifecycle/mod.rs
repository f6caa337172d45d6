//! The lifecycle contract every backend implements.
//!
//! A [`Backend`] supplies a schema extension and up to five stage
//! operations. Each operation has a default, so a backend only overrides
//! what its toolchain needs; the defaults are also exported from
//! [`defaults`] so an override can run the default and then add to it.

pub mod defaults;

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::dirty::DirtyError;
use crate::process::{Invocation, ProcessError, ProcessOutput, ProcessRunner};
use crate::schema::{ResolvedConfig, Schema, SchemaError};
use crate::source::SourceError;
use crate::toolchain::{ProvisionError, ToolchainCache, ToolchainSpec};
use crate::unit::{BuildUnit, Stage, UnitDirs};

pub use defaults::{
  DeployError, DeployReport, default_deploy, default_pull, deploy_entries, prepare_build, retract_deployed,
};

/// Entries deployed when neither the backend nor the unit says otherwise.
pub const DEFAULT_DEPLOY_ENTRIES: &[&str] = &["bin", "share", "lib"];

/// Coarse classification of a stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
  Config,
  NotReady,
  SourceFetch,
  Provision,
  BuildStep,
  Stage,
  Cancelled,
  Io,
}

#[derive(Debug, Error)]
pub enum StageError {
  #[error("{unit}: cannot run {stage} before {missing} has completed")]
  NotReady { unit: String, stage: Stage, missing: Stage },

  #[error("{unit}: failed to fetch sources: {source}")]
  SourceFetch {
    unit: String,
    #[source]
    source: SourceError,
  },

  #[error("{unit}: failed to provision toolchain: {source}")]
  Provision {
    unit: String,
    #[source]
    source: ProvisionError,
  },

  #[error("{unit}: {stage} step failed: {source}")]
  BuildStep {
    unit: String,
    stage: Stage,
    #[source]
    source: ProcessError,
  },

  #[error("{unit}: {message}")]
  Stage { unit: String, message: String },

  #[error("{unit}: deploy failed: {source}")]
  Deploy {
    unit: String,
    #[source]
    source: DeployError,
  },

  #[error("{unit}: invalid configuration: {message}")]
  Config { unit: String, message: String },

  #[error("{unit}: {stage} was cancelled")]
  Cancelled { unit: String, stage: Stage },

  #[error("{unit}: I/O error at {path}: {source}")]
  Io {
    unit: String,
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error(transparent)]
  Marker(#[from] DirtyError),
}

impl StageError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      StageError::NotReady { .. } => ErrorKind::NotReady,
      StageError::SourceFetch { .. } => ErrorKind::SourceFetch,
      StageError::Provision { .. } => ErrorKind::Provision,
      StageError::BuildStep { .. } => ErrorKind::BuildStep,
      StageError::Stage { .. } => ErrorKind::Stage,
      StageError::Deploy {
        source: DeployError::EmptyAllowList | DeployError::InvalidEntry(_),
        ..
      } => ErrorKind::Config,
      StageError::Deploy { .. } => ErrorKind::Stage,
      StageError::Config { .. } => ErrorKind::Config,
      StageError::Cancelled { .. } => ErrorKind::Cancelled,
      StageError::Io { .. } | StageError::Marker(_) => ErrorKind::Io,
    }
  }

  /// Output tail of the external command behind this failure, if any.
  pub fn tail(&self) -> &[String] {
    match self {
      StageError::BuildStep { source, .. } => source.tail(),
      _ => &[],
    }
  }
}

/// Everything a stage operation may touch.
pub struct StageContext<'a> {
  pub unit: &'a BuildUnit,
  pub stage: Stage,
  pub runner: &'a ProcessRunner,
  pub toolchains: &'a ToolchainCache,
  /// Directory relative local sources resolve against.
  pub project_dir: &'a Path,
}

impl StageContext<'_> {
  pub fn name(&self) -> &str {
    &self.unit.name
  }

  pub fn dirs(&self) -> &UnitDirs {
    &self.unit.dirs
  }

  pub fn config(&self) -> &ResolvedConfig {
    &self.unit.config
  }

  /// An invocation of `program` running in the unit's build directory.
  pub fn command(&self, program: impl Into<std::ffi::OsString>) -> Invocation {
    Invocation::new(program, &self.unit.dirs.build)
  }

  /// Runs an external step, attributing failures to this unit and stage.
  pub fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, StageError> {
    self.runner.run(invocation).map_err(|source| match source {
      ProcessError::Cancelled { .. } => StageError::Cancelled {
        unit: self.unit.name.clone(),
        stage: self.stage,
      },
      source => StageError::BuildStep {
        unit: self.unit.name.clone(),
        stage: self.stage,
        source,
      },
    })
  }

  /// The unit's `deploy` override, or `fallback`.
  pub fn deploy_allow_list(&self, fallback: &[&str]) -> Vec<String> {
    match self.config().get("deploy") {
      Some(_) => self.config().get_string_list("deploy"),
      None => fallback.iter().map(|s| s.to_string()).collect(),
    }
  }

  pub fn io_error(&self, path: &Path, source: std::io::Error) -> StageError {
    StageError::Io {
      unit: self.unit.name.clone(),
      path: path.to_path_buf(),
      source,
    }
  }

  pub fn provision_error(&self, source: ProvisionError) -> StageError {
    StageError::Provision {
      unit: self.unit.name.clone(),
      source,
    }
  }
}

/// A build toolchain adapter.
///
/// Backends are registered once and shared by every unit that names them,
/// across worker threads.
pub trait Backend: Send + Sync {
  /// Tag units use to select this backend.
  fn name(&self) -> &str;

  /// Options this backend adds on top of [`Schema::base`].
  fn schema(&self) -> Result<Schema, SchemaError>;

  /// Fetches sources into the pull directory.
  fn pull(&self, ctx: &StageContext<'_>) -> Result<(), StageError> {
    default_pull(ctx)
  }

  /// Builds inside the build directory, which holds a fresh copy of the sources.
  fn build(&self, _ctx: &StageContext<'_>) -> Result<(), StageError> {
    Ok(())
  }

  /// Installs build results into the stage directory.
  fn stage(&self, _ctx: &StageContext<'_>) -> Result<(), StageError> {
    Ok(())
  }

  /// Copies the allowed top-level staged entries into the shared deploy root.
  fn deploy(&self, ctx: &StageContext<'_>) -> Result<(), StageError> {
    default_deploy(ctx, self.deploy_entries()).map(|_| ())
  }

  /// Runs the project's tests. Errors are reported, never fatal.
  fn test(&self, _ctx: &StageContext<'_>) -> Result<(), StageError> {
    Ok(())
  }

  /// Default deploy allow-list.
  fn deploy_entries(&self) -> &'static [&'static str] {
    DEFAULT_DEPLOY_ENTRIES
  }

  /// Toolchains this backend provisions for a unit with `config`.
  fn toolchains(&self, _config: &ResolvedConfig) -> Result<Vec<ToolchainSpec>, ProvisionError> {
    Ok(Vec::new())
  }

  /// Extra teardown during clean-pull.
  fn clean_pull(&self, _ctx: &StageContext<'_>) -> Result<(), StageError> {
    Ok(())
  }
}
