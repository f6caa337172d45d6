//! Drives units through their lifecycle.
//!
//! The orchestrator owns every [`BuildUnit`] of a project. For each
//! requested unit it walks the lifecycle up to the requested stage,
//! skipping stages the dirty tracker reports as up to date and recording a
//! marker after each stage that succeeds. Units are independent: they run
//! concurrently on a bounded `rayon` pool and one unit's failure never
//! stops or rolls back another.

mod config;
mod report;

pub use config::EngineConfig;
pub use report::{RunReport, TestOutcome, UnitFailure, UnitOutcome};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, info_span, warn};

use crate::dirty::{self, DirtyError};
use crate::lifecycle::{Backend, StageContext, StageError, prepare_build, retract_deployed};
use crate::manifest::Manifest;
use crate::process::{CancelToken, ProcessRunner};
use crate::registry::{BackendRegistry, ConfigError};
use crate::toolchain::{Downloader, ToolchainCache};
use crate::unit::{BuildUnit, Stage};
use crate::util::fs::remove_path;

#[derive(Debug, Error)]
pub enum OrchestratorError {
  #[error("{} unit(s) have invalid configuration:\n{}", .0.len(), ConfigErrors(.0))]
  InvalidUnits(Vec<ConfigError>),

  #[error("unknown unit '{0}'")]
  UnknownUnit(String),

  #[error("failed to start worker pool: {0}")]
  ThreadPool(String),
}

impl OrchestratorError {
  /// Whether the error stems from the project's configuration.
  pub fn is_config(&self) -> bool {
    matches!(self, OrchestratorError::InvalidUnits(_) | OrchestratorError::UnknownUnit(_))
  }
}

struct ConfigErrors<'a>(&'a [ConfigError]);

impl fmt::Display for ConfigErrors<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, err) in self.0.iter().enumerate() {
      if i > 0 {
        writeln!(f)?;
      }
      write!(f, "{}", err)?;
    }
    Ok(())
  }
}

/// What to do with the selected units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
  /// Walk the lifecycle up to and including this stage.
  Run(Stage),
  /// Remove the unit's directories and markers.
  Clean,
  /// Forget pulled sources and the unit's cached toolchains.
  CleanPull,
}

impl fmt::Display for Command {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Command::Run(stage) => write!(f, "{}", stage),
      Command::Clean => f.write_str("clean"),
      Command::CleanPull => f.write_str("clean-pull"),
    }
  }
}

pub struct Orchestrator {
  registry: BackendRegistry,
  units: BTreeMap<String, BuildUnit>,
  toolchains: Arc<ToolchainCache>,
  runner: ProcessRunner,
  config: EngineConfig,
}

impl Orchestrator {
  pub fn new(
    registry: BackendRegistry,
    config: EngineConfig,
    runner: ProcessRunner,
    downloader: Arc<dyn Downloader>,
  ) -> Self {
    let toolchains = ToolchainCache::new(&config.cache_dir, downloader).with_retry(config.retry);
    Self {
      registry,
      units: BTreeMap::new(),
      toolchains: Arc::new(toolchains),
      runner,
      config,
    }
  }

  /// Validates every unit of `manifest` before adding any of them.
  ///
  /// All configuration errors are reported together.
  pub fn load_manifest(&mut self, manifest: &Manifest) -> Result<(), OrchestratorError> {
    let mut units = Vec::new();
    let mut errors = Vec::new();
    for (name, decl) in &manifest.units {
      match self
        .registry
        .create_unit(name, &decl.backend, &decl.options, &self.config.work_dir)
      {
        Ok(unit) => units.push(unit),
        Err(err) => errors.push(err),
      }
    }

    if !errors.is_empty() {
      return Err(OrchestratorError::InvalidUnits(errors));
    }
    for unit in units {
      self.units.insert(unit.name.clone(), unit);
    }
    Ok(())
  }

  pub fn add_unit(&mut self, name: &str, backend: &str, options: &BTreeMap<String, Value>) -> Result<(), ConfigError> {
    let unit = self
      .registry
      .create_unit(name, backend, options, &self.config.work_dir)?;
    self.units.insert(unit.name.clone(), unit);
    Ok(())
  }

  pub fn unit(&self, name: &str) -> Option<&BuildUnit> {
    self.units.get(name)
  }

  pub fn units(&self) -> impl Iterator<Item = &BuildUnit> {
    self.units.values()
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  pub fn toolchains(&self) -> &Arc<ToolchainCache> {
    &self.toolchains
  }

  pub fn cancel_token(&self) -> &CancelToken {
    self.runner.cancel_token()
  }

  /// Applies `command` to the named units, or to every unit when `names` is empty.
  pub fn run(&self, names: &[String], command: Command) -> Result<RunReport, OrchestratorError> {
    let selected = self.select(names)?;
    let pool = rayon::ThreadPoolBuilder::new()
      .num_threads(self.config.parallelism.max(1))
      .thread_name(|i| format!("partkit-worker-{}", i))
      .build()
      .map_err(|e| OrchestratorError::ThreadPool(e.to_string()))?;

    info!(command = %command, units = selected.len(), jobs = self.config.parallelism, "starting run");
    let units = pool.install(|| {
      selected
        .par_iter()
        .map(|unit| self.run_unit(unit, command))
        .collect::<Vec<_>>()
    });

    Ok(RunReport {
      command: command.to_string(),
      units,
    })
  }

  fn select(&self, names: &[String]) -> Result<Vec<&BuildUnit>, OrchestratorError> {
    if names.is_empty() {
      return Ok(self.units.values().collect());
    }
    names
      .iter()
      .map(|name| {
        self
          .units
          .get(name)
          .ok_or_else(|| OrchestratorError::UnknownUnit(name.clone()))
      })
      .collect()
  }

  fn backend_for(&self, unit: &BuildUnit) -> Result<&Arc<dyn Backend>, StageError> {
    self.registry.get(&unit.backend).ok_or_else(|| StageError::Config {
      unit: unit.name.clone(),
      message: format!("backend '{}' is not registered", unit.backend),
    })
  }

  fn context<'a>(&'a self, unit: &'a BuildUnit, stage: Stage) -> StageContext<'a> {
    StageContext {
      unit,
      stage,
      runner: &self.runner,
      toolchains: &self.toolchains,
      project_dir: &self.config.project_dir,
    }
  }

  fn run_unit(&self, unit: &BuildUnit, command: Command) -> UnitOutcome {
    let span = info_span!("unit", unit = %unit.name, backend = %unit.backend);
    let _enter = span.enter();
    let started = Instant::now();
    let mut outcome = UnitOutcome::new(&unit.name, &unit.backend);

    let result = match command {
      Command::Run(target) => self.run_lifecycle(unit, target, &mut outcome),
      Command::Clean => self.clean(unit),
      Command::CleanPull => self.clean_pull(unit),
    };

    if let Err((stage, err)) = result {
      error!(stage = ?stage, error = %err, "unit failed");
      outcome.failure = Some(UnitFailure::from_error(stage, &err));
    }
    outcome.state = dirty::state(unit);
    outcome.duration = started.elapsed();
    outcome
  }

  fn run_lifecycle(
    &self,
    unit: &BuildUnit,
    target: Stage,
    outcome: &mut UnitOutcome,
  ) -> Result<(), (Option<Stage>, StageError)> {
    for &stage in target.through() {
      let dirty = dirty::is_dirty(unit, stage).map_err(|e| (Some(stage), e.into()))?;
      if !dirty {
        info!(stage = %stage, "up to date, skipping");
        outcome.skipped.push(stage);
        continue;
      }
      self.run_stage(unit, stage).map_err(|e| (Some(stage), e))?;
      outcome.executed.push(stage);
    }

    if target == Stage::Test {
      outcome.test = Some(match self.run_stage(unit, Stage::Test) {
        Ok(()) => {
          outcome.executed.push(Stage::Test);
          TestOutcome::Passed
        }
        Err(err @ StageError::NotReady { .. }) | Err(err @ StageError::Cancelled { .. }) => {
          return Err((Some(Stage::Test), err));
        }
        Err(err) => {
          warn!(error = %err, "tests failed");
          TestOutcome::Failed {
            message: err.to_string(),
            tail: err.tail().to_vec(),
          }
        }
      });
    }
    Ok(())
  }

  /// Runs one stage of `unit` unconditionally.
  ///
  /// The previous stage must have completed. On success the stage's marker
  /// is recorded; on failure it stays absent along with every downstream
  /// marker.
  pub fn run_stage(&self, unit: &BuildUnit, stage: Stage) -> Result<(), StageError> {
    let span = info_span!("stage", stage = %stage);
    let _enter = span.enter();

    if self.cancel_token().is_cancelled() {
      return Err(StageError::Cancelled {
        unit: unit.name.clone(),
        stage,
      });
    }
    if let Some(previous) = stage.previous()
      && dirty::read_marker(unit, previous)?.is_none()
    {
      return Err(StageError::NotReady {
        unit: unit.name.clone(),
        stage,
        missing: previous,
      });
    }

    let backend = self.backend_for(unit)?;
    dirty::invalidate_from(unit, stage)?;
    if stage == Stage::Build {
      prepare_build(unit)?;
    }

    info!("running");
    let started = Instant::now();
    let ctx = self.context(unit, stage);
    match stage {
      Stage::Pull => backend.pull(&ctx)?,
      Stage::Build => backend.build(&ctx)?,
      Stage::Stage => backend.stage(&ctx)?,
      Stage::Deploy => backend.deploy(&ctx)?,
      Stage::Test => backend.test(&ctx)?,
    }

    dirty::record(unit, stage)?;
    info!(elapsed = ?started.elapsed(), "done");
    Ok(())
  }

  fn clean(&self, unit: &BuildUnit) -> Result<(), (Option<Stage>, StageError)> {
    let retracted = retract_deployed(&unit.dirs).map_err(|source| {
      (
        None,
        StageError::Deploy {
          unit: unit.name.clone(),
          source,
        },
      )
    })?;
    if retracted > 0 {
      info!(files = retracted, "removed deployed files");
    }
    remove_path(&unit.dirs.root).map_err(|source| {
      (
        None,
        StageError::Io {
          unit: unit.name.clone(),
          path: unit.dirs.root.clone(),
          source,
        },
      )
    })?;
    info!("removed unit directories");
    Ok(())
  }

  fn clean_pull(&self, unit: &BuildUnit) -> Result<(), (Option<Stage>, StageError)> {
    let fail = |err: StageError| (Some(Stage::Pull), err);
    let backend = self.backend_for(unit).map_err(fail)?;
    let ctx = self.context(unit, Stage::Pull);

    backend.clean_pull(&ctx).map_err(fail)?;
    remove_path(&unit.dirs.pull).map_err(|e| fail(ctx.io_error(&unit.dirs.pull, e)))?;
    dirty::clear_all(unit).map_err(|e: DirtyError| fail(e.into()))?;

    let specs = backend
      .toolchains(&unit.config)
      .map_err(|e| fail(ctx.provision_error(e)))?;
    for spec in specs {
      self
        .toolchains
        .clean(&spec.key)
        .map_err(|e| fail(ctx.provision_error(e)))?;
    }

    info!("removed pulled sources and cached toolchains");
    Ok(())
  }
}
