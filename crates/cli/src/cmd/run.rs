//! Lifecycle commands: `pull`, `build`, `stage`, `deploy`, `test`, `clean`
//! and `clean-pull` all load the manifest, take the work directory lock and
//! hand the selected units to the orchestrator.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use partkit_lib::consts::WORK_LOCK_FILENAME;
use partkit_lib::env::AmbientEnv;
use partkit_lib::lock::{FileLock, LockMode};
use partkit_lib::manifest::{Manifest, ManifestError};
use partkit_lib::orchestrator::{Command, EngineConfig, Orchestrator, OrchestratorError};
use partkit_lib::process::{CancelToken, ProcessRunner};
use partkit_lib::registry::BackendRegistry;
use partkit_lib::schema::SchemaError;
use partkit_lib::toolchain::HttpDownloader;

use crate::output::{OutputFormat, print_json, print_report};

/// Exit code for configuration and schema errors.
const EXIT_CONFIG: u8 = 2;
/// Exit code for any other failure.
const EXIT_FAILURE: u8 = 1;

pub struct RunOptions {
  pub manifest: PathBuf,
  pub work_dir: Option<PathBuf>,
  pub jobs: Option<usize>,
  pub output: OutputFormat,
  pub verbose: bool,
}

/// Runs `command` on `units` (all units when empty) and returns the exit code.
pub fn cmd_run(options: &RunOptions, command: Command, units: &[String], cancel: CancelToken) -> Result<u8> {
  let manifest = Manifest::load(&options.manifest)?;
  let config = engine_config(options)?;

  std::fs::create_dir_all(&config.work_dir)
    .with_context(|| format!("Failed to create work directory {}", config.work_dir.display()))?;
  let _lock = FileLock::try_acquire(
    &config.work_dir.join(WORK_LOCK_FILENAME),
    LockMode::Exclusive,
    &format!("partkit {}", command),
  )?;

  let registry = BackendRegistry::with_builtin()?;
  let runner = ProcessRunner::new(AmbientEnv::capture()).with_cancel(cancel);
  let downloader = HttpDownloader::new().context("Failed to set up the HTTP client")?;

  let mut orchestrator = Orchestrator::new(registry, config, runner, Arc::new(downloader));
  orchestrator.load_manifest(&manifest)?;
  debug!(units = orchestrator.units().count(), "manifest validated");

  let report = orchestrator.run(units, command)?;
  if options.output.is_json() {
    print_json(&report)?;
  } else {
    print_report(&report, options.verbose);
  }
  Ok(report.exit_code())
}

fn engine_config(options: &RunOptions) -> Result<EngineConfig> {
  let manifest_dir = match options.manifest.parent() {
    Some(dir) if !dir.as_os_str().is_empty() => dir,
    _ => Path::new("."),
  };
  let project_dir = std::path::absolute(manifest_dir)
    .with_context(|| format!("Failed to resolve project directory {}", manifest_dir.display()))?;

  let mut config = EngineConfig::for_project(&project_dir);
  if let Some(work_dir) = &options.work_dir {
    config = config.with_work_dir(std::path::absolute(work_dir)?);
  }
  if let Some(jobs) = options.jobs {
    config = config.with_parallelism(jobs);
  }
  Ok(config)
}

/// Configuration problems exit with 2, everything else with 1.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
  for cause in err.chain() {
    if let Some(err) = cause.downcast_ref::<OrchestratorError>() {
      return if err.is_config() { EXIT_CONFIG } else { EXIT_FAILURE };
    }
    if cause.is::<ManifestError>() || cause.is::<SchemaError>() {
      return EXIT_CONFIG;
    }
  }
  EXIT_FAILURE
}
