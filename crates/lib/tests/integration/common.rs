//! Shared helpers: a recording backend, a counting downloader and scratch projects.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use partkit_lib::env::AmbientEnv;
use partkit_lib::lifecycle::{Backend, StageContext, StageError, default_deploy, default_pull};
use partkit_lib::manifest::Manifest;
use partkit_lib::orchestrator::{EngineConfig, Orchestrator};
use partkit_lib::process::ProcessRunner;
use partkit_lib::registry::BackendRegistry;
use partkit_lib::schema::{OptionSpec, ResolvedConfig, Schema, SchemaError};
use partkit_lib::toolchain::{DownloadError, Downloader, ProvisionError, RetryPolicy, ToolchainKey, ToolchainSpec};
use partkit_lib::unit::Stage;
use tempfile::TempDir;

/// Stage calls in the order they happened, as `unit:stage`.
#[derive(Default)]
pub struct Recorder(Mutex<Vec<String>>);

impl Recorder {
  fn push(&self, unit: &str, stage: Stage) {
    self.0.lock().unwrap().push(format!("{}:{}", unit, stage));
  }

  pub fn calls(&self) -> Vec<String> {
    self.0.lock().unwrap().clone()
  }

  pub fn calls_for(&self, unit: &str) -> Vec<String> {
    let prefix = format!("{}:", unit);
    self
      .calls()
      .into_iter()
      .filter_map(|c| c.strip_prefix(&prefix).map(str::to_string))
      .collect()
  }

  pub fn clear(&self) {
    self.0.lock().unwrap().clear();
  }
}

pub fn tool_spec() -> ToolchainSpec {
  ToolchainSpec::new(ToolchainKey::new("tool", "1.0"), "https://example.invalid/tool-1.0.tar.gz")
}

/// Backend whose stages only record that they ran, plus a few knobs to make
/// them fail, stall or use a toolchain.
pub struct RecordingBackend {
  pub recorder: Arc<Recorder>,
}

impl RecordingBackend {
  fn fail_if_requested(&self, ctx: &StageContext<'_>) -> Result<(), StageError> {
    if ctx.config().get_str("fail-at") == Some(ctx.stage.as_str()) {
      return Err(StageError::Stage {
        unit: ctx.name().to_string(),
        message: format!("{} exploded", ctx.stage),
      });
    }
    Ok(())
  }

  fn uses_toolchain(config: &ResolvedConfig) -> bool {
    config.get_bool("use-toolchain").unwrap_or(false)
  }
}

impl Backend for RecordingBackend {
  fn name(&self) -> &str {
    "recording"
  }

  fn schema(&self) -> Result<Schema, SchemaError> {
    Schema::new([
      OptionSpec::string("flags").with_default("").dirties(Stage::Build),
      OptionSpec::string("fail-at"),
      OptionSpec::boolean("test-fails").with_default(false),
      OptionSpec::boolean("stall-build").with_default(false),
      OptionSpec::boolean("use-toolchain").with_default(false).dirties(Stage::Pull),
    ])
  }

  fn pull(&self, ctx: &StageContext<'_>) -> Result<(), StageError> {
    self.recorder.push(ctx.name(), Stage::Pull);
    self.fail_if_requested(ctx)?;
    default_pull(ctx)?;
    if Self::uses_toolchain(ctx.config()) {
      ctx
        .toolchains
        .ensure_downloaded(&tool_spec())
        .map_err(|e| ctx.provision_error(e))?;
    }
    Ok(())
  }

  fn build(&self, ctx: &StageContext<'_>) -> Result<(), StageError> {
    self.recorder.push(ctx.name(), Stage::Build);
    self.fail_if_requested(ctx)?;
    if ctx.config().get_bool("stall-build") == Some(true) {
      ctx.run(&ctx.command("sh").args(["-c", "sleep 30"]))?;
    }
    if Self::uses_toolchain(ctx.config()) {
      let runtime = ctx.dirs().runtime_dir("tool");
      ctx
        .toolchains
        .provision(&tool_spec(), &runtime, true, true)
        .map_err(|e| ctx.provision_error(e))?;
    }
    let out = ctx.dirs().build.join("flags.txt");
    std::fs::write(&out, ctx.config().get_str("flags").unwrap_or_default()).map_err(|e| ctx.io_error(&out, e))
  }

  fn stage(&self, ctx: &StageContext<'_>) -> Result<(), StageError> {
    self.recorder.push(ctx.name(), Stage::Stage);
    self.fail_if_requested(ctx)?;
    let name = ctx.name();
    for (dir, file) in [
      ("bin", name.to_string()),
      ("share", format!("{}.txt", name)),
      ("lib", format!("lib{}.a", name)),
      ("include", format!("{}.h", name)),
    ] {
      let dir = ctx.dirs().stage.join(dir);
      std::fs::create_dir_all(&dir).map_err(|e| ctx.io_error(&dir, e))?;
      std::fs::write(dir.join(file), name).map_err(|e| ctx.io_error(&dir, e))?;
    }
    Ok(())
  }

  fn deploy(&self, ctx: &StageContext<'_>) -> Result<(), StageError> {
    self.recorder.push(ctx.name(), Stage::Deploy);
    self.fail_if_requested(ctx)?;
    default_deploy(ctx, self.deploy_entries()).map(|_| ())
  }

  fn test(&self, ctx: &StageContext<'_>) -> Result<(), StageError> {
    self.recorder.push(ctx.name(), Stage::Test);
    if ctx.config().get_bool("test-fails") == Some(true) {
      return Err(StageError::Stage {
        unit: ctx.name().to_string(),
        message: "2 of 5 tests failed".to_string(),
      });
    }
    Ok(())
  }

  fn toolchains(&self, config: &ResolvedConfig) -> Result<Vec<ToolchainSpec>, ProvisionError> {
    Ok(if Self::uses_toolchain(config) { vec![tool_spec()] } else { vec![] })
  }
}

/// Serves a small tarball, counting requests.
pub struct CountingDownloader {
  body: Vec<u8>,
  calls: AtomicUsize,
  delay: Duration,
}

impl CountingDownloader {
  pub fn new(delay: Duration) -> Self {
    Self {
      body: tool_tarball(),
      calls: AtomicUsize::new(0),
      delay,
    }
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl Downloader for CountingDownloader {
  fn download(&self, _url: &str, sink: &mut dyn Write) -> Result<u64, DownloadError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    std::thread::sleep(self.delay);
    sink.write_all(&self.body)?;
    Ok(self.body.len() as u64)
  }
}

fn tool_tarball() -> Vec<u8> {
  let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::fast()));
  let body = b"#!/bin/sh\necho tool\n";
  let mut header = tar::Header::new_gnu();
  header.set_size(body.len() as u64);
  header.set_mode(0o755);
  header.set_cksum();
  builder.append_data(&mut header, "tool-1.0/bin/tool", &body[..]).unwrap();
  builder.into_inner().unwrap().finish().unwrap()
}

/// A scratch project with two source trees, `src/a` and `src/b`.
pub struct Project {
  pub temp: TempDir,
  pub recorder: Arc<Recorder>,
  pub downloader: Arc<CountingDownloader>,
  pub parallelism: usize,
}

impl Project {
  pub fn new() -> Self {
    Self::with_downloader(CountingDownloader::new(Duration::ZERO))
  }

  pub fn with_downloader(downloader: CountingDownloader) -> Self {
    let temp = TempDir::new().unwrap();
    for name in ["a", "b"] {
      let dir = temp.path().join("src").join(name);
      std::fs::create_dir_all(&dir).unwrap();
      std::fs::write(dir.join("main.c"), format!("/* {} */", name)).unwrap();
    }
    Self {
      temp,
      recorder: Arc::new(Recorder::default()),
      downloader: Arc::new(downloader),
      parallelism: 2,
    }
  }

  pub fn path(&self) -> &Path {
    self.temp.path()
  }

  pub fn work_dir(&self) -> PathBuf {
    self.path().join("parts")
  }

  pub fn deploy_dir(&self) -> PathBuf {
    self.work_dir().join("deploy")
  }

  pub fn config(&self) -> EngineConfig {
    EngineConfig::for_project(self.path())
      .with_work_dir(self.work_dir())
      .with_cache_dir(self.path().join("cache"))
      .with_parallelism(self.parallelism)
      .with_retry(RetryPolicy {
        initial_delay: Duration::ZERO,
        ..RetryPolicy::default()
      })
  }

  fn registry(&self) -> BackendRegistry {
    let mut registry = BackendRegistry::with_builtin().unwrap();
    registry
      .register(Arc::new(RecordingBackend {
        recorder: self.recorder.clone(),
      }))
      .unwrap();
    registry
  }

  /// An orchestrator over the units declared in `yaml`.
  pub fn orchestrator(&self, yaml: &str) -> Orchestrator {
    let mut orchestrator = self.empty_orchestrator();
    orchestrator.load_manifest(&Manifest::parse(yaml).unwrap()).unwrap();
    orchestrator
  }

  pub fn empty_orchestrator(&self) -> Orchestrator {
    Orchestrator::new(
      self.registry(),
      self.config(),
      ProcessRunner::new(AmbientEnv::capture()),
      self.downloader.clone(),
    )
  }
}
