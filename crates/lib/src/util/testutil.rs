//! Test utilities for partkit-lib.
//!
//! Cross-platform helpers for tests that execute shell commands, plus a
//! builder for small gzip tarballs standing in for downloaded toolchains.

use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;

/// Returns the shell command and args to execute a shell script.
#[cfg(unix)]
pub fn shell_cmd(script: &str) -> (&'static str, Vec<String>) {
  ("/bin/sh", vec!["-c".to_string(), script.to_string()])
}

#[cfg(windows)]
pub fn shell_cmd(script: &str) -> (&'static str, Vec<String>) {
  ("cmd.exe", vec!["/C".to_string(), script.to_string()])
}

/// Returns the shell command and args to echo an environment variable.
#[cfg(unix)]
pub fn shell_echo_env(var: &str) -> (&'static str, Vec<String>) {
  ("/bin/sh", vec!["-c".to_string(), format!("echo \"${}\"", var)])
}

#[cfg(windows)]
pub fn shell_echo_env(var: &str) -> (&'static str, Vec<String>) {
  ("cmd.exe", vec!["/C".to_string(), format!("echo %{}%", var)])
}

/// Write an executable shell script.
#[cfg(unix)]
pub fn write_script(path: &Path, body: &str) {
  use std::os::unix::fs::PermissionsExt;

  std::fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
  std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// Build a `.tar.gz` whose entries all live under a single `top` directory,
/// the way release tarballs are laid out.
pub fn targz(top: &str, files: &[(&str, &str)]) -> Vec<u8> {
  let encoder = GzEncoder::new(Vec::new(), Compression::fast());
  let mut builder = tar::Builder::new(encoder);

  for (path, content) in files {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o755);
    header.set_cksum();
    builder
      .append_data(&mut header, format!("{}/{}", top, path), content.as_bytes())
      .unwrap();
  }

  builder.into_inner().unwrap().finish().unwrap()
}

/// A unit over the base schema plus a build-dirty `configflags` option.
pub fn test_unit(work_dir: &Path, name: &str, raw: serde_json::Value) -> crate::unit::BuildUnit {
  use crate::schema::{OptionSpec, Schema, merge_schema};
  use crate::unit::{BuildUnit, Stage, UnitDirs};

  let extension = Schema::new([OptionSpec::string("configflags")
    .with_default("")
    .dirties(Stage::Build)])
  .unwrap();
  let schema = merge_schema(&Schema::base(), &extension).unwrap();
  let raw = serde_json::from_value(raw).unwrap();
  let config = schema.resolve(&raw).unwrap();

  BuildUnit {
    name: name.to_string(),
    backend: "test".to_string(),
    schema: std::sync::Arc::new(schema),
    config,
    dirs: UnitDirs::new(work_dir, name),
  }
}

/// Serves one fixed body and counts requests.
pub struct StaticDownloader {
  pub body: Vec<u8>,
  pub calls: std::sync::atomic::AtomicUsize,
}

impl StaticDownloader {
  pub fn new(body: Vec<u8>) -> Self {
    Self {
      body,
      calls: Default::default(),
    }
  }
}

impl crate::toolchain::Downloader for StaticDownloader {
  fn download(&self, _url: &str, sink: &mut dyn std::io::Write) -> Result<u64, crate::toolchain::DownloadError> {
    self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    sink.write_all(&self.body)?;
    Ok(self.body.len() as u64)
  }
}

/// A Node.js release whose tools only append their arguments to `$PARTKIT_TEST_LOG`.
pub fn fake_node_tarball() -> Vec<u8> {
  let logger = |tool: &str| format!("#!/bin/sh\necho \"{} $*\" >> \"$PARTKIT_TEST_LOG\"\n", tool);
  let (node, npm, gulp) = (logger("node"), logger("npm"), logger("gulp"));
  targz(
    "node-v20.11.1-linux-x64",
    &[("bin/node", node.as_str()), ("bin/npm", npm.as_str()), ("bin/gulp", gulp.as_str())],
  )
}

/// One unit of a real backend wired to a scratch project, a process runner
/// whose PATH starts with `<project>/bin` and a toolchain cache serving
/// [`fake_node_tarball`].
pub struct Harness {
  pub project: tempfile::TempDir,
  pub unit: crate::unit::BuildUnit,
  pub runner: crate::process::ProcessRunner,
  pub cache: crate::toolchain::ToolchainCache,
  pub downloader: std::sync::Arc<StaticDownloader>,
  pub log: std::path::PathBuf,
}

impl Harness {
  pub fn new(backend: &dyn crate::lifecycle::Backend, raw: serde_json::Value) -> Self {
    use crate::schema::{Schema, merge_schema};
    use crate::unit::{BuildUnit, UnitDirs};

    let project = tempfile::TempDir::new().unwrap();
    let bin = project.path().join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    let log = project.path().join("commands.log");

    let schema = merge_schema(&Schema::base(), &backend.schema().unwrap()).unwrap();
    let config = schema.resolve(&serde_json::from_value(raw).unwrap()).unwrap();
    let unit = BuildUnit {
      name: "demo".to_string(),
      backend: backend.name().to_string(),
      schema: std::sync::Arc::new(schema),
      config,
      dirs: UnitDirs::new(&project.path().join("parts"), "demo"),
    };

    let path = std::env::join_paths(
      std::iter::once(bin).chain(std::env::split_paths(&std::env::var_os("PATH").unwrap_or_default())),
    )
    .unwrap();
    let ambient = crate::env::AmbientEnv::from_pairs(
      std::env::vars_os()
        .filter(|(k, _)| k != "PATH" && k != "http_proxy" && k != "HTTP_PROXY")
        .chain([("PATH".into(), path), ("PARTKIT_TEST_LOG".into(), log.clone().into_os_string())]),
    );

    let downloader = std::sync::Arc::new(StaticDownloader::new(fake_node_tarball()));
    let cache = crate::toolchain::ToolchainCache::new(project.path().join("cache"), downloader.clone());

    Self {
      runner: crate::process::ProcessRunner::new(ambient),
      project,
      unit,
      cache,
      downloader,
      log,
    }
  }

  /// Replaces the runner's ambient environment with one extra variable set.
  pub fn with_ambient_var(mut self, key: &str, value: &str) -> Self {
    let resolved = crate::env::EnvOverlay::new()
      .set(key, value)
      .resolve(self.runner.ambient());
    self.runner = crate::process::ProcessRunner::new(crate::env::AmbientEnv::from_pairs(resolved));
    self
  }

  pub fn ctx(&self, stage: crate::unit::Stage) -> crate::lifecycle::StageContext<'_> {
    crate::lifecycle::StageContext {
      unit: &self.unit,
      stage,
      runner: &self.runner,
      toolchains: &self.cache,
      project_dir: self.project.path(),
    }
  }

  /// Puts an executable named `name` on the runner's PATH.
  #[cfg(unix)]
  pub fn fake_tool(&self, name: &str, body: &str) {
    write_script(&self.project.path().join("bin").join(name), body);
  }

  /// A tool that appends its name and arguments to the command log.
  #[cfg(unix)]
  pub fn logging_tool(&self, name: &str) {
    self.fake_tool(name, &format!("echo \"{} $*\" >> \"$PARTKIT_TEST_LOG\"", name));
  }

  pub fn log_lines(&self) -> Vec<String> {
    std::fs::read_to_string(&self.log)
      .unwrap_or_default()
      .lines()
      .map(str::to_string)
      .collect()
  }

  pub fn downloads(&self) -> usize {
    self.downloader.calls.load(std::sync::atomic::Ordering::SeqCst)
  }
}
