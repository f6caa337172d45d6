//! Toolchain downloads shared between stages and units.

use std::time::Duration;

use partkit_lib::orchestrator::Command;
use partkit_lib::unit::Stage;

use super::common::{CountingDownloader, Project, tool_spec};

const TOOL_UNITS: &str = r#"
units:
  a:
    backend: recording
    source: src/a
    use-toolchain: true
  b:
    backend: recording
    source: src/b
    use-toolchain: true
"#;

#[test]
fn toolchain_is_downloaded_once_across_stages() {
  let project = Project::new();
  let orchestrator = project.orchestrator(TOOL_UNITS);

  let report = orchestrator
    .run(&["a".to_string()], Command::Run(Stage::Build))
    .unwrap();

  assert!(report.is_success());
  assert_eq!(project.downloader.calls(), 1);
  let runtime = orchestrator.unit("a").unwrap().dirs.runtime_dir("tool");
  assert!(runtime.join("bin/tool").is_file());
  assert!(orchestrator.toolchains().entry(&tool_spec().key).is_complete());
}

#[test]
fn pulling_twice_reuses_the_cache() {
  let project = Project::new();
  let orchestrator = project.orchestrator(TOOL_UNITS);
  let a = orchestrator.unit("a").unwrap();

  orchestrator.run_stage(a, Stage::Pull).unwrap();
  orchestrator.run_stage(a, Stage::Pull).unwrap();

  assert_eq!(project.downloader.calls(), 1);
}

#[test]
fn concurrent_units_share_one_download() {
  let project = Project::with_downloader(CountingDownloader::new(Duration::from_millis(200)));
  let orchestrator = project.orchestrator(TOOL_UNITS);

  let report = orchestrator.run(&[], Command::Run(Stage::Build)).unwrap();

  assert!(report.is_success(), "{:?}", report.failed().collect::<Vec<_>>());
  assert_eq!(project.downloader.calls(), 1);
  for name in ["a", "b"] {
    let runtime = orchestrator.unit(name).unwrap().dirs.runtime_dir("tool");
    assert!(runtime.join("bin/tool").is_file(), "{} not provisioned", name);
  }
}

#[test]
fn later_orchestrator_reuses_cached_toolchain() {
  let project = Project::new();
  project
    .orchestrator(TOOL_UNITS)
    .run(&["a".to_string()], Command::Run(Stage::Pull))
    .unwrap();

  project
    .orchestrator(TOOL_UNITS)
    .run(&["b".to_string()], Command::Run(Stage::Build))
    .unwrap();

  assert_eq!(project.downloader.calls(), 1);
}
