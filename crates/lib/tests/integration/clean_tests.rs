//! Clean and clean-pull.

use partkit_lib::dirty;
use partkit_lib::orchestrator::Command;
use partkit_lib::unit::{LifecycleState, Stage};

use super::common::{Project, tool_spec};

const UNIT: &str = r#"
units:
  a:
    backend: recording
    source: src/a
    use-toolchain: true
  b:
    backend: recording
    source: src/b
"#;

#[test]
fn clean_removes_unit_directories() {
  let project = Project::new();
  let orchestrator = project.orchestrator(UNIT);
  orchestrator.run(&[], Command::Run(Stage::Deploy)).unwrap();
  let a = orchestrator.unit("a").unwrap();
  assert!(a.dirs.build.exists());

  let report = orchestrator.run(&["a".to_string()], Command::Clean).unwrap();

  assert!(report.is_success());
  assert_eq!(report.unit("a").unwrap().state, LifecycleState::Uninitialized);
  assert!(!a.dirs.root.exists());
  assert!(orchestrator.unit("b").unwrap().dirs.build.exists());
}

#[test]
fn clean_removes_only_the_units_deployed_files() {
  let project = Project::new();
  let orchestrator = project.orchestrator(UNIT);
  orchestrator.run(&[], Command::Run(Stage::Deploy)).unwrap();
  let deploy = project.deploy_dir();
  assert!(deploy.join("bin/a").is_file());

  orchestrator.run(&["a".to_string()], Command::Clean).unwrap();

  assert!(!deploy.join("bin/a").exists());
  assert!(!deploy.join("share/a.txt").exists());
  assert!(!deploy.join("lib/liba.a").exists());
  assert!(deploy.join("bin/b").is_file());
  assert!(deploy.join("share/b.txt").is_file());
}

#[test]
fn clean_of_untouched_unit_succeeds() {
  let project = Project::new();
  let orchestrator = project.orchestrator(UNIT);

  let report = orchestrator.run(&[], Command::Clean).unwrap();

  assert!(report.is_success());
}

#[test]
fn clean_pull_forgets_sources_and_toolchain() {
  let project = Project::new();
  let orchestrator = project.orchestrator(UNIT);
  orchestrator.run(&["a".to_string()], Command::Run(Stage::Deploy)).unwrap();
  let a = orchestrator.unit("a").unwrap();

  let report = orchestrator.run(&["a".to_string()], Command::CleanPull).unwrap();

  assert!(report.is_success());
  assert!(!a.dirs.pull.exists());
  assert!(!orchestrator.toolchains().entry(&tool_spec().key).is_complete());
  for stage in Stage::LIFECYCLE {
    assert!(dirty::read_marker(a, stage).unwrap().is_none());
  }
  assert_eq!(dirty::state(a), LifecycleState::Uninitialized);
}

#[test]
fn pull_after_clean_pull_downloads_again() {
  let project = Project::new();
  let orchestrator = project.orchestrator(UNIT);
  orchestrator.run(&["a".to_string()], Command::Run(Stage::Pull)).unwrap();
  orchestrator.run(&["a".to_string()], Command::CleanPull).unwrap();
  project.recorder.clear();

  let report = orchestrator.run(&["a".to_string()], Command::Run(Stage::Pull)).unwrap();

  assert_eq!(report.unit("a").unwrap().executed, [Stage::Pull]);
  assert_eq!(project.downloader.calls(), 2);
  assert!(orchestrator.unit("a").unwrap().dirs.pull.join("main.c").is_file());
}
