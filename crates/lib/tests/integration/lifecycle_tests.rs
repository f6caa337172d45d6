//! Lifecycle walks, dirty-state skipping and failure isolation.

use partkit_lib::dirty;
use partkit_lib::lifecycle::{ErrorKind, StageError};
use partkit_lib::manifest::Manifest;
use partkit_lib::orchestrator::{Command, OrchestratorError, TestOutcome};
use partkit_lib::unit::{LifecycleState, Stage};

use super::common::Project;

fn unit_yaml(flags: &str) -> String {
  format!(
    r#"
units:
  a:
    backend: recording
    source: src/a
    flags: "{}"
"#,
    flags
  )
}

const TWO_UNITS: &str = r#"
units:
  a:
    backend: recording
    source: src/a
  b:
    backend: recording
    source: src/b
    fail-at: build
"#;

#[test]
fn first_deploy_runs_every_stage_in_order() {
  let project = Project::new();
  let orchestrator = project.orchestrator(&unit_yaml("-O2"));

  let report = orchestrator.run(&[], Command::Run(Stage::Deploy)).unwrap();

  assert!(report.is_success());
  let outcome = report.unit("a").unwrap();
  assert_eq!(outcome.executed, Stage::LIFECYCLE.to_vec());
  assert!(outcome.skipped.is_empty());
  assert_eq!(outcome.state, LifecycleState::Deployed);
  assert_eq!(project.recorder.calls_for("a"), ["pull", "build", "stage", "deploy"]);

  let unit = orchestrator.unit("a").unwrap();
  assert_eq!(std::fs::read_to_string(unit.dirs.build.join("flags.txt")).unwrap(), "-O2");
  assert!(unit.dirs.build.join("main.c").exists());
}

#[test]
fn unchanged_unit_is_skipped_entirely() {
  let project = Project::new();
  let orchestrator = project.orchestrator(&unit_yaml(""));
  orchestrator.run(&[], Command::Run(Stage::Deploy)).unwrap();
  project.recorder.clear();

  let report = orchestrator.run(&[], Command::Run(Stage::Deploy)).unwrap();

  let outcome = report.unit("a").unwrap();
  assert!(outcome.executed.is_empty());
  assert_eq!(outcome.skipped, Stage::LIFECYCLE.to_vec());
  assert!(project.recorder.calls().is_empty());
}

#[test]
fn build_option_change_reruns_from_build() {
  let project = Project::new();
  project
    .orchestrator(&unit_yaml("-O0"))
    .run(&[], Command::Run(Stage::Deploy))
    .unwrap();
  project.recorder.clear();

  let orchestrator = project.orchestrator(&unit_yaml("-O3"));
  let report = orchestrator.run(&[], Command::Run(Stage::Deploy)).unwrap();

  let outcome = report.unit("a").unwrap();
  assert_eq!(outcome.skipped, [Stage::Pull]);
  assert_eq!(outcome.executed, [Stage::Build, Stage::Stage, Stage::Deploy]);
  let build = orchestrator.unit("a").unwrap().dirs.build.join("flags.txt");
  assert_eq!(std::fs::read_to_string(build).unwrap(), "-O3");
}

#[test]
fn source_change_reruns_everything() {
  let project = Project::new();
  project
    .orchestrator(&unit_yaml(""))
    .run(&[], Command::Run(Stage::Deploy))
    .unwrap();
  project.recorder.clear();

  let moved = unit_yaml("").replace("src/a", "src/b");
  let orchestrator = project.orchestrator(&moved);
  let report = orchestrator.run(&[], Command::Run(Stage::Deploy)).unwrap();

  assert_eq!(report.unit("a").unwrap().executed, Stage::LIFECYCLE.to_vec());
  let pulled = orchestrator.unit("a").unwrap().dirs.pull.join("main.c");
  assert_eq!(std::fs::read_to_string(pulled).unwrap(), "/* b */");
}

#[test]
fn requesting_build_runs_pull_first() {
  let project = Project::new();
  let orchestrator = project.orchestrator(&unit_yaml(""));

  let report = orchestrator.run(&[], Command::Run(Stage::Build)).unwrap();

  let outcome = report.unit("a").unwrap();
  assert_eq!(outcome.executed, [Stage::Pull, Stage::Build]);
  assert_eq!(outcome.state, LifecycleState::Built);
}

#[test]
fn single_stage_refuses_to_run_before_its_predecessor() {
  let project = Project::new();
  let orchestrator = project.orchestrator(&unit_yaml(""));
  let unit = orchestrator.unit("a").unwrap();

  let err = orchestrator.run_stage(unit, Stage::Build).unwrap_err();

  assert!(matches!(
    err,
    StageError::NotReady {
      stage: Stage::Build,
      missing: Stage::Pull,
      ..
    }
  ));
  assert_eq!(err.kind(), ErrorKind::NotReady);
  assert!(project.recorder.calls().is_empty());
  assert!(dirty::read_marker(unit, Stage::Build).unwrap().is_none());
}

#[test]
fn rerunning_a_stage_invalidates_downstream_markers() {
  let project = Project::new();
  let orchestrator = project.orchestrator(&unit_yaml(""));
  orchestrator.run(&[], Command::Run(Stage::Deploy)).unwrap();
  let unit = orchestrator.unit("a").unwrap();

  orchestrator.run_stage(unit, Stage::Build).unwrap();

  assert!(dirty::read_marker(unit, Stage::Build).unwrap().is_some());
  assert!(dirty::read_marker(unit, Stage::Stage).unwrap().is_none());
  assert!(dirty::read_marker(unit, Stage::Deploy).unwrap().is_none());
  assert_eq!(dirty::state(unit), LifecycleState::Built);
}

#[test]
fn deploy_copies_only_allowed_entries() {
  let project = Project::new();
  let orchestrator = project.orchestrator(&unit_yaml(""));

  orchestrator.run(&[], Command::Run(Stage::Deploy)).unwrap();

  let deploy = project.deploy_dir();
  assert!(deploy.join("bin/a").is_file());
  assert!(deploy.join("share/a.txt").is_file());
  assert!(deploy.join("lib/liba.a").is_file());
  assert!(!deploy.join("include").exists());
}

#[test]
fn deploy_override_replaces_allow_list() {
  let project = Project::new();
  let yaml = r#"
units:
  a:
    backend: recording
    source: src/a
    deploy: [include]
"#;
  project
    .orchestrator(yaml)
    .run(&[], Command::Run(Stage::Deploy))
    .unwrap();

  let deploy = project.deploy_dir();
  assert!(deploy.join("include/a.h").is_file());
  assert!(!deploy.join("bin").exists());
}

#[test]
fn shrinking_the_deploy_override_removes_dropped_entries() {
  let project = Project::new();
  let wide = r#"
units:
  a:
    backend: recording
    source: src/a
    deploy: [bin, include]
"#;
  let narrow = r#"
units:
  a:
    backend: recording
    source: src/a
    deploy: [bin]
"#;
  project.orchestrator(wide).run(&[], Command::Run(Stage::Deploy)).unwrap();
  assert!(project.deploy_dir().join("include/a.h").is_file());

  let report = project.orchestrator(narrow).run(&[], Command::Run(Stage::Deploy)).unwrap();

  assert_eq!(report.unit("a").unwrap().executed, [Stage::Deploy]);
  assert!(project.deploy_dir().join("bin/a").is_file());
  assert!(!project.deploy_dir().join("include").exists());
}

#[test]
fn path_like_deploy_override_is_a_config_error() {
  let project = Project::new();
  let manifest = Manifest::parse(
    r#"
units:
  a:
    backend: recording
    source: src/a
    deploy: ["../../escape"]
"#,
  )
  .unwrap();
  let mut orchestrator = project.empty_orchestrator();

  let err = orchestrator.load_manifest(&manifest).unwrap_err();

  assert!(err.is_config());
  assert!(err.to_string().contains("../../escape"), "{}", err);
  assert!(!project.path().join("escape").exists());
}

#[test]
fn failing_unit_does_not_stop_others() {
  let project = Project::new();
  let orchestrator = project.orchestrator(TWO_UNITS);

  let report = orchestrator.run(&[], Command::Run(Stage::Deploy)).unwrap();

  assert!(!report.is_success());
  assert_eq!(report.exit_code(), 1);

  let ok = report.unit("a").unwrap();
  assert!(ok.is_success());
  assert_eq!(ok.state, LifecycleState::Deployed);

  let failed = report.unit("b").unwrap();
  let failure = failed.failure.as_ref().unwrap();
  assert_eq!(failure.stage, Some(Stage::Build));
  assert_eq!(failure.kind, ErrorKind::Stage);
  assert!(failure.message.contains("build exploded"));
  assert_eq!(failed.executed, [Stage::Pull]);
  assert_eq!(failed.state, LifecycleState::Pulled);

  let unit = orchestrator.unit("b").unwrap();
  assert!(dirty::read_marker(unit, Stage::Build).unwrap().is_none());
  assert!(!project.recorder.calls_for("b").contains(&"stage".to_string()));
}

#[test]
fn failed_stage_is_retried_on_next_run() {
  let project = Project::new();
  project
    .orchestrator(TWO_UNITS)
    .run(&["b".to_string()], Command::Run(Stage::Deploy))
    .unwrap();
  project.recorder.clear();

  let fixed = TWO_UNITS.replace("    fail-at: build\n", "");
  let report = project
    .orchestrator(&fixed)
    .run(&["b".to_string()], Command::Run(Stage::Deploy))
    .unwrap();

  let outcome = report.unit("b").unwrap();
  assert!(outcome.is_success());
  assert_eq!(outcome.skipped, [Stage::Pull]);
  assert_eq!(outcome.executed, [Stage::Build, Stage::Stage, Stage::Deploy]);
}

#[test]
fn failing_tests_are_reported_without_aborting() {
  let project = Project::new();
  let yaml = r#"
units:
  a:
    backend: recording
    source: src/a
  b:
    backend: recording
    source: src/b
    test-fails: true
"#;
  let orchestrator = project.orchestrator(yaml);

  let report = orchestrator.run(&[], Command::Run(Stage::Test)).unwrap();

  let passed = report.unit("a").unwrap();
  assert_eq!(passed.test, Some(TestOutcome::Passed));
  assert_eq!(passed.state, LifecycleState::Tested);

  let failed = report.unit("b").unwrap();
  assert!(failed.failure.is_none());
  assert_eq!(failed.state, LifecycleState::Deployed);
  match &failed.test {
    Some(TestOutcome::Failed { message, .. }) => assert!(message.contains("2 of 5 tests failed")),
    other => panic!("expected failed tests, got {:?}", other),
  }
  assert_eq!(report.exit_code(), 1);
}

#[test]
fn tests_run_again_when_requested() {
  let project = Project::new();
  let orchestrator = project.orchestrator(&unit_yaml(""));
  orchestrator.run(&[], Command::Run(Stage::Test)).unwrap();
  project.recorder.clear();

  orchestrator.run(&[], Command::Run(Stage::Test)).unwrap();

  assert_eq!(project.recorder.calls_for("a"), ["test"]);
}

#[test]
fn unknown_unit_is_a_config_error() {
  let project = Project::new();
  let orchestrator = project.orchestrator(&unit_yaml(""));

  let err = orchestrator
    .run(&["nope".to_string()], Command::Run(Stage::Pull))
    .unwrap_err();

  assert!(matches!(err, OrchestratorError::UnknownUnit(ref name) if name == "nope"));
  assert!(err.is_config());
}

#[test]
fn invalid_manifest_reports_every_unit_and_adds_none() {
  let project = Project::new();
  let manifest = Manifest::parse(
    r#"
units:
  good:
    backend: recording
  web:
    backend: gulp
  typo:
    backend: recordnig
"#,
  )
  .unwrap();
  let mut orchestrator = project.empty_orchestrator();

  let err = orchestrator.load_manifest(&manifest).unwrap_err();

  match &err {
    OrchestratorError::InvalidUnits(errors) => assert_eq!(errors.len(), 2),
    other => panic!("unexpected error: {}", other),
  }
  let message = err.to_string();
  assert!(message.contains("gulp-tasks"), "{}", message);
  assert!(message.contains("recordnig"), "{}", message);
  assert_eq!(orchestrator.units().count(), 0);
}

#[cfg(unix)]
#[test]
fn cancelling_stops_the_running_step_without_a_marker() {
  use std::time::{Duration, Instant};

  let project = Project::new();
  let yaml = r#"
units:
  a:
    backend: recording
    source: src/a
    stall-build: true
"#;
  let orchestrator = project.orchestrator(yaml);
  let token = orchestrator.cancel_token().clone();
  let canceller = std::thread::spawn(move || {
    std::thread::sleep(Duration::from_millis(300));
    token.cancel();
  });

  let started = Instant::now();
  let report = orchestrator.run(&[], Command::Run(Stage::Deploy)).unwrap();
  canceller.join().unwrap();

  assert!(started.elapsed() < Duration::from_secs(20));
  let outcome = report.unit("a").unwrap();
  let failure = outcome.failure.as_ref().unwrap();
  assert_eq!(failure.kind, ErrorKind::Cancelled);
  assert_eq!(failure.stage, Some(Stage::Build));
  assert_eq!(outcome.state, LifecycleState::Pulled);
  let unit = orchestrator.unit("a").unwrap();
  assert!(dirty::read_marker(unit, Stage::Build).unwrap().is_none());
}

#[test]
fn project_root_source_does_not_copy_the_work_dir() {
  let project = Project::new();
  let yaml = r#"
units:
  a:
    backend: recording
    source: "."
    use-toolchain: true
  b:
    backend: recording
    source: src/b
"#;
  let orchestrator = project.orchestrator(yaml);
  orchestrator.run(&[], Command::Run(Stage::Deploy)).unwrap();

  let unit = orchestrator.unit("a").unwrap();
  orchestrator.run_stage(unit, Stage::Pull).unwrap();

  let pull = &unit.dirs.pull;
  assert!(pull.join("src/a/main.c").is_file());
  assert!(!pull.join("parts").exists());
  assert!(!pull.join("cache").exists());
}
