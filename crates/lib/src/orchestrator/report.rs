use std::time::Duration;

use serde::Serialize;

use crate::lifecycle::{ErrorKind, StageError};
use crate::unit::{LifecycleState, Stage};

/// Result of one orchestrator run across the selected units.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
  pub command: String,
  pub units: Vec<UnitOutcome>,
}

impl RunReport {
  /// True when no unit failed and no requested test failed.
  pub fn is_success(&self) -> bool {
    self.units.iter().all(UnitOutcome::is_success)
  }

  pub fn failed(&self) -> impl Iterator<Item = &UnitOutcome> {
    self.units.iter().filter(|u| !u.is_success())
  }

  pub fn unit(&self, name: &str) -> Option<&UnitOutcome> {
    self.units.iter().find(|u| u.unit == name)
  }

  /// Process exit code: 0 on success, 2 if any unit failed on configuration, else 1.
  pub fn exit_code(&self) -> u8 {
    if self.is_success() {
      0
    } else if self
      .units
      .iter()
      .any(|u| u.failure.as_ref().is_some_and(|f| f.kind == ErrorKind::Config))
    {
      2
    } else {
      1
    }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitOutcome {
  pub unit: String,
  pub backend: String,
  /// Stages that ran, in order.
  pub executed: Vec<Stage>,
  /// Stages skipped because they were up to date.
  pub skipped: Vec<Stage>,
  pub state: LifecycleState,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub failure: Option<UnitFailure>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub test: Option<TestOutcome>,
  #[serde(serialize_with = "serialize_millis")]
  pub duration: Duration,
}

impl UnitOutcome {
  pub fn new(unit: &str, backend: &str) -> Self {
    Self {
      unit: unit.to_string(),
      backend: backend.to_string(),
      executed: Vec::new(),
      skipped: Vec::new(),
      state: LifecycleState::Uninitialized,
      failure: None,
      test: None,
      duration: Duration::ZERO,
    }
  }

  pub fn is_success(&self) -> bool {
    self.failure.is_none() && !matches!(self.test, Some(TestOutcome::Failed { .. }))
  }
}

/// Why a unit stopped.
#[derive(Debug, Clone, Serialize)]
pub struct UnitFailure {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub stage: Option<Stage>,
  pub kind: ErrorKind,
  pub message: String,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub tail: Vec<String>,
}

impl UnitFailure {
  pub fn from_error(stage: Option<Stage>, err: &StageError) -> Self {
    Self {
      stage,
      kind: err.kind(),
      message: err.to_string(),
      tail: err.tail().to_vec(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum TestOutcome {
  Passed,
  Failed { message: String, tail: Vec<String> },
}

fn serialize_millis<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
  serializer.serialize_u64(duration.as_millis().min(u128::from(u64::MAX)) as u64)
}
