//! Build units, lifecycle stages and the per-unit directory layout.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::schema::{ResolvedConfig, Schema};

/// One step of a unit's lifecycle.
///
/// `Pull`, `Build`, `Stage` and `Deploy` form the ordered main line; `Test`
/// is a side lane reachable once a unit is deployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
  Pull,
  Build,
  Stage,
  Deploy,
  Test,
}

impl Stage {
  /// The main-line stages in execution order.
  pub const LIFECYCLE: [Stage; 4] = [Stage::Pull, Stage::Build, Stage::Stage, Stage::Deploy];

  pub fn as_str(self) -> &'static str {
    match self {
      Stage::Pull => "pull",
      Stage::Build => "build",
      Stage::Stage => "stage",
      Stage::Deploy => "deploy",
      Stage::Test => "test",
    }
  }

  /// The stage that must have completed before this one may run.
  pub fn previous(self) -> Option<Stage> {
    match self {
      Stage::Pull => None,
      Stage::Build => Some(Stage::Pull),
      Stage::Stage => Some(Stage::Build),
      Stage::Deploy => Some(Stage::Stage),
      Stage::Test => Some(Stage::Deploy),
    }
  }

  /// Stages whose results depend on this one, in order.
  pub fn downstream(self) -> &'static [Stage] {
    match self {
      Stage::Pull => &[Stage::Build, Stage::Stage, Stage::Deploy, Stage::Test],
      Stage::Build => &[Stage::Stage, Stage::Deploy, Stage::Test],
      Stage::Stage => &[Stage::Deploy, Stage::Test],
      Stage::Deploy => &[Stage::Test],
      Stage::Test => &[],
    }
  }

  /// Main-line stages up to and including `self`. `Test` maps to the full line.
  pub fn through(self) -> &'static [Stage] {
    match self {
      Stage::Pull => &Stage::LIFECYCLE[..1],
      Stage::Build => &Stage::LIFECYCLE[..2],
      Stage::Stage => &Stage::LIFECYCLE[..3],
      Stage::Deploy | Stage::Test => &Stage::LIFECYCLE,
    }
  }
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Stage {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "pull" => Ok(Stage::Pull),
      "build" => Ok(Stage::Build),
      "stage" => Ok(Stage::Stage),
      "deploy" => Ok(Stage::Deploy),
      "test" => Ok(Stage::Test),
      other => Err(format!("unknown stage '{}'", other)),
    }
  }
}

/// How far a unit has progressed, derived from its stage markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleState {
  Uninitialized,
  Pulled,
  Built,
  Staged,
  Deployed,
  Tested,
}

impl LifecycleState {
  /// State reached once `stage` completes.
  pub fn after(stage: Stage) -> Self {
    match stage {
      Stage::Pull => LifecycleState::Pulled,
      Stage::Build => LifecycleState::Built,
      Stage::Stage => LifecycleState::Staged,
      Stage::Deploy => LifecycleState::Deployed,
      Stage::Test => LifecycleState::Tested,
    }
  }
}

/// Working directories of a single unit.
///
/// Everything except `deploy` lives under `root`, which the unit owns
/// exclusively. `deploy` is the deploy root shared by every unit, and `work`
/// is the work directory holding both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitDirs {
  pub work: PathBuf,
  pub root: PathBuf,
  pub pull: PathBuf,
  pub build: PathBuf,
  pub stage: PathBuf,
  pub state: PathBuf,
  pub deploy: PathBuf,
}

impl UnitDirs {
  /// Layout for unit `name` inside `work_dir`:
  ///
  /// ```text
  /// <work_dir>/
  /// ├── deploy/            # shared deploy root
  /// └── units/<name>/
  ///     ├── src/           # pull
  ///     ├── build/
  ///     ├── stage/
  ///     └── state/         # stage markers
  /// ```
  pub fn new(work_dir: &Path, name: &str) -> Self {
    let root = work_dir.join("units").join(name);
    Self {
      pull: root.join("src"),
      build: root.join("build"),
      stage: root.join("stage"),
      state: root.join("state"),
      deploy: work_dir.join("deploy"),
      work: work_dir.to_path_buf(),
      root,
    }
  }

  /// A backend-private directory under the unit root (e.g. a provisioned runtime).
  pub fn runtime_dir(&self, name: &str) -> PathBuf {
    self.root.join(name)
  }
}

/// A named, independently lifecycled component.
#[derive(Debug, Clone)]
pub struct BuildUnit {
  pub name: String,
  /// Tag of the backend that drives this unit.
  pub backend: String,
  /// The backend's merged schema, used to compute dirty-sets.
  pub schema: Arc<Schema>,
  pub config: ResolvedConfig,
  pub dirs: UnitDirs,
}

/// Unit names become directory names, so keep them to a portable alphabet.
pub fn is_valid_unit_name(name: &str) -> bool {
  !name.is_empty()
    && !name.starts_with('.')
    && name
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
