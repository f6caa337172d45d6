//! Process environments for build steps.
//!
//! The engine captures the ambient environment once and never mutates it.
//! Each step gets its own [`EnvOverlay`]: an ordered list of edits resolved
//! against the ambient snapshot into the complete environment of the child.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;

#[cfg(windows)]
const PATH_VAR: &str = "Path";
#[cfg(not(windows))]
const PATH_VAR: &str = "PATH";

/// Snapshot of the environment the engine was started with.
#[derive(Debug, Clone, Default)]
pub struct AmbientEnv {
  vars: BTreeMap<OsString, OsString>,
}

impl AmbientEnv {
  pub fn capture() -> Self {
    Self {
      vars: std::env::vars_os().collect(),
    }
  }

  pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
  where
    K: Into<OsString>,
    V: Into<OsString>,
  {
    Self {
      vars: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
    }
  }

  pub fn get(&self, key: &str) -> Option<&OsString> {
    self.vars.get(&OsString::from(key))
  }

  pub fn get_str(&self, key: &str) -> Option<&str> {
    self.get(key).and_then(|v| v.to_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum EnvOp {
  Set(OsString, OsString),
  Unset(OsString),
  PrependPath(PathBuf),
}

/// Per-step environment edits, applied in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverlay {
  ops: Vec<EnvOp>,
}

impl EnvOverlay {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
    self.ops.push(EnvOp::Set(key.into(), value.into()));
    self
  }

  pub fn unset(mut self, key: impl Into<OsString>) -> Self {
    self.ops.push(EnvOp::Unset(key.into()));
    self
  }

  /// Puts `dir` at the front of `PATH`.
  pub fn prepend_path(mut self, dir: impl Into<PathBuf>) -> Self {
    self.ops.push(EnvOp::PrependPath(dir.into()));
    self
  }

  /// Appends another overlay's edits after this one's.
  pub fn extend(mut self, other: EnvOverlay) -> Self {
    self.ops.extend(other.ops);
    self
  }

  pub fn is_empty(&self) -> bool {
    self.ops.is_empty()
  }

  /// The complete child environment: ambient variables with the edits applied.
  pub fn resolve(&self, ambient: &AmbientEnv) -> BTreeMap<OsString, OsString> {
    let mut vars = ambient.vars.clone();
    for op in &self.ops {
      match op {
        EnvOp::Set(key, value) => {
          vars.insert(key.clone(), value.clone());
        }
        EnvOp::Unset(key) => {
          vars.remove(key);
        }
        EnvOp::PrependPath(dir) => {
          let key = OsString::from(PATH_VAR);
          let mut entries = vec![dir.clone()];
          if let Some(existing) = vars.get(&key) {
            entries.extend(std::env::split_paths(existing));
          }
          // Paths containing the separator cannot be joined; keep the old value then.
          if let Ok(joined) = std::env::join_paths(entries) {
            vars.insert(key, joined);
          }
        }
      }
    }
    vars
  }
}
