//! Validation of raw unit configuration against a merged schema.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;
use serde_json::Value;

use super::{OptionSpec, OptionType, Schema};
use crate::util::fs::is_entry_name;

/// A single reason a configuration was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigProblem {
  /// A required option is absent and has no default.
  Missing(String),
  /// The option is not declared by the backend's schema.
  Unknown(String),
  /// The value has the wrong type.
  TypeMismatch { option: String, expected: String },
  /// A list declared unique repeats an item.
  DuplicateItem { option: String, item: String },
  /// A list is shorter than its declared minimum.
  TooFewItems { option: String, min: usize, actual: usize },
  /// A list of entry names holds a path rather than a single name.
  InvalidEntry { option: String, item: String },
}

impl fmt::Display for ConfigProblem {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ConfigProblem::Missing(option) => write!(f, "required option '{}' is missing", option),
      ConfigProblem::Unknown(option) => write!(f, "unknown option '{}'", option),
      ConfigProblem::TypeMismatch { option, expected } => {
        write!(f, "option '{}' must be a {}", option, expected)
      }
      ConfigProblem::DuplicateItem { option, item } => {
        write!(f, "option '{}' lists '{}' more than once", option, item)
      }
      ConfigProblem::TooFewItems { option, min, actual } => write!(
        f,
        "option '{}' needs at least {} item(s), got {}",
        option, min, actual
      ),
      ConfigProblem::InvalidEntry { option, item } => {
        write!(f, "option '{}' item '{}' must be a single top-level name", option, item)
      }
    }
  }
}

/// A unit's configuration after defaults were applied and every value was
/// checked against the schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResolvedConfig {
  values: BTreeMap<String, Value>,
}

impl ResolvedConfig {
  pub fn get(&self, name: &str) -> Option<&Value> {
    self.values.get(name)
  }

  pub fn get_str(&self, name: &str) -> Option<&str> {
    self.values.get(name).and_then(Value::as_str)
  }

  pub fn get_bool(&self, name: &str) -> Option<bool> {
    self.values.get(name).and_then(Value::as_bool)
  }

  /// List option as owned strings. Absent options yield an empty list.
  pub fn get_string_list(&self, name: &str) -> Vec<String> {
    self
      .values
      .get(name)
      .and_then(Value::as_array)
      .map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
      .unwrap_or_default()
  }

  /// Snapshot of the named options; absent options are recorded as `null`.
  pub fn snapshot<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> BTreeMap<String, Value> {
    names
      .into_iter()
      .map(|name| (name.to_string(), self.values.get(name).cloned().unwrap_or(Value::Null)))
      .collect()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
    self.values.iter()
  }
}

/// Check that `value` satisfies `spec`'s type and list constraints.
pub(super) fn check_value(spec: &OptionSpec, value: &Value) -> Result<(), ConfigProblem> {
  let mismatch = || ConfigProblem::TypeMismatch {
    option: spec.name.clone(),
    expected: spec.ty.to_string(),
  };

  match &spec.ty {
    OptionType::String => value.as_str().map(|_| ()).ok_or_else(mismatch),
    OptionType::Boolean => value.as_bool().map(|_| ()).ok_or_else(mismatch),
    OptionType::Integer => value.as_i64().map(|_| ()).ok_or_else(mismatch),
    OptionType::StringList {
      unique_items,
      min_items,
      entry_names,
    } => {
      let items = value.as_array().ok_or_else(mismatch)?;
      let mut seen = BTreeSet::new();
      for item in items {
        let item = item.as_str().ok_or_else(mismatch)?;
        if *entry_names && !is_entry_name(item) {
          return Err(ConfigProblem::InvalidEntry {
            option: spec.name.clone(),
            item: item.to_string(),
          });
        }
        if *unique_items && !seen.insert(item) {
          return Err(ConfigProblem::DuplicateItem {
            option: spec.name.clone(),
            item: item.to_string(),
          });
        }
      }
      if items.len() < *min_items {
        return Err(ConfigProblem::TooFewItems {
          option: spec.name.clone(),
          min: *min_items,
          actual: items.len(),
        });
      }
      Ok(())
    }
  }
}

impl Schema {
  /// Apply defaults and validate `raw` against this schema.
  ///
  /// Every problem is collected rather than stopping at the first one.
  pub fn resolve(&self, raw: &BTreeMap<String, Value>) -> Result<ResolvedConfig, Vec<ConfigProblem>> {
    let mut problems = Vec::new();
    let mut values = BTreeMap::new();

    for name in raw.keys() {
      if !self.contains(name) {
        problems.push(ConfigProblem::Unknown(name.clone()));
      }
    }

    for spec in self.options() {
      match raw.get(&spec.name).or(spec.default.as_ref()) {
        Some(value) => match check_value(spec, value) {
          Ok(()) => {
            values.insert(spec.name.clone(), value.clone());
          }
          Err(problem) => problems.push(problem),
        },
        None if spec.required => problems.push(ConfigProblem::Missing(spec.name.clone())),
        None => {}
      }
    }

    if problems.is_empty() {
      Ok(ResolvedConfig { values })
    } else {
      Err(problems)
    }
  }
}
