//! Backend configuration schemas.
//!
//! A [`Schema`] is an immutable map from option name to [`OptionSpec`]. Every
//! backend contributes an extension schema that is merged onto the shared
//! [`Schema::base`] at registration time with [`merge_schema`]. Each option
//! may belong to the dirty-set of one lifecycle stage: when its resolved value
//! changes between runs, that stage (and everything after it) re-runs.
//!
//! Validation of a unit's raw configuration against a merged schema lives in
//! [`validate`].

mod validate;

pub use validate::{ConfigProblem, ResolvedConfig};

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::unit::Stage;

/// Errors raised while building or merging schemas.
///
/// These surface at backend registration time, never during a build.
#[derive(Debug, Error)]
pub enum SchemaError {
  /// Two schemas being merged both declare the same option.
  #[error("option '{option}' is declared more than once")]
  Conflict { option: String },

  /// A backend with this name is already registered.
  #[error("backend '{0}' is already registered")]
  DuplicateBackend(String),

  /// An option's default value does not satisfy its own type.
  #[error("default for option '{option}' is invalid: {reason}")]
  InvalidDefault { option: String, reason: String },
}

/// The value type accepted by an option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OptionType {
  String,
  Boolean,
  Integer,
  StringList {
    unique_items: bool,
    min_items: usize,
    /// Every item must be a single top-level path name.
    entry_names: bool,
  },
}

impl fmt::Display for OptionType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      OptionType::String => write!(f, "string"),
      OptionType::Boolean => write!(f, "boolean"),
      OptionType::Integer => write!(f, "integer"),
      OptionType::StringList { .. } => write!(f, "list of strings"),
    }
  }
}

/// Declaration of a single configuration option.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionSpec {
  pub name: String,
  #[serde(flatten)]
  pub ty: OptionType,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub default: Option<Value>,
  pub required: bool,
  /// Stage whose dirty-set this option belongs to, if any.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub dirties: Option<Stage>,
}

impl OptionSpec {
  pub fn new(name: &str, ty: OptionType) -> Self {
    Self {
      name: name.to_string(),
      ty,
      default: None,
      required: false,
      dirties: None,
    }
  }

  pub fn string(name: &str) -> Self {
    Self::new(name, OptionType::String)
  }

  pub fn boolean(name: &str) -> Self {
    Self::new(name, OptionType::Boolean)
  }

  pub fn integer(name: &str) -> Self {
    Self::new(name, OptionType::Integer)
  }

  pub fn string_list(name: &str) -> Self {
    Self::new(
      name,
      OptionType::StringList {
        unique_items: false,
        min_items: 0,
        entry_names: false,
      },
    )
  }

  pub fn with_default(mut self, value: impl Into<Value>) -> Self {
    self.default = Some(value.into());
    self
  }

  pub fn required(mut self) -> Self {
    self.required = true;
    self
  }

  /// Put this option in `stage`'s dirty-set.
  pub fn dirties(mut self, stage: Stage) -> Self {
    self.dirties = Some(stage);
    self
  }

  /// Reject lists containing the same string twice. No-op for scalar types.
  pub fn unique_items(mut self) -> Self {
    if let OptionType::StringList { unique_items, .. } = &mut self.ty {
      *unique_items = true;
    }
    self
  }

  /// Reject lists shorter than `min`. No-op for scalar types.
  pub fn min_items(mut self, min: usize) -> Self {
    if let OptionType::StringList { min_items, .. } = &mut self.ty {
      *min_items = min;
    }
    self
  }

  /// Reject items that are not a single plain path name. No-op for scalar types.
  pub fn entry_names(mut self) -> Self {
    if let OptionType::StringList { entry_names, .. } = &mut self.ty {
      *entry_names = true;
    }
    self
  }
}

/// An immutable set of option declarations with unique names.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Schema {
  options: BTreeMap<String, OptionSpec>,
}

impl Schema {
  /// Build a schema from option declarations.
  ///
  /// Fails if two declarations share a name or a default value does not
  /// satisfy its declared type.
  pub fn new(options: impl IntoIterator<Item = OptionSpec>) -> Result<Self, SchemaError> {
    let mut map = BTreeMap::new();
    for spec in options {
      if let Some(default) = &spec.default
        && let Err(problem) = validate::check_value(&spec, default)
      {
        return Err(SchemaError::InvalidDefault {
          option: spec.name.clone(),
          reason: problem.to_string(),
        });
      }
      if map.contains_key(&spec.name) {
        return Err(SchemaError::Conflict { option: spec.name });
      }
      map.insert(spec.name.clone(), spec);
    }
    Ok(Self { options: map })
  }

  /// Options every backend understands.
  ///
  /// - `source`: where to pull sources from (pull-dirty)
  /// - `source-ref`: branch or tag to check out for git sources (pull-dirty)
  /// - `deploy`: override for the backend's deploy allow-list (deploy-dirty)
  pub fn base() -> Self {
    let options = [
      OptionSpec::string("source").dirties(Stage::Pull),
      OptionSpec::string("source-ref").dirties(Stage::Pull),
      OptionSpec::string_list("deploy")
        .unique_items()
        .entry_names()
        .min_items(1)
        .dirties(Stage::Deploy),
    ];
    Self {
      options: options.into_iter().map(|o| (o.name.clone(), o)).collect(),
    }
  }

  pub fn get(&self, name: &str) -> Option<&OptionSpec> {
    self.options.get(name)
  }

  pub fn contains(&self, name: &str) -> bool {
    self.options.contains_key(name)
  }

  pub fn options(&self) -> impl Iterator<Item = &OptionSpec> {
    self.options.values()
  }

  pub fn len(&self) -> usize {
    self.options.len()
  }

  pub fn is_empty(&self) -> bool {
    self.options.is_empty()
  }

  /// Names of the options in `stage`'s dirty-set, sorted.
  pub fn dirty_set(&self, stage: Stage) -> Vec<&str> {
    self
      .options
      .values()
      .filter(|o| o.dirties == Some(stage))
      .map(|o| o.name.as_str())
      .collect()
  }
}

/// Merge an extension onto a base schema, returning a new schema.
///
/// Neither input is modified. Any option name present in both is a
/// [`SchemaError::Conflict`].
pub fn merge_schema(base: &Schema, extension: &Schema) -> Result<Schema, SchemaError> {
  let mut options = base.options.clone();
  for (name, spec) in &extension.options {
    if options.contains_key(name) {
      return Err(SchemaError::Conflict { option: name.clone() });
    }
    options.insert(name.clone(), spec.clone());
  }
  Ok(Schema { options })
}
