//! Backend registration and unit configuration validation.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::backends;
use crate::lifecycle::Backend;
use crate::schema::{ConfigProblem, Schema, SchemaError, merge_schema};
use crate::unit::{BuildUnit, UnitDirs, is_valid_unit_name};

/// A unit's declaration could not be turned into a [`BuildUnit`].
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("unit '{unit}' has an invalid configuration:{}", ProblemList(.problems))]
  Invalid { unit: String, problems: Vec<ConfigProblem> },

  #[error("unit '{unit}' uses unknown backend '{backend}' (known: {})", .known.join(", "))]
  UnknownBackend {
    unit: String,
    backend: String,
    known: Vec<String>,
  },

  #[error("invalid unit name '{0}': use letters, digits, '-', '_' and '.'")]
  InvalidName(String),
}

struct ProblemList<'a>(&'a [ConfigProblem]);

impl fmt::Display for ProblemList<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for problem in self.0 {
      write!(f, "\n  - {}", problem)?;
    }
    Ok(())
  }
}

struct Registered {
  backend: Arc<dyn Backend>,
  schema: Arc<Schema>,
}

/// Backends by name, each with its schema merged onto the base schema.
pub struct BackendRegistry {
  base: Schema,
  backends: BTreeMap<String, Registered>,
}

impl Default for BackendRegistry {
  fn default() -> Self {
    Self::new()
  }
}

impl BackendRegistry {
  pub fn new() -> Self {
    Self {
      base: Schema::base(),
      backends: BTreeMap::new(),
    }
  }

  /// A registry holding every built-in backend.
  pub fn with_builtin() -> Result<Self, SchemaError> {
    let mut registry = Self::new();
    for backend in backends::builtin() {
      registry.register(backend)?;
    }
    Ok(registry)
  }

  /// Adds a backend. Schema conflicts surface here, never during a build.
  pub fn register(&mut self, backend: Arc<dyn Backend>) -> Result<(), SchemaError> {
    let name = backend.name().to_string();
    if self.backends.contains_key(&name) {
      return Err(SchemaError::DuplicateBackend(name));
    }

    let schema = merge_schema(&self.base, &backend.schema()?)?;
    debug!(backend = %name, options = schema.len(), "registered backend");
    self.backends.insert(
      name,
      Registered {
        backend,
        schema: Arc::new(schema),
      },
    );
    Ok(())
  }

  pub fn get(&self, name: &str) -> Option<&Arc<dyn Backend>> {
    self.backends.get(name).map(|r| &r.backend)
  }

  pub fn schema(&self, name: &str) -> Option<&Arc<Schema>> {
    self.backends.get(name).map(|r| &r.schema)
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.backends.keys().map(String::as_str)
  }

  /// Validates a unit declaration and lays out its directories under `work_dir`.
  pub fn create_unit(
    &self,
    name: &str,
    backend: &str,
    options: &BTreeMap<String, Value>,
    work_dir: &Path,
  ) -> Result<BuildUnit, ConfigError> {
    if !is_valid_unit_name(name) {
      return Err(ConfigError::InvalidName(name.to_string()));
    }
    let registered = self.backends.get(backend).ok_or_else(|| ConfigError::UnknownBackend {
      unit: name.to_string(),
      backend: backend.to_string(),
      known: self.names().map(str::to_string).collect(),
    })?;

    let config = registered.schema.resolve(options).map_err(|problems| ConfigError::Invalid {
      unit: name.to_string(),
      problems,
    })?;

    Ok(BuildUnit {
      name: name.to_string(),
      backend: backend.to_string(),
      schema: registered.schema.clone(),
      config,
      dirs: UnitDirs::new(work_dir, name),
    })
  }
}
