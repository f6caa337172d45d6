//! Manifest types.
//!
//! A manifest declares the build units of a project. Each unit names the
//! backend that drives it; every other key is an option validated against
//! that backend's schema.
//!
//! # Example
//!
//! ```yaml
//! units:
//!   readline:
//!     backend: autotools
//!     source: ./vendor/readline
//!     configflags: --disable-static
//!   webui:
//!     backend: gulp
//!     source: git+https://example.org/webui.git
//!     source-ref: v2.1.0
//!     gulp-tasks: [build]
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The set of units a project declares.
///
/// Uses [`BTreeMap`] so units are always visited in name order.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
  #[serde(default)]
  pub units: BTreeMap<String, UnitDecl>,
}

/// One unit as written in the manifest, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitDecl {
  pub backend: String,
  /// Backend options, keyed by option name.
  #[serde(flatten)]
  pub options: BTreeMap<String, Value>,
}
