//! Built-in backends.

pub mod autotools;
pub mod gulp;
pub mod node;
pub mod npm;

use std::sync::Arc;

pub use autotools::Autotools;
pub use gulp::Gulp;
pub use npm::Npm;

use crate::lifecycle::Backend;

/// Every backend shipped with partkit.
pub fn builtin() -> Vec<Arc<dyn Backend>> {
  vec![Arc::new(Autotools), Arc::new(Gulp), Arc::new(Npm)]
}
