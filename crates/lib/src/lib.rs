//! partkit-lib: a pluggable build-step orchestration engine.
//!
//! partkit drives third-party build tools through one lifecycle:
//! pull sources, build, stage the results, deploy an allow-listed subset
//! and optionally test. The main pieces:
//!
//! - [`schema`]: option declarations per backend, merged onto a base schema
//! - [`registry`]: backend registration and unit validation
//! - [`lifecycle`]: the [`Backend`](lifecycle::Backend) contract and its defaults
//! - [`backends`]: the built-in `autotools`, `gulp` and `npm` backends
//! - [`toolchain`]: download-once cache of private toolchains
//! - [`dirty`]: stage markers deciding what has to re-run
//! - [`orchestrator`]: runs units concurrently and reports per unit

pub mod backends;
pub mod consts;
pub mod dirty;
pub mod env;
pub mod lifecycle;
pub mod lock;
pub mod manifest;
pub mod orchestrator;
pub mod platform;
pub mod process;
pub mod registry;
pub mod schema;
pub mod source;
pub mod toolchain;
pub mod unit;
pub mod util;
