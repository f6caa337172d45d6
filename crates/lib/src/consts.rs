//! Crate-wide constants.

/// Application name used for cache and data directories.
pub const APP_NAME: &str = "partkit";

/// Environment variable overriding the per-project work directory.
pub const WORK_DIR_ENV: &str = "PARTKIT_WORK_DIR";

/// Environment variable overriding the shared toolchain cache directory.
pub const CACHE_DIR_ENV: &str = "PARTKIT_CACHE_DIR";

/// Default work directory name, relative to the manifest's directory.
pub const DEFAULT_WORK_DIR: &str = "parts";

/// Lock file guarding a work directory against concurrent runs.
pub const WORK_LOCK_FILENAME: &str = ".lock";

/// Manifest looked up in the current directory when none is given.
pub const MANIFEST_FILENAME: &str = "partkit.yaml";
