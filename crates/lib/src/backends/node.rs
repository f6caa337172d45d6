//! Node.js runtime shared by the `gulp` and `npm` backends.
//!
//! The runtime is fetched into the toolchain cache during pull and copied
//! into `<unit>/npm` during build. Its `bin` directory is put on the PATH of
//! the unit's own invocations only.

use std::fs;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::env::EnvOverlay;
use crate::lifecycle::{StageContext, StageError};
use crate::platform::Platform;
use crate::schema::{OptionSpec, ResolvedConfig};
use crate::toolchain::{ProvisionError, ToolchainKey, ToolchainSpec};
use crate::unit::Stage;
use crate::util::fs::remove_path;

pub const NODE_KIND: &str = "node";
pub const DEFAULT_NODE_ENGINE: &str = "20.11.1";
/// Per-unit directory the runtime is provisioned into.
pub const RUNTIME_DIR: &str = "npm";
/// File in the runtime directory naming the Node.js version provisioned there.
const RUNTIME_STAMP: &str = ".node-engine";

pub fn node_engine_option() -> OptionSpec {
  OptionSpec::string("node-engine")
    .with_default(DEFAULT_NODE_ENGINE)
    .dirties(Stage::Pull)
}

/// Release tarball of Node.js `version` for `platform`.
pub fn node_spec(version: &str, platform: Platform) -> Result<ToolchainSpec, ProvisionError> {
  let unsupported = |reason: String| ProvisionError::UnsupportedPlatform {
    kind: NODE_KIND.to_string(),
    reason,
  };

  let suffix = platform
    .tarball_suffix()
    .ok_or_else(|| unsupported(format!("no tarball release for {}", platform)))?;

  Ok(ToolchainSpec::new(
    ToolchainKey::new(NODE_KIND, version),
    format!("https://nodejs.org/dist/v{version}/node-v{version}-{suffix}.tar.gz"),
  ))
}

/// Node toolchain for a unit's configuration on the running platform.
pub fn node_spec_for(config: &ResolvedConfig) -> Result<ToolchainSpec, ProvisionError> {
  let version = config.get_str("node-engine").unwrap_or(DEFAULT_NODE_ENGINE);
  let platform = Platform::current().ok_or_else(|| ProvisionError::UnsupportedPlatform {
    kind: NODE_KIND.to_string(),
    reason: format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS),
  })?;
  node_spec(version, platform)
}

pub fn runtime_dir(ctx: &StageContext<'_>) -> PathBuf {
  ctx.dirs().runtime_dir(RUNTIME_DIR)
}

pub fn runtime_bin(ctx: &StageContext<'_>, tool: &str) -> PathBuf {
  runtime_dir(ctx).join("bin").join(tool)
}

/// Makes sure the unit's Node.js release is in the toolchain cache.
pub fn ensure_node(ctx: &StageContext<'_>) -> Result<(), StageError> {
  let spec = node_spec_for(ctx.config()).map_err(|e| ctx.provision_error(e))?;
  ctx
    .toolchains
    .ensure_downloaded(&spec)
    .map_err(|e| ctx.provision_error(e))?;
  debug!(unit = %ctx.name(), toolchain = %spec.key, "node toolchain ready");
  Ok(())
}

/// Copies Node.js into the unit's runtime directory and returns the
/// environment that puts it first on PATH.
///
/// Globally installed packages survive re-provisioning the same version. A
/// runtime holding a different version is wiped first.
pub fn provision_node(ctx: &StageContext<'_>) -> Result<EnvOverlay, StageError> {
  let spec = node_spec_for(ctx.config()).map_err(|e| ctx.provision_error(e))?;
  let runtime = runtime_dir(ctx);
  let stamp = runtime.join(RUNTIME_STAMP);

  let provisioned = fs::read_to_string(&stamp).ok();
  let replace = provisioned.as_deref().map(str::trim) != Some(spec.key.version.as_str());
  if replace && runtime.exists() {
    info!(
      unit = %ctx.name(),
      from = provisioned.as_deref().map(str::trim).unwrap_or("unknown"),
      to = %spec.key.version,
      "node engine changed, replacing runtime"
    );
  }

  ctx
    .toolchains
    .provision(&spec, &runtime, replace, true)
    .map_err(|e| ctx.provision_error(e))?;
  fs::write(&stamp, &spec.key.version).map_err(|e| ctx.io_error(&stamp, e))?;
  Ok(node_env(ctx))
}

/// PATH overlay for an already provisioned runtime.
pub fn node_env(ctx: &StageContext<'_>) -> EnvOverlay {
  EnvOverlay::new().prepend_path(runtime_dir(ctx).join("bin"))
}

/// Like [`provision_node`], but reuses a runtime the build already provisioned.
pub fn runtime_env(ctx: &StageContext<'_>) -> Result<EnvOverlay, StageError> {
  if runtime_bin(ctx, "node").is_file() {
    return Ok(node_env(ctx));
  }
  provision_node(ctx)
}

/// Hands the ambient `http_proxy` to npm, which does not read it on its own.
pub fn forward_proxy(ctx: &StageContext<'_>, env: &EnvOverlay) -> Result<(), StageError> {
  let ambient = ctx.runner.ambient();
  let Some(proxy) = ambient.get_str("http_proxy").or_else(|| ambient.get_str("HTTP_PROXY")) else {
    return Ok(());
  };

  info!(unit = %ctx.name(), "forwarding proxy settings to npm");
  let invocation = ctx
    .command(runtime_bin(ctx, "npm"))
    .args(["config", "-g", "set", "https-proxy", proxy])
    .env(env.clone());
  ctx.run(&invocation)?;
  Ok(())
}

/// Removes the unit's provisioned runtime.
pub fn clean_runtime(ctx: &StageContext<'_>) -> Result<(), StageError> {
  let dir = runtime_dir(ctx);
  remove_path(&dir).map_err(|e| ctx.io_error(&dir, e))
}
