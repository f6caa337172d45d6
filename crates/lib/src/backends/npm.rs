//! `npm` backend: installs npm packages globally into the stage root.

use std::ffi::OsString;

use tracing::info;

use super::node;
use crate::lifecycle::{Backend, StageContext, StageError, default_pull};
use crate::schema::{OptionSpec, ResolvedConfig, Schema, SchemaError};
use crate::toolchain::{ProvisionError, ToolchainSpec};
use crate::unit::Stage;

#[derive(Debug, Default, Clone, Copy)]
pub struct Npm;

impl Backend for Npm {
  fn name(&self) -> &str {
    "npm"
  }

  fn schema(&self) -> Result<Schema, SchemaError> {
    Schema::new([
      node::node_engine_option(),
      OptionSpec::string_list("node-packages")
        .unique_items()
        .with_default(Vec::<String>::new())
        .dirties(Stage::Build),
    ])
  }

  fn pull(&self, ctx: &StageContext<'_>) -> Result<(), StageError> {
    default_pull(ctx)?;
    node::ensure_node(ctx)
  }

  fn build(&self, ctx: &StageContext<'_>) -> Result<(), StageError> {
    let env = node::provision_node(ctx)?;
    node::forward_proxy(ctx, &env)?;

    let packages = ctx.config().get_string_list("node-packages");
    if packages.is_empty() {
      info!(unit = %ctx.name(), "no node-packages configured");
      return Ok(());
    }

    let mut prefix = OsString::from("--prefix=");
    prefix.push(&ctx.dirs().stage);
    ctx.run(
      &ctx
        .command(node::runtime_bin(ctx, "npm"))
        .args(["install", "-g"])
        .arg(prefix)
        .args(packages)
        .env(env),
    )?;
    Ok(())
  }

  fn deploy_entries(&self) -> &'static [&'static str] {
    &["bin", "lib"]
  }

  fn toolchains(&self, config: &ResolvedConfig) -> Result<Vec<ToolchainSpec>, ProvisionError> {
    Ok(vec![node::node_spec_for(config)?])
  }

  fn clean_pull(&self, ctx: &StageContext<'_>) -> Result<(), StageError> {
    node::clean_runtime(ctx)
  }
}
