//! `gulp` backend: Node.js projects built with gulp tasks.

use tracing::info;

use super::node;
use crate::lifecycle::{Backend, StageContext, StageError, default_pull};
use crate::schema::{OptionSpec, ResolvedConfig, Schema, SchemaError};
use crate::toolchain::{ProvisionError, ToolchainSpec};
use crate::unit::Stage;
use crate::util::fs::{copy_tree, remove_path};

#[derive(Debug, Default, Clone, Copy)]
pub struct Gulp;

impl Backend for Gulp {
  fn name(&self) -> &str {
    "gulp"
  }

  fn schema(&self) -> Result<Schema, SchemaError> {
    Schema::new([
      OptionSpec::string_list("gulp-tasks")
        .unique_items()
        .min_items(1)
        .required()
        .dirties(Stage::Build),
      node::node_engine_option(),
    ])
  }

  fn pull(&self, ctx: &StageContext<'_>) -> Result<(), StageError> {
    default_pull(ctx)?;
    node::ensure_node(ctx)
  }

  fn build(&self, ctx: &StageContext<'_>) -> Result<(), StageError> {
    let env = node::provision_node(ctx)?;
    node::forward_proxy(ctx, &env)?;

    let npm = node::runtime_bin(ctx, "npm");
    ctx.run(&ctx.command(&npm).args(["install", "-g", "gulp-cli"]).env(env.clone()))?;

    if ctx.dirs().build.join("package.json").is_file() {
      ctx.run(&ctx.command(&npm).args(["install", "--only=development"]).env(env.clone()))?;
    }

    let tasks = ctx.config().get_string_list("gulp-tasks");
    info!(unit = %ctx.name(), tasks = ?tasks, "running gulp");
    ctx.run(&ctx.command(node::runtime_bin(ctx, "gulp")).args(tasks).env(env))?;
    Ok(())
  }

  fn stage(&self, ctx: &StageContext<'_>) -> Result<(), StageError> {
    let dest = ctx.dirs().stage.join("lib").join(ctx.name());
    remove_path(&dest).map_err(|e| ctx.io_error(&dest, e))?;
    let files = copy_tree(&ctx.dirs().build, &dest, &["node_modules"]).map_err(|e| ctx.io_error(&dest, e))?;
    info!(unit = %ctx.name(), files, "staged gulp output");
    Ok(())
  }

  fn test(&self, ctx: &StageContext<'_>) -> Result<(), StageError> {
    if !ctx.dirs().build.join("package.json").is_file() {
      info!(unit = %ctx.name(), "no package.json, nothing to test");
      return Ok(());
    }
    let env = node::runtime_env(ctx)?;
    ctx.run(&ctx.command(node::runtime_bin(ctx, "npm")).arg("test").env(env))?;
    Ok(())
  }

  fn deploy_entries(&self) -> &'static [&'static str] {
    &["lib"]
  }

  fn toolchains(&self, config: &ResolvedConfig) -> Result<Vec<ToolchainSpec>, ProvisionError> {
    Ok(vec![node::node_spec_for(config)?])
  }

  fn clean_pull(&self, ctx: &StageContext<'_>) -> Result<(), StageError> {
    node::clean_runtime(ctx)
  }
}
