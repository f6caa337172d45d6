//! `autotools` backend: `configure` + `make`.

use std::ffi::OsString;

use tracing::info;

use crate::env::EnvOverlay;
use crate::lifecycle::{Backend, StageContext, StageError};
use crate::schema::{OptionSpec, Schema, SchemaError};
use crate::unit::Stage;

#[derive(Debug, Default, Clone, Copy)]
pub struct Autotools;

impl Backend for Autotools {
  fn name(&self) -> &str {
    "autotools"
  }

  fn schema(&self) -> Result<Schema, SchemaError> {
    Schema::new([OptionSpec::string("configflags")
      .with_default("")
      .dirties(Stage::Build)])
  }

  fn build(&self, ctx: &StageContext<'_>) -> Result<(), StageError> {
    let build_dir = &ctx.dirs().build;
    let configure = build_dir.join("configure");

    if !configure.is_file() {
      let autogen = build_dir.join("autogen.sh");
      if !autogen.is_file() {
        return Err(StageError::Stage {
          unit: ctx.name().to_string(),
          message: "sources contain neither configure nor autogen.sh".to_string(),
        });
      }
      info!(unit = %ctx.name(), "generating configure script");
      ctx.run(&ctx.command(&autogen).env(EnvOverlay::new().set("NOCONFIGURE", "1")))?;
    }

    let flags = ctx.config().get_str("configflags").unwrap_or_default();
    ctx.run(&ctx.command(&configure).arg("--prefix=").args(flags.split_whitespace()))?;
    ctx.run(&ctx.command("make").arg("all"))?;
    Ok(())
  }

  fn stage(&self, ctx: &StageContext<'_>) -> Result<(), StageError> {
    let mut destdir = OsString::from("DESTDIR=");
    destdir.push(&ctx.dirs().stage);
    ctx.run(&ctx.command("make").arg("install").arg(destdir))?;
    Ok(())
  }

  fn test(&self, ctx: &StageContext<'_>) -> Result<(), StageError> {
    ctx.run(&ctx.command("make").arg("check"))?;
    Ok(())
  }
}
