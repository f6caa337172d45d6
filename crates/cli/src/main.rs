mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use partkit_lib::consts::MANIFEST_FILENAME;
use partkit_lib::orchestrator::Command;
use partkit_lib::process::CancelToken;
use partkit_lib::unit::Stage;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::cmd::RunOptions;
use crate::output::{OutputFormat, print_error};

/// Drive build units through pull, build, stage and deploy
#[derive(Parser)]
#[command(name = "partkit")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Path to the project manifest
  #[arg(short = 'f', long, global = true, default_value = MANIFEST_FILENAME)]
  manifest: PathBuf,

  /// Work directory (default: `parts` next to the manifest)
  #[arg(long, global = true)]
  work_dir: Option<PathBuf>,

  /// Maximum number of units processed at once
  #[arg(short, long, global = true)]
  jobs: Option<usize>,

  /// Report format
  #[arg(short, long, global = true, value_enum, default_value = "text")]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Args)]
struct UnitArgs {
  /// Units to operate on (default: every unit in the manifest)
  units: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
  /// Fetch sources and toolchains
  Pull(UnitArgs),
  /// Pull if needed, then build
  Build(UnitArgs),
  /// Build if needed, then install into the stage directory
  Stage(UnitArgs),
  /// Stage if needed, then copy allowed entries to the deploy root
  Deploy(UnitArgs),
  /// Deploy if needed, then run the unit's tests
  Test(UnitArgs),
  /// Remove unit directories and stage markers
  Clean(UnitArgs),
  /// Remove pulled sources and cached toolchains
  CleanPull(UnitArgs),
}

impl Commands {
  fn into_parts(self) -> (Command, Vec<String>) {
    match self {
      Commands::Pull(args) => (Command::Run(Stage::Pull), args.units),
      Commands::Build(args) => (Command::Run(Stage::Build), args.units),
      Commands::Stage(args) => (Command::Run(Stage::Stage), args.units),
      Commands::Deploy(args) => (Command::Run(Stage::Deploy), args.units),
      Commands::Test(args) => (Command::Run(Stage::Test), args.units),
      Commands::Clean(args) => (Command::Clean, args.units),
      Commands::CleanPull(args) => (Command::CleanPull, args.units),
    }
  }
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  let cancel = CancelToken::new();
  if let Err(err) = install_interrupt_handler(cancel.clone()) {
    warn!(error = %err, "could not install Ctrl-C handler");
  }

  let options = RunOptions {
    manifest: cli.manifest,
    work_dir: cli.work_dir,
    jobs: cli.jobs,
    output: cli.output,
    verbose: cli.verbose,
  };
  let (command, units) = cli.command.into_parts();

  match cmd::cmd_run(&options, command, &units, cancel) {
    Ok(code) => ExitCode::from(code),
    Err(err) => {
      print_error(&format!("{:#}", err));
      ExitCode::from(cmd::exit_code_for(&err))
    }
  }
}

fn init_tracing(verbose: bool) {
  let default = if verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn install_interrupt_handler(cancel: CancelToken) -> Result<()> {
  ctrlc::set_handler(move || {
    if cancel.is_cancelled() {
      std::process::exit(130);
    }
    eprintln!("interrupted; stopping running steps (press Ctrl-C again to exit immediately)");
    cancel.cancel();
  })?;
  Ok(())
}
