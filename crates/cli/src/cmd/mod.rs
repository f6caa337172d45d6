mod run;

pub use run::{RunOptions, cmd_run, exit_code_for};
