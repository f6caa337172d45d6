//! CLI output formatting utilities.
//!
//! Colored status lines, durations and the per-unit run report.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};
use partkit_lib::orchestrator::{RunReport, TestOutcome, UnitOutcome};
use partkit_lib::unit::Stage;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 60 {
    let mins = secs / 60;
    let remaining_secs = secs % 60;
    format!("{}m {}s", mins, remaining_secs)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

fn join_stages(stages: &[Stage]) -> String {
  if stages.is_empty() {
    return "none".to_string();
  }
  stages.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}

/// Prints one block per unit, then a summary line.
pub fn print_report(report: &RunReport, verbose: bool) {
  for outcome in &report.units {
    print_unit(outcome, verbose);
  }

  println!();
  let failed = report.failed().count();
  if failed == 0 {
    print_success(&format!("{}: {} unit(s) succeeded", report.command, report.units.len()));
  } else {
    print_error(&format!(
      "{}: {} of {} unit(s) failed",
      report.command,
      failed,
      report.units.len()
    ));
  }
}

fn print_unit(outcome: &UnitOutcome, verbose: bool) {
  let headline = format!(
    "{} ({}) {} {:?} in {}",
    outcome.unit,
    outcome.backend,
    symbols::ARROW,
    outcome.state,
    format_duration(outcome.duration)
  );

  match &outcome.failure {
    None if outcome.is_success() => print_success(&headline),
    None => print_warning(&headline),
    Some(failure) => {
      print_error(&headline);
      let stage = failure.stage.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
      eprintln!("    {} failed ({:?}): {}", stage, failure.kind, failure.message);
      for line in &failure.tail {
        eprintln!("    | {}", line);
      }
    }
  }

  if verbose || !outcome.executed.is_empty() {
    print_stat("ran", &join_stages(&outcome.executed));
  }
  if verbose && !outcome.skipped.is_empty() {
    print_stat("up to date", &join_stages(&outcome.skipped));
  }

  match &outcome.test {
    Some(TestOutcome::Passed) => print_stat("tests", "passed"),
    Some(TestOutcome::Failed { message, tail }) => {
      print_stat("tests", "FAILED");
      print_info(message);
      for line in tail {
        println!("    | {}", line);
      }
    }
    None => {}
  }
}
