//! CLI output formatting utilities.
//!
//! Provides consistent formatting for terminal output including colored status
//! messages, build reports, and Unicode symbols.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;

use opence_lib::env_file::EmittedEnvFile;
use opence_lib::execute::RunReport;

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

/// Whole milliseconds, in humantime notation (`1m 5s 20ms`).
pub fn format_duration(duration: Duration) -> String {
  let rounded = Duration::from_millis(duration.as_millis() as u64);
  humantime::format_duration(rounded).to_string()
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

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}

pub fn print_env_files(files: &[EmittedEnvFile]) {
  if files.is_empty() {
    return;
  }
  print_info("Conda environment files:");
  for file in files {
    let state = if file.changed { "written" } else { "unchanged" };
    println!("  {} {} ({})", symbols::ARROW, file.path.display(), state);
  }
}

/// Counts, then every failed and skipped unit with its cause.
pub fn print_report(report: &RunReport, elapsed: Duration) {
  println!();
  print_stat("Built", &report.built.len().to_string());
  print_stat("Reused", &report.reused.len().to_string());
  print_stat("Failed", &report.failed.len().to_string());
  print_stat("Skipped", &report.skipped.len().to_string());
  print_stat("Elapsed", &format_duration(elapsed));

  for pruned in &report.pruned {
    print_warning(&pruned.to_string());
  }
  if !report.failed.is_empty() {
    println!();
    println!("Failed:");
    for (unit, err) in &report.failed {
      println!(
        "  {} {}: {}",
        symbols::ERROR.if_supports_color(Stream::Stdout, |s| s.red()),
        unit,
        err
      );
    }
  }
  if !report.skipped.is_empty() {
    println!();
    println!("Skipped:");
    for (unit, reason) in &report.skipped {
      println!(
        "  {} {}: {}",
        symbols::WARNING.if_supports_color(Stream::Stdout, |s| s.yellow()),
        unit,
        reason
      );
    }
  }
}

/// Machine readable form of a build run.
#[derive(Debug, Serialize)]
pub struct ReportJson {
  pub env_files: Vec<String>,
  pub built: Vec<String>,
  pub reused: Vec<String>,
  pub failed: Vec<FailureJson>,
  pub skipped: Vec<FailureJson>,
  pub pruned: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct FailureJson {
  pub unit: String,
  pub reason: String,
}

impl ReportJson {
  pub fn new(env_files: &[EmittedEnvFile], report: Option<&RunReport>) -> Self {
    let env_files = env_files.iter().map(|f| f.path.display().to_string()).collect();
    let Some(report) = report else {
      return Self {
        env_files,
        built: Vec::new(),
        reused: Vec::new(),
        failed: Vec::new(),
        skipped: Vec::new(),
        pruned: Vec::new(),
      };
    };
    Self {
      env_files,
      built: report.built.keys().map(ToString::to_string).collect(),
      reused: report.reused.keys().map(ToString::to_string).collect(),
      failed: report
        .failed
        .iter()
        .map(|(unit, err)| FailureJson {
          unit: unit.to_string(),
          reason: err.to_string(),
        })
        .collect(),
      skipped: report
        .skipped
        .iter()
        .map(|(unit, reason)| FailureJson {
          unit: unit.to_string(),
          reason: reason.to_string(),
        })
        .collect(),
      pruned: report.pruned.iter().map(ToString::to_string).collect(),
    }
  }
}
