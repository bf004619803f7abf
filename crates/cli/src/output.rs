//! Terminal and JSON output for the `cannon` commands.
//!
//! Colors are only emitted when the stream supports them, so piped output
//! stays plain.

use std::fmt::Display;

use anyhow::Context;
use owo_colors::{OwoColorize, Stream};

use cannon_lib::builder::PlanStatus;

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
  pub const ADD: &str = "+";
  pub const MODIFY: &str = "~";
  pub const PENDING: &str = "?";
}

/// First 12 characters of a hex fingerprint.
pub fn truncate_hash(hash: &str) -> &str {
  let len = hash.len().min(12);
  &hash[..len]
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

/// `label: value` with the label dimmed, indented by `depth` levels.
pub fn print_stat(depth: usize, label: &str, value: impl Display) {
  println!(
    "{}{}: {}",
    "  ".repeat(depth),
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

/// One step of a plan: status symbol, step id, status and short fingerprint.
pub fn print_plan_step(step: &str, status: PlanStatus, fingerprint: Option<&str>) {
  let symbol = match status {
    PlanStatus::New => symbols::ADD.if_supports_color(Stream::Stdout, |s| s.green()).to_string(),
    PlanStatus::Changed => symbols::MODIFY.if_supports_color(Stream::Stdout, |s| s.yellow()).to_string(),
    PlanStatus::Pending => symbols::PENDING.if_supports_color(Stream::Stdout, |s| s.cyan()).to_string(),
    PlanStatus::Unchanged => " ".to_string(),
  };
  let detail = format!("({status})");

  println!(
    "  {} {} {} {}",
    symbol,
    step,
    detail.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    truncate_hash(fingerprint.unwrap_or_default()).if_supports_color(Stream::Stdout, |s| s.dimmed())
  );
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}
