// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! CLI output formatting with colors and styling.
//!
//! Respects NO_COLOR and FORCE_COLOR. Colors are disabled when output is
//! piped.

use colored::{ColoredString, Colorize};

/// Call once at startup.
pub fn init() {
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    } else if std::env::var("FORCE_COLOR").is_ok() {
        colored::control::set_override(true);
    }
}

pub fn error_label() -> ColoredString {
    "error".red().bold()
}

pub fn banner_ok(phase: &str) -> String {
    format!("{} {} {}", "===".dimmed(), format!("{} OK", phase).green().bold(), "===".dimmed())
}

pub fn banner_fail(phase: &str, count: usize) -> String {
    let msg = if count == 1 { format!("{} FAILED: 1 error", phase) } else { format!("{} FAILED: {} errors", phase, count) };
    format!("{} {} {}", "===".dimmed(), msg.red().bold(), "===".dimmed())
}

pub fn title(name: &str) -> ColoredString {
    name.bold()
}

pub fn version(v: &str) -> ColoredString {
    v.dimmed()
}

pub fn section_header(header: &str) -> ColoredString {
    header.yellow().bold()
}

pub fn command(name: &str) -> ColoredString {
    name.green()
}

pub fn arg(name: &str) -> ColoredString {
    name.cyan()
}

pub fn separator(width: usize) -> ColoredString {
    "─".repeat(width).dimmed()
}

pub fn file_path(path: &str) -> ColoredString {
    path.underline()
}

/// A state number, colored by what it means.
pub fn state(n: i32) -> ColoredString {
    match n {
        -2 => "-2 (finished)".dimmed(),
        -1 => "-1 (running)".dimmed(),
        n if n >= 0 => n.to_string().cyan(),
        n => n.to_string().magenta(),
    }
}
