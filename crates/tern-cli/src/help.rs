// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Help text for CLI commands.

use crate::output;

pub fn print_usage() {
    println!("{} {} - async lowering for tern methods", output::title("Tern"), output::version(env!("CARGO_PKG_VERSION")));
    println!();
    println!(
        "{}: {} {} {}",
        output::section_header("Usage"),
        output::command("tern"),
        output::arg("<command>"),
        output::arg("[args]")
    );
    println!();
    println!("{}", output::section_header("Commands:"));
    println!("  {} {}  Lower an async method read from JSON", output::command("lower"), output::arg("<method.json>"));
    println!("  {} {}     Explain an error code", output::command("explain"), output::arg("<code>"));
    println!("  {}                Show this help", output::command("help"));
    println!("  {}             Show version", output::command("version"));
    println!();
    println!("{}", output::section_header("Lower options:"));
    println!("  {}     Call runtime suspension helpers instead of building a machine", output::arg("--runtime-async"));
    println!("  {}             Hoist every local and keep debug-friendly shapes", output::arg("--debug"));
    println!("  {} {} Render diagnostics against this source text", output::arg("--source"), output::arg("<file>"));
    println!("  {} {} Output format (default human)", output::arg("--format"), output::arg("human|json"));
    println!();
    println!("{}", output::section_header("Environment:"));
    println!("  {}  Log filter, e.g. {} or {}", output::arg("TERN_LOG"), "tern_async=debug", "trace");
}

pub fn print_lower_usage() {
    eprintln!(
        "Usage: {} {} {} {} {} {}",
        output::command("tern lower"),
        output::arg("<method.json>"),
        output::arg("[--runtime-async]"),
        output::arg("[--debug]"),
        output::arg("[--source <file>]"),
        output::arg("[--format human|json]")
    );
}
