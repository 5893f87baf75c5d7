// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Tern CLI - lowers async methods and explains diagnostics.

mod help;
mod lower;
mod output;

use std::env;
use std::process;

use colored::Colorize;
use tern_diagnostics::codes::ErrorCodeRegistry;
use tracing_subscriber::EnvFilter;

/// How results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Human,
    Json,
}

fn main() {
    output::init();
    init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        help::print_usage();
        return;
    }

    match args[1].as_str() {
        "lower" => match lower::LowerArgs::parse(&args[2..]) {
            Ok(lower_args) => lower::cmd_lower(&lower_args),
            Err(msg) => {
                eprintln!("{}: {}", output::error_label(), msg);
                help::print_lower_usage();
                process::exit(1);
            }
        },
        "explain" => {
            if args.len() < 3 {
                eprintln!("Usage: tern explain <code>");
                process::exit(1);
            }
            cmd_explain(&args[2]);
        }
        "help" | "--help" | "-h" => help::print_usage(),
        "version" | "--version" | "-V" => println!("tern {}", env!("CARGO_PKG_VERSION")),
        other => {
            eprintln!("{}: unknown command `{}`", output::error_label(), other);
            help::print_usage();
            process::exit(1);
        }
    }
}

/// Logs go to stderr, filtered by `TERN_LOG`.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("TERN_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn cmd_explain(code: &str) {
    let registry = ErrorCodeRegistry::default();

    let Some(info) = registry.get(code) else {
        eprintln!("{}: unknown error code `{}`", output::error_label(), code);
        eprintln!();
        eprintln!("Known codes:");
        for info in registry.all() {
            eprintln!("  {}  {}", info.code, info.title);
        }
        process::exit(1);
    };

    println!("{}[{}]: {}", "error".red().bold(), info.code.red().bold(), info.title.bold());
    println!();
    println!("  Category: {}", info.category);
    println!();
    println!("  Run `tern lower <method.json>` to see this error in context.");
}
