// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! `tern lower`: read a method as JSON, lower it, print the result.

use std::fs;
use std::process;

use serde_json::json;
use tern_ast::{Block, MethodDecl};
use tern_async::{lower_method, LoweredMethod, LoweringOptions, LoweringSession, LoweringStrategy, OptimizationLevel};
use tern_diagnostics::formatter::DiagnosticFormatter;
use tern_diagnostics::json::to_json_report;
use tern_diagnostics::{Diagnostic, DiagnosticBag};

use crate::{output, Format};

#[derive(Debug)]
pub struct LowerArgs {
    pub path: String,
    pub options: LoweringOptions,
    /// Source text the method's spans point into.
    pub source: Option<String>,
    pub format: Format,
}

impl LowerArgs {
    pub fn parse(args: &[String]) -> Result<Self, String> {
        let mut path = None;
        let mut options = LoweringOptions::default();
        let mut source = None;
        let mut format = Format::Human;

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--runtime-async" => options.strategy = LoweringStrategy::RuntimeAsync,
                "--debug" => options.optimization = OptimizationLevel::Debug,
                "--source" => match iter.next() {
                    Some(file) => source = Some(file.clone()),
                    None => return Err("--source needs a file".to_string()),
                },
                "--format" => {
                    format = match iter.next().map(String::as_str) {
                        Some("human") => Format::Human,
                        Some("json") => Format::Json,
                        Some(other) => return Err(format!("unknown format `{}`", other)),
                        None => return Err("--format needs a value".to_string()),
                    }
                }
                flag if flag.starts_with("--") => return Err(format!("unknown option `{}`", flag)),
                file if path.is_none() => path = Some(file.to_string()),
                extra => return Err(format!("unexpected argument `{}`", extra)),
            }
        }

        let path = path.ok_or_else(|| "missing <method.json>".to_string())?;
        Ok(LowerArgs { path, options, source, format })
    }
}

fn read(path: &str) -> String {
    match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}: reading {}: {}", output::error_label(), output::file_path(path), e);
            process::exit(1);
        }
    }
}

pub fn cmd_lower(args: &LowerArgs) {
    let method: MethodDecl = match serde_json::from_str(&read(&args.path)) {
        Ok(method) => method,
        Err(e) => {
            eprintln!("{}: {} is not a method: {}", output::error_label(), output::file_path(&args.path), e);
            process::exit(1);
        }
    };
    let source = args.source.as_deref().map(read).unwrap_or_default();
    let file_name = args.source.as_deref().unwrap_or(&args.path);

    let session = LoweringSession::with_core_library(args.options.clone());
    let mut diagnostics = DiagnosticBag::new();
    let lowered = lower_method(&session, &method, &mut diagnostics);
    let failed = diagnostics.has_errors();
    let diagnostics: Vec<Diagnostic> = diagnostics.into_vec();

    match args.format {
        Format::Human => print_human(&method, &lowered, &diagnostics, &source, file_name, failed),
        Format::Json => {
            let report = to_json_report(&diagnostics, &source, file_name);
            let out = json!({
                "method": method.name,
                "report": report,
                "lowered": if failed { serde_json::Value::Null } else { lowered_json(&lowered) },
            });
            match serde_json::to_string_pretty(&out) {
                Ok(text) => println!("{}", text),
                Err(e) => {
                    eprintln!("{}: {}", output::error_label(), e);
                    process::exit(1);
                }
            }
        }
    }

    if failed {
        process::exit(1);
    }
}

fn print_human(
    method: &MethodDecl,
    lowered: &LoweredMethod,
    diagnostics: &[Diagnostic],
    source: &str,
    file_name: &str,
    failed: bool,
) {
    let formatter = DiagnosticFormatter::new(source).with_file_name(file_name);
    for diagnostic in diagnostics {
        eprintln!("{}", formatter.format(diagnostic));
    }
    if failed {
        let errors = diagnostics.iter().filter(|d| d.severity == tern_diagnostics::Severity::Error).count();
        eprintln!("{}", output::banner_fail("Lowering", errors));
        return;
    }

    match lowered {
        LoweredMethod::StateMachine { kickoff, machine } => {
            print_section(&format!("{} (kickoff)", method.name), kickoff);
            println!("{}", machine);
            if !machine.state_map.entries.is_empty() {
                println!("{}", output::section_header("States:"));
                for entry in &machine.state_map.entries {
                    println!("  {}  {:?} at {}", output::state(entry.state), entry.kind, entry.offset);
                }
                println!();
            }
        }
        LoweredMethod::Direct { body } => print_section(&format!("{} (runtime async)", method.name), body),
        LoweredMethod::Unlowered { body } => print_section(&format!("{} (unchanged)", method.name), body),
    }
    println!("{}", output::banner_ok("Lowering"));
}

fn print_section(title: &str, body: &Block) {
    println!("{}", output::section_header(title));
    println!("{}", output::separator(title.chars().count()));
    println!("{}", body);
}

fn lowered_json(lowered: &LoweredMethod) -> serde_json::Value {
    match lowered {
        LoweredMethod::StateMachine { kickoff, machine } => {
            let fields: Vec<_> = machine
                .fields
                .iter()
                .map(|def| json!({ "name": def.field.name, "type": def.field.ty.to_string(), "role": format!("{:?}", def.role) }))
                .collect();
            let methods: Vec<_> = std::iter::once(&machine.constructor)
                .chain(&machine.methods)
                .map(|m| json!({ "name": m.name, "returns": m.ret.to_string(), "body": m.body }))
                .collect();
            json!({
                "kind": "state-machine",
                "kickoff": kickoff,
                "machine": {
                    "name": machine.name,
                    "value-type": machine.is_value_type,
                    "interfaces": machine.interfaces.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    "fields": fields,
                    "methods": methods,
                    "states": machine.state_map,
                },
            })
        }
        LoweredMethod::Direct { body } => json!({ "kind": "direct", "body": body }),
        LoweredMethod::Unlowered { body } => json!({ "kind": "unlowered", "body": body }),
    }
}
