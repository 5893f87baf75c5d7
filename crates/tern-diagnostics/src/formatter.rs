// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Terminal formatter for diagnostics.
//!
//! ```text
//! error[E0901]: by-reference value cannot be preserved across await
//!   --> lib.cs:4:9
//!    |
//!  4 |         GetRef().Add(await F());
//!    |         ^^^^^^^^ reference obtained here
//!    |
//!    = help: store the value in a local before the await
//! ```

use std::collections::BTreeMap;

use colored::Colorize;

use tern_ast::LineMap;

use crate::{Diagnostic, LabelStyle, Severity};

/// Formats diagnostics for terminal output.
pub struct DiagnosticFormatter<'a> {
    source: &'a str,
    file_name: Option<&'a str>,
    line_map: LineMap,
}

struct Underline {
    col_start: usize,
    col_end: usize,
    style: LabelStyle,
    message: Option<String>,
}

impl<'a> DiagnosticFormatter<'a> {
    pub fn new(source: &'a str) -> Self {
        Self { source, file_name: None, line_map: LineMap::new(source) }
    }

    pub fn with_file_name(mut self, name: &'a str) -> Self {
        self.file_name = Some(name);
        self
    }

    pub fn format(&self, diagnostic: &Diagnostic) -> String {
        let mut out = String::new();
        self.format_header(&mut out, diagnostic);

        let lines = self.underlines_by_line(diagnostic);
        if let (Some(span), false) = (diagnostic.primary_span(), lines.is_empty()) {
            let (line, col) = self.line_map.offset_to_line_col(span.start);
            out.push_str(&format!(
                "  {} {}:{}:{}\n",
                "-->".blue(),
                self.file_name.unwrap_or("<source>"),
                line,
                col
            ));
            let gutter = lines.keys().last().map_or(1, |l| l.to_string().len()).max(2);
            out.push_str(&format!("{} {}\n", " ".repeat(gutter + 1), "|".blue()));
            for (line, underlines) in &lines {
                let text = self.line_map.line_text(self.source, *line).unwrap_or("");
                out.push_str(&format!(
                    "{:>width$} {} {}\n",
                    line.to_string().blue().bold(),
                    "|".blue(),
                    text,
                    width = gutter + 1
                ));
                for underline in underlines {
                    Self::format_underline(&mut out, underline, gutter);
                }
            }
        }

        for note in &diagnostic.notes {
            out.push_str(&format!("   {} {}: {}\n", "=".cyan(), "note".cyan().bold(), note));
        }
        if let Some(help) = &diagnostic.help {
            out.push_str(&format!("   {} {}: {}\n", "=".cyan(), "help".cyan().bold(), help));
        }
        out
    }

    fn format_header(&self, out: &mut String, diagnostic: &Diagnostic) {
        let severity = match diagnostic.severity {
            Severity::Error => "error".red().bold(),
            Severity::Warning => "warning".yellow().bold(),
            Severity::Note => "note".blue().bold(),
        };
        match &diagnostic.code {
            Some(code) => out.push_str(&format!(
                "{}[{}]: {}\n",
                severity,
                code.0.as_str().red().bold(),
                diagnostic.message.bold()
            )),
            None => out.push_str(&format!("{}: {}\n", severity, diagnostic.message.bold())),
        }
    }

    /// Labels grouped by their 1-based start line. Multi-line spans are
    /// underlined to the end of their first line.
    fn underlines_by_line(&self, diagnostic: &Diagnostic) -> BTreeMap<u32, Vec<Underline>> {
        let mut lines: BTreeMap<u32, Vec<Underline>> = BTreeMap::new();
        if self.source.is_empty() {
            return lines;
        }
        for label in &diagnostic.labels {
            let (line, col_start) = self.line_map.offset_to_line_col(label.span.start);
            let (end_line, end_col) = self.line_map.offset_to_line_col(label.span.end);
            let col_end = if end_line == line {
                end_col as usize
            } else {
                self.line_map.line_text(self.source, line).map_or(0, str::len) + 1
            };
            lines.entry(line).or_default().push(Underline {
                col_start: col_start as usize,
                col_end: col_end.max(col_start as usize + 1),
                style: label.style,
                message: label.message.clone(),
            });
        }
        for underlines in lines.values_mut() {
            underlines.sort_by_key(|u| (u.style != LabelStyle::Primary, u.col_start));
        }
        lines
    }

    fn format_underline(out: &mut String, underline: &Underline, gutter: usize) {
        let width = underline.col_end - underline.col_start;
        let (marks, message) = match underline.style {
            LabelStyle::Primary => (
                "^".repeat(width).red().bold(),
                underline.message.as_deref().unwrap_or("").red().bold(),
            ),
            LabelStyle::Secondary => (
                "-".repeat(width).blue(),
                underline.message.as_deref().unwrap_or("").blue(),
            ),
        };
        out.push_str(&format!(
            "{} {} {}{} {}\n",
            " ".repeat(gutter + 1),
            "|".blue(),
            " ".repeat(underline.col_start - 1),
            marks,
            message
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_ast::Span;

    #[test]
    fn renders_location_and_help() {
        colored::control::set_override(false);
        let source = "x = 1;\ny = Ref().M(await F());\n";
        let start = source.find("Ref()").unwrap();
        let diag = Diagnostic::error("by-reference value cannot be preserved across await")
            .with_code("E0901")
            .with_primary(Span::new(start, start + 5), "reference obtained here")
            .with_help("store the value in a local before the await");
        let text = DiagnosticFormatter::new(source).with_file_name("lib.cs").format(&diag);
        assert!(text.starts_with("error[E0901]: by-reference value"));
        assert!(text.contains("--> lib.cs:2:5"));
        assert!(text.contains("^^^^^ reference obtained here"));
        assert!(text.contains("= help: store the value"));
    }

    #[test]
    fn no_source_prints_header_only() {
        colored::control::set_override(false);
        let diag = Diagnostic::error("missing").with_primary(Span::new(0, 1), "here");
        let text = DiagnosticFormatter::new("").format(&diag);
        assert_eq!(text, "error: missing\n");
    }
}
