// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! JSON diagnostic output for machine consumption.
//!
//! Use `--format json` with `tern lower` to get this output.

use serde::Serialize;
use tern_ast::LineMap;

use crate::{codes::ErrorCodeRegistry, Diagnostic, LabelStyle, Severity};

/// A complete JSON diagnostic report for one lowering run.
#[derive(Debug, Serialize)]
pub struct DiagnosticReport {
    /// Schema version for forward compatibility.
    pub version: u32,
    pub file: String,
    /// Whether lowering succeeded (no errors).
    pub success: bool,
    pub diagnostics: Vec<JsonDiagnostic>,
    pub error_count: usize,
    pub warning_count: usize,
}

/// A single diagnostic in JSON form.
#[derive(Debug, Serialize)]
pub struct JsonDiagnostic {
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    pub labels: Vec<JsonLabel>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
}

/// A source location with line/column (1-based).
#[derive(Debug, Serialize)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
    pub byte_offset: usize,
}

#[derive(Debug, Serialize)]
pub struct JsonLabel {
    pub role: LabelStyle,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub start: SourceLocation,
    pub end: SourceLocation,
}

/// Convert diagnostics to a structured JSON report.
pub fn to_json_report(diagnostics: &[Diagnostic], source: &str, file: &str) -> DiagnosticReport {
    let registry = ErrorCodeRegistry::default();
    let line_map = LineMap::new(source);
    let locate = |offset: usize| {
        let (line, column) = line_map.offset_to_line_col(offset);
        SourceLocation { line, column, byte_offset: offset }
    };

    let json_diags: Vec<JsonDiagnostic> = diagnostics
        .iter()
        .map(|d| JsonDiagnostic {
            severity: d.severity,
            code: d.code_str().map(str::to_string),
            category: d
                .code_str()
                .and_then(|c| registry.get(c))
                .map(|info| info.category.to_string()),
            message: d.message.clone(),
            location: d.primary_span().map(|s| locate(s.start)),
            labels: d
                .labels
                .iter()
                .map(|l| JsonLabel {
                    role: l.style,
                    message: l.message.clone(),
                    start: locate(l.span.start),
                    end: locate(l.span.end),
                })
                .collect(),
            notes: d.notes.clone(),
            help: d.help.clone(),
        })
        .collect();

    let error_count = diagnostics.iter().filter(|d| d.severity == Severity::Error).count();
    let warning_count = diagnostics.iter().filter(|d| d.severity == Severity::Warning).count();
    DiagnosticReport {
        version: 1,
        file: file.to_string(),
        success: error_count == 0,
        diagnostics: json_diags,
        error_count,
        warning_count,
    }
}

/// Serialize a diagnostic report to pretty JSON.
pub fn to_json_string(report: &DiagnosticReport) -> String {
    serde_json::to_string_pretty(report).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_ast::Span;

    #[test]
    fn report_counts_and_categories() {
        let source = "a\nawait b;";
        let diags = vec![
            Diagnostic::error("missing well-known member")
                .with_code("E0900")
                .with_primary(Span::new(2, 9), "needed for this await"),
            Diagnostic::new(Severity::Warning, "note only"),
        ];
        let report = to_json_report(&diags, source, "m.cs");
        assert!(!report.success);
        assert_eq!(report.error_count, 1);
        assert_eq!(report.warning_count, 1);
        let first = &report.diagnostics[0];
        assert_eq!(first.category.as_deref(), Some("Library"));
        let location = first.location.as_ref().unwrap();
        assert_eq!((location.line, location.column), (2, 1));

        let text = to_json_string(&report);
        assert!(text.contains("\"code\": \"E0900\""));
        assert!(text.contains("\"role\": \"primary\""));
    }
}
