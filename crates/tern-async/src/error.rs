// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! User-facing lowering errors.
//!
//! Internal invariant violations are not represented here: they are compiler
//! bugs and abort through `bug!`.

use thiserror::Error;

use tern_ast::Span;
use tern_diagnostics::{Diagnostic, ToDiagnostic};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoweringError {
    #[error("required member `{member}` is not defined by the target library")]
    MissingMember { member: String, span: Span },

    #[error("the reference returned by `{method}` cannot be preserved across an await")]
    RefAcrossAwait { method: String, span: Span },

    #[error("`{awaitable}` does not provide a complete awaiter pattern: `{missing}` is missing")]
    IncompleteAwaiter { awaitable: String, missing: &'static str, span: Span },

    #[error("`await` cannot be used in an exception filter")]
    AwaitInFilter { span: Span },

    #[error("`{ty}` is not a valid return type for an async method")]
    UnsupportedReturnType { ty: String, span: Span },
}

impl LoweringError {
    pub fn code(&self) -> &'static str {
        match self {
            LoweringError::MissingMember { .. } => "E0900",
            LoweringError::RefAcrossAwait { .. } => "E0901",
            LoweringError::IncompleteAwaiter { .. } => "E0902",
            LoweringError::AwaitInFilter { .. } => "E0903",
            LoweringError::UnsupportedReturnType { .. } => "E0904",
        }
    }

    pub fn span(&self) -> Span {
        match self {
            LoweringError::MissingMember { span, .. }
            | LoweringError::RefAcrossAwait { span, .. }
            | LoweringError::IncompleteAwaiter { span, .. }
            | LoweringError::AwaitInFilter { span }
            | LoweringError::UnsupportedReturnType { span, .. } => *span,
        }
    }
}

impl ToDiagnostic for LoweringError {
    fn to_diagnostic(&self) -> Diagnostic {
        let diag = Diagnostic::error(self.to_string()).with_code(self.code());
        match self {
            LoweringError::MissingMember { span, .. } => diag
                .with_primary(*span, "required to lower this async method")
                .with_note("the method is left unlowered"),
            LoweringError::RefAcrossAwait { span, .. } => diag
                .with_primary(*span, "reference obtained here")
                .with_help("store the value in a local before the await"),
            LoweringError::IncompleteAwaiter { span, .. } => diag.with_primary(*span, "awaited here"),
            LoweringError::AwaitInFilter { span } => diag.with_primary(*span, "in this filter"),
            LoweringError::UnsupportedReturnType { span, .. } => diag
                .with_primary(*span, "declared here")
                .with_help("async methods return void, a task, a value task, or an async iterator interface"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_member_diagnostic() {
        let err = LoweringError::MissingMember {
            member: "AsyncTaskMethodBuilder.Create".to_string(),
            span: Span::new(10, 20),
        };
        let diag = err.to_diagnostic();
        assert_eq!(diag.code_str(), Some("E0900"));
        assert_eq!(diag.primary_span(), Some(Span::new(10, 20)));
        assert!(diag.message.contains("AsyncTaskMethodBuilder.Create"));
    }
}
