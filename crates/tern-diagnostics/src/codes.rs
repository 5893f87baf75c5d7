// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Error code registry.
//!
//! Maps error codes to titles and categories. Used by `tern explain <code>`
//! and for JSON output.

use std::collections::HashMap;

/// Registry of all known error codes.
pub struct ErrorCodeRegistry {
    codes: HashMap<&'static str, ErrorCodeInfo>,
}

/// Information about a single error code.
pub struct ErrorCodeInfo {
    pub code: &'static str,
    pub title: &'static str,
    pub category: ErrorCategory,
}

/// Error category for grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The target library lacks something the lowering needs.
    Library,
    /// The method cannot be lowered as written.
    Lowering,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Library => write!(f, "Library"),
            ErrorCategory::Lowering => write!(f, "Lowering"),
        }
    }
}

macro_rules! register_codes {
    ($($code:literal => ($title:literal, $cat:expr)),* $(,)?) => {{
        let mut map = HashMap::new();
        $(
            map.insert($code, ErrorCodeInfo {
                code: $code,
                title: $title,
                category: $cat,
            });
        )*
        map
    }};
}

impl Default for ErrorCodeRegistry {
    fn default() -> Self {
        use ErrorCategory::*;

        Self {
            codes: register_codes! {
                "E0900" => ("missing well-known member", Library),
                "E0901" => ("by-reference value cannot be preserved across await", Lowering),
                "E0902" => ("incomplete awaiter pattern", Lowering),
                "E0903" => ("await in exception filter", Lowering),
                "E0904" => ("unsupported async return type", Lowering),
            },
        }
    }
}

impl ErrorCodeRegistry {
    pub fn get(&self, code: &str) -> Option<&ErrorCodeInfo> {
        self.codes.get(code)
    }

    /// All codes, sorted.
    pub fn all(&self) -> Vec<&ErrorCodeInfo> {
        let mut all: Vec<_> = self.codes.values().collect();
        all.sort_by_key(|info| info.code);
        all
    }
}
