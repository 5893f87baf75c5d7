// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Method declarations handed to the async pipeline.

use crate::stmt::Block;
use crate::symbols::{LocalId, ParamSymbol};
use crate::types::Type;
use crate::Span;

/// A bound method body ready for lowering.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MethodDecl {
    pub name: String,
    /// Type that declares the method; the type of `this`.
    pub container: Type,
    #[cfg_attr(feature = "serde", serde(default))]
    pub is_static: bool,
    #[cfg_attr(feature = "serde", serde(default))]
    pub is_async: bool,
    #[cfg_attr(feature = "serde", serde(default))]
    pub params: Vec<ParamSymbol>,
    pub return_ty: Type,
    pub body: Block,
    /// User locals whose lifetime crosses a suspension point, as decided by
    /// upstream analysis.
    #[cfg_attr(feature = "serde", serde(default))]
    pub hoisted_locals: Vec<LocalId>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub span: Span,
}

impl MethodDecl {
    pub fn this_type(&self) -> Option<&Type> {
        if self.is_static {
            None
        } else {
            Some(&self.container)
        }
    }
}
