// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Expression nodes.

use crate::stmt::Block;
use crate::symbols::{FieldRef, LocalSymbol, MethodRef, ParamSymbol};
use crate::types::Type;
use crate::Span;

/// A typed expression.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
    #[cfg_attr(feature = "serde", serde(default))]
    pub span: Span,
}

/// Constant values.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Const {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Short-circuiting operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Members of the awaiter pattern bound for one `await`.
///
/// Members are optional because binding may have failed to find them; the
/// lowering pass reports an incomplete pattern instead of guessing.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AwaitInfo {
    pub get_awaiter: Option<MethodRef>,
    pub is_completed: Option<MethodRef>,
    pub get_result: Option<MethodRef>,
    pub awaiter_ty: Type,
    /// The awaiter implements critical (non-flowing) completion notification.
    #[cfg_attr(feature = "serde", serde(default))]
    pub is_critical: bool,
}

impl AwaitInfo {
    pub fn is_complete(&self) -> bool {
        self.get_awaiter.is_some() && self.is_completed.is_some() && self.get_result.is_some()
    }
}

/// The kind of expression.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExprKind {
    Literal(Const),
    Local(LocalSymbol),
    Param(ParamSymbol),
    /// The receiver of the method being compiled.
    This,
    /// Field access; `receiver` is `None` for static fields.
    Field {
        receiver: Option<Box<Expr>>,
        field: FieldRef,
    },
    ArrayElement {
        array: Box<Expr>,
        index: Box<Expr>,
    },
    /// Method call; `receiver` is `None` for static methods.
    Call {
        receiver: Option<Box<Expr>>,
        method: MethodRef,
        args: Vec<Expr>,
    },
    /// Object creation of `ty`.
    New {
        args: Vec<Expr>,
    },
    ArrayInit {
        elements: Vec<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// `left ?? right`
    Coalesce {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `cond ? when_true : when_false`
    Conditional {
        cond: Box<Expr>,
        when_true: Box<Expr>,
        when_false: Box<Expr>,
    },
    /// `receiver?.access`; `access` refers to the receiver through a
    /// `ConditionalReceiver` with the same id. Evaluates to the default of
    /// `ty` when the receiver is null.
    ConditionalAccess {
        id: u32,
        receiver: Box<Expr>,
        access: Box<Expr>,
    },
    ConditionalReceiver {
        id: u32,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
        #[cfg_attr(feature = "serde", serde(default))]
        is_ref: bool,
    },
    /// Evaluate side effects in order, then `value`. `locals` are scoped to
    /// the sequence.
    Sequence {
        locals: Vec<LocalSymbol>,
        side_effects: Vec<Expr>,
        value: Box<Expr>,
    },
    Await {
        operand: Box<Expr>,
        info: Box<AwaitInfo>,
    },
    Lambda {
        params: Vec<ParamSymbol>,
        body: Box<Block>,
    },
    /// Default value of `ty`.
    Default,
}

impl Expr {
    pub fn new(kind: ExprKind, ty: Type, span: Span) -> Self {
        Expr { kind, ty, span }
    }

    pub fn is_await(&self) -> bool {
        matches!(self.kind, ExprKind::Await { .. })
    }

    pub fn as_local(&self) -> Option<&LocalSymbol> {
        match &self.kind {
            ExprKind::Local(local) => Some(local),
            _ => None,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self.kind, ExprKind::Literal(_))
    }
}
