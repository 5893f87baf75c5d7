// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Statement nodes.

use crate::expr::Expr;
use crate::symbols::{LabelSymbol, LocalSymbol};
use crate::types::Type;
use crate::Span;

/// A statement.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Stmt {
    pub kind: StmtKind,
    #[cfg_attr(feature = "serde", serde(default))]
    pub span: Span,
}

/// A block with its own locals.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Block {
    #[cfg_attr(feature = "serde", serde(default))]
    pub locals: Vec<LocalSymbol>,
    pub stmts: Vec<Stmt>,
}

/// One `catch` clause.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CatchBlock {
    /// The exception variable, if the clause names one.
    pub local: Option<LocalSymbol>,
    pub exception_ty: Type,
    /// `when (...)` filter. Runs during exception dispatch.
    #[cfg_attr(feature = "serde", serde(default))]
    pub filter: Option<Expr>,
    pub body: Block,
}

/// The kind of statement.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StmtKind {
    Block(Block),
    Expr(Expr),
    Label(LabelSymbol),
    Goto(LabelSymbol),
    /// `if (cond == jump_if) goto label;`
    CondGoto {
        cond: Expr,
        jump_if: bool,
        label: LabelSymbol,
    },
    If {
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    /// Jump table over an integer value. Falls through when no case matches
    /// and there is no default.
    Switch {
        value: Expr,
        cases: Vec<(i64, LabelSymbol)>,
        default: Option<LabelSymbol>,
    },
    Return(Option<Expr>),
    /// `throw e;`, or a rethrow of the caught exception when `None`.
    Throw(Option<Expr>),
    Try {
        body: Block,
        catches: Vec<CatchBlock>,
        finally: Option<Block>,
        /// Label of an extracted finally that stands in for `finally` in
        /// async iterators.
        #[cfg_attr(feature = "serde", serde(default))]
        finally_label: Option<LabelSymbol>,
    },
    /// An ordinary block that took the place of a `finally` handler.
    ExtractedFinally(Block),
    YieldReturn(Expr),
    YieldBreak,
    Nop,
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Stmt { kind, span }
    }

    pub fn block(block: Block, span: Span) -> Self {
        Stmt::new(StmtKind::Block(block), span)
    }

    /// True for statements after which control never falls through.
    pub fn is_jump(&self) -> bool {
        matches!(
            self.kind,
            StmtKind::Goto(_) | StmtKind::Return(_) | StmtKind::Throw(_) | StmtKind::YieldBreak
        )
    }
}

impl Block {
    pub fn new(stmts: Vec<Stmt>) -> Self {
        Block { locals: Vec::new(), stmts }
    }

    pub fn with_locals(locals: Vec<LocalSymbol>, stmts: Vec<Stmt>) -> Self {
        Block { locals, stmts }
    }

    pub fn is_empty(&self) -> bool {
        self.stmts.is_empty()
    }
}
