// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Typed tree for the tern async lowering pipeline.
//!
//! Upstream binding and lowering hand over a fully typed method body built
//! from these nodes. Every stage of the async pipeline consumes one tree and
//! produces a new one, so nodes are plain owned values.

pub mod span;
pub mod types;
pub mod symbols;
pub mod expr;
pub mod stmt;
pub mod decl;
pub mod factory;
pub mod walk;
pub mod display;

pub use span::{Span, LineMap};
pub use types::{Type, TypeKind};
pub use symbols::{
    FieldRef, LabelId, LabelSymbol, LocalId, LocalKind, LocalSymbol, MethodRef, ParamSymbol,
};
pub use expr::{AwaitInfo, BinOp, Const, Expr, ExprKind, LogicalOp, UnaryOp};
pub use stmt::{Block, CatchBlock, Stmt, StmtKind};
pub use decl::MethodDecl;
pub use factory::NodeFactory;
