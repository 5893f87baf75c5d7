// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Read-only traversal and child mapping.
//!
//! Nothing here descends into lambda bodies: a lambda is a separate function
//! with its own suspension and handler semantics.

use std::collections::HashSet;

use crate::expr::{Expr, ExprKind};
use crate::stmt::{Block, CatchBlock, Stmt, StmtKind};
use crate::symbols::{LabelId, LocalSymbol};

/// Read-only visitor. Children are visited in evaluation order; a store to
/// a local or parameter is visited after the value being stored.
pub trait Visitor {
    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr)
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt)
    }

    fn visit_block(&mut self, block: &Block) {
        walk_block(self, block)
    }

    /// Every read or write of a local, including a catch variable binding.
    fn visit_local(&mut self, _local: &LocalSymbol) {}
}

pub fn walk_block<V: Visitor + ?Sized>(v: &mut V, block: &Block) {
    for stmt in &block.stmts {
        v.visit_stmt(stmt);
    }
}

pub fn walk_stmt<V: Visitor + ?Sized>(v: &mut V, stmt: &Stmt) {
    match &stmt.kind {
        StmtKind::Block(block) | StmtKind::ExtractedFinally(block) => v.visit_block(block),
        StmtKind::Expr(expr) | StmtKind::YieldReturn(expr) => v.visit_expr(expr),
        StmtKind::CondGoto { cond, .. } => v.visit_expr(cond),
        StmtKind::If { cond, then_branch, else_branch } => {
            v.visit_expr(cond);
            v.visit_stmt(then_branch);
            if let Some(else_branch) = else_branch {
                v.visit_stmt(else_branch);
            }
        }
        StmtKind::Switch { value, .. } => v.visit_expr(value),
        StmtKind::Return(value) | StmtKind::Throw(value) => {
            if let Some(value) = value {
                v.visit_expr(value);
            }
        }
        StmtKind::Try { body, catches, finally, .. } => {
            v.visit_block(body);
            for catch in catches {
                walk_catch(v, catch);
            }
            if let Some(finally) = finally {
                v.visit_block(finally);
            }
        }
        StmtKind::Label(_) | StmtKind::Goto(_) | StmtKind::YieldBreak | StmtKind::Nop => {}
    }
}

fn walk_catch<V: Visitor + ?Sized>(v: &mut V, catch: &CatchBlock) {
    if let Some(local) = &catch.local {
        v.visit_local(local);
    }
    if let Some(filter) = &catch.filter {
        v.visit_expr(filter);
    }
    v.visit_block(&catch.body);
}

pub fn walk_expr<V: Visitor + ?Sized>(v: &mut V, expr: &Expr) {
    match &expr.kind {
        ExprKind::Literal(_)
        | ExprKind::Param(_)
        | ExprKind::This
        | ExprKind::ConditionalReceiver { .. }
        | ExprKind::Lambda { .. }
        | ExprKind::Default => {}
        ExprKind::Local(local) => v.visit_local(local),
        ExprKind::Field { receiver, .. } => {
            if let Some(receiver) = receiver {
                v.visit_expr(receiver);
            }
        }
        ExprKind::ArrayElement { array, index } => {
            v.visit_expr(array);
            v.visit_expr(index);
        }
        ExprKind::Call { receiver, args, .. } => {
            if let Some(receiver) = receiver {
                v.visit_expr(receiver);
            }
            for arg in args {
                v.visit_expr(arg);
            }
        }
        ExprKind::New { args } => {
            for arg in args {
                v.visit_expr(arg);
            }
        }
        ExprKind::ArrayInit { elements } => {
            for element in elements {
                v.visit_expr(element);
            }
        }
        ExprKind::Binary { left, right, .. }
        | ExprKind::Logical { left, right, .. }
        | ExprKind::Coalesce { left, right } => {
            v.visit_expr(left);
            v.visit_expr(right);
        }
        ExprKind::Unary { operand, .. } => v.visit_expr(operand),
        ExprKind::Conditional { cond, when_true, when_false } => {
            v.visit_expr(cond);
            v.visit_expr(when_true);
            v.visit_expr(when_false);
        }
        ExprKind::ConditionalAccess { receiver, access, .. } => {
            v.visit_expr(receiver);
            v.visit_expr(access);
        }
        ExprKind::Assign { target, value, .. } => match target.kind {
            ExprKind::Local(_) | ExprKind::Param(_) => {
                v.visit_expr(value);
                v.visit_expr(target);
            }
            _ => {
                v.visit_expr(target);
                v.visit_expr(value);
            }
        },
        ExprKind::Sequence { side_effects, value, .. } => {
            for effect in side_effects {
                v.visit_expr(effect);
            }
            v.visit_expr(value);
        }
        ExprKind::Await { operand, .. } => v.visit_expr(operand),
    }
}

/// Rebuild `expr` with `f` applied to each direct child expression.
pub fn map_children(expr: Expr, f: &mut dyn FnMut(Expr) -> Expr) -> Expr {
    let Expr { kind, ty, span } = expr;
    let mut map = |e: Box<Expr>| Box::new(f(*e));
    let kind = match kind {
        ExprKind::Field { receiver, field } => ExprKind::Field { receiver: receiver.map(&mut map), field },
        ExprKind::ArrayElement { array, index } => {
            let array = map(array);
            ExprKind::ArrayElement { array, index: map(index) }
        }
        ExprKind::Call { receiver, method, args } => {
            let receiver = receiver.map(&mut map);
            let args = args.into_iter().map(|a| *map(Box::new(a))).collect();
            ExprKind::Call { receiver, method, args }
        }
        ExprKind::New { args } => ExprKind::New { args: args.into_iter().map(|a| *map(Box::new(a))).collect() },
        ExprKind::ArrayInit { elements } => ExprKind::ArrayInit {
            elements: elements.into_iter().map(|e| *map(Box::new(e))).collect(),
        },
        ExprKind::Binary { op, left, right } => {
            let left = map(left);
            ExprKind::Binary { op, left, right: map(right) }
        }
        ExprKind::Logical { op, left, right } => {
            let left = map(left);
            ExprKind::Logical { op, left, right: map(right) }
        }
        ExprKind::Unary { op, operand } => ExprKind::Unary { op, operand: map(operand) },
        ExprKind::Coalesce { left, right } => {
            let left = map(left);
            ExprKind::Coalesce { left, right: map(right) }
        }
        ExprKind::Conditional { cond, when_true, when_false } => {
            let cond = map(cond);
            let when_true = map(when_true);
            ExprKind::Conditional { cond, when_true, when_false: map(when_false) }
        }
        ExprKind::ConditionalAccess { id, receiver, access } => {
            let receiver = map(receiver);
            ExprKind::ConditionalAccess { id, receiver, access: map(access) }
        }
        ExprKind::Assign { target, value, is_ref } => {
            let target = map(target);
            ExprKind::Assign { target, value: map(value), is_ref }
        }
        ExprKind::Sequence { locals, side_effects, value } => {
            let side_effects = side_effects.into_iter().map(|e| *map(Box::new(e))).collect();
            ExprKind::Sequence { locals, side_effects, value: map(value) }
        }
        ExprKind::Await { operand, info } => ExprKind::Await { operand: map(operand), info },
        kind @ (ExprKind::Literal(_)
        | ExprKind::Local(_)
        | ExprKind::Param(_)
        | ExprKind::This
        | ExprKind::ConditionalReceiver { .. }
        | ExprKind::Lambda { .. }
        | ExprKind::Default) => kind,
    };
    Expr { kind, ty, span }
}

// ── Queries ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct SuspensionFinder {
    awaits: bool,
    yields: bool,
}

impl Visitor for SuspensionFinder {
    fn visit_expr(&mut self, expr: &Expr) {
        if self.awaits {
            return;
        }
        if expr.is_await() {
            self.awaits = true;
            return;
        }
        walk_expr(self, expr)
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        if matches!(stmt.kind, StmtKind::YieldReturn(_)) {
            self.yields = true;
        }
        walk_stmt(self, stmt)
    }
}

pub fn contains_await(expr: &Expr) -> bool {
    let mut finder = SuspensionFinder::default();
    finder.visit_expr(expr);
    finder.awaits
}

pub fn stmt_contains_await(stmt: &Stmt) -> bool {
    let mut finder = SuspensionFinder::default();
    finder.visit_stmt(stmt);
    finder.awaits
}

pub fn block_contains_await(block: &Block) -> bool {
    let mut finder = SuspensionFinder::default();
    finder.visit_block(block);
    finder.awaits
}

/// Await or `yield return` anywhere in the statement.
pub fn contains_suspension(stmt: &Stmt) -> bool {
    let mut finder = SuspensionFinder::default();
    finder.visit_stmt(stmt);
    finder.awaits || finder.yields
}

pub fn block_contains_suspension(block: &Block) -> bool {
    block.stmts.iter().any(contains_suspension)
}

struct LabelCollector {
    labels: HashSet<LabelId>,
}

impl Visitor for LabelCollector {
    fn visit_expr(&mut self, _expr: &Expr) {}

    fn visit_stmt(&mut self, stmt: &Stmt) {
        if let StmtKind::Label(label) = &stmt.kind {
            self.labels.insert(label.id);
        }
        walk_stmt(self, stmt)
    }
}

/// Every label declared inside `stmt`, at any depth.
pub fn collect_labels(stmt: &Stmt) -> HashSet<LabelId> {
    let mut collector = LabelCollector { labels: HashSet::new() };
    collector.visit_stmt(stmt);
    collector.labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::NodeFactory;
    use crate::types::Type;

    #[test]
    fn await_inside_lambda_is_not_seen() {
        let mut f = NodeFactory::new();
        let task = f.local("t", Type::task(), crate::LocalKind::User);
        let awaited = f.await_task(f.local_ref(&task));
        let lambda = Expr::new(
            ExprKind::Lambda { params: Vec::new(), body: Box::new(Block::new(vec![f.expr_stmt(awaited.clone())])) },
            Type::class("Action"),
            f.span,
        );
        assert!(!contains_await(&lambda));
        assert!(contains_await(&awaited));
    }

    #[test]
    fn labels_in_nested_try_are_collected() {
        let mut f = NodeFactory::new();
        let inner = f.label("inner");
        let outer = f.label("outer");
        let stmt = f.try_finally(
            Block::new(vec![f.label_stmt(&inner)]),
            Block::new(vec![f.label_stmt(&outer)]),
        );
        let labels = collect_labels(&stmt);
        assert!(labels.contains(&inner.id));
        assert!(labels.contains(&outer.id));
    }

    #[test]
    fn map_children_preserves_order() {
        let f = NodeFactory::new();
        let expr = f.binary(crate::BinOp::Add, f.int(1), f.int(2), Type::Int);
        let mut seen = Vec::new();
        let _ = map_children(expr, &mut |e| {
            seen.push(e.to_string());
            e
        });
        assert_eq!(seen, vec!["1", "2"]);
    }
}
