// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Await spilling.
//!
//! After this pass every await is either a whole expression statement
//! (`await e;`) or the value of a statement-level assignment (`x = await e;`).
//! Anything evaluated before an await in the same expression is stored to a
//! spill temporary first, so nothing is left on the evaluation stack when the
//! method suspends. Order of evaluation is preserved exactly.

mod builder;

use std::collections::HashMap;

use tern_ast::walk::{contains_await, map_children, stmt_contains_await};
use tern_ast::{Block, CatchBlock, Expr, ExprKind, LocalKind, LogicalOp, NodeFactory, Span, Stmt, StmtKind};
use tern_diagnostics::DiagnosticBag;

use crate::error::LoweringError;
use builder::{active, SpillBuilder};

/// Spill every await in `body` into statement position.
pub fn spill_block(body: Block, f: &mut NodeFactory, diagnostics: &mut DiagnosticBag) -> Block {
    let mut spiller = Spiller { f, diagnostics, receivers: HashMap::new() };
    spiller.visit_block(body)
}

struct Spiller<'a> {
    f: &'a mut NodeFactory,
    diagnostics: &'a mut DiagnosticBag,
    /// Conditional-access receivers that were moved into temporaries.
    receivers: HashMap<u32, Expr>,
}

impl Spiller<'_> {
    // ── Statements ──────────────────────────────────────────────────────

    fn visit_block(&mut self, block: Block) -> Block {
        let stmts = block.stmts.into_iter().map(|s| self.visit_stmt(s)).collect();
        Block::with_locals(block.locals, stmts)
    }

    fn visit_stmt(&mut self, stmt: Stmt) -> Stmt {
        if !stmt_contains_await(&stmt) {
            return stmt;
        }
        let Stmt { kind, span } = stmt;
        self.f.span = span;
        let mut builder = None;
        let kind = match kind {
            StmtKind::Block(block) => StmtKind::Block(self.visit_block(block)),
            StmtKind::ExtractedFinally(block) => StmtKind::ExtractedFinally(self.visit_block(block)),
            StmtKind::Expr(expr) => return self.visit_expr_stmt(expr, span),
            StmtKind::CondGoto { cond, jump_if, label } => {
                StmtKind::CondGoto { cond: self.visit_expr(&mut builder, cond), jump_if, label }
            }
            StmtKind::If { cond, then_branch, else_branch } => {
                let cond = self.visit_expr(&mut builder, cond);
                StmtKind::If {
                    cond,
                    then_branch: Box::new(self.visit_stmt(*then_branch)),
                    else_branch: else_branch.map(|s| Box::new(self.visit_stmt(*s))),
                }
            }
            StmtKind::Switch { value, cases, default } => {
                StmtKind::Switch { value: self.visit_expr(&mut builder, value), cases, default }
            }
            StmtKind::Return(Some(value)) => StmtKind::Return(Some(self.visit_expr(&mut builder, value))),
            StmtKind::Throw(Some(value)) => StmtKind::Throw(Some(self.visit_expr(&mut builder, value))),
            StmtKind::YieldReturn(value) => StmtKind::YieldReturn(self.visit_expr(&mut builder, value)),
            StmtKind::Try { body, catches, finally, finally_label } => StmtKind::Try {
                body: self.visit_block(body),
                catches: catches.into_iter().map(|c| self.visit_catch(c)).collect(),
                finally: finally.map(|b| self.visit_block(b)),
                finally_label,
            },
            kind @ (StmtKind::Label(_)
            | StmtKind::Goto(_)
            | StmtKind::Return(None)
            | StmtKind::Throw(None)
            | StmtKind::YieldBreak
            | StmtKind::Nop) => kind,
        };
        let stmt = Stmt::new(kind, span);
        match builder {
            None => stmt,
            Some(builder) => Stmt::block(builder.finish([stmt]), span),
        }
    }

    fn visit_catch(&mut self, catch: CatchBlock) -> CatchBlock {
        CatchBlock { body: self.visit_block(catch.body), ..catch }
    }

    fn visit_expr_stmt(&mut self, expr: Expr, span: Span) -> Stmt {
        let mut builder = None;
        self.visit_side_effect(&mut builder, expr);
        let mut block = builder.unwrap_or_default().finish([]);
        if block.locals.is_empty() && block.stmts.len() == 1 {
            if let Some(stmt) = block.stmts.pop() {
                return stmt;
            }
        }
        Stmt::block(block, span)
    }

    /// Evaluate `expr` for its effects only, as statements appended to
    /// `builder`. Awaits stay in statement form here.
    fn visit_side_effect(&mut self, builder: &mut Option<SpillBuilder>, expr: Expr) {
        let Expr { kind, ty, span } = expr;
        match kind {
            ExprKind::Await { operand, info } => {
                let operand = self.visit_expr(builder, *operand);
                let awaited = Expr::new(ExprKind::Await { operand: Box::new(operand), info }, ty, span);
                active(builder).push(Stmt::new(StmtKind::Expr(awaited), span));
            }
            ExprKind::Assign { target, value, is_ref: false } if value.is_await() => {
                let stmt = self.visit_await_assignment(builder, *target, *value, ty, span);
                active(builder).push(stmt);
            }
            ExprKind::ConditionalAccess { id, receiver, access } if ty.is_void() => {
                self.conditional_access(builder, id, *receiver, *access, ty, span);
            }
            kind => {
                let expr = self.visit_expr(builder, Expr::new(kind, ty, span));
                active(builder).push(Stmt::new(StmtKind::Expr(expr), span));
            }
        }
    }

    /// `target = await operand` at statement level. The await stays in
    /// place; the parts of `target` are evaluated before the operand.
    fn visit_await_assignment(
        &mut self,
        builder: &mut Option<SpillBuilder>,
        target: Expr,
        value: Expr,
        ty: tern_ast::Type,
        span: Span,
    ) -> Stmt {
        let Expr { kind: ExprKind::Await { operand, info }, ty: await_ty, span: await_span } = value else {
            bug!("await assignment without an await")
        };
        let target = self.visit_lvalue(builder, target);
        let mut operand_builder = None;
        let operand = self.visit_expr(&mut operand_builder, *operand);
        let target = match target.kind {
            ExprKind::Local(_) | ExprKind::Param(_) => target,
            _ => self.spill_lvalue(builder, target),
        };
        if let Some(operand_builder) = operand_builder {
            active(builder).include(operand_builder);
        }
        let awaited = Expr::new(ExprKind::Await { operand: Box::new(operand), info }, await_ty, await_span);
        let assign = ExprKind::Assign { target: Box::new(target), value: Box::new(awaited), is_ref: false };
        Stmt::new(StmtKind::Expr(Expr::new(assign, ty, span)), span)
    }

    // ── Expressions ─────────────────────────────────────────────────────

    fn visit_expr(&mut self, builder: &mut Option<SpillBuilder>, expr: Expr) -> Expr {
        if !contains_await(&expr) {
            return self.substitute_receivers(expr);
        }
        let Expr { kind, ty, span } = expr;
        self.f.span = span;
        let kind = match kind {
            ExprKind::Await { operand, info } => {
                let operand = self.visit_expr(builder, *operand);
                if ty.is_void() {
                    bug!("void await in value position");
                }
                self.f.span = span;
                let temp = self.f.spill_temp(ty.clone());
                tracing::trace!(target: "async_lowering", temp = %temp.name, "spilled await");
                let awaited = Expr::new(ExprKind::Await { operand: Box::new(operand), info }, ty, span);
                let store = self.f.assign_stmt(self.f.local_ref(&temp), awaited);
                let b = active(builder);
                b.add_local(temp.clone());
                b.push(store);
                return self.f.local_ref(&temp);
            }
            ExprKind::Field { receiver, field } => {
                ExprKind::Field { receiver: receiver.map(|r| Box::new(self.visit_expr(builder, *r))), field }
            }
            ExprKind::ArrayElement { array, index } => {
                let (_, operands) = self.visit_operands(builder, None, vec![*array, *index]);
                let (array, index) = into_pair(operands);
                ExprKind::ArrayElement { array: Box::new(array), index: Box::new(index) }
            }
            ExprKind::Call { receiver, method, args } => {
                let (receiver, args) = self.visit_operands(builder, receiver.map(|r| *r), args);
                ExprKind::Call { receiver: receiver.map(Box::new), method, args }
            }
            ExprKind::New { args } => ExprKind::New { args: self.visit_operands(builder, None, args).1 },
            ExprKind::ArrayInit { elements } => {
                ExprKind::ArrayInit { elements: self.visit_operands(builder, None, elements).1 }
            }
            ExprKind::Binary { op, left, right } => {
                let (_, operands) = self.visit_operands(builder, None, vec![*left, *right]);
                let (left, right) = into_pair(operands);
                ExprKind::Binary { op, left: Box::new(left), right: Box::new(right) }
            }
            ExprKind::Unary { op, operand } => {
                ExprKind::Unary { op, operand: Box::new(self.visit_expr(builder, *operand)) }
            }
            ExprKind::Logical { op, left, right } => {
                let left = self.visit_expr(builder, *left);
                let mut right_builder = None;
                let right = self.visit_expr(&mut right_builder, *right);
                let Some(right_builder) = right_builder else {
                    return Expr::new(ExprKind::Logical { op, left: Box::new(left), right: Box::new(right) }, ty, span);
                };
                // tmp = left; if (tmp) { tmp = right; }   (negated for ||)
                self.f.span = span;
                let temp = self.f.spill_temp(ty.clone());
                let test = match op {
                    LogicalOp::And => self.f.local_ref(&temp),
                    LogicalOp::Or => self.f.not(self.f.local_ref(&temp)),
                };
                let store_left = self.f.assign_stmt(self.f.local_ref(&temp), left);
                let store_right = self.f.assign_stmt(self.f.local_ref(&temp), right);
                let branch = self.f.if_then(test, Stmt::block(right_builder.finish([store_right]), span));
                let b = active(builder);
                b.add_local(temp.clone());
                b.push(store_left);
                b.push(branch);
                return self.f.local_ref(&temp);
            }
            ExprKind::Coalesce { left, right } => {
                let left = self.visit_expr(builder, *left);
                let mut right_builder = None;
                let right = self.visit_expr(&mut right_builder, *right);
                let Some(right_builder) = right_builder else {
                    return Expr::new(ExprKind::Coalesce { left: Box::new(left), right: Box::new(right) }, ty, span);
                };
                self.f.span = span;
                let temp = self.f.spill_temp(ty.clone());
                let store_left = self.f.assign_stmt(self.f.local_ref(&temp), left);
                let is_null = self.f.eq(self.f.local_ref(&temp), self.f.null(ty.clone()));
                let store_right = self.f.assign_stmt(self.f.local_ref(&temp), right);
                let branch = self.f.if_then(is_null, Stmt::block(right_builder.finish([store_right]), span));
                let b = active(builder);
                b.add_local(temp.clone());
                b.push(store_left);
                b.push(branch);
                return self.f.local_ref(&temp);
            }
            ExprKind::Conditional { cond, when_true, when_false } => {
                let cond = self.visit_expr(builder, *cond);
                let (mut true_builder, mut false_builder) = (None, None);
                let when_true = self.visit_expr(&mut true_builder, *when_true);
                let when_false = self.visit_expr(&mut false_builder, *when_false);
                if true_builder.is_none() && false_builder.is_none() {
                    let kind = ExprKind::Conditional {
                        cond: Box::new(cond),
                        when_true: Box::new(when_true),
                        when_false: Box::new(when_false),
                    };
                    return Expr::new(kind, ty, span);
                }
                self.f.span = span;
                let temp = self.f.spill_temp(ty.clone());
                let store_true = self.f.assign_stmt(self.f.local_ref(&temp), when_true);
                let store_false = self.f.assign_stmt(self.f.local_ref(&temp), when_false);
                let branch = self.f.if_else(
                    cond,
                    Stmt::block(true_builder.unwrap_or_default().finish([store_true]), span),
                    Stmt::block(false_builder.unwrap_or_default().finish([store_false]), span),
                );
                let b = active(builder);
                b.add_local(temp.clone());
                b.push(branch);
                return self.f.local_ref(&temp);
            }
            ExprKind::ConditionalAccess { id, receiver, access } => {
                return self
                    .conditional_access(builder, id, *receiver, *access, ty, span)
                    .unwrap_or_else(|| bug!("void conditional access in value position"));
            }
            ExprKind::Assign { target, value, is_ref } => {
                let target = self.visit_lvalue(builder, *target);
                let mut value_builder = None;
                let value = self.visit_expr(&mut value_builder, *value);
                let target = match value_builder {
                    Some(value_builder) => {
                        let target = self.spill_lvalue(builder, target);
                        active(builder).include(value_builder);
                        target
                    }
                    None => target,
                };
                ExprKind::Assign { target: Box::new(target), value: Box::new(value), is_ref }
            }
            ExprKind::Sequence { locals, side_effects, value } => {
                active(builder).add_locals(locals);
                for effect in side_effects {
                    self.visit_side_effect(builder, effect);
                }
                return self.visit_expr(builder, *value);
            }
            kind @ (ExprKind::Literal(_)
            | ExprKind::Local(_)
            | ExprKind::Param(_)
            | ExprKind::This
            | ExprKind::ConditionalReceiver { .. }
            | ExprKind::Lambda { .. }
            | ExprKind::Default) => kind,
        };
        Expr::new(kind, ty, span)
    }

    /// Visit an ordered operand list, `receiver` first. Every operand that
    /// precedes the last one with spilled work is itself spilled, so it is
    /// evaluated before that work runs.
    fn visit_operands(
        &mut self,
        builder: &mut Option<SpillBuilder>,
        receiver: Option<Expr>,
        args: Vec<Expr>,
    ) -> (Option<Expr>, Vec<Expr>) {
        let has_receiver = receiver.is_some();
        let receiver_by_ref = receiver.as_ref().is_some_and(|r| r.ty.is_value_type());

        let mut visited = Vec::with_capacity(args.len() + 1);
        for operand in receiver.into_iter().chain(args) {
            let mut operand_builder = None;
            let operand = self.visit_expr(&mut operand_builder, operand);
            visited.push((operand, operand_builder));
        }

        let last = visited.iter().rposition(|(_, b)| b.is_some());
        let mut operands = Vec::with_capacity(visited.len());
        for (i, (operand, operand_builder)) in visited.into_iter().enumerate() {
            if let Some(operand_builder) = operand_builder {
                active(builder).include(operand_builder);
            }
            let operand = match last {
                Some(last) if i < last => {
                    let by_ref = has_receiver && i == 0 && receiver_by_ref;
                    self.spill(builder, operand, by_ref)
                }
                _ => operand,
            };
            operands.push(operand);
        }

        if has_receiver {
            let mut operands = operands.into_iter();
            let receiver = operands.next();
            (receiver, operands.collect())
        } else {
            (None, operands)
        }
    }

    /// `receiver?.access` where `access` may contain awaits. Returns `None`
    /// for a void access, which is emitted as a statement.
    fn conditional_access(
        &mut self,
        builder: &mut Option<SpillBuilder>,
        id: u32,
        receiver: Expr,
        access: Expr,
        ty: tern_ast::Type,
        span: Span,
    ) -> Option<Expr> {
        let receiver = self.visit_expr(builder, receiver);
        if !contains_await(&access) {
            let access = self.substitute_receivers(access);
            let kind = ExprKind::ConditionalAccess { id, receiver: Box::new(receiver), access: Box::new(access) };
            let expr = Expr::new(kind, ty, span);
            if expr.ty.is_void() {
                active(builder).push(Stmt::new(StmtKind::Expr(expr), span));
                return None;
            }
            return Some(expr);
        }

        self.f.span = span;
        let receiver_ty = receiver.ty.clone();
        let receiver_temp = self.f.spill_temp(receiver_ty.clone());
        let store = self.f.assign_stmt(self.f.local_ref(&receiver_temp), receiver);
        let b = active(builder);
        b.add_local(receiver_temp.clone());
        b.push(store);

        self.receivers.insert(id, self.f.local_ref(&receiver_temp));
        let mut access_builder = None;
        let value = if ty.is_void() {
            self.visit_side_effect(&mut access_builder, access);
            None
        } else {
            Some(self.visit_expr(&mut access_builder, access))
        };
        self.receivers.remove(&id);

        self.f.span = span;
        let not_null = self.f.ne(self.f.local_ref(&receiver_temp), self.f.null(receiver_ty));
        let access_block = access_builder.unwrap_or_default();
        let Some(value) = value else {
            let branch = self.f.if_then(not_null, Stmt::block(access_block.finish([]), span));
            active(builder).push(branch);
            return None;
        };
        let result = self.f.spill_temp(ty.clone());
        let store_value = self.f.assign_stmt(self.f.local_ref(&result), value);
        let store_default = self.f.assign_stmt(self.f.local_ref(&result), self.f.default_of(ty));
        let branch = self.f.if_else(not_null, Stmt::block(access_block.finish([store_value]), span), store_default);
        let b = active(builder);
        b.add_local(result.clone());
        b.push(branch);
        Some(self.f.local_ref(&result))
    }

    /// Visit the sub-expressions of an assignment target without reading it.
    fn visit_lvalue(&mut self, builder: &mut Option<SpillBuilder>, target: Expr) -> Expr {
        let Expr { kind, ty, span } = target;
        let kind = match kind {
            ExprKind::Field { receiver: Some(receiver), field } => ExprKind::Field {
                receiver: Some(Box::new(self.visit_expr(builder, *receiver))),
                field,
            },
            ExprKind::ArrayElement { array, index } => {
                let (_, operands) = self.visit_operands(builder, None, vec![*array, *index]);
                let (array, index) = into_pair(operands);
                ExprKind::ArrayElement { array: Box::new(array), index: Box::new(index) }
            }
            kind => return self.visit_expr(builder, Expr::new(kind, ty, span)),
        };
        Expr::new(kind, ty, span)
    }

    /// Pin down the location an assignment target denotes.
    fn spill_lvalue(&mut self, builder: &mut Option<SpillBuilder>, target: Expr) -> Expr {
        let Expr { kind, ty, span } = target;
        let kind = match kind {
            ExprKind::Field { receiver: Some(receiver), field } => {
                let by_ref = receiver.ty.is_value_type();
                let receiver = self.spill(builder, *receiver, by_ref);
                ExprKind::Field { receiver: Some(Box::new(receiver)), field }
            }
            ExprKind::ArrayElement { array, index } => {
                let array = self.spill(builder, *array, false);
                let index = self.spill(builder, *index, false);
                ExprKind::ArrayElement { array: Box::new(array), index: Box::new(index) }
            }
            kind => kind,
        };
        Expr::new(kind, ty, span)
    }

    /// Store `expr` in a spill temporary unless re-evaluating it later
    /// yields the same value. With `by_ref`, the location is preserved
    /// instead of the value.
    fn spill(&mut self, builder: &mut Option<SpillBuilder>, expr: Expr, by_ref: bool) -> Expr {
        match &expr.kind {
            ExprKind::Literal(_) | ExprKind::Default => return expr,
            ExprKind::Local(local) if local.kind == LocalKind::Spill || local.is_ref || by_ref => return expr,
            ExprKind::Param(_) if by_ref => return expr,
            ExprKind::This if by_ref || expr.ty.is_reference_type() => return expr,
            ExprKind::Field { receiver: None, field } if field.is_readonly => return expr,
            ExprKind::Call { method, .. } if by_ref && method.returns_ref => {
                self.diagnostics.report(&LoweringError::RefAcrossAwait { method: method.to_string(), span: expr.span });
            }
            _ => {}
        }

        let Expr { kind, ty, span } = expr;
        let kind = match kind {
            ExprKind::Field { receiver: Some(receiver), field } if by_ref && !field.is_static => {
                let receiver_by_ref = receiver.ty.is_value_type();
                let receiver = self.spill(builder, *receiver, receiver_by_ref);
                return Expr::new(ExprKind::Field { receiver: Some(Box::new(receiver)), field }, ty, span);
            }
            ExprKind::ArrayElement { array, index } if by_ref => {
                let array = self.spill(builder, *array, false);
                let index = self.spill(builder, *index, false);
                let kind = ExprKind::ArrayElement { array: Box::new(array), index: Box::new(index) };
                return Expr::new(kind, ty, span);
            }
            kind => kind,
        };

        if ty.is_void() {
            bug!("spilling a void expression");
        }
        self.f.span = span;
        let temp = self.f.spill_temp(ty.clone());
        tracing::trace!(target: "async_lowering", temp = %temp.name, "spilled operand");
        let store = self.f.assign_stmt(self.f.local_ref(&temp), Expr::new(kind, ty, span));
        let b = active(builder);
        b.add_local(temp.clone());
        b.push(store);
        self.f.local_ref(&temp)
    }

    fn substitute_receivers(&self, expr: Expr) -> Expr {
        if self.receivers.is_empty() {
            return expr;
        }
        if let ExprKind::ConditionalReceiver { id } = expr.kind {
            if let Some(temp) = self.receivers.get(&id) {
                return temp.clone();
            }
        }
        map_children(expr, &mut |e| self.substitute_receivers(e))
    }
}

fn into_pair(mut operands: Vec<Expr>) -> (Expr, Expr) {
    match (operands.pop(), operands.pop()) {
        (Some(second), Some(first)) if operands.is_empty() => (first, second),
        _ => bug!("operand pair lost an element"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_ast::{MethodRef, Type, TypeKind};

    fn method(name: &str, ret: Type) -> MethodRef {
        MethodRef::static_method(Type::class("C"), name, vec![], ret)
    }

    fn setup() -> (NodeFactory, DiagnosticBag) {
        (NodeFactory::new(), DiagnosticBag::new())
    }

    fn task_local(f: &mut NodeFactory) -> Expr {
        let t = f.local("t", Type::task_of(Type::Int), LocalKind::User);
        f.local_ref(&t)
    }

    fn spill_one(f: &mut NodeFactory, diags: &mut DiagnosticBag, stmt: Stmt) -> Stmt {
        let block = spill_block(Block::new(vec![stmt]), f, diags);
        assert_eq!(block.stmts.len(), 1);
        block.stmts.into_iter().next().unwrap()
    }

    fn as_block(stmt: &Stmt) -> &Block {
        match &stmt.kind {
            StmtKind::Block(block) => block,
            other => panic!("expected block, got {:?}", other),
        }
    }

    #[test]
    fn statement_level_await_is_untouched() {
        let (mut f, mut diags) = setup();
        let t = task_local(&mut f);
        let x = f.local("x", Type::Int, LocalKind::User);
        let awaited = f.await_task(t);
        let stmt = f.assign_stmt(f.local_ref(&x), awaited);
        let out = spill_one(&mut f, &mut diags, stmt.clone());
        assert_eq!(out, stmt);
    }

    #[test]
    fn earlier_argument_is_spilled_before_await() {
        let (mut f, mut diags) = setup();
        let t = task_local(&mut f);
        let first = f.call(None, &method("F", Type::Int), vec![]);
        let awaited = f.await_task(t);
        let call = f.call(None, &method("G", Type::Void), vec![first, awaited]);
        let stmt = f.expr_stmt(call);
        let out = spill_one(&mut f, &mut diags, stmt);

        let block = as_block(&out);
        assert_eq!(block.locals.len(), 2);
        assert!(block.locals.iter().all(|l| l.kind == LocalKind::Spill));
        // spill_a = F(); spill_b = await t; G(spill_a, spill_b);
        assert_eq!(block.stmts.len(), 3);
        let StmtKind::Expr(Expr { kind: ExprKind::Assign { value, .. }, .. }) = &block.stmts[0].kind else {
            panic!("expected assignment");
        };
        assert!(matches!(value.kind, ExprKind::Call { .. }));
        let StmtKind::Expr(Expr { kind: ExprKind::Assign { value, .. }, .. }) = &block.stmts[1].kind else {
            panic!("expected assignment");
        };
        assert!(value.is_await());
        let StmtKind::Expr(Expr { kind: ExprKind::Call { args, .. }, .. }) = &block.stmts[2].kind else {
            panic!("expected call");
        };
        assert_eq!(args[0].as_local().unwrap().id, block.locals[0].id);
        assert_eq!(args[1].as_local().unwrap().id, block.locals[1].id);
        assert!(diags.is_empty());
    }

    #[test]
    fn constants_are_not_spilled() {
        let (mut f, mut diags) = setup();
        let t = task_local(&mut f);
        let awaited = f.await_task(t);
        let sum = f.binary(tern_ast::BinOp::Add, f.int(1), awaited, Type::Int);
        let stmt = f.ret(Some(sum));
        let out = spill_one(&mut f, &mut diags, stmt);
        let block = as_block(&out);
        assert_eq!(block.locals.len(), 1);
        let StmtKind::Return(Some(Expr { kind: ExprKind::Binary { left, .. }, .. })) = &block.stmts[1].kind else {
            panic!("expected return of a sum");
        };
        assert!(left.is_literal());
    }

    #[test]
    fn return_await_goes_through_temp() {
        let (mut f, mut diags) = setup();
        let t = task_local(&mut f);
        let awaited = f.await_task(t);
        let stmt = f.ret(Some(awaited));
        let out = spill_one(&mut f, &mut diags, stmt);
        let block = as_block(&out);
        assert_eq!(block.stmts.len(), 2);
        let StmtKind::Return(Some(value)) = &block.stmts[1].kind else {
            panic!("expected return");
        };
        assert_eq!(value.as_local().unwrap().id, block.locals[0].id);
    }

    #[test]
    fn short_circuit_keeps_right_side_conditional() {
        let (mut f, mut diags) = setup();
        let cond = f.call(None, &method("Check", Type::Bool), vec![]);
        let b = f.local("b", Type::task_of(Type::Bool), LocalKind::User);
        let awaited = f.await_task(f.local_ref(&b));
        let and = f.logical(LogicalOp::And, cond, awaited);
        let stmt = f.ret(Some(and));
        let out = spill_one(&mut f, &mut diags, stmt);
        let block = as_block(&out);
        // tmp = Check(); if (tmp) { ...; tmp = right; } return tmp;
        assert!(matches!(block.stmts[1].kind, StmtKind::If { .. }));
        let StmtKind::If { then_branch, .. } = &block.stmts[1].kind else { unreachable!() };
        let inner = as_block(then_branch);
        assert_eq!(inner.locals.len(), 1, "await temp is scoped to the branch");
    }

    #[test]
    fn value_type_receiver_returned_by_ref_is_rejected() {
        let (mut f, mut diags) = setup();
        let t = task_local(&mut f);
        let mut get_ref = method("GetRef", Type::structure("S"));
        get_ref.returns_ref = true;
        let receiver = f.call(None, &get_ref, vec![]);
        let m = MethodRef::instance(Type::structure("S"), "M", vec![Type::Int], Type::Void);
        let awaited = f.await_task(t);
        let call = f.call(Some(receiver), &m, vec![awaited]);
        let stmt = f.expr_stmt(call);
        spill_one(&mut f, &mut diags, stmt);
        assert!(diags.contains_code("E0901"));
    }

    #[test]
    fn conditional_access_receiver_is_evaluated_once() {
        let (mut f, mut diags) = setup();
        let t = task_local(&mut f);
        let obj = f.call(None, &method("Obj", Type::class("C")), vec![]);
        let receiver = f.expr(ExprKind::ConditionalReceiver { id: 7 }, Type::class("C"));
        let m = MethodRef::instance(Type::class("C"), "M", vec![Type::Int], Type::Int);
        let awaited = f.await_task(t);
        let access = f.call(Some(receiver), &m, vec![awaited]);
        let cond = f.expr(
            ExprKind::ConditionalAccess { id: 7, receiver: Box::new(obj), access: Box::new(access) },
            Type::Int,
        );
        let stmt = f.ret(Some(cond));
        let out = spill_one(&mut f, &mut diags, stmt);
        let block = as_block(&out);
        // receiver temp, result temp
        assert_eq!(block.locals.len(), 2);
        let StmtKind::If { then_branch, else_branch: Some(_), .. } = &block.stmts[1].kind else {
            panic!("expected if/else");
        };
        let inner = as_block(then_branch);
        let StmtKind::Expr(Expr { kind: ExprKind::Assign { value, .. }, .. }) = &inner.stmts.last().unwrap().kind
        else {
            panic!("expected assignment");
        };
        let ExprKind::Call { receiver: Some(receiver), .. } = &value.kind else {
            panic!("expected call");
        };
        assert_eq!(receiver.as_local().unwrap().id, block.locals[0].id);
    }

    #[test]
    fn indexed_assignment_pins_target_before_await() {
        let (mut f, mut diags) = setup();
        let t = task_local(&mut f);
        let arr_ty = Type::Array(Box::new(Type::Int));
        let array = f.call(None, &method("Arr", arr_ty), vec![]);
        let index = f.call(None, &method("Idx", Type::Int), vec![]);
        let target = f.expr(ExprKind::ArrayElement { array: Box::new(array), index: Box::new(index) }, Type::Int);
        let awaited = f.await_task(t);
        let stmt = f.assign_stmt(target, awaited);
        let out = spill_one(&mut f, &mut diags, stmt);
        let block = as_block(&out);
        assert_eq!(block.locals.len(), 2);
        let StmtKind::Expr(Expr { kind: ExprKind::Assign { target, value, .. }, .. }) = &block.stmts[2].kind else {
            panic!("expected assignment");
        };
        assert!(value.is_await());
        assert!(matches!(target.kind, ExprKind::ArrayElement { .. }));
    }

    #[test]
    fn value_type_receiver_of_struct_kind_stays_a_location() {
        let (mut f, mut diags) = setup();
        let t = task_local(&mut f);
        let s = f.local("s", Type::named("S", vec![], TypeKind::Struct), LocalKind::User);
        let m = MethodRef::instance(Type::structure("S"), "M", vec![Type::Int], Type::Void);
        let awaited = f.await_task(t);
        let call = f.call(Some(f.local_ref(&s)), &m, vec![awaited]);
        let stmt = f.expr_stmt(call);
        let out = spill_one(&mut f, &mut diags, stmt);
        let block = as_block(&out);
        assert_eq!(block.locals.len(), 1, "only the await result is spilled");
    }
}
