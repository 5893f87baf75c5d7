// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Lowering for runtimes with native suspension.
//!
//! No state machine is built. Each await of a task type becomes a call to
//! the matching `AsyncHelpers.Await` overload; any other awaitable keeps
//! its awaiter and suspends through `AwaitAwaiter` or `UnsafeAwaitAwaiter`
//! when it is not already complete. Handlers are still restructured since
//! the runtime cannot suspend inside them either.

use tern_ast::walk::stmt_contains_await;
use tern_ast::{AwaitInfo, Block, CatchBlock, Expr, ExprKind, MethodDecl, MethodRef, NodeFactory, Span, Stmt,
    StmtKind, Type};
use tern_diagnostics::DiagnosticBag;

use crate::error::LoweringError;
use crate::session::{LoweringSession, MemberCache};
use crate::well_known::WellKnownMember;
use crate::LoweredMethod;

/// `AsyncHelpers` members, resolved once per method.
#[derive(Debug, Clone)]
pub struct RuntimeIntrinsics {
    pub await_task: MethodRef,
    pub await_task_of: MethodRef,
    pub await_value_task: MethodRef,
    pub await_value_task_of: MethodRef,
    pub await_awaiter: MethodRef,
    pub unsafe_await_awaiter: MethodRef,
}

impl RuntimeIntrinsics {
    pub fn resolve(members: &MemberCache, span: Span) -> Result<Self, LoweringError> {
        use WellKnownMember::*;
        Ok(RuntimeIntrinsics {
            await_task: members.require(HelperAwaitTask, span)?,
            await_task_of: members.require(HelperAwaitTaskOf, span)?,
            await_value_task: members.require(HelperAwaitValueTask, span)?,
            await_value_task_of: members.require(HelperAwaitValueTaskOf, span)?,
            await_awaiter: members.require(HelperAwaitAwaiter, span)?,
            unsafe_await_awaiter: members.require(HelperUnsafeAwaitAwaiter, span)?,
        })
    }

    /// The helper that awaits `operand` directly, if its type has one.
    fn task_helper(&self, operand: &Expr) -> Option<MethodRef> {
        let ty = &operand.ty;
        let helper = if ty.is_named("Task", 0) {
            self.await_task.clone()
        } else if ty.is_named("ValueTask", 0) {
            self.await_value_task.clone()
        } else if ty.is_named("Task", 1) {
            self.await_task_of.instantiate(ty.type_args().to_vec())
        } else if ty.is_named("ValueTask", 1) {
            self.await_value_task_of.instantiate(ty.type_args().to_vec())
        } else {
            return None;
        };
        Some(helper)
    }
}

pub(crate) fn lower(
    session: &LoweringSession,
    method: &MethodDecl,
    diagnostics: &mut DiagnosticBag,
) -> Result<LoweredMethod, LoweringError> {
    let intrinsics = RuntimeIntrinsics::resolve(session.members(), method.span)?;
    let mut f = NodeFactory::for_method(method);
    let body = crate::prepare_body(session, method, &mut f, false, diagnostics);
    let body = lower_awaits(body, &mut f, &intrinsics);
    tracing::debug!(target: "async_lowering", method = %method.name, "lowered with runtime intrinsics");
    Ok(LoweredMethod::Direct { body })
}

/// Replace every statement-level await in `body`.
pub fn lower_awaits(body: Block, f: &mut NodeFactory, intrinsics: &RuntimeIntrinsics) -> Block {
    DirectLowering { f, intrinsics }.block(body)
}

struct DirectLowering<'a> {
    f: &'a mut NodeFactory,
    intrinsics: &'a RuntimeIntrinsics,
}

impl DirectLowering<'_> {
    fn block(&mut self, block: Block) -> Block {
        let stmts = block.stmts.into_iter().map(|s| self.stmt(s)).collect();
        Block::with_locals(block.locals, stmts)
    }

    fn stmt(&mut self, stmt: Stmt) -> Stmt {
        if !stmt_contains_await(&stmt) {
            return stmt;
        }
        self.f.span = stmt.span;
        let span = stmt.span;
        let kind = match stmt.kind {
            StmtKind::Expr(expr) => return self.await_stmt(expr),
            StmtKind::Block(block) => StmtKind::Block(self.block(block)),
            StmtKind::ExtractedFinally(block) => StmtKind::ExtractedFinally(self.block(block)),
            StmtKind::If { cond, then_branch, else_branch } => StmtKind::If {
                cond,
                then_branch: Box::new(self.stmt(*then_branch)),
                else_branch: else_branch.map(|b| Box::new(self.stmt(*b))),
            },
            StmtKind::Try { body, catches, finally, finally_label } => StmtKind::Try {
                body: self.block(body),
                catches: catches
                    .into_iter()
                    .map(|c| CatchBlock { body: self.block(c.body), ..c })
                    .collect(),
                finally: finally.map(|b| self.block(b)),
                finally_label,
            },
            kind => bug!("await in unspilled position: {}", Stmt::new(kind, span)),
        };
        Stmt::new(kind, span)
    }

    fn await_stmt(&mut self, expr: Expr) -> Stmt {
        let Expr { kind, ty, span } = expr;
        match kind {
            ExprKind::Await { operand, info } => self.lower_await(*operand, *info, None, ty, span),
            ExprKind::Assign { target, value, .. } if value.is_await() => {
                let Expr { kind: ExprKind::Await { operand, info }, ty, span } = *value else {
                    bug!("await expected in assignment")
                };
                self.lower_await(*operand, *info, Some(*target), ty, span)
            }
            kind => bug!("await in unspilled position: {}", Expr::new(kind, ty, span)),
        }
    }

    fn lower_await(&mut self, operand: Expr, info: AwaitInfo, target: Option<Expr>, result_ty: Type, span: Span) -> Stmt {
        self.f.span = span;
        let complete = |f: &NodeFactory, value: Expr| match &target {
            Some(target) => f.assign_stmt(target.clone(), value),
            None => f.expr_stmt(value),
        };

        if let Some(helper) = self.intrinsics.task_helper(&operand) {
            let mut call = self.f.static_call(&helper, vec![operand]);
            call.ty = result_ty;
            return complete(&*self.f, call);
        }

        // awaiter = operand.GetAwaiter();
        // if (!awaiter.IsCompleted) AsyncHelpers.[Unsafe]AwaitAwaiter(awaiter);
        // [target =] awaiter.GetResult();
        let (Some(get_awaiter), Some(is_completed), Some(get_result)) =
            (info.get_awaiter.as_ref(), info.is_completed.as_ref(), info.get_result.as_ref())
        else {
            bug!("incomplete awaiter pattern reached direct lowering")
        };
        let awaiter = self.f.synthesized("awaiter", info.awaiter_ty.clone());
        let suspend = if info.is_critical { &self.intrinsics.unsafe_await_awaiter } else { &self.intrinsics.await_awaiter };
        let suspend = suspend.instantiate(vec![info.awaiter_ty.clone()]);
        let f = &*self.f;
        let stmts = vec![
            f.assign_stmt(f.local_ref(&awaiter), f.call(Some(operand), get_awaiter, Vec::new())),
            f.if_then(
                f.not(f.call(Some(f.local_ref(&awaiter)), is_completed, Vec::new())),
                f.expr_stmt(f.static_call(&suspend, vec![f.local_ref(&awaiter)])),
            ),
            complete(f, f.call(Some(f.local_ref(&awaiter)), get_result, Vec::new())),
        ];
        f.block_with(vec![awaiter], stmts)
    }
}
