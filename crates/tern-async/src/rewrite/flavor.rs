// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Per-kind behavior of the step function.
//!
//! The rewriter itself only knows how to suspend and resume. How the
//! machine reports completion, failure and produced values depends on
//! whether it backs an async method or an async iterator, and is supplied
//! by one of the flavors here.

use tern_ast::{Expr, FieldRef, MethodRef, NodeFactory, Stmt};

use crate::state_machine::{FieldLayout, FieldRole, NOT_STARTED_STATE};
use crate::well_known::PromiseMembers;

/// Features the step function must support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Capabilities {
    /// `yield return` and `yield break` may appear in the body.
    pub handles_yield: bool,
    /// Resumption may be a request to run pending finally blocks and stop.
    pub has_dispose_mode: bool,
}

pub(crate) trait StepFlavor {
    fn capabilities(&self) -> Capabilities;

    /// Whether a `finally` that encloses resume points runs its body. It
    /// must not run when the step returns to suspend.
    fn finally_guard(&self, f: &NodeFactory, cached_state: Expr) -> Expr;

    /// Completion after the body finished; `result` is the returned value.
    fn complete(&self, f: &NodeFactory, layout: &FieldLayout, result: Option<Expr>) -> Vec<Stmt>;

    /// Completion after the body threw `exception`.
    fn fail(&self, f: &NodeFactory, layout: &FieldLayout, exception: Expr) -> Vec<Stmt>;

    /// Publish the value just stored in `Current`.
    fn produce(&self, f: &NodeFactory, layout: &FieldLayout) -> Vec<Stmt>;
}

/// `this.<field>` on the machine.
pub(crate) fn this_field(f: &NodeFactory, layout: &FieldLayout, role: FieldRole) -> Expr {
    match layout.role(role) {
        Some(field) => field_of_this(f, layout, field),
        None => bug!("state machine has no {:?} field", role),
    }
}

pub(crate) fn field_of_this(f: &NodeFactory, layout: &FieldLayout, field: &FieldRef) -> Expr {
    f.field(Some(f.this(layout.owner().clone())), field)
}

/// Async methods complete the builder's task.
pub(crate) struct MethodFlavor {
    pub set_result: MethodRef,
    pub set_exception: MethodRef,
}

impl StepFlavor for MethodFlavor {
    fn capabilities(&self) -> Capabilities {
        Capabilities { handles_yield: false, has_dispose_mode: false }
    }

    fn finally_guard(&self, f: &NodeFactory, cached_state: Expr) -> Expr {
        f.lt(cached_state, f.int(0))
    }

    fn complete(&self, f: &NodeFactory, layout: &FieldLayout, result: Option<Expr>) -> Vec<Stmt> {
        let builder = this_field(f, layout, FieldRole::Builder);
        vec![f.expr_stmt(f.call(Some(builder), &self.set_result, result.into_iter().collect()))]
    }

    fn fail(&self, f: &NodeFactory, layout: &FieldLayout, exception: Expr) -> Vec<Stmt> {
        let builder = this_field(f, layout, FieldRole::Builder);
        vec![f.expr_stmt(f.call(Some(builder), &self.set_exception, vec![exception]))]
    }

    fn produce(&self, _f: &NodeFactory, _layout: &FieldLayout) -> Vec<Stmt> {
        bug!("yield in an async method")
    }
}

/// Async iterators complete through their value-or-end promise.
pub(crate) struct IteratorFlavor {
    pub complete: MethodRef,
    pub promise: PromiseMembers,
}

impl IteratorFlavor {
    /// `current = default; builder.Complete();`
    fn finish(&self, f: &NodeFactory, layout: &FieldLayout) -> Vec<Stmt> {
        let current = this_field(f, layout, FieldRole::Current);
        let ty = current.ty.clone();
        let builder = this_field(f, layout, FieldRole::Builder);
        vec![
            f.assign_stmt(current, f.default_of(ty)),
            f.expr_stmt(f.call(Some(builder), &self.complete, Vec::new())),
        ]
    }
}

impl StepFlavor for IteratorFlavor {
    fn capabilities(&self) -> Capabilities {
        Capabilities { handles_yield: true, has_dispose_mode: true }
    }

    fn finally_guard(&self, f: &NodeFactory, cached_state: Expr) -> Expr {
        f.eq(cached_state, f.int(NOT_STARTED_STATE as i64))
    }

    fn complete(&self, f: &NodeFactory, layout: &FieldLayout, _result: Option<Expr>) -> Vec<Stmt> {
        let mut stmts = self.finish(f, layout);
        let promise = this_field(f, layout, FieldRole::Promise);
        stmts.push(f.expr_stmt(f.call(Some(promise), &self.promise.set_result, vec![f.bool_lit(false)])));
        stmts
    }

    fn fail(&self, f: &NodeFactory, layout: &FieldLayout, exception: Expr) -> Vec<Stmt> {
        let mut stmts = self.finish(f, layout);
        let promise = this_field(f, layout, FieldRole::Promise);
        stmts.push(f.expr_stmt(f.call(Some(promise), &self.promise.set_exception, vec![exception])));
        stmts
    }

    fn produce(&self, f: &NodeFactory, layout: &FieldLayout) -> Vec<Stmt> {
        let promise = this_field(f, layout, FieldRole::Promise);
        vec![f.expr_stmt(f.call(Some(promise), &self.promise.set_result, vec![f.bool_lit(true)]))]
    }
}
