// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Step function generation.
//!
//! Turns a spilled, handler-restructured body into the `MoveNext` of its
//! state machine. Every suspension point becomes "store state, register
//! continuation, return" followed by a resume label, and a dispatch switch
//! at the top of each protected region jumps back to the right label.
//! Locals that live across suspensions and the method's parameters are
//! read and written through fields of the machine.

mod flavor;

pub(crate) use flavor::{field_of_this, this_field, Capabilities, IteratorFlavor, MethodFlavor, StepFlavor};

use tern_ast::walk::{contains_suspension, map_children};
use tern_ast::{AwaitInfo, Block, CatchBlock, Expr, ExprKind, LabelSymbol, LocalSymbol, MethodRef, NodeFactory, Span,
    Stmt, StmtKind, Type};

use crate::state_machine::{
    FieldLayout, FieldRole, StateAllocator, StateMap, SuspensionKind, FINISHED_STATE, NOT_STARTED_STATE,
};

/// Builder methods that hook a continuation onto an awaiter.
pub(crate) struct AwaitRegistration {
    pub on_completed: MethodRef,
    pub unsafe_on_completed: MethodRef,
}

/// The finished step function and the states it allocated.
pub(crate) struct StepFunction {
    pub body: Block,
    pub state_map: StateMap,
}

pub(crate) fn rewrite_step_function(
    body: Block,
    f: &mut NodeFactory,
    layout: &mut FieldLayout,
    flavor: &dyn StepFlavor,
    registration: &AwaitRegistration,
    previous: Option<&StateMap>,
    result_ty: Option<&Type>,
) -> StepFunction {
    let cached_state = f.synthesized("cachedState", Type::Int);
    let result = result_ty.map(|ty| f.synthesized("result", ty.clone()));
    let exit = f.label("exit");
    let capabilities = flavor.capabilities();
    let mut rewriter = BodyRewriter {
        f,
        layout,
        flavor,
        capabilities,
        registration,
        states: StateAllocator::new(previous),
        cached_state,
        result,
        exit: exit.clone(),
        dispatches: Vec::new(),
        disposal: capabilities.has_dispose_mode.then(|| exit.clone()),
    };
    let body = rewriter.rewrite_block(body);
    rewriter.finish(body)
}

struct BodyRewriter<'a> {
    f: &'a mut NodeFactory,
    layout: &'a mut FieldLayout,
    flavor: &'a dyn StepFlavor,
    capabilities: Capabilities,
    registration: &'a AwaitRegistration,
    states: StateAllocator<'a>,
    cached_state: LocalSymbol,
    result: Option<LocalSymbol>,
    exit: LabelSymbol,
    /// Resume points of the region being rewritten.
    dispatches: Vec<(i32, LabelSymbol)>,
    /// Where `yield break` and disposal resumption go from here.
    disposal: Option<LabelSymbol>,
}

impl BodyRewriter<'_> {
    fn field(&self, role: FieldRole) -> Expr {
        this_field(self.f, self.layout, role)
    }

    fn cached(&self) -> Expr {
        self.f.local_ref(&self.cached_state)
    }

    /// `this.state = cachedState = state;`
    fn set_state(&self, state: i32) -> Stmt {
        let both = self.f.assign(self.cached(), self.f.int(state as i64));
        self.f.assign_stmt(self.field(FieldRole::State), both)
    }

    /// Clears hoisted fields that could keep objects alive.
    fn clear_references(&self) -> Vec<Stmt> {
        self.layout
            .hoisted_references()
            .iter()
            .map(|field| self.f.assign_stmt(field_of_this(self.f, self.layout, field), self.f.null(field.ty.clone())))
            .collect()
    }

    fn finish(mut self, body: Block) -> StepFunction {
        let f_span = self.f.span;
        let mut protected = Vec::new();
        if let Some(dispatch) = self.dispatch_switch() {
            protected.push(dispatch);
        }
        if self.capabilities.has_dispose_mode {
            protected.push(self.f.cond_goto(self.field(FieldRole::DisposeMode), true, &self.exit));
        }
        protected.push(Stmt::block(body, f_span));

        let exception = self.f.synthesized("exception", Type::exception());
        let mut handler = vec![self.f.assign_stmt(self.field(FieldRole::State), self.f.int(FINISHED_STATE as i64))];
        handler.extend(self.clear_references());
        handler.extend(self.flavor.fail(self.f, self.layout, self.f.local_ref(&exception)));
        handler.push(self.f.ret(None));
        let catch = CatchBlock {
            local: Some(exception),
            exception_ty: Type::exception(),
            filter: None,
            body: Block::new(handler),
        };

        let mut stmts = vec![
            self.f.assign_stmt(self.cached(), self.field(FieldRole::State)),
            self.f.try_stmt(Block::new(protected), vec![catch], None),
            self.f.label_stmt(&self.exit),
            self.f.assign_stmt(self.field(FieldRole::State), self.f.int(FINISHED_STATE as i64)),
        ];
        stmts.extend(self.clear_references());
        let result = self.result.as_ref().map(|r| self.f.local_ref(r));
        stmts.extend(self.flavor.complete(self.f, self.layout, result));
        stmts.push(self.f.ret(None));

        let mut locals = vec![self.cached_state.clone()];
        locals.extend(self.result.clone());
        StepFunction { body: Block::with_locals(locals, stmts), state_map: self.states.finish() }
    }

    /// `switch (cachedState) { case s: goto resume_s; ... }` for the
    /// current region, or `None` when it has no resume points.
    fn dispatch_switch(&mut self) -> Option<Stmt> {
        if self.dispatches.is_empty() {
            return None;
        }
        let cases = std::mem::take(&mut self.dispatches)
            .into_iter()
            .map(|(state, label)| (state as i64, label))
            .collect();
        Some(self.f.switch(self.cached(), cases, None))
    }

    fn rewrite_block(&mut self, block: Block) -> Block {
        let locals = block.locals.into_iter().filter(|l| self.layout.hoisted(l.id).is_none()).collect();
        let stmts = block.stmts.into_iter().map(|s| self.rewrite_stmt(s)).collect();
        Block::with_locals(locals, stmts)
    }

    fn rewrite_stmt(&mut self, stmt: Stmt) -> Stmt {
        self.f.span = stmt.span;
        let suspends = contains_suspension(&stmt);
        let span = stmt.span;
        match stmt.kind {
            StmtKind::Expr(expr) if suspends => self.rewrite_await_stmt(expr),
            StmtKind::Expr(expr) => {
                let expr = self.rewrite_expr(expr);
                self.f.expr_stmt(expr)
            }
            StmtKind::Block(block) => Stmt::block(self.rewrite_block(block), span),
            StmtKind::ExtractedFinally(block) => {
                let mut block = self.rewrite_block(block);
                if let Some(disposal) = self.disposal.clone() {
                    block.stmts.push(self.f.cond_goto(self.field(FieldRole::DisposeMode), true, &disposal));
                }
                Stmt::block(block, span)
            }
            StmtKind::If { cond, then_branch, else_branch } if suspends => {
                self.flatten_if(cond, *then_branch, else_branch.map(|b| *b), span)
            }
            StmtKind::If { cond, then_branch, else_branch } => {
                let cond = self.rewrite_expr(cond);
                let then_branch = Box::new(self.rewrite_stmt(*then_branch));
                let else_branch = else_branch.map(|b| Box::new(self.rewrite_stmt(*b)));
                Stmt::new(StmtKind::If { cond, then_branch, else_branch }, span)
            }
            StmtKind::CondGoto { cond, jump_if, label } => {
                let cond = self.rewrite_expr(cond);
                Stmt::new(StmtKind::CondGoto { cond, jump_if, label }, span)
            }
            StmtKind::Switch { value, cases, default } => {
                let value = self.rewrite_expr(value);
                Stmt::new(StmtKind::Switch { value, cases, default }, span)
            }
            StmtKind::Return(value) => {
                let mut stmts = Vec::new();
                if let Some(value) = value {
                    let value = self.rewrite_expr(value);
                    match &self.result {
                        Some(result) => stmts.push(self.f.assign_stmt(self.f.local_ref(result), value)),
                        None => stmts.push(self.f.expr_stmt(value)),
                    }
                }
                stmts.push(self.f.goto(&self.exit));
                self.f.block(stmts)
            }
            StmtKind::Throw(value) => {
                let value = value.map(|v| self.rewrite_expr(v));
                Stmt::new(StmtKind::Throw(value), span)
            }
            StmtKind::Try { body, catches, finally, finally_label } => {
                self.rewrite_try(body, catches, finally, finally_label, span)
            }
            StmtKind::YieldReturn(value) => self.rewrite_yield_return(value, span),
            StmtKind::YieldBreak => {
                let Some(disposal) = self.disposal.clone() else {
                    bug!("yield break outside an async iterator")
                };
                let stop = self.f.assign_stmt(self.field(FieldRole::DisposeMode), self.f.bool_lit(true));
                self.f.block(vec![stop, self.f.goto(&disposal)])
            }
            kind @ (StmtKind::Label(_) | StmtKind::Goto(_) | StmtKind::Nop) => Stmt::new(kind, span),
        }
    }

    fn rewrite_await_stmt(&mut self, expr: Expr) -> Stmt {
        let Expr { kind, ty, span } = expr;
        match kind {
            ExprKind::Await { operand, info } => self.lower_await(*operand, *info, None, span),
            ExprKind::Assign { target, value, .. } if value.is_await() => {
                let Expr { kind: ExprKind::Await { operand, info }, span, .. } = *value else {
                    bug!("await expected in assignment")
                };
                self.lower_await(*operand, *info, Some(*target), span)
            }
            kind => bug!("await left in expression position: {}", Expr::new(kind, ty, span)),
        }
    }

    /// ```text
    /// {
    ///     awaiter = operand.GetAwaiter();
    ///     if (awaiter.IsCompleted) goto completed;
    ///     this.state = cachedState = N;
    ///     this.<>u__k = awaiter;
    ///     this.builder.AwaitUnsafeOnCompleted(awaiter, this);
    ///     return;
    /// resume:
    ///     awaiter = this.<>u__k;
    ///     this.<>u__k = default;
    ///     this.state = cachedState = -1;
    /// completed:
    ///     [target =] awaiter.GetResult();
    /// }
    /// ```
    fn lower_await(&mut self, operand: Expr, info: AwaitInfo, target: Option<Expr>, span: Span) -> Stmt {
        let (Some(get_awaiter), Some(is_completed), Some(get_result)) =
            (info.get_awaiter.as_ref(), info.is_completed.as_ref(), info.get_result.as_ref())
        else {
            bug!("incomplete awaiter pattern reached the step rewriter")
        };
        let operand = self.rewrite_expr(operand);
        let target = target.map(|t| self.rewrite_expr(t));
        self.f.span = span;

        let state = self.states.allocate(SuspensionKind::Await, span.start);
        let awaiter = self.f.synthesized("awaiter", info.awaiter_ty.clone());
        let awaiter_field = self.layout.awaiter(&info.awaiter_ty);
        let resume = self.f.label("resume");
        let completed = self.f.label("completed");
        self.dispatches.push((state, resume.clone()));

        let register = if info.is_critical {
            &self.registration.unsafe_on_completed
        } else {
            &self.registration.on_completed
        };
        let register = register.instantiate(vec![info.awaiter_ty.clone(), self.layout.owner().clone()]);
        let f = &*self.f;
        let stored = field_of_this(f, self.layout, &awaiter_field);
        let get_result = f.call(Some(f.local_ref(&awaiter)), get_result, Vec::new());

        let mut stmts = vec![
            f.assign_stmt(f.local_ref(&awaiter), f.call(Some(operand), get_awaiter, Vec::new())),
            f.cond_goto(f.call(Some(f.local_ref(&awaiter)), is_completed, Vec::new()), true, &completed),
            self.set_state(state),
            f.assign_stmt(stored.clone(), f.local_ref(&awaiter)),
            f.expr_stmt(f.call(
                Some(self.field(FieldRole::Builder)),
                &register,
                vec![f.local_ref(&awaiter), f.this(self.layout.owner().clone())],
            )),
            f.ret(None),
            f.label_stmt(&resume),
            f.assign_stmt(f.local_ref(&awaiter), stored.clone()),
            f.assign_stmt(stored, f.default_of(info.awaiter_ty.clone())),
            self.set_state(NOT_STARTED_STATE),
            f.label_stmt(&completed),
        ];
        stmts.push(match target {
            Some(target) => f.assign_stmt(target, get_result),
            None => f.expr_stmt(get_result),
        });
        f.block_with(vec![awaiter], stmts)
    }

    fn rewrite_yield_return(&mut self, value: Expr, span: Span) -> Stmt {
        if !self.capabilities.handles_yield {
            bug!("yield return outside an async iterator");
        }
        let Some(disposal) = self.disposal.clone() else {
            bug!("async iterator without a disposal target")
        };
        let value = self.rewrite_expr(value);
        self.f.span = span;
        let state = self.states.allocate(SuspensionKind::Yield, span.start);
        let resume = self.f.label("resume");
        self.dispatches.push((state, resume.clone()));

        let mut stmts = vec![self.f.assign_stmt(self.field(FieldRole::Current), value), self.set_state(state)];
        stmts.extend(self.flavor.produce(self.f, self.layout));
        stmts.push(self.f.ret(None));
        stmts.push(self.f.label_stmt(&resume));
        stmts.push(self.set_state(NOT_STARTED_STATE));
        stmts.push(self.f.cond_goto(self.field(FieldRole::DisposeMode), true, &disposal));
        self.f.block(stmts)
    }

    /// Resume labels cannot sit inside an `if`; turn it into jumps.
    fn flatten_if(&mut self, cond: Expr, then_branch: Stmt, else_branch: Option<Stmt>, span: Span) -> Stmt {
        let cond = self.rewrite_expr(cond);
        let then_branch = self.rewrite_stmt(then_branch);
        let else_branch = else_branch.map(|b| self.rewrite_stmt(b));
        self.f.span = span;
        let end = self.f.label("ifEnd");
        let stmts = match else_branch {
            None => vec![self.f.cond_goto(cond, false, &end), then_branch, self.f.label_stmt(&end)],
            Some(else_branch) => {
                let otherwise = self.f.label("else");
                vec![
                    self.f.cond_goto(cond, false, &otherwise),
                    then_branch,
                    self.f.goto(&end),
                    self.f.label_stmt(&otherwise),
                    else_branch,
                    self.f.label_stmt(&end),
                ]
            }
        };
        self.f.block(stmts)
    }

    fn rewrite_try(
        &mut self,
        body: Block,
        catches: Vec<CatchBlock>,
        finally: Option<Block>,
        finally_label: Option<LabelSymbol>,
        span: Span,
    ) -> Stmt {
        let outer_dispatches = std::mem::take(&mut self.dispatches);
        let outer_disposal = self.disposal.clone();
        let mut after_finally = None;
        if self.capabilities.has_dispose_mode {
            if finally.is_some() {
                let label = self.f.label("afterFinally");
                self.disposal = Some(label.clone());
                after_finally = Some(label);
            } else if finally_label.is_some() {
                self.disposal = finally_label.clone();
            }
        }

        let mut body = self.rewrite_block(body);
        let catches: Vec<CatchBlock> = catches.into_iter().map(|c| self.rewrite_catch(c)).collect();
        let mut finally = finally.map(|b| self.rewrite_block(b));
        self.disposal = outer_disposal;
        self.f.span = span;

        let mut stmts = Vec::new();
        if let Some(dispatch) = self.dispatch_switch() {
            let entry = self.f.label("tryDispatch");
            let StmtKind::Switch { cases, .. } = &dispatch.kind else {
                bug!("dispatch is not a switch")
            };
            let resumed: Vec<(i32, LabelSymbol)> = cases.iter().map(|(s, _)| (*s as i32, entry.clone())).collect();
            body.stmts.insert(0, dispatch);
            stmts.push(self.f.label_stmt(&entry));
            // A finally must stay silent while the step returns to suspend.
            finally = finally.map(|fin| {
                let guard = self.flavor.finally_guard(self.f, self.cached());
                Block::new(vec![self.f.if_then(guard, Stmt::block(fin, span))])
            });
            self.dispatches = outer_dispatches;
            self.dispatches.extend(resumed);
        } else {
            self.dispatches = outer_dispatches;
        }

        stmts.push(Stmt::new(StmtKind::Try { body, catches, finally, finally_label }, span));
        if let Some(after) = after_finally {
            stmts.push(self.f.label_stmt(&after));
            if let Some(disposal) = self.disposal.clone() {
                stmts.push(self.f.cond_goto(self.field(FieldRole::DisposeMode), true, &disposal));
            }
        }
        match stmts.len() {
            1 => stmts.remove(0),
            _ => self.f.block(stmts),
        }
    }

    fn rewrite_catch(&mut self, catch: CatchBlock) -> CatchBlock {
        let CatchBlock { local, exception_ty, filter, body } = catch;
        let mut body = self.rewrite_block(body);
        let mut filter = filter.map(|e| self.rewrite_expr(e));
        let local = match local {
            Some(local) => match self.layout.hoisted(local.id).cloned() {
                Some(field) => {
                    let caught = self.f.synthesized("caught", local.ty.clone());
                    let store = self.f.assign(field_of_this(self.f, self.layout, &field), self.f.local_ref(&caught));
                    match filter.take() {
                        Some(inner) => filter = Some(self.f.sequence(Vec::new(), vec![store], inner)),
                        None => body.stmts.insert(0, self.f.expr_stmt(store)),
                    }
                    Some(caught)
                }
                None => Some(local),
            },
            None => None,
        };
        CatchBlock { local, exception_ty, filter, body }
    }

    fn rewrite_expr(&mut self, expr: Expr) -> Expr {
        match &expr.kind {
            ExprKind::Local(local) => match self.layout.hoisted(local.id) {
                Some(field) => field_of_this(self.f, self.layout, field),
                None => expr,
            },
            ExprKind::Param(param) => self.field(FieldRole::Parameter(param.index)),
            ExprKind::This => self.field(FieldRole::This),
            ExprKind::Lambda { .. } => expr,
            ExprKind::Await { .. } => bug!("await left in expression position: {}", expr),
            ExprKind::Sequence { .. } => {
                let Expr { kind: ExprKind::Sequence { locals, side_effects, value }, ty, span } = expr else {
                    bug!("sequence expected")
                };
                let locals = locals.into_iter().filter(|l| self.layout.hoisted(l.id).is_none()).collect();
                let side_effects = side_effects.into_iter().map(|e| self.rewrite_expr(e)).collect();
                let value = Box::new(self.rewrite_expr(*value));
                Expr::new(ExprKind::Sequence { locals, side_effects, value }, ty, span)
            }
            _ => map_children(expr, &mut |e| self.rewrite_expr(e)),
        }
    }
}

#[cfg(test)]
mod tests;
