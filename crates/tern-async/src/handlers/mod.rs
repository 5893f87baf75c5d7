// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Moves awaits out of exception handlers.
//!
//! A suspended method returns to its caller, which cannot happen from
//! inside a `catch` or `finally` without running the runtime's own handler
//! logic. This pass rewrites every `try` whose handlers contain awaits so
//! that the handlers run as ordinary code after the protected region:
//!
//! - An awaiting `finally` becomes a catch-all that pends the exception,
//!   followed by the finally body, a rethrow of the pended exception, and a
//!   replay of any pending branch out of the region.
//! - Awaiting `catch` clauses record the exception and their index; a
//!   switch after the `try` runs the selected handler.

mod frames;

use tern_ast::walk::{block_contains_await, collect_labels, map_children, Visitor};
use tern_ast::{
    Block, CatchBlock, Expr, ExprKind, LabelSymbol, LocalSymbol, NodeFactory, Span, Stmt, StmtKind, Type,
};

use crate::well_known::ExceptionDispatch;
use frames::{CatchFrame, FinallyFrame};

/// Restructure every `try` in `body` whose `catch` or `finally` awaits.
///
/// In an async iterator an extracted finally is marked as such, so that a
/// later pass can route disposal through it.
pub fn restructure_handlers(
    body: Block,
    f: &mut NodeFactory,
    is_async_iterator: bool,
    rethrow: Option<&ExceptionDispatch>,
) -> Block {
    if !needs_restructuring(&body) {
        return body;
    }
    let mut restructurer = HandlerRestructurer {
        f,
        is_async_iterator,
        dispatch: rethrow,
        finally_frames: vec![FinallyFrame::root()],
        catch_frames: vec![None],
    };
    let body = restructurer.visit_block(body);
    if restructurer.finally_frames.len() != 1 || restructurer.catch_frames.len() != 1 {
        bug!("unbalanced handler frames");
    }
    body
}

/// True if some `try` has an await in a `catch` or `finally`.
pub fn needs_restructuring(body: &Block) -> bool {
    struct Finder {
        found: bool,
    }

    impl Visitor for Finder {
        fn visit_stmt(&mut self, stmt: &Stmt) {
            if self.found {
                return;
            }
            if let StmtKind::Try { catches, finally, .. } = &stmt.kind {
                let in_finally = finally.as_ref().is_some_and(block_contains_await);
                let in_catch = catches.iter().any(|c| block_contains_await(&c.body));
                if in_finally || in_catch {
                    self.found = true;
                    return;
                }
            }
            tern_ast::walk::walk_stmt(self, stmt)
        }
    }

    let mut finder = Finder { found: false };
    finder.visit_block(body);
    finder.found
}

struct HandlerRestructurer<'a> {
    f: &'a mut NodeFactory,
    is_async_iterator: bool,
    dispatch: Option<&'a ExceptionDispatch>,
    finally_frames: Vec<FinallyFrame>,
    /// One entry per handler scope; `Some` once an awaiting catch of that
    /// scope has been seen.
    catch_frames: Vec<Option<CatchFrame>>,
}

impl HandlerRestructurer<'_> {
    fn catch_frame(&self) -> Option<&CatchFrame> {
        self.catch_frames.last().and_then(Option::as_ref)
    }

    fn catch_frame_mut(&mut self) -> &mut CatchFrame {
        match self.catch_frames.last_mut() {
            Some(Some(frame)) => frame,
            _ => bug!("no active catch frame"),
        }
    }

    // ── Statements ──────────────────────────────────────────────────────

    fn visit_block(&mut self, block: Block) -> Block {
        let stmts = block.stmts.into_iter().map(|s| self.visit_stmt(s)).collect();
        Block::with_locals(block.locals, stmts)
    }

    fn visit_stmt(&mut self, stmt: Stmt) -> Stmt {
        let Stmt { kind, span } = stmt;
        self.f.span = span;
        let kind = match kind {
            StmtKind::Block(block) => StmtKind::Block(self.visit_block(block)),
            StmtKind::ExtractedFinally(block) => StmtKind::ExtractedFinally(self.visit_block(block)),
            StmtKind::Expr(expr) => StmtKind::Expr(self.visit_expr(expr)),
            StmtKind::YieldReturn(expr) => StmtKind::YieldReturn(self.visit_expr(expr)),
            StmtKind::Goto(label) => StmtKind::Goto(self.proxy(&label)),
            StmtKind::CondGoto { cond, jump_if, label } => {
                let cond = self.visit_expr(cond);
                StmtKind::CondGoto { cond, jump_if, label: self.proxy(&label) }
            }
            StmtKind::If { cond, then_branch, else_branch } => StmtKind::If {
                cond: self.visit_expr(cond),
                then_branch: Box::new(self.visit_stmt(*then_branch)),
                else_branch: else_branch.map(|s| Box::new(self.visit_stmt(*s))),
            },
            StmtKind::Switch { value, cases, default } => StmtKind::Switch {
                value: self.visit_expr(value),
                cases: cases.into_iter().map(|(case, label)| (case, self.proxy(&label))).collect(),
                default: default.map(|label| self.proxy(&label)),
            },
            StmtKind::Return(value) => {
                let value = value.map(|v| self.visit_expr(v));
                let value_ty = value.as_ref().map(|v| v.ty.clone());
                let f = &mut *self.f;
                let Some(frame) = self.finally_frames.last_mut() else {
                    bug!("finally frame stack is empty")
                };
                match frame.proxy_return_if_needed(value_ty.as_ref(), f) {
                    None => StmtKind::Return(value),
                    Some((label, slot)) => {
                        f.span = span;
                        let mut stmts = Vec::with_capacity(2);
                        if let (Some(slot), Some(value)) = (slot, value) {
                            stmts.push(f.assign_stmt(f.local_ref(&slot), value));
                        }
                        stmts.push(f.goto(&label));
                        StmtKind::Block(Block::new(stmts))
                    }
                }
            }
            StmtKind::Throw(None) => match self.catch_frame() {
                Some(frame) => {
                    let pending = self.f.local_ref(&frame.pending_exception);
                    return self.rethrow(pending, span);
                }
                None => StmtKind::Throw(None),
            },
            StmtKind::Throw(Some(value)) => StmtKind::Throw(Some(self.visit_expr(value))),
            StmtKind::Try { body, catches, finally, .. } => return self.visit_try(body, catches, finally, span),
            kind @ (StmtKind::Label(_) | StmtKind::YieldBreak | StmtKind::Nop) => kind,
        };
        Stmt::new(kind, span)
    }

    fn proxy(&mut self, label: &LabelSymbol) -> LabelSymbol {
        let f = &mut *self.f;
        match self.finally_frames.last_mut() {
            Some(frame) => frame.proxy_label_if_needed(label, f),
            None => bug!("finally frame stack is empty"),
        }
    }

    fn visit_try(&mut self, body: Block, catches: Vec<CatchBlock>, finally: Option<Block>, span: Span) -> Stmt {
        let finally_awaits = finally.as_ref().is_some_and(block_contains_await);
        if !finally_awaits {
            let region = self.rewrite_finalized_region(body, catches, span);
            let Some(finally) = finally else {
                return region;
            };
            let finally = self.visit_block(finally);
            let (body, catches) = match region.kind {
                StmtKind::Try { body, catches, finally: None, .. } => (body, catches),
                kind => (Block::new(vec![Stmt::new(kind, span)]), Vec::new()),
            };
            let kind = StmtKind::Try { body, catches, finally: Some(finally), finally_label: None };
            return Stmt::new(kind, span);
        }
        let Some(finally) = finally else {
            bug!("awaiting finally vanished")
        };

        let mut labels = collect_labels(&Stmt::block(body.clone(), span));
        for catch in &catches {
            labels.extend(collect_labels(&Stmt::block(catch.body.clone(), span)));
        }

        self.finally_frames.push(FinallyFrame::region(labels));
        let region = self.rewrite_finalized_region(body, catches, span);
        let Some(frame) = self.finally_frames.pop() else {
            bug!("finally frame stack underflow")
        };
        // The finally body runs in the enclosing frame: a jump out of it
        // leaves this region directly.
        let finally = self.visit_block(finally);

        self.f.span = span;
        let pending_exception = self.f.synthesized("pendingException", Type::exception());
        let pending_branch = self.f.synthesized("pendingBranch", Type::Int);
        let finally_label = self.f.label("finallyLabel");

        // try { region; goto finallyLabel; proxies... } catch (Exception pendingException) { }
        let mut protected = vec![region, self.f.goto(&finally_label)];
        protected.push(self.pend_branches(&frame, &pending_branch, &finally_label));
        let catch_all = self.f.catch_all(Some(pending_exception.clone()), Block::default());
        let try_stmt = Stmt::new(
            StmtKind::Try {
                body: Block::new(protected),
                catches: vec![catch_all],
                finally: None,
                finally_label: Some(finally_label.clone()),
            },
            span,
        );

        let unpend_exception = self.unpend_exception(&pending_exception, span);
        let unpend_branches = self.unpend_branches(&frame, &pending_branch, span);
        self.f.span = span;
        let finally_stmts = vec![
            self.f.label_stmt(&finally_label),
            Stmt::block(finally, span),
            unpend_exception,
            unpend_branches,
        ];
        let extracted = if self.is_async_iterator {
            Stmt::new(StmtKind::ExtractedFinally(Block::new(finally_stmts)), span)
        } else {
            Stmt::block(Block::new(finally_stmts), span)
        };

        let init_exception = self.f.assign_stmt(self.f.local_ref(&pending_exception), self.f.null(Type::exception()));
        let init_branch = self.f.assign_stmt(self.f.local_ref(&pending_branch), self.f.int(0));
        let mut locals = vec![pending_exception, pending_branch];
        locals.extend(frame.return_value);
        tracing::trace!(target: "async_lowering", label = %finally_label.name, "extracted finally");
        Stmt::block(Block::with_locals(locals, vec![init_exception, init_branch, try_stmt, extracted]), span)
    }

    /// One entry point per pending branch: record its index, then run the
    /// extracted finally.
    fn pend_branches(&mut self, frame: &FinallyFrame, pending_branch: &LocalSymbol, finally_label: &LabelSymbol) -> Stmt {
        let mut stmts = Vec::new();
        let proxies = frame.proxies.values().map(|(_, proxy)| proxy).chain(frame.return_proxy.as_ref());
        for (i, proxy) in proxies.enumerate() {
            stmts.push(self.f.label_stmt(proxy));
            stmts.push(self.f.assign_stmt(self.f.local_ref(pending_branch), self.f.int(i as i64 + 1)));
            stmts.push(self.f.goto(finally_label));
        }
        self.f.block(stmts)
    }

    /// Replay the pending branch once the finally body has run. Targets are
    /// proxied again through the enclosing frame.
    fn unpend_branches(&mut self, frame: &FinallyFrame, pending_branch: &LocalSymbol, span: Span) -> Stmt {
        let mut sections = Vec::new();
        for (i, (original, _)) in frame.proxies.values().enumerate() {
            let target = self.proxy(original);
            self.f.span = span;
            sections.push((i as i64 + 1, vec![self.f.goto(&target)]));
        }
        if frame.return_proxy.is_some() {
            let value = frame.return_value.as_ref().map(|v| self.f.local_ref(v));
            let value_ty = value.as_ref().map(|v| v.ty.clone());
            let f = &mut *self.f;
            let Some(outer) = self.finally_frames.last_mut() else {
                bug!("finally frame stack is empty")
            };
            let stmt = match outer.proxy_return_if_needed(value_ty.as_ref(), f) {
                None => f.ret(value),
                Some((label, slot)) => {
                    let mut stmts = Vec::with_capacity(2);
                    if let (Some(slot), Some(value)) = (slot, value) {
                        stmts.push(f.assign_stmt(f.local_ref(&slot), value));
                    }
                    stmts.push(f.goto(&label));
                    f.block(stmts)
                }
            };
            sections.push((sections.len() as i64 + 1, vec![stmt]));
        }
        self.f.span = span;
        if sections.is_empty() {
            return self.f.stmt(StmtKind::Nop);
        }
        self.f.switch_sections(self.f.local_ref(pending_branch), sections)
    }

    /// `{ var ex = pendingException; if (ex != null) rethrow ex; }`
    fn unpend_exception(&mut self, pending_exception: &LocalSymbol, span: Span) -> Stmt {
        self.f.span = span;
        let ex = self.f.synthesized("ex", Type::exception());
        let load = self.f.assign_stmt(self.f.local_ref(&ex), self.f.local_ref(pending_exception));
        let is_set = self.f.ne(self.f.local_ref(&ex), self.f.null(Type::exception()));
        let rethrow = self.rethrow(self.f.local_ref(&ex), span);
        let check = self.f.if_then(is_set, rethrow);
        self.f.block_with(vec![ex], vec![load, check])
    }

    /// Rethrow a captured exception, keeping its original stack trace when
    /// the library allows it.
    fn rethrow(&mut self, exception: Expr, span: Span) -> Stmt {
        self.f.span = span;
        match self.dispatch {
            Some(dispatch) => {
                let captured = self.f.static_call(&dispatch.capture, vec![exception]);
                self.f.expr_stmt(self.f.call(Some(captured), &dispatch.throw, Vec::new()))
            }
            None => self.f.throw(exception),
        }
    }

    /// Rewrite a `try` body and its catches. Awaiting catches are extracted
    /// into a handler switch after the `try`.
    fn rewrite_finalized_region(&mut self, body: Block, catches: Vec<CatchBlock>, span: Span) -> Stmt {
        let body = self.visit_block(body);
        if catches.is_empty() {
            return Stmt::block(body, span);
        }

        self.catch_frames.push(None);
        let catches: Vec<CatchBlock> = catches.into_iter().map(|c| self.visit_catch(c)).collect();
        let Some(frame) = self.catch_frames.pop() else {
            bug!("catch frame stack underflow")
        };
        let try_stmt = Stmt::new(StmtKind::Try { body, catches, finally: None, finally_label: None }, span);
        let Some(frame) = frame else {
            return try_stmt;
        };

        self.f.span = span;
        let handled = self.f.label("handled");
        let init = self.f.assign_stmt(self.f.local_ref(&frame.pending_catch), self.f.int(0));
        let selector = self.f.local_ref(&frame.pending_catch);
        let sections = frame
            .handlers
            .iter()
            .enumerate()
            .map(|(i, handler)| (i as i64 + 1, vec![Stmt::block(handler.clone(), span), self.f.goto(&handled)]))
            .collect();
        let dispatch = self.f.switch_sections(selector, sections);
        let done = self.f.label_stmt(&handled);
        tracing::trace!(target: "async_lowering", handlers = frame.handlers.len(), "extracted catch handlers");
        Stmt::block(Block::with_locals(frame.into_locals(), vec![init, try_stmt, dispatch, done]), span)
    }

    fn visit_catch(&mut self, catch: CatchBlock) -> CatchBlock {
        if !block_contains_await(&catch.body) {
            self.catch_frames.push(None);
            let filter = catch.filter.map(|e| self.visit_expr(e));
            let body = self.visit_block(catch.body);
            self.catch_frames.pop();
            return CatchBlock { local: catch.local, exception_ty: catch.exception_ty, filter, body };
        }

        if matches!(self.catch_frames.last(), Some(None)) {
            let frame = CatchFrame::new(self.f);
            self.catch_frames.pop();
            self.catch_frames.push(Some(frame));
        }
        let (pending_exception, pending_catch, index) = {
            let frame = self.catch_frame_mut();
            (frame.pending_exception.clone(), frame.pending_catch.clone(), frame.handlers.len() as i64 + 1)
        };

        let caught = self.f.synthesized("caught", catch.exception_ty.clone());
        let store_pending = self.f.assign(self.f.local_ref(&pending_exception), self.f.local_ref(&caught));
        let set_index = self.f.assign_stmt(self.f.local_ref(&pending_catch), self.f.int(index));

        let (new_catch, handler_locals, prologue) = match catch.filter {
            None => {
                let body = Block::new(vec![self.f.expr_stmt(store_pending), set_index]);
                let prologue = catch
                    .local
                    .as_ref()
                    .map(|local| self.f.assign_stmt(self.f.local_ref(local), self.f.local_ref(&pending_exception)));
                let new_catch = CatchBlock {
                    local: Some(caught),
                    exception_ty: catch.exception_ty,
                    filter: None,
                    body,
                };
                (new_catch, catch.local.into_iter().collect::<Vec<_>>(), prologue)
            }
            Some(filter) => {
                let mut effects = vec![store_pending];
                if let Some(local) = &catch.local {
                    let f = &mut *self.f;
                    let hoisted = match self.catch_frames.last_mut() {
                        Some(Some(frame)) => frame.hoist(local, f),
                        _ => bug!("no active catch frame"),
                    };
                    effects.push(self.f.assign(self.f.local_ref(&hoisted), self.f.local_ref(&pending_exception)));
                }
                let filter = self.visit_expr(filter);
                let filter = self.f.sequence(Vec::new(), effects, filter);
                let new_catch = CatchBlock {
                    local: Some(caught),
                    exception_ty: catch.exception_ty,
                    filter: Some(filter),
                    body: Block::new(vec![set_index]),
                };
                (new_catch, Vec::new(), None)
            }
        };

        let body = self.visit_block(catch.body);
        let mut stmts: Vec<Stmt> = prologue.into_iter().collect();
        stmts.push(Stmt::block(body, self.f.span));
        self.catch_frame_mut().handlers.push(Block::with_locals(handler_locals, stmts));
        new_catch
    }

    // ── Expressions ─────────────────────────────────────────────────────

    fn visit_expr(&mut self, expr: Expr) -> Expr {
        let hoisted = match &expr.kind {
            ExprKind::Local(local) => self.catch_frame().and_then(|frame| frame.hoisted(local.id)).cloned(),
            _ => None,
        };
        if let Some(hoisted) = hoisted {
            let ty = hoisted.ty.clone();
            return Expr::new(ExprKind::Local(hoisted), ty, expr.span);
        }
        let Expr { kind, ty, span } = expr;
        match kind {
            ExprKind::Lambda { params, body } => {
                // A lambda is its own method: fresh frames, nothing proxied.
                self.finally_frames.push(FinallyFrame::root());
                self.catch_frames.push(None);
                let body = self.visit_block(*body);
                self.catch_frames.pop();
                self.finally_frames.pop();
                Expr::new(ExprKind::Lambda { params, body: Box::new(body) }, ty, span)
            }
            kind => map_children(Expr::new(kind, ty, span), &mut |e| self.visit_expr(e)),
        }
    }
}
