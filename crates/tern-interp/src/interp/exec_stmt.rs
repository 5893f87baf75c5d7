// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Statement execution.
//!
//! A `goto` travels outward as [`Flow::Goto`] until it reaches a block
//! that contains its label, either directly or inside nested plain blocks.
//! Leaving a `try` on the way runs its `finally`. Entering a `try` body,
//! catch or finally from outside is never allowed.

use tern_ast::{Block, CatchBlock, Expr, LabelId, LabelSymbol, Stmt, StmtKind};

use crate::value::{ExceptionRef, Value};

use super::{Flow, Frame, Interpreter, RuntimeError};

impl Interpreter {
    /// Run a method body in a fresh frame.
    pub(crate) fn exec_body(&mut self, body: &Block, frame: Frame) -> Result<Flow, RuntimeError> {
        self.frames.push(frame);
        let flow = self.exec_block(body);
        self.frames.pop();
        match flow? {
            Flow::Goto(label) if contains_label(body, label.id) => {
                Err(RuntimeError::JumpIntoProtectedRegion(label.name))
            }
            Flow::Goto(label) => Err(RuntimeError::UnknownLabel(label.name)),
            flow => Ok(flow),
        }
    }

    pub(crate) fn exec_block(&mut self, block: &Block) -> Result<Flow, RuntimeError> {
        self.exec_block_at(block, Vec::new())
    }

    /// Run `block` from the statement `path` leads to. Every index but the
    /// last selects a nested block to enter.
    fn exec_block_at(&mut self, block: &Block, mut path: Vec<usize>) -> Result<Flow, RuntimeError> {
        let mut index = if path.is_empty() { 0 } else { path.remove(0) };
        while let Some(stmt) = block.stmts.get(index) {
            let flow = if path.is_empty() {
                self.exec_stmt(stmt)?
            } else {
                self.enter(stmt, std::mem::take(&mut path))?
            };
            match flow {
                Flow::Normal => index += 1,
                Flow::Goto(label) => match label_path(block, label.id) {
                    Some(mut target) => {
                        index = target.remove(0);
                        path = target;
                    }
                    None => return Ok(Flow::Goto(label)),
                },
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn enter(&mut self, stmt: &Stmt, path: Vec<usize>) -> Result<Flow, RuntimeError> {
        match &stmt.kind {
            StmtKind::Block(block) | StmtKind::ExtractedFinally(block) => self.exec_block_at(block, path),
            _ => bug!("label path enters a {:?}", stmt),
        }
    }

    pub(crate) fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Flow, RuntimeError> {
        self.step()?;
        match &stmt.kind {
            StmtKind::Block(block) | StmtKind::ExtractedFinally(block) => self.exec_block(block),
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
                Ok(Flow::Normal)
            }
            StmtKind::Label(_) | StmtKind::Nop => Ok(Flow::Normal),
            StmtKind::Goto(label) => Ok(Flow::Goto(label.clone())),
            StmtKind::CondGoto { cond, jump_if, label } => {
                if self.eval_bool(cond)? == *jump_if {
                    Ok(Flow::Goto(label.clone()))
                } else {
                    Ok(Flow::Normal)
                }
            }
            StmtKind::If { cond, then_branch, else_branch } => {
                if self.eval_bool(cond)? {
                    self.exec_stmt(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.exec_stmt(else_branch)
                } else {
                    Ok(Flow::Normal)
                }
            }
            StmtKind::Switch { value, cases, default } => {
                let value = self.eval_int(value)?;
                let target = cases.iter().find(|(case, _)| *case == value).map(|(_, label)| label);
                Ok(target.or(default.as_ref()).map_or(Flow::Normal, |label| Flow::Goto(label.clone())))
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(value) => self.eval(value)?,
                    None => Value::Void,
                };
                Ok(Flow::Return(value))
            }
            StmtKind::Throw(Some(value)) => match self.eval(value)? {
                Value::Exception(exception) => Err(RuntimeError::Thrown(exception)),
                Value::Null => Err(RuntimeError::throw("NullReferenceException", "throw of null")),
                other => Err(RuntimeError::TypeError(format!("cannot throw a value of type {}", other.type_name()))),
            },
            StmtKind::Throw(None) => match self.frame().caught.last() {
                Some(exception) => Err(RuntimeError::Thrown(exception.clone())),
                None => Err(RuntimeError::RethrowOutsideCatch),
            },
            StmtKind::Try { body, catches, finally, .. } => self.exec_try(body, catches, finally.as_ref()),
            StmtKind::YieldReturn(value) => self.yield_value(value),
            StmtKind::YieldBreak => Ok(Flow::Return(Value::Void)),
        }
    }

    fn exec_try(&mut self, body: &Block, catches: &[CatchBlock], finally: Option<&Block>) -> Result<Flow, RuntimeError> {
        let mut result = self.exec_block(body);
        if let Err(RuntimeError::Thrown(exception)) = &result {
            let exception = exception.clone();
            if let Some(handler) = self.select_handler(&exception, catches)? {
                self.frame_mut().caught.push(exception);
                result = self.exec_block(&handler.body);
                self.frame_mut().caught.pop();
            }
        }
        let Some(finally) = finally else {
            return result;
        };
        // Faults abandon execution; only exceptions unwind through finally.
        if matches!(&result, Err(err) if !matches!(err, RuntimeError::Thrown(_))) {
            return result;
        }
        match self.exec_block(finally)? {
            Flow::Normal => result,
            // A jump out of the finally replaces whatever was pending.
            flow => Ok(flow),
        }
    }

    /// The first catch that accepts `exception`, binding its variable and
    /// running its filter. An exception thrown by a filter counts as false.
    fn select_handler<'c>(
        &mut self,
        exception: &ExceptionRef,
        catches: &'c [CatchBlock],
    ) -> Result<Option<&'c CatchBlock>, RuntimeError> {
        for handler in catches {
            if !exception.is_instance_of(&handler.exception_ty) {
                continue;
            }
            if let Some(local) = &handler.local {
                self.frame_mut().locals.insert(local.id, Value::Exception(exception.clone()));
            }
            let Some(filter) = &handler.filter else {
                return Ok(Some(handler));
            };
            match self.eval_bool(filter) {
                Ok(true) => return Ok(Some(handler)),
                Ok(false) | Err(RuntimeError::Thrown(_)) => continue,
                Err(fault) => return Err(fault),
            }
        }
        Ok(None)
    }

    fn yield_value(&mut self, value: &Expr) -> Result<Flow, RuntimeError> {
        let value = self.eval(value)?;
        let Some(sink) = self.sink.as_mut() else {
            return Err(RuntimeError::Unsupported("yield return outside an iterator".to_string()));
        };
        sink.produced.push(value);
        let done = sink.take.is_some_and(|take| sink.produced.len() >= take);
        Ok(if done { Flow::Dispose } else { Flow::Normal })
    }
}

/// Path to the statement declaring `id`, through nested plain blocks only.
fn label_path(block: &Block, id: LabelId) -> Option<Vec<usize>> {
    block.stmts.iter().enumerate().find_map(|(i, stmt)| match &stmt.kind {
        StmtKind::Label(LabelSymbol { id: found, .. }) if *found == id => Some(vec![i]),
        StmtKind::Block(inner) | StmtKind::ExtractedFinally(inner) => label_path(inner, id).map(|mut path| {
            path.insert(0, i);
            path
        }),
        _ => None,
    })
}

/// True if `id` is declared anywhere in `block`, handlers included.
fn contains_label(block: &Block, id: LabelId) -> bool {
    block.stmts.iter().any(|stmt| tern_ast::walk::collect_labels(stmt).contains(&id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ScriptedHost;
    use tern_ast::{LocalKind, MethodRef, NodeFactory, Type};

    fn log(f: &NodeFactory, n: i64) -> Stmt {
        let method = MethodRef::static_method(Type::class("Host"), "Log", vec![Type::Int], Type::Void);
        f.expr_stmt(f.call(None, &method, vec![f.int(n)]))
    }

    fn run(body: Block) -> (Result<Flow, RuntimeError>, Vec<String>) {
        let mut interp = Interpreter::new(ScriptedHost::new());
        let flow = interp.exec_body(&body, Frame::default());
        (flow, interp.take_trace())
    }

    #[test]
    fn goto_into_nested_block() {
        let mut f = NodeFactory::new();
        let target = f.label("target");
        let body = Block::new(vec![
            f.goto(&target),
            log(&f, 1),
            f.block(vec![log(&f, 2), f.label_stmt(&target), log(&f, 3)]),
            log(&f, 4),
        ]);
        let (flow, trace) = run(body);
        assert!(matches!(flow, Ok(Flow::Normal)));
        assert_eq!(trace, vec!["Log(3)", "Log(4)"]);
    }

    #[test]
    fn backward_goto_loops() {
        let mut f = NodeFactory::new();
        let i = f.local("i", Type::Int, LocalKind::User);
        let top = f.label("top");
        let body = Block::with_locals(
            vec![i.clone()],
            vec![
                f.label_stmt(&top),
                f.assign_stmt(f.local_ref(&i), f.binary(tern_ast::BinOp::Add, f.local_ref(&i), f.int(1), Type::Int)),
                f.cond_goto(f.lt(f.local_ref(&i), f.int(3)), true, &top),
                f.ret(Some(f.local_ref(&i))),
            ],
        );
        let (flow, _) = run(body);
        assert!(matches!(flow, Ok(Flow::Return(Value::Int(3)))));
    }

    #[test]
    fn goto_out_of_try_runs_finally() {
        let mut f = NodeFactory::new();
        let out = f.label("out");
        let guarded = f.try_finally(Block::new(vec![f.goto(&out), log(&f, 1)]), Block::new(vec![log(&f, 2)]));
        let (flow, trace) = run(Block::new(vec![guarded, log(&f, 3), f.label_stmt(&out), log(&f, 4)]));
        assert!(matches!(flow, Ok(Flow::Normal)));
        assert_eq!(trace, vec!["Log(2)", "Log(4)"]);
    }

    #[test]
    fn goto_into_try_is_a_fault() {
        let mut f = NodeFactory::new();
        let inside = f.label("inside");
        let guarded = f.try_finally(Block::new(vec![f.label_stmt(&inside)]), Block::default());
        let (flow, _) = run(Block::new(vec![f.goto(&inside), guarded]));
        assert!(matches!(flow, Err(RuntimeError::JumpIntoProtectedRegion(name)) if name == inside.name));
    }

    #[test]
    fn filter_rejects_and_next_catch_handles() {
        let f = NodeFactory::new();
        let throw = f.throw(f.new_object(Type::class("InvalidOperationException"), vec![f.string("x")]));
        let mut rejecting = f.catch_all(None, Block::new(vec![log(&f, 1)]));
        rejecting.filter = Some(f.bool_lit(false));
        let accepting = f.catch_all(None, Block::new(vec![log(&f, 2)]));
        let stmt = f.try_stmt(Block::new(vec![throw]), vec![rejecting, accepting], Some(Block::new(vec![log(&f, 3)])));
        let (flow, trace) = run(Block::new(vec![stmt]));
        assert!(matches!(flow, Ok(Flow::Normal)));
        assert_eq!(trace, vec!["Log(2)", "Log(3)"]);
    }

    #[test]
    fn rethrow_keeps_the_exception() {
        let f = NodeFactory::new();
        let throw = f.throw(f.new_object(Type::exception(), vec![f.string("boom")]));
        let inner = f.try_stmt(Block::new(vec![throw]), vec![f.catch_all(None, Block::new(vec![f.rethrow()]))], None);
        let (flow, _) = run(Block::new(vec![inner]));
        assert!(matches!(flow, Err(RuntimeError::Thrown(e)) if e.message == "boom"));
    }

    #[test]
    fn return_from_finally_discards_exception() {
        let f = NodeFactory::new();
        let throw = f.throw(f.new_object(Type::exception(), Vec::new()));
        let stmt = f.try_finally(Block::new(vec![throw]), Block::new(vec![f.ret(Some(f.int(5)))]));
        let (flow, _) = run(Block::new(vec![stmt]));
        assert!(matches!(flow, Ok(Flow::Return(Value::Int(5)))));
    }
}
