// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Node factory for compiler-generated trees.
//!
//! Every synthesized node takes the factory's current span, which a rewriter
//! points at the source node it is replacing.

use crate::decl::MethodDecl;
use crate::expr::{AwaitInfo, BinOp, Const, Expr, ExprKind, LogicalOp, UnaryOp};
use crate::stmt::{Block, CatchBlock, Stmt, StmtKind};
use crate::symbols::{FieldRef, LabelId, LabelSymbol, LocalId, LocalKind, LocalSymbol, MethodRef, ParamSymbol};
use crate::types::{Type, TypeKind};
use crate::walk::{walk_block, walk_expr, walk_stmt, Visitor};
use crate::Span;

/// Synthesized ids start here at the lowest, well above binder-assigned ids.
pub const SYNTHETIC_ID_BASE: u32 = 1_000_000;

pub struct NodeFactory {
    next_local: u32,
    next_label: u32,
    pub span: Span,
}

impl Default for NodeFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeFactory {
    pub fn new() -> Self {
        NodeFactory { next_local: SYNTHETIC_ID_BASE, next_label: SYNTHETIC_ID_BASE, span: Span::default() }
    }

    /// A factory whose fresh ids cannot collide with any id in `method`.
    pub fn for_method(method: &MethodDecl) -> Self {
        let mut scan = IdScanner { max_local: 0, max_label: 0 };
        scan.visit_block(&method.body);
        for id in &method.hoisted_locals {
            scan.max_local = scan.max_local.max(id.0);
        }
        NodeFactory {
            next_local: SYNTHETIC_ID_BASE.max(scan.max_local + 1),
            next_label: SYNTHETIC_ID_BASE.max(scan.max_label + 1),
            span: method.span,
        }
    }

    // ── Symbols ─────────────────────────────────────────────────────────

    pub fn local(&mut self, name: &str, ty: Type, kind: LocalKind) -> LocalSymbol {
        let id = LocalId(self.next_local);
        self.next_local += 1;
        let name = match kind {
            LocalKind::User => name.to_string(),
            LocalKind::Spill | LocalKind::Synthesized => format!("{}{}", name, id.0 - SYNTHETIC_ID_BASE),
        };
        LocalSymbol { id, name, ty, kind, is_ref: false }
    }

    pub fn spill_temp(&mut self, ty: Type) -> LocalSymbol {
        self.local("spill", ty, LocalKind::Spill)
    }

    pub fn synthesized(&mut self, name: &str, ty: Type) -> LocalSymbol {
        self.local(name, ty, LocalKind::Synthesized)
    }

    pub fn label(&mut self, name: &str) -> LabelSymbol {
        let id = LabelId(self.next_label);
        self.next_label += 1;
        LabelSymbol { id, name: format!("{}{}", name, id.0 - SYNTHETIC_ID_BASE) }
    }

    // ── Expressions ─────────────────────────────────────────────────────

    pub fn expr(&self, kind: ExprKind, ty: Type) -> Expr {
        Expr::new(kind, ty, self.span)
    }

    pub fn int(&self, value: i64) -> Expr {
        self.expr(ExprKind::Literal(Const::Int(value)), Type::Int)
    }

    pub fn bool_lit(&self, value: bool) -> Expr {
        self.expr(ExprKind::Literal(Const::Bool(value)), Type::Bool)
    }

    pub fn string(&self, value: &str) -> Expr {
        self.expr(ExprKind::Literal(Const::Str(value.to_string())), Type::String)
    }

    pub fn null(&self, ty: Type) -> Expr {
        self.expr(ExprKind::Literal(Const::Null), ty)
    }

    pub fn default_of(&self, ty: Type) -> Expr {
        self.expr(ExprKind::Default, ty)
    }

    pub fn local_ref(&self, local: &LocalSymbol) -> Expr {
        self.expr(ExprKind::Local(local.clone()), local.ty.clone())
    }

    pub fn param_ref(&self, param: &ParamSymbol) -> Expr {
        self.expr(ExprKind::Param(param.clone()), param.ty.clone())
    }

    pub fn this(&self, ty: Type) -> Expr {
        self.expr(ExprKind::This, ty)
    }

    pub fn field(&self, receiver: Option<Expr>, field: &FieldRef) -> Expr {
        self.expr(
            ExprKind::Field { receiver: receiver.map(Box::new), field: field.clone() },
            field.ty.clone(),
        )
    }

    pub fn call(&self, receiver: Option<Expr>, method: &MethodRef, args: Vec<Expr>) -> Expr {
        self.expr(
            ExprKind::Call { receiver: receiver.map(Box::new), method: method.clone(), args },
            method.ret.clone(),
        )
    }

    pub fn static_call(&self, method: &MethodRef, args: Vec<Expr>) -> Expr {
        self.call(None, method, args)
    }

    pub fn new_object(&self, ty: Type, args: Vec<Expr>) -> Expr {
        self.expr(ExprKind::New { args }, ty)
    }

    pub fn binary(&self, op: BinOp, left: Expr, right: Expr, ty: Type) -> Expr {
        self.expr(ExprKind::Binary { op, left: Box::new(left), right: Box::new(right) }, ty)
    }

    pub fn eq(&self, left: Expr, right: Expr) -> Expr {
        self.binary(BinOp::Eq, left, right, Type::Bool)
    }

    pub fn ne(&self, left: Expr, right: Expr) -> Expr {
        self.binary(BinOp::Ne, left, right, Type::Bool)
    }

    pub fn lt(&self, left: Expr, right: Expr) -> Expr {
        self.binary(BinOp::Lt, left, right, Type::Bool)
    }

    pub fn not(&self, operand: Expr) -> Expr {
        self.expr(ExprKind::Unary { op: UnaryOp::Not, operand: Box::new(operand) }, Type::Bool)
    }

    pub fn logical(&self, op: LogicalOp, left: Expr, right: Expr) -> Expr {
        self.expr(ExprKind::Logical { op, left: Box::new(left), right: Box::new(right) }, Type::Bool)
    }

    pub fn assign(&self, target: Expr, value: Expr) -> Expr {
        let ty = target.ty.clone();
        self.expr(ExprKind::Assign { target: Box::new(target), value: Box::new(value), is_ref: false }, ty)
    }

    pub fn sequence(&self, locals: Vec<LocalSymbol>, side_effects: Vec<Expr>, value: Expr) -> Expr {
        let ty = value.ty.clone();
        self.expr(ExprKind::Sequence { locals, side_effects, value: Box::new(value) }, ty)
    }

    pub fn await_expr(&self, operand: Expr, info: AwaitInfo, result_ty: Type) -> Expr {
        self.expr(ExprKind::Await { operand: Box::new(operand), info: Box::new(info) }, result_ty)
    }

    /// `await operand` for the task and value-task types, bound to their
    /// standard awaiters.
    pub fn await_task(&self, operand: Expr) -> Expr {
        let (info, result_ty) = task_await_info(&operand.ty);
        self.await_expr(operand, info, result_ty)
    }

    // ── Statements ──────────────────────────────────────────────────────

    pub fn stmt(&self, kind: StmtKind) -> Stmt {
        Stmt::new(kind, self.span)
    }

    pub fn expr_stmt(&self, expr: Expr) -> Stmt {
        self.stmt(StmtKind::Expr(expr))
    }

    pub fn assign_stmt(&self, target: Expr, value: Expr) -> Stmt {
        self.expr_stmt(self.assign(target, value))
    }

    pub fn label_stmt(&self, label: &LabelSymbol) -> Stmt {
        self.stmt(StmtKind::Label(label.clone()))
    }

    pub fn goto(&self, label: &LabelSymbol) -> Stmt {
        self.stmt(StmtKind::Goto(label.clone()))
    }

    pub fn cond_goto(&self, cond: Expr, jump_if: bool, label: &LabelSymbol) -> Stmt {
        self.stmt(StmtKind::CondGoto { cond, jump_if, label: label.clone() })
    }

    pub fn if_then(&self, cond: Expr, then_branch: Stmt) -> Stmt {
        self.stmt(StmtKind::If { cond, then_branch: Box::new(then_branch), else_branch: None })
    }

    pub fn if_else(&self, cond: Expr, then_branch: Stmt, else_branch: Stmt) -> Stmt {
        self.stmt(StmtKind::If {
            cond,
            then_branch: Box::new(then_branch),
            else_branch: Some(Box::new(else_branch)),
        })
    }

    pub fn ret(&self, value: Option<Expr>) -> Stmt {
        self.stmt(StmtKind::Return(value))
    }

    pub fn throw(&self, value: Expr) -> Stmt {
        self.stmt(StmtKind::Throw(Some(value)))
    }

    pub fn rethrow(&self) -> Stmt {
        self.stmt(StmtKind::Throw(None))
    }

    pub fn block(&self, stmts: Vec<Stmt>) -> Stmt {
        self.stmt(StmtKind::Block(Block::new(stmts)))
    }

    pub fn block_with(&self, locals: Vec<LocalSymbol>, stmts: Vec<Stmt>) -> Stmt {
        self.stmt(StmtKind::Block(Block::with_locals(locals, stmts)))
    }

    pub fn switch(&self, value: Expr, cases: Vec<(i64, LabelSymbol)>, default: Option<LabelSymbol>) -> Stmt {
        self.stmt(StmtKind::Switch { value, cases, default })
    }

    /// A switch whose cases run statement lists and then leave the switch.
    pub fn switch_sections(&mut self, value: Expr, sections: Vec<(i64, Vec<Stmt>)>) -> Stmt {
        let end = self.label("switchEnd");
        let mut cases = Vec::with_capacity(sections.len());
        let mut bodies = Vec::new();
        for (case, stmts) in sections {
            let label = self.label("case");
            bodies.push(self.label_stmt(&label));
            let falls_through = stmts.last().map_or(true, |s| !s.is_jump());
            bodies.extend(stmts);
            if falls_through {
                bodies.push(self.goto(&end));
            }
            cases.push((case, label));
        }
        let mut stmts = vec![self.switch(value, cases, None), self.goto(&end)];
        stmts.extend(bodies);
        stmts.push(self.label_stmt(&end));
        self.block(stmts)
    }

    pub fn try_stmt(&self, body: Block, catches: Vec<CatchBlock>, finally: Option<Block>) -> Stmt {
        self.stmt(StmtKind::Try { body, catches, finally, finally_label: None })
    }

    pub fn try_finally(&self, body: Block, finally: Block) -> Stmt {
        self.try_stmt(body, Vec::new(), Some(finally))
    }

    pub fn catch_all(&self, local: Option<LocalSymbol>, body: Block) -> CatchBlock {
        CatchBlock { local, exception_ty: Type::exception(), filter: None, body }
    }

    pub fn yield_return(&self, value: Expr) -> Stmt {
        self.stmt(StmtKind::YieldReturn(value))
    }

    pub fn yield_break(&self) -> Stmt {
        self.stmt(StmtKind::YieldBreak)
    }
}

/// Awaiter pattern of `Task`, `Task<T>`, `ValueTask` and `ValueTask<T>`.
/// Any other operand type gets an empty pattern.
pub fn task_await_info(task_ty: &Type) -> (AwaitInfo, Type) {
    let (awaiter_name, result) = match task_ty {
        Type::Named { name, args, .. } if name == "Task" || name == "ValueTask" => {
            let awaiter = if name == "Task" { "TaskAwaiter" } else { "ValueTaskAwaiter" };
            (Some(awaiter), args.first().cloned())
        }
        _ => (None, None),
    };
    let Some(awaiter_name) = awaiter_name else {
        return (
            AwaitInfo {
                get_awaiter: None,
                is_completed: None,
                get_result: None,
                awaiter_ty: Type::Object,
                is_critical: false,
            },
            Type::Object,
        );
    };
    let awaiter_ty = Type::named(
        awaiter_name,
        result.iter().cloned().collect(),
        TypeKind::Struct,
    );
    let result_ty = result.unwrap_or(Type::Void);
    let info = AwaitInfo {
        get_awaiter: Some(MethodRef::instance(task_ty.clone(), "GetAwaiter", Vec::new(), awaiter_ty.clone())),
        is_completed: Some(MethodRef::instance(awaiter_ty.clone(), "get_IsCompleted", Vec::new(), Type::Bool)),
        get_result: Some(MethodRef::instance(awaiter_ty.clone(), "GetResult", Vec::new(), result_ty.clone())),
        awaiter_ty,
        is_critical: true,
    };
    (info, result_ty)
}

struct IdScanner {
    max_local: u32,
    max_label: u32,
}

impl IdScanner {
    fn label(&mut self, label: &LabelSymbol) {
        self.max_label = self.max_label.max(label.id.0);
    }
}

impl Visitor for IdScanner {
    fn visit_local(&mut self, local: &LocalSymbol) {
        self.max_local = self.max_local.max(local.id.0);
    }

    fn visit_block(&mut self, block: &Block) {
        for local in &block.locals {
            self.visit_local(local);
        }
        walk_block(self, block)
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Label(label) | StmtKind::Goto(label) | StmtKind::CondGoto { label, .. } => self.label(label),
            StmtKind::Switch { cases, default, .. } => {
                for (_, label) in cases {
                    self.label(label);
                }
                if let Some(label) = default {
                    self.label(label);
                }
            }
            StmtKind::Try { finally_label: Some(label), .. } => self.label(label),
            _ => {}
        }
        walk_stmt(self, stmt)
    }

    fn visit_expr(&mut self, expr: &Expr) {
        if let ExprKind::Sequence { locals, .. } = &expr.kind {
            for local in locals {
                self.visit_local(local);
            }
        }
        walk_expr(self, expr)
    }
}
