// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Shorthand for building async methods that call into the host.
//!
//! Every external call targets the static class `Host`, so a
//! [`ScriptedHost`](crate::ScriptedHost) can answer it by name.

use std::ops::{Deref, DerefMut};

use tern_ast::{Block, Expr, LocalKind, LocalSymbol, MethodDecl, MethodRef, NodeFactory, Span, Stmt, Type};
use tern_async::locals_crossing_suspensions;

#[derive(Default)]
pub struct Dsl {
    f: NodeFactory,
}

impl Deref for Dsl {
    type Target = NodeFactory;

    fn deref(&self) -> &NodeFactory {
        &self.f
    }
}

impl DerefMut for Dsl {
    fn deref_mut(&mut self) -> &mut NodeFactory {
        &mut self.f
    }
}

pub fn host_type() -> Type {
    Type::class("Host")
}

impl Dsl {
    pub fn new() -> Self {
        Dsl::default()
    }

    /// A user local.
    pub fn var(&mut self, name: &str, ty: Type) -> LocalSymbol {
        self.f.local(name, ty, LocalKind::User)
    }

    /// `Host.name(args)`.
    pub fn host(&self, name: &str, ret: Type, args: Vec<Expr>) -> Expr {
        let params = args.iter().map(|a| a.ty.clone()).collect();
        let method = MethodRef::static_method(host_type(), name, params, ret);
        self.f.call(None, &method, args)
    }

    /// `Host.Log(value);`
    pub fn log_expr(&self, value: Expr) -> Stmt {
        self.f.expr_stmt(self.host("Log", Type::Void, vec![value]))
    }

    pub fn log(&self, marker: i64) -> Stmt {
        self.log_expr(self.f.int(marker))
    }

    /// `await Host.name()` on a `Task`.
    pub fn await_task_call(&self, name: &str) -> Expr {
        self.f.await_task(self.host(name, Type::task(), Vec::new()))
    }

    /// `await Host.name();`
    pub fn awaited(&self, name: &str) -> Stmt {
        self.f.expr_stmt(self.await_task_call(name))
    }

    /// `await Host.name()` on a `Task<int>`.
    pub fn await_int(&self, name: &str) -> Expr {
        self.f.await_task(self.host(name, Type::task_of(Type::Int), Vec::new()))
    }

    /// `throw new Exception(message);`
    pub fn throw_new(&self, message: &str) -> Stmt {
        self.f.throw(self.f.new_object(Type::exception(), vec![self.f.string(message)]))
    }

    /// A static async method on `C` with hoisting decided from `body`.
    pub fn method(&self, name: &str, return_ty: Type, body: Block) -> MethodDecl {
        let hoisted_locals = locals_crossing_suspensions(&body);
        MethodDecl {
            name: name.to_string(),
            container: Type::class("C"),
            is_static: true,
            is_async: true,
            params: Vec::new(),
            return_ty,
            body,
            hoisted_locals,
            span: Span::default(),
        }
    }
}
