// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! C#-like rendering of the typed tree.

use std::fmt::{self, Write};

use crate::decl::MethodDecl;
use crate::expr::{BinOp, Const, Expr, ExprKind, LogicalOp, UnaryOp};
use crate::stmt::{Block, Stmt, StmtKind};

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Const::Null => write!(f, "null"),
            Const::Bool(b) => write!(f, "{}", b),
            Const::Int(n) => write!(f, "{}", n),
            Const::Str(s) => write!(f, "{:?}", s),
        }
    }
}

fn comma_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Literal(c) => write!(f, "{}", c),
            ExprKind::Local(local) => write!(f, "{}", local.name),
            ExprKind::Param(param) => write!(f, "{}", param.name),
            ExprKind::This => write!(f, "this"),
            ExprKind::Field { receiver: Some(receiver), field } => write!(f, "{}.{}", receiver, field.name),
            ExprKind::Field { receiver: None, field } => write!(f, "{}.{}", field.container, field.name),
            ExprKind::ArrayElement { array, index } => write!(f, "{}[{}]", array, index),
            ExprKind::Call { receiver, method, args } => {
                match receiver {
                    Some(receiver) => write!(f, "{}.{}", receiver, method.name)?,
                    None => write!(f, "{}.{}", method.container, method.name)?,
                }
                if !method.type_args.is_empty() {
                    write!(f, "<")?;
                    for (i, arg) in method.type_args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", arg)?;
                    }
                    write!(f, ">")?;
                }
                write!(f, "(")?;
                comma_list(f, args)?;
                write!(f, ")")
            }
            ExprKind::New { args } => {
                write!(f, "new {}(", self.ty)?;
                comma_list(f, args)?;
                write!(f, ")")
            }
            ExprKind::ArrayInit { elements } => {
                write!(f, "new {} {{ ", self.ty)?;
                comma_list(f, elements)?;
                write!(f, " }}")
            }
            ExprKind::Binary { op, left, right } => write!(f, "({} {} {})", left, op, right),
            ExprKind::Logical { op, left, right } => {
                let op = match op {
                    LogicalOp::And => "&&",
                    LogicalOp::Or => "||",
                };
                write!(f, "({} {} {})", left, op, right)
            }
            ExprKind::Unary { op: UnaryOp::Neg, operand } => write!(f, "-{}", operand),
            ExprKind::Unary { op: UnaryOp::Not, operand } => write!(f, "!{}", operand),
            ExprKind::Coalesce { left, right } => write!(f, "({} ?? {})", left, right),
            ExprKind::Conditional { cond, when_true, when_false } => {
                write!(f, "({} ? {} : {})", cond, when_true, when_false)
            }
            ExprKind::ConditionalAccess { id, receiver, access } => {
                write!(f, "({} is var $r{} ? {} : default)", receiver, id, access)
            }
            ExprKind::ConditionalReceiver { id } => write!(f, "$r{}", id),
            ExprKind::Assign { target, value, is_ref: false } => write!(f, "{} = {}", target, value),
            ExprKind::Assign { target, value, is_ref: true } => write!(f, "{} = ref {}", target, value),
            ExprKind::Sequence { side_effects, value, .. } => {
                write!(f, "(")?;
                for effect in side_effects {
                    write!(f, "{}, ", effect)?;
                }
                write!(f, "{})", value)
            }
            ExprKind::Await { operand, .. } => write!(f, "await {}", operand),
            ExprKind::Lambda { params, body } => {
                write!(f, "(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p.name)?;
                }
                write!(f, ") => {{ {} statement(s) }}", body.stmts.len())
            }
            ExprKind::Default => write!(f, "default({})", self.ty),
        }
    }
}

/// Indenting statement printer.
struct Printer {
    out: String,
    indent: usize,
}

impl Printer {
    fn new() -> Self {
        Printer { out: String::new(), indent: 0 }
    }

    fn line(&mut self, text: impl fmt::Display) {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        let _ = writeln!(self.out, "{}", text);
    }

    fn block(&mut self, header: &str, block: &Block) {
        self.line(format_args!("{}{{", header));
        self.indent += 1;
        for local in &block.locals {
            self.line(format_args!("{} {};", local.ty, local.name));
        }
        for stmt in &block.stmts {
            self.stmt(stmt);
        }
        self.indent -= 1;
        self.line("}");
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Block(block) => self.block("", block),
            StmtKind::Expr(expr) => self.line(format_args!("{};", expr)),
            StmtKind::Label(label) => {
                self.indent = self.indent.saturating_sub(1);
                self.line(format_args!("{}:", label.name));
                self.indent += 1;
            }
            StmtKind::Goto(label) => self.line(format_args!("goto {};", label.name)),
            StmtKind::CondGoto { cond, jump_if: true, label } => {
                self.line(format_args!("if ({}) goto {};", cond, label.name))
            }
            StmtKind::CondGoto { cond, jump_if: false, label } => {
                self.line(format_args!("if (!{}) goto {};", cond, label.name))
            }
            StmtKind::If { cond, then_branch, else_branch } => {
                self.line(format_args!("if ({})", cond));
                self.nested(then_branch);
                if let Some(else_branch) = else_branch {
                    self.line("else");
                    self.nested(else_branch);
                }
            }
            StmtKind::Switch { value, cases, default } => {
                self.line(format_args!("switch ({}) {{", value));
                self.indent += 1;
                for (case, label) in cases {
                    self.line(format_args!("case {}: goto {};", case, label.name));
                }
                if let Some(label) = default {
                    self.line(format_args!("default: goto {};", label.name));
                }
                self.indent -= 1;
                self.line("}");
            }
            StmtKind::Return(None) => self.line("return;"),
            StmtKind::Return(Some(value)) => self.line(format_args!("return {};", value)),
            StmtKind::Throw(None) => self.line("throw;"),
            StmtKind::Throw(Some(value)) => self.line(format_args!("throw {};", value)),
            StmtKind::Try { body, catches, finally, finally_label } => {
                match finally_label {
                    Some(label) => self.block(&format!("try /* finally at {} */ ", label.name), body),
                    None => self.block("try ", body),
                }
                for catch in catches {
                    let mut header = format!("catch ({}", catch.exception_ty);
                    if let Some(local) = &catch.local {
                        header.push(' ');
                        header.push_str(&local.name);
                    }
                    header.push(')');
                    if let Some(filter) = &catch.filter {
                        let _ = write!(header, " when ({})", filter);
                    }
                    header.push(' ');
                    self.block(&header, &catch.body);
                }
                if let Some(finally) = finally {
                    self.block("finally ", finally);
                }
            }
            StmtKind::ExtractedFinally(block) => self.block("extracted finally ", block),
            StmtKind::YieldReturn(value) => self.line(format_args!("yield return {};", value)),
            StmtKind::YieldBreak => self.line("yield break;"),
            StmtKind::Nop => self.line(";"),
        }
    }

    fn nested(&mut self, stmt: &Stmt) {
        if matches!(stmt.kind, StmtKind::Block(_)) {
            self.stmt(stmt);
        } else {
            self.indent += 1;
            self.stmt(stmt);
            self.indent -= 1;
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut p = Printer::new();
        p.stmt(self);
        f.write_str(&p.out)
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut p = Printer::new();
        p.block("", self);
        f.write_str(&p.out)
    }
}

impl fmt::Display for MethodDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut header = String::new();
        if self.is_static {
            header.push_str("static ");
        }
        if self.is_async {
            header.push_str("async ");
        }
        let _ = write!(header, "{} {}.{}(", self.return_ty, self.container, self.name);
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                header.push_str(", ");
            }
            let _ = write!(header, "{} {}", p.ty, p.name);
        }
        header.push_str(") ");
        let mut p = Printer::new();
        p.block(&header, &self.body);
        f.write_str(&p.out)
    }
}

#[cfg(test)]
mod tests {
    use crate::factory::NodeFactory;
    use crate::stmt::Block;
    use crate::types::Type;
    use crate::{BinOp, LocalKind};

    #[test]
    fn renders_await_assignment() {
        let mut f = NodeFactory::new();
        let x = f.local("x", Type::Int, LocalKind::User);
        let t = f.local("t", Type::task_of(Type::Int), LocalKind::User);
        let sum = f.binary(BinOp::Add, f.int(1), f.await_task(f.local_ref(&t)), Type::Int);
        let stmt = f.assign_stmt(f.local_ref(&x), sum);
        assert_eq!(stmt.to_string(), "x = (1 + await t);\n");
    }

    #[test]
    fn renders_try_finally_with_indent() {
        let f = NodeFactory::new();
        let stmt = f.try_finally(Block::new(vec![f.ret(None)]), Block::new(vec![f.expr_stmt(f.int(0))]));
        assert_eq!(stmt.to_string(), "try {\n    return;\n}\nfinally {\n    0;\n}\n");
    }
}
