// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Expression evaluation.

use std::cell::RefCell;
use std::rc::Rc;

use tern_ast::{AwaitInfo, BinOp, Const, Expr, ExprKind, FieldRef, LogicalOp, UnaryOp};
use tern_async::FieldRole;

use crate::value::{Value, ValueTask};

use super::{Interpreter, RuntimeError};

impl Interpreter {
    pub(crate) fn eval(&mut self, expr: &Expr) -> Result<Value, RuntimeError> {
        match &expr.kind {
            ExprKind::Literal(c) => Ok(match c {
                Const::Null => Value::Null,
                Const::Bool(b) => Value::Bool(*b),
                Const::Int(n) => Value::Int(*n),
                Const::Str(s) => Value::Str(s.clone()),
            }),
            ExprKind::Local(local) => {
                Ok(self.frame().locals.get(&local.id).cloned().unwrap_or_else(|| Value::default_of(&local.ty)))
            }
            ExprKind::Param(param) => match self.frame().params.get(param.index as usize) {
                Some(value) => Ok(value.clone()),
                None => Err(RuntimeError::TypeError(format!("missing argument `{}`", param.name))),
            },
            ExprKind::This => match &self.frame().this {
                Some(this) => Ok(this.clone()),
                None => Err(RuntimeError::TypeError("`this` in a static method".to_string())),
            },
            ExprKind::Field { receiver, field } => {
                let receiver = match receiver {
                    Some(receiver) => Some(self.eval(receiver)?),
                    None => None,
                };
                self.load_field(receiver, field)
            }
            ExprKind::ArrayElement { array, index } => {
                let array = self.eval(array)?;
                let index = self.eval_int(index)?;
                let Value::Array(items) = array else {
                    return Err(RuntimeError::TypeError(format!("cannot index {}", array.type_name())));
                };
                let item = usize::try_from(index).ok().and_then(|i| items.borrow().get(i).cloned());
                item.ok_or_else(|| RuntimeError::throw("IndexOutOfRangeException", format!("index {}", index)))
            }
            ExprKind::Call { receiver, method, args } => {
                let receiver = match receiver {
                    Some(receiver) => Some(self.eval(receiver)?),
                    None => None,
                };
                let args = self.eval_args(args)?;
                self.call(receiver, method, args)
            }
            ExprKind::New { args } => {
                let args = self.eval_args(args)?;
                self.construct(&expr.ty, args)
            }
            ExprKind::ArrayInit { elements } => {
                let items = self.eval_args(elements)?;
                Ok(Value::Array(Rc::new(RefCell::new(items))))
            }
            ExprKind::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary(*op, left, right)
            }
            ExprKind::Logical { op, left, right } => {
                let left = self.eval_bool(left)?;
                let value = match op {
                    LogicalOp::And if !left => false,
                    LogicalOp::Or if left => true,
                    _ => self.eval_bool(right)?,
                };
                Ok(Value::Bool(value))
            }
            ExprKind::Unary { op, operand } => match (op, self.eval(operand)?) {
                (UnaryOp::Neg, Value::Int(n)) => Ok(Value::Int(n.wrapping_neg())),
                (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                (op, value) => Err(RuntimeError::TypeError(format!("cannot apply {:?} to {}", op, value.type_name()))),
            },
            ExprKind::Coalesce { left, right } => match self.eval(left)? {
                Value::Null => self.eval(right),
                value => Ok(value),
            },
            ExprKind::Conditional { cond, when_true, when_false } => {
                if self.eval_bool(cond)? {
                    self.eval(when_true)
                } else {
                    self.eval(when_false)
                }
            }
            ExprKind::ConditionalAccess { id, receiver, access } => {
                let receiver = self.eval(receiver)?;
                if receiver.is_null() {
                    return Ok(Value::default_of(&expr.ty));
                }
                self.frame_mut().receivers.insert(*id, receiver);
                let value = self.eval(access);
                self.frame_mut().receivers.remove(id);
                value
            }
            ExprKind::ConditionalReceiver { id } => match self.frame().receivers.get(id) {
                Some(receiver) => Ok(receiver.clone()),
                None => Err(RuntimeError::TypeError(format!("conditional receiver {} is not bound", id))),
            },
            ExprKind::Assign { target, value, .. } => self.assign(target, value),
            ExprKind::Sequence { locals, side_effects, value } => {
                for local in locals {
                    self.frame_mut().locals.insert(local.id, Value::default_of(&local.ty));
                }
                for effect in side_effects {
                    self.eval(effect)?;
                }
                self.eval(value)
            }
            ExprKind::Await { operand, info } => self.await_value(operand, info),
            ExprKind::Lambda { .. } => Err(RuntimeError::Unsupported("lambda expressions".to_string())),
            ExprKind::Default => Ok(Value::default_of(&expr.ty)),
        }
    }

    pub(crate) fn eval_args(&mut self, args: &[Expr]) -> Result<Vec<Value>, RuntimeError> {
        args.iter().map(|arg| self.eval(arg)).collect()
    }

    pub(crate) fn eval_bool(&mut self, expr: &Expr) -> Result<bool, RuntimeError> {
        let value = self.eval(expr)?;
        value
            .as_bool()
            .ok_or_else(|| RuntimeError::TypeError(format!("expected bool, found {}", value.type_name())))
    }

    pub(crate) fn eval_int(&mut self, expr: &Expr) -> Result<i64, RuntimeError> {
        let value = self.eval(expr)?;
        value
            .as_int()
            .ok_or_else(|| RuntimeError::TypeError(format!("expected int, found {}", value.type_name())))
    }

    /// Targets are evaluated before the value, left to right.
    fn assign(&mut self, target: &Expr, value: &Expr) -> Result<Value, RuntimeError> {
        match &target.kind {
            ExprKind::Local(local) => {
                let value = self.eval(value)?;
                self.frame_mut().locals.insert(local.id, value.clone());
                Ok(value)
            }
            ExprKind::Param(param) => {
                let value = self.eval(value)?;
                let params = &mut self.frame_mut().params;
                let index = param.index as usize;
                if params.len() <= index {
                    params.resize(index + 1, Value::Null);
                }
                params[index] = value.clone();
                Ok(value)
            }
            ExprKind::Field { receiver: Some(receiver), field } => {
                let receiver = self.eval(receiver)?;
                let value = self.eval(value)?;
                self.store_field(receiver, field, value.clone())?;
                Ok(value)
            }
            ExprKind::Field { receiver: None, field } => {
                let value = self.eval(value)?;
                self.statics.insert(static_key(field), value.clone());
                Ok(value)
            }
            ExprKind::ArrayElement { array, index } => {
                let array = self.eval(array)?;
                let index = self.eval_int(index)?;
                let value = self.eval(value)?;
                let Value::Array(items) = array else {
                    return Err(RuntimeError::TypeError(format!("cannot index {}", array.type_name())));
                };
                let mut items = items.borrow_mut();
                match usize::try_from(index).ok().and_then(|i| items.get_mut(i)) {
                    Some(slot) => *slot = value.clone(),
                    None => return Err(RuntimeError::throw("IndexOutOfRangeException", format!("index {}", index))),
                }
                Ok(value)
            }
            _ => Err(RuntimeError::TypeError(format!("cannot assign to {}", target))),
        }
    }

    fn load_field(&mut self, receiver: Option<Value>, field: &FieldRef) -> Result<Value, RuntimeError> {
        match receiver {
            None => Ok(self.statics.get(&static_key(field)).cloned().unwrap_or_else(|| Value::default_of(&field.ty))),
            Some(Value::Object(obj)) => {
                let obj = obj.borrow();
                Ok(obj.fields.get(&field.name).cloned().unwrap_or_else(|| Value::default_of(&field.ty)))
            }
            Some(Value::Null) => Err(RuntimeError::throw("NullReferenceException", format!("read of `{}`", field.name))),
            Some(other) => Err(RuntimeError::TypeError(format!("{} has no field `{}`", other.type_name(), field.name))),
        }
    }

    /// Store into an object field. A machine's awaiter field may only hold
    /// one live awaiter at a time.
    fn store_field(&mut self, receiver: Value, field: &FieldRef, value: Value) -> Result<(), RuntimeError> {
        let obj = match receiver {
            Value::Object(obj) => obj,
            Value::Null => {
                return Err(RuntimeError::throw("NullReferenceException", format!("write of `{}`", field.name)))
            }
            other => {
                return Err(RuntimeError::TypeError(format!("{} has no field `{}`", other.type_name(), field.name)))
            }
        };
        if let Some(machine) = self.machine_of(&obj) {
            let is_awaiter = machine.field_named(&field.name).is_some_and(|def| def.role == FieldRole::Awaiter);
            let occupied = matches!(obj.borrow().fields.get(&field.name), Some(Value::Awaiter(_)));
            if is_awaiter && occupied && matches!(value, Value::Awaiter(_)) {
                return Err(RuntimeError::AwaiterInFlight { field: field.name.clone() });
            }
        }
        obj.borrow_mut().fields.insert(field.name.clone(), value);
        Ok(())
    }

    /// `await` as written: block on the awaiter, pumping the scheduler.
    fn await_value(&mut self, operand: &Expr, info: &AwaitInfo) -> Result<Value, RuntimeError> {
        let (Some(get_awaiter), Some(is_completed), Some(get_result)) =
            (info.get_awaiter.as_ref(), info.is_completed.as_ref(), info.get_result.as_ref())
        else {
            return Err(RuntimeError::Unsupported(format!("await of {} without an awaiter pattern", operand.ty)));
        };
        let awaitable = self.eval(operand)?;
        let awaiter = self.call(Some(awaitable), get_awaiter, Vec::new())?;
        loop {
            let done = self.call(Some(awaiter.clone()), is_completed, Vec::new())?;
            if done.as_bool() == Some(true) {
                break;
            }
            if !self.pump()? {
                return Err(RuntimeError::Deadlock);
            }
        }
        self.call(Some(awaiter), get_result, Vec::new())
    }

    /// The result of a task or value task, waiting for it if needed.
    pub(crate) fn block_on(&mut self, awaitable: Value) -> Result<Value, RuntimeError> {
        match awaitable {
            Value::Task(task) => {
                self.wait_for(&task)?;
                super::call::task_result(&task)
            }
            Value::ValueTask(vt) => match &*vt {
                ValueTask::Ready(value) => Ok(value.clone()),
                ValueTask::Source { .. } => self.resolve_value_task(Value::ValueTask(vt.clone())),
            },
            other => Err(RuntimeError::TypeError(format!("cannot await {}", other.type_name()))),
        }
    }
}

fn static_key(field: &FieldRef) -> String {
    format!("{}.{}", field.container, field.name)
}

fn binary(op: BinOp, left: Value, right: Value) -> Result<Value, RuntimeError> {
    use BinOp::*;
    let value = match (op, &left, &right) {
        (Eq, _, _) => Value::Bool(left == right),
        (Ne, _, _) => Value::Bool(left != right),
        (Add, Value::Str(a), b) => Value::Str(format!("{}{}", a, text(b))),
        (Add, a, Value::Str(b)) => Value::Str(format!("{}{}", text(a), b)),
        (_, Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            match op {
                Add => Value::Int(a.wrapping_add(b)),
                Sub => Value::Int(a.wrapping_sub(b)),
                Mul => Value::Int(a.wrapping_mul(b)),
                Div | Rem if b == 0 => return Err(RuntimeError::throw("DivideByZeroException", "")),
                Div => Value::Int(a.wrapping_div(b)),
                Rem => Value::Int(a.wrapping_rem(b)),
                Lt => Value::Bool(a < b),
                Le => Value::Bool(a <= b),
                Gt => Value::Bool(a > b),
                Ge => Value::Bool(a >= b),
                Eq => Value::Bool(a == b),
                Ne => Value::Bool(a != b),
            }
        }
        _ => {
            return Err(RuntimeError::TypeError(format!(
                "cannot apply {:?} to {} and {}",
                op,
                left.type_name(),
                right.type_name()
            )))
        }
    };
    Ok(value)
}

/// A value as it appears inside a concatenated string.
fn text(value: &Value) -> String {
    match value {
        Value::Str(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_arithmetic() {
        assert_eq!(binary(BinOp::Add, Value::Int(2), Value::Int(3)).ok(), Some(Value::Int(5)));
        assert_eq!(binary(BinOp::Lt, Value::Int(2), Value::Int(3)).ok(), Some(Value::Bool(true)));
        assert!(matches!(
            binary(BinOp::Div, Value::Int(1), Value::Int(0)),
            Err(RuntimeError::Thrown(e)) if e.ty == "DivideByZeroException"
        ));
    }

    #[test]
    fn string_concatenation() {
        assert_eq!(binary(BinOp::Add, Value::str("n="), Value::Int(4)).ok(), Some(Value::str("n=4")));
    }

    #[test]
    fn equality_is_identity_for_references() {
        let e = crate::value::Exception::new("Exception", "");
        assert_eq!(
            binary(BinOp::Ne, Value::Exception(e.clone()), Value::Null).ok(),
            Some(Value::Bool(true))
        );
        assert_eq!(
            binary(BinOp::Eq, Value::Exception(e.clone()), Value::Exception(e)).ok(),
            Some(Value::Bool(true))
        );
    }
}
