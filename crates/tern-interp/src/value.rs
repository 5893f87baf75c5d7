// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime values.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use tern_ast::Type;

use crate::runtime::{BuilderRef, PromiseRef, TaskRef};

pub type ObjRef = Rc<RefCell<Object>>;
pub type ExceptionRef = Rc<Exception>;

/// A runtime value in the interpreter.
///
/// Objects, arrays and the async runtime types are shared references.
/// Value-type state machines are not copied either; the interpreter treats
/// every machine as if it had already been boxed.
#[derive(Clone)]
pub enum Value {
    /// Result of a call to a void method.
    Void,
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Object(ObjRef),
    Array(Rc<RefCell<Vec<Value>>>),
    Exception(ExceptionRef),
    Task(TaskRef),
    /// `TaskAwaiter` over the task it was taken from.
    Awaiter(TaskRef),
    ValueTask(Rc<ValueTask>),
    Builder(BuilderRef),
    Promise(PromiseRef),
}

/// A `ValueTask` is either already complete or backed by a source that is
/// polled through its version token.
#[derive(Clone)]
pub enum ValueTask {
    Ready(Value),
    Source { source: ObjRef, token: i64, typed: bool },
}

/// An instance of a class or a synthesized state machine.
pub struct Object {
    pub class: String,
    pub fields: IndexMap<String, Value>,
}

impl Object {
    pub fn new(class: impl Into<String>) -> ObjRef {
        Rc::new(RefCell::new(Object { class: class.into(), fields: IndexMap::new() }))
    }
}

impl fmt::Debug for Object {
    // Machines reach themselves through builder continuations, so fields are
    // listed by name only.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("class", &self.class)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Exception {
    pub ty: String,
    pub message: String,
}

impl Exception {
    pub fn new(ty: impl Into<String>, message: impl Into<String>) -> ExceptionRef {
        Rc::new(Exception { ty: ty.into(), message: message.into() })
    }

    /// True when a `catch` of `ty` accepts this exception. There is no class
    /// hierarchy beyond `Exception` at the root.
    pub fn is_instance_of(&self, ty: &Type) -> bool {
        match ty {
            Type::Object => true,
            Type::Named { name, .. } => name == "Exception" || *name == self.ty,
            _ => false,
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.ty)
        } else {
            write!(f, "{}: {}", self.ty, self.message)
        }
    }
}

impl Value {
    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(s.into())
    }

    /// The zero value of `ty`: `false`, `0`, or null for everything else.
    pub fn default_of(ty: &Type) -> Value {
        match ty {
            Type::Void => Value::Void,
            Type::Bool => Value::Bool(false),
            Type::Int => Value::Int(0),
            _ => Value::Null,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Void => "void",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "string",
            Value::Object(_) => "object",
            Value::Array(_) => "array",
            Value::Exception(_) => "Exception",
            Value::Task(_) => "Task",
            Value::Awaiter(_) => "TaskAwaiter",
            Value::ValueTask(_) => "ValueTask",
            Value::Builder(_) => "builder",
            Value::Promise(_) => "ManualResetValueTaskSourceCore",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl PartialEq for Value {
    /// Primitives compare by value, everything else by identity.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Void, Value::Void) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Exception(a), Value::Exception(b)) => Rc::ptr_eq(a, b),
            (Value::Task(a), Value::Task(b)) | (Value::Awaiter(a), Value::Awaiter(b)) => a == b,
            (Value::ValueTask(a), Value::ValueTask(b)) => Rc::ptr_eq(a, b),
            (Value::Builder(a), Value::Builder(b)) => Rc::ptr_eq(a, b),
            (Value::Promise(a), Value::Promise(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => write!(f, "void"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Object(obj) => write!(f, "{}", obj.borrow().class),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Exception(e) => write!(f, "{}", e),
            Value::Task(task) => write!(f, "Task#{}", task.id()),
            Value::Awaiter(task) => write!(f, "TaskAwaiter#{}", task.id()),
            other => write!(f, "{}", other.type_name()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_compare_by_identity() {
        let a = Object::new("C");
        let b = Object::new("C");
        assert_eq!(Value::Object(a.clone()), Value::Object(a));
        assert_ne!(Value::Object(b), Value::Object(Object::new("C")));
        assert_eq!(Value::str("x"), Value::str("x"));
    }

    #[test]
    fn catch_matching() {
        let e = Exception::new("InvalidOperationException", "bad");
        assert!(e.is_instance_of(&Type::exception()));
        assert!(e.is_instance_of(&Type::class("InvalidOperationException")));
        assert!(!e.is_instance_of(&Type::class("ArgumentException")));
        assert_eq!(e.to_string(), "InvalidOperationException: bad");
    }
}
