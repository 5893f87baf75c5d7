// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Calls that leave the interpreted method.
//!
//! Anything the interpreter does not implement itself (user helpers,
//! library calls that produce tasks) goes to a [`Host`]. Tests script the
//! host so every await can be made to complete synchronously, later, or
//! with a fault.

use std::collections::{HashMap, VecDeque};

use tern_ast::{MethodRef, Type};

use crate::runtime::{Scheduler, TaskRef};
use crate::value::{Exception, ExceptionRef, Value};

/// One call handed to the host.
pub struct HostCall<'a> {
    pub receiver: Option<&'a Value>,
    pub method: &'a MethodRef,
    pub args: &'a [Value],
}

pub trait Host {
    /// Answer `call`. An `Err` is thrown at the call site.
    fn call(&mut self, call: &HostCall<'_>, tasks: &mut Scheduler) -> Result<Value, ExceptionRef>;
}

/// A scripted answer.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Return this value directly.
    Return(Value),
    /// Return a task that has already succeeded.
    Completed(Value),
    /// Return a task that succeeds on a later scheduler tick.
    Pending(Value),
    /// Return a task that has already faulted.
    Faulted(String),
    /// Return a task that faults on a later scheduler tick.
    PendingFault(String),
    /// Throw synchronously.
    Throw(String),
}

/// Replies queued per method name.
///
/// A method with nothing queued answers with the default of its return
/// type; task-returning methods answer with a completed task.
#[derive(Debug, Default, Clone)]
pub struct ScriptedHost {
    replies: HashMap<String, VecDeque<Reply>>,
}

impl ScriptedHost {
    pub fn new() -> Self {
        ScriptedHost::default()
    }

    /// Queue `reply` for the next call to `method`.
    pub fn on(mut self, method: &str, reply: Reply) -> Self {
        self.replies.entry(method.to_string()).or_default().push_back(reply);
        self
    }

    /// Answer every call to `method` with a pending task, `count` times.
    pub fn pending(mut self, method: &str, value: Value, count: usize) -> Self {
        for _ in 0..count {
            self = self.on(method, Reply::Pending(value.clone()));
        }
        self
    }
}

fn exception(message: String) -> ExceptionRef {
    Exception::new("Exception", message)
}

fn default_reply(ret: &Type) -> Reply {
    match ret {
        Type::Named { name, args, .. } if name == "Task" || name == "ValueTask" => {
            Reply::Completed(args.first().map_or(Value::Void, Value::default_of))
        }
        other => Reply::Return(Value::default_of(other)),
    }
}

impl Host for ScriptedHost {
    fn call(&mut self, call: &HostCall<'_>, tasks: &mut Scheduler) -> Result<Value, ExceptionRef> {
        let reply = self
            .replies
            .get_mut(&call.method.name)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| default_reply(&call.method.ret));
        let task = |t: TaskRef| Ok(Value::Task(t));
        match reply {
            Reply::Return(value) => Ok(value),
            Reply::Completed(value) => task(tasks.completed(value)),
            Reply::Pending(value) => task(tasks.pending(Ok(value))),
            Reply::Faulted(message) => task(tasks.faulted(exception(message))),
            Reply::PendingFault(message) => task(tasks.pending(Err(exception(message)))),
            Reply::Throw(message) => Err(exception(message)),
        }
    }
}
