// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The interpreter implementation.
//!
//! A tree-walk interpreter over typed method bodies. It runs a body as
//! written, with awaits that block by pumping the scheduler, and it runs
//! lowered bodies together with their synthesized state machines, with the
//! builder, promise and helper types implemented natively.

use std::collections::HashMap;
use std::rc::Rc;

mod call;
mod eval_expr;
mod exec_stmt;

use tern_ast::{LabelSymbol, LocalId, MethodDecl};
use tern_async::StateMachineDescriptor;

use crate::host::Host;
use crate::runtime::{Continuation, Scheduler, TaskRef, Tick};
use crate::value::{Exception, ExceptionRef, Object, ObjRef, Value};

pub const DEFAULT_STEP_LIMIT: usize = 1_000_000;

/// Reported by `Environment.CurrentManagedThreadId`; there is one thread.
pub const MAIN_THREAD_ID: i64 = 1;

/// A runtime fault. Only [`RuntimeError::Thrown`] can be caught by
/// interpreted code; everything else means the tree itself is wrong.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("unhandled exception: {0}")]
    Thrown(ExceptionRef),

    #[error("jump to `{0}` enters a protected region")]
    JumpIntoProtectedRegion(String),

    #[error("label `{0}` is not reachable from the jump")]
    UnknownLabel(String),

    #[error("awaiter field `{field}` overwritten while another await is in flight")]
    AwaiterInFlight { field: String },

    #[error("deadlock: awaited task can never complete")]
    Deadlock,

    #[error("{0}")]
    TypeError(String),

    #[error("no method `{method}` on `{ty}`")]
    NoSuchMethod { ty: String, method: String },

    #[error("rethrow outside of a catch block")]
    RethrowOutsideCatch,

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("step limit of {0} exceeded")]
    StepLimit(usize),

    #[error("lowering failed: {0}")]
    Lowering(String),
}

impl RuntimeError {
    pub(crate) fn throw(ty: &str, message: impl Into<String>) -> RuntimeError {
        RuntimeError::Thrown(Exception::new(ty, message))
    }
}

/// How a statement finished.
#[derive(Debug)]
pub(crate) enum Flow {
    Normal,
    Goto(LabelSymbol),
    Return(Value),
    /// The consumer of an iterator stopped early; unwind like a return.
    Dispose,
}

/// Locals of one method activation.
#[derive(Default)]
pub(crate) struct Frame {
    this: Option<Value>,
    params: Vec<Value>,
    locals: HashMap<LocalId, Value>,
    /// Receivers of the conditional accesses being evaluated.
    receivers: HashMap<u32, Value>,
    /// Exceptions of the enclosing catch blocks, innermost last.
    caught: Vec<ExceptionRef>,
}

impl Frame {
    pub(crate) fn new(this: Option<Value>, params: Vec<Value>) -> Self {
        Frame { this, params, ..Frame::default() }
    }

    pub(crate) fn for_method(method: &MethodDecl, args: Vec<Value>) -> Self {
        let this = (!method.is_static).then(|| Value::Object(Object::new(method.container.to_string())));
        Frame::new(this, args)
    }
}

/// Values produced by `yield return` while running an iterator as written.
#[derive(Debug, Default)]
pub(crate) struct YieldSink {
    pub(crate) produced: Vec<Value>,
    /// Dispose after this many values.
    pub(crate) take: Option<usize>,
}

/// The tree-walk interpreter.
pub struct Interpreter {
    host: Box<dyn Host>,
    pub(crate) tasks: Scheduler,
    /// Synthesized machine types by name.
    machines: HashMap<String, Rc<StateMachineDescriptor>>,
    frames: Vec<Frame>,
    statics: HashMap<String, Value>,
    /// Host calls in the order they were made, as `Name(args)`.
    trace: Vec<String>,
    pub(crate) sink: Option<YieldSink>,
    /// Completion of async void methods, which have no task to carry it.
    pub(crate) void_outcome: Option<Result<Value, ExceptionRef>>,
    steps: usize,
    step_limit: usize,
}

impl Interpreter {
    pub fn new(host: impl Host + 'static) -> Self {
        Interpreter {
            host: Box::new(host),
            tasks: Scheduler::new(),
            machines: HashMap::new(),
            frames: Vec::new(),
            statics: HashMap::new(),
            trace: Vec::new(),
            sink: None,
            void_outcome: None,
            steps: 0,
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }

    pub fn with_step_limit(mut self, limit: usize) -> Self {
        self.step_limit = limit;
        self
    }

    /// Make a synthesized machine type constructible.
    pub fn register_machine(&mut self, machine: StateMachineDescriptor) {
        tracing::debug!(target: "interp", machine = %machine.name, "registered state machine");
        self.machines.insert(machine.name.clone(), Rc::new(machine));
    }

    pub fn trace(&self) -> &[String] {
        &self.trace
    }

    pub(crate) fn take_trace(&mut self) -> Vec<String> {
        std::mem::take(&mut self.trace)
    }

    fn frame(&self) -> &Frame {
        match self.frames.last() {
            Some(frame) => frame,
            None => bug!("no active frame"),
        }
    }

    fn frame_mut(&mut self) -> &mut Frame {
        match self.frames.last_mut() {
            Some(frame) => frame,
            None => bug!("no active frame"),
        }
    }

    fn step(&mut self) -> Result<(), RuntimeError> {
        self.steps += 1;
        if self.steps > self.step_limit {
            return Err(RuntimeError::StepLimit(self.step_limit));
        }
        Ok(())
    }

    fn machine_of(&self, obj: &ObjRef) -> Option<Rc<StateMachineDescriptor>> {
        self.machines.get(&obj.borrow().class).cloned()
    }

    /// Run one scheduler tick. False when there was nothing to do.
    pub(crate) fn pump(&mut self) -> Result<bool, RuntimeError> {
        match self.tasks.tick() {
            Tick::Idle => Ok(false),
            Tick::Completed(_) => Ok(true),
            Tick::Resume(Continuation::MoveNext(machine)) => {
                self.invoke_synthesized(&machine, "MoveNext", Vec::new())?;
                Ok(true)
            }
        }
    }

    /// Pump until `task` completes.
    pub(crate) fn wait_for(&mut self, task: &TaskRef) -> Result<(), RuntimeError> {
        while !task.is_completed() {
            if !self.pump()? {
                return Err(RuntimeError::Deadlock);
            }
        }
        Ok(())
    }

    /// Pump until nothing is left to run.
    pub(crate) fn drain(&mut self) -> Result<(), RuntimeError> {
        while self.pump()? {}
        Ok(())
    }
}
