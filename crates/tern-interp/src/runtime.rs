// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! A single-threaded task runtime.
//!
//! Tasks complete only when the scheduler is pumped, one at a time and in
//! the order they were created. Completing a task queues its continuations;
//! the interpreter runs them on later ticks.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use tern_async::well_known::BuilderKind;

use crate::value::{ExceptionRef, ObjRef, Value};

pub type Completion = Result<Value, ExceptionRef>;

#[derive(Clone)]
pub enum TaskStatus {
    Pending,
    Succeeded(Value),
    Faulted(ExceptionRef),
}

struct TaskState {
    id: u32,
    status: TaskStatus,
    continuations: Vec<Continuation>,
}

#[derive(Clone)]
pub struct TaskRef(Rc<RefCell<TaskState>>);

impl TaskRef {
    pub fn id(&self) -> u32 {
        self.0.borrow().id
    }

    pub fn status(&self) -> TaskStatus {
        self.0.borrow().status.clone()
    }

    pub fn is_completed(&self) -> bool {
        !matches!(self.0.borrow().status, TaskStatus::Pending)
    }
}

impl PartialEq for TaskRef {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// Work queued behind a task.
#[derive(Clone)]
pub enum Continuation {
    /// Resume a state machine.
    MoveNext(ObjRef),
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Continuation::MoveNext(machine) => write!(f, "MoveNext({})", machine.borrow().class),
        }
    }
}

/// What one scheduler tick did.
#[derive(Debug)]
pub enum Tick {
    /// Nothing left to run.
    Idle,
    /// A pending task completed.
    Completed(u32),
    /// A continuation is ready to run.
    Resume(Continuation),
}

#[derive(Default)]
pub struct Scheduler {
    next_id: u32,
    pending: VecDeque<(TaskRef, Completion)>,
    ready: VecDeque<Continuation>,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler::default()
    }

    fn task(&mut self, status: TaskStatus) -> TaskRef {
        self.next_id += 1;
        TaskRef(Rc::new(RefCell::new(TaskState { id: self.next_id, status, continuations: Vec::new() })))
    }

    pub fn completed(&mut self, value: Value) -> TaskRef {
        self.task(TaskStatus::Succeeded(value))
    }

    pub fn faulted(&mut self, exception: ExceptionRef) -> TaskRef {
        self.task(TaskStatus::Faulted(exception))
    }

    /// A task that completes with `outcome` when its turn comes.
    pub fn pending(&mut self, outcome: Completion) -> TaskRef {
        let task = self.task(TaskStatus::Pending);
        self.pending.push_back((task.clone(), outcome));
        task
    }

    /// A task completed by its owner through [`Scheduler::complete`].
    pub fn promise(&mut self) -> TaskRef {
        self.task(TaskStatus::Pending)
    }

    /// Complete `task`. Returns false if it had already completed.
    pub fn complete(&mut self, task: &TaskRef, outcome: Completion) -> bool {
        let mut state = task.0.borrow_mut();
        if !matches!(state.status, TaskStatus::Pending) {
            return false;
        }
        let state = &mut *state;
        state.status = match outcome {
            Ok(value) => TaskStatus::Succeeded(value),
            Err(exception) => TaskStatus::Faulted(exception),
        };
        tracing::trace!(target: "interp", task = state.id, continuations = state.continuations.len(), "task completed");
        self.ready.extend(state.continuations.drain(..));
        true
    }

    /// Run `continuation` once `task` completes, or on the next tick if it
    /// already has.
    pub fn on_completed(&mut self, task: &TaskRef, continuation: Continuation) {
        let mut state = task.0.borrow_mut();
        if matches!(state.status, TaskStatus::Pending) {
            state.continuations.push(continuation);
        } else {
            self.ready.push_back(continuation);
        }
    }

    pub fn tick(&mut self) -> Tick {
        if let Some(continuation) = self.ready.pop_front() {
            return Tick::Resume(continuation);
        }
        match self.pending.pop_front() {
            Some((task, outcome)) => {
                self.complete(&task, outcome);
                Tick::Completed(task.id())
            }
            None => Tick::Idle,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.ready.is_empty() && self.pending.is_empty()
    }
}

/// State behind a method builder value.
pub struct BuilderState {
    pub kind: BuilderKind,
    /// The task handed out by `get_Task`; `None` for void and iterator
    /// builders.
    pub task: Option<TaskRef>,
}

pub type BuilderRef = Rc<RefCell<BuilderState>>;

/// `ManualResetValueTaskSourceCore<bool>`.
#[derive(Default)]
pub struct PromiseState {
    pub version: i64,
    pub outcome: Option<Completion>,
}

pub type PromiseRef = Rc<RefCell<PromiseState>>;

/// `ValueTaskSourceStatus` values.
pub const STATUS_PENDING: i64 = 0;
pub const STATUS_SUCCEEDED: i64 = 1;
pub const STATUS_FAULTED: i64 = 2;

impl PromiseState {
    pub fn status(&self) -> i64 {
        match &self.outcome {
            None => STATUS_PENDING,
            Some(Ok(_)) => STATUS_SUCCEEDED,
            Some(Err(_)) => STATUS_FAULTED,
        }
    }
}
