// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Calls, object creation, and the natively implemented async types.

use std::cell::RefCell;
use std::rc::Rc;

use tern_ast::{MethodRef, Type};
use tern_async::well_known::BuilderKind;

use crate::host::HostCall;
use crate::runtime::{BuilderRef, BuilderState, Completion, Continuation, PromiseRef, PromiseState, TaskRef, TaskStatus};
use crate::value::{Exception, Object, ObjRef, Value, ValueTask};

use super::{Flow, Frame, Interpreter, RuntimeError, MAIN_THREAD_ID};

impl Interpreter {
    pub(crate) fn call(&mut self, receiver: Option<Value>, method: &MethodRef, args: Vec<Value>) -> Result<Value, RuntimeError> {
        match receiver {
            None => self.call_static(method, args),
            Some(Value::Object(obj)) if self.machine_of(&obj).is_some() => {
                let name = synthesized_name(method);
                self.invoke_synthesized(&obj, &name, args)
            }
            Some(Value::Builder(builder)) => self.call_builder(&builder, method, args),
            Some(Value::Promise(promise)) => call_promise(&promise, method, args),
            Some(Value::Task(task)) if method.name == "GetAwaiter" => Ok(Value::Awaiter(task)),
            Some(Value::ValueTask(vt)) if method.name == "GetAwaiter" => {
                let value = self.resolve_value_task(Value::ValueTask(vt));
                let task = match value {
                    Ok(value) => self.tasks.completed(value),
                    Err(RuntimeError::Thrown(exception)) => self.tasks.faulted(exception),
                    Err(fault) => return Err(fault),
                };
                Ok(Value::Awaiter(task))
            }
            Some(Value::Awaiter(task)) => call_awaiter(&task, method),
            // `ExceptionDispatchInfo.Capture` hands back the exception itself.
            Some(Value::Exception(exception)) if method.name == "Throw" => Err(RuntimeError::Thrown(exception)),
            Some(Value::Null) => {
                Err(RuntimeError::throw("NullReferenceException", format!("call of `{}` on null", method.name)))
            }
            Some(receiver) => self.call_host(Some(receiver), method, args),
        }
    }

    fn call_static(&mut self, method: &MethodRef, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let container = method.container.name().unwrap_or_default();
        match (container, method.name.as_str()) {
            (_, "Create") if builder_kind(&method.container).is_some() => Ok(self.create_builder(&method.container)),
            ("Environment", "get_CurrentManagedThreadId") => Ok(Value::Int(MAIN_THREAD_ID)),
            ("ExceptionDispatchInfo", "Capture") => match args.into_iter().next() {
                Some(exception @ Value::Exception(_)) => Ok(exception),
                _ => Err(RuntimeError::TypeError("ExceptionDispatchInfo.Capture expects an exception".to_string())),
            },
            ("AsyncHelpers", "Await") => {
                let awaitable = args.into_iter().next().unwrap_or(Value::Null);
                self.block_on(awaitable)
            }
            ("AsyncHelpers", "AwaitAwaiter" | "UnsafeAwaitAwaiter") => match args.into_iter().next() {
                Some(Value::Awaiter(task)) => {
                    self.wait_for(&task)?;
                    Ok(Value::Void)
                }
                _ => Err(RuntimeError::Unsupported(format!("{} of a non-task awaiter", method.name))),
            },
            _ => self.call_host(None, method, args),
        }
    }

    fn call_host(&mut self, receiver: Option<Value>, method: &MethodRef, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let rendered: Vec<String> = args.iter().map(Value::to_string).collect();
        self.trace.push(format!("{}({})", method.name, rendered.join(", ")));
        let call = HostCall { receiver: receiver.as_ref(), method, args: &args };
        self.host.call(&call, &mut self.tasks).map_err(RuntimeError::Thrown)
    }

    /// Run a member of a synthesized machine on `machine`.
    pub(crate) fn invoke_synthesized(&mut self, machine: &ObjRef, name: &str, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let Some(descriptor) = self.machine_of(machine) else {
            return Err(RuntimeError::TypeError(format!("{} is not a state machine", machine.borrow().class)));
        };
        let Some(method) = descriptor.method(name) else {
            return Err(RuntimeError::NoSuchMethod { ty: descriptor.name.clone(), method: name.to_string() });
        };
        tracing::trace!(target: "interp", machine = %descriptor.name, method = name, "invoke");
        let frame = Frame::new(Some(Value::Object(machine.clone())), args);
        match self.exec_body(&method.body, frame)? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::Void),
            flow => Err(RuntimeError::Unsupported(format!("{} ended with {:?}", name, flow))),
        }
    }

    pub(crate) fn construct(&mut self, ty: &Type, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let Some(name) = ty.name() else {
            return Err(RuntimeError::TypeError(format!("cannot create an instance of {}", ty)));
        };
        if let Some(descriptor) = self.machines.get(name).cloned() {
            let obj = Object::new(name);
            {
                let mut fields = obj.borrow_mut();
                for def in &descriptor.fields {
                    fields.fields.insert(def.field.name.clone(), Value::default_of(&def.field.ty));
                }
            }
            let frame = Frame::new(Some(Value::Object(obj.clone())), args);
            self.exec_body(&descriptor.constructor.body, frame)?;
            return Ok(Value::Object(obj));
        }
        match name {
            "ValueTask" => value_task(ty, args),
            "ManualResetValueTaskSourceCore" => Ok(Value::Promise(Rc::new(RefCell::new(PromiseState::default())))),
            _ if name.ends_with("Exception") => {
                let message = match args.into_iter().next() {
                    Some(Value::Str(message)) => message,
                    _ => String::new(),
                };
                Ok(Value::Exception(Exception::new(name, message)))
            }
            _ => Ok(Value::Object(Object::new(ty.to_string()))),
        }
    }

    fn create_builder(&mut self, ty: &Type) -> Value {
        let kind = builder_kind(ty).unwrap_or(BuilderKind::Void);
        let task = match kind {
            BuilderKind::Void | BuilderKind::Iterator => None,
            _ => Some(self.tasks.promise()),
        };
        Value::Builder(Rc::new(RefCell::new(BuilderState { kind, task })))
    }

    fn call_builder(&mut self, builder: &BuilderRef, method: &MethodRef, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let mut args = args.into_iter();
        match method.name.as_str() {
            "Start" | "MoveNext" => {
                let machine = machine_arg(args.next())?;
                self.invoke_synthesized(&machine, "MoveNext", Vec::new())
            }
            "get_Task" => match &builder.borrow().task {
                Some(task) => Ok(Value::Task(task.clone())),
                None => Err(RuntimeError::TypeError(format!("{:?} builder has no task", builder.borrow().kind))),
            },
            "SetResult" => {
                self.settle(builder, Ok(args.next().unwrap_or(Value::Void)));
                Ok(Value::Void)
            }
            "SetException" => match args.next() {
                Some(Value::Exception(exception)) => {
                    self.settle(builder, Err(exception));
                    Ok(Value::Void)
                }
                _ => Err(RuntimeError::TypeError("SetException expects an exception".to_string())),
            },
            "AwaitOnCompleted" | "AwaitUnsafeOnCompleted" => {
                let Some(Value::Awaiter(task)) = args.next() else {
                    return Err(RuntimeError::Unsupported(format!("{} with a non-task awaiter", method.name)));
                };
                let machine = machine_arg(args.next())?;
                self.tasks.on_completed(&task, Continuation::MoveNext(machine));
                Ok(Value::Void)
            }
            "SetStateMachine" | "Complete" => Ok(Value::Void),
            other => Err(RuntimeError::NoSuchMethod { ty: method.container.to_string(), method: other.to_string() }),
        }
    }

    fn settle(&mut self, builder: &BuilderRef, outcome: Completion) {
        let task = builder.borrow().task.clone();
        match task {
            Some(task) => {
                if !self.tasks.complete(&task, outcome) {
                    tracing::warn!(target: "interp", task = task.id(), "builder completed twice");
                }
            }
            None => self.void_outcome = Some(outcome),
        }
    }

    /// Wait for a value task and return its result, throwing its fault.
    pub(crate) fn resolve_value_task(&mut self, value: Value) -> Result<Value, RuntimeError> {
        let Value::ValueTask(vt) = value else {
            return Err(RuntimeError::TypeError(format!("expected ValueTask, found {}", value.type_name())));
        };
        let (source, token, typed) = match &*vt {
            ValueTask::Ready(value) => return Ok(value.clone()),
            ValueTask::Source { source, token, typed } => (source.clone(), *token, *typed),
        };
        loop {
            let status = self.invoke_synthesized(&source, "IValueTaskSource<bool>.GetStatus", vec![Value::Int(token)])?;
            if status != Value::Int(crate::runtime::STATUS_PENDING) {
                break;
            }
            if !self.pump()? {
                return Err(RuntimeError::Deadlock);
            }
        }
        let get_result = if typed { "IValueTaskSource<bool>.GetResult" } else { "IValueTaskSource.GetResult" };
        self.invoke_synthesized(&source, get_result, vec![Value::Int(token)])
    }
}

/// Name of a machine member as the call site sees it. Explicit interface
/// implementations are qualified by the interface.
fn synthesized_name(method: &MethodRef) -> String {
    match method.container.name() {
        Some(iface) if iface.starts_with("IValueTaskSource") => format!("{}.{}", method.container, method.name),
        _ => method.name.clone(),
    }
}

fn machine_arg(arg: Option<Value>) -> Result<ObjRef, RuntimeError> {
    match arg {
        Some(Value::Object(machine)) => Ok(machine),
        _ => Err(RuntimeError::TypeError("expected a state machine argument".to_string())),
    }
}

fn builder_kind(ty: &Type) -> Option<BuilderKind> {
    let generic = !ty.type_args().is_empty();
    let kind = match ty.name()? {
        "AsyncVoidMethodBuilder" => BuilderKind::Void,
        "AsyncTaskMethodBuilder" if generic => BuilderKind::TaskOf,
        "AsyncTaskMethodBuilder" => BuilderKind::Task,
        "AsyncValueTaskMethodBuilder" if generic => BuilderKind::ValueTaskOf,
        "AsyncValueTaskMethodBuilder" => BuilderKind::ValueTask,
        "AsyncIteratorMethodBuilder" => BuilderKind::Iterator,
        _ => return None,
    };
    Some(kind)
}

/// `new ValueTask()`, `new ValueTask<T>(result)` or `new ValueTask[<T>](source, token)`.
fn value_task(ty: &Type, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let typed = !ty.type_args().is_empty();
    let vt = match <[Value; 2]>::try_from(args) {
        Ok([Value::Object(source), Value::Int(token)]) => ValueTask::Source { source, token, typed },
        Ok(_) => return Err(RuntimeError::TypeError("ValueTask expects a source and a token".to_string())),
        Err(args) => ValueTask::Ready(args.into_iter().next().unwrap_or(Value::Void)),
    };
    Ok(Value::ValueTask(Rc::new(vt)))
}

pub(super) fn task_result(task: &TaskRef) -> Result<Value, RuntimeError> {
    match task.status() {
        TaskStatus::Succeeded(value) => Ok(value),
        TaskStatus::Faulted(exception) => Err(RuntimeError::Thrown(exception)),
        TaskStatus::Pending => Err(RuntimeError::TypeError(format!("result of task {} read before completion", task.id()))),
    }
}

fn call_awaiter(task: &TaskRef, method: &MethodRef) -> Result<Value, RuntimeError> {
    match method.name.as_str() {
        "get_IsCompleted" => Ok(Value::Bool(task.is_completed())),
        "GetResult" => task_result(task),
        other => Err(RuntimeError::NoSuchMethod { ty: "TaskAwaiter".to_string(), method: other.to_string() }),
    }
}

fn call_promise(promise: &PromiseRef, method: &MethodRef, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let mut state = promise.borrow_mut();
    let token = args.first().and_then(Value::as_int);
    let check_token = |state: &PromiseState| match token {
        Some(token) if token != state.version => {
            Err(RuntimeError::throw("InvalidOperationException", "stale value task token"))
        }
        _ => Ok(()),
    };
    match method.name.as_str() {
        "Reset" => {
            state.version += 1;
            state.outcome = None;
            Ok(Value::Void)
        }
        "SetResult" => {
            state.outcome = Some(Ok(args.into_iter().next().unwrap_or(Value::Void)));
            Ok(Value::Void)
        }
        "SetException" => match args.into_iter().next() {
            Some(Value::Exception(exception)) => {
                state.outcome = Some(Err(exception));
                Ok(Value::Void)
            }
            _ => Err(RuntimeError::TypeError("SetException expects an exception".to_string())),
        },
        "GetStatus" => {
            check_token(&state)?;
            Ok(Value::Int(state.status()))
        }
        "GetResult" => {
            check_token(&state)?;
            match &state.outcome {
                Some(Ok(value)) => Ok(value.clone()),
                Some(Err(exception)) => Err(RuntimeError::Thrown(exception.clone())),
                None => Err(RuntimeError::TypeError("promise result read before completion".to_string())),
            }
        }
        "get_Version" => Ok(Value::Int(state.version)),
        // Completion is observed by polling the status.
        "OnCompleted" => Ok(Value::Void),
        other => Err(RuntimeError::NoSuchMethod { ty: method.container.to_string(), method: other.to_string() }),
    }
}
