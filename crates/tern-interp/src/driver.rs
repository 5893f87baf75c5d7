// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Running one async method end to end.
//!
//! The same method can be run as written or after lowering; a lowered run
//! drives the synthesized machine the way a caller would, awaiting the
//! returned task or enumerating the returned iterator. Comparing the
//! [`Run`]s of both forms checks that lowering preserved behavior.

use tern_ast::MethodDecl;
use tern_async::{lower_method, AsyncShape, LoweredMethod, LoweringOptions, LoweringSession, StateMachineKind};
use tern_diagnostics::DiagnosticBag;

use crate::host::Host;
use crate::interp::{Flow, Frame, Interpreter, RuntimeError, YieldSink, DEFAULT_STEP_LIMIT};
use crate::runtime::TaskStatus;
use crate::value::{ObjRef, Value};

/// Which body to execute.
#[derive(Debug, Clone)]
pub enum Form {
    /// The method as written; awaits block.
    Source,
    /// The method after lowering with these options.
    Lowered(LoweringOptions),
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub form: Form,
    pub args: Vec<Value>,
    /// For iterators: dispose after this many elements.
    pub take: Option<usize>,
    pub step_limit: usize,
}

impl RunConfig {
    pub fn source() -> Self {
        RunConfig { form: Form::Source, args: Vec::new(), take: None, step_limit: DEFAULT_STEP_LIMIT }
    }

    pub fn lowered(options: LoweringOptions) -> Self {
        RunConfig { form: Form::Lowered(options), ..RunConfig::source() }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn take(mut self, count: usize) -> Self {
        self.take = Some(count);
        self
    }
}

/// How the method finished, as its caller observes it.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Completed with a value.
    Returned(Value),
    /// Completed without a value, or an iterator finished or was disposed.
    Completed,
    /// Faulted with this exception.
    Threw(String),
    /// Still running when nothing was left to schedule.
    Pending,
}

#[derive(Debug, Clone)]
pub struct Run {
    /// Host calls in order.
    pub trace: Vec<String>,
    /// Elements an iterator produced.
    pub produced: Vec<Value>,
    pub outcome: Outcome,
}

/// Run `method` against `host`.
pub fn run(method: &MethodDecl, host: impl Host + 'static, config: RunConfig) -> Result<Run, RuntimeError> {
    let mut interp = Interpreter::new(host).with_step_limit(config.step_limit);
    let is_iterator = AsyncShape::classify(&method.return_ty).is_some_and(|shape| shape.is_iterator());
    let _span = tracing::debug_span!(target: "interp", "run", method = %method.name, form = ?config.form).entered();

    let (outcome, produced) = match &config.form {
        Form::Source => run_body(&mut interp, method, &method.body, &config, is_iterator)?,
        Form::Lowered(options) => {
            let session = LoweringSession::with_core_library(options.clone());
            let mut diagnostics = DiagnosticBag::new();
            let lowered = lower_method(&session, method, &mut diagnostics);
            if diagnostics.has_errors() {
                let messages: Vec<String> = diagnostics.iter().map(|d| d.message.clone()).collect();
                return Err(RuntimeError::Lowering(messages.join("; ")));
            }
            match lowered {
                LoweredMethod::StateMachine { kickoff, machine } => {
                    let kind = machine.kind;
                    interp.register_machine(*machine);
                    run_kickoff(&mut interp, method, &kickoff, kind, &config)?
                }
                LoweredMethod::Direct { body } | LoweredMethod::Unlowered { body } => {
                    run_body(&mut interp, method, &body, &config, is_iterator)?
                }
            }
        }
    };
    tracing::debug!(target: "interp", outcome = ?outcome, "run finished");
    Ok(Run { trace: interp.take_trace(), produced, outcome })
}

/// Split a result into the caller-visible outcome and runtime faults.
fn caught<T>(result: Result<T, RuntimeError>) -> Result<Result<T, Outcome>, RuntimeError> {
    match result {
        Ok(value) => Ok(Ok(value)),
        Err(RuntimeError::Thrown(exception)) => Ok(Err(Outcome::Threw(exception.to_string()))),
        Err(fault) => Err(fault),
    }
}

fn returned(value: Value) -> Outcome {
    match value {
        Value::Void => Outcome::Completed,
        value => Outcome::Returned(value),
    }
}

/// Execute a body that needs no machine: the source form, or a body lowered
/// in place.
fn run_body(
    interp: &mut Interpreter,
    method: &MethodDecl,
    body: &tern_ast::Block,
    config: &RunConfig,
    is_iterator: bool,
) -> Result<(Outcome, Vec<Value>), RuntimeError> {
    if is_iterator {
        if config.take == Some(0) {
            return Ok((Outcome::Completed, Vec::new()));
        }
        interp.sink = Some(YieldSink { produced: Vec::new(), take: config.take });
    }
    let flow = caught(interp.exec_body(body, Frame::for_method(method, config.args.clone())))?;
    let produced = interp.sink.take().map(|sink| sink.produced).unwrap_or_default();
    let outcome = match flow {
        Ok(Flow::Return(value)) if !is_iterator => returned(value),
        Ok(_) => Outcome::Completed,
        Err(outcome) => outcome,
    };
    Ok((outcome, produced))
}

fn run_kickoff(
    interp: &mut Interpreter,
    method: &MethodDecl,
    kickoff: &tern_ast::Block,
    kind: StateMachineKind,
    config: &RunConfig,
) -> Result<(Outcome, Vec<Value>), RuntimeError> {
    let started = caught(interp.exec_body(kickoff, Frame::for_method(method, config.args.clone())))?;
    let flow = match started {
        Ok(flow) => flow,
        Err(outcome) => return Ok((outcome, Vec::new())),
    };
    match (kind, flow) {
        (StateMachineKind::AsyncIterator { enumerable }, Flow::Return(Value::Object(machine))) => {
            enumerate(interp, machine, enumerable, config.take)
        }
        (StateMachineKind::AsyncMethod, Flow::Return(Value::Task(task))) => {
            while !task.is_completed() && interp.pump()? {}
            let outcome = match task.status() {
                TaskStatus::Succeeded(value) => returned(value),
                TaskStatus::Faulted(exception) => Outcome::Threw(exception.to_string()),
                TaskStatus::Pending => Outcome::Pending,
            };
            Ok((outcome, Vec::new()))
        }
        (StateMachineKind::AsyncMethod, Flow::Normal | Flow::Return(Value::Void)) => {
            interp.drain()?;
            let outcome = match interp.void_outcome.take() {
                Some(Ok(_)) => Outcome::Completed,
                Some(Err(exception)) => Outcome::Threw(exception.to_string()),
                None => Outcome::Pending,
            };
            Ok((outcome, Vec::new()))
        }
        (_, flow) => Err(RuntimeError::TypeError(format!("kickoff of {} ended with {:?}", method.name, flow))),
    }
}

/// `await foreach` over the iterator, stopping after `take` elements.
fn enumerate(
    interp: &mut Interpreter,
    machine: ObjRef,
    enumerable: bool,
    take: Option<usize>,
) -> Result<(Outcome, Vec<Value>), RuntimeError> {
    let enumerator = if enumerable {
        match interp.invoke_synthesized(&machine, "GetAsyncEnumerator", vec![Value::Null])? {
            Value::Object(enumerator) => enumerator,
            other => return Err(RuntimeError::TypeError(format!("GetAsyncEnumerator returned {}", other.type_name()))),
        }
    } else {
        machine
    };

    let mut produced = Vec::new();
    while take.map_or(true, |take| produced.len() < take) {
        let next = interp.invoke_synthesized(&enumerator, "MoveNextAsync", Vec::new())?;
        match caught(interp.resolve_value_task(next))? {
            Ok(Value::Bool(true)) => produced.push(interp.invoke_synthesized(&enumerator, "get_Current", Vec::new())?),
            Ok(_) => break,
            Err(outcome) => return Ok((outcome, produced)),
        }
    }

    let disposed = interp.invoke_synthesized(&enumerator, "DisposeAsync", Vec::new());
    let outcome = match caught(disposed.and_then(|vt| interp.resolve_value_task(vt)))? {
        Ok(_) => Outcome::Completed,
        Err(outcome) => outcome,
    };
    Ok((outcome, produced))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Reply, ScriptedHost};
    use tern_ast::{Block, MethodRef, NodeFactory, Span, Type};

    fn method(body: Block, return_ty: Type) -> MethodDecl {
        MethodDecl {
            name: "M".to_string(),
            container: Type::class("C"),
            is_static: true,
            is_async: true,
            params: Vec::new(),
            return_ty,
            body,
            hoisted_locals: Vec::new(),
            span: Span::default(),
        }
    }

    fn fetch(f: &NodeFactory) -> tern_ast::Expr {
        let m = MethodRef::static_method(Type::class("Host"), "Fetch", vec![], Type::task_of(Type::Int));
        f.await_task(f.call(None, &m, Vec::new()))
    }

    #[test]
    fn source_form_blocks_on_pending_tasks() {
        let f = NodeFactory::new();
        let m = method(Block::new(vec![f.ret(Some(fetch(&f)))]), Type::task_of(Type::Int));
        let host = ScriptedHost::new().on("Fetch", Reply::Pending(Value::Int(7)));
        let run = run(&m, host, RunConfig::source()).unwrap();
        assert_eq!(run.outcome, Outcome::Returned(Value::Int(7)));
        assert_eq!(run.trace, vec!["Fetch()"]);
    }

    #[test]
    fn lowered_form_resumes_through_the_builder() {
        let f = NodeFactory::new();
        let m = method(Block::new(vec![f.ret(Some(fetch(&f)))]), Type::task_of(Type::Int));
        let host = ScriptedHost::new().on("Fetch", Reply::Pending(Value::Int(7)));
        let run = run(&m, host, RunConfig::lowered(LoweringOptions::default())).unwrap();
        assert_eq!(run.outcome, Outcome::Returned(Value::Int(7)));
    }

    #[test]
    fn faulted_await_surfaces_as_outcome() {
        let f = NodeFactory::new();
        let m = method(Block::new(vec![f.ret(Some(fetch(&f)))]), Type::task_of(Type::Int));
        for config in [RunConfig::source(), RunConfig::lowered(LoweringOptions::default())] {
            let host = ScriptedHost::new().on("Fetch", Reply::PendingFault("down".into()));
            let run = run(&m, host, config).unwrap();
            assert_eq!(run.outcome, Outcome::Threw("Exception: down".to_string()));
        }
    }
}
