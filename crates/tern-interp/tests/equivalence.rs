// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Lowered async methods behave like the methods as written.
//!
//! Each scenario runs the source form and every lowering configuration
//! against the same scripted host and compares host calls and outcomes.

use tern_ast::{BinOp, Block, CatchBlock, MethodDecl, ParamSymbol, Type};
use tern_async::{LoweringOptions, LoweringSession, StateMachineKind};
use tern_interp::dsl::Dsl;
use tern_interp::{run, Outcome, Reply, Run, RunConfig, ScriptedHost, Value};

fn configurations() -> Vec<(&'static str, RunConfig)> {
    vec![
        ("release", RunConfig::lowered(LoweringOptions::default())),
        ("debug", RunConfig::lowered(LoweringOptions::debug())),
        ("runtime-async", RunConfig::lowered(LoweringOptions::runtime_async())),
        (
            "plain-rethrow",
            RunConfig::lowered(LoweringOptions { capture_exception_dispatch: false, ..LoweringOptions::default() }),
        ),
    ]
}

/// Run every form and return the source run after checking the others
/// match it.
fn equivalent(method: &MethodDecl, host: &ScriptedHost, args: Vec<Value>) -> Run {
    let expected = run(method, host.clone(), RunConfig::source().with_args(args.clone()))
        .unwrap_or_else(|e| panic!("source run of {} failed: {}", method.name, e));
    for (name, config) in configurations() {
        let actual = run(method, host.clone(), config.with_args(args.clone()))
            .unwrap_or_else(|e| panic!("{} run of {} failed: {}", name, method.name, e));
        assert_eq!(actual.trace, expected.trace, "{} trace of {}", name, method.name);
        assert_eq!(actual.outcome, expected.outcome, "{} outcome of {}", name, method.name);
    }
    expected
}

fn log_trace(markers: &[&str]) -> Vec<String> {
    markers.iter().map(|m| m.to_string()).collect()
}

#[test]
fn operands_before_an_await_are_evaluated_first() {
    let d = Dsl::new();
    let sum = d.binary(BinOp::Add, d.host("First", Type::Int, vec![]), d.await_int("Second"), Type::Int);
    let m = d.method("Sum", Type::task_of(Type::Int), Block::new(vec![d.ret(Some(sum))]));
    let host = ScriptedHost::new().on("First", Reply::Return(Value::Int(2))).on("Second", Reply::Pending(Value::Int(5)));

    let run = equivalent(&m, &host, vec![]);
    assert_eq!(run.trace, log_trace(&["First()", "Second()"]));
    assert_eq!(run.outcome, Outcome::Returned(Value::Int(7)));
}

#[test]
fn completed_awaits_do_not_suspend() {
    let d = Dsl::new();
    let body = Block::new(vec![d.log(1), d.awaited("Ready"), d.log(2), d.awaited("Later"), d.log(3)]);
    let m = d.method("Mixed", Type::task(), body);
    let host = ScriptedHost::new().on("Ready", Reply::Completed(Value::Void)).on("Later", Reply::Pending(Value::Void));

    let run = equivalent(&m, &host, vec![]);
    assert_eq!(run.trace, log_trace(&["Log(1)", "Ready()", "Log(2)", "Later()", "Log(3)"]));
    assert_eq!(run.outcome, Outcome::Completed);
}

#[test]
fn loop_counter_survives_suspensions() {
    let mut d = Dsl::new();
    let i = d.var("i", Type::Int);
    let top = d.label("top");
    let end = d.label("end");
    let next = d.binary(BinOp::Add, d.local_ref(&i), d.int(1), Type::Int);
    let body = Block::with_locals(
        vec![i.clone()],
        vec![
            d.assign_stmt(d.local_ref(&i), d.int(0)),
            d.label_stmt(&top),
            d.cond_goto(d.lt(d.local_ref(&i), d.int(3)), false, &end),
            d.log_expr(d.local_ref(&i)),
            d.awaited("Tick"),
            d.assign_stmt(d.local_ref(&i), next),
            d.goto(&top),
            d.label_stmt(&end),
            d.ret(Some(d.local_ref(&i))),
        ],
    );
    let m = d.method("Count", Type::task_of(Type::Int), body);
    let host = ScriptedHost::new().pending("Tick", Value::Void, 3);

    let run = equivalent(&m, &host, vec![]);
    assert_eq!(run.trace, log_trace(&["Log(0)", "Tick()", "Log(1)", "Tick()", "Log(2)", "Tick()"]));
    assert_eq!(run.outcome, Outcome::Returned(Value::Int(3)));
}

#[test]
fn loop_carried_value_read_before_the_await() {
    let mut d = Dsl::new();
    let x = d.var("x", Type::Int);
    let top = d.label("top");
    let end = d.label("end");
    let next = d.binary(BinOp::Add, d.local_ref(&x), d.int(1), Type::Int);
    let body = Block::with_locals(
        vec![x.clone()],
        vec![
            d.assign_stmt(d.local_ref(&x), d.int(0)),
            d.label_stmt(&top),
            d.log_expr(d.local_ref(&x)),
            d.assign_stmt(d.local_ref(&x), next),
            d.cond_goto(d.lt(d.local_ref(&x), d.int(3)), false, &end),
            d.awaited("Tick"),
            d.goto(&top),
            d.label_stmt(&end),
            d.ret(Some(d.local_ref(&x))),
        ],
    );
    let m = d.method("CountDown", Type::task_of(Type::Int), body);
    assert_eq!(m.hoisted_locals, vec![x.id]);
    let host = ScriptedHost::new().pending("Tick", Value::Void, 2);

    let run = equivalent(&m, &host, vec![]);
    assert_eq!(run.trace, log_trace(&["Log(0)", "Tick()", "Log(1)", "Tick()", "Log(2)"]));
    assert_eq!(run.outcome, Outcome::Returned(Value::Int(3)));
}

#[test]
fn parameters_are_visible_after_resumption() {
    let d = Dsl::new();
    let n = ParamSymbol { index: 0, name: "n".to_string(), ty: Type::Int };
    let sum = d.binary(BinOp::Add, d.await_int("Fetch"), d.param_ref(&n), Type::Int);
    let mut m = d.method("AddTo", Type::task_of(Type::Int), Block::new(vec![d.ret(Some(sum))]));
    m.params = vec![n];
    let host = ScriptedHost::new().on("Fetch", Reply::Pending(Value::Int(4)));

    let run = equivalent(&m, &host, vec![Value::Int(3)]);
    assert_eq!(run.outcome, Outcome::Returned(Value::Int(7)));
}

#[test]
fn await_in_finally_after_normal_completion() {
    let d = Dsl::new();
    let body = Block::new(vec![
        d.try_finally(
            Block::new(vec![d.log(1), d.awaited("A"), d.log(2)]),
            Block::new(vec![d.awaited("B"), d.log(3)]),
        ),
        d.log(4),
    ]);
    let m = d.method("Finally", Type::task(), body);
    let host = ScriptedHost::new().on("A", Reply::Pending(Value::Void)).on("B", Reply::Pending(Value::Void));

    let run = equivalent(&m, &host, vec![]);
    assert_eq!(run.trace, log_trace(&["Log(1)", "A()", "Log(2)", "B()", "Log(3)", "Log(4)"]));
    assert_eq!(run.outcome, Outcome::Completed);
}

#[test]
fn await_in_finally_while_an_exception_is_pending() {
    let d = Dsl::new();
    let body = Block::new(vec![
        d.try_finally(Block::new(vec![d.awaited("A"), d.log(2)]), Block::new(vec![d.awaited("B"), d.log(3)])),
        d.log(4),
    ]);
    let m = d.method("FinallyFault", Type::task(), body);
    let host = ScriptedHost::new().on("A", Reply::PendingFault("boom".into())).on("B", Reply::Pending(Value::Void));

    let run = equivalent(&m, &host, vec![]);
    assert_eq!(run.trace, log_trace(&["A()", "B()", "Log(3)"]));
    assert_eq!(run.outcome, Outcome::Threw("Exception: boom".to_string()));
}

#[test]
fn return_from_try_runs_awaiting_finally_first() {
    let d = Dsl::new();
    let body = Block::new(vec![
        d.try_finally(
            Block::new(vec![d.awaited("A"), d.ret(Some(d.int(5)))]),
            Block::new(vec![d.awaited("B"), d.log(9)]),
        ),
        d.ret(Some(d.int(0))),
    ]);
    let m = d.method("EarlyReturn", Type::task_of(Type::Int), body);
    let host = ScriptedHost::new().on("A", Reply::Pending(Value::Void)).on("B", Reply::Pending(Value::Void));

    let run = equivalent(&m, &host, vec![]);
    assert_eq!(run.trace, log_trace(&["A()", "B()", "Log(9)"]));
    assert_eq!(run.outcome, Outcome::Returned(Value::Int(5)));
}

#[test]
fn goto_out_of_try_runs_awaiting_finally() {
    let mut d = Dsl::new();
    let out = d.label("out");
    let body = Block::new(vec![
        d.try_finally(
            Block::new(vec![d.log(1), d.goto(&out), d.log(2)]),
            Block::new(vec![d.awaited("Flush"), d.log(3)]),
        ),
        d.log(4),
        d.label_stmt(&out),
        d.log(5),
    ]);
    let m = d.method("Leave", Type::task(), body);
    let host = ScriptedHost::new().on("Flush", Reply::Pending(Value::Void));

    let run = equivalent(&m, &host, vec![]);
    assert_eq!(run.trace, log_trace(&["Log(1)", "Flush()", "Log(3)", "Log(5)"]));
    assert_eq!(run.outcome, Outcome::Completed);
}

#[test]
fn goto_out_of_nested_awaiting_finallys_runs_both() {
    let mut d = Dsl::new();
    let out = d.label("out");
    let inner = d.try_finally(
        Block::new(vec![d.log(1), d.awaited("A"), d.goto(&out), d.log(2)]),
        Block::new(vec![d.awaited("B"), d.log(3)]),
    );
    let outer = d.try_finally(Block::new(vec![inner, d.log(4)]), Block::new(vec![d.awaited("C"), d.log(5)]));
    let body = Block::new(vec![outer, d.log(6), d.label_stmt(&out), d.log(7)]);
    let m = d.method("LeaveTwo", Type::task(), body);
    let host = ScriptedHost::new()
        .on("A", Reply::Pending(Value::Void))
        .on("B", Reply::Pending(Value::Void))
        .on("C", Reply::Pending(Value::Void));

    let run = equivalent(&m, &host, vec![]);
    assert_eq!(run.trace, log_trace(&["Log(1)", "A()", "B()", "Log(3)", "C()", "Log(5)", "Log(7)"]));
    assert_eq!(run.outcome, Outcome::Completed);
}

#[test]
fn return_out_of_nested_awaiting_finallys_keeps_its_value() {
    let d = Dsl::new();
    let inner = d.try_finally(
        Block::new(vec![d.awaited("A"), d.ret(Some(d.int(7))), d.log(1)]),
        Block::new(vec![d.awaited("B"), d.log(2)]),
    );
    let outer = d.try_finally(Block::new(vec![inner, d.log(3)]), Block::new(vec![d.awaited("C"), d.log(4)]));
    let body = Block::new(vec![outer, d.ret(Some(d.int(0)))]);
    let m = d.method("ReturnTwo", Type::task_of(Type::Int), body);
    let host = ScriptedHost::new()
        .on("A", Reply::Pending(Value::Void))
        .on("B", Reply::Pending(Value::Void))
        .on("C", Reply::Pending(Value::Void));

    let run = equivalent(&m, &host, vec![]);
    assert_eq!(run.trace, log_trace(&["A()", "B()", "Log(2)", "C()", "Log(4)"]));
    assert_eq!(run.outcome, Outcome::Returned(Value::Int(7)));
}

#[test]
fn goto_out_of_awaiting_finally_skips_its_tail() {
    let mut d = Dsl::new();
    let out = d.label("out");
    let body = Block::new(vec![
        d.try_finally(
            Block::new(vec![d.awaited("A"), d.log(1)]),
            Block::new(vec![d.awaited("B"), d.goto(&out), d.log(2)]),
        ),
        d.log(3),
        d.label_stmt(&out),
        d.log(4),
    ]);
    let m = d.method("LeaveFinally", Type::task(), body);
    let host = ScriptedHost::new().on("A", Reply::Pending(Value::Void)).on("B", Reply::Pending(Value::Void));

    let run = equivalent(&m, &host, vec![]);
    assert_eq!(run.trace, log_trace(&["A()", "Log(1)", "B()", "Log(4)"]));
    assert_eq!(run.outcome, Outcome::Completed);
}

#[test]
fn goto_out_of_awaiting_finally_drops_the_pending_exception() {
    let mut d = Dsl::new();
    let out = d.label("out");
    let body = Block::new(vec![
        d.try_finally(Block::new(vec![d.awaited("A"), d.log(1)]), Block::new(vec![d.awaited("B"), d.goto(&out)])),
        d.log(2),
        d.label_stmt(&out),
        d.log(3),
    ]);
    let m = d.method("Swallow", Type::task(), body);
    let host = ScriptedHost::new().on("A", Reply::PendingFault("boom".into())).on("B", Reply::Pending(Value::Void));

    let run = equivalent(&m, &host, vec![]);
    assert_eq!(run.trace, log_trace(&["A()", "B()", "Log(3)"]));
    assert_eq!(run.outcome, Outcome::Completed);
}

#[test]
fn await_in_catch_sees_the_caught_exception() {
    let mut d = Dsl::new();
    let e = d.var("e", Type::exception());
    let catch = CatchBlock {
        local: Some(e.clone()),
        exception_ty: Type::exception(),
        filter: Some(d.host("ShouldHandle", Type::Bool, vec![])),
        body: Block::new(vec![d.awaited("Recover"), d.log_expr(d.local_ref(&e))]),
    };
    let body = Block::new(vec![d.try_stmt(Block::new(vec![d.awaited("A"), d.log(1)]), vec![catch], None), d.log(2)]);
    let m = d.method("Catch", Type::task(), body);
    let host = ScriptedHost::new()
        .on("A", Reply::PendingFault("boom".into()))
        .on("ShouldHandle", Reply::Return(Value::Bool(true)))
        .on("Recover", Reply::Pending(Value::Void));

    let run = equivalent(&m, &host, vec![]);
    assert_eq!(run.trace.len(), 5);
    assert_eq!(run.trace[..3], log_trace(&["A()", "ShouldHandle()", "Recover()"])[..]);
    assert_eq!(run.trace[4], "Log(2)");
    assert_eq!(run.outcome, Outcome::Completed);
}

#[test]
fn rejected_filter_lets_the_exception_escape() {
    let d = Dsl::new();
    let catch = CatchBlock {
        local: None,
        exception_ty: Type::exception(),
        filter: Some(d.host("ShouldHandle", Type::Bool, vec![])),
        body: Block::new(vec![d.awaited("Recover"), d.log(1)]),
    };
    let body = Block::new(vec![d.try_stmt(Block::new(vec![d.awaited("A")]), vec![catch], None), d.log(2)]);
    let m = d.method("Filtered", Type::task(), body);
    let host = ScriptedHost::new()
        .on("A", Reply::Faulted("boom".into()))
        .on("ShouldHandle", Reply::Return(Value::Bool(false)));

    let run = equivalent(&m, &host, vec![]);
    assert_eq!(run.trace, log_trace(&["A()", "ShouldHandle()"]));
    assert_eq!(run.outcome, Outcome::Threw("Exception: boom".to_string()));
}

#[test]
fn rethrow_after_await_in_catch_keeps_the_exception() {
    let d = Dsl::new();
    let catch = d.catch_all(None, Block::new(vec![d.awaited("Report"), d.rethrow()]));
    let body = Block::new(vec![d.try_stmt(Block::new(vec![d.throw_new("bad")]), vec![catch], None), d.log(1)]);
    let m = d.method("Rethrow", Type::task(), body);
    let host = ScriptedHost::new().on("Report", Reply::Pending(Value::Void));

    let run = equivalent(&m, &host, vec![]);
    assert_eq!(run.trace, log_trace(&["Report()"]));
    assert_eq!(run.outcome, Outcome::Threw("Exception: bad".to_string()));
}

#[test]
fn nested_handlers_with_awaits_at_every_level() {
    let d = Dsl::new();
    let inner = d.try_finally(
        Block::new(vec![d.log(1), d.awaited("A"), d.throw_new("inner")]),
        Block::new(vec![d.awaited("B"), d.log(2)]),
    );
    let catch = d.catch_all(None, Block::new(vec![d.awaited("C"), d.log(3)]));
    let outer = d.try_stmt(Block::new(vec![inner, d.log(99)]), vec![catch], Some(Block::new(vec![d.awaited("D"), d.log(4)])));
    let m = d.method("Nested", Type::task_of(Type::Int), Block::new(vec![outer, d.ret(Some(d.int(1)))]));
    let host = ScriptedHost::new()
        .on("A", Reply::Pending(Value::Void))
        .on("B", Reply::Pending(Value::Void))
        .on("C", Reply::Pending(Value::Void))
        .on("D", Reply::Pending(Value::Void));

    let run = equivalent(&m, &host, vec![]);
    assert_eq!(run.trace, log_trace(&["Log(1)", "A()", "B()", "Log(2)", "C()", "Log(3)", "D()", "Log(4)"]));
    assert_eq!(run.outcome, Outcome::Returned(Value::Int(1)));
}

#[test]
fn exception_before_the_first_await_faults_the_task() {
    let d = Dsl::new();
    let body = Block::new(vec![d.log(1), d.throw_new("early"), d.awaited("Never")]);
    let m = d.method("Early", Type::task(), body);

    let run = equivalent(&m, &ScriptedHost::new(), vec![]);
    assert_eq!(run.trace, log_trace(&["Log(1)"]));
    assert_eq!(run.outcome, Outcome::Threw("Exception: early".to_string()));
}

#[test]
fn synchronous_host_throw_inside_await_operand() {
    let d = Dsl::new();
    let body = Block::new(vec![d.log(1), d.awaited("Explode"), d.log(2)]);
    let m = d.method("Explode", Type::task(), body);
    let host = ScriptedHost::new().on("Explode", Reply::Throw("sync".into()));

    let run = equivalent(&m, &host, vec![]);
    assert_eq!(run.trace, log_trace(&["Log(1)", "Explode()"]));
    assert_eq!(run.outcome, Outcome::Threw("Exception: sync".to_string()));
}

#[test]
fn async_void_runs_to_completion() {
    let d = Dsl::new();
    let body = Block::new(vec![d.log(1), d.awaited("A"), d.log(2)]);
    let m = d.method("Fire", Type::Void, body);
    let host = ScriptedHost::new().on("A", Reply::Pending(Value::Void));

    let run = equivalent(&m, &host, vec![]);
    assert_eq!(run.trace, log_trace(&["Log(1)", "A()", "Log(2)"]));
    assert_eq!(run.outcome, Outcome::Completed);
}

#[test]
fn value_task_of_int_result() {
    let d = Dsl::new();
    let doubled = d.binary(BinOp::Mul, d.await_int("Fetch"), d.int(2), Type::Int);
    let m = d.method("Doubled", Type::value_task_of(Type::Int), Block::new(vec![d.ret(Some(doubled))]));
    let host = ScriptedHost::new().on("Fetch", Reply::Pending(Value::Int(21)));

    let run = equivalent(&m, &host, vec![]);
    assert_eq!(run.outcome, Outcome::Returned(Value::Int(42)));
}

#[test]
fn divide_by_zero_after_resumption() {
    let d = Dsl::new();
    let quotient = d.binary(BinOp::Div, d.int(10), d.await_int("Zero"), Type::Int);
    let m = d.method("Divide", Type::task_of(Type::Int), Block::new(vec![d.ret(Some(quotient))]));
    let host = ScriptedHost::new().on("Zero", Reply::Pending(Value::Int(0)));

    let run = equivalent(&m, &host, vec![]);
    assert!(matches!(run.outcome, Outcome::Threw(ref message) if message.starts_with("DivideByZeroException")));
}

#[test]
fn sequential_awaits_share_one_awaiter_field() {
    let d = Dsl::new();
    let body = Block::new(vec![d.awaited("A"), d.awaited("B"), d.awaited("C"), d.log(1)]);
    let m = d.method("Sequential", Type::task(), body);
    let host = ScriptedHost::new()
        .on("A", Reply::Pending(Value::Void))
        .on("B", Reply::Pending(Value::Void))
        .on("C", Reply::Pending(Value::Void));
    equivalent(&m, &host, vec![]);

    let session = LoweringSession::with_core_library(LoweringOptions::default());
    let mut diagnostics = tern_diagnostics::DiagnosticBag::new();
    let tern_async::LoweredMethod::StateMachine { machine, .. } = tern_async::lower_method(&session, &m, &mut diagnostics)
    else {
        panic!("expected a state machine");
    };
    assert_eq!(machine.kind, StateMachineKind::AsyncMethod);
    let awaiters = machine.fields.iter().filter(|f| f.role == tern_async::FieldRole::Awaiter).count();
    assert_eq!(awaiters, 1);
}
