// SPDX-License-Identifier: (MIT OR Apache-2.0)
use super::*;
use crate::config::LoweringOptions;
use crate::well_known::{BuilderKind, CoreLibrary, WellKnownMember};
use crate::{lower_method, lower_methods};
use tern_ast::{Block, Expr, ExprKind, LocalKind, MethodRef, ParamSymbol, Span, Stmt, StmtKind};

fn awaited_call(f: &mut NodeFactory, name: &str) -> Stmt {
    let m = MethodRef::static_method(Type::class("C"), name, vec![], Type::task());
    let call = f.call(None, &m, vec![]);
    f.expr_stmt(f.await_task(call))
}

fn decl(name: &str, return_ty: Type, params: Vec<ParamSymbol>, body: Block) -> MethodDecl {
    MethodDecl {
        name: name.to_string(),
        container: Type::class("C"),
        is_static: false,
        is_async: true,
        params,
        return_ty,
        body,
        hoisted_locals: Vec::new(),
        span: Span::new(0, 40),
    }
}

fn machine(lowered: &LoweredMethod) -> &StateMachineDescriptor {
    match lowered.machine() {
        Some(machine) => machine,
        None => panic!("expected a state machine, got {:?}", lowered),
    }
}

fn field_names(machine: &StateMachineDescriptor) -> Vec<&str> {
    machine.fields.iter().map(|f| f.field.name.as_str()).collect()
}

/// `async Task<int> F() { int x = 1; await A(); return x; }`
fn task_of_int(f: &mut NodeFactory) -> MethodDecl {
    let x = f.local("x", Type::Int, LocalKind::User);
    let set = f.assign_stmt(f.local_ref(&x), f.int(1));
    let awaited = awaited_call(f, "A");
    let ret = f.ret(Some(f.local_ref(&x)));
    let mut method = decl("F", Type::task_of(Type::Int), Vec::new(), Block::with_locals(vec![x.clone()], vec![set, awaited, ret]));
    method.hoisted_locals = vec![x.id];
    method
}

#[test]
fn task_method_becomes_struct_machine_in_release() {
    let mut f = NodeFactory::new();
    let method = task_of_int(&mut f);
    let session = LoweringSession::with_core_library(LoweringOptions::default());
    let mut diags = DiagnosticBag::new();
    let lowered = lower_method(&session, &method, &mut diags);
    assert!(diags.is_empty());

    let sm = machine(&lowered);
    assert_eq!(sm.name, "<F>d__0");
    assert!(sm.is_value_type);
    assert_eq!(sm.kind, StateMachineKind::AsyncMethod);
    assert_eq!(field_names(sm), vec!["<>1__state", "<>t__builder", "<>4__this", "<x>5__1", "<>u__1"]);
    assert_eq!(sm.field(FieldRole::Builder).unwrap().ty.to_string(), "AsyncTaskMethodBuilder<int>");
    assert_eq!(sm.state_map.states().collect::<Vec<_>>(), vec![FIRST_AWAIT_STATE]);

    let move_next = sm.move_next().unwrap();
    assert_eq!(move_next.implements.as_ref().unwrap().name, "MoveNext");
    let set_sm = sm.method("SetStateMachine").unwrap();
    assert_eq!(set_sm.body.stmts.len(), 1, "struct machines forward to the builder");
    assert_eq!(sm.constructor.params.len(), 1);
}

#[test]
fn kickoff_starts_the_machine_and_returns_its_task() {
    let mut f = NodeFactory::new();
    let method = task_of_int(&mut f);
    let session = LoweringSession::with_core_library(LoweringOptions::default());
    let lowered = lower_method(&session, &method, &mut DiagnosticBag::new());
    let kickoff = lowered.body();
    let text = kickoff.to_string();
    assert!(text.contains("= new <F>d__0(-1);"), "{}", text);
    assert!(text.contains(".<>4__this = this;"), "{}", text);
    assert!(text.contains(".<>t__builder.Start<<F>d__0>("), "{}", text);
    let Some(Stmt { kind: StmtKind::Return(Some(task)), .. }) = kickoff.stmts.last() else {
        panic!("kickoff must return the task");
    };
    assert_eq!(task.ty, Type::task_of(Type::Int));
}

#[test]
fn async_void_kickoff_has_no_return() {
    let mut f = NodeFactory::new();
    let body = Block::new(vec![awaited_call(&mut f, "A")]);
    let method = MethodDecl { is_static: true, ..decl("Fire", Type::Void, Vec::new(), body) };
    let session = LoweringSession::with_core_library(LoweringOptions::default());
    let lowered = lower_method(&session, &method, &mut DiagnosticBag::new());
    assert!(!lowered.body().stmts.iter().any(|s| matches!(s.kind, StmtKind::Return(_))));
    let sm = machine(&lowered);
    assert!(sm.field(FieldRole::This).is_none(), "static methods capture no receiver");
    assert_eq!(sm.field(FieldRole::Builder).unwrap().ty.to_string(), "AsyncVoidMethodBuilder");
}

#[test]
fn debug_builds_use_classes_and_hoist_every_user_local() {
    let mut f = NodeFactory::new();
    let y = f.local("y", Type::String, LocalKind::User);
    let mut method = task_of_int(&mut f);
    method.body.locals.push(y);
    let session = LoweringSession::with_core_library(LoweringOptions::debug());
    let lowered = lower_method(&session, &method, &mut DiagnosticBag::new());
    let sm = machine(&lowered);
    assert!(!sm.is_value_type);
    assert_eq!(sm.ty.to_string(), "<F>d__0");
    assert!(sm.field_named("<y>5__2").is_some());
    assert!(sm.method("SetStateMachine").unwrap().body.is_empty());
}

#[test]
fn enumerable_machine_layout_and_members() {
    let mut f = NodeFactory::new();
    let n = ParamSymbol { index: 0, name: "n".to_string(), ty: Type::Int };
    let body = Block::new(vec![
        f.yield_return(f.param_ref(&n)),
        awaited_call(&mut f, "A"),
        f.yield_return(f.int(2)),
    ]);
    let method = MethodDecl { is_static: true, ..decl("Range", Type::async_enumerable(Type::Int), vec![n], body) };
    let session = LoweringSession::with_core_library(LoweringOptions::default());
    let mut diags = DiagnosticBag::new();
    let lowered = lower_method(&session, &method, &mut diags);
    assert!(diags.is_empty());

    let sm = machine(&lowered);
    assert!(!sm.is_value_type, "iterators are always classes");
    assert_eq!(sm.kind, StateMachineKind::AsyncIterator { enumerable: true });
    assert_eq!(
        field_names(sm),
        vec![
            "<>1__state",
            "<>t__builder",
            "<>2__current",
            "<>w__disposeMode",
            "<>v__promiseOfValueOrEnd",
            "<>l__initialThreadId",
            "n",
            "<>3__n",
            "<>u__1",
        ]
    );
    assert_eq!(sm.state_map.states().collect::<Vec<_>>(), vec![-3, 0, -4]);
    assert_eq!(sm.interfaces.len(), 6);

    let names: Vec<&str> = sm.methods.iter().map(|m| m.name.as_str()).collect();
    for expected in [
        "MoveNext",
        "SetStateMachine",
        "GetAsyncEnumerator",
        "MoveNextAsync",
        "DisposeAsync",
        "get_Current",
        "IValueTaskSource<bool>.GetResult",
        "IValueTaskSource<bool>.GetStatus",
        "IValueTaskSource<bool>.OnCompleted",
        "IValueTaskSource.GetResult",
    ] {
        assert!(names.contains(&expected), "missing {}", expected);
    }

    // The enumerable starts finished and keeps arguments in proxies.
    let Stmt { kind: StmtKind::Expr(Expr { kind: ExprKind::Assign { value, .. }, .. }), .. } = &lowered.body().stmts[0]
    else {
        panic!("expected machine creation");
    };
    assert_eq!(value.to_string(), "new <Range>d__0(-2)");
    assert!(lowered.body().to_string().contains(".<>3__n = n;"));
}

#[test]
fn enumerator_machine_copies_arguments_directly() {
    let mut f = NodeFactory::new();
    let n = ParamSymbol { index: 0, name: "n".to_string(), ty: Type::Int };
    let body = Block::new(vec![f.yield_return(f.param_ref(&n))]);
    let method = decl("Items", Type::async_enumerator(Type::Int), vec![n], body);
    let session = LoweringSession::with_core_library(LoweringOptions::default());
    let lowered = lower_method(&session, &method, &mut DiagnosticBag::new());
    let sm = machine(&lowered);
    assert!(sm.field(FieldRole::InitialThreadId).is_none());
    assert!(sm.field(FieldRole::ParameterProxy(0)).is_none());
    assert!(sm.method("GetAsyncEnumerator").is_none());
    let text = lowered.body().to_string();
    assert!(text.contains("new <Items>d__0(-1)"), "{}", text);
    assert!(text.contains(".n = n;"), "{}", text);
}

#[test]
fn type_names_are_unique_across_methods() {
    let mut f = NodeFactory::new();
    let first = task_of_int(&mut f);
    let second = decl("G", Type::task(), Vec::new(), Block::new(vec![awaited_call(&mut f, "A")]));
    let session = LoweringSession::with_core_library(LoweringOptions::default());
    let lowered = lower_methods(&session, [&first, &second], &mut DiagnosticBag::new());
    assert_eq!(machine(&lowered[0]).name, "<F>d__0");
    assert_eq!(machine(&lowered[1]).name, "<G>d__1");
}

#[test]
fn missing_builder_member_leaves_method_unlowered() {
    let mut f = NodeFactory::new();
    let method = task_of_int(&mut f);
    let lib = CoreLibrary::without(&[WellKnownMember::BuilderCreate(BuilderKind::TaskOf)]);
    let session = LoweringSession::new(LoweringOptions::default(), Box::new(lib));
    let mut diags = DiagnosticBag::new();
    let lowered = lower_method(&session, &method, &mut diags);
    assert!(!lowered.is_lowered());
    assert_eq!(lowered.body(), &method.body);
    assert!(diags.contains_code("E0900"));
}

#[test]
fn unsupported_return_type_is_reported() {
    let mut f = NodeFactory::new();
    let method = decl("Bad", Type::Int, Vec::new(), Block::new(vec![awaited_call(&mut f, "A")]));
    let session = LoweringSession::with_core_library(LoweringOptions::default());
    let mut diags = DiagnosticBag::new();
    assert!(!lower_method(&session, &method, &mut diags).is_lowered());
    assert!(diags.contains_code("E0904"));
}

#[test]
fn previous_states_survive_an_inserted_await() {
    let mut f = NodeFactory::new();
    f.span = Span::new(5, 6);
    let kept = awaited_call(&mut f, "A");
    f.span = Span::new(2, 3);
    let inserted = awaited_call(&mut f, "B");
    let method = decl("F", Type::task(), Vec::new(), Block::new(vec![inserted, kept]));

    let previous = StateMap { entries: vec![StateEntry { offset: 5, kind: SuspensionKind::Await, state: 0 }] };
    let session = LoweringSession::with_core_library(LoweringOptions::default()).with_previous_states("F", previous);
    let lowered = lower_method(&session, &method, &mut DiagnosticBag::new());
    let states = &machine(&lowered).state_map;
    assert_eq!(states.entries[0].offset, 2);
    assert_eq!(states.entries[0].state, 1);
    assert_eq!(states.entries[1].offset, 5);
    assert_eq!(states.entries[1].state, 0);
}

#[test]
fn non_async_methods_pass_through() {
    let f = NodeFactory::new();
    let method = MethodDecl { is_async: false, ..decl("Sync", Type::Int, Vec::new(), Block::new(vec![f.ret(Some(f.int(1)))])) };
    let session = LoweringSession::with_core_library(LoweringOptions::default());
    let lowered = lower_method(&session, &method, &mut DiagnosticBag::new());
    assert!(!lowered.is_lowered());
    assert_eq!(session.members().len(), 0);
}

#[test]
fn runtime_async_lowers_methods_in_place_but_not_iterators() {
    let mut f = NodeFactory::new();
    let method = task_of_int(&mut f);
    let iterator = MethodDecl {
        is_static: true,
        ..decl("Items", Type::async_enumerable(Type::Int), Vec::new(), Block::new(vec![f.yield_return(f.int(1))]))
    };
    let session = LoweringSession::with_core_library(LoweringOptions::runtime_async());
    let mut diags = DiagnosticBag::new();
    let lowered = lower_methods(&session, [&method, &iterator], &mut diags);
    assert!(matches!(lowered[0], LoweredMethod::Direct { .. }));
    assert!(lowered[1].machine().is_some());
    assert!(diags.is_empty());
}

/// `async Task F() { GetRef().M(await A()); }` where `GetRef` returns a
/// struct by reference.
fn ref_receiver_across_await(f: &mut NodeFactory) -> MethodDecl {
    let mut get_ref = MethodRef::static_method(Type::class("C"), "GetRef", vec![], Type::structure("S"));
    get_ref.returns_ref = true;
    let receiver = f.call(None, &get_ref, vec![]);
    let a = MethodRef::static_method(Type::class("C"), "A", vec![], Type::task_of(Type::Int));
    let awaited = f.await_task(f.call(None, &a, vec![]));
    let m = MethodRef::instance(Type::structure("S"), "M", vec![Type::Int], Type::Void);
    let call = f.expr_stmt(f.call(Some(receiver), &m, vec![awaited]));
    decl("F", Type::task(), Vec::new(), Block::new(vec![call]))
}

#[test]
fn unpreservable_ref_is_reported_and_lowering_continues() {
    let mut f = NodeFactory::new();
    let method = ref_receiver_across_await(&mut f);
    let session = LoweringSession::with_core_library(LoweringOptions::default());
    let mut diags = DiagnosticBag::new();
    let lowered = lower_method(&session, &method, &mut diags);
    assert!(diags.contains_code("E0901"));
    assert_eq!(diags.len(), 1);
    assert!(lowered.is_lowered());
    assert_eq!(machine(&lowered).state_map.len(), 1);
}

#[test]
fn unpreservable_ref_with_runtime_async_still_lowers() {
    let mut f = NodeFactory::new();
    let method = ref_receiver_across_await(&mut f);
    let session = LoweringSession::with_core_library(LoweringOptions::runtime_async());
    let mut diags = DiagnosticBag::new();
    let lowered = lower_method(&session, &method, &mut diags);
    assert!(diags.contains_code("E0901"));
    assert!(matches!(lowered, LoweredMethod::Direct { .. }));
}

#[test]
fn await_in_filter_is_rejected_once_before_spilling() {
    let mut f = NodeFactory::new();
    let a = MethodRef::static_method(Type::class("C"), "Check", vec![], Type::task_of(Type::Bool));
    let filter = f.await_task(f.call(None, &a, vec![]));
    let catch = tern_ast::CatchBlock { local: None, exception_ty: Type::exception(), filter: Some(filter), body: Block::default() };
    let body = awaited_call(&mut f, "A");
    let guarded = f.try_stmt(Block::new(vec![body]), vec![catch], None);
    let method = decl("F", Type::task(), Vec::new(), Block::new(vec![guarded]));
    let session = LoweringSession::with_core_library(LoweringOptions::default());
    let mut diags = DiagnosticBag::new();
    let lowered = lower_method(&session, &method, &mut diags);
    assert!(diags.contains_code("E0903"));
    assert_eq!(diags.len(), 1);
    assert!(!lowered.is_lowered());
}
