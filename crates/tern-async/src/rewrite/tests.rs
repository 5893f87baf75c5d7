// SPDX-License-Identifier: (MIT OR Apache-2.0)
use tern_ast::walk::{walk_stmt, Visitor};
use tern_ast::{Block, LocalKind, MethodDecl, MethodRef, NodeFactory, ParamSymbol, Span, Stmt, StmtKind, Type};
use tern_diagnostics::DiagnosticBag;

use crate::{lower_method, LoweringOptions, LoweringSession};

fn external(name: &str, params: Vec<Type>, ret: Type) -> MethodRef {
    MethodRef::static_method(Type::class("C"), name, params, ret)
}

fn awaited(f: &NodeFactory, name: &str) -> Stmt {
    let call = f.call(None, &external(name, vec![], Type::task()), vec![]);
    f.expr_stmt(f.await_task(call))
}

fn log(f: &NodeFactory, value: i64) -> Stmt {
    f.expr_stmt(f.call(None, &external("Log", vec![Type::Int], Type::Void), vec![f.int(value)]))
}

fn method(return_ty: Type, body: Block) -> MethodDecl {
    MethodDecl {
        name: "M".to_string(),
        container: Type::class("C"),
        is_static: true,
        is_async: true,
        params: Vec::new(),
        return_ty,
        body,
        hoisted_locals: Vec::new(),
        span: Span::new(0, 100),
    }
}

fn step_function(method: &MethodDecl) -> Block {
    let session = LoweringSession::with_core_library(LoweringOptions::default());
    let mut diags = DiagnosticBag::new();
    let lowered = lower_method(&session, method, &mut diags);
    assert!(diags.is_empty(), "{:?}", diags.iter().collect::<Vec<_>>());
    match lowered.machine().and_then(|m| m.move_next()) {
        Some(move_next) => move_next.body.clone(),
        None => panic!("no step function for {}", method.name),
    }
}

/// Every statement of a block, outermost first.
#[derive(Default)]
struct Flatten(Vec<Stmt>);

impl Visitor for Flatten {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        self.0.push(stmt.clone());
        walk_stmt(self, stmt)
    }
}

fn all_stmts(block: &Block) -> Vec<Stmt> {
    let mut flat = Flatten::default();
    flat.visit_block(block);
    flat.0
}

fn switches(block: &Block) -> Vec<Vec<i64>> {
    all_stmts(block)
        .into_iter()
        .filter_map(|s| match s.kind {
            StmtKind::Switch { cases, .. } => Some(cases.into_iter().map(|(c, _)| c).collect()),
            _ => None,
        })
        .collect()
}

fn labels(block: &Block) -> Vec<String> {
    all_stmts(block)
        .into_iter()
        .filter_map(|s| match s.kind {
            StmtKind::Label(label) => Some(label.name),
            _ => None,
        })
        .collect()
}

#[test]
fn one_dispatch_case_per_await() {
    let f = NodeFactory::new();
    let body = Block::new(vec![awaited(&f, "A"), awaited(&f, "B"), awaited(&f, "C")]);
    let step = step_function(&method(Type::task(), body));
    assert_eq!(switches(&step), vec![vec![0, 1, 2]]);
    let resumes = labels(&step).iter().filter(|l| l.starts_with("resume")).count();
    assert_eq!(resumes, 3);
    let text = step.to_string();
    assert_eq!(text.matches(".AwaitUnsafeOnCompleted<TaskAwaiter, <M>d__0>(").count(), 3, "{}", text);
    assert!(text.contains("this.<>t__builder.SetResult();"), "{}", text);
    assert!(text.contains("this.<>t__builder.SetException("), "{}", text);
}

#[test]
fn step_function_shape() {
    let f = NodeFactory::new();
    let step = step_function(&method(Type::task(), Block::new(vec![awaited(&f, "A")])));
    let kinds: Vec<&StmtKind> = step.stmts.iter().map(|s| &s.kind).collect();
    assert!(matches!(kinds[0], StmtKind::Expr(_)), "cachedState load first");
    assert!(matches!(kinds[1], StmtKind::Try { catches, finally: None, .. } if catches.len() == 1));
    assert!(matches!(kinds[2], StmtKind::Label(l) if l.name.starts_with("exit")));
    assert!(matches!(step.stmts.last().map(|s| &s.kind), Some(StmtKind::Return(None))));
    assert!(step.to_string().contains("this.<>1__state = -2;"));
}

#[test]
fn try_with_await_gets_nested_dispatch_and_guarded_finally() {
    let f = NodeFactory::new();
    let guarded = f.try_finally(Block::new(vec![awaited(&f, "A")]), Block::new(vec![log(&f, 1)]));
    let step = step_function(&method(Type::task(), Block::new(vec![guarded])));

    // Outer switch enters the try region, inner switch picks the resume label.
    assert_eq!(switches(&step), vec![vec![0], vec![0]]);
    assert!(labels(&step).iter().any(|l| l.starts_with("tryDispatch")));

    let user_try = all_stmts(&step)
        .into_iter()
        .find_map(|s| match s.kind {
            StmtKind::Try { body, finally: Some(finally), .. } => Some((body, finally)),
            _ => None,
        })
        .unwrap();
    assert!(matches!(user_try.0.stmts[0].kind, StmtKind::Switch { .. }));
    let StmtKind::If { cond, .. } = &user_try.1.stmts[0].kind else {
        panic!("finally is not guarded: {}", user_try.1);
    };
    assert!(cond.to_string().ends_with(" < 0)"), "{}", cond);
}

#[test]
fn try_without_await_is_left_alone() {
    let f = NodeFactory::new();
    let plain = f.try_finally(Block::new(vec![log(&f, 1)]), Block::new(vec![log(&f, 2)]));
    let step = step_function(&method(Type::task(), Block::new(vec![plain, awaited(&f, "A")])));
    assert!(!labels(&step).iter().any(|l| l.starts_with("tryDispatch")));
    let finally = all_stmts(&step)
        .into_iter()
        .find_map(|s| match s.kind {
            StmtKind::Try { finally: Some(finally), .. } => Some(finally),
            _ => None,
        })
        .unwrap();
    assert!(matches!(finally.stmts[0].kind, StmtKind::Expr(_)));
}

#[test]
fn await_inside_if_is_flattened() {
    let f = NodeFactory::new();
    let flag = ParamSymbol { index: 0, name: "flag".to_string(), ty: Type::Bool };
    let branch = f.if_else(f.param_ref(&flag), awaited(&f, "A"), log(&f, 0));
    let mut m = method(Type::task(), Block::new(vec![branch]));
    m.params = vec![flag];
    let step = step_function(&m);
    let stmts = all_stmts(&step);
    assert!(!stmts.iter().any(|s| matches!(s.kind, StmtKind::If { .. })));
    let names = labels(&step);
    assert!(names.iter().any(|l| l.starts_with("else")));
    assert!(names.iter().any(|l| l.starts_with("ifEnd")));
    assert!(step.to_string().contains("if (!this.flag) goto else"));
}

#[test]
fn returned_value_completes_the_builder() {
    let mut f = NodeFactory::new();
    let x = f.local("x", Type::Int, LocalKind::User);
    let body = Block::with_locals(
        vec![x.clone()],
        vec![f.assign_stmt(f.local_ref(&x), f.int(7)), awaited(&f, "A"), f.ret(Some(f.local_ref(&x)))],
    );
    let mut m = method(Type::task_of(Type::Int), body);
    m.hoisted_locals = vec![x.id];
    let step = step_function(&m);
    let text = step.to_string();
    assert!(text.contains("this.<x>5__1 = 7;"), "{}", text);
    assert!(text.contains(" = this.<x>5__1;\n"), "{}", text);
    assert!(text.contains("goto exit"), "{}", text);
    assert!(text.contains("this.<>t__builder.SetResult(result"), "{}", text);
    assert_eq!(step.locals.len(), 2, "cachedState and result");
}

#[test]
fn hoisted_reference_fields_are_cleared_on_completion() {
    let mut f = NodeFactory::new();
    let s = f.local("s", Type::String, LocalKind::User);
    let body = Block::with_locals(
        vec![s.clone()],
        vec![f.assign_stmt(f.local_ref(&s), f.string("x")), awaited(&f, "A")],
    );
    let mut m = method(Type::task(), body);
    m.hoisted_locals = vec![s.id];
    let text = step_function(&m).to_string();
    // Once in the exception handler, once on normal exit.
    assert_eq!(text.matches("this.<s>5__1 = null;").count(), 2, "{}", text);
}

#[test]
fn hoisted_catch_variable_is_stored_from_a_fresh_local() {
    let mut f = NodeFactory::new();
    let e = f.local("e", Type::exception(), LocalKind::User);
    let report = external("Report", vec![Type::exception()], Type::Void);
    let handler = f.catch_all(Some(e.clone()), Block::new(vec![f.expr_stmt(f.call(None, &report, vec![f.local_ref(&e)]))]));
    let protected = f.try_stmt(Block::new(vec![awaited(&f, "A")]), vec![handler], None);
    let mut m = method(Type::task(), Block::new(vec![protected]));
    m.hoisted_locals = vec![e.id];
    let text = step_function(&m).to_string();
    assert!(text.contains("catch (Exception caught"), "{}", text);
    assert!(text.contains("this.<e>5__1 = caught"), "{}", text);
    assert!(text.contains("C.Report(this.<e>5__1);"), "{}", text);
}

#[test]
fn iterator_yields_publish_through_the_promise() {
    let f = NodeFactory::new();
    let body = Block::new(vec![f.yield_return(f.int(1)), awaited(&f, "A"), f.yield_break()]);
    let step = step_function(&method(Type::async_enumerable(Type::Int), body));
    let text = step.to_string();
    assert_eq!(switches(&step), vec![vec![-3, 0]]);
    assert!(text.contains("this.<>2__current = 1;"), "{}", text);
    assert!(text.contains("this.<>v__promiseOfValueOrEnd.SetResult(true);"), "{}", text);
    assert!(text.contains("this.<>v__promiseOfValueOrEnd.SetResult(false);"), "{}", text);
    assert!(text.contains("this.<>w__disposeMode = true;"), "{}", text);
    assert!(text.contains("this.<>t__builder.Complete();"), "{}", text);
    // Dispose check at entry and after the yield's resume point.
    assert_eq!(text.matches("if (this.<>w__disposeMode) goto exit").count(), 2, "{}", text);
}

#[test]
fn iterator_disposal_unwinds_through_finally() {
    let f = NodeFactory::new();
    let guarded = f.try_finally(Block::new(vec![f.yield_return(f.int(1))]), Block::new(vec![log(&f, 9)]));
    let step = step_function(&method(Type::async_enumerable(Type::Int), Block::new(vec![guarded])));
    let text = step.to_string();
    // Inside the try, disposal leaves through the finally, then continues
    // outward from the label after it.
    assert!(labels(&step).iter().any(|l| l.starts_with("afterFinally")), "{}", text);
    assert!(text.contains("if (this.<>w__disposeMode) goto afterFinally"), "{}", text);
    let finally = all_stmts(&step)
        .into_iter()
        .find_map(|s| match s.kind {
            StmtKind::Try { finally: Some(finally), .. } => Some(finally),
            _ => None,
        })
        .unwrap();
    let StmtKind::If { cond, .. } = &finally.stmts[0].kind else {
        panic!("finally is not guarded: {}", finally);
    };
    assert!(cond.to_string().ends_with(" == -1)"), "{}", cond);
}
