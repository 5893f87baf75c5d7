// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Members of the machine other than the step function, and the kickoff
//! body that replaces the original method.

use tern_ast::{BinOp, Block, Expr, FieldRef, LogicalOp, MethodDecl, MethodRef, NodeFactory, ParamSymbol, Stmt, Type,
    TypeKind};

use super::descriptor::{FieldLayout, FieldRole, StateMachineKind, SynthesizedMethod};
use super::states::{FINISHED_STATE, NOT_STARTED_STATE};
use crate::rewrite::this_field;
use crate::well_known::{state_machine_interface, BuilderApi, BuilderMembers, STATUS_SUCCEEDED};

pub(super) struct MachineParts<'a> {
    pub method: &'a MethodDecl,
    pub kind: StateMachineKind,
    pub is_value_type: bool,
    pub builder: &'a BuilderMembers,
}

impl MachineParts<'_> {
    fn is_enumerable(&self) -> bool {
        self.kind == StateMachineKind::AsyncIterator { enumerable: true }
    }
}

fn param(index: u32, name: &str, ty: Type) -> ParamSymbol {
    ParamSymbol { index, name: name.to_string(), ty }
}

fn method(name: &str, params: Vec<ParamSymbol>, ret: Type, body: Block, implements: Option<&MethodRef>) -> SynthesizedMethod {
    SynthesizedMethod { name: name.to_string(), params, ret, body, implements: implements.cloned() }
}

fn on(f: &NodeFactory, receiver: Expr, field: &FieldRef) -> Expr {
    f.field(Some(receiver), field)
}

fn role<'l>(layout: &'l FieldLayout, role: FieldRole) -> &'l FieldRef {
    match layout.role(role) {
        Some(field) => field,
        None => bug!("state machine has no {:?} field", role),
    }
}

/// `.ctor(int state)`: sets the initial state and creates the builder.
pub(super) fn constructor(f: &NodeFactory, layout: &FieldLayout, parts: &MachineParts<'_>) -> SynthesizedMethod {
    let state = param(0, "state", Type::Int);
    let mut stmts = vec![f.assign_stmt(this_field(f, layout, FieldRole::State), f.param_ref(&state))];
    if let BuilderApi::Iterator { current_thread_id, promise, .. } = &parts.builder.api {
        if parts.is_enumerable() {
            stmts.push(f.assign_stmt(
                this_field(f, layout, FieldRole::InitialThreadId),
                f.static_call(current_thread_id, Vec::new()),
            ));
        }
        stmts.push(f.assign_stmt(
            this_field(f, layout, FieldRole::Promise),
            f.new_object(promise.promise_ty.clone(), Vec::new()),
        ));
    }
    stmts.push(f.assign_stmt(
        this_field(f, layout, FieldRole::Builder),
        f.static_call(&parts.builder.create, Vec::new()),
    ));
    method(".ctor", vec![state], Type::Void, Block::new(stmts), None)
}

/// Only a value-type machine forwards to the builder, which needs the boxed
/// copy to resume on.
pub(super) fn set_state_machine(
    f: &NodeFactory,
    layout: &FieldLayout,
    parts: &MachineParts<'_>,
    implements: &MethodRef,
) -> SynthesizedMethod {
    let machine = param(0, "stateMachine", state_machine_interface());
    let stmts = match &parts.builder.api {
        BuilderApi::Method { set_state_machine, .. } if parts.is_value_type => {
            let builder = this_field(f, layout, FieldRole::Builder);
            vec![f.expr_stmt(f.call(Some(builder), set_state_machine, vec![f.param_ref(&machine)]))]
        }
        _ => Vec::new(),
    };
    method("SetStateMachine", vec![machine], Type::Void, Block::new(stmts), Some(implements))
}

/// The new body of the async method: create the machine, copy `this` and
/// the arguments in, and start it (or hand it out, for iterators).
pub(super) fn kickoff(f: &mut NodeFactory, layout: &FieldLayout, parts: &MachineParts<'_>) -> Block {
    let machine_ty = layout.owner().clone();
    let sm = f.synthesized("stateMachine", machine_ty.clone());
    let f = &*f;
    let initial = if parts.is_enumerable() { FINISHED_STATE } else { NOT_STARTED_STATE };

    let mut stmts = vec![f.assign_stmt(f.local_ref(&sm), f.new_object(machine_ty.clone(), vec![f.int(initial as i64)]))];
    if let Some(this_ty) = parts.method.this_type() {
        let field = role(layout, FieldRole::This);
        stmts.push(f.assign_stmt(on(f, f.local_ref(&sm), field), f.this(this_ty.clone())));
    }
    for p in &parts.method.params {
        let target = if parts.is_enumerable() { FieldRole::ParameterProxy(p.index) } else { FieldRole::Parameter(p.index) };
        stmts.push(f.assign_stmt(on(f, f.local_ref(&sm), role(layout, target)), f.param_ref(p)));
    }

    match &parts.builder.api {
        BuilderApi::Method { start, task, .. } => {
            let builder = role(layout, FieldRole::Builder);
            let start = start.instantiate(vec![machine_ty]);
            stmts.push(f.expr_stmt(f.call(Some(on(f, f.local_ref(&sm), builder)), &start, vec![f.local_ref(&sm)])));
            if let Some(task) = task {
                stmts.push(f.ret(Some(f.call(Some(on(f, f.local_ref(&sm), builder)), task, Vec::new()))));
            }
        }
        BuilderApi::Iterator { .. } => stmts.push(f.ret(Some(f.local_ref(&sm)))),
    }
    Block::with_locals(vec![sm], stmts)
}

/// `IAsyncEnumerable`, `IAsyncEnumerator`, `IAsyncDisposable` and
/// `IValueTaskSource` members of an async iterator. Empty for async methods.
pub(super) fn iterator_members(
    f: &mut NodeFactory,
    layout: &FieldLayout,
    parts: &MachineParts<'_>,
) -> Vec<SynthesizedMethod> {
    let BuilderApi::Iterator { move_next, promise, current_thread_id, interfaces, .. } = &parts.builder.api else {
        return Vec::new();
    };
    let machine_ty = layout.owner().clone();
    let enumerator_result = f.synthesized("result", machine_ty.clone());
    let version = f.synthesized("version", Type::Int);
    let f = &*f;

    let this = || f.this(machine_ty.clone());
    let field = |r: FieldRole| this_field(f, layout, r);
    let state_is = |state: i32| f.eq(field(FieldRole::State), f.int(state as i64));
    let on_promise = |m: &MethodRef, args: Vec<Expr>| f.call(Some(field(FieldRole::Promise)), m, args);
    let value_task_bool = Type::value_task_of(Type::Bool);
    let step = || {
        let move_next = move_next.instantiate(vec![machine_ty.clone()]);
        f.expr_stmt(f.call(Some(field(FieldRole::Builder)), &move_next, vec![this()]))
    };

    let mut methods = Vec::new();

    if parts.is_enumerable() {
        let token = param(0, "cancellationToken", Type::structure("CancellationToken"));
        let result = || f.local_ref(&enumerator_result);
        let reuse = f.logical(
            LogicalOp::And,
            state_is(FINISHED_STATE),
            f.eq(field(FieldRole::InitialThreadId), f.static_call(current_thread_id, Vec::new())),
        );
        let mut fresh = vec![f.assign_stmt(result(), f.new_object(machine_ty.clone(), vec![f.int(NOT_STARTED_STATE as i64)]))];
        if let Some(outer) = layout.role(FieldRole::This) {
            fresh.push(f.assign_stmt(on(f, result(), outer), field(FieldRole::This)));
        }
        let mut stmts = vec![f.if_else(
            reuse,
            f.block(vec![
                f.assign_stmt(field(FieldRole::State), f.int(NOT_STARTED_STATE as i64)),
                f.assign_stmt(result(), this()),
            ]),
            f.block(fresh),
        )];
        for p in &parts.method.params {
            let working = role(layout, FieldRole::Parameter(p.index));
            stmts.push(f.assign_stmt(on(f, result(), working), field(FieldRole::ParameterProxy(p.index))));
        }
        stmts.push(f.ret(Some(result())));
        methods.push(method(
            "GetAsyncEnumerator",
            vec![token],
            interfaces.get_async_enumerator.ret.clone(),
            Block::with_locals(vec![enumerator_result.clone()], stmts),
            Some(&interfaces.get_async_enumerator),
        ));
    }

    // MoveNextAsync: run a step and report synchronously when it produced
    // a value or finished without suspending.
    let version_ref = || f.local_ref(&version);
    let stmts = vec![
        f.if_then(state_is(FINISHED_STATE), f.ret(Some(f.new_object(value_task_bool.clone(), vec![f.bool_lit(false)])))),
        f.expr_stmt(on_promise(&promise.reset, Vec::new())),
        step(),
        f.assign_stmt(version_ref(), on_promise(&promise.version, Vec::new())),
        f.if_then(
            f.eq(on_promise(&promise.get_status, vec![version_ref()]), f.int(STATUS_SUCCEEDED)),
            f.ret(Some(f.new_object(value_task_bool.clone(), vec![on_promise(&promise.get_result, vec![version_ref()])]))),
        ),
        f.ret(Some(f.new_object(value_task_bool.clone(), vec![this(), version_ref()]))),
    ];
    methods.push(method(
        "MoveNextAsync",
        Vec::new(),
        value_task_bool.clone(),
        Block::with_locals(vec![version.clone()], stmts),
        Some(&interfaces.move_next_async),
    ));

    // DisposeAsync: refused while suspended at an await; otherwise resume in
    // dispose mode so pending finally blocks run.
    let value_task = Type::value_task();
    let stmts = vec![
        f.if_then(
            f.binary(BinOp::Ge, field(FieldRole::State), f.int(0), Type::Bool),
            f.throw(f.new_object(Type::named("NotSupportedException", Vec::new(), TypeKind::Class), Vec::new())),
        ),
        f.if_then(state_is(FINISHED_STATE), f.ret(Some(f.new_object(value_task.clone(), Vec::new())))),
        f.assign_stmt(field(FieldRole::DisposeMode), f.bool_lit(true)),
        f.expr_stmt(on_promise(&promise.reset, Vec::new())),
        step(),
        f.ret(Some(f.new_object(value_task.clone(), vec![this(), on_promise(&promise.version, Vec::new())]))),
    ];
    methods.push(method("DisposeAsync", Vec::new(), value_task, Block::new(stmts), Some(&interfaces.dispose_async)));

    let current = field(FieldRole::Current);
    methods.push(method(
        "get_Current",
        Vec::new(),
        current.ty.clone(),
        Block::new(vec![f.ret(Some(current))]),
        Some(&interfaces.current),
    ));

    let token = || param(0, "token", Type::Int);
    let forward = |name: &str, target: &MethodRef, iface: &MethodRef| -> SynthesizedMethod {
        let params: Vec<ParamSymbol> = if iface.params.len() == 1 {
            vec![token()]
        } else {
            ["continuation", "state", "token", "flags"]
                .iter()
                .zip(&iface.params)
                .enumerate()
                .map(|(i, (name, ty))| param(i as u32, name, ty.clone()))
                .collect()
        };
        let call = on_promise(target, params.iter().map(|p| f.param_ref(p)).collect());
        let body: Stmt = if iface.ret.is_void() { f.expr_stmt(call) } else { f.ret(Some(call)) };
        method(name, params, iface.ret.clone(), Block::new(vec![body]), Some(iface))
    };
    methods.push(forward("IValueTaskSource<bool>.GetResult", &promise.get_result, &interfaces.source_get_result));
    methods.push(forward("IValueTaskSource<bool>.GetStatus", &promise.get_status, &interfaces.source_get_status));
    methods.push(forward("IValueTaskSource<bool>.OnCompleted", &promise.on_completed, &interfaces.source_on_completed));
    methods.push(forward("IValueTaskSource.GetResult", &promise.get_result, &interfaces.untyped_get_result));
    methods
}
