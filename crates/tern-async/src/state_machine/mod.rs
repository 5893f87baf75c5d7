// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! State machine synthesis.
//!
//! Builds the resumable type for one async method or async iterator: its
//! fields, constructor, step function and interface members, plus the
//! kickoff body that replaces the method.

mod descriptor;
mod hoist;
mod members;
mod states;

pub use descriptor::{FieldDef, FieldRole, StateMachineDescriptor, StateMachineKind, SynthesizedMethod};
pub use hoist::locals_crossing_suspensions;
pub use states::{
    StateEntry, StateMap, SuspensionKind, FINISHED_STATE, FIRST_AWAIT_STATE, FIRST_YIELD_STATE, NOT_STARTED_STATE,
};

pub(crate) use descriptor::FieldLayout;
pub(crate) use states::StateAllocator;

use tern_ast::{MethodDecl, NodeFactory, Type, TypeKind};
use tern_diagnostics::DiagnosticBag;

use crate::error::LoweringError;
use crate::rewrite::{rewrite_step_function, AwaitRegistration, IteratorFlavor, MethodFlavor, StepFlavor};
use crate::session::LoweringSession;
use crate::well_known::{state_machine_interface, AsyncShape, BuilderApi, BuilderMembers, MachineInterface};
use crate::LoweredMethod;

use members::MachineParts;

pub(crate) fn lower(
    session: &LoweringSession,
    method: &MethodDecl,
    shape: &AsyncShape,
    diagnostics: &mut DiagnosticBag,
) -> Result<LoweredMethod, LoweringError> {
    let builder = BuilderMembers::resolve(session.members(), shape, method.span)?;
    let machine_interface = MachineInterface::resolve(session.members(), method.span)?;

    let mut f = NodeFactory::for_method(method);
    let body = crate::prepare_body(session, method, &mut f, shape.is_iterator(), diagnostics);
    let hoisted = hoist::plan_hoisting(&body, &method.hoisted_locals, session.options().is_debug());

    let kind = match shape {
        AsyncShape::Enumerable(_) => StateMachineKind::AsyncIterator { enumerable: true },
        AsyncShape::Enumerator(_) => StateMachineKind::AsyncIterator { enumerable: false },
        _ => StateMachineKind::AsyncMethod,
    };
    let is_value_type = kind == StateMachineKind::AsyncMethod && !session.options().is_debug();
    let name = format!("<{}>d__{}", method.name, session.next_ordinal());
    let type_kind = if is_value_type { TypeKind::Struct } else { TypeKind::Class };
    let machine_ty = Type::named(name.clone(), Vec::new(), type_kind);

    let mut layout = FieldLayout::new(machine_ty.clone());
    layout.add("<>1__state", Type::Int, FieldRole::State);
    layout.add("<>t__builder", builder.builder_ty.clone(), FieldRole::Builder);
    if let BuilderApi::Iterator { promise, .. } = &builder.api {
        let element = shape.result_type().cloned().unwrap_or(Type::Object);
        layout.add("<>2__current", element, FieldRole::Current);
        layout.add("<>w__disposeMode", Type::Bool, FieldRole::DisposeMode);
        layout.add("<>v__promiseOfValueOrEnd", promise.promise_ty.clone(), FieldRole::Promise);
        if kind == (StateMachineKind::AsyncIterator { enumerable: true }) {
            layout.add("<>l__initialThreadId", Type::Int, FieldRole::InitialThreadId);
        }
    }
    if let Some(this_ty) = method.this_type() {
        layout.add("<>4__this", this_ty.clone(), FieldRole::This);
    }
    for param in &method.params {
        layout.add(param.name.clone(), param.ty.clone(), FieldRole::Parameter(param.index));
        if kind == (StateMachineKind::AsyncIterator { enumerable: true }) {
            layout.add(format!("<>3__{}", param.name), param.ty.clone(), FieldRole::ParameterProxy(param.index));
        }
    }
    for local in &hoisted {
        layout.add_hoisted(local);
    }

    let flavor: Box<dyn StepFlavor> = match &builder.api {
        BuilderApi::Method { set_result, set_exception, .. } => Box::new(MethodFlavor {
            set_result: set_result.clone(),
            set_exception: set_exception.clone(),
        }),
        BuilderApi::Iterator { complete, promise, .. } => Box::new(IteratorFlavor {
            complete: complete.clone(),
            promise: promise.clone(),
        }),
    };
    let registration = AwaitRegistration {
        on_completed: builder.await_on_completed.clone(),
        unsafe_on_completed: builder.await_unsafe_on_completed.clone(),
    };
    let result_ty = if shape.is_iterator() { None } else { shape.result_type() };
    let step = rewrite_step_function(
        body,
        &mut f,
        &mut layout,
        flavor.as_ref(),
        &registration,
        session.previous_states(&method.name),
        result_ty,
    );

    let parts = MachineParts { method, kind, is_value_type, builder: &builder };
    let constructor = members::constructor(&f, &layout, &parts);
    let mut methods = vec![
        SynthesizedMethod {
            name: "MoveNext".to_string(),
            params: Vec::new(),
            ret: Type::Void,
            body: step.body,
            implements: Some(machine_interface.move_next.clone()),
        },
        members::set_state_machine(&f, &layout, &parts, &machine_interface.set_state_machine),
    ];
    methods.extend(members::iterator_members(&mut f, &layout, &parts));
    let kickoff = members::kickoff(&mut f, &layout, &parts);

    let mut interfaces = vec![state_machine_interface()];
    if let BuilderApi::Iterator { interfaces: members, .. } = &builder.api {
        if kind == (StateMachineKind::AsyncIterator { enumerable: true }) {
            interfaces.push(members.get_async_enumerator.container.clone());
        }
        interfaces.push(members.move_next_async.container.clone());
        interfaces.push(members.dispose_async.container.clone());
        interfaces.push(members.source_get_result.container.clone());
        interfaces.push(members.untyped_get_result.container.clone());
    }

    let machine = StateMachineDescriptor {
        name,
        ty: machine_ty,
        kind,
        is_value_type,
        interfaces,
        fields: layout.into_fields(),
        constructor,
        methods,
        state_map: step.state_map,
    };
    tracing::debug!(
        target: "async_lowering",
        machine = %machine.name,
        fields = machine.fields.len(),
        states = machine.state_map.len(),
        hoisted = hoisted.len(),
        "synthesized state machine"
    );
    Ok(LoweredMethod::StateMachine { kickoff, machine: Box::new(machine) })
}

#[cfg(test)]
mod tests;
