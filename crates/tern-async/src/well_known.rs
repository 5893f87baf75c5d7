// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Library members the lowering depends on.
//!
//! The lowering never looks members up by name at a use site. It asks a
//! [`MemberResolver`] for a [`WellKnownMember`], gets back an open
//! [`MethodRef`], and closes it over the method's result type. Members that
//! the target library lacks surface as E0900.

use std::fmt;

use tern_ast::{MethodRef, Span, Type, TypeKind};

use crate::error::LoweringError;
use crate::session::MemberCache;

// ── Return type classification ──────────────────────────────────────────

/// Return type shape of an async method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsyncShape {
    Void,
    Task,
    TaskOf(Type),
    ValueTask,
    ValueTaskOf(Type),
    /// Async iterator returning `IAsyncEnumerable<T>`.
    Enumerable(Type),
    /// Async iterator returning `IAsyncEnumerator<T>`.
    Enumerator(Type),
}

impl AsyncShape {
    pub fn classify(ty: &Type) -> Option<AsyncShape> {
        let Type::Named { name, args, .. } = ty else {
            return match ty {
                Type::Void => Some(AsyncShape::Void),
                _ => None,
            };
        };
        let shape = match (name.as_str(), args.as_slice()) {
            ("Task", []) => AsyncShape::Task,
            ("Task", [t]) => AsyncShape::TaskOf(t.clone()),
            ("ValueTask", []) => AsyncShape::ValueTask,
            ("ValueTask", [t]) => AsyncShape::ValueTaskOf(t.clone()),
            ("IAsyncEnumerable", [t]) => AsyncShape::Enumerable(t.clone()),
            ("IAsyncEnumerator", [t]) => AsyncShape::Enumerator(t.clone()),
            _ => return None,
        };
        Some(shape)
    }

    pub fn is_iterator(&self) -> bool {
        matches!(self, AsyncShape::Enumerable(_) | AsyncShape::Enumerator(_))
    }

    /// Type of the value a `return` produces, or the element type of an
    /// iterator.
    pub fn result_type(&self) -> Option<&Type> {
        match self {
            AsyncShape::TaskOf(t)
            | AsyncShape::ValueTaskOf(t)
            | AsyncShape::Enumerable(t)
            | AsyncShape::Enumerator(t) => Some(t),
            AsyncShape::Void | AsyncShape::Task | AsyncShape::ValueTask => None,
        }
    }

    pub fn builder_kind(&self) -> BuilderKind {
        match self {
            AsyncShape::Void => BuilderKind::Void,
            AsyncShape::Task => BuilderKind::Task,
            AsyncShape::TaskOf(_) => BuilderKind::TaskOf,
            AsyncShape::ValueTask => BuilderKind::ValueTask,
            AsyncShape::ValueTaskOf(_) => BuilderKind::ValueTaskOf,
            AsyncShape::Enumerable(_) | AsyncShape::Enumerator(_) => BuilderKind::Iterator,
        }
    }

    /// Binding of the builder's `TResult` for this shape.
    fn type_map(&self) -> Vec<(String, Type)> {
        match self {
            AsyncShape::TaskOf(t) | AsyncShape::ValueTaskOf(t) => vec![("TResult".to_string(), t.clone())],
            _ => Vec::new(),
        }
    }
}

// ── Member catalogue ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuilderKind {
    Void,
    Task,
    TaskOf,
    ValueTask,
    ValueTaskOf,
    Iterator,
}

impl BuilderKind {
    /// The open builder type; generic builders take `TResult`.
    pub fn builder_type(self) -> Type {
        let result = || vec![Type::param("TResult")];
        match self {
            BuilderKind::Void => Type::structure("AsyncVoidMethodBuilder"),
            BuilderKind::Task => Type::structure("AsyncTaskMethodBuilder"),
            BuilderKind::TaskOf => Type::named("AsyncTaskMethodBuilder", result(), TypeKind::Struct),
            BuilderKind::ValueTask => Type::structure("AsyncValueTaskMethodBuilder"),
            BuilderKind::ValueTaskOf => Type::named("AsyncValueTaskMethodBuilder", result(), TypeKind::Struct),
            BuilderKind::Iterator => Type::structure("AsyncIteratorMethodBuilder"),
        }
    }

    fn task_type(self) -> Option<Type> {
        match self {
            BuilderKind::Task => Some(Type::task()),
            BuilderKind::TaskOf => Some(Type::task_of(Type::param("TResult"))),
            BuilderKind::ValueTask => Some(Type::value_task()),
            BuilderKind::ValueTaskOf => Some(Type::value_task_of(Type::param("TResult"))),
            BuilderKind::Void | BuilderKind::Iterator => None,
        }
    }

    fn has_result(self) -> bool {
        matches!(self, BuilderKind::TaskOf | BuilderKind::ValueTaskOf)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WellKnownMember {
    BuilderCreate(BuilderKind),
    BuilderStart(BuilderKind),
    BuilderSetResult(BuilderKind),
    BuilderSetException(BuilderKind),
    BuilderAwaitOnCompleted(BuilderKind),
    BuilderAwaitUnsafeOnCompleted(BuilderKind),
    BuilderSetStateMachine(BuilderKind),
    BuilderTask(BuilderKind),
    IteratorBuilderMoveNext,
    IteratorBuilderComplete,

    PromiseReset,
    PromiseSetResult,
    PromiseSetException,
    PromiseGetResult,
    PromiseGetStatus,
    PromiseOnCompleted,
    PromiseVersion,

    CurrentManagedThreadId,
    ExceptionDispatchCapture,
    ExceptionDispatchThrow,

    HelperAwaitTask,
    HelperAwaitTaskOf,
    HelperAwaitValueTask,
    HelperAwaitValueTaskOf,
    HelperAwaitAwaiter,
    HelperUnsafeAwaitAwaiter,

    StateMachineMoveNext,
    StateMachineSetStateMachine,
    EnumerableGetAsyncEnumerator,
    EnumeratorMoveNextAsync,
    EnumeratorCurrent,
    DisposableDisposeAsync,
    SourceGetResult,
    SourceGetStatus,
    SourceOnCompleted,
    UntypedSourceGetResult,
}

impl fmt::Display for WellKnownMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match CoreLibrary::definition(*self) {
            Some(method) => write!(f, "{}", method),
            None => write!(f, "{:?}", self),
        }
    }
}

/// Source of library members.
pub trait MemberResolver {
    fn resolve(&self, member: WellKnownMember) -> Option<MethodRef>;
}

/// The standard library surface, optionally with members removed to model
/// an incomplete target.
#[derive(Debug, Clone, Default)]
pub struct CoreLibrary {
    missing: Vec<WellKnownMember>,
}

impl CoreLibrary {
    pub fn new() -> Self {
        CoreLibrary::default()
    }

    pub fn without(members: &[WellKnownMember]) -> Self {
        CoreLibrary { missing: members.to_vec() }
    }

    /// The open definition of `member`, or `None` if the member does not
    /// exist for that builder kind.
    pub fn definition(member: WellKnownMember) -> Option<MethodRef> {
        use WellKnownMember::*;

        let tresult = || Type::param("TResult");
        let sm_param = || Type::param("TStateMachine");
        let promise = || Type::named("ManualResetValueTaskSourceCore", vec![tresult()], TypeKind::Struct);
        let element = || Type::param("T");
        let bool_source = || Type::named("IValueTaskSource", vec![Type::Bool], TypeKind::Interface);
        let on_completed_params = || {
            vec![
                Type::named("Action", vec![Type::Object], TypeKind::Class),
                Type::Object,
                Type::Int,
                Type::Int,
            ]
        };

        let method = match member {
            BuilderCreate(kind) => MethodRef::static_method(kind.builder_type(), "Create", vec![], kind.builder_type()),
            BuilderStart(kind) if kind != BuilderKind::Iterator => {
                MethodRef::instance(kind.builder_type(), "Start", vec![sm_param()], Type::Void)
                    .generic(&["TStateMachine"])
            }
            BuilderSetResult(kind) if kind != BuilderKind::Iterator => {
                let params = if kind.has_result() { vec![tresult()] } else { vec![] };
                MethodRef::instance(kind.builder_type(), "SetResult", params, Type::Void)
            }
            BuilderSetException(kind) if kind != BuilderKind::Iterator => {
                MethodRef::instance(kind.builder_type(), "SetException", vec![Type::exception()], Type::Void)
            }
            BuilderAwaitOnCompleted(kind) => MethodRef::instance(
                kind.builder_type(),
                "AwaitOnCompleted",
                vec![Type::param("TAwaiter"), sm_param()],
                Type::Void,
            )
            .generic(&["TAwaiter", "TStateMachine"]),
            BuilderAwaitUnsafeOnCompleted(kind) => MethodRef::instance(
                kind.builder_type(),
                "AwaitUnsafeOnCompleted",
                vec![Type::param("TAwaiter"), sm_param()],
                Type::Void,
            )
            .generic(&["TAwaiter", "TStateMachine"]),
            BuilderSetStateMachine(kind) if kind != BuilderKind::Iterator => MethodRef::instance(
                kind.builder_type(),
                "SetStateMachine",
                vec![state_machine_interface()],
                Type::Void,
            ),
            BuilderTask(kind) => {
                let task = kind.task_type()?;
                MethodRef::instance(kind.builder_type(), "get_Task", vec![], task)
            }
            IteratorBuilderMoveNext => {
                MethodRef::instance(BuilderKind::Iterator.builder_type(), "MoveNext", vec![sm_param()], Type::Void)
                    .generic(&["TStateMachine"])
            }
            IteratorBuilderComplete => {
                MethodRef::instance(BuilderKind::Iterator.builder_type(), "Complete", vec![], Type::Void)
            }
            BuilderStart(_) | BuilderSetResult(_) | BuilderSetException(_) | BuilderSetStateMachine(_) => {
                return None
            }

            PromiseReset => MethodRef::instance(promise(), "Reset", vec![], Type::Void),
            PromiseSetResult => MethodRef::instance(promise(), "SetResult", vec![tresult()], Type::Void),
            PromiseSetException => {
                MethodRef::instance(promise(), "SetException", vec![Type::exception()], Type::Void)
            }
            PromiseGetResult => MethodRef::instance(promise(), "GetResult", vec![Type::Int], tresult()),
            PromiseGetStatus => MethodRef::instance(promise(), "GetStatus", vec![Type::Int], Type::Int),
            PromiseOnCompleted => MethodRef::instance(promise(), "OnCompleted", on_completed_params(), Type::Void),
            PromiseVersion => MethodRef::instance(promise(), "get_Version", vec![], Type::Int),

            CurrentManagedThreadId => {
                MethodRef::static_method(Type::class("Environment"), "get_CurrentManagedThreadId", vec![], Type::Int)
            }
            ExceptionDispatchCapture => MethodRef::static_method(
                Type::class("ExceptionDispatchInfo"),
                "Capture",
                vec![Type::exception()],
                Type::class("ExceptionDispatchInfo"),
            ),
            ExceptionDispatchThrow => {
                MethodRef::instance(Type::class("ExceptionDispatchInfo"), "Throw", vec![], Type::Void)
            }

            HelperAwaitTask => MethodRef::static_method(helpers(), "Await", vec![Type::task()], Type::Void),
            HelperAwaitTaskOf => {
                MethodRef::static_method(helpers(), "Await", vec![Type::task_of(element())], element())
                    .generic(&["T"])
            }
            HelperAwaitValueTask => {
                MethodRef::static_method(helpers(), "Await", vec![Type::value_task()], Type::Void)
            }
            HelperAwaitValueTaskOf => {
                MethodRef::static_method(helpers(), "Await", vec![Type::value_task_of(element())], element())
                    .generic(&["T"])
            }
            HelperAwaitAwaiter => {
                MethodRef::static_method(helpers(), "AwaitAwaiter", vec![Type::param("TAwaiter")], Type::Void)
                    .generic(&["TAwaiter"])
            }
            HelperUnsafeAwaitAwaiter => {
                MethodRef::static_method(helpers(), "UnsafeAwaitAwaiter", vec![Type::param("TAwaiter")], Type::Void)
                    .generic(&["TAwaiter"])
            }

            StateMachineMoveNext => MethodRef::instance(state_machine_interface(), "MoveNext", vec![], Type::Void),
            StateMachineSetStateMachine => MethodRef::instance(
                state_machine_interface(),
                "SetStateMachine",
                vec![state_machine_interface()],
                Type::Void,
            ),
            EnumerableGetAsyncEnumerator => MethodRef::instance(
                Type::async_enumerable(element()),
                "GetAsyncEnumerator",
                vec![Type::structure("CancellationToken")],
                Type::async_enumerator(element()),
            ),
            EnumeratorMoveNextAsync => MethodRef::instance(
                Type::async_enumerator(element()),
                "MoveNextAsync",
                vec![],
                Type::value_task_of(Type::Bool),
            ),
            EnumeratorCurrent => MethodRef::instance(Type::async_enumerator(element()), "get_Current", vec![], element()),
            DisposableDisposeAsync => MethodRef::instance(
                Type::named("IAsyncDisposable", vec![], TypeKind::Interface),
                "DisposeAsync",
                vec![],
                Type::value_task(),
            ),
            SourceGetResult => MethodRef::instance(bool_source(), "GetResult", vec![Type::Int], Type::Bool),
            SourceGetStatus => MethodRef::instance(bool_source(), "GetStatus", vec![Type::Int], Type::Int),
            SourceOnCompleted => MethodRef::instance(bool_source(), "OnCompleted", on_completed_params(), Type::Void),
            UntypedSourceGetResult => MethodRef::instance(
                Type::named("IValueTaskSource", vec![], TypeKind::Interface),
                "GetResult",
                vec![Type::Int],
                Type::Void,
            ),
        };
        Some(method)
    }
}

impl MemberResolver for CoreLibrary {
    fn resolve(&self, member: WellKnownMember) -> Option<MethodRef> {
        if self.missing.contains(&member) {
            return None;
        }
        CoreLibrary::definition(member)
    }
}

fn helpers() -> Type {
    Type::class("AsyncHelpers")
}

pub fn state_machine_interface() -> Type {
    Type::named("IAsyncStateMachine", vec![], TypeKind::Interface)
}

/// Value reported by `GetStatus` once the promise holds a result.
pub const STATUS_SUCCEEDED: i64 = 1;

// ── Resolved member sets ────────────────────────────────────────────────

/// Builder members for one async method, closed over its result type.
#[derive(Debug, Clone)]
pub struct BuilderMembers {
    pub builder_ty: Type,
    pub create: MethodRef,
    pub await_on_completed: MethodRef,
    pub await_unsafe_on_completed: MethodRef,
    pub api: BuilderApi,
}

#[derive(Debug, Clone)]
pub enum BuilderApi {
    Method {
        start: MethodRef,
        set_result: MethodRef,
        set_exception: MethodRef,
        set_state_machine: MethodRef,
        /// `None` for `async void`.
        task: Option<MethodRef>,
    },
    Iterator {
        move_next: MethodRef,
        complete: MethodRef,
        promise: PromiseMembers,
        current_thread_id: MethodRef,
        interfaces: IteratorInterfaces,
    },
}

/// Members of `ManualResetValueTaskSourceCore<bool>`.
#[derive(Debug, Clone)]
pub struct PromiseMembers {
    pub promise_ty: Type,
    pub reset: MethodRef,
    pub set_result: MethodRef,
    pub set_exception: MethodRef,
    pub get_result: MethodRef,
    pub get_status: MethodRef,
    pub on_completed: MethodRef,
    pub version: MethodRef,
}

/// Interface members an async iterator implements, closed over its element
/// type.
#[derive(Debug, Clone)]
pub struct IteratorInterfaces {
    pub get_async_enumerator: MethodRef,
    pub move_next_async: MethodRef,
    pub current: MethodRef,
    pub dispose_async: MethodRef,
    pub source_get_result: MethodRef,
    pub source_get_status: MethodRef,
    pub source_on_completed: MethodRef,
    pub untyped_get_result: MethodRef,
}

/// `IAsyncStateMachine` members every machine implements.
#[derive(Debug, Clone)]
pub struct MachineInterface {
    pub move_next: MethodRef,
    pub set_state_machine: MethodRef,
}

impl BuilderMembers {
    pub fn resolve(members: &MemberCache, shape: &AsyncShape, span: Span) -> Result<Self, LoweringError> {
        use WellKnownMember::*;

        let kind = shape.builder_kind();
        let map = shape.type_map();
        let get = |member| members.require(member, span).map(|m| m.substitute(&map));

        let api = match shape {
            AsyncShape::Enumerable(element) | AsyncShape::Enumerator(element) => {
                let promise_map = [("TResult".to_string(), Type::Bool)];
                let promise = |member| members.require(member, span).map(|m: MethodRef| m.substitute(&promise_map));
                let element_map = [("T".to_string(), element.clone())];
                let iface = |member| members.require(member, span).map(|m: MethodRef| m.substitute(&element_map));
                BuilderApi::Iterator {
                    move_next: get(IteratorBuilderMoveNext)?,
                    complete: get(IteratorBuilderComplete)?,
                    promise: PromiseMembers {
                        promise_ty: Type::named("ManualResetValueTaskSourceCore", vec![Type::Bool], TypeKind::Struct),
                        reset: promise(PromiseReset)?,
                        set_result: promise(PromiseSetResult)?,
                        set_exception: promise(PromiseSetException)?,
                        get_result: promise(PromiseGetResult)?,
                        get_status: promise(PromiseGetStatus)?,
                        on_completed: promise(PromiseOnCompleted)?,
                        version: promise(PromiseVersion)?,
                    },
                    current_thread_id: get(CurrentManagedThreadId)?,
                    interfaces: IteratorInterfaces {
                        get_async_enumerator: iface(EnumerableGetAsyncEnumerator)?,
                        move_next_async: iface(EnumeratorMoveNextAsync)?,
                        current: iface(EnumeratorCurrent)?,
                        dispose_async: iface(DisposableDisposeAsync)?,
                        source_get_result: iface(SourceGetResult)?,
                        source_get_status: iface(SourceGetStatus)?,
                        source_on_completed: iface(SourceOnCompleted)?,
                        untyped_get_result: iface(UntypedSourceGetResult)?,
                    },
                }
            }
            _ => BuilderApi::Method {
                start: get(BuilderStart(kind))?,
                set_result: get(BuilderSetResult(kind))?,
                set_exception: get(BuilderSetException(kind))?,
                set_state_machine: get(BuilderSetStateMachine(kind))?,
                task: match kind {
                    BuilderKind::Void => None,
                    _ => Some(get(BuilderTask(kind))?),
                },
            },
        };

        Ok(BuilderMembers {
            builder_ty: kind.builder_type().substitute(&map),
            create: get(BuilderCreate(kind))?,
            await_on_completed: get(BuilderAwaitOnCompleted(kind))?,
            await_unsafe_on_completed: get(BuilderAwaitUnsafeOnCompleted(kind))?,
            api,
        })
    }
}

impl MachineInterface {
    pub fn resolve(members: &MemberCache, span: Span) -> Result<Self, LoweringError> {
        Ok(MachineInterface {
            move_next: members.require(WellKnownMember::StateMachineMoveNext, span)?,
            set_state_machine: members.require(WellKnownMember::StateMachineSetStateMachine, span)?,
        })
    }
}

/// `ExceptionDispatchInfo.Capture` and `Throw`. Optional: without them a
/// pended exception is rethrown with a plain `throw`.
#[derive(Debug, Clone)]
pub struct ExceptionDispatch {
    pub capture: MethodRef,
    pub throw: MethodRef,
}

impl ExceptionDispatch {
    pub fn resolve(members: &MemberCache) -> Option<Self> {
        Some(ExceptionDispatch {
            capture: members.lookup(WellKnownMember::ExceptionDispatchCapture)?,
            throw: members.lookup(WellKnownMember::ExceptionDispatchThrow)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_return_types() {
        assert_eq!(AsyncShape::classify(&Type::Void), Some(AsyncShape::Void));
        assert_eq!(AsyncShape::classify(&Type::task_of(Type::Int)), Some(AsyncShape::TaskOf(Type::Int)));
        assert_eq!(
            AsyncShape::classify(&Type::async_enumerable(Type::String)),
            Some(AsyncShape::Enumerable(Type::String))
        );
        assert_eq!(AsyncShape::classify(&Type::Int), None);
        assert_eq!(AsyncShape::classify(&Type::class("List")), None);
    }

    #[test]
    fn builder_members_close_over_result_type() {
        let cache = MemberCache::new(Box::new(CoreLibrary::new()));
        let shape = AsyncShape::TaskOf(Type::Int);
        let members = BuilderMembers::resolve(&cache, &shape, Span::default()).unwrap();
        assert_eq!(members.builder_ty, Type::named("AsyncTaskMethodBuilder", vec![Type::Int], TypeKind::Struct));
        let BuilderApi::Method { set_result, task, .. } = &members.api else {
            panic!("expected method builder");
        };
        assert_eq!(set_result.params, vec![Type::Int]);
        assert_eq!(task.as_ref().unwrap().ret, Type::task_of(Type::Int));
    }

    #[test]
    fn void_builder_has_no_task() {
        assert!(CoreLibrary::definition(WellKnownMember::BuilderTask(BuilderKind::Void)).is_none());
        assert!(CoreLibrary::definition(WellKnownMember::BuilderStart(BuilderKind::Iterator)).is_none());
    }

    #[test]
    fn missing_member_is_reported() {
        let lib = CoreLibrary::without(&[WellKnownMember::BuilderCreate(BuilderKind::Task)]);
        let cache = MemberCache::new(Box::new(lib));
        let err = BuilderMembers::resolve(&cache, &AsyncShape::Task, Span::new(3, 9)).unwrap_err();
        assert_eq!(err.code(), "E0900");
        assert!(err.to_string().contains("AsyncTaskMethodBuilder.Create"));
    }
}
