// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Async lowering - rewrites `async` method bodies into resumable code.
//!
//! The pipeline runs per method:
//!
//! 1. `spill`: pull awaits out of expressions so every suspension point is a
//!    statement and nothing live sits on the evaluation stack across it.
//! 2. `handlers`: move awaits out of `catch` and `finally` blocks.
//! 3. Either `state_machine` + `rewrite` (synthesize a resumable type and its
//!    step function) or `direct` (call runtime suspension intrinsics).

/// Abort on a broken internal invariant. These are compiler bugs, never
/// user errors.
macro_rules! bug {
    ($($arg:tt)*) => {
        panic!("internal error: {}", format_args!($($arg)*))
    };
}

pub mod config;
pub mod direct;
pub mod error;
pub mod handlers;
pub mod rewrite;
pub mod session;
pub mod spill;
pub mod state_machine;
pub mod well_known;

pub use config::{LoweringOptions, LoweringStrategy, OptimizationLevel};
pub use error::LoweringError;
pub use handlers::restructure_handlers;
pub use session::{LoweringSession, MemberCache};
pub use spill::spill_block;
pub use state_machine::{
    locals_crossing_suspensions, FieldDef, FieldRole, StateEntry, StateMachineDescriptor, StateMachineKind, StateMap,
    SuspensionKind, SynthesizedMethod, FINISHED_STATE, FIRST_AWAIT_STATE, FIRST_YIELD_STATE, NOT_STARTED_STATE,
};
pub use well_known::{AsyncShape, CoreLibrary, MemberResolver, WellKnownMember};

use tern_ast::walk::{walk_expr, Visitor};
use tern_ast::{Block, Expr, ExprKind, MethodDecl, NodeFactory, Stmt, StmtKind};
use tern_diagnostics::DiagnosticBag;

use well_known::ExceptionDispatch;

/// Result of lowering one method.
#[derive(Debug, Clone)]
pub enum LoweredMethod {
    /// The original body is replaced by `kickoff`, which creates and starts
    /// `machine`.
    StateMachine {
        kickoff: Block,
        machine: Box<StateMachineDescriptor>,
    },
    /// Awaits were replaced in place by runtime intrinsics.
    Direct { body: Block },
    /// Not async, or lowering failed with a reported error.
    Unlowered { body: Block },
}

impl LoweredMethod {
    pub fn machine(&self) -> Option<&StateMachineDescriptor> {
        match self {
            LoweredMethod::StateMachine { machine, .. } => Some(machine),
            LoweredMethod::Direct { .. } | LoweredMethod::Unlowered { .. } => None,
        }
    }

    /// The body that replaces the method's own body.
    pub fn body(&self) -> &Block {
        match self {
            LoweredMethod::StateMachine { kickoff, .. } => kickoff,
            LoweredMethod::Direct { body } | LoweredMethod::Unlowered { body } => body,
        }
    }

    pub fn is_lowered(&self) -> bool {
        !matches!(self, LoweredMethod::Unlowered { .. })
    }
}

/// Lower one method. Errors go to `diagnostics`; a method that cannot be
/// lowered comes back unchanged as `Unlowered`.
pub fn lower_method(
    session: &LoweringSession,
    method: &MethodDecl,
    diagnostics: &mut DiagnosticBag,
) -> LoweredMethod {
    if !method.is_async {
        return LoweredMethod::Unlowered { body: method.body.clone() };
    }

    let _span = tracing::debug_span!(target: "async_lowering", "lower_method", method = %method.name).entered();

    if let Err(err) = check_awaits(&method.body) {
        tracing::warn!(target: "async_lowering", code = err.code(), "{}", err);
        diagnostics.report(&err);
        return LoweredMethod::Unlowered { body: method.body.clone() };
    }

    let lowered = AsyncShape::classify(&method.return_ty)
        .ok_or_else(|| LoweringError::UnsupportedReturnType { ty: method.return_ty.to_string(), span: method.span })
        .and_then(|shape| {
            if session.options().strategy == LoweringStrategy::RuntimeAsync && !shape.is_iterator() {
                direct::lower(session, method, diagnostics)
            } else {
                state_machine::lower(session, method, &shape, diagnostics)
            }
        });
    match lowered {
        Ok(lowered) => lowered,
        Err(err) => {
            tracing::warn!(target: "async_lowering", code = err.code(), "{}", err);
            diagnostics.report(&err);
            LoweredMethod::Unlowered { body: method.body.clone() }
        }
    }
}

/// Lower every method in order. Type names stay unique through the
/// session's ordinal counter.
pub fn lower_methods<'a>(
    session: &LoweringSession,
    methods: impl IntoIterator<Item = &'a MethodDecl>,
    diagnostics: &mut DiagnosticBag,
) -> Vec<LoweredMethod> {
    methods.into_iter().map(|m| lower_method(session, m, diagnostics)).collect()
}

/// Spill awaits and move them out of handlers. Spilling reports what it
/// cannot preserve and substitutes a by-value copy, so lowering goes on.
pub(crate) fn prepare_body(
    session: &LoweringSession,
    method: &MethodDecl,
    f: &mut NodeFactory,
    is_iterator: bool,
    diagnostics: &mut DiagnosticBag,
) -> Block {
    let body = spill_block(method.body.clone(), f, diagnostics);
    let dispatch = if session.options().capture_exception_dispatch {
        ExceptionDispatch::resolve(session.members())
    } else {
        None
    };
    restructure_handlers(body, f, is_iterator, dispatch.as_ref())
}

/// Every awaited expression must carry a complete awaiter pattern, and no
/// await may sit inside an exception filter.
fn check_awaits(body: &Block) -> Result<(), LoweringError> {
    struct Checker {
        error: Option<LoweringError>,
    }

    impl Visitor for Checker {
        fn visit_expr(&mut self, expr: &Expr) {
            if self.error.is_some() {
                return;
            }
            if let ExprKind::Await { operand, info } = &expr.kind {
                let missing = if info.get_awaiter.is_none() {
                    Some("GetAwaiter")
                } else if info.is_completed.is_none() {
                    Some("IsCompleted")
                } else if info.get_result.is_none() {
                    Some("GetResult")
                } else {
                    None
                };
                if let Some(missing) = missing {
                    self.error = Some(LoweringError::IncompleteAwaiter {
                        awaitable: operand.ty.to_string(),
                        missing,
                        span: expr.span,
                    });
                    return;
                }
            }
            walk_expr(self, expr)
        }

        fn visit_stmt(&mut self, stmt: &Stmt) {
            if let StmtKind::Try { catches, .. } = &stmt.kind {
                for filter in catches.iter().filter_map(|c| c.filter.as_ref()) {
                    if self.error.is_none() && tern_ast::walk::contains_await(filter) {
                        self.error = Some(LoweringError::AwaitInFilter { span: filter.span });
                    }
                }
            }
            tern_ast::walk::walk_stmt(self, stmt)
        }
    }

    let mut checker = Checker { error: None };
    checker.visit_block(body);
    checker.error.map_or(Ok(()), Err)
}
