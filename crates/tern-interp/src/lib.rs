// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Tree-walk interpreter for tern method bodies.
//!
//! Executes a method as written or after async lowering, against a
//! scripted host and a single-threaded scheduler, so the two forms can be
//! compared call for call.

/// Abort on a broken internal invariant.
macro_rules! bug {
    ($($arg:tt)*) => {
        panic!("internal error: {}", format_args!($($arg)*))
    };
}

mod value;
mod runtime;
mod host;
mod interp;
mod driver;
pub mod dsl;

pub use driver::{run, Form, Outcome, Run, RunConfig};
pub use host::{Host, HostCall, Reply, ScriptedHost};
pub use interp::{Interpreter, RuntimeError, DEFAULT_STEP_LIMIT};
pub use runtime::{Scheduler, TaskRef, TaskStatus};
pub use value::{Exception, ExceptionRef, Object, ObjRef, Value};
