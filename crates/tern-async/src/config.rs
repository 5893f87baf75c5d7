// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Lowering options.
//!
//! Options are chosen by the compilation driver. Whether the runtime can
//! suspend natively is an environment decision, so it arrives here as a
//! plain strategy setting rather than being detected.

use serde::{Deserialize, Serialize};

/// How async methods are lowered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoweringStrategy {
    /// Synthesize a state machine type per async method.
    #[default]
    StateMachine,
    /// Call runtime suspension intrinsics in place. Async iterators still get
    /// a state machine.
    RuntimeAsync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OptimizationLevel {
    /// Hoist every user local so debuggers can observe it after a resume.
    Debug,
    #[default]
    Release,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LoweringOptions {
    pub strategy: LoweringStrategy,
    pub optimization: OptimizationLevel,
    /// Rethrow pended exceptions through `ExceptionDispatchInfo` when the
    /// target library provides it.
    pub capture_exception_dispatch: bool,
}

impl Default for LoweringOptions {
    fn default() -> Self {
        LoweringOptions {
            strategy: LoweringStrategy::default(),
            optimization: OptimizationLevel::default(),
            capture_exception_dispatch: true,
        }
    }
}

impl LoweringOptions {
    pub fn debug() -> Self {
        LoweringOptions { optimization: OptimizationLevel::Debug, ..Default::default() }
    }

    pub fn runtime_async() -> Self {
        LoweringOptions { strategy: LoweringStrategy::RuntimeAsync, ..Default::default() }
    }

    pub fn is_debug(&self) -> bool {
        self.optimization == OptimizationLevel::Debug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_uses_defaults() {
        let opts: LoweringOptions = serde_json::from_str(r#"{"strategy": "runtime-async"}"#).unwrap();
        assert_eq!(opts.strategy, LoweringStrategy::RuntimeAsync);
        assert_eq!(opts.optimization, OptimizationLevel::Release);
        assert!(opts.capture_exception_dispatch);
    }
}
