// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Resume state numbering.
//!
//! Awaits count up from 0 and yields count down from -3, so the two never
//! collide with each other or with the two reserved states. When a previous
//! compilation of the same method is known, a suspension point at the same
//! syntax offset keeps its number.

use serde::{Deserialize, Serialize};

/// The machine is not started, or is running.
pub const NOT_STARTED_STATE: i32 = -1;
/// The machine has completed; no further resumption.
pub const FINISHED_STATE: i32 = -2;
pub const FIRST_AWAIT_STATE: i32 = 0;
pub const FIRST_YIELD_STATE: i32 = -3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SuspensionKind {
    Await,
    Yield,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEntry {
    /// Start offset of the suspending syntax.
    pub offset: usize,
    pub kind: SuspensionKind,
    pub state: i32,
}

/// States assigned to the suspension points of one method, in allocation
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMap {
    pub entries: Vec<StateEntry>,
}

impl StateMap {
    pub fn states(&self) -> impl Iterator<Item = i32> + '_ {
        self.entries.iter().map(|e| e.state)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn contains_state(&self, state: i32) -> bool {
        self.entries.iter().any(|e| e.state == state)
    }
}

pub(crate) struct StateAllocator<'a> {
    previous: Option<&'a StateMap>,
    next_await: i32,
    next_yield: i32,
    allocated: StateMap,
}

impl<'a> StateAllocator<'a> {
    pub fn new(previous: Option<&'a StateMap>) -> Self {
        let (mut next_await, mut next_yield) = (FIRST_AWAIT_STATE, FIRST_YIELD_STATE);
        for entry in previous.iter().flat_map(|p| p.entries.iter()) {
            match entry.kind {
                SuspensionKind::Await => next_await = next_await.max(entry.state + 1),
                SuspensionKind::Yield => next_yield = next_yield.min(entry.state - 1),
            }
        }
        StateAllocator { previous, next_await, next_yield, allocated: StateMap::default() }
    }

    pub fn allocate(&mut self, kind: SuspensionKind, offset: usize) -> i32 {
        let reused = self.previous.and_then(|previous| {
            previous
                .entries
                .iter()
                .find(|e| e.kind == kind && e.offset == offset && !self.allocated.contains_state(e.state))
                .map(|e| e.state)
        });
        let state = match reused {
            Some(state) => state,
            None => match kind {
                SuspensionKind::Await => {
                    self.next_await += 1;
                    self.next_await - 1
                }
                SuspensionKind::Yield => {
                    self.next_yield -= 1;
                    self.next_yield + 1
                }
            },
        };
        self.allocated.entries.push(StateEntry { offset, kind, state });
        state
    }

    pub fn finish(self) -> StateMap {
        self.allocated
    }
}
