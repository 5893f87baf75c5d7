// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Per-compilation lowering state.
//!
//! A session outlives the methods it lowers: it owns the member cache, the
//! counter that keeps state machine type names unique, and the state maps of
//! a previous compilation used to keep resume states stable across edits.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use tern_ast::{MethodRef, Span};

use crate::config::LoweringOptions;
use crate::error::LoweringError;
use crate::state_machine::StateMap;
use crate::well_known::{CoreLibrary, MemberResolver, WellKnownMember};

/// Resolved members, looked up at most once per session.
pub struct MemberCache {
    resolver: Box<dyn MemberResolver>,
    resolved: RefCell<HashMap<WellKnownMember, Option<MethodRef>>>,
}

impl MemberCache {
    pub fn new(resolver: Box<dyn MemberResolver>) -> Self {
        MemberCache { resolver, resolved: RefCell::new(HashMap::new()) }
    }

    pub fn lookup(&self, member: WellKnownMember) -> Option<MethodRef> {
        if let Some(hit) = self.resolved.borrow().get(&member) {
            return hit.clone();
        }
        let found = self.resolver.resolve(member);
        if found.is_none() {
            tracing::debug!(target: "async_lowering", %member, "member not found");
        }
        self.resolved.borrow_mut().insert(member, found.clone());
        found
    }

    /// Look up a member the lowering cannot do without.
    pub fn require(&self, member: WellKnownMember, span: Span) -> Result<MethodRef, LoweringError> {
        self.lookup(member).ok_or_else(|| LoweringError::MissingMember { member: member.to_string(), span })
    }

    /// Number of distinct members asked for so far.
    pub fn len(&self) -> usize {
        self.resolved.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct LoweringSession {
    options: LoweringOptions,
    members: MemberCache,
    next_ordinal: Cell<u32>,
    previous_states: HashMap<String, StateMap>,
}

impl LoweringSession {
    pub fn new(options: LoweringOptions, resolver: Box<dyn MemberResolver>) -> Self {
        LoweringSession {
            options,
            members: MemberCache::new(resolver),
            next_ordinal: Cell::new(0),
            previous_states: HashMap::new(),
        }
    }

    /// A session over the full standard library.
    pub fn with_core_library(options: LoweringOptions) -> Self {
        LoweringSession::new(options, Box::new(CoreLibrary::new()))
    }

    /// Seed the resume states a previous compilation assigned to `method`.
    pub fn with_previous_states(mut self, method: impl Into<String>, states: StateMap) -> Self {
        self.previous_states.insert(method.into(), states);
        self
    }

    pub fn options(&self) -> &LoweringOptions {
        &self.options
    }

    pub fn members(&self) -> &MemberCache {
        &self.members
    }

    pub fn previous_states(&self, method: &str) -> Option<&StateMap> {
        self.previous_states.get(method)
    }

    /// Ordinal for the next synthesized type name.
    pub fn next_ordinal(&self) -> u32 {
        let ordinal = self.next_ordinal.get();
        self.next_ordinal.set(ordinal + 1);
        ordinal
    }
}
