// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Which locals move into machine fields.
//!
//! User locals are hoisted as decided upstream (or all of them in debug
//! builds). Locals the lowering itself introduced are hoisted when their
//! value must survive a suspension point: a suspension lies between their
//! first and last use in the linear order of the body, or a backward jump
//! carries a value read at the top of a loop around a suspension.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use tern_ast::walk::{walk_block, walk_expr, walk_stmt, Visitor};
use tern_ast::{Block, Expr, ExprKind, LabelId, LocalId, LocalKind, LocalSymbol, Stmt, StmtKind};

/// Locals to hoist, in order of first appearance.
pub(crate) fn plan_hoisting(body: &Block, upstream: &[LocalId], hoist_all_user: bool) -> Vec<LocalSymbol> {
    let usage = Usage::of(body);
    let upstream: HashSet<LocalId> = upstream.iter().copied().collect();
    usage
        .symbols
        .values()
        .filter(|local| match local.kind {
            LocalKind::User => hoist_all_user || upstream.contains(&local.id),
            LocalKind::Spill | LocalKind::Synthesized => usage.crosses_suspension(local.id),
        })
        .filter(|local| !local.is_ref)
        .cloned()
        .collect()
}

/// Locals whose values must survive a suspension point. This is the
/// upstream liveness decision for user locals, offered to callers that
/// have none.
pub fn locals_crossing_suspensions(body: &Block) -> Vec<LocalId> {
    let usage = Usage::of(body);
    usage.symbols.keys().copied().filter(|id| usage.crosses_suspension(*id)).collect()
}

#[derive(Debug, Clone, Copy)]
struct Access {
    at: usize,
    is_write: bool,
}

#[derive(Default)]
struct Usage {
    position: usize,
    symbols: IndexMap<LocalId, LocalSymbol>,
    accesses: HashMap<LocalId, Vec<Access>>,
    suspensions: Vec<usize>,
    labels: HashMap<LabelId, usize>,
    jumps: Vec<(usize, LabelId)>,
}

impl Usage {
    fn of(body: &Block) -> Usage {
        let mut usage = Usage::default();
        usage.visit_block(body);
        usage
    }

    fn declare(&mut self, local: &LocalSymbol) {
        self.symbols.entry(local.id).or_insert_with(|| local.clone());
    }

    fn tick(&mut self) -> usize {
        self.position += 1;
        self.position
    }

    fn access(&mut self, local: &LocalSymbol, is_write: bool) {
        self.declare(local);
        let at = self.tick();
        self.accesses.entry(local.id).or_default().push(Access { at, is_write });
    }

    fn suspend(&mut self) {
        let at = self.tick();
        self.suspensions.push(at);
        self.tick();
    }

    fn jump(&mut self, label: LabelId) {
        let at = self.tick();
        self.jumps.push((at, label));
    }

    fn suspends_between(&self, from: usize, to: usize) -> bool {
        self.suspensions.iter().any(|&s| from < s && s < to)
    }

    /// Loop bodies, as `(label, jump)` positions of backward jumps that
    /// enclose a suspension point.
    fn suspending_loops(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.jumps.iter().filter_map(|&(from, label)| {
            let to = *self.labels.get(&label)?;
            (to < from && self.suspends_between(to, from)).then_some((to, from))
        })
    }

    fn crosses_suspension(&self, id: LocalId) -> bool {
        let Some(accesses) = self.accesses.get(&id) else {
            return false;
        };
        let (Some(first), Some(last)) = (accesses.first(), accesses.last()) else {
            return false;
        };
        if self.suspends_between(first.at, last.at) {
            return true;
        }
        // Read at the top of the loop before any write in it: the value
        // comes around the back edge, across the suspension.
        self.suspending_loops().any(|(top, bottom)| {
            accesses.iter().find(|a| top < a.at && a.at < bottom).is_some_and(|a| !a.is_write)
        })
    }
}

impl Visitor for Usage {
    fn visit_block(&mut self, block: &Block) {
        for local in &block.locals {
            self.declare(local);
        }
        walk_block(self, block)
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::YieldReturn(value) => {
                self.visit_expr(value);
                self.suspend();
            }
            StmtKind::Label(label) => {
                let at = self.tick();
                self.labels.insert(label.id, at);
            }
            StmtKind::Goto(label) => self.jump(label.id),
            StmtKind::CondGoto { cond, label, .. } => {
                self.visit_expr(cond);
                self.jump(label.id);
            }
            StmtKind::Switch { value, cases, default } => {
                self.visit_expr(value);
                for label in cases.iter().map(|(_, label)| label).chain(default) {
                    self.jump(label.id);
                }
            }
            StmtKind::Try { body, catches, finally, .. } => {
                self.visit_block(body);
                for catch in catches {
                    if let Some(local) = &catch.local {
                        self.access(local, true);
                    }
                    if let Some(filter) = &catch.filter {
                        self.visit_expr(filter);
                    }
                    self.visit_block(&catch.body);
                }
                if let Some(finally) = finally {
                    self.visit_block(finally);
                }
            }
            _ => walk_stmt(self, stmt),
        }
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Await { .. } => {
                walk_expr(self, expr);
                self.suspend();
            }
            ExprKind::Sequence { locals, .. } => {
                for local in locals {
                    self.declare(local);
                }
                walk_expr(self, expr)
            }
            ExprKind::Assign { target, value, is_ref: false } if target.as_local().is_some() => {
                self.visit_expr(value);
                if let Some(local) = target.as_local() {
                    self.access(local, true);
                }
            }
            _ => walk_expr(self, expr),
        }
    }

    fn visit_local(&mut self, local: &LocalSymbol) {
        self.access(local, false);
    }
}
