// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Accumulator for the statements and temporaries a spilled expression needs.

use tern_ast::{Block, LocalSymbol, Stmt};

/// Statements that must run, in order, before the expression they were
/// pulled out of, plus the temporaries those statements declare.
#[derive(Debug, Default)]
pub(crate) struct SpillBuilder {
    locals: Vec<LocalSymbol>,
    stmts: Vec<Stmt>,
}

impl SpillBuilder {
    pub fn add_local(&mut self, local: LocalSymbol) {
        self.locals.push(local);
    }

    pub fn add_locals(&mut self, locals: impl IntoIterator<Item = LocalSymbol>) {
        self.locals.extend(locals);
    }

    pub fn push(&mut self, stmt: Stmt) {
        self.stmts.push(stmt);
    }

    /// Append everything `other` holds. `other` is consumed so its
    /// statements cannot be emitted twice.
    pub fn include(&mut self, other: SpillBuilder) {
        self.locals.extend(other.locals);
        self.stmts.extend(other.stmts);
    }

    /// Statements followed by `tail`, scoped over the temporaries.
    pub fn finish(self, tail: impl IntoIterator<Item = Stmt>) -> Block {
        let mut stmts = self.stmts;
        stmts.extend(tail);
        Block::with_locals(self.locals, stmts)
    }
}

/// The builder behind `slot`, created on first use.
pub(crate) fn active(slot: &mut Option<SpillBuilder>) -> &mut SpillBuilder {
    slot.get_or_insert_with(SpillBuilder::default)
}
