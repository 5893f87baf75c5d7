// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Frames tracked while restructuring handlers.

use std::collections::HashSet;

use indexmap::IndexMap;
use tern_ast::{Block, LabelId, LabelSymbol, LocalId, LocalSymbol, NodeFactory, Type};

/// A `try` whose `finally` contains an await.
///
/// Once that `finally` is extracted, a jump out of the protected region
/// must no longer leave directly. Each such jump is redirected to a proxy
/// label that records which branch was pending and enters the extracted
/// finally; the finally replays the branch afterwards.
#[derive(Debug)]
pub(super) struct FinallyFrame {
    /// Labels declared inside the region. `None` for the method root, where
    /// nothing is proxied.
    labels: Option<HashSet<LabelId>>,
    /// Original target, in first-use order, to its proxy.
    pub proxies: IndexMap<LabelId, (LabelSymbol, LabelSymbol)>,
    pub return_proxy: Option<LabelSymbol>,
    pub return_value: Option<LocalSymbol>,
}

impl FinallyFrame {
    pub fn root() -> Self {
        FinallyFrame { labels: None, proxies: IndexMap::new(), return_proxy: None, return_value: None }
    }

    pub fn region(labels: HashSet<LabelId>) -> Self {
        FinallyFrame { labels: Some(labels), ..FinallyFrame::root() }
    }

    /// The label a jump to `label` must take from inside this frame.
    pub fn proxy_label_if_needed(&mut self, label: &LabelSymbol, f: &mut NodeFactory) -> LabelSymbol {
        let Some(labels) = &self.labels else {
            return label.clone();
        };
        if labels.contains(&label.id) {
            return label.clone();
        }
        if let Some((_, proxy)) = self.proxies.get(&label.id) {
            return proxy.clone();
        }
        let proxy = f.label("proxy");
        self.proxies.insert(label.id, (label.clone(), proxy.clone()));
        proxy
    }

    /// Where a `return` must go from inside this frame, and the slot that
    /// carries its value. `None` at the root, where the return stays as is.
    pub fn proxy_return_if_needed(
        &mut self,
        value_ty: Option<&Type>,
        f: &mut NodeFactory,
    ) -> Option<(LabelSymbol, Option<LocalSymbol>)> {
        self.labels.as_ref()?;
        if self.return_proxy.is_none() {
            self.return_proxy = Some(f.label("returnProxy"));
        }
        if let (Some(ty), None) = (value_ty, &self.return_value) {
            self.return_value = Some(f.synthesized("returnValue", ty.clone()));
        }
        let proxy = self.return_proxy.clone()?;
        Some((proxy, value_ty.and(self.return_value.clone())))
    }
}

/// A `try` with at least one `catch` that contains an await.
///
/// Such handlers cannot run inside the catch. The catch only records the
/// exception and the index of the handler; after the `try` a switch on that
/// index runs the handler outside any protected region.
#[derive(Debug)]
pub(super) struct CatchFrame {
    pub pending_exception: LocalSymbol,
    pub pending_catch: LocalSymbol,
    /// Extracted handler bodies; handler `i` runs for index `i + 1`.
    pub handlers: Vec<Block>,
    /// Catch variables of filtered handlers, lifted to the frame so the
    /// filter and the extracted handler share them.
    hoisted: IndexMap<LocalId, LocalSymbol>,
}

impl CatchFrame {
    pub fn new(f: &mut NodeFactory) -> Self {
        CatchFrame {
            pending_exception: f.synthesized("pendingException", Type::exception()),
            pending_catch: f.synthesized("pendingCatch", Type::Int),
            handlers: Vec::new(),
            hoisted: IndexMap::new(),
        }
    }

    /// Lift `local` to frame scope. A clash with an already lifted local of
    /// the same name and type gets a fresh local instead.
    pub fn hoist(&mut self, local: &LocalSymbol, f: &mut NodeFactory) -> LocalSymbol {
        let clashes = self.hoisted.values().any(|h| h.name == local.name && h.ty == local.ty);
        let hoisted = if clashes { f.synthesized(&local.name, local.ty.clone()) } else { local.clone() };
        self.hoisted.insert(local.id, hoisted.clone());
        hoisted
    }

    pub fn hoisted(&self, id: LocalId) -> Option<&LocalSymbol> {
        self.hoisted.get(&id)
    }

    pub fn into_locals(self) -> Vec<LocalSymbol> {
        let mut locals = vec![self.pending_exception, self.pending_catch];
        locals.extend(self.hoisted.into_values());
        locals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_frame_never_proxies() {
        let mut f = NodeFactory::new();
        let mut root = FinallyFrame::root();
        let target = f.label("out");
        assert_eq!(root.proxy_label_if_needed(&target, &mut f), target);
        assert!(root.proxy_return_if_needed(Some(&Type::Int), &mut f).is_none());
    }

    #[test]
    fn jumps_out_of_region_share_one_proxy() {
        let mut f = NodeFactory::new();
        let inside = f.label("inside");
        let outside = f.label("outside");
        let mut frame = FinallyFrame::region([inside.id].into_iter().collect());
        assert_eq!(frame.proxy_label_if_needed(&inside, &mut f), inside);
        let first = frame.proxy_label_if_needed(&outside, &mut f);
        let second = frame.proxy_label_if_needed(&outside, &mut f);
        assert_ne!(first, outside);
        assert_eq!(first, second);
        assert_eq!(frame.proxies.len(), 1);
    }

    #[test]
    fn return_proxy_allocates_value_slot() {
        let mut f = NodeFactory::new();
        let mut frame = FinallyFrame::region(HashSet::new());
        let (label, slot) = frame.proxy_return_if_needed(Some(&Type::Int), &mut f).unwrap();
        assert_eq!(slot.unwrap().ty, Type::Int);
        let (again, _) = frame.proxy_return_if_needed(Some(&Type::Int), &mut f).unwrap();
        assert_eq!(label, again);
    }

    #[test]
    fn clashing_catch_locals_are_renamed() {
        let mut f = NodeFactory::new();
        let mut frame = CatchFrame::new(&mut f);
        let a = LocalSymbol {
            id: LocalId(1),
            name: "ex".into(),
            ty: Type::exception(),
            kind: tern_ast::LocalKind::User,
            is_ref: false,
        };
        let b = LocalSymbol { id: LocalId(2), ..a.clone() };
        assert_eq!(frame.hoist(&a, &mut f), a);
        let renamed = frame.hoist(&b, &mut f);
        assert_ne!(renamed.id, b.id);
        assert_eq!(frame.hoisted(LocalId(2)), Some(&renamed));
    }
}
