//! Script contexts
//!
//! The root context is created with the host and lives until the host does.
//! Scripts may spawn child contexts (sandboxes) beneath any context they
//! run in; destroying a context takes its whole subtree with it.

use crate::error::{HostError, Result};
use crate::types::{CallbackId, ContextId};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptContext {
    id: ContextId,
    parent: Option<ContextId>,
    pub on_connect: Option<CallbackId>,
    pub on_proximity_added: Option<CallbackId>,
    pub on_proximity_removed: Option<CallbackId>,
}

impl ScriptContext {
    fn new(id: ContextId, parent: Option<ContextId>) -> Self {
        Self {
            id,
            parent,
            on_connect: None,
            on_proximity_added: None,
            on_proximity_removed: None,
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn parent(&self) -> Option<ContextId> {
        self.parent
    }

    /// Strip every callback so the caller can release them.
    pub(crate) fn take_callbacks(&mut self) -> Vec<CallbackId> {
        [
            self.on_connect.take(),
            self.on_proximity_added.take(),
            self.on_proximity_removed.take(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

#[derive(Debug)]
pub struct ContextTree {
    contexts: BTreeMap<ContextId, ScriptContext>,
    next: u32,
}

impl ContextTree {
    pub fn new() -> Self {
        let mut contexts = BTreeMap::new();
        contexts.insert(ContextId::ROOT, ScriptContext::new(ContextId::ROOT, None));
        Self { contexts, next: 1 }
    }

    pub fn root(&self) -> &ScriptContext {
        &self.contexts[&ContextId::ROOT]
    }

    pub fn get(&self, id: ContextId) -> Option<&ScriptContext> {
        self.contexts.get(&id)
    }

    pub fn get_mut(&mut self, id: ContextId) -> Option<&mut ScriptContext> {
        self.contexts.get_mut(&id)
    }

    pub fn contains(&self, id: ContextId) -> bool {
        self.contexts.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<ContextId> {
        self.contexts.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn create_child(&mut self, parent: ContextId) -> Result<ContextId> {
        if !self.contains(parent) {
            return Err(HostError::ContextNotFound(parent));
        }
        let id = ContextId(self.next);
        self.next += 1;
        self.contexts.insert(id, ScriptContext::new(id, Some(parent)));
        Ok(id)
    }

    /// True if `id` is `ancestor` or lies beneath it.
    pub fn is_within(&self, id: ContextId, ancestor: ContextId) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.contexts.get(&current).and_then(|c| c.parent);
        }
        false
    }

    /// `id` and every context beneath it, children before parents.
    pub fn subtree(&self, id: ContextId) -> Vec<ContextId> {
        let mut ordered = Vec::new();
        self.collect_subtree(id, &mut ordered);
        ordered
    }

    fn collect_subtree(&self, id: ContextId, out: &mut Vec<ContextId>) {
        for child in self.contexts.values().filter(|c| c.parent == Some(id)) {
            self.collect_subtree(child.id, out);
        }
        if self.contains(id) {
            out.push(id);
        }
    }

    /// Remove a single non-root context.
    pub(crate) fn remove(&mut self, id: ContextId) -> Option<ScriptContext> {
        if id.is_root() {
            return None;
        }
        self.contexts.remove(&id)
    }

    /// Drop every context and start over with a bare root. Returns the
    /// dropped contexts, root included.
    pub(crate) fn reset(&mut self) -> Vec<ScriptContext> {
        let drained = std::mem::take(&mut self.contexts).into_values().collect();
        let next = self.next;
        *self = Self::new();
        self.next = next;
        drained
    }
}

impl Default for ContextTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_exists() {
        let tree = ContextTree::new();
        assert!(tree.contains(ContextId::ROOT));
        assert_eq!(tree.root().parent(), None);
    }

    #[test]
    fn test_subtree_children_first() {
        let mut tree = ContextTree::new();
        let a = tree.create_child(ContextId::ROOT).unwrap();
        let b = tree.create_child(a).unwrap();
        let c = tree.create_child(a).unwrap();
        let other = tree.create_child(ContextId::ROOT).unwrap();

        assert_eq!(tree.subtree(a), vec![b, c, a]);
        assert!(tree.is_within(b, a));
        assert!(tree.is_within(b, ContextId::ROOT));
        assert!(!tree.is_within(other, a));
    }

    #[test]
    fn test_create_under_missing_parent() {
        let mut tree = ContextTree::new();
        let err = tree.create_child(ContextId(42)).unwrap_err();
        assert!(matches!(err, HostError::ContextNotFound(ContextId(42))));
    }

    #[test]
    fn test_root_cannot_be_removed() {
        let mut tree = ContextTree::new();
        assert!(tree.remove(ContextId::ROOT).is_none());
        assert!(tree.contains(ContextId::ROOT));
    }

    #[test]
    fn test_reset_returns_all_contexts() {
        let mut tree = ContextTree::new();
        tree.create_child(ContextId::ROOT).unwrap();
        let root = tree.get_mut(ContextId::ROOT).unwrap();
        root.on_connect = Some(CallbackId(3));

        let mut dropped = tree.reset();
        assert_eq!(dropped.len(), 2);
        let callbacks: Vec<CallbackId> = dropped.iter_mut().flat_map(|c| c.take_callbacks()).collect();
        assert_eq!(callbacks, vec![CallbackId(3)]);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.root().on_connect, None);
    }
}
