use super::Presence;
use orrery_types::{Identity, PresenceToken};
use std::collections::BTreeMap;

/// Connected presences keyed by identity, plus the pending set
///
/// A pending presence moves into the identity map exactly once, when a
/// connect completion carrying its token is resolved.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    connected: BTreeMap<Identity, Presence>,
    unconnected: Vec<Presence>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a presence that awaits its connect completion.
    pub fn create_unconnected(&mut self, presence: Presence) -> PresenceToken {
        debug_assert!(presence.identity().is_none());
        debug_assert!(!self.is_pending(presence.token()));
        let token = presence.token();
        self.unconnected.push(presence);
        token
    }

    /// Remove and return the first pending presence carrying `token`.
    ///
    /// A token is consumed by the first successful resolution; resolving
    /// it again returns `None`.
    pub fn resolve_connect(&mut self, token: PresenceToken) -> Option<Presence> {
        let index = self.unconnected.iter().position(|p| p.token() == token)?;
        Some(self.unconnected.remove(index))
    }

    pub fn insert(&mut self, identity: Identity, presence: Presence) -> Option<Presence> {
        debug_assert_eq!(presence.identity(), Some(identity));
        self.connected.insert(identity, presence)
    }

    pub fn remove(&mut self, identity: &Identity) -> Option<Presence> {
        self.connected.remove(identity)
    }

    pub fn find(&self, identity: &Identity) -> Option<&Presence> {
        self.connected.get(identity)
    }

    pub fn find_mut(&mut self, identity: &Identity) -> Option<&mut Presence> {
        self.connected.get_mut(identity)
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.connected.contains_key(identity)
    }

    pub fn is_pending(&self, token: PresenceToken) -> bool {
        self.unconnected.iter().any(|p| p.token() == token)
    }

    pub fn pending_mut(&mut self, token: PresenceToken) -> Option<&mut Presence> {
        self.unconnected.iter_mut().find(|p| p.token() == token)
    }

    pub fn identities(&self) -> impl Iterator<Item = &Identity> {
        self.connected.keys()
    }

    pub fn presences(&self) -> impl Iterator<Item = &Presence> {
        self.connected.values()
    }

    pub fn unconnected(&self) -> impl Iterator<Item = &Presence> {
        self.unconnected.iter()
    }

    /// Connected presences; pending ones are counted by
    /// [`PresenceRegistry::unconnected_len`]
    pub fn len(&self) -> usize {
        self.connected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connected.is_empty()
    }

    pub fn unconnected_len(&self) -> usize {
        self.unconnected.len()
    }

    /// Empty both collections, returning every record (registry first).
    pub fn drain(&mut self) -> Vec<Presence> {
        let mut drained: Vec<Presence> = std::mem::take(&mut self.connected).into_values().collect();
        drained.append(&mut self.unconnected);
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CallbackId, ContextId};
    use orrery_types::SpaceId;

    fn pending(token: u64) -> Presence {
        Presence::pending(PresenceToken(token), SpaceId::new(), ContextId::ROOT, Some(CallbackId(token)))
    }

    #[test]
    fn test_resolve_consumes_token_once() {
        let mut registry = PresenceRegistry::new();
        registry.create_unconnected(pending(5));
        assert!(registry.is_pending(PresenceToken(5)));

        let mut presence = registry.resolve_connect(PresenceToken(5)).unwrap();
        let identity = Identity::random();
        presence.complete_connect(identity);
        registry.insert(identity, presence);

        assert!(registry.resolve_connect(PresenceToken(5)).is_none());
        assert!(registry.contains(&identity));
        assert_eq!(registry.unconnected_len(), 0);
    }

    #[test]
    fn test_unknown_token_leaves_registry_unchanged() {
        let mut registry = PresenceRegistry::new();
        registry.create_unconnected(pending(1));
        assert!(registry.resolve_connect(PresenceToken(9)).is_none());
        assert_eq!(registry.unconnected_len(), 1);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_first_match_wins_in_creation_order() {
        let mut registry = PresenceRegistry::new();
        registry.create_unconnected(pending(2));
        registry.create_unconnected(pending(3));

        let resolved = registry.resolve_connect(PresenceToken(3)).unwrap();
        assert_eq!(resolved.connect_callback(), Some(CallbackId(3)));
        assert_eq!(registry.unconnected().next().map(|p| p.token()), Some(PresenceToken(2)));
    }

    #[test]
    fn test_drain_empties_everything() {
        let mut registry = PresenceRegistry::new();
        let identity = Identity::random();
        registry.insert(identity, Presence::first(identity));
        registry.create_unconnected(pending(4));

        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert!(drained[0].token().is_first());
        assert!(registry.is_empty());
        assert_eq!(registry.unconnected_len(), 0);
    }

    #[test]
    fn test_pending_presences_do_not_count_as_connected() {
        let mut registry = PresenceRegistry::new();
        registry.create_unconnected(pending(7));

        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert_eq!(registry.unconnected_len(), 1);
        assert!(registry.is_pending(PresenceToken(7)));
    }
}
