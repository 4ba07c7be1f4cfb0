//! Presences: the script's embodiments in a space
//!
//! A presence is created pending (it has a token but no identity), gains its
//! identity when the lifecycle service completes the connection, and may
//! later be disconnected, reconnected or deleted.

mod registry;
mod token;

pub use registry::PresenceRegistry;
pub use token::TokenIssuer;

use crate::types::{CallbackId, ContextId};
use orrery_types::{BoundingSphere, Identity, Location, ObjectRef, PresenceToken, SolidAngle, SpaceId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Waiting for a connect completion carrying this presence's token
    Unconnected,
    Connected,
    /// Dropped by the space; still tracked so it can be reconnected
    Disconnected,
}

/// Everything needed to recreate a presence after a restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    pub space: SpaceId,
    /// Identity at snapshot time, used as the object hint on reconnect
    pub identity: Option<Identity>,
    pub connected: bool,
    pub location: Location,
    pub bounds: BoundingSphere,
    pub mesh: String,
    pub physics: String,
    pub query_angle: SolidAngle,
}

/// A presence record
#[derive(Debug, Clone)]
pub struct Presence {
    identity: Option<Identity>,
    space: SpaceId,
    object_hint: Option<ObjectRef>,
    token: PresenceToken,
    state: ConnectionState,
    context: ContextId,
    connect_callback: Option<CallbackId>,
    disconnect_callback: Option<CallbackId>,

    pub location: Location,
    pub bounds: BoundingSphere,
    pub mesh: String,
    pub physics: String,
    pub query_angle: SolidAngle,
}

impl Presence {
    /// A presence awaiting its connect completion
    pub fn pending(
        token: PresenceToken,
        space: SpaceId,
        context: ContextId,
        connect_callback: Option<CallbackId>,
    ) -> Self {
        Self {
            identity: None,
            space,
            object_hint: None,
            token,
            state: ConnectionState::Unconnected,
            context,
            connect_callback,
            disconnect_callback: None,
            location: Location::default(),
            bounds: BoundingSphere::default(),
            mesh: String::new(),
            physics: String::new(),
            query_angle: SolidAngle::MAX,
        }
    }

    /// The entity's initial presence, connected under [`PresenceToken::FIRST`]
    pub fn first(identity: Identity) -> Self {
        let mut presence = Self::pending(
            PresenceToken::FIRST,
            identity.space,
            ContextId::ROOT,
            None,
        );
        presence.identity = Some(identity);
        presence.state = ConnectionState::Connected;
        presence
    }

    /// A pending presence rebuilt from a snapshot, owned by the root context
    pub fn from_snapshot(snapshot: &PresenceSnapshot, token: PresenceToken) -> Self {
        let mut presence = Self::pending(token, snapshot.space, ContextId::ROOT, None);
        presence.object_hint = snapshot.identity.map(|identity| identity.object);
        presence.location = snapshot.location;
        presence.bounds = snapshot.bounds;
        presence.mesh = snapshot.mesh.clone();
        presence.physics = snapshot.physics.clone();
        presence.query_angle = snapshot.query_angle;
        presence
    }

    pub fn identity(&self) -> Option<Identity> {
        self.identity
    }

    pub fn space(&self) -> SpaceId {
        self.space
    }

    /// Object id requested from the space when connecting
    pub fn object_hint(&self) -> Option<ObjectRef> {
        self.object_hint
    }

    pub fn token(&self) -> PresenceToken {
        self.token
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn connect_callback(&self) -> Option<CallbackId> {
        self.connect_callback
    }

    pub fn disconnect_callback(&self) -> Option<CallbackId> {
        self.disconnect_callback
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    pub fn with_mesh(mut self, mesh: impl Into<String>) -> Self {
        self.mesh = mesh.into();
        self
    }

    pub fn with_bounds(mut self, bounds: BoundingSphere) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_query_angle(mut self, query_angle: SolidAngle) -> Self {
        self.query_angle = query_angle;
        self
    }

    pub(crate) fn complete_connect(&mut self, identity: Identity) {
        debug_assert_eq!(self.state, ConnectionState::Unconnected);
        self.identity = Some(identity);
        self.object_hint = Some(identity.object);
        self.state = ConnectionState::Connected;
    }

    pub(crate) fn mark_disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
    }

    /// Back to pending under a fresh token. Returns the connect callback
    /// this replaces, which the caller releases.
    pub(crate) fn prepare_reconnect(
        &mut self,
        token: PresenceToken,
        connect_callback: Option<CallbackId>,
    ) -> Option<CallbackId> {
        if let Some(identity) = self.identity.take() {
            self.object_hint = Some(identity.object);
        }
        self.token = token;
        self.state = ConnectionState::Unconnected;
        std::mem::replace(&mut self.connect_callback, connect_callback)
    }

    pub(crate) fn take_connect_callback(&mut self) -> Option<CallbackId> {
        self.connect_callback.take()
    }

    /// Returns the replaced callback, which the caller releases.
    pub(crate) fn set_disconnect_callback(
        &mut self,
        callback: Option<CallbackId>,
    ) -> Option<CallbackId> {
        std::mem::replace(&mut self.disconnect_callback, callback)
    }

    /// Strip every callback so the caller can release them.
    pub(crate) fn take_callbacks(&mut self) -> Vec<CallbackId> {
        self.connect_callback
            .take()
            .into_iter()
            .chain(self.disconnect_callback.take())
            .collect()
    }

    /// Hand the presence to the root context, stripping its callbacks.
    pub(crate) fn adopt_into_root(&mut self) -> Vec<CallbackId> {
        self.context = ContextId::ROOT;
        self.take_callbacks()
    }

    pub fn snapshot(&self) -> PresenceSnapshot {
        PresenceSnapshot {
            space: self.space,
            identity: self.identity,
            connected: self.is_connected(),
            location: self.location,
            bounds: self.bounds,
            mesh: self.mesh.clone(),
            physics: self.physics.clone(),
            query_angle: self.query_angle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_presence_is_connected() {
        let identity = Identity::random();
        let presence = Presence::first(identity);
        assert!(presence.token().is_first());
        assert!(presence.is_connected());
        assert_eq!(presence.identity(), Some(identity));
        assert_eq!(presence.context(), ContextId::ROOT);
    }

    #[test]
    fn test_reconnect_keeps_object_hint() {
        let identity = Identity::random();
        let mut presence = Presence::pending(PresenceToken(3), identity.space, ContextId(2), Some(CallbackId(1)));
        presence.complete_connect(identity);
        assert_eq!(presence.take_connect_callback(), Some(CallbackId(1)));

        presence.mark_disconnected();
        assert_eq!(presence.state(), ConnectionState::Disconnected);

        let replaced = presence.prepare_reconnect(PresenceToken(8), Some(CallbackId(2)));
        assert_eq!(replaced, None);
        assert_eq!(presence.identity(), None);
        assert_eq!(presence.object_hint(), Some(identity.object));
        assert_eq!(presence.token(), PresenceToken(8));
        assert_eq!(presence.state(), ConnectionState::Unconnected);
    }

    #[test]
    fn test_snapshot_restores_appearance() {
        let identity = Identity::random();
        let mut presence = Presence::first(identity).with_mesh("cube.dae");
        presence.physics = "{\"mass\":1}".into();

        let snapshot = presence.snapshot();
        assert!(snapshot.connected);

        let restored = Presence::from_snapshot(&snapshot, PresenceToken(4));
        assert_eq!(restored.mesh, "cube.dae");
        assert_eq!(restored.physics, "{\"mass\":1}");
        assert_eq!(restored.object_hint(), Some(identity.object));
        assert_eq!(restored.identity(), None);
    }

    #[test]
    fn test_take_callbacks_empties() {
        let mut presence = Presence::pending(PresenceToken(1), SpaceId::new(), ContextId::ROOT, Some(CallbackId(5)));
        presence.set_disconnect_callback(Some(CallbackId(6)));
        assert_eq!(presence.take_callbacks(), vec![CallbackId(5), CallbackId(6)]);
        assert!(presence.take_callbacks().is_empty());
    }
}
