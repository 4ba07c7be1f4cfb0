//! Shared types for orrery
//!
//! This crate provides the value types exchanged between a scripting host
//! and its collaborators: identities of presences in a space, presence
//! tokens, messaging endpoints and kinematic state.

mod motion;

pub use motion::{BoundingSphere, Location, Quaternion, SolidAngle, Vector3};

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Space identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpaceId(pub Uuid);

impl SpaceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn nil() -> Self {
        Self(Uuid::nil())
    }
}

impl Default for SpaceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Object identifier within a space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef(pub Uuid);

impl ObjectRef {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn nil() -> Self {
        Self(Uuid::nil())
    }
}

impl Default for ObjectRef {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable name of a connected presence: a (space, object) pair
///
/// Ordering is lexicographic over the pair, so identities can key
/// ordered maps as well as hash maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
    pub space: SpaceId,
    pub object: ObjectRef,
}

impl Identity {
    pub fn new(space: SpaceId, object: ObjectRef) -> Self {
        Self { space, object }
    }

    /// A fresh identity in a fresh space
    pub fn random() -> Self {
        Self::new(SpaceId::new(), ObjectRef::new())
    }

    /// A fresh object in the given space
    pub fn in_space(space: SpaceId) -> Self {
        Self::new(space, ObjectRef::new())
    }

    pub fn space(&self) -> SpaceId {
        self.space
    }

    pub fn object(&self) -> ObjectRef {
        self.object
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object, self.space)
    }
}

/// Identifier of the hosted entity that owns a script and its presences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity:{}", self.0)
    }
}

/// Correlates a presence-creation request with its connect completion
///
/// [`PresenceToken::FIRST`] is reserved for the entity's initial
/// connection and is never handed out for script-created presences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PresenceToken(pub u64);

impl PresenceToken {
    pub const FIRST: PresenceToken = PresenceToken(0);

    pub fn is_first(&self) -> bool {
        *self == Self::FIRST
    }
}

impl fmt::Display for PresenceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "token:{}", self.0)
    }
}

/// Service port a presence binds for a kind of traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceTag(pub u32);

impl ServiceTag {
    /// Script-to-script messages
    pub const MESSAGING: ServiceTag = ServiceTag(12);
    /// Entity creation requests
    pub const CREATE_ENTITY: ServiceTag = ServiceTag(13);
}

impl fmt::Display for ServiceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A presence's communication channel for one service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    pub identity: Identity,
    pub service: ServiceTag,
}

impl Endpoint {
    pub fn new(identity: Identity, service: ServiceTag) -> Self {
        Self { identity, service }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.identity, self.service)
    }
}
