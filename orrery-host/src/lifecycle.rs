//! Requests the host makes of the object lifecycle service

use crate::presence::Presence;
use orrery_types::{
    BoundingSphere, EntityId, Identity, Location, ObjectRef, PresenceToken, Quaternion, SolidAngle,
    SpaceId, Vector3,
};

/// Ask the space to connect a presence; completion arrives later through
/// `ScriptHost::on_connected` carrying the same token.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectRequest {
    pub space: SpaceId,
    pub location: Location,
    pub bounds: BoundingSphere,
    pub mesh: String,
    pub physics: String,
    pub query_angle: SolidAngle,
    /// Object id to reuse, when reconnecting or restoring
    pub object: Option<ObjectRef>,
    pub token: PresenceToken,
}

impl ConnectRequest {
    pub(crate) fn for_presence(presence: &Presence) -> Self {
        Self {
            space: presence.space(),
            location: presence.location,
            bounds: presence.bounds,
            mesh: presence.mesh.clone(),
            physics: presence.physics.clone(),
            query_angle: presence.query_angle,
            object: presence.object_hint(),
            token: presence.token(),
        }
    }
}

/// A fire-and-forget change to a connected presence
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceUpdate {
    Position(Vector3),
    Velocity(Vector3),
    Orientation(Quaternion),
    OrientationVelocity { axis: Vector3, speed: f32 },
    Scale(f32),
    Mesh(String),
    Physics(String),
    QueryAngle(SolidAngle),
}

/// A new entity to be spawned next to one of ours
#[derive(Debug, Clone, PartialEq)]
pub struct EntityCreateInfo {
    pub space: SpaceId,
    pub location: Location,
    pub scale: f32,
    pub mesh: String,
    pub physics: String,
    pub query_angle: SolidAngle,
    pub script: String,
}

/// The object lifecycle service
pub trait ObjectLifecycle: Send {
    fn connect(&mut self, request: ConnectRequest);

    fn disconnect(&mut self, identity: Identity);

    fn destroy_entity(&mut self, entity: EntityId);

    fn create_entity(&mut self, info: EntityCreateInfo);

    fn request_update(&mut self, identity: Identity, update: PresenceUpdate);
}
