//! The capability surface a running script sees
//!
//! Every engine call receives a [`ScriptApi`] bound to the context the
//! callback belongs to. Root-only operations check that context and return
//! [`HostError::PermissionDenied`] to the script otherwise.

use crate::envelope::Envelope;
use crate::error::{HostError, Result, ScriptError};
use crate::handler::HandlerFilter;
use crate::host::HostState;
use crate::lifecycle::{ConnectRequest, EntityCreateInfo, PresenceUpdate};
use crate::presence::{Presence, PresenceSnapshot};
use crate::restore::RestoreRecord;
use crate::timer::TimerKind;
use crate::types::{CallbackId, ContextId, HandlerId, TimerId};
use crate::visibility::{VisibleHandle, VisibleParams};
use orrery_types::{BoundingSphere, Endpoint, EntityId, Identity, Location, PresenceToken, SpaceId, Vector3};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Parameters for a script-created presence
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceRequest {
    pub space: SpaceId,
    pub position: Vector3,
    /// Falls back to the configured default mesh
    pub mesh: Option<String>,
}

impl PresenceRequest {
    pub fn new(space: SpaceId) -> Self {
        Self {
            space,
            position: Vector3::ZERO,
            mesh: None,
        }
    }

    pub fn at(mut self, position: Vector3) -> Self {
        self.position = position;
        self
    }

    pub fn with_mesh(mut self, mesh: impl Into<String>) -> Self {
        self.mesh = Some(mesh.into());
        self
    }
}

pub struct ScriptApi<'a> {
    state: &'a mut HostState,
    context: ContextId,
}

impl<'a> ScriptApi<'a> {
    pub(crate) fn new(state: &'a mut HostState, context: ContextId) -> Self {
        Self { state, context }
    }

    /// The context this call runs in
    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn entity(&self) -> EntityId {
        self.state.entity
    }

    /// Host clock, as last advanced
    pub fn now(&self) -> Duration {
        self.state.timers.now()
    }

    fn require_root(&self, operation: &str) -> Result<()> {
        if self.context.is_root() {
            Ok(())
        } else {
            Err(HostError::root_only(operation, self.context))
        }
    }

    /// Fails once the calling context has been destroyed, for example by
    /// the callback that is still running in it. The callbacks offered with
    /// the rejected call are released.
    fn require_live_context(&mut self, offered: &[Option<CallbackId>]) -> Result<()> {
        if self.state.contexts.contains(self.context) {
            return Ok(());
        }
        warn!(context = %self.context, "call from a destroyed context rejected");
        self.state.released.extend(offered.iter().flatten().copied());
        Err(HostError::ContextNotFound(self.context))
    }

    // Handlers

    pub fn register_handler(&mut self, filter: HandlerFilter, callback: CallbackId) -> Result<HandlerId> {
        self.require_live_context(&[Some(callback)])?;
        Ok(self.state.handlers.register(filter, callback, self.context))
    }

    /// False if the handler was already cleared or its removal is queued.
    pub fn remove_handler(&mut self, handler: HandlerId) -> bool {
        self.state.handlers.request_remove(handler)
    }

    // Reset and kill

    /// Tear down and reload the script once the current turn ends.
    pub fn request_reset(&mut self) -> Result<()> {
        self.require_root("reset")?;
        info!(entity = %self.state.entity, "script reset requested");
        self.state.reset_requested = true;
        Ok(())
    }

    /// Destroy the entity once the current turn ends.
    pub fn request_kill(&mut self) -> Result<()> {
        self.require_root("kill")?;
        info!(entity = %self.state.entity, "script kill requested");
        self.state.kill_requested = true;
        Ok(())
    }

    // Presences

    /// Ask for a new presence. `callback` runs when it connects.
    pub fn create_presence(
        &mut self,
        request: PresenceRequest,
        callback: Option<CallbackId>,
    ) -> Result<PresenceToken> {
        self.require_live_context(&[callback])?;
        let config = &self.state.config;
        let token = self.state.tokens.issue();
        let presence = Presence::pending(token, request.space, self.context, callback)
            .with_location(Location::at_rest(request.position))
            .with_bounds(BoundingSphere::new(Vector3::ZERO, config.default_bounds_radius))
            .with_mesh(request.mesh.unwrap_or_else(|| config.default_mesh.clone()))
            .with_query_angle(config.default_query_angle);

        let connect = ConnectRequest::for_presence(&presence);
        self.state.presences.create_unconnected(presence);
        self.state.lifecycle.connect(connect);
        info!(token = %token, space = %request.space, context = %self.context, "requested presence");
        Ok(token)
    }

    /// Recreate a presence from a snapshot. Connected snapshots are
    /// reconnected under their old object id right away; others stay
    /// pending until [`ScriptApi::connect_pending`].
    pub fn restore_presence(&mut self, snapshot: &PresenceSnapshot) -> Result<PresenceToken> {
        self.require_root("restore_presence")?;
        let token = self.state.tokens.issue();
        let presence = Presence::from_snapshot(snapshot, token);
        let connect = snapshot
            .connected
            .then(|| ConnectRequest::for_presence(&presence));
        self.state.presences.create_unconnected(presence);
        if let Some(connect) = connect {
            self.state.lifecycle.connect(connect);
        }
        info!(token = %token, connected = snapshot.connected, "restored presence");
        Ok(token)
    }

    /// Issue the connect request for a pending presence.
    pub fn connect_pending(&mut self, token: PresenceToken) -> Result<()> {
        let presence = self
            .state
            .presences
            .pending_mut(token)
            .ok_or(HostError::TokenNotFound(token))?;
        let connect = ConnectRequest::for_presence(presence);
        self.state.lifecycle.connect(connect);
        Ok(())
    }

    /// Forget a presence and ask the space to disconnect it.
    pub fn delete_presence(&mut self, identity: Identity) -> Result<()> {
        let mut presence = self
            .state
            .presences
            .remove(&identity)
            .ok_or(HostError::PresenceNotFound(identity))?;
        self.state.released.extend(presence.take_callbacks());
        self.state.router.unbind(&identity);
        if presence.is_connected() {
            self.state.lifecycle.disconnect(identity);
        }
        info!(identity = %identity, "deleted presence");
        Ok(())
    }

    /// Abandon a presence that has not connected yet.
    pub fn cancel_pending(&mut self, token: PresenceToken) -> Result<()> {
        let mut presence = self
            .state
            .presences
            .resolve_connect(token)
            .ok_or(HostError::TokenNotFound(token))?;
        self.state.released.extend(presence.take_callbacks());
        debug!(token = %token, "cancelled pending presence");
        Ok(())
    }

    /// Ask the space to drop a presence; the presence stays tracked and
    /// its disconnect callback runs when the space confirms.
    pub fn disconnect_presence(&mut self, identity: Identity) -> Result<()> {
        let presence = self
            .state
            .presences
            .find(&identity)
            .ok_or(HostError::PresenceNotFound(identity))?;
        if !presence.is_connected() {
            return Err(HostError::protocol(format!("{identity} is not connected")));
        }
        self.state.lifecycle.disconnect(identity);
        Ok(())
    }

    /// Connect a disconnected presence again under its old object id.
    pub fn reconnect_presence(
        &mut self,
        identity: Identity,
        callback: Option<CallbackId>,
    ) -> Result<PresenceToken> {
        self.require_live_context(&[callback])?;
        match self.state.presences.find(&identity) {
            None => return Err(HostError::PresenceNotFound(identity)),
            Some(presence) if presence.is_connected() => {
                return Err(HostError::protocol(format!("{identity} is still connected")));
            }
            Some(_) => {}
        }
        let Some(mut presence) = self.state.presences.remove(&identity) else {
            return Err(HostError::PresenceNotFound(identity));
        };

        let token = self.state.tokens.issue();
        self.state
            .released
            .extend(presence.prepare_reconnect(token, callback));
        let connect = ConnectRequest::for_presence(&presence);
        self.state.presences.create_unconnected(presence);
        self.state.lifecycle.connect(connect);
        info!(identity = %identity, token = %token, "reconnecting presence");
        Ok(token)
    }

    pub fn presence(&self, identity: &Identity) -> Option<&Presence> {
        self.state.presences.find(identity)
    }

    /// Identities of every tracked presence
    pub fn presences(&self) -> Vec<Identity> {
        self.state.presences.identities().copied().collect()
    }

    pub fn set_disconnect_callback(
        &mut self,
        identity: Identity,
        callback: Option<CallbackId>,
    ) -> Result<()> {
        self.require_live_context(&[callback])?;
        let presence = self
            .state
            .presences
            .find_mut(&identity)
            .ok_or(HostError::PresenceNotFound(identity))?;
        let replaced = presence.set_disconnect_callback(callback);
        self.state.released.extend(replaced);
        Ok(())
    }

    /// Update the cached state of a presence and forward the request to
    /// the lifecycle service.
    pub fn update_presence(&mut self, identity: Identity, update: PresenceUpdate) -> Result<()> {
        let presence = self
            .state
            .presences
            .find_mut(&identity)
            .ok_or(HostError::PresenceNotFound(identity))?;
        match &update {
            PresenceUpdate::Position(position) => presence.location.position = *position,
            PresenceUpdate::Velocity(velocity) => presence.location.velocity = *velocity,
            PresenceUpdate::Orientation(orientation) => presence.location.orientation = *orientation,
            PresenceUpdate::OrientationVelocity { axis, speed } => {
                presence.location.angular_axis = *axis;
                presence.location.angular_speed = *speed;
            }
            PresenceUpdate::Scale(scale) => presence.bounds = presence.bounds.with_radius(*scale),
            PresenceUpdate::Mesh(mesh) => presence.mesh = mesh.clone(),
            PresenceUpdate::Physics(physics) => presence.physics = physics.clone(),
            PresenceUpdate::QueryAngle(angle) => presence.query_angle = *angle,
        }
        self.state.lifecycle.request_update(identity, update);
        Ok(())
    }

    // Messaging

    /// Send `body` from one of our presences. Nothing is retried.
    pub fn send_message(&mut self, from: Identity, to: Identity, body: Value) -> Result<()> {
        let payload = Envelope::from_value(body)?.encode()?;
        let service = self.state.config.messaging_service;
        let result = self
            .state
            .router
            .send(&Endpoint::new(from, service), to, service, payload);
        if let Err(err) = &result {
            warn!(from = %from, to = %to, error = %err, "dropping outbound message");
        }
        Ok(result?)
    }

    // Timers

    pub fn set_timeout(&mut self, period: Duration, callback: CallbackId, kind: TimerKind) -> Result<TimerId> {
        self.require_live_context(&[Some(callback)])?;
        Ok(self
            .state
            .timers
            .schedule(period, callback, self.context, None, false, kind))
    }

    /// Schedule a timer carrying over remaining time and suspension, as
    /// when rebuilding timers from saved state.
    pub fn restore_timer(
        &mut self,
        period: Duration,
        callback: CallbackId,
        remaining: Duration,
        suspended: bool,
        kind: TimerKind,
    ) -> Result<TimerId> {
        self.require_live_context(&[Some(callback)])?;
        Ok(self
            .state
            .timers
            .schedule(period, callback, self.context, Some(remaining), suspended, kind))
    }

    pub fn clear_timer(&mut self, timer: TimerId) -> bool {
        self.state.timers.cancel(timer)
    }

    pub fn suspend_timer(&mut self, timer: TimerId) -> bool {
        self.state.timers.suspend(timer)
    }

    pub fn resume_timer(&mut self, timer: TimerId) -> bool {
        self.state.timers.resume(timer)
    }

    pub fn timer_remaining(&self, timer: TimerId) -> Option<Duration> {
        self.state.timers.remaining(timer)
    }

    // Contexts

    /// Spawn a child of the current context.
    pub fn create_context(&mut self) -> Result<ContextId> {
        self.require_live_context(&[])?;
        let child = self.state.contexts.create_child(self.context)?;
        debug!(parent = %self.context, context = %child, "created context");
        Ok(child)
    }

    /// Destroy a context and everything beneath it. Only the context
    /// itself or one of its ancestors may do this; the root is permanent.
    pub fn destroy_context(&mut self, context: ContextId) -> Result<()> {
        if context.is_root() {
            return Err(HostError::PermissionDenied("the root context cannot be destroyed".into()));
        }
        if !self.state.contexts.contains(context) {
            return Err(HostError::ContextNotFound(context));
        }
        if !self.state.contexts.is_within(context, self.context) {
            return Err(HostError::PermissionDenied(format!(
                "{} cannot destroy {context}, which is outside its subtree",
                self.context
            )));
        }
        self.state.destroy_context(context);
        Ok(())
    }

    /// Callback for the entity's first presence connecting.
    pub fn set_on_connect(&mut self, callback: Option<CallbackId>) -> Result<()> {
        self.require_root("set_on_connect")?;
        if let Some(context) = self.state.contexts.get_mut(ContextId::ROOT) {
            let replaced = std::mem::replace(&mut context.on_connect, callback);
            self.state.released.extend(replaced);
        }
        Ok(())
    }

    /// Callbacks for objects entering and leaving view of our presences.
    pub fn set_proximity_callbacks(
        &mut self,
        added: Option<CallbackId>,
        removed: Option<CallbackId>,
    ) -> Result<()> {
        self.require_live_context(&[added, removed])?;
        let context = self
            .state
            .contexts
            .get_mut(self.context)
            .ok_or(HostError::ContextNotFound(self.context))?;
        let replaced = [
            std::mem::replace(&mut context.on_proximity_added, added),
            std::mem::replace(&mut context.on_proximity_removed, removed),
        ];
        self.state.released.extend(replaced.into_iter().flatten());
        Ok(())
    }

    // Visibility

    pub fn find_visible(&self, observed: &Identity) -> Option<VisibleHandle> {
        self.state.visibility.lookup(observed)
    }

    /// A visible handle for one of our own presences, as seen by itself
    pub fn presence_to_visible(&mut self, identity: Identity) -> Result<VisibleHandle> {
        let presence = self
            .state
            .presences
            .find(&identity)
            .ok_or(HostError::PresenceNotFound(identity))?;
        let params = VisibleParams::visible()
            .with_location(presence.location)
            .with_bounds(presence.bounds)
            .with_mesh(presence.mesh.clone());
        Ok(self.state.visibility.get_or_create(identity, identity, &params))
    }

    // Miscellany

    /// Record a module import. False if it was already imported.
    pub fn import(&mut self, module: &str) -> bool {
        self.state.imports.insert(module.to_string())
    }

    pub fn is_imported(&self, module: &str) -> bool {
        self.state.imports.contains(module)
    }

    /// Persist `script` and the current presences as the entity's restore
    /// record. An empty script clears the record.
    pub fn set_restore_script(&mut self, script: &str) -> Result<()> {
        self.require_root("set_restore_script")?;
        let entity = self.state.entity;
        if script.is_empty() {
            self.state.restore.clear(entity);
            debug!(entity = %entity, "cleared restore record");
            return Ok(());
        }

        let presences = self
            .state
            .presences
            .presences()
            .chain(self.state.presences.unconnected())
            .map(Presence::snapshot)
            .collect();
        let record = RestoreRecord {
            script: script.to_string(),
            presences,
        };
        let blob = record
            .to_bytes()
            .map_err(|e| ScriptError::Raised(format!("cannot encode restore record: {e}")))?;
        self.state.restore.save(entity, blob);
        debug!(entity = %entity, presences = record.presences.len(), "saved restore record");
        Ok(())
    }

    /// Spawn a new entity; needs the first presence's create-entity
    /// endpoint to be bound.
    pub fn create_entity(&mut self, info: EntityCreateInfo) -> Result<()> {
        let endpoint = self
            .state
            .create_entity_endpoint
            .filter(|endpoint| self.state.router.is_bound(endpoint))
            .ok_or_else(|| HostError::protocol("no connected presence to create entities through"))?;
        info!(endpoint = %endpoint, space = %info.space, "creating entity");
        self.state.lifecycle.create_entity(info);
        Ok(())
    }
}
