//! The per-entity scripting host
//!
//! [`ScriptHost`] owns one script and everything it has created: presences,
//! handlers, timers, contexts. Every entry point runs one *turn*: it invokes
//! zero or more script callbacks, then flushes queued handler mutations,
//! releases dropped callbacks, and finally carries out a pending reset and
//! then a pending kill.

use crate::api::ScriptApi;
use crate::config::HostConfig;
use crate::context::ContextTree;
use crate::engine::{CallbackArgs, ScriptEngine};
use crate::envelope::Envelope;
use crate::error::{HostError, Result};
use crate::handler::{EventHandlerTable, HandlerInvoker, MatchedHandler};
use crate::lifecycle::ObjectLifecycle;
use crate::presence::{Presence, PresenceRegistry, TokenIssuer};
use crate::restore::{RestoreRecord, RestoreStore};
use crate::router::{MessageRouter, Transport};
use crate::timer::TimerService;
use crate::types::{CallbackId, ContextId};
use crate::visibility::{VisibilityBridge, VisibleHandle, VisibleParams};
use orrery_types::{BoundingSphere, Endpoint, EntityId, Identity, PresenceToken, Vector3};
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// External services a host talks to
pub struct Collaborators {
    pub lifecycle: Box<dyn ObjectLifecycle>,
    pub transport: Box<dyn Transport>,
    pub restore: Box<dyn RestoreStore>,
}

/// Everything a host owns apart from the engine, so a [`ScriptApi`] can
/// borrow it while the engine runs.
pub(crate) struct HostState {
    pub(crate) entity: EntityId,
    pub(crate) config: HostConfig,
    pub(crate) script: String,
    pub(crate) presences: PresenceRegistry,
    pub(crate) tokens: TokenIssuer,
    pub(crate) visibility: VisibilityBridge,
    pub(crate) router: MessageRouter,
    pub(crate) handlers: EventHandlerTable,
    pub(crate) timers: TimerService,
    pub(crate) contexts: ContextTree,
    pub(crate) imports: BTreeSet<String>,
    pub(crate) lifecycle: Box<dyn ObjectLifecycle>,
    pub(crate) restore: Box<dyn RestoreStore>,
    pub(crate) create_entity_endpoint: Option<Endpoint>,
    /// Presence and context callbacks waiting to be released
    pub(crate) released: Vec<CallbackId>,
    pub(crate) reset_requested: bool,
    pub(crate) kill_requested: bool,
    pub(crate) killed: bool,
}

impl HostState {
    /// Cancel the subtree's timers, remove its handlers, drop its contexts.
    pub(crate) fn destroy_context(&mut self, context: ContextId) {
        for id in self.contexts.subtree(context) {
            let timers = self.timers.cancel_all_for_context(id);
            let handlers = self.handlers.remove_for_context(id);
            if let Some(mut removed) = self.contexts.remove(id) {
                self.released.extend(removed.take_callbacks());
            }
            debug!(context = %id, timers, handlers, "destroyed context");
        }
    }
}

pub struct ScriptHost<E: ScriptEngine> {
    engine: E,
    state: HostState,
}

impl<E: ScriptEngine> ScriptHost<E> {
    /// Build a host. Nothing runs until [`ScriptHost::start`].
    pub fn new(
        entity: EntityId,
        config: HostConfig,
        engine: E,
        collaborators: Collaborators,
    ) -> Result<Self> {
        config.validate()?;
        let script = config.script_source()?;
        Ok(Self {
            engine,
            state: HostState {
                entity,
                config,
                script,
                presences: PresenceRegistry::new(),
                tokens: TokenIssuer::new(),
                visibility: VisibilityBridge::new(),
                router: MessageRouter::new(collaborators.transport),
                handlers: EventHandlerTable::new(),
                timers: TimerService::new(),
                contexts: ContextTree::new(),
                imports: BTreeSet::new(),
                lifecycle: collaborators.lifecycle,
                restore: collaborators.restore,
                create_entity_endpoint: None,
                released: Vec::new(),
                reset_requested: false,
                kill_requested: false,
                killed: false,
            },
        })
    }

    /// Load the script, or the persisted restore record if there is one.
    pub fn start(&mut self) -> Result<()> {
        self.ensure_alive()?;
        let record = if self.state.config.restore_on_start {
            self.load_restore_record()
        } else {
            None
        };

        match record {
            Some(RestoreRecord { script, presences }) => {
                info!(entity = %self.state.entity, presences = presences.len(), "restoring entity");
                self.state.script = script;
                self.load_script();
                let mut api = ScriptApi::new(&mut self.state, ContextId::ROOT);
                for snapshot in &presences {
                    if let Err(err) = api.restore_presence(snapshot) {
                        warn!(error = %err, "could not restore presence");
                    }
                }
            }
            None => {
                info!(entity = %self.state.entity, "starting script");
                self.load_script();
            }
        }
        self.finish_turn();
        Ok(())
    }

    /// A connect completion from the lifecycle service.
    ///
    /// [`PresenceToken::FIRST`] creates the entity's initial presence and
    /// runs the root context's on-connect callback. Any other token must
    /// match a pending presence; that presence moves into the registry and
    /// its own connect callback runs.
    pub fn on_connected(&mut self, identity: Identity, token: PresenceToken) -> Result<()> {
        self.ensure_alive()?;
        if self.state.presences.contains(&identity) {
            error!(identity = %identity, token = %token, "connect completion for an identity already connected");
            return Err(HostError::protocol(format!("{identity} is already connected")));
        }

        let (context, callback) = if token.is_first() {
            if self.state.create_entity_endpoint.is_some() {
                error!(identity = %identity, "second connect completion for the first presence");
                return Err(HostError::protocol("the first presence has already connected"));
            }
            let config = &self.state.config;
            let presence = Presence::first(identity)
                .with_mesh(config.default_mesh.clone())
                .with_bounds(BoundingSphere::new(Vector3::ZERO, config.default_bounds_radius))
                .with_query_angle(config.default_query_angle);
            self.state.presences.insert(identity, presence);
            let service = self.state.config.create_entity_service;
            self.state.create_entity_endpoint = Some(self.state.router.bind(identity, service));
            (ContextId::ROOT, self.state.contexts.root().on_connect)
        } else {
            let Some(mut presence) = self.state.presences.resolve_connect(token) else {
                error!(identity = %identity, token = %token, "connect completion matches no pending presence");
                return Err(HostError::protocol(format!("no pending presence for {token}")));
            };
            presence.complete_connect(identity);
            let context = presence.context();
            let callback = presence.take_connect_callback();
            self.state.presences.insert(identity, presence);
            if let Some(callback) = callback {
                self.state.released.push(callback);
            }
            (context, callback)
        };

        self.state.router.bind(identity, self.state.config.messaging_service);
        info!(identity = %identity, token = %token, "presence connected");

        if let Some(callback) = callback.filter(|_| self.state.contexts.contains(context)) {
            self.invoke_in(
                context,
                callback,
                CallbackArgs::Presence {
                    token,
                    identity: Some(identity),
                },
            );
        }
        self.finish_turn();
        Ok(())
    }

    /// The space dropped one of our presences. Unknown identities are
    /// ignored.
    pub fn on_disconnected(&mut self, identity: Identity) -> Result<()> {
        self.ensure_alive()?;
        let Some(presence) = self.state.presences.find_mut(&identity) else {
            debug!(identity = %identity, "disconnect for an untracked presence ignored");
            return Ok(());
        };
        presence.mark_disconnected();
        let token = presence.token();
        let context = presence.context();
        let callback = if self.state.contexts.contains(context) {
            presence.disconnect_callback()
        } else {
            debug!(identity = %identity, context = %context, "owning context gone, dropping disconnect callback");
            self.state.released.extend(presence.set_disconnect_callback(None));
            None
        };
        self.state.router.unbind(&identity);
        info!(identity = %identity, "presence disconnected");

        if let Some(callback) = callback {
            self.invoke_in(
                context,
                callback,
                CallbackArgs::Presence {
                    token,
                    identity: Some(identity),
                },
            );
        }
        self.finish_turn();
        Ok(())
    }

    /// Inbound traffic from the transport, addressed to one of our endpoints.
    pub fn handle_inbound(&mut self, source: Endpoint, destination: Endpoint, payload: &[u8]) -> Result<usize> {
        self.ensure_alive()?;
        if let Err(err) = self.state.router.accept_inbound(&source, &destination) {
            warn!(source = %source, destination = %destination, error = %err, "dropping inbound message");
            return Err(err.into());
        }
        self.dispatch(payload, source, destination)
    }

    /// Run one message through the handler table. Returns how many
    /// handlers were invoked.
    pub fn dispatch(&mut self, payload: &[u8], sender: Endpoint, receiver: Endpoint) -> Result<usize> {
        self.ensure_alive()?;
        let envelope = Envelope::decode(payload).map_err(|err| {
            warn!(sender = %sender, error = %err, "dropping malformed message");
            err
        })?;
        let seq = envelope.seq;
        let body = envelope.into_body();
        let handle = self.state.visibility.get_or_create(
            sender.identity,
            receiver.identity,
            &VisibleParams::unconfirmed(),
        );

        let mut pass = DispatchPass {
            host: self,
            body: &body,
            sender: handle,
            receiver: receiver.identity.to_string(),
        };
        let invoked = EventHandlerTable::match_and_invoke(
            &mut pass,
            &sender.identity,
            &receiver.identity,
            &body,
        );
        debug!(sender = %sender, receiver = %receiver, ?seq, invoked, "dispatched message");

        self.finish_turn();
        Ok(invoked)
    }

    /// `observed` came into view of our presence `observer`.
    pub fn notify_visible(
        &mut self,
        observed: Identity,
        observer: Identity,
        params: VisibleParams,
    ) -> Result<VisibleHandle> {
        self.ensure_alive()?;
        if !self.state.presences.contains(&observer) {
            error!(observer = %observer, observed = %observed, "proximity addition for an observer that is not ours");
            return Err(HostError::PresenceNotFound(observer));
        }
        let params = VisibleParams {
            visible: true,
            ..params
        };
        let handle = self.state.visibility.get_or_create(observed, observer, &params);
        debug!(observer = %observer, observed = %observed, "object became visible");

        let callbacks: Vec<(ContextId, CallbackId)> = self
            .state
            .contexts
            .ids()
            .into_iter()
            .filter_map(|id| {
                let context = self.state.contexts.get(id)?;
                context.on_proximity_added.map(|callback| (id, callback))
            })
            .collect();
        for (context, callback) in callbacks {
            self.invoke_in(
                context,
                callback,
                CallbackArgs::Proximity {
                    visible: handle.clone(),
                    observer: observer.to_string(),
                },
            );
        }
        self.finish_turn();
        Ok(handle)
    }

    /// `observed` went out of view of `observer`.
    pub fn notify_gone(&mut self, observed: Identity, observer: Identity) -> Result<()> {
        self.ensure_alive()?;
        if !self.state.presences.contains(&observer) {
            error!(observer = %observer, observed = %observed, "proximity removal for an observer that is not ours");
            return Err(HostError::PresenceNotFound(observer));
        }
        let handle = self
            .state
            .visibility
            .notify_gone(observed, observer)
            .map_err(|err| {
                error!(observer = %observer, observed = %observed, error = %err, "proximity removal ignored");
                err
            })?;
        debug!(observer = %observer, observed = %observed, "object left view");

        let callbacks: Vec<(ContextId, CallbackId)> = self
            .state
            .contexts
            .ids()
            .into_iter()
            .filter_map(|id| {
                let context = self.state.contexts.get(id)?;
                context.on_proximity_removed.map(|callback| (id, callback))
            })
            .collect();
        for (context, callback) in callbacks {
            self.invoke_in(
                context,
                callback,
                CallbackArgs::Proximity {
                    visible: handle.clone(),
                    observer: observer.to_string(),
                },
            );
        }
        self.finish_turn();
        Ok(())
    }

    /// Advance the host clock to `now` (time since the host was created)
    /// and fire every timer that came due. Each firing is its own turn.
    pub fn advance_clock(&mut self, now: Duration) -> Result<usize> {
        self.ensure_alive()?;
        let mut fired = 0;
        for id in self.state.timers.advance_to(now) {
            if self.state.killed {
                break;
            }
            let Some(timer) = self.state.timers.fire(id) else {
                continue;
            };
            fired += 1;
            if self.state.contexts.contains(timer.context) {
                self.invoke_in(timer.context, timer.callback, CallbackArgs::Timer { timer: id });
            }
            if timer.last {
                self.state.released.push(timer.callback);
            }
            self.finish_turn();
        }
        Ok(fired)
    }

    /// Run host-side code against the script API in `context`, as one turn.
    pub fn with_api<R>(&mut self, context: ContextId, f: impl FnOnce(&mut ScriptApi<'_>) -> R) -> Result<R> {
        self.ensure_alive()?;
        if !self.state.contexts.contains(context) {
            return Err(HostError::ContextNotFound(context));
        }
        let result = {
            let mut api = ScriptApi::new(&mut self.state, context);
            f(&mut api)
        };
        self.finish_turn();
        Ok(result)
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.state.timers.next_deadline()
    }

    pub fn entity(&self) -> EntityId {
        self.state.entity
    }

    pub fn config(&self) -> &HostConfig {
        &self.state.config
    }

    pub fn is_killed(&self) -> bool {
        self.state.killed
    }

    pub fn presences(&self) -> &PresenceRegistry {
        &self.state.presences
    }

    pub fn handlers(&self) -> &EventHandlerTable {
        &self.state.handlers
    }

    pub fn timers(&self) -> &TimerService {
        &self.state.timers
    }

    pub fn visibility(&self) -> &VisibilityBridge {
        &self.state.visibility
    }

    pub fn router(&self) -> &MessageRouter {
        &self.state.router
    }

    pub fn contexts(&self) -> &ContextTree {
        &self.state.contexts
    }

    pub fn imports(&self) -> impl Iterator<Item = &String> {
        self.state.imports.iter()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.state.killed {
            warn!(entity = %self.state.entity, "event for a killed entity rejected");
            return Err(HostError::EntityKilled);
        }
        Ok(())
    }

    fn load_restore_record(&mut self) -> Option<RestoreRecord> {
        let entity = self.state.entity;
        let blob = self.state.restore.load(entity)?;
        match RestoreRecord::from_bytes(&blob) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(entity = %entity, error = %err, "ignoring unreadable restore record");
                None
            }
        }
    }

    fn load_script(&mut self) {
        let entity = self.state.entity;
        let Self { engine, state } = self;
        let source = state.script.clone();
        let mut api = ScriptApi::new(state, ContextId::ROOT);
        if let Err(err) = engine.load(&mut api, &source) {
            error!(entity = %entity, error = %err, "script failed to load");
        }
    }

    fn invoke_in(&mut self, context: ContextId, callback: CallbackId, args: CallbackArgs) {
        let Self { engine, state } = self;
        let mut api = ScriptApi::new(state, context);
        if let Err(err) = engine.invoke(&mut api, callback, args) {
            warn!(callback = %callback, context = %context, error = %err, "script callback failed");
        }
    }

    fn release_callbacks(&mut self) {
        let mut released = std::mem::take(&mut self.state.released);
        released.extend(self.state.handlers.take_released());
        released.extend(self.state.timers.take_released());
        for callback in released {
            self.engine.release(callback);
        }
    }

    fn finish_turn(&mut self) {
        self.state.handlers.flush();
        self.release_callbacks();
        if std::mem::take(&mut self.state.reset_requested) {
            self.reset_script();
        }
        if std::mem::take(&mut self.state.kill_requested) {
            self.kill_script();
        }
    }

    /// Tear down everything the script built and load it again.
    ///
    /// Presences still connected to the space survive, handed to the fresh
    /// root context without their callbacks; pending and disconnected
    /// presences are dropped.
    fn reset_script(&mut self) {
        info!(entity = %self.state.entity, "resetting script");
        let state = &mut self.state;
        for context in state.contexts.ids() {
            state.timers.cancel_all_for_context(context);
        }
        state.handlers.clear();
        state.imports.clear();
        for mut context in state.contexts.reset() {
            state.released.extend(context.take_callbacks());
        }
        for mut presence in state.presences.drain() {
            state.released.extend(presence.adopt_into_root());
            match presence.identity() {
                Some(identity) if presence.is_connected() => {
                    state.presences.insert(identity, presence);
                }
                Some(identity) => {
                    state.router.unbind(&identity);
                }
                None => {}
            }
        }
        self.release_callbacks();

        self.load_script();
        self.state.handlers.flush();
        self.release_callbacks();
    }

    /// Clear the restore record and ask for the entity to be destroyed.
    /// The host rejects every later event.
    fn kill_script(&mut self) {
        let entity = self.state.entity;
        info!(entity = %entity, "killing script");
        self.state.restore.clear(entity);
        self.state.lifecycle.destroy_entity(entity);
        self.state.killed = true;

        let state = &mut self.state;
        state.timers.cancel_all();
        state.handlers.clear();
        for mut context in state.contexts.reset() {
            state.released.extend(context.take_callbacks());
        }
        for mut presence in state.presences.drain() {
            state.released.extend(presence.take_callbacks());
        }
        state.router.clear();
        self.release_callbacks();
    }
}

/// One dispatch pass: invokes matched handlers with the message arguments
/// and stops as soon as a reset or kill is requested.
struct DispatchPass<'h, 'b, E: ScriptEngine> {
    host: &'h mut ScriptHost<E>,
    body: &'b Value,
    sender: VisibleHandle,
    receiver: String,
}

impl<E: ScriptEngine> HandlerInvoker for DispatchPass<'_, '_, E> {
    fn table(&mut self) -> &mut EventHandlerTable {
        &mut self.host.state.handlers
    }

    fn should_stop(&self) -> bool {
        self.host.state.reset_requested || self.host.state.kill_requested
    }

    fn invoke(&mut self, handler: MatchedHandler) {
        self.host.invoke_in(
            handler.context,
            handler.callback,
            CallbackArgs::Message {
                body: self.body.clone(),
                sender: self.sender.clone(),
                receiver: self.receiver.clone(),
            },
        );
    }
}
