//! Recording collaborators and a scripted engine for tests and embedding
//!
//! Everything here writes into a shared [`Recorder`], so a test can assert
//! on the relative order of engine and lifecycle activity.

use crate::api::ScriptApi;
use crate::engine::{CallbackArgs, ScriptEngine};
use crate::error::{RoutingError, ScriptError};
use crate::host::Collaborators;
use crate::lifecycle::{ConnectRequest, EntityCreateInfo, ObjectLifecycle, PresenceUpdate};
use crate::restore::InMemoryRestoreStore;
use crate::router::Transport;
use crate::types::CallbackId;
use orrery_types::{Endpoint, EntityId, Identity};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// One observed interaction
#[derive(Debug, Clone)]
pub enum Recorded {
    Loaded(String),
    Invoked {
        callback: CallbackId,
        args: CallbackArgs,
    },
    Released(CallbackId),
    Connect(ConnectRequest),
    Disconnect(Identity),
    Destroy(EntityId),
    CreateEntity(EntityCreateInfo),
    Update(Identity, PresenceUpdate),
    Sent {
        from: Endpoint,
        to: Endpoint,
        payload: Vec<u8>,
    },
}

/// Shared, ordered log of [`Recorded`] events
#[derive(Debug, Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<Recorded>>>);

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: Recorded) {
        self.0.lock().push(event);
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.0.lock().clone()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }

    /// Arguments of every invocation of `callback`, in order
    pub fn invocations(&self, callback: CallbackId) -> Vec<CallbackArgs> {
        self.0
            .lock()
            .iter()
            .filter_map(|event| match event {
                Recorded::Invoked { callback: c, args } if *c == callback => Some(args.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn released(&self) -> Vec<CallbackId> {
        self.0
            .lock()
            .iter()
            .filter_map(|event| match event {
                Recorded::Released(callback) => Some(*callback),
                _ => None,
            })
            .collect()
    }

    pub fn connects(&self) -> Vec<ConnectRequest> {
        self.0
            .lock()
            .iter()
            .filter_map(|event| match event {
                Recorded::Connect(request) => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    /// Index of the first event matching `predicate`
    pub fn position(&self, predicate: impl Fn(&Recorded) -> bool) -> Option<usize> {
        self.0.lock().iter().position(predicate)
    }
}

type LoadFn = Box<dyn FnMut(&mut ScriptApi<'_>, &str) -> Result<(), ScriptError> + Send>;
type CallbackFn = Box<dyn FnMut(&mut ScriptApi<'_>, &CallbackArgs) -> Result<(), ScriptError> + Send>;

/// Engine whose "script" is a set of Rust closures keyed by callback id
pub struct ScriptedEngine {
    recorder: Recorder,
    on_load: Option<LoadFn>,
    callbacks: HashMap<CallbackId, CallbackFn>,
}

impl ScriptedEngine {
    pub fn new(recorder: Recorder) -> Self {
        Self {
            recorder,
            on_load: None,
            callbacks: HashMap::new(),
        }
    }

    /// Run `f` whenever the script is loaded (on start and after reset).
    pub fn on_load<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut ScriptApi<'_>, &str) -> Result<(), ScriptError> + Send + 'static,
    {
        self.on_load = Some(Box::new(f));
        self
    }

    /// Run `f` whenever `callback` is invoked.
    pub fn on<F>(mut self, callback: CallbackId, f: F) -> Self
    where
        F: FnMut(&mut ScriptApi<'_>, &CallbackArgs) -> Result<(), ScriptError> + Send + 'static,
    {
        self.callbacks.insert(callback, Box::new(f));
        self
    }
}

impl ScriptEngine for ScriptedEngine {
    fn load(&mut self, api: &mut ScriptApi<'_>, source: &str) -> Result<(), ScriptError> {
        self.recorder.push(Recorded::Loaded(source.to_string()));
        match self.on_load.as_mut() {
            Some(f) => f(api, source),
            None => Ok(()),
        }
    }

    fn invoke(
        &mut self,
        api: &mut ScriptApi<'_>,
        callback: CallbackId,
        args: CallbackArgs,
    ) -> Result<(), ScriptError> {
        self.recorder.push(Recorded::Invoked {
            callback,
            args: args.clone(),
        });
        match self.callbacks.get_mut(&callback) {
            Some(f) => f(api, &args),
            None => Ok(()),
        }
    }

    fn release(&mut self, callback: CallbackId) {
        self.recorder.push(Recorded::Released(callback));
    }
}

/// Lifecycle service that records every request
#[derive(Debug, Clone, Default)]
pub struct RecordingLifecycle {
    recorder: Recorder,
}

impl RecordingLifecycle {
    pub fn new(recorder: Recorder) -> Self {
        Self { recorder }
    }
}

impl ObjectLifecycle for RecordingLifecycle {
    fn connect(&mut self, request: ConnectRequest) {
        self.recorder.push(Recorded::Connect(request));
    }

    fn disconnect(&mut self, identity: Identity) {
        self.recorder.push(Recorded::Disconnect(identity));
    }

    fn destroy_entity(&mut self, entity: EntityId) {
        self.recorder.push(Recorded::Destroy(entity));
    }

    fn create_entity(&mut self, info: EntityCreateInfo) {
        self.recorder.push(Recorded::CreateEntity(info));
    }

    fn request_update(&mut self, identity: Identity, update: PresenceUpdate) {
        self.recorder.push(Recorded::Update(identity, update));
    }
}

/// Transport that records every message and always accepts
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    recorder: Recorder,
}

impl RecordingTransport {
    pub fn new(recorder: Recorder) -> Self {
        Self { recorder }
    }
}

impl Transport for RecordingTransport {
    fn send(&mut self, from: &Endpoint, to: &Endpoint, payload: Vec<u8>) -> Result<(), RoutingError> {
        self.recorder.push(Recorded::Sent {
            from: *from,
            to: *to,
            payload,
        });
        Ok(())
    }
}

/// Recording lifecycle and transport plus the given restore store
pub fn recording_collaborators(recorder: &Recorder, store: InMemoryRestoreStore) -> Collaborators {
    Collaborators {
        lifecycle: Box::new(RecordingLifecycle::new(recorder.clone())),
        transport: Box::new(RecordingTransport::new(recorder.clone())),
        restore: Box::new(store),
    }
}
