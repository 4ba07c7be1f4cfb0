#![allow(dead_code)]

use orrery_host::testing::{recording_collaborators, Recorder, ScriptedEngine};
use orrery_host::{
    CallbackArgs, Envelope, HostConfig, HostError, InMemoryRestoreStore, ScriptError, ScriptHost,
};
use orrery_types::{Endpoint, EntityId, Identity, ServiceTag};
use serde_json::Value;

pub fn build_host(
    entity: EntityId,
    config: HostConfig,
    engine: ScriptedEngine,
    recorder: &Recorder,
    store: InMemoryRestoreStore,
) -> ScriptHost<ScriptedEngine> {
    ScriptHost::new(
        entity,
        config,
        engine,
        recording_collaborators(recorder, store),
    )
    .expect("config is valid")
}

/// A started host with a fresh entity id and an empty restore store
pub fn started_host(engine: ScriptedEngine, recorder: &Recorder) -> ScriptHost<ScriptedEngine> {
    let mut host = build_host(
        EntityId::new(),
        HostConfig::default(),
        engine,
        recorder,
        InMemoryRestoreStore::new(),
    );
    host.start().expect("host starts");
    host
}

pub fn messaging(identity: Identity) -> Endpoint {
    Endpoint::new(identity, ServiceTag::MESSAGING)
}

pub fn envelope(body: Value) -> Vec<u8> {
    Envelope::from_value(body)
        .and_then(|envelope| envelope.encode())
        .expect("object body encodes")
}

pub fn message_args(args: &CallbackArgs) -> (&Value, &orrery_host::VisibleHandle, &str) {
    match args {
        CallbackArgs::Message {
            body,
            sender,
            receiver,
        } => (body, sender, receiver.as_str()),
        other => panic!("expected message arguments, got {other:?}"),
    }
}

/// Surface a host error to the engine the way a script runtime would
pub fn raised(err: HostError) -> ScriptError {
    ScriptError::Raised(err.to_string())
}
