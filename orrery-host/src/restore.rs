//! Persisted auto-restore records

use crate::presence::PresenceSnapshot;
use orrery_types::EntityId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// What an entity needs to come back after a restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreRecord {
    pub script: String,
    #[serde(default)]
    pub presences: Vec<PresenceSnapshot>,
}

impl RestoreRecord {
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// Storage for restore records, one opaque blob per entity
pub trait RestoreStore: Send {
    fn load(&mut self, entity: EntityId) -> Option<Vec<u8>>;

    fn save(&mut self, entity: EntityId, blob: Vec<u8>);

    fn clear(&mut self, entity: EntityId);
}

/// Process-local store; clones share the same map
#[derive(Debug, Clone, Default)]
pub struct InMemoryRestoreStore {
    blobs: Arc<Mutex<HashMap<EntityId, Vec<u8>>>>,
}

impl InMemoryRestoreStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entity: EntityId) -> Option<RestoreRecord> {
        let blobs = self.blobs.lock();
        blobs
            .get(&entity)
            .and_then(|bytes| RestoreRecord::from_bytes(bytes).ok())
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.blobs.lock().contains_key(&entity)
    }
}

impl RestoreStore for InMemoryRestoreStore {
    fn load(&mut self, entity: EntityId) -> Option<Vec<u8>> {
        self.blobs.lock().get(&entity).cloned()
    }

    fn save(&mut self, entity: EntityId, blob: Vec<u8>) {
        self.blobs.lock().insert(entity, blob);
    }

    fn clear(&mut self, entity: EntityId) {
        self.blobs.lock().remove(&entity);
    }
}
