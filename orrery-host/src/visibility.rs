//! Handles to objects other presences can see
//!
//! A [`VisibleHandle`] stands for "`observed` as seen by `observer`". The
//! bridge creates at most one handle per pair; every lookup for that pair
//! returns the same shared handle.

use crate::error::{HostError, Result};
use orrery_types::{BoundingSphere, Identity, Location};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Kinematic and appearance data reported with a proximity event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisibleParams {
    pub visible: bool,
    pub location: Option<Location>,
    pub bounds: Option<BoundingSphere>,
    pub mesh: Option<String>,
    pub physics: Option<String>,
}

impl VisibleParams {
    /// Known to exist (it sent us a message) but not yet reported visible
    pub fn unconfirmed() -> Self {
        Self::default()
    }

    pub fn visible() -> Self {
        Self {
            visible: true,
            ..Self::default()
        }
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_bounds(mut self, bounds: BoundingSphere) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn with_mesh(mut self, mesh: impl Into<String>) -> Self {
        self.mesh = Some(mesh.into());
        self
    }
}

#[derive(Debug)]
struct VisibleState {
    observed: Identity,
    observer: Identity,
    still_visible: bool,
    location: Location,
    bounds: BoundingSphere,
    mesh: String,
    physics: String,
}

/// Shared view of one (observed, observer) pair
#[derive(Debug, Clone)]
pub struct VisibleHandle(Arc<RwLock<VisibleState>>);

impl VisibleHandle {
    fn new(observed: Identity, observer: Identity) -> Self {
        Self(Arc::new(RwLock::new(VisibleState {
            observed,
            observer,
            still_visible: false,
            location: Location::default(),
            bounds: BoundingSphere::default(),
            mesh: String::new(),
            physics: String::new(),
        })))
    }

    pub fn observed(&self) -> Identity {
        self.0.read().observed
    }

    pub fn observer(&self) -> Identity {
        self.0.read().observer
    }

    pub fn is_visible(&self) -> bool {
        self.0.read().still_visible
    }

    pub fn location(&self) -> Location {
        self.0.read().location
    }

    pub fn bounds(&self) -> BoundingSphere {
        self.0.read().bounds
    }

    pub fn mesh(&self) -> String {
        self.0.read().mesh.clone()
    }

    pub fn physics(&self) -> String {
        self.0.read().physics.clone()
    }

    /// Both handles refer to the same underlying record
    pub fn same_as(&self, other: &VisibleHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn apply(&self, params: &VisibleParams) {
        let mut state = self.0.write();
        if params.visible {
            state.still_visible = true;
        }
        if let Some(location) = params.location {
            state.location = location;
        }
        if let Some(bounds) = params.bounds {
            state.bounds = bounds;
        }
        if let Some(mesh) = &params.mesh {
            state.mesh = mesh.clone();
        }
        if let Some(physics) = &params.physics {
            state.physics = physics.clone();
        }
    }

    fn set_gone(&self) {
        self.0.write().still_visible = false;
    }
}

/// Deduplicating map from (observed, observer) to [`VisibleHandle`]
#[derive(Debug, Default)]
pub struct VisibilityBridge {
    handles: BTreeMap<(Identity, Identity), VisibleHandle>,
}

impl VisibilityBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// The handle for the pair, created on first use.
    ///
    /// `params` are applied either way; an unconfirmed request never
    /// downgrades a handle that is already visible.
    pub fn get_or_create(
        &mut self,
        observed: Identity,
        observer: Identity,
        params: &VisibleParams,
    ) -> VisibleHandle {
        let handle = self
            .handles
            .entry((observed, observer))
            .or_insert_with(|| VisibleHandle::new(observed, observer))
            .clone();
        handle.apply(params);
        handle
    }

    /// Any handle for `observed`, preferring one that is currently visible.
    pub fn lookup(&self, observed: &Identity) -> Option<VisibleHandle> {
        let mut fallback = None;
        for ((candidate, _), handle) in &self.handles {
            if candidate != observed {
                continue;
            }
            if handle.is_visible() {
                return Some(handle.clone());
            }
            fallback.get_or_insert_with(|| handle.clone());
        }
        fallback
    }

    pub fn get(&self, observed: &Identity, observer: &Identity) -> Option<VisibleHandle> {
        self.handles.get(&(*observed, *observer)).cloned()
    }

    /// Mark the pair no longer visible; the handle itself is kept.
    pub fn notify_gone(&mut self, observed: Identity, observer: Identity) -> Result<VisibleHandle> {
        let handle = self.handles.get(&(observed, observer)).ok_or_else(|| {
            HostError::protocol(format!(
                "proximity removal for {observed} seen by {observer}, which was never visible"
            ))
        })?;
        handle.set_gone();
        Ok(handle.clone())
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
