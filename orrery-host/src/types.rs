//! Identifier types owned by the host
//!
//! Handler and timer ids are issued from process-wide counters so that an id
//! never names two different objects, even across a script reset.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque reference to a callable held by the script engine
///
/// The host never looks inside a callback; it only decides when to hand
/// one back to the engine and when the engine may release it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallbackId(pub u64);

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cb:{}", self.0)
    }
}

/// Event handler identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandlerId(pub u64);

static HANDLER_COUNTER: AtomicU64 = AtomicU64::new(1);

impl HandlerId {
    pub fn new() -> Self {
        Self(HANDLER_COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for HandlerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler:{}", self.0)
    }
}

/// Timer identifier, also the handle scripts use to cancel a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimerId(pub u64);

static TIMER_COUNTER: AtomicU64 = AtomicU64::new(1);

impl TimerId {
    pub fn new() -> Self {
        Self(TIMER_COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for TimerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer:{}", self.0)
    }
}

/// Script context identifier
///
/// Context 0 is the root context created with the host; children are
/// sandboxes the script spawns below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextId(pub u32);

impl ContextId {
    pub const ROOT: ContextId = ContextId(0);

    pub fn is_root(&self) -> bool {
        *self == Self::ROOT
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx:{}", self.0)
    }
}
