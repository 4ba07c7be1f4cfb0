//! The seam between the host and a script evaluator

use crate::api::ScriptApi;
use crate::error::ScriptError;
use crate::types::{CallbackId, TimerId};
use crate::visibility::VisibleHandle;
use orrery_types::{Identity, PresenceToken};
use serde_json::Value;

/// Arguments the host passes when invoking a callback
#[derive(Debug, Clone)]
pub enum CallbackArgs {
    /// A message matched a handler
    Message {
        body: Value,
        sender: VisibleHandle,
        /// Receiving presence, rendered as a string for the script
        receiver: String,
    },
    /// A presence connected (identity set) or disconnected
    Presence {
        token: PresenceToken,
        identity: Option<Identity>,
    },
    /// Something came into or went out of view of one of our presences
    Proximity {
        visible: VisibleHandle,
        observer: String,
    },
    Timer { timer: TimerId },
}

/// A script evaluator
///
/// The engine owns every callable; the host refers to them only by
/// [`CallbackId`]. Each call receives a [`ScriptApi`] scoped to the
/// context the callback belongs to.
pub trait ScriptEngine: Send {
    /// Evaluate script source in the root context.
    fn load(&mut self, api: &mut ScriptApi<'_>, source: &str) -> Result<(), ScriptError>;

    fn invoke(
        &mut self,
        api: &mut ScriptApi<'_>,
        callback: CallbackId,
        args: CallbackArgs,
    ) -> Result<(), ScriptError>;

    /// The host will never mention `callback` again.
    fn release(&mut self, callback: CallbackId);
}
