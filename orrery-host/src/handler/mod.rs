//! Message handlers registered by scripts
//!
//! A handler pairs a [`HandlerFilter`] with a callback. Handlers are
//! evaluated in registration order; mutations requested while a dispatch
//! pass is running are queued and applied when the pass ends.

mod table;

pub use table::EventHandlerTable;

use crate::pattern::Pattern;
use crate::types::{CallbackId, ContextId, HandlerId};
use orrery_types::Identity;
use serde_json::Value;

/// Lifecycle of a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    /// In the table and eligible for matching
    Active,
    /// Removal requested during a pass; applied at flush
    PendingRemoval,
    /// Detached and callback released
    Cleared,
}

/// Predicate over (sender, receiver, body)
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerFilter {
    pub pattern: Pattern,
    pub sender: Option<Identity>,
    pub receiver: Option<Identity>,
}

impl HandlerFilter {
    pub fn new(pattern: Pattern) -> Self {
        Self {
            pattern,
            sender: None,
            receiver: None,
        }
    }

    /// Matches every message
    pub fn any() -> Self {
        Self::new(Pattern::Wildcard)
    }

    pub fn from_sender(mut self, sender: Identity) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn to_receiver(mut self, receiver: Identity) -> Self {
        self.receiver = Some(receiver);
        self
    }

    pub fn matches(&self, sender: &Identity, receiver: &Identity, body: &Value) -> bool {
        self.sender.as_ref().map_or(true, |s| s == sender)
            && self.receiver.as_ref().map_or(true, |r| r == receiver)
            && self.pattern.matches(body)
    }
}

#[derive(Debug)]
pub struct EventHandler {
    id: HandlerId,
    filter: HandlerFilter,
    callback: Option<CallbackId>,
    context: ContextId,
    state: HandlerState,
}

impl EventHandler {
    pub fn new(filter: HandlerFilter, callback: CallbackId, context: ContextId) -> Self {
        Self {
            id: HandlerId::new(),
            filter,
            callback: Some(callback),
            context,
            state: HandlerState::Active,
        }
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn filter(&self) -> &HandlerFilter {
        &self.filter
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn state(&self) -> HandlerState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == HandlerState::Active
    }

    /// Active -> PendingRemoval; false from any other state.
    fn mark_pending_removal(&mut self) -> bool {
        if self.state != HandlerState::Active {
            return false;
        }
        self.state = HandlerState::PendingRemoval;
        true
    }

    /// Mark cleared and hand back the callback. Yields the callback at
    /// most once over the handler's lifetime.
    fn clear(&mut self) -> Option<CallbackId> {
        self.state = HandlerState::Cleared;
        self.callback.take()
    }
}

/// A handler selected during a dispatch pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchedHandler {
    pub id: HandlerId,
    pub callback: CallbackId,
    pub context: ContextId,
}

/// Drives [`EventHandlerTable::match_and_invoke`]
///
/// The invoker owns the table, so callbacks it runs may register and
/// remove handlers while the pass is in progress.
pub trait HandlerInvoker {
    fn table(&mut self) -> &mut EventHandlerTable;

    /// Checked before every match; `true` ends the pass early
    fn should_stop(&self) -> bool;

    fn invoke(&mut self, handler: MatchedHandler);
}
