use super::{EventHandler, HandlerFilter, HandlerInvoker, HandlerState, MatchedHandler};
use crate::types::{CallbackId, ContextId, HandlerId};
use orrery_types::Identity;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Ordered handler table with deferred mutation
///
/// While a pass is running (`dispatching`), `register` appends to the
/// add-queue and `request_remove` to the delete-queue. `flush` applies
/// adds before deletes, so a handler registered and removed within one
/// pass ends up removed.
#[derive(Debug, Default)]
pub struct EventHandlerTable {
    handlers: HashMap<HandlerId, EventHandler>,
    order: Vec<HandlerId>,
    add_queue: Vec<HandlerId>,
    delete_queue: Vec<HandlerId>,
    dispatching: bool,
    released: Vec<CallbackId>,
}

impl EventHandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, filter: HandlerFilter, callback: CallbackId, context: ContextId) -> HandlerId {
        let handler = EventHandler::new(filter, callback, context);
        let id = handler.id();
        debug!(
            handler = %id,
            context = %context,
            fields = ?handler.filter().pattern.required_fields(),
            queued = self.dispatching,
            "registering handler"
        );
        self.handlers.insert(id, handler);
        if self.dispatching {
            self.add_queue.push(id);
        } else {
            self.order.push(id);
        }
        id
    }

    /// Request removal of a handler.
    ///
    /// Returns `false` when the request is a no-op: the handler was already
    /// cleared (or never existed), or its removal is already queued.
    pub fn request_remove(&mut self, id: HandlerId) -> bool {
        let dispatching = self.dispatching;
        let Some(handler) = self.handlers.get_mut(&id) else {
            warn!(handler = %id, "removal of a cleared or unknown handler ignored");
            return false;
        };

        if !dispatching {
            self.remove_now(id);
            return true;
        }

        if !handler.mark_pending_removal() {
            debug!(handler = %id, "removal already queued");
            return false;
        }
        debug_assert!(!self.delete_queue.contains(&id));
        self.delete_queue.push(id);
        true
    }

    /// Request removal of every handler owned by `context`.
    pub fn remove_for_context(&mut self, context: ContextId) -> usize {
        let owned: Vec<HandlerId> = self
            .handlers
            .values()
            .filter(|h| h.context() == context && h.is_active())
            .map(|h| h.id())
            .collect();
        owned.into_iter().filter(|id| self.request_remove(*id)).count()
    }

    /// Detach, mark cleared, release the callback.
    fn remove_now(&mut self, id: HandlerId) {
        self.order.retain(|candidate| *candidate != id);
        self.add_queue.retain(|candidate| *candidate != id);
        if let Some(mut handler) = self.handlers.remove(&id) {
            if let Some(callback) = handler.clear() {
                self.released.push(callback);
            }
            debug!(handler = %id, "handler cleared");
        }
    }

    /// Run one dispatch pass over the table.
    ///
    /// Active handlers whose filter matches are handed to the invoker in
    /// registration order. Handlers added during the pass are not seen;
    /// handlers whose removal is requested during the pass are skipped from
    /// then on. Returns the number of handlers invoked.
    pub fn match_and_invoke<I: HandlerInvoker>(
        invoker: &mut I,
        sender: &Identity,
        receiver: &Identity,
        body: &Value,
    ) -> usize {
        invoker.table().begin_pass();
        let mut cursor = 0;
        let mut invoked = 0;
        while !invoker.should_stop() {
            let Some(matched) = invoker.table().next_match(&mut cursor, sender, receiver, body) else {
                break;
            };
            invoker.invoke(matched);
            invoked += 1;
        }
        invoker.table().end_pass();
        invoked
    }

    fn next_match(
        &self,
        cursor: &mut usize,
        sender: &Identity,
        receiver: &Identity,
        body: &Value,
    ) -> Option<MatchedHandler> {
        while *cursor < self.order.len() {
            let id = self.order[*cursor];
            *cursor += 1;
            let Some(handler) = self.handlers.get(&id) else {
                continue;
            };
            if !handler.is_active() || !handler.filter().matches(sender, receiver, body) {
                continue;
            }
            if let Some(callback) = handler.callback {
                return Some(MatchedHandler {
                    id,
                    callback,
                    context: handler.context(),
                });
            }
        }
        None
    }

    pub fn begin_pass(&mut self) {
        debug_assert!(!self.dispatching, "nested dispatch pass");
        self.dispatching = true;
    }

    pub fn end_pass(&mut self) {
        self.dispatching = false;
    }

    pub fn is_dispatching(&self) -> bool {
        self.dispatching
    }

    /// Apply queued adds, then queued deletes.
    pub fn flush(&mut self) {
        debug_assert!(!self.dispatching, "flush during a dispatch pass");
        for id in std::mem::take(&mut self.add_queue) {
            if self.handlers.contains_key(&id) {
                self.order.push(id);
            }
        }
        for id in std::mem::take(&mut self.delete_queue) {
            if self
                .handlers
                .get(&id)
                .is_some_and(|h| h.state() == HandlerState::PendingRemoval)
            {
                self.remove_now(id);
            }
        }
    }

    /// Clear every handler and both queues.
    pub fn clear(&mut self) {
        debug_assert!(!self.dispatching, "clear during a dispatch pass");
        self.add_queue.clear();
        self.delete_queue.clear();
        self.order.clear();
        for (_, mut handler) in self.handlers.drain() {
            if let Some(callback) = handler.clear() {
                self.released.push(callback);
            }
        }
    }

    /// Callbacks released since the last call, for the engine to drop.
    pub fn take_released(&mut self) -> Vec<CallbackId> {
        std::mem::take(&mut self.released)
    }

    pub fn state(&self, id: HandlerId) -> HandlerState {
        self.handlers
            .get(&id)
            .map(|h| h.state())
            .unwrap_or(HandlerState::Cleared)
    }

    pub fn get(&self, id: HandlerId) -> Option<&EventHandler> {
        self.handlers.get(&id)
    }

    /// Live handlers in registration order
    pub fn handlers(&self) -> impl Iterator<Item = &EventHandler> {
        self.order.iter().filter_map(|id| self.handlers.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn queued_adds(&self) -> usize {
        self.add_queue.len()
    }

    pub fn queued_deletes(&self) -> usize {
        self.delete_queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::PatternBuilder;
    use serde_json::json;

    /// Invoker that records callbacks and runs a per-callback action
    struct Recorder {
        table: EventHandlerTable,
        invoked: Vec<CallbackId>,
        stop_after: Option<usize>,
        on_invoke: fn(&mut EventHandlerTable, MatchedHandler),
    }

    impl Recorder {
        fn new(table: EventHandlerTable) -> Self {
            Self {
                table,
                invoked: Vec::new(),
                stop_after: None,
                on_invoke: |_, _| {},
            }
        }
    }

    impl HandlerInvoker for Recorder {
        fn table(&mut self) -> &mut EventHandlerTable {
            &mut self.table
        }

        fn should_stop(&self) -> bool {
            self.stop_after.is_some_and(|n| self.invoked.len() >= n)
        }

        fn invoke(&mut self, handler: MatchedHandler) {
            self.invoked.push(handler.callback);
            (self.on_invoke)(&mut self.table, handler);
        }
    }

    fn pass(recorder: &mut Recorder) -> usize {
        let (a, b) = (Identity::random(), Identity::random());
        EventHandlerTable::match_and_invoke(recorder, &a, &b, &json!({"kind": "ping"}))
    }

    #[test]
    fn invokes_matching_handlers_in_order() {
        let mut table = EventHandlerTable::new();
        table.register(HandlerFilter::any(), CallbackId(1), ContextId::ROOT);
        table.register(
            HandlerFilter::new(PatternBuilder::has_field("other")),
            CallbackId(2),
            ContextId::ROOT,
        );
        table.register(HandlerFilter::any(), CallbackId(3), ContextId::ROOT);

        let mut recorder = Recorder::new(table);
        assert_eq!(pass(&mut recorder), 2);
        assert_eq!(recorder.invoked, vec![CallbackId(1), CallbackId(3)]);
        assert!(!recorder.table.is_dispatching());
    }

    #[test]
    fn registration_during_pass_is_queued() {
        let mut table = EventHandlerTable::new();
        table.register(HandlerFilter::any(), CallbackId(1), ContextId::ROOT);

        let mut recorder = Recorder::new(table);
        recorder.on_invoke = |table, _| {
            table.register(HandlerFilter::any(), CallbackId(9), ContextId::ROOT);
        };
        pass(&mut recorder);

        assert_eq!(recorder.invoked, vec![CallbackId(1)]);
        assert_eq!(recorder.table.queued_adds(), 1);
        assert_eq!(recorder.table.len(), 1);

        recorder.table.flush();
        assert_eq!(recorder.table.len(), 2);
        assert_eq!(recorder.table.queued_adds(), 0);
    }

    #[test]
    fn removal_during_pass_skips_later_handler() {
        let mut table = EventHandlerTable::new();
        table.register(HandlerFilter::any(), CallbackId(1), ContextId::ROOT);
        table.register(HandlerFilter::any(), CallbackId(2), ContextId::ROOT);

        let mut recorder = Recorder::new(table);
        recorder.on_invoke = |table, handler| {
            let victims: Vec<HandlerId> = table
                .handlers()
                .filter(|h| h.id() != handler.id)
                .map(|h| h.id())
                .collect();
            for victim in victims {
                table.request_remove(victim);
            }
        };
        pass(&mut recorder);

        assert_eq!(recorder.invoked, vec![CallbackId(1)]);
        assert_eq!(recorder.table.queued_deletes(), 1);
        assert!(recorder.table.take_released().is_empty());

        recorder.table.flush();
        assert_eq!(recorder.table.len(), 1);
        assert_eq!(recorder.table.take_released(), vec![CallbackId(2)]);
    }

    #[test]
    fn add_then_delete_in_one_pass_leaves_handler_removed() {
        let mut table = EventHandlerTable::new();
        table.register(HandlerFilter::any(), CallbackId(1), ContextId::ROOT);

        let mut recorder = Recorder::new(table);
        recorder.on_invoke = |table, _| {
            let added = table.register(HandlerFilter::any(), CallbackId(5), ContextId::ROOT);
            assert!(table.request_remove(added));
        };
        pass(&mut recorder);
        recorder.table.flush();

        assert_eq!(recorder.table.len(), 1);
        assert_eq!(recorder.table.take_released(), vec![CallbackId(5)]);
    }

    #[test]
    fn duplicate_removal_releases_once() {
        let mut table = EventHandlerTable::new();
        let id = table.register(HandlerFilter::any(), CallbackId(4), ContextId::ROOT);

        table.begin_pass();
        assert!(table.request_remove(id));
        assert!(!table.request_remove(id));
        assert_eq!(table.state(id), HandlerState::PendingRemoval);
        table.end_pass();
        table.flush();

        assert!(!table.request_remove(id));
        assert_eq!(table.state(id), HandlerState::Cleared);
        assert_eq!(table.take_released(), vec![CallbackId(4)]);
        assert!(table.take_released().is_empty());
    }

    #[test]
    fn removal_outside_pass_is_immediate() {
        let mut table = EventHandlerTable::new();
        let id = table.register(HandlerFilter::any(), CallbackId(2), ContextId::ROOT);
        assert!(table.request_remove(id));
        assert!(table.is_empty());
        assert_eq!(table.take_released(), vec![CallbackId(2)]);
    }

    #[test]
    fn should_stop_ends_pass_early() {
        let mut table = EventHandlerTable::new();
        for n in 0..4 {
            table.register(HandlerFilter::any(), CallbackId(n), ContextId::ROOT);
        }
        let mut recorder = Recorder::new(table);
        recorder.stop_after = Some(2);
        assert_eq!(pass(&mut recorder), 2);
        assert!(!recorder.table.is_dispatching());
    }

    #[test]
    fn remove_for_context_only_touches_that_context() {
        let mut table = EventHandlerTable::new();
        table.register(HandlerFilter::any(), CallbackId(1), ContextId(1));
        table.register(HandlerFilter::any(), CallbackId(2), ContextId(2));
        table.register(HandlerFilter::any(), CallbackId(3), ContextId(1));

        assert_eq!(table.remove_for_context(ContextId(1)), 2);
        assert_eq!(table.len(), 1);
        let mut released = table.take_released();
        released.sort();
        assert_eq!(released, vec![CallbackId(1), CallbackId(3)]);
    }

    #[test]
    fn clear_releases_queued_adds() {
        let mut table = EventHandlerTable::new();
        table.register(HandlerFilter::any(), CallbackId(1), ContextId::ROOT);
        table.begin_pass();
        table.register(HandlerFilter::any(), CallbackId(2), ContextId::ROOT);
        table.end_pass();

        table.clear();
        let mut released = table.take_released();
        released.sort();
        assert_eq!(released, vec![CallbackId(1), CallbackId(2)]);
        assert_eq!(table.queued_adds(), 0);
        assert!(table.is_empty());
    }
}
