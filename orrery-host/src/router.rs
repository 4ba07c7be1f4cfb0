//! Per-presence endpoints and outbound message routing

use crate::error::RoutingError;
use orrery_types::{Endpoint, Identity, ServiceTag};
use std::collections::BTreeSet;
use tracing::debug;

/// Outbound half of the network; delivery is at most once
pub trait Transport: Send {
    fn send(&mut self, from: &Endpoint, to: &Endpoint, payload: Vec<u8>) -> Result<(), RoutingError>;
}

/// Tracks which (identity, service) endpoints this entity has bound
pub struct MessageRouter {
    bound: BTreeSet<Endpoint>,
    transport: Box<dyn Transport>,
}

impl MessageRouter {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            bound: BTreeSet::new(),
            transport,
        }
    }

    /// Bind `service` for `identity`. Binding twice returns the same endpoint.
    pub fn bind(&mut self, identity: Identity, service: ServiceTag) -> Endpoint {
        let endpoint = Endpoint::new(identity, service);
        if self.bound.insert(endpoint) {
            debug!(endpoint = %endpoint, "bound endpoint");
        }
        endpoint
    }

    /// Drop every endpoint bound for `identity`.
    pub fn unbind(&mut self, identity: &Identity) -> usize {
        let before = self.bound.len();
        self.bound.retain(|endpoint| endpoint.identity != *identity);
        let removed = before - self.bound.len();
        if removed > 0 {
            debug!(identity = %identity, removed, "unbound endpoints");
        }
        removed
    }

    pub fn is_bound(&self, endpoint: &Endpoint) -> bool {
        self.bound.contains(endpoint)
    }

    pub fn endpoint_for(&self, identity: Identity, service: ServiceTag) -> Option<Endpoint> {
        let endpoint = Endpoint::new(identity, service);
        self.is_bound(&endpoint).then_some(endpoint)
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.bound.iter()
    }

    /// Send from a bound endpoint. Failures are returned, never retried.
    pub fn send(
        &mut self,
        from: &Endpoint,
        to: Identity,
        service: ServiceTag,
        payload: Vec<u8>,
    ) -> Result<(), RoutingError> {
        if !self.is_bound(from) {
            return Err(RoutingError::Unbound {
                identity: from.identity,
                service: from.service,
            });
        }
        let destination = Endpoint::new(to, service);
        self.transport.send(from, &destination, payload)
    }

    /// Check that an inbound message is addressed to one of our endpoints.
    pub fn accept_inbound(&self, source: &Endpoint, destination: &Endpoint) -> Result<(), RoutingError> {
        if !self.is_bound(destination) {
            return Err(RoutingError::Unbound {
                identity: destination.identity,
                service: destination.service,
            });
        }
        debug!(source = %source, destination = %destination, "accepted inbound message");
        Ok(())
    }

    pub fn clear(&mut self) {
        self.bound.clear();
    }
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRouter")
            .field("bound", &self.bound)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default, Clone)]
    struct Captured(Arc<Mutex<Vec<(Endpoint, Endpoint, Vec<u8>)>>>);

    impl Transport for Captured {
        fn send(&mut self, from: &Endpoint, to: &Endpoint, payload: Vec<u8>) -> Result<(), RoutingError> {
            self.0.lock().push((*from, *to, payload));
            Ok(())
        }
    }

    #[test]
    fn test_send_from_bound_endpoint() {
        let captured = Captured::default();
        let mut router = MessageRouter::new(Box::new(captured.clone()));
        let (me, peer) = (Identity::random(), Identity::random());
        let from = router.bind(me, ServiceTag::MESSAGING);

        router
            .send(&from, peer, ServiceTag::MESSAGING, b"hi".to_vec())
            .unwrap();

        let sent = captured.0.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, Endpoint::new(peer, ServiceTag::MESSAGING));
    }

    #[test]
    fn test_send_from_unbound_endpoint_fails() {
        let captured = Captured::default();
        let mut router = MessageRouter::new(Box::new(captured.clone()));
        let from = Endpoint::new(Identity::random(), ServiceTag::MESSAGING);

        let err = router
            .send(&from, Identity::random(), ServiceTag::MESSAGING, Vec::new())
            .unwrap_err();
        assert!(matches!(err, RoutingError::Unbound { .. }));
        assert!(captured.0.lock().is_empty());
    }

    #[test]
    fn test_unbind_removes_all_services() {
        let mut router = MessageRouter::new(Box::new(Captured::default()));
        let me = Identity::random();
        router.bind(me, ServiceTag::MESSAGING);
        router.bind(me, ServiceTag::CREATE_ENTITY);
        router.bind(me, ServiceTag::MESSAGING);

        assert_eq!(router.unbind(&me), 2);
        assert!(router.endpoint_for(me, ServiceTag::MESSAGING).is_none());
    }

    #[test]
    fn test_inbound_requires_bound_destination() {
        let mut router = MessageRouter::new(Box::new(Captured::default()));
        let me = Identity::random();
        let source = Endpoint::new(Identity::random(), ServiceTag::MESSAGING);
        let destination = Endpoint::new(me, ServiceTag::MESSAGING);

        assert!(router.accept_inbound(&source, &destination).is_err());
        router.bind(me, ServiceTag::MESSAGING);
        assert!(router.accept_inbound(&source, &destination).is_ok());
    }
}
