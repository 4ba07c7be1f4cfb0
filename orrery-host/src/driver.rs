//! Async driver: one task per entity
//!
//! ```text
//!   lifecycle service ──┐
//!   transport ──────────┼──► HostEvent channel ──► HostDriver::run
//!   proximity oracle ───┘                           │  tokio::select! over:
//!                                                   │  • next event
//!                                                   │  • sleep_until(next timer)
//!                                                   ▼
//!                                              ScriptHost (locked per turn)
//! ```
//!
//! The driver serializes every entry point for its host, so the host never
//! sees two turns at once even when other tasks hold a [`SharedHost`].

use crate::engine::ScriptEngine;
use crate::error::Result;
use crate::host::ScriptHost;
use crate::visibility::VisibleParams;
use orrery_types::{Endpoint, Identity, PresenceToken};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

/// A host shared between the driver and whoever else needs to inspect it
pub type SharedHost<E> = Arc<Mutex<ScriptHost<E>>>;

/// Everything that can happen to an entity from the outside
#[derive(Debug)]
pub enum HostEvent {
    Connected {
        identity: Identity,
        token: PresenceToken,
    },
    Disconnected {
        identity: Identity,
    },
    Inbound {
        source: Endpoint,
        destination: Endpoint,
        payload: Vec<u8>,
    },
    Visible {
        observed: Identity,
        observer: Identity,
        params: VisibleParams,
    },
    Gone {
        observed: Identity,
        observer: Identity,
    },
    Shutdown,
}

pub struct HostDriver<E: ScriptEngine> {
    host: SharedHost<E>,
    events: mpsc::UnboundedReceiver<HostEvent>,
    epoch: Instant,
    idle_tick: Duration,
}

impl<E: ScriptEngine> HostDriver<E> {
    /// Wrap a host; returns the driver and the sender for its events.
    /// Host time zero is the moment the driver is created.
    pub fn new(host: ScriptHost<E>) -> (Self, mpsc::UnboundedSender<HostEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let idle_tick = host.config().idle_tick();
        let driver = Self {
            host: Arc::new(Mutex::new(host)),
            events: rx,
            epoch: Instant::now(),
            idle_tick,
        };
        (driver, tx)
    }

    pub fn host(&self) -> SharedHost<E> {
        self.host.clone()
    }

    /// Start the host, then process events and timers until shutdown, the
    /// channel closing, or the entity being killed.
    pub async fn run(mut self) -> Result<()> {
        self.host.lock().start()?;

        loop {
            let (killed, next_deadline) = {
                let host = self.host.lock();
                (host.is_killed(), host.next_deadline())
            };
            if killed {
                info!("entity killed, driver stopping");
                break;
            }

            let wake = next_deadline
                .and_then(|deadline| self.epoch.checked_add(deadline))
                .unwrap_or_else(|| Instant::now() + self.idle_tick);

            tokio::select! {
                event = self.events.recv() => match event {
                    Some(HostEvent::Shutdown) | None => {
                        info!("driver shutting down");
                        break;
                    }
                    Some(event) => apply(&self.host, event),
                },
                _ = sleep_until(wake) => {
                    let now = self.epoch.elapsed();
                    if let Err(err) = self.host.lock().advance_clock(now) {
                        debug!(error = %err, "timer tick rejected");
                    }
                }
            }
        }
        Ok(())
    }
}

fn apply<E: ScriptEngine>(host: &SharedHost<E>, event: HostEvent) {
    let mut host = host.lock();
    let result = match event {
        HostEvent::Connected { identity, token } => host.on_connected(identity, token),
        HostEvent::Disconnected { identity } => host.on_disconnected(identity),
        HostEvent::Inbound {
            source,
            destination,
            payload,
        } => host.handle_inbound(source, destination, &payload).map(|_| ()),
        HostEvent::Visible {
            observed,
            observer,
            params,
        } => host.notify_visible(observed, observer, params).map(|_| ()),
        HostEvent::Gone { observed, observer } => host.notify_gone(observed, observer),
        HostEvent::Shutdown => Ok(()),
    };
    // The host has already logged anything worth reporting.
    if let Err(err) = result {
        debug!(error = %err, "event rejected");
    }
}
