//! Orrery host - a per-entity scripting host
//!
//! A host owns one script bound to one simulated entity. It tracks the
//! entity's presences in one or more spaces, routes inbound messages to the
//! handlers the script registered, fires the script's timers, and carries
//! out the script's requests to reset itself or kill the entity.
//!
//! # Architecture
//!
//! ```text
//!  lifecycle service        transport            proximity oracle
//!   connect/disconnect       inbound bytes        visible/gone
//!          │                     │                     │
//!          ▼                     ▼                     ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       ScriptHost<E>                         │
//! │                                                             │
//! │  PresenceRegistry   MessageRouter   VisibilityBridge        │
//! │  (identity → rec)   (endpoints)     ((observed, observer))  │
//! │                                                             │
//! │  EventHandlerTable  TimerService    ContextTree             │
//! │  (ordered, queued)  (deadlines)     (root + sandboxes)      │
//! │                                                             │
//! │            ScriptApi<'_> (one context, one call)            │
//! └──────────────────────────────┬──────────────────────────────┘
//!                                ▼
//!                        E: ScriptEngine
//! ```
//!
//! # Turns
//!
//! Every entry point (`on_connected`, `dispatch`, `advance_clock`, ...) is
//! one turn. Callbacks may register and remove handlers at any time; during
//! a dispatch pass those mutations are queued and applied when the pass
//! ends, adds before deletes. A reset or kill requested by the script takes
//! effect only after the queues are flushed, reset first.
//!
//! # Example
//!
//! ```rust
//! use orrery_host::testing::{recording_collaborators, Recorder, ScriptedEngine};
//! use orrery_host::{CallbackId, HandlerFilter, HostConfig, InMemoryRestoreStore, PatternBuilder, ScriptHost};
//! use orrery_types::{Endpoint, EntityId, Identity, PresenceToken, ServiceTag};
//!
//! let recorder = Recorder::new();
//! let engine = ScriptedEngine::new(recorder.clone()).on_load(|api, _source| {
//!     api.register_handler(
//!         HandlerFilter::new(PatternBuilder::has_field("greeting")),
//!         CallbackId(1),
//!     )?;
//!     Ok(())
//! });
//! let collaborators = recording_collaborators(&recorder, InMemoryRestoreStore::new());
//! let mut host = ScriptHost::new(EntityId::new(), HostConfig::default(), engine, collaborators)?;
//! host.start()?;
//!
//! let me = Identity::random();
//! host.on_connected(me, PresenceToken::FIRST)?;
//!
//! let peer = Endpoint::new(Identity::random(), ServiceTag::MESSAGING);
//! let mine = Endpoint::new(me, ServiceTag::MESSAGING);
//! let invoked = host.handle_inbound(peer, mine, br#"{"body":{"greeting":"hi"}}"#)?;
//! assert_eq!(invoked, 1);
//! # Ok::<(), orrery_host::HostError>(())
//! ```

// Modules
pub mod api;
pub mod config;
pub mod context;
pub mod driver;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod host;
pub mod lifecycle;
pub mod pattern;
pub mod presence;
pub mod restore;
pub mod router;
pub mod telemetry;
pub mod testing;
pub mod timer;
pub mod types;
pub mod visibility;

// Re-exports for convenience
pub use api::{PresenceRequest, ScriptApi};
pub use config::{ConfigError, HostConfig};
pub use context::{ContextTree, ScriptContext};
pub use driver::{HostDriver, HostEvent, SharedHost};
pub use engine::{CallbackArgs, ScriptEngine};
pub use envelope::Envelope;
pub use error::{HostError, Result, RoutingError, ScriptError};
pub use handler::{EventHandler, EventHandlerTable, HandlerFilter, HandlerState};
pub use host::{Collaborators, ScriptHost};
pub use lifecycle::{ConnectRequest, EntityCreateInfo, ObjectLifecycle, PresenceUpdate};
pub use pattern::{Pattern, PatternBuilder};
pub use presence::{ConnectionState, Presence, PresenceRegistry, PresenceSnapshot, TokenIssuer};
pub use restore::{InMemoryRestoreStore, RestoreRecord, RestoreStore};
pub use router::{MessageRouter, Transport};
pub use timer::{TimerKind, TimerService};
pub use types::{CallbackId, ContextId, HandlerId, TimerId};
pub use visibility::{VisibilityBridge, VisibleHandle, VisibleParams};
