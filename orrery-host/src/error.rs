//! Error types for the scripting host

use crate::config::ConfigError;
use crate::types::{CallbackId, ContextId};
use orrery_types::{Identity, PresenceToken, ServiceTag};
use thiserror::Error;

/// Top-level host error
///
/// None of these are fatal to the host: every failure is reported, the
/// offending operation becomes a no-op, and the turn completes.
#[derive(Debug, Error)]
pub enum HostError {
    /// A collaborator broke the connect/disconnect or removal protocol
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A non-root context asked for a root-only operation
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Message could not be routed or parsed
    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),

    /// The script engine reported a failure
    #[error("script error: {0}")]
    Script(#[from] ScriptError),

    /// No presence with this identity is tracked
    #[error("presence {0} not found")]
    PresenceNotFound(Identity),

    /// No pending presence carries this token
    #[error("no pending presence for {0}")]
    TokenNotFound(PresenceToken),

    /// Context not found
    #[error("context {0} not found")]
    ContextNotFound(ContextId),

    /// The entity was killed; the host accepts no further events
    #[error("entity has been killed")]
    EntityKilled,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl HostError {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        HostError::ProtocolViolation(message.into())
    }

    pub(crate) fn root_only(operation: &str, context: ContextId) -> Self {
        HostError::PermissionDenied(format!(
            "{operation} may only be called from the root context (called from {context})"
        ))
    }
}

/// Routing and envelope errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RoutingError {
    /// No endpoint bound for this identity and service
    #[error("no endpoint bound for {identity} on service {service}")]
    Unbound {
        identity: Identity,
        service: ServiceTag,
    },

    /// Payload is not a well-formed envelope
    #[error("malformed envelope: {0}")]
    Malformed(String),

    /// Transport refused the message
    #[error("transport rejected message: {0}")]
    Transport(String),
}

/// Errors surfaced by a script engine
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScriptError {
    /// Script source failed to load
    #[error("failed to load script: {0}")]
    Load(String),

    /// A callback raised an error
    #[error("callback raised: {0}")]
    Raised(String),

    /// The engine holds no callable for this id
    #[error("unknown callback {0}")]
    UnknownCallback(CallbackId),
}

/// Host errors reach the script as raised errors.
impl From<HostError> for ScriptError {
    fn from(err: HostError) -> Self {
        ScriptError::Raised(err.to_string())
    }
}

/// Result type using HostError
pub type Result<T> = std::result::Result<T, HostError>;
