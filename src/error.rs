//! Error types for session operations
//!
//! Failures during steady-state operation come back to the caller as values
//! of [`SessionError`] and are never fatal to the actor. Only a failure of
//! the very first connect or of handler initialization aborts startup.

use crate::transport::TransportError;
use thiserror::Error;

/// Errors surfaced by the public session API.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Operation attempted with no live transport. Returned synchronously;
    /// nothing is queued for later delivery.
    #[error("not connected")]
    Disconnected,

    /// Subscribe attempted on an already-subscribed topic filter.
    #[error("already subscribed to {topic}")]
    Duplicate { topic: String },

    /// Opaque engine failure, forwarded verbatim.
    #[error("engine error")]
    Engine(#[source] TransportError),

    /// The initial connect or handler initialization failed. Fatal: the
    /// session never starts and the caller's supervisor decides what next.
    #[error("session startup failed")]
    Startup(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The session actor is no longer running.
    #[error("session closed")]
    Closed,

    /// A named session with this name is already registered.
    #[error("session name '{name}' already registered")]
    AlreadyRegistered { name: String },
}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        SessionError::Engine(e)
    }
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
