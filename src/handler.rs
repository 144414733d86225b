//! Handler capability for inbound session events
//!
//! The embedding application supplies a [`SessionHandler`]; the session actor
//! invokes it and threads the opaque handler state through every call. The
//! actor never inspects the state and never fabricates it: the state the
//! handler returns is the state the next call receives.

use crate::transport::{DeliveryAck, InboundMessage, SubscribeOptions};

/// Events forwarded from the transport to the handler, in arrival order.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// An application message delivered on a subscribed topic.
    Message(InboundMessage),
    /// The broker acknowledged an earlier acknowledged-tier publish.
    Ack(DeliveryAck),
}

/// Why the session actor is shutting down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminateReason {
    /// Caller-initiated stop or all session handles dropped.
    Normal,
    /// A stop could not shut the connection down cleanly; the session
    /// terminates anyway and carries the engine's failure here.
    Error(String),
}

/// Result of [`SessionHandler::init`]: the initial handler state, optionally
/// with topics the session should subscribe to before going live.
#[derive(Debug)]
pub struct HandlerInit<S> {
    pub(crate) state: S,
    pub(crate) subscriptions: Vec<(String, SubscribeOptions)>,
}

impl<S> HandlerInit<S> {
    pub fn new(state: S) -> Self {
        Self {
            state,
            subscriptions: Vec::new(),
        }
    }

    /// Add startup subscriptions. Each is attempted best-effort; a per-topic
    /// failure is logged and does not abort session startup.
    pub fn with_subscriptions(
        mut self,
        subscriptions: impl IntoIterator<Item = (String, SubscribeOptions)>,
    ) -> Self {
        self.subscriptions.extend(subscriptions);
        self
    }
}

/// The pluggable callback set reacting to session lifecycle and inbound
/// events.
///
/// Implementations are invoked from within the session actor's serialized
/// execution: a call that blocks indefinitely stalls every other operation on
/// the session. Handlers never call back into the session synchronously.
#[async_trait::async_trait]
pub trait SessionHandler: Send + Sync + 'static {
    /// Opaque state owned by the handler, threaded through every call.
    type State: Send + 'static;

    /// Error aborting session startup.
    type InitError: std::error::Error + Send + Sync + 'static;

    /// Called once after the initial connect succeeds. A returned error is
    /// fatal to session startup.
    async fn init(&self, client_id: &str) -> Result<HandlerInit<Self::State>, Self::InitError>;

    /// Called for every inbound event, strictly in arrival order. There is no
    /// error channel back to the session: failures must be absorbed here.
    /// The returned state is adopted verbatim.
    async fn handle_event(&self, event: SessionEvent, state: Self::State) -> Self::State;

    /// Called exactly once per session lifetime, at shutdown of any cause.
    async fn on_terminate(&self, reason: TerminateReason, state: Self::State);
}
