//! Public session surface
//!
//! A [`Session`] is a cloneable handle to one running session actor. All
//! operations are serialized through the actor's command channel; each call
//! blocks its caller until the actor has processed the request and replied.

use crate::config::SessionOptions;
use crate::error::{SessionError, SessionResult};
use crate::handler::{HandlerInit, SessionHandler};
use crate::registry::SubscriptionRegistry;
use crate::transport::{
    Connector, PublishOptions, SubscribeAck, SubscribeOptions, TransportHandle,
};
use bytes::Bytes;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

mod actor;

use actor::{Command, SessionActor};

/// Command channel depth. Callers beyond this block until the actor drains.
const COMMAND_BUFFER: usize = 32;

/// Process-wide registry of named sessions.
static NAMED_SESSIONS: Lazy<Mutex<HashMap<String, Session>>> = Lazy::new(Default::default);

fn named_sessions() -> MutexGuard<'static, HashMap<String, Session>> {
    NAMED_SESSIONS
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to a running session actor.
#[derive(Debug, Clone)]
pub struct Session {
    cmd_tx: mpsc::Sender<Command>,
    name: Option<Arc<str>>,
}

impl Session {
    /// Start a session: connect, initialize the handler, apply its startup
    /// subscriptions, then spawn the actor.
    ///
    /// A connect failure or a handler `init` failure on this first attempt is
    /// fatal and surfaces as [`SessionError::Startup`]; there is no retry
    /// loop at startup. Later disconnects are retried forever by the actor.
    pub async fn start<C, H>(
        client_id: impl Into<String>,
        handler: H,
        connector: C,
        options: SessionOptions,
    ) -> SessionResult<Session>
    where
        C: Connector,
        H: SessionHandler,
    {
        let client_id = client_id.into();
        options
            .validate()
            .map_err(|e| SessionError::Startup(Box::new(e)))?;

        info!(client_id = %client_id, broker = %options.broker_url, "starting session");

        let (transport, events) = connector
            .connect(&client_id, &options)
            .await
            .map_err(|e| SessionError::Startup(Box::new(e)))?;

        let init = match handler.init(&client_id).await {
            Ok(init) => init,
            Err(e) => {
                let _ = transport.disconnect().await;
                return Err(SessionError::Startup(Box::new(e)));
            }
        };
        let HandlerInit {
            state,
            subscriptions,
        } = init;

        // Startup subscriptions are best-effort: a per-topic failure is
        // logged and skipped, it does not abort the session.
        let mut registry = SubscriptionRegistry::new();
        for (topic, sub_options) in subscriptions {
            if registry.contains(&topic) {
                warn!(topic = %topic, "duplicate startup subscription ignored");
                continue;
            }
            match transport.subscribe(&topic, sub_options).await {
                Ok(_) => {
                    registry.insert(topic, sub_options);
                }
                Err(e) => {
                    error!(topic = %topic, error = %e, "startup subscription failed");
                }
            }
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let actor = SessionActor::new(
            client_id, options, connector, handler, transport, events, registry, state, cmd_rx,
        );
        tokio::spawn(actor.run());

        Ok(Session { cmd_tx, name: None })
    }

    /// Like [`Session::start`], additionally registering the handle under
    /// `name` so other parts of the process can [`Session::lookup`] it.
    ///
    /// Fails with [`SessionError::AlreadyRegistered`] if the name is taken.
    /// [`Session::stop`] removes the registration.
    pub async fn start_named<C, H>(
        name: impl Into<String>,
        client_id: impl Into<String>,
        handler: H,
        connector: C,
        options: SessionOptions,
    ) -> SessionResult<Session>
    where
        C: Connector,
        H: SessionHandler,
    {
        let name = name.into();
        if named_sessions().contains_key(&name) {
            return Err(SessionError::AlreadyRegistered { name });
        }

        let mut session = Self::start(client_id, handler, connector, options).await?;
        session.name = Some(Arc::from(name.as_str()));

        let mut registry = named_sessions();
        if registry.contains_key(&name) {
            // Lost the race to another starter; shut our copy down without
            // touching the winner's registration.
            drop(registry);
            session.name = None;
            let _ = session.stop().await;
            return Err(SessionError::AlreadyRegistered { name });
        }
        registry.insert(name, session.clone());
        drop(registry);

        Ok(session)
    }

    /// Look up a running named session.
    pub fn lookup(name: &str) -> Option<Session> {
        named_sessions().get(name).cloned()
    }

    /// Subscribe to a topic filter.
    ///
    /// Requires a live connection; a topic already in the registry is
    /// rejected with [`SessionError::Duplicate`] without touching the engine.
    pub async fn subscribe(
        &self,
        topic: impl Into<String>,
        options: SubscribeOptions,
    ) -> SessionResult<SubscribeAck> {
        let topic = topic.into();
        self.call(|reply| Command::Subscribe {
            topic,
            options,
            reply,
        })
        .await
    }

    /// Unsubscribe from a topic filter.
    ///
    /// The engine call is forwarded whether or not the connection is live and
    /// may itself fail; the topic is always removed from the registry, so the
    /// call is idempotent from the registry's point of view.
    pub async fn unsubscribe(&self, topic: impl Into<String>) -> SessionResult<()> {
        let topic = topic.into();
        self.call(|reply| Command::Unsubscribe { topic, reply }).await
    }

    /// Publish a payload to a topic.
    ///
    /// Requires a live connection. For `QoS::AtMostOnce` the engine result is
    /// returned verbatim; for acknowledged tiers a successful engine ack is
    /// normalized to a bare success.
    pub async fn publish(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        options: PublishOptions,
    ) -> SessionResult<()> {
        let topic = topic.into();
        let payload = payload.into();
        self.call(|reply| Command::Publish {
            topic,
            payload,
            options,
            reply,
        })
        .await
    }

    /// Request a clean disconnect and return the engine's result. The actor
    /// stops once the transport confirms the normal termination; no reconnect
    /// is attempted.
    pub async fn stop(&self) -> SessionResult<()> {
        let result = self.call(|reply| Command::Stop { reply }).await;
        if let Some(name) = &self.name {
            named_sessions().remove(name.as_ref());
        }
        result
    }

    /// Whether the actor is still running. A `false` here is final.
    pub fn is_running(&self) -> bool {
        !self.cmd_tx.is_closed()
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<SessionResult<T>>) -> Command,
    ) -> SessionResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(make(reply_tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        reply_rx.await.map_err(|_| SessionError::Closed)?
    }
}
