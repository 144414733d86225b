//! The session actor: one task owning all connection state
//!
//! The actor is a serialized state machine. Exactly one logical thread of
//! control processes commands and transport events, one at a time, in arrival
//! order; nothing else mutates the registry, the transport handle, or the
//! handler state. The scheduled reconnect retry is a timer arm in the same
//! `select!` loop, never a separate task.

use crate::config::SessionOptions;
use crate::error::{SessionError, SessionResult};
use crate::handler::{SessionEvent, SessionHandler, TerminateReason};
use crate::registry::SubscriptionRegistry;
use crate::transport::{
    Connector, PublishOptions, SubscribeAck, SubscribeOptions, Termination, TransportEvent,
    TransportHandle,
};
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Requests from session handles, each carrying its reply channel.
#[derive(Debug)]
pub(crate) enum Command {
    Subscribe {
        topic: String,
        options: SubscribeOptions,
        reply: oneshot::Sender<SessionResult<SubscribeAck>>,
    },
    Unsubscribe {
        topic: String,
        reply: oneshot::Sender<SessionResult<()>>,
    },
    Publish {
        topic: String,
        payload: Bytes,
        options: PublishOptions,
        reply: oneshot::Sender<SessionResult<()>>,
    },
    Stop {
        reply: oneshot::Sender<SessionResult<()>>,
    },
}

/// What woke the actor loop.
enum Wake {
    Command(Option<Command>),
    Transport(Option<TransportEvent>),
    Retry,
}

enum Flow {
    Continue,
    Stop(TerminateReason),
}

pub(crate) struct SessionActor<C: Connector, H: SessionHandler> {
    client_id: String,
    options: SessionOptions,
    connector: C,
    handler: H,
    /// At most one transport handle. After an abnormal termination the stale
    /// handle is kept (non-live) until a reconnect replaces it or a failed
    /// reconnect clears it; unsubscribe still forwards to a stale handle.
    transport: Option<C::Handle>,
    alive: bool,
    events: Option<mpsc::Receiver<TransportEvent>>,
    registry: SubscriptionRegistry,
    state: Option<H::State>,
    cmd_rx: mpsc::Receiver<Command>,
    retry_at: Option<Instant>,
    stopping: bool,
}

impl<C: Connector, H: SessionHandler> SessionActor<C, H> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        client_id: String,
        options: SessionOptions,
        connector: C,
        handler: H,
        transport: C::Handle,
        events: mpsc::Receiver<TransportEvent>,
        registry: SubscriptionRegistry,
        state: H::State,
        cmd_rx: mpsc::Receiver<Command>,
    ) -> Self {
        Self {
            client_id,
            options,
            connector,
            handler,
            transport: Some(transport),
            alive: true,
            events: Some(events),
            registry,
            state: Some(state),
            cmd_rx,
            retry_at: None,
            stopping: false,
        }
    }

    pub(crate) async fn run(mut self) {
        let reason = self.run_loop().await;
        if let Some(state) = self.state.take() {
            self.handler.on_terminate(reason, state).await;
        }
        debug!(client_id = %self.client_id, "session actor stopped");
    }

    async fn run_loop(&mut self) -> TerminateReason {
        loop {
            let wake = {
                let retry_at = self.retry_at;
                let events = self.events.as_mut();
                tokio::select! {
                    cmd = self.cmd_rx.recv() => Wake::Command(cmd),
                    event = Self::next_event(events) => Wake::Transport(event),
                    _ = Self::retry_timer(retry_at) => Wake::Retry,
                }
            };

            let flow = match wake {
                Wake::Command(Some(cmd)) => self.handle_command(cmd).await,
                Wake::Command(None) => {
                    // Every session handle dropped: treat as a stop request.
                    if let Some(handle) = self.transport.as_ref() {
                        let _ = handle.disconnect().await;
                    }
                    Flow::Stop(TerminateReason::Normal)
                }
                Wake::Transport(event) => self.handle_transport_event(event).await,
                Wake::Retry => {
                    self.retry_at = None;
                    self.try_reconnect().await;
                    Flow::Continue
                }
            };

            if let Flow::Stop(reason) = flow {
                return reason;
            }
        }
    }

    /// Receive from the current connection's event stream, or park forever
    /// while there is no connection.
    async fn next_event(
        events: Option<&mut mpsc::Receiver<TransportEvent>>,
    ) -> Option<TransportEvent> {
        match events {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }

    async fn retry_timer(retry_at: Option<Instant>) {
        match retry_at {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    async fn handle_command(&mut self, cmd: Command) -> Flow {
        match cmd {
            Command::Subscribe {
                topic,
                options,
                reply,
            } => {
                let result = self.do_subscribe(topic, options).await;
                let _ = reply.send(result);
                Flow::Continue
            }
            Command::Unsubscribe { topic, reply } => {
                let result = self.do_unsubscribe(&topic).await;
                let _ = reply.send(result);
                Flow::Continue
            }
            Command::Publish {
                topic,
                payload,
                options,
                reply,
            } => {
                let result = self.do_publish(&topic, payload, options).await;
                let _ = reply.send(result);
                Flow::Continue
            }
            Command::Stop { reply } => {
                self.stopping = true;
                self.retry_at = None;
                let result = match self.transport.as_ref() {
                    Some(handle) => handle.disconnect().await.map_err(SessionError::Engine),
                    None => Ok(()),
                };
                let failure = result.as_ref().err().map(|e| e.to_string());
                let _ = reply.send(result);
                if let Some(reason) = failure {
                    // The engine refused a clean disconnect; there will be no
                    // close confirmation to wait for.
                    return Flow::Stop(TerminateReason::Error(reason));
                }
                if self.events.is_none() {
                    // No event stream left to deliver the close confirmation.
                    return Flow::Stop(TerminateReason::Normal);
                }
                Flow::Continue
            }
        }
    }

    async fn do_subscribe(
        &mut self,
        topic: String,
        options: SubscribeOptions,
    ) -> SessionResult<SubscribeAck> {
        let Some(handle) = self.transport.as_ref().filter(|_| self.alive) else {
            return Err(SessionError::Disconnected);
        };
        if self.registry.contains(&topic) {
            return Err(SessionError::Duplicate { topic });
        }

        let ack = handle
            .subscribe(&topic, options)
            .await
            .map_err(SessionError::Engine)?;
        self.registry.insert(topic, options);
        Ok(ack)
    }

    async fn do_unsubscribe(&mut self, topic: &str) -> SessionResult<()> {
        // Forwarded even to a stale handle; the engine call may fail on its
        // own terms. The registry entry goes away no matter what.
        let result = match self.transport.as_ref() {
            Some(handle) => handle.unsubscribe(topic).await.map_err(SessionError::Engine),
            None => Err(SessionError::Disconnected),
        };
        self.registry.remove(topic);
        result
    }

    async fn do_publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        options: PublishOptions,
    ) -> SessionResult<()> {
        let Some(handle) = self.transport.as_ref().filter(|_| self.alive) else {
            return Err(SessionError::Disconnected);
        };

        // Fire-and-forget carries no delivery identifier to begin with; for
        // acknowledged tiers the engine ack is normalized to a bare success.
        handle
            .publish(topic, payload, options)
            .await
            .map(|_ack| ())
            .map_err(SessionError::Engine)
    }

    async fn handle_transport_event(&mut self, event: Option<TransportEvent>) -> Flow {
        match event {
            Some(TransportEvent::Message(msg)) => {
                self.dispatch(SessionEvent::Message(msg)).await;
                Flow::Continue
            }
            Some(TransportEvent::Ack(ack)) => {
                self.dispatch(SessionEvent::Ack(ack)).await;
                Flow::Continue
            }
            Some(TransportEvent::Closed(Termination::Normal)) => {
                info!(client_id = %self.client_id, "transport closed");
                Flow::Stop(TerminateReason::Normal)
            }
            Some(TransportEvent::Closed(Termination::Abnormal(reason))) => {
                self.on_connection_lost(reason).await
            }
            None => {
                // Event channel gone without a Closed event: the engine task
                // died. Same handling as an abnormal termination.
                self.on_connection_lost("transport event channel closed".to_string())
                    .await
            }
        }
    }

    async fn on_connection_lost(&mut self, reason: String) -> Flow {
        self.events = None;
        self.alive = false;

        if self.stopping {
            // The close raced our own disconnect; shut down cleanly.
            return Flow::Stop(TerminateReason::Normal);
        }

        error!(client_id = %self.client_id, reason = %reason, "connection lost, reconnecting");
        self.try_reconnect().await;
        Flow::Continue
    }

    /// One reconnect attempt. Success replays the registry in insertion
    /// order; failure clears the handle and schedules the next attempt after
    /// the configured fixed delay. Errors here are logged, never surfaced:
    /// no caller is blocked on a reconnect.
    async fn try_reconnect(&mut self) {
        match self.connector.connect(&self.client_id, &self.options).await {
            Ok((handle, events)) => {
                for (topic, options) in self.registry.iter() {
                    if let Err(e) = handle.subscribe(topic, options).await {
                        error!(topic = %topic, error = %e, "failed to replay subscription");
                    }
                }
                info!(
                    client_id = %self.client_id,
                    subscriptions = self.registry.len(),
                    "reconnected to broker"
                );
                self.transport = Some(handle);
                self.events = Some(events);
                self.alive = true;
                self.retry_at = None;
            }
            Err(e) => {
                error!(
                    client_id = %self.client_id,
                    error = %e,
                    retry_in_ms = self.options.reconnect_ms,
                    "reconnect attempt failed"
                );
                self.transport = None;
                self.retry_at =
                    Some(Instant::now() + Duration::from_millis(self.options.reconnect_ms));
            }
        }
    }

    async fn dispatch(&mut self, event: SessionEvent) {
        if let Some(state) = self.state.take() {
            self.state = Some(self.handler.handle_event(event, state).await);
        }
    }
}
