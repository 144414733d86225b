//! Mock implementations for testing
//!
//! [`MockConnector`] stands in for the protocol engine: it records every
//! engine call, can be scripted to fail connects or individual operations,
//! and lets tests inject inbound events or kill the live connection.
//! [`RecordingHandler`] is a [`SessionHandler`] that appends a description of
//! every event to its state.

use crate::config::SessionOptions;
use crate::handler::{HandlerInit, SessionEvent, SessionHandler, TerminateReason};
use crate::transport::{
    Connector, DeliveryAck, InboundMessage, PublishAck, PublishOptions, QoS, SubscribeAck,
    SubscribeOptions, Termination, TransportError, TransportEvent, TransportHandle,
};
use bytes::Bytes;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

/// One recorded engine interaction.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Connect,
    Subscribe { topic: String, qos: QoS },
    Unsubscribe { topic: String },
    Publish { topic: String, payload: Vec<u8>, qos: QoS },
    Disconnect,
}

#[derive(Debug, Default)]
struct MockShared {
    calls: Vec<EngineCall>,
    connect_count: usize,
    refuse_connections: bool,
    connect_failures: VecDeque<String>,
    fail_subscribe_topics: HashSet<String>,
    fail_publish: bool,
    fail_unsubscribe: bool,
    fail_disconnect: bool,
    events_tx: Option<mpsc::Sender<TransportEvent>>,
}

/// Scriptable in-memory protocol engine.
#[derive(Debug, Default, Clone)]
pub struct MockConnector {
    shared: Arc<Mutex<MockShared>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every engine call so far, in order.
    pub async fn calls(&self) -> Vec<EngineCall> {
        self.shared.lock().await.calls.clone()
    }

    pub async fn clear_calls(&self) {
        self.shared.lock().await.calls.clear();
    }

    /// Number of connect attempts (successful or not).
    pub async fn connect_count(&self) -> usize {
        self.shared.lock().await.connect_count
    }

    /// Refuse every connect attempt until turned off again.
    pub async fn set_refuse_connections(&self, refuse: bool) {
        self.shared.lock().await.refuse_connections = refuse;
    }

    /// Fail exactly one upcoming connect attempt with the given reason.
    /// Queued failures are consumed in order before normal connects resume.
    pub async fn push_connect_failure(&self, reason: impl Into<String>) {
        self.shared
            .lock()
            .await
            .connect_failures
            .push_back(reason.into());
    }

    /// Reject every subscribe for this topic.
    pub async fn fail_subscribes_to(&self, topic: impl Into<String>) {
        self.shared
            .lock()
            .await
            .fail_subscribe_topics
            .insert(topic.into());
    }

    pub async fn set_fail_publish(&self, fail: bool) {
        self.shared.lock().await.fail_publish = fail;
    }

    pub async fn set_fail_unsubscribe(&self, fail: bool) {
        self.shared.lock().await.fail_unsubscribe = fail;
    }

    pub async fn set_fail_disconnect(&self, fail: bool) {
        self.shared.lock().await.fail_disconnect = fail;
    }

    /// Deliver an inbound message on the live connection.
    pub async fn deliver_message(&self, topic: impl Into<String>, payload: impl Into<Bytes>) {
        self.push_event(TransportEvent::Message(InboundMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtLeastOnce,
            retain: false,
        }))
        .await;
    }

    /// Deliver a broker publish acknowledgement on the live connection.
    pub async fn deliver_ack(&self, packet_id: u16) {
        self.push_event(TransportEvent::Ack(DeliveryAck { packet_id }))
            .await;
    }

    /// Kill the live connection with an abnormal termination.
    pub async fn drop_connection(&self, reason: impl Into<String>) {
        let tx = self.shared.lock().await.events_tx.take();
        if let Some(tx) = tx {
            let _ = tx
                .send(TransportEvent::Closed(Termination::Abnormal(reason.into())))
                .await;
        }
    }

    /// Close the live connection as the broker would on a clean shutdown.
    pub async fn close_connection_normally(&self) {
        let tx = self.shared.lock().await.events_tx.take();
        if let Some(tx) = tx {
            let _ = tx.send(TransportEvent::Closed(Termination::Normal)).await;
        }
    }

    async fn push_event(&self, event: TransportEvent) {
        let tx = self.shared.lock().await.events_tx.clone();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }
}

#[async_trait::async_trait]
impl Connector for MockConnector {
    type Handle = MockTransport;

    async fn connect(
        &self,
        _client_id: &str,
        _options: &SessionOptions,
    ) -> Result<(MockTransport, mpsc::Receiver<TransportEvent>), TransportError> {
        let mut shared = self.shared.lock().await;
        shared.calls.push(EngineCall::Connect);
        shared.connect_count += 1;

        if let Some(reason) = shared.connect_failures.pop_front() {
            return Err(TransportError::ConnectFailed(reason));
        }
        if shared.refuse_connections {
            return Err(TransportError::ConnectFailed(
                "connection refused".to_string(),
            ));
        }

        let (events_tx, events_rx) = mpsc::channel(32);
        shared.events_tx = Some(events_tx);
        Ok((
            MockTransport {
                shared: self.shared.clone(),
            },
            events_rx,
        ))
    }
}

/// Handle side of [`MockConnector`].
#[derive(Debug)]
pub struct MockTransport {
    shared: Arc<Mutex<MockShared>>,
}

#[async_trait::async_trait]
impl TransportHandle for MockTransport {
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        options: PublishOptions,
    ) -> Result<PublishAck, TransportError> {
        let mut shared = self.shared.lock().await;
        shared.calls.push(EngineCall::Publish {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos: options.qos,
        });
        if shared.fail_publish {
            return Err(TransportError::Call("mock publish failure".into()));
        }
        let packet_id = match options.qos {
            QoS::AtMostOnce => None,
            _ => Some(1),
        };
        Ok(PublishAck { packet_id })
    }

    async fn subscribe(
        &self,
        topic: &str,
        options: SubscribeOptions,
    ) -> Result<SubscribeAck, TransportError> {
        let mut shared = self.shared.lock().await;
        shared.calls.push(EngineCall::Subscribe {
            topic: topic.to_string(),
            qos: options.qos,
        });
        if shared.fail_subscribe_topics.contains(topic) {
            return Err(TransportError::Call(
                format!("mock subscribe to {topic} rejected").into(),
            ));
        }
        Ok(SubscribeAck::granted(options.qos))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        let mut shared = self.shared.lock().await;
        shared.calls.push(EngineCall::Unsubscribe {
            topic: topic.to_string(),
        });
        if shared.fail_unsubscribe {
            return Err(TransportError::Call("mock unsubscribe failure".into()));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let tx = {
            let mut shared = self.shared.lock().await;
            shared.calls.push(EngineCall::Disconnect);
            if shared.fail_disconnect {
                return Err(TransportError::Call("mock disconnect failure".into()));
            }
            shared.events_tx.take()
        };
        if let Some(tx) = tx {
            let _ = tx.send(TransportEvent::Closed(Termination::Normal)).await;
        }
        Ok(())
    }
}

/// Error returned by [`RecordingHandler`] when scripted to refuse init.
#[derive(Debug, Error)]
#[error("handler init refused")]
pub struct InitRefused;

/// Handler whose state is the ordered list of event descriptions.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    init_subscriptions: Vec<(String, SubscribeOptions)>,
    fail_init: bool,
    /// Live mirror of the handler state, for observation mid-session.
    events_seen: Arc<Mutex<Vec<String>>>,
    /// Populated exactly once, at shutdown.
    terminated: Arc<Mutex<Option<(TerminateReason, Vec<String>)>>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_init_subscriptions(
        subscriptions: impl IntoIterator<Item = (String, SubscribeOptions)>,
    ) -> Self {
        Self {
            init_subscriptions: subscriptions.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn refusing_init() -> Self {
        Self {
            fail_init: true,
            ..Default::default()
        }
    }

    pub fn events_seen(&self) -> Arc<Mutex<Vec<String>>> {
        self.events_seen.clone()
    }

    pub fn terminated(&self) -> Arc<Mutex<Option<(TerminateReason, Vec<String>)>>> {
        self.terminated.clone()
    }

    fn describe(event: &SessionEvent) -> String {
        match event {
            SessionEvent::Message(msg) => {
                format!("message:{}:{}", msg.topic, String::from_utf8_lossy(&msg.payload))
            }
            SessionEvent::Ack(ack) => format!("ack:{}", ack.packet_id),
        }
    }
}

#[async_trait::async_trait]
impl SessionHandler for RecordingHandler {
    type State = Vec<String>;
    type InitError = InitRefused;

    async fn init(&self, _client_id: &str) -> Result<HandlerInit<Vec<String>>, InitRefused> {
        if self.fail_init {
            return Err(InitRefused);
        }
        Ok(HandlerInit::new(Vec::new())
            .with_subscriptions(self.init_subscriptions.iter().cloned()))
    }

    async fn handle_event(&self, event: SessionEvent, mut state: Vec<String>) -> Vec<String> {
        let entry = Self::describe(&event);
        state.push(entry.clone());
        self.events_seen.lock().await.push(entry);
        state
    }

    async fn on_terminate(&self, reason: TerminateReason, state: Vec<String>) {
        *self.terminated.lock().await = Some((reason, state));
    }
}
