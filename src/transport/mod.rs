//! Transport layer for broker communication
//!
//! This module provides the capability interface between the session actor and
//! the underlying protocol engine. The actor only ever talks to the engine
//! through [`Connector`] and [`TransportHandle`]; the concrete `rumqttc`-backed
//! implementation lives in [`mqtt`].

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod mqtt;

/// Delivery guarantee requested for a publish or subscription.
///
/// `AtMostOnce` is the fire-and-forget tier; `AtLeastOnce` and `ExactlyOnce`
/// are the acknowledged tiers carrying a delivery identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// Options applied to a single publish.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublishOptions {
    pub qos: QoS,
    pub retain: bool,
}

impl PublishOptions {
    pub fn qos(qos: QoS) -> Self {
        Self { qos, retain: false }
    }
}

/// Options applied to a subscription, kept in the registry for replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub qos: QoS,
}

impl SubscribeOptions {
    pub fn qos(qos: QoS) -> Self {
        Self { qos }
    }
}

/// Engine acknowledgement of a subscribe request.
///
/// Carries the reason code only. MQTT v5 SubAck properties (user properties,
/// reason string) are not surfaced: the rumqttc adapter confirms grants
/// asynchronously on its event loop, where the properties are no longer tied
/// to the originating request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeAck {
    /// MQTT reason code; values below 0x80 are the granted QoS.
    pub reason_code: u8,
}

impl SubscribeAck {
    /// Ack for a grant at the requested QoS.
    pub fn granted(qos: QoS) -> Self {
        let reason_code = match qos {
            QoS::AtMostOnce => 0x00,
            QoS::AtLeastOnce => 0x01,
            QoS::ExactlyOnce => 0x02,
        };
        Self { reason_code }
    }
}

/// Engine acknowledgement of a publish request.
///
/// `packet_id` is present only for acknowledged delivery tiers; the session
/// actor normalizes those to a bare success before replying to the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishAck {
    pub packet_id: Option<u16>,
}

/// An application message delivered by the broker.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

/// Broker acknowledgement of an earlier QoS >= 1 publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryAck {
    pub packet_id: u16,
}

/// How a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Caller-initiated disconnect completed.
    Normal,
    /// The connection died for any other reason.
    Abnormal(String),
}

/// Asynchronous events produced by one live connection.
///
/// `Closed` is terminal: the engine sends nothing on the channel after it.
/// The channel closing without a `Closed` event is treated by the session
/// actor as an abnormal termination (engine task crashed).
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Message(InboundMessage),
    Ack(DeliveryAck),
    Closed(Termination),
}

/// Uniform fault boundary for every engine interaction.
///
/// Engine failures of any kind surface as values of this type; they never
/// propagate as panics or task aborts into the session actor.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("invalid broker URL: {0}")]
    InvalidBrokerUrl(String),

    #[error("no connection acknowledgement within {0}ms")]
    ConnAckTimeout(u64),

    #[error("engine call failed")]
    Call(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// A handle to one active protocol-engine connection.
///
/// Every call is a point-in-time request that may fail; results are plain
/// two-outcome values per the [`TransportError`] boundary.
#[async_trait::async_trait]
pub trait TransportHandle: Send + Sync + 'static {
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        options: PublishOptions,
    ) -> Result<PublishAck, TransportError>;

    async fn subscribe(
        &self,
        topic: &str,
        options: SubscribeOptions,
    ) -> Result<SubscribeAck, TransportError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Request a clean disconnect. The connection signals completion through
    /// a `Closed(Termination::Normal)` event, not through this return value.
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Capability to establish a new connection.
///
/// Used once at session start and again for every reconnect attempt. Each
/// successful call yields a fresh handle and the event stream for that
/// connection only.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    type Handle: TransportHandle;

    async fn connect(
        &self,
        client_id: &str,
        options: &crate::config::SessionOptions,
    ) -> Result<(Self::Handle, mpsc::Receiver<TransportEvent>), TransportError>;
}
