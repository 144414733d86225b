//! mqtt-session - supervised broker session actor
//!
//! A [`Session`] owns a single logical connection to an MQTT broker and
//! presents a stable, crash-resilient API to application code, independent of
//! transient network failures. One tokio task serializes every operation:
//! requests from callers, inbound events from the broker, and the reconnect
//! timer all feed the same state machine.
//!
//! # Behavior at a glance
//!
//! - The initial connect is attempted once; a failure (or a handler `init`
//!   failure) aborts startup, leaving restart policy to the embedding
//!   supervisor.
//! - A later connection loss is retried forever at a fixed delay
//!   (`reconnect_ms`, default 5000), replaying every registered subscription
//!   in insertion order after each successful reconnect.
//! - While disconnected, publish and subscribe fail immediately with
//!   [`SessionError::Disconnected`] - nothing is queued.
//! - Inbound events reach the [`SessionHandler`] strictly in arrival order.
//!
//! # Quick start
//!
//! ```no_run
//! use mqtt_session::{
//!     HandlerInit, MqttConnector, PublishOptions, QoS, Session, SessionEvent, SessionHandler,
//!     SessionOptions, SubscribeOptions, TerminateReason,
//! };
//!
//! struct Printer;
//!
//! #[async_trait::async_trait]
//! impl SessionHandler for Printer {
//!     type State = u64;
//!     type InitError = std::convert::Infallible;
//!
//!     async fn init(&self, _client_id: &str) -> Result<HandlerInit<u64>, Self::InitError> {
//!         Ok(HandlerInit::new(0).with_subscriptions([(
//!             "sensors/#".to_string(),
//!             SubscribeOptions::qos(QoS::AtLeastOnce),
//!         )]))
//!     }
//!
//!     async fn handle_event(&self, event: SessionEvent, state: u64) -> u64 {
//!         if let SessionEvent::Message(msg) = event {
//!             println!("{}: {} bytes", msg.topic, msg.payload.len());
//!         }
//!         state + 1
//!     }
//!
//!     async fn on_terminate(&self, _reason: TerminateReason, state: u64) {
//!         println!("handled {state} events");
//!     }
//! }
//!
//! # async fn run() -> Result<(), mqtt_session::SessionError> {
//! let options = SessionOptions::new("mqtt://localhost:1883");
//! let session = Session::start("sensor-reader", Printer, MqttConnector::new(), options).await?;
//!
//! session
//!     .publish("sensors/hello", "hi", PublishOptions::qos(QoS::AtMostOnce))
//!     .await?;
//! session.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod handler;
pub mod logging;
pub mod registry;
pub mod session;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, SessionOptions, DEFAULT_RECONNECT_MS};
pub use error::{SessionError, SessionResult};
pub use handler::{HandlerInit, SessionEvent, SessionHandler, TerminateReason};
pub use registry::SubscriptionRegistry;
pub use session::Session;
pub use transport::mqtt::MqttConnector;
pub use transport::{
    Connector, DeliveryAck, InboundMessage, PublishAck, PublishOptions, QoS, SubscribeAck,
    SubscribeOptions, Termination, TransportError, TransportEvent, TransportHandle,
};
