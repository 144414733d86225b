//! rumqttc-backed transport adapter
//!
//! The adapter is split into two focused sub-modules:
//!
//! - [`connection`]: pure option construction from [`crate::config::SessionOptions`]
//!   and the event-loop pump translating rumqttc events into
//!   [`crate::transport::TransportEvent`]s
//! - [`client`]: the [`MqttConnector`] / [`MqttHandle`] pair implementing the
//!   transport capability traits
//!
//! Every rumqttc call is wrapped at this boundary into a
//! [`crate::transport::TransportError`]; an engine fault becomes an error
//! value or a `Closed` event, never an uncontrolled failure in the session
//! actor.

pub mod client;
pub mod connection;

pub use client::{MqttConnector, MqttHandle};
pub use connection::configure_mqtt_options;
