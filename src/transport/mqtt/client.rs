//! MQTT connector and connection handle
//!
//! [`MqttConnector`] establishes one rumqttc connection per call: it spawns
//! the event-loop pump, waits for the broker's ConnAck (success is gated on
//! the actual acknowledgement, not on any event), and hands back the handle
//! plus that connection's event stream.

use super::connection::{configure_mqtt_options, run_event_loop, PumpState};
use crate::config::SessionOptions;
use crate::transport::{
    Connector, PublishAck, PublishOptions, SubscribeAck, SubscribeOptions, TransportError,
    TransportEvent, TransportHandle,
};
use bytes::Bytes;
use rumqttc::v5::AsyncClient;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// Channel capacities for one connection.
const REQUEST_BUFFER: usize = 10;
const EVENT_BUFFER: usize = 64;

/// Uniform fault boundary for rumqttc client calls.
fn engine_call(e: rumqttc::v5::ClientError) -> TransportError {
    TransportError::Call(Box::new(e))
}

/// Connector producing rumqttc-backed connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct MqttConnector;

impl MqttConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Connector for MqttConnector {
    type Handle = MqttHandle;

    async fn connect(
        &self,
        client_id: &str,
        options: &SessionOptions,
    ) -> Result<(MqttHandle, mpsc::Receiver<TransportEvent>), TransportError> {
        let mqtt_options = configure_mqtt_options(client_id, options)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_BUFFER);

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (state_tx, state_rx) = watch::channel(PumpState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let pump = tokio::spawn(run_event_loop(event_loop, events_tx, state_tx, shutdown_rx));

        let timeout = Duration::from_millis(options.connect_timeout_ms);
        match wait_for_connack(state_rx, timeout).await {
            Ok(()) => {
                debug!(client_id = %client_id, "broker acknowledged connection");
                Ok((MqttHandle { client, shutdown_tx }, events_rx))
            }
            Err(e) => {
                let _ = shutdown_tx.send(true);
                pump.abort();
                Err(e)
            }
        }
    }
}

/// Wait for the pump to observe a ConnAck, bounded by the connect timeout.
async fn wait_for_connack(
    mut state_rx: watch::Receiver<PumpState>,
    timeout: Duration,
) -> Result<(), TransportError> {
    let wait = async {
        loop {
            match state_rx.borrow_and_update().clone() {
                PumpState::Connected => return Ok(()),
                PumpState::Failed(reason) => return Err(TransportError::ConnectFailed(reason)),
                PumpState::Connecting => {}
            }
            if state_rx.changed().await.is_err() {
                return Err(TransportError::ConnectFailed(
                    "engine task stopped before ConnAck".to_string(),
                ));
            }
        }
    };

    match tokio::time::timeout(timeout, wait).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::ConnAckTimeout(timeout.as_millis() as u64)),
    }
}

/// Handle to one live rumqttc connection.
#[derive(Debug)]
pub struct MqttHandle {
    client: AsyncClient,
    shutdown_tx: watch::Sender<bool>,
}

#[async_trait::async_trait]
impl TransportHandle for MqttHandle {
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        options: PublishOptions,
    ) -> Result<PublishAck, TransportError> {
        self.client
            .publish(topic, options.qos.into(), options.retain, payload)
            .await
            .map_err(engine_call)?;
        // rumqttc assigns packet identifiers internally; broker acks surface
        // on the event stream as DeliveryAck events.
        Ok(PublishAck::default())
    }

    async fn subscribe(
        &self,
        topic: &str,
        options: SubscribeOptions,
    ) -> Result<SubscribeAck, TransportError> {
        self.client
            .subscribe(topic, options.qos.into())
            .await
            .map_err(engine_call)?;
        // rumqttc confirms grants asynchronously; the pump validates the
        // broker's SubAck reason codes when they arrive.
        Ok(SubscribeAck::granted(options.qos))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.client.unsubscribe(topic).await.map_err(engine_call)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let result = self.client.disconnect().await.map_err(engine_call);
        let _ = self.shutdown_tx.send(true);
        result
    }
}

impl Drop for MqttHandle {
    fn drop(&mut self) {
        // A replaced or discarded handle must not leave its pump running.
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_for_connack_success() {
        let (state_tx, state_rx) = watch::channel(PumpState::Connecting);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = state_tx.send(PumpState::Connected);
        });

        let result = wait_for_connack(state_rx, Duration::from_millis(200)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_wait_for_connack_timeout() {
        let (state_tx, state_rx) = watch::channel(PumpState::Connecting);

        // Keep the sender alive so the channel does not close early.
        let _keep = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            drop(state_tx);
        });

        let result = wait_for_connack(state_rx, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(TransportError::ConnAckTimeout(10))));
    }

    #[tokio::test]
    async fn test_wait_for_connack_failure() {
        let (state_tx, state_rx) = watch::channel(PumpState::Connecting);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = state_tx.send(PumpState::Failed("refused".to_string()));
        });

        let result = wait_for_connack(state_rx, Duration::from_millis(200)).await;
        match result {
            Err(TransportError::ConnectFailed(reason)) => assert_eq!(reason, "refused"),
            other => panic!("expected ConnectFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_refused_by_unreachable_broker() {
        // Port 1 is never an MQTT broker; the pump fails before any ConnAck.
        let mut options = SessionOptions::new("mqtt://127.0.0.1:1");
        options.connect_timeout_ms = 500;

        let result = MqttConnector::new().connect("test-session", &options).await;
        assert!(result.is_err());
    }
}
