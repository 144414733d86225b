//! Option construction and the event-loop pump
//!
//! Pure configuration handling plus the background task that polls the
//! rumqttc event loop and translates engine events into transport events.

use crate::config::SessionOptions;
use crate::transport::{
    DeliveryAck, InboundMessage, QoS, Termination, TransportError, TransportEvent,
};
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet, SubscribeReasonCode};
use rumqttc::v5::{Event, EventLoop, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, trace};
use url::Url;

/// Connection progress reported by the pump to the connect call.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PumpState {
    Connecting,
    Connected,
    Failed(String),
}

/// Build rumqttc options from session options.
///
/// Credentials are read from the environment variables named in the options;
/// a missing username variable means anonymous access.
pub fn configure_mqtt_options(
    client_id: &str,
    options: &SessionOptions,
) -> Result<MqttOptions, TransportError> {
    let url = Url::parse(&options.broker_url)
        .map_err(|_| TransportError::InvalidBrokerUrl(options.broker_url.clone()))?;

    let host = url
        .host_str()
        .ok_or_else(|| TransportError::InvalidBrokerUrl(options.broker_url.clone()))?;
    let port = url
        .port()
        .unwrap_or(if url.scheme() == "mqtts" { 8883 } else { 1883 });

    let mut mqtt_options = MqttOptions::new(client_id, host, port);

    if url.scheme() == "mqtts" {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username_env) = &options.username_env {
        if let Ok(username) = std::env::var(username_env) {
            let password = options
                .password_env
                .as_ref()
                .and_then(|env_name| std::env::var(env_name).ok())
                .unwrap_or_default();
            mqtt_options.set_credentials(&username, &password);
        }
    }

    mqtt_options.set_keep_alive(Duration::from_secs(options.keep_alive_secs));
    mqtt_options.set_clean_start(options.clean_start);
    if let Some(size) = options.max_packet_size {
        mqtt_options.set_max_packet_size(Some(size));
    }

    Ok(mqtt_options)
}

impl From<QoS> for rumqttc::v5::mqttbytes::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::v5::mqttbytes::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::v5::mqttbytes::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::v5::mqttbytes::QoS::ExactlyOnce,
        }
    }
}

impl From<rumqttc::v5::mqttbytes::QoS> for QoS {
    fn from(qos: rumqttc::v5::mqttbytes::QoS) -> Self {
        match qos {
            rumqttc::v5::mqttbytes::QoS::AtMostOnce => QoS::AtMostOnce,
            rumqttc::v5::mqttbytes::QoS::AtLeastOnce => QoS::AtLeastOnce,
            rumqttc::v5::mqttbytes::QoS::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

/// Poll the event loop until the connection ends, forwarding events.
///
/// Ends with exactly one `Closed` event: `Normal` when a disconnect was
/// requested through the shutdown channel, `Abnormal` otherwise.
pub(crate) async fn run_event_loop(
    mut event_loop: EventLoop,
    events_tx: mpsc::Sender<TransportEvent>,
    state_tx: watch::Sender<PumpState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    debug!("disconnect requested, stopping event loop");
                    let _ = events_tx.send(TransportEvent::Closed(Termination::Normal)).await;
                    break;
                }
            }

            polled = event_loop.poll() => match polled {
                Ok(event) => {
                    if !forward_engine_event(event, &events_tx, &state_tx).await {
                        break;
                    }
                }
                Err(e) => {
                    let reason = e.to_string();
                    let _ = state_tx.send(PumpState::Failed(reason.clone()));
                    let termination = if *shutdown_rx.borrow() {
                        Termination::Normal
                    } else {
                        Termination::Abnormal(reason)
                    };
                    let _ = events_tx.send(TransportEvent::Closed(termination)).await;
                    break;
                }
            }
        }
    }
}

/// Check every grant in a SubAck. Reason codes at or above 0x80 are
/// rejections.
fn validate_suback(return_codes: &[SubscribeReasonCode]) -> Result<(), String> {
    let rejected: Vec<String> = return_codes
        .iter()
        .filter(|code| {
            !matches!(code, SubscribeReasonCode::Success(_))
        })
        .map(|code| format!("{code:?}"))
        .collect();

    if rejected.is_empty() {
        Ok(())
    } else {
        Err(rejected.join(", "))
    }
}

/// Translate one rumqttc event. Returns `false` when the pump should stop.
async fn forward_engine_event(
    event: Event,
    events_tx: &mpsc::Sender<TransportEvent>,
    state_tx: &watch::Sender<PumpState>,
) -> bool {
    match event {
        Event::Incoming(Packet::ConnAck(ack)) => {
            if ack.code == ConnectReturnCode::Success {
                let _ = state_tx.send(PumpState::Connected);
                true
            } else {
                let reason = format!("broker rejected connect: {:?}", ack.code);
                let _ = state_tx.send(PumpState::Failed(reason.clone()));
                let _ = events_tx
                    .send(TransportEvent::Closed(Termination::Abnormal(reason)))
                    .await;
                false
            }
        }
        Event::Incoming(Packet::Publish(publish)) => {
            let message = InboundMessage {
                topic: String::from_utf8_lossy(&publish.topic).to_string(),
                payload: publish.payload.clone(),
                qos: publish.qos.into(),
                retain: publish.retain,
            };
            events_tx.send(TransportEvent::Message(message)).await.is_ok()
        }
        Event::Incoming(Packet::PubAck(ack)) => events_tx
            .send(TransportEvent::Ack(DeliveryAck { packet_id: ack.pkid }))
            .await
            .is_ok(),
        Event::Incoming(Packet::PubComp(comp)) => events_tx
            .send(TransportEvent::Ack(DeliveryAck { packet_id: comp.pkid }))
            .await
            .is_ok(),
        Event::Incoming(Packet::SubAck(ack)) => {
            // The engine assigns packet identifiers inside its event loop, so
            // the ack cannot be tied back to a topic filter here.
            match validate_suback(&ack.return_codes) {
                Ok(()) => debug!(packet_id = ack.pkid, "subscription granted"),
                Err(rejected) => {
                    error!(
                        packet_id = ack.pkid,
                        rejected = %rejected,
                        "broker rejected subscription"
                    );
                }
            }
            true
        }
        Event::Incoming(Packet::Disconnect(disconnect)) => {
            let reason = format!("broker disconnect: {:?}", disconnect.reason_code);
            let _ = events_tx
                .send(TransportEvent::Closed(Termination::Abnormal(reason)))
                .await;
            false
        }
        Event::Incoming(other) => {
            trace!(packet = ?other, "engine event");
            true
        }
        Event::Outgoing(_) => true,
    }
}
