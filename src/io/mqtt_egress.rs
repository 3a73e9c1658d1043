//! MQTT publisher for egress events
//!
//! Publishes validation outcomes and operational snapshots to MQTT topics
//! for downstream consumers:
//! - faregate/validations - validation outcomes (QoS 1, at-least-once)
//! - faregate/metrics - periodic metrics snapshots (QoS 0)
//! - faregate/subscribers - subscriber lifecycle events (QoS 0)

use crate::infra::config::Config;
use crate::io::egress_channel::EgressMessage;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// MQTT publisher actor
///
/// Receives messages from the egress channel and publishes to MQTT topics.
pub struct MqttPublisher {
    client: AsyncClient,
    rx: mpsc::Receiver<EgressMessage>,
    validations_topic: String,
    metrics_topic: String,
    subscribers_topic: String,
}

impl MqttPublisher {
    /// Create a new MQTT publisher
    ///
    /// Connects to the broker at the configured MQTT host/port.
    pub fn new(config: &Config, rx: mpsc::Receiver<EgressMessage>) -> Self {
        let client_id = format!("faregate-egress-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        // Set credentials if configured
        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        // Spawn the eventloop handler
        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_egress_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        // QoS 1 acknowledgement received
                        debug!("mqtt_egress_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_egress_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self {
            client,
            rx,
            validations_topic: config.mqtt_egress_validations_topic().to_string(),
            metrics_topic: config.mqtt_egress_metrics_topic().to_string(),
            subscribers_topic: config.mqtt_egress_subscribers_topic().to_string(),
        }
    }

    /// Run the publisher loop
    ///
    /// Processes messages from the channel and publishes to MQTT.
    /// Runs until shutdown signal is received.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            validations = %self.validations_topic,
            metrics = %self.metrics_topic,
            subscribers = %self.subscribers_topic,
            "mqtt_egress_started"
        );

        loop {
            tokio::select! {
                // Check for shutdown
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("mqtt_egress_shutdown");
                        break;
                    }
                }
                message = self.rx.recv() => {
                    match message {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            info!("mqtt_egress_channel_closed");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn handle_message(&self, message: EgressMessage) {
        match message {
            EgressMessage::Validation(payload) => {
                // At-least-once for the fleet: a scanner must not miss an outcome
                self.publish_json(&self.validations_topic, QoS::AtLeastOnce, &payload).await;
            }
            EgressMessage::Metrics(payload) => {
                self.publish_json(&self.metrics_topic, QoS::AtMostOnce, &payload).await;
            }
            EgressMessage::Subscriber(payload) => {
                self.publish_json(&self.subscribers_topic, QoS::AtMostOnce, &payload).await;
            }
        }
    }

    async fn publish_json<T: Serialize>(&self, topic: &str, qos: QoS, payload: &T) {
        let json = match serde_json::to_string(payload) {
            Ok(json) => json,
            Err(e) => {
                error!(topic = %topic, error = %e, "mqtt_egress_serialize_failed");
                return;
            }
        };

        if let Err(e) = self.client.publish(topic, qos, false, json).await {
            warn!(topic = %topic, error = %e, "mqtt_egress_publish_failed");
        }
    }
}
