// Copyright 2025 Devicelink (https://github.com/devicelink)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bus wrapper
//!
//! Wraps the rumqttc async client: connection lifecycle, automatic
//! re-subscription after every (re)connect, JSON decode of inbound frames
//! and hand-off into the router's bounded ingress channel. Outbound
//! publishes fail fast with `bus-not-ready` while the connection is down;
//! there is no in-process queueing.

use crate::config::MqttConfig;
use async_trait::async_trait;
use devicelink_core::{BridgeError, CommandPayload};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Reconnect backoff bounds.
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CEILING: Duration = Duration::from_secs(30);

/// Topic filters the bridge consumes, with their subscription QoS.
pub const SUBSCRIPTIONS: &[(&str, QoS)] = &[
    ("devices/+/capabilities", QoS::AtLeastOnce),
    ("devices/+/status", QoS::AtLeastOnce),
    ("devices/+/sensors/+/data", QoS::AtMostOnce),
    ("devices/+/actuators/+/status", QoS::AtLeastOnce),
    ("devices/+/error", QoS::AtLeastOnce),
];

/// Connection state, observable by tools and the status surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    Disconnected,
    Connecting,
    Connected,
}

/// A decoded inbound message handed to the router workers.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: serde_json::Value,
}

/// Publish seam used by the tool surface; lets tests capture commands
/// without a broker.
#[async_trait]
pub trait BusPublisher: Send + Sync {
    /// Serialize and publish a JSON payload. Fails with `bus-not-ready`
    /// while disconnected.
    async fn publish_json(
        &self,
        topic: &str,
        payload: &serde_json::Value,
        qos: QoS,
        retain: bool,
    ) -> Result<(), BridgeError>;

    fn is_connected(&self) -> bool;
}

/// Command topic for one actuator.
pub fn command_topic(device_id: &str, actuator_type: &str) -> String {
    format!("devices/{device_id}/actuators/{actuator_type}/cmd")
}

/// Client half of the bus: publish + state observation.
#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
    state_rx: watch::Receiver<BusState>,
    dropped: Arc<AtomicU64>,
}

impl MqttBus {
    /// Build the client and its driver. The driver must be spawned; it owns
    /// the network event loop.
    pub fn connect(
        config: &MqttConfig,
        ingress: mpsc::Sender<BusMessage>,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, BusDriver) {
        let mut options =
            MqttOptions::new(config.client_id.clone(), config.broker.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username.clone(), password.clone());
        }

        let (client, eventloop) = AsyncClient::new(options, 128);
        let (state_tx, state_rx) = watch::channel(BusState::Connecting);
        let dropped = Arc::new(AtomicU64::new(0));

        let bus = Self {
            client: client.clone(),
            state_rx,
            dropped: dropped.clone(),
        };
        let driver = BusDriver {
            client,
            eventloop,
            state_tx,
            ingress,
            shutdown,
            dropped,
        };
        (bus, driver)
    }

    pub fn state(&self) -> BusState {
        *self.state_rx.borrow()
    }

    /// Inbound messages dropped because the ingress buffer was full.
    pub fn dropped_messages(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Publish an actuator command at QoS 1, no retain.
    pub async fn publish_command(
        &self,
        device_id: &str,
        actuator_type: &str,
        command: &CommandPayload,
    ) -> Result<(), BridgeError> {
        let payload = serde_json::to_value(command)
            .map_err(|e| BridgeError::InvalidPayload(e.to_string()))?;
        self.publish_json(
            &command_topic(device_id, actuator_type),
            &payload,
            QoS::AtLeastOnce,
            false,
        )
        .await
    }
}

#[async_trait]
impl BusPublisher for MqttBus {
    async fn publish_json(
        &self,
        topic: &str,
        payload: &serde_json::Value,
        qos: QoS,
        retain: bool,
    ) -> Result<(), BridgeError> {
        if self.state() != BusState::Connected {
            return Err(BridgeError::BusNotReady);
        }
        let bytes = serde_json::to_vec(payload)
            .map_err(|e| BridgeError::InvalidPayload(e.to_string()))?;
        self.client
            .publish(topic, qos, retain, bytes)
            .await
            .map_err(|_| BridgeError::BusNotReady)?;
        debug!(topic, "published");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state() == BusState::Connected
    }
}

/// Owns the rumqttc event loop: decodes inbound publishes, re-subscribes on
/// every connect and applies bounded exponential backoff between attempts.
pub struct BusDriver {
    client: AsyncClient,
    eventloop: EventLoop,
    state_tx: watch::Sender<BusState>,
    ingress: mpsc::Sender<BusMessage>,
    shutdown: watch::Receiver<bool>,
    dropped: Arc<AtomicU64>,
}

impl BusDriver {
    /// Drive the connection until shutdown.
    pub async fn run(mut self) {
        let mut backoff = BACKOFF_BASE;
        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
                event = self.eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("connected to broker");
                        let _ = self.state_tx.send(BusState::Connected);
                        backoff = BACKOFF_BASE;
                        BusDriver::resubscribe(&self.client).await;
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        self.handle_publish(&publish.topic, &publish.payload);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = self.state_tx.send(BusState::Disconnected);
                        let delay = jittered(backoff);
                        warn!(error = %e, delay_ms = delay.as_millis() as u64,
                            "broker connection lost, backing off");
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = self.shutdown.changed() => break,
                        }
                        backoff = (backoff * 2).min(BACKOFF_CEILING);
                        let _ = self.state_tx.send(BusState::Connecting);
                    }
                }
            }
            if *self.shutdown.borrow() {
                break;
            }
        }
        let _ = self.state_tx.send(BusState::Disconnected);
        let _ = self.client.disconnect().await;
        info!("bus driver stopped");
    }

    async fn resubscribe(client: &AsyncClient) {
        for (pattern, qos) in SUBSCRIPTIONS {
            match client.subscribe(*pattern, *qos).await {
                Ok(()) => info!(pattern, "subscribed"),
                Err(e) => error!(pattern, error = %e, "subscribe failed"),
            }
        }
    }

    fn handle_publish(&self, topic: &str, payload: &[u8]) {
        let value: serde_json::Value = match serde_json::from_slice(payload) {
            Ok(value) => value,
            Err(e) => {
                // Partial or non-JSON frames never propagate.
                warn!(topic, error = %e, "dropping undecodable payload");
                return;
            }
        };
        let message = BusMessage {
            topic: topic.to_string(),
            payload: value,
        };
        if self.ingress.try_send(message).is_err() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(topic, dropped, "ingress buffer full, message dropped");
        }
    }
}

/// Multiply a backoff delay by a random factor in [0.5, 1.0].
fn jittered(base: Duration) -> Duration {
    let factor = 0.5 + rand::random::<f64>() * 0.5;
    base.mul_f64(factor)
}
