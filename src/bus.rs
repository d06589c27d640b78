//! MQTT bus gateway.
//!
//! Bridges per-lock validation requests to the validation engine and
//! publishes the approve/reject result back to the lock's response
//! channel. Topics follow `<prefix>/<lock>/<channel>`:
//!
//! - inbound `<prefix>/<lock>/validation` — payload is the raw token;
//! - outbound `<prefix>/<lock>/estado` — payload is `aprobado` or
//!   `rechazado`;
//! - outbound `<prefix>/<lock>/token` — payload is a newly issued
//!   token value.
//!
//! Publishes are best-effort: the access record written by the
//! validation engine is authoritative even if the response message is
//! lost. The event loop is supervised: on connection failure it logs,
//! waits, and retries forever, resubscribing after every reconnect.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, Publish, QoS};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::metrics;
use crate::validation::ValidationEngine;

const VALIDATION_CHANNEL: &str = "validation";
const RESPONSE_CHANNEL: &str = "estado";
const ASSIGN_CHANNEL: &str = "token";

/// Extract the lock label from a validation topic, or `None` if the
/// topic does not match `<prefix>/<lock>/validation` exactly.
#[must_use]
pub fn validation_lock_label<'a>(prefix: &str, topic: &'a str) -> Option<&'a str> {
    let rest = topic.strip_prefix(prefix)?.strip_prefix('/')?;
    let (lock, channel) = rest.split_once('/')?;
    if lock.is_empty() || channel != VALIDATION_CHANNEL {
        return None;
    }
    Some(lock)
}

fn response_topic(prefix: &str, lock: &str) -> String {
    format!("{prefix}/{lock}/{RESPONSE_CHANNEL}")
}

fn assign_topic(prefix: &str, lock: &str) -> String {
    format!("{prefix}/{lock}/{ASSIGN_CHANNEL}")
}

/// Best-effort publisher handle onto the bus.
///
/// Every publish failure is logged and swallowed: the caller's primary
/// operation has already succeeded durably, so transport failures are
/// never surfaced to it.
#[derive(Clone)]
pub struct BusPublisher {
    client: AsyncClient,
    prefix: String,
}

impl BusPublisher {
    /// Publish a newly issued token value to the lock's assign channel.
    pub async fn publish_token(&self, lock_label: &str, token_value: &str) {
        self.publish(ASSIGN_CHANNEL, assign_topic(&self.prefix, lock_label), token_value)
            .await;
    }

    /// Publish a validation decision to the lock's response channel.
    /// `wire` is the literal `aprobado` or `rechazado`.
    pub async fn publish_decision(&self, lock_label: &str, wire: &str) {
        self.publish(RESPONSE_CHANNEL, response_topic(&self.prefix, lock_label), wire)
            .await;
    }

    async fn publish(&self, channel: &str, topic: String, payload: &str) {
        match self
            .client
            .publish(topic.clone(), QoS::AtLeastOnce, false, payload.as_bytes().to_vec())
            .await
        {
            Ok(()) => {
                debug!(topic = %topic, "Published bus message");
                metrics::record_bus_publish(channel, "ok");
            }
            Err(e) => {
                warn!(topic = %topic, error = %e, "Bus publish failed");
                metrics::record_bus_publish(channel, "error");
            }
        }
    }
}

/// Supervised gateway between the bus and the validation engine.
///
/// Per inbound message: extract the token from the payload, validate,
/// publish the two-valued response. Malformed topics are ignored.
pub struct BusGateway {
    client: AsyncClient,
    // Wrapped in a Mutex only to make the type Sync (rumqttc's EventLoop
    // is Send but not Sync); `run` owns `self`, so it is never contended.
    eventloop: std::sync::Mutex<EventLoop>,
    publisher: BusPublisher,
    prefix: String,
    engine: Arc<ValidationEngine>,
    reconnect_delay: Duration,
}

impl BusGateway {
    /// Build the gateway and a publisher handle sharing its client.
    ///
    /// The connection itself is established lazily by [`Self::run`];
    /// while the broker is unreachable, reservation and revocation
    /// still succeed and only the bus side effects are lost.
    #[must_use]
    pub fn connect(config: &Config, engine: Arc<ValidationEngine>) -> (BusPublisher, Self) {
        let mut options =
            MqttOptions::new(&config.mqtt_client_id, &config.mqtt_host, config.mqtt_port);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, eventloop) = AsyncClient::new(options, 64);

        let publisher = BusPublisher {
            client: client.clone(),
            prefix: config.topic_prefix.clone(),
        };
        let gateway = Self {
            client,
            eventloop: std::sync::Mutex::new(eventloop),
            publisher: publisher.clone(),
            prefix: config.topic_prefix.clone(),
            engine,
            reconnect_delay: config.bus_reconnect_delay,
        };
        (publisher, gateway)
    }

    /// Drive the event loop until shutdown. Reconnects with a fixed
    /// delay and unbounded retries, resubscribing to the wildcard
    /// validation channel after every successful (re)connection.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let wildcard = format!("{}/+/{VALIDATION_CHANNEL}", self.prefix);
        loop {
            let event = tokio::select! {
                event = self.eventloop.get_mut().expect("eventloop mutex poisoned").poll() => event,
                _ = shutdown.recv() => {
                    info!("Bus gateway shutting down");
                    break;
                }
            };
            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!(topic = %wildcard, "Connected to bus, subscribing");
                    if let Err(e) =
                        self.client.subscribe(wildcard.clone(), QoS::AtLeastOnce).await
                    {
                        warn!(error = %e, "Bus subscribe failed");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.handle_message(&publish).await;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, delay = ?self.reconnect_delay, "Bus connection error, retrying");
                    metrics::record_bus_reconnect();
                    tokio::time::sleep(self.reconnect_delay).await;
                }
            }
        }
    }

    /// Per-message state machine: received -> validated -> responded.
    async fn handle_message(&self, publish: &Publish) {
        let Some(lock_label) = validation_lock_label(&self.prefix, &publish.topic) else {
            debug!(topic = %publish.topic, "Ignoring message on unexpected topic");
            return;
        };

        let payload = String::from_utf8_lossy(&publish.payload);
        let token_value = payload.trim();

        // The access record is written before the response publish is
        // attempted; the audit trail never depends on the bus.
        let decision = match self.engine.validate(token_value, lock_label, Utc::now()) {
            Ok(decision) => decision,
            Err(e) => {
                warn!(lock = %lock_label, error = %e, "Validation failed, no response published");
                return;
            }
        };

        let wire = decision.wire_str();
        info!(lock = %lock_label, decision = %wire, "Validated bus request");

        self.publisher.publish_decision(lock_label, wire).await;
    }
}
