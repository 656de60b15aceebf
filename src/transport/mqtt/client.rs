//! Impure I/O operations for MQTT links
//!
//! Each [`MqttLink`] owns one rumqttc client and the task that pumps its event
//! loop. The pump never reconnects on its own: when the connection drops it
//! records the reason and stops, and reconnection is left to the supervisor.

use super::connection::{
    configure_mqtt_options, describe_connection_error, ConnectionState, MqttError,
};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::BrokerSection;
use crate::transport::{BrokerLink, InboundHandler};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, EventLoop, QoS};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the client's outgoing request queue
const REQUEST_QUEUE_CAPACITY: usize = 64;

/// State shared between a link and its pump task
struct LinkShared {
    name: String,
    state_tx: watch::Sender<ConnectionState>,
    last_error: Mutex<Option<String>>,
}

impl LinkShared {
    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn record_error(&self, description: String) {
        *self
            .last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(description);
    }
}

/// MQTT connection to one broker
pub struct MqttLink {
    shared: Arc<LinkShared>,
    subscription: Option<Arc<str>>,
    handler: Option<Arc<dyn InboundHandler>>,
    section: BrokerSection,
    max_message_size: usize,
    connect_timeout: Duration,
    client: Mutex<Option<AsyncClient>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl MqttLink {
    pub fn new(name: &str, section: BrokerSection, max_message_size: usize) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Self {
            shared: Arc::new(LinkShared {
                name: name.to_string(),
                state_tx,
                last_error: Mutex::new(None),
            }),
            subscription: None,
            handler: None,
            section,
            max_message_size,
            connect_timeout: Duration::from_secs(10),
            client: Mutex::new(None),
            pump: Mutex::new(None),
        }
    }

    /// Subscribe to `topic` on every successful connection
    pub fn with_subscription(mut self, topic: impl Into<String>) -> Self {
        let topic: String = topic.into();
        self.subscription = Some(Arc::from(topic));
        self
    }

    /// Deliver messages received on the subscription to `handler`
    pub fn with_inbound_handler(mut self, handler: Arc<dyn InboundHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn current_client(&self) -> Option<AsyncClient> {
        self.client
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn replace_pump(&self, handle: Option<JoinHandle<()>>) {
        let previous = std::mem::replace(
            &mut *self.pump.lock().unwrap_or_else(|p| p.into_inner()),
            handle,
        );
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Wait for connection confirmation (CONNACK) with timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let result = tokio::time::timeout(timeout, async {
            loop {
                match &*state_rx.borrow_and_update() {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected(reason) => {
                        return Err(MqttError::ConnectionFailed(reason.clone().into()))
                    }
                    ConnectionState::Idle | ConnectionState::Connecting => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailed(
                        "State channel closed".to_string().into(),
                    ));
                }
            }
        })
        .await;

        result.unwrap_or(Err(MqttError::ConnAckTimeout(timeout)))
    }

    /// Drive the event loop until the connection ends
    async fn run_pump(
        shared: Arc<LinkShared>,
        subscription: Option<Arc<str>>,
        handler: Option<Arc<dyn InboundHandler>>,
        client: AsyncClient,
        mut event_loop: EventLoop,
    ) {
        loop {
            let event = match event_loop.poll().await {
                Ok(event) => event,
                Err(e) => {
                    let description = describe_connection_error(&e);
                    error!("MQTT {} event loop error: {}", shared.name, description);
                    shared.record_error(description.clone());
                    shared.set_state(ConnectionState::Disconnected(description));
                    break;
                }
            };

            match MessageHandler::route_mqtt_event(&event) {
                EventRoute::ConnectionAcknowledged => {
                    info!("MQTT {} connection acknowledged", shared.name);
                    if let Some(topic) = &subscription {
                        if let Err(e) = client.try_subscribe(topic.to_string(), QoS::AtLeastOnce) {
                            error!("Failed to subscribe {} to {}: {}", shared.name, topic, e);
                        }
                    }
                    shared.set_state(ConnectionState::Connected);
                }
                EventRoute::MessageReceived { topic, payload, retain } => {
                    debug!(
                        target: "mqtt_transport",
                        "{} received {} bytes on {} (retain={})",
                        shared.name,
                        payload.len(),
                        topic,
                        retain
                    );
                    if !MessageHandler::matches_subscription(&topic, subscription.as_deref()) {
                        continue;
                    }
                    match &handler {
                        Some(handler) => handler.on_message(&topic, payload).await,
                        None => debug!("No inbound handler on {}, message dropped", shared.name),
                    }
                }
                EventRoute::Disconnected => {
                    warn!("MQTT broker disconnected {}", shared.name);
                    shared.set_state(ConnectionState::Disconnected(
                        "Broker disconnected".to_string(),
                    ));
                    break;
                }
                EventRoute::SubscriptionConfirmed { packet_id, granted } => {
                    if granted {
                        debug!(
                            target: "mqtt_transport",
                            "{} subscription {} confirmed",
                            shared.name,
                            packet_id
                        );
                    } else {
                        error!("{} subscription {} refused by broker", shared.name, packet_id);
                    }
                }
                EventRoute::InfrastructureEvent(event_str) => {
                    tracing::trace!(
                        target: "mqtt_transport",
                        "{} event: {}",
                        shared.name,
                        event_str
                    );
                }
                EventRoute::OutgoingEvent => {}
            }
        }
        debug!("MQTT {} pump stopped", shared.name);
    }
}

#[async_trait]
impl BrokerLink for MqttLink {
    async fn connect(&self) -> Result<(), MqttError> {
        // A new event loop replaces whatever is left of the old connection
        self.replace_pump(None);

        let options = configure_mqtt_options(&self.section, self.max_message_size)?;
        let (client, event_loop) = AsyncClient::new(options, REQUEST_QUEUE_CAPACITY);
        *self.client.lock().unwrap_or_else(|p| p.into_inner()) = Some(client.clone());

        self.shared.set_state(ConnectionState::Connecting);
        let state_rx = self.shared.state_tx.subscribe();

        let handle = tokio::spawn(Self::run_pump(
            self.shared.clone(),
            self.subscription.clone(),
            self.handler.clone(),
            client,
            event_loop,
        ));
        self.replace_pump(Some(handle));

        match Self::wait_for_connection_confirmation(state_rx, self.connect_timeout).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.replace_pump(None);
                self.client.lock().unwrap_or_else(|p| p.into_inner()).take();
                if let MqttError::ConnAckTimeout(_) = e {
                    self.shared.record_error(e.to_string());
                }
                self.shared
                    .set_state(ConnectionState::Disconnected(e.to_string()));
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> Result<(), MqttError> {
        let client = self
            .client
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(client) = client {
            if let Err(e) = client.try_disconnect() {
                warn!("MQTT {} disconnect request failed: {}", self.shared.name, e);
            }
            // Let the pump flush the DISCONNECT packet
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        self.replace_pump(None);
        self.shared
            .set_state(ConnectionState::Disconnected("Client disconnected".to_string()));
        info!("MQTT {} disconnected", self.shared.name);
        Ok(())
    }

    fn publish(&self, topic: &str, payload: Bytes, retain: bool) -> Result<(), MqttError> {
        let state = self.connection_state();
        if state != ConnectionState::Connected {
            return Err(MqttError::NotConnected { state });
        }
        if payload.len() > self.max_message_size {
            return Err(MqttError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_message_size,
            });
        }

        let client = self
            .current_client()
            .ok_or(MqttError::NotConnected { state })?;
        client
            .try_publish(topic, QoS::AtLeastOnce, retain, payload.to_vec())
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))
    }

    fn connection_state(&self) -> ConnectionState {
        self.shared.state_tx.borrow().clone()
    }

    fn last_error(&self) -> Option<String> {
        self.shared
            .last_error
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn name(&self) -> &str {
        &self.shared.name
    }
}

impl Drop for MqttLink {
    fn drop(&mut self) {
        self.replace_pump(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;

    fn unreachable_link() -> MqttLink {
        let mut section = RelayConfig::test_config().remote;
        // Reserved port on loopback, nothing listens there
        section.broker_url = "mqtt://127.0.0.1:1".to_string();
        MqttLink::new("remote", section, 65535).with_connect_timeout(Duration::from_secs(2))
    }

    #[test]
    fn test_new_link_is_idle() {
        let link = unreachable_link();
        assert_eq!(link.connection_state(), ConnectionState::Idle);
        assert!(!link.is_connected());
        assert_eq!(link.last_error(), None);
        assert_eq!(link.name(), "remote");
    }

    #[test]
    fn test_publish_requires_connection() {
        let link = unreachable_link();
        let result = link.publish("eui-a84041446184392f/up", Bytes::from_static(b"x"), true);
        assert!(matches!(
            result,
            Err(MqttError::NotConnected {
                state: ConnectionState::Idle
            })
        ));
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_broker_fails() {
        let link = unreachable_link();
        let result = link.connect().await;

        assert!(result.is_err());
        assert!(matches!(
            link.connection_state(),
            ConnectionState::Disconnected(_)
        ));
        assert!(link.last_error().is_some());
    }

    #[test]
    fn test_builders_configure_subscription() {
        let link = unreachable_link().with_subscription("v3/datalogger/devices/x/up");
        assert_eq!(
            link.subscription.as_deref(),
            Some("v3/datalogger/devices/x/up")
        );
        assert!(link.handler.is_none());
    }
}
