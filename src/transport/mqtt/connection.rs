//! Pure connection state management for MQTT links
//!
//! This module contains pure functions for connection state management,
//! broker option construction, and error classification.

use crate::config::{BrokerSection, MAX_TOPIC_LENGTH};
use rumqttc::{ConnectReturnCode, ConnectionError, MqttOptions, Transport as RumqttcTransport};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Connection state of one broker link
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Never connected
    Idle,
    /// Handshake in progress
    Connecting,
    /// CONNACK received, ready to publish
    Connected,
    /// Disconnected with reason
    Disconnected(String),
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Broker refused connection: {code}")]
    Refused { code: String },
    #[error("No CONNACK within {0:?}")]
    ConnAckTimeout(Duration),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Payload of {size} bytes exceeds maximum of {max}")]
    PayloadTooLarge { size: usize, max: usize },
}

/// PUBLISH bytes besides payload and topic: fixed header, topic length
/// prefix and packet id
const PUBLISH_OVERHEAD: usize = 5 + 2 + 2;

/// Packet size limit that lets a payload of `max_message_size` bytes through
/// on any configured topic
pub fn packet_size_limit(max_message_size: usize) -> usize {
    max_message_size + MAX_TOPIC_LENGTH + PUBLISH_OVERHEAD
}

/// Pure function to configure MQTT options from a broker section
pub fn configure_mqtt_options(
    section: &BrokerSection,
    max_message_size: usize,
) -> Result<MqttOptions, MqttError> {
    // Parse broker URL to extract host and port
    let url = Url::parse(&section.broker_url)
        .map_err(|_| MqttError::InvalidBrokerUrl(section.broker_url.clone()))?;

    let host = url
        .host_str()
        .ok_or_else(|| MqttError::InvalidBrokerUrl(section.broker_url.clone()))?;
    let port = url
        .port()
        .unwrap_or(if url.scheme() == "mqtts" { 8883 } else { 1883 });

    let mut mqtt_options = MqttOptions::new(section.client_id.clone(), host, port);

    if url.scheme() == "mqtts" {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some((username, password)) = section.credentials() {
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(Duration::from_secs(section.keep_alive_secs));
    mqtt_options.set_clean_session(true);

    let limit = packet_size_limit(max_message_size);
    mqtt_options.set_max_packet_size(limit, limit);

    Ok(mqtt_options)
}

/// Render the broker's error in the form logged after each failed attempt
pub fn describe_connection_error(error: &ConnectionError) -> String {
    match error {
        ConnectionError::ConnectionRefused(code) => describe_return_code(*code),
        other => other.to_string(),
    }
}

/// Human-readable CONNACK return code
pub fn describe_return_code(code: ConnectReturnCode) -> String {
    match code {
        ConnectReturnCode::Success => "accepted".to_string(),
        ConnectReturnCode::RefusedProtocolVersion => "refused: protocol version".to_string(),
        ConnectReturnCode::BadClientId => "refused: client identifier".to_string(),
        ConnectReturnCode::ServiceUnavailable => "refused: server unavailable".to_string(),
        ConnectReturnCode::BadUserNamePassword => "refused: bad username or password".to_string(),
        ConnectReturnCode::NotAuthorized => "refused: not authorized".to_string(),
    }
}
