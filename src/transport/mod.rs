//! Transport layer for the relay
//!
//! Traits at the boundary to the broker clients and the network interfaces,
//! so the relay and supervisor can run against real links or test doubles.

use bytes::Bytes;

pub mod link;
pub mod mqtt;

pub use link::{InterfaceLink, LinkError};
pub use mqtt::{ConnectionState, MqttError, MqttLink};

/// Connection to one MQTT broker
///
/// `publish` only enqueues the message and never waits for the network. It
/// is called from inside the inbound event pump.
#[async_trait::async_trait]
pub trait BrokerLink: Send + Sync {
    /// Perform one connect handshake; returns once the broker acknowledged
    async fn connect(&self) -> Result<(), MqttError>;

    /// Disconnect from the broker
    async fn disconnect(&self) -> Result<(), MqttError>;

    /// Publish a message with QoS 1
    fn publish(&self, topic: &str, payload: Bytes, retain: bool) -> Result<(), MqttError>;

    /// Get current connection state
    fn connection_state(&self) -> ConnectionState;

    /// Description of the last connect or event-loop failure
    fn last_error(&self) -> Option<String>;

    /// Name used in log output
    fn name(&self) -> &str;

    /// Check if the link is currently connected
    fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }
}

/// A network interface that must be up before its broker is reachable
#[async_trait::async_trait]
pub trait NetworkLink: Send + Sync {
    /// Make one association attempt
    async fn associate(&self) -> Result<(), LinkError>;

    /// Whether the interface currently has a link
    fn is_up(&self) -> bool;

    /// Name used in log output
    fn name(&self) -> &str;
}

/// Receiver of messages arriving on a subscribed topic
///
/// Called from inside the broker's event pump. Implementations must return
/// promptly and must not reconnect anything.
#[async_trait::async_trait]
pub trait InboundHandler: Send + Sync {
    async fn on_message(&self, topic: &str, payload: Bytes);
}
