//! MQTT broker links
//!
//! The module is split into focused sub-modules:
//!
//! - [`connection`] - Pure connection state management and configuration
//! - [`message_handler`] - Pure event routing
//! - [`client`] - Impure I/O operations and the event pump
//!
//! # Usage
//!
//! ```rust,no_run
//! use dualnet_relay::config::RelayConfig;
//! use dualnet_relay::transport::mqtt::MqttLink;
//! use dualnet_relay::transport::BrokerLink;
//!
//! # tokio_test::block_on(async {
//! let config = RelayConfig::test_config();
//! let link = MqttLink::new("remote", config.remote.clone(), 65535);
//! link.connect().await?;
//! link.publish(&config.remote.topic, bytes::Bytes::from_static(b"\x01\x02"), true)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::MqttLink;
pub use connection::{ConnectionState, MqttError};
pub use message_handler::{EventRoute, MessageHandler};
