//! Error taxonomy for the relay
//!
//! Each subsystem reports its own error type; [`RelayError`] groups them into
//! the categories the relay reacts to. None of them stops the process once it
//! is running: link and broker errors are retried inside the supervisor,
//! publish failures go to the fallback slot, storage failures are logged.

use crate::codec::CodecError;
use crate::config::ConfigError;
use crate::storage::StorageError;
use crate::transport::link::LinkError;
use crate::transport::mqtt::MqttError;
use thiserror::Error;

/// Main error type for relay operations
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Network link down: {0}")]
    LinkDown(#[from] LinkError),

    #[error("Broker {broker} unreachable")]
    BrokerUnreachable {
        broker: String,
        #[source]
        source: MqttError,
    },

    #[error("Publish to {topic} failed")]
    PublishFailure {
        topic: String,
        #[source]
        source: MqttError,
    },

    #[error("Encoding error: {0}")]
    Encoding(#[from] CodecError),

    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Shutdown requested")]
    ShuttingDown,
}

impl RelayError {
    pub fn broker_unreachable<S: Into<String>>(broker: S, source: MqttError) -> Self {
        Self::BrokerUnreachable {
            broker: broker.into(),
            source,
        }
    }

    pub fn publish_failure<S: Into<String>>(topic: S, source: MqttError) -> Self {
        Self::PublishFailure {
            topic: topic.into(),
            source,
        }
    }

    /// Whether the supervisor recovers from this error by retrying
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RelayError::LinkDown(_)
                | RelayError::BrokerUnreachable { .. }
                | RelayError::PublishFailure { .. }
                | RelayError::Storage(_)
        )
    }
}

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;
