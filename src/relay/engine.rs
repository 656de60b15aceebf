//! Inbound message path
//!
//! Runs inside the local broker's event pump. A message gets exactly one
//! publish attempt on the remote broker; nothing here waits for a reconnect.

use super::{append_record, FallbackSlot, RelayMessage};
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::observability::metrics;
use crate::storage::{AppendLog, EncodedRecord};
use crate::transport::{BrokerLink, InboundHandler};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

/// What happened to one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Published to the remote broker
    Delivered,
    /// Parked in the fallback slot
    Deferred,
    /// Not on the source topic
    Ignored,
}

pub struct RelayEngine {
    remote: Arc<dyn BrokerLink>,
    slot: Arc<FallbackSlot>,
    log: Arc<dyn AppendLog>,
    source_topic: String,
    destination_topic: String,
}

impl RelayEngine {
    pub fn new(
        remote: Arc<dyn BrokerLink>,
        slot: Arc<FallbackSlot>,
        log: Arc<dyn AppendLog>,
        source_topic: impl Into<String>,
        destination_topic: impl Into<String>,
    ) -> Self {
        Self {
            remote,
            slot,
            log,
            source_topic: source_topic.into(),
            destination_topic: destination_topic.into(),
        }
    }

    /// Engine relaying the configured local topic to the configured remote topic
    pub fn from_config(
        config: &RelayConfig,
        remote: Arc<dyn BrokerLink>,
        slot: Arc<FallbackSlot>,
        log: Arc<dyn AppendLog>,
    ) -> Self {
        Self::new(
            remote,
            slot,
            log,
            config.local.topic.clone(),
            config.remote.topic.clone(),
        )
    }

    pub fn source_topic(&self) -> &str {
        &self.source_topic
    }

    pub fn destination_topic(&self) -> &str {
        &self.destination_topic
    }

    /// Forward one message received from the local broker
    pub async fn on_message(&self, topic: &str, payload: Bytes) -> RelayOutcome {
        if topic != self.source_topic {
            metrics().message_ignored();
            debug!("Ignoring message on unexpected topic {}", topic);
            return RelayOutcome::Ignored;
        }

        metrics().message_received();
        let message = RelayMessage::new(topic, self.destination_topic.as_str(), payload);
        let span = crate::relay_span!(
            bytes = message.len(),
            destination = %message.destination_topic
        );
        self.forward(message).instrument(span).await
    }

    async fn forward(&self, message: RelayMessage) -> RelayOutcome {
        match self
            .remote
            .publish(&message.destination_topic, message.payload.clone(), true)
        {
            Ok(()) => {
                metrics().message_delivered();
                info!("Relayed {} bytes to {}", message.len(), message.destination_topic);
                let record = EncodedRecord::from_payload(&message.payload, true);
                append_record(self.log.as_ref(), record).await;
                RelayOutcome::Delivered
            }
            Err(e) => {
                let reason = e.to_string();
                let error = RelayError::publish_failure(message.destination_topic.as_str(), e);
                warn!("{} ({}), keeping message for retry", error, reason);

                let displaced = self.slot.store(&message.payload);
                if let Some(dropped) = &displaced {
                    warn!(
                        "Fallback slot overwritten, dropped pending {}-byte message",
                        dropped.length
                    );
                }
                metrics().slot_stored(displaced.is_some());
                metrics().message_deferred();
                let record = EncodedRecord::from_payload(&message.payload, false);
                append_record(self.log.as_ref(), record).await;
                RelayOutcome::Deferred
            }
        }
    }
}

#[async_trait]
impl InboundHandler for RelayEngine {
    async fn on_message(&self, topic: &str, payload: Bytes) {
        let outcome = RelayEngine::on_message(self, topic, payload).await;
        debug!("Relay outcome: {:?}", outcome);
    }
}
