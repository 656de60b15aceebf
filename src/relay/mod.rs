//! Store-and-forward relay
//!
//! [`RelayEngine`] forwards every message from the local broker to the remote
//! broker once, parking a failed message in the [`FallbackSlot`].
//! [`RetryLoop`] drains the slot after the remote path comes back.

pub mod engine;
pub mod fallback;
pub mod retry;

pub use engine::{RelayEngine, RelayOutcome};
pub use fallback::{FallbackMessage, FallbackSlot, SlotEntry};
pub use retry::{Redelivery, RetryLoop, TickOutcome};

use crate::codec;
use crate::error::RelayError;
use crate::observability::metrics;
use crate::storage::{self, AppendLog, EncodedRecord, StorageError};
use bytes::Bytes;
use tracing::{debug, error, info, warn};

/// A message travelling from the source topic to the destination topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMessage {
    pub source_topic: String,
    pub destination_topic: String,
    pub payload: Bytes,
}

impl RelayMessage {
    pub fn new(
        source_topic: impl Into<String>,
        destination_topic: impl Into<String>,
        payload: Bytes,
    ) -> Self {
        Self {
            source_topic: source_topic.into(),
            destination_topic: destination_topic.into(),
            payload,
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Append one relay attempt to the log; failures are logged and swallowed
pub(crate) async fn append_record(log: &dyn AppendLog, record: EncodedRecord) {
    match log.append(&record).await {
        Ok(()) => {
            metrics().record_appended();
            debug!(
                "Appended {}-byte record (delivered={}, dropped={}) to {}",
                record.payload_len(),
                record.delivered,
                record.dropped,
                log.location()
            );
        }
        Err(e) => {
            metrics().storage_failed();
            error!("Failed to log relay attempt to {}: {}", log.location(), RelayError::from(e));
        }
    }
}

/// Rebuild the fallback slot from the records of a previous run
///
/// Malformed lines are skipped. A recovered payload that does not decode is
/// not restored.
pub fn restore_from_log<I>(slot: &FallbackSlot, records: I) -> Option<SlotEntry>
where
    I: IntoIterator<Item = Result<EncodedRecord, StorageError>>,
{
    let valid = records.into_iter().filter_map(|record| match record {
        Ok(record) => Some(record),
        Err(e) => {
            warn!("Skipping log record: {}", e);
            None
        }
    });
    let record = storage::recover_fallback(valid)?;

    if let Err(e) = codec::decode(&record.hex_payload) {
        warn!("Not restoring undecodable fallback record: {}", e);
        return None;
    }
    slot.restore(&record);
    metrics().slot_stored(false);
    info!("Restored {}-byte undelivered message into the fallback slot", record.payload_len());
    slot.peek()
}
