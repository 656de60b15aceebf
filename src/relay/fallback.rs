//! Single-entry retry buffer
//!
//! Holds the most recent message that could not be delivered to the remote
//! broker. A newer failure replaces an older one (last failure wins); the
//! retry loop drains it once connectivity returns.

use crate::codec::{self, CodecError};
use crate::storage::EncodedRecord;
use std::sync::{Mutex, MutexGuard};

/// Stored form of an undelivered message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotEntry {
    pub hex_payload: String,
    pub length: usize,
}

/// Message taken out of the slot, ready to republish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackMessage {
    pub payload: Vec<u8>,
    pub length: usize,
}

#[derive(Debug, Default)]
pub struct FallbackSlot {
    entry: Mutex<Option<SlotEntry>>,
}

impl FallbackSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, Option<SlotEntry>> {
        // The critical sections never panic mid-update, so a poisoned lock
        // still holds a consistent value.
        self.entry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the slot content with `payload`, returning what was displaced
    pub fn store(&self, payload: &[u8]) -> Option<SlotEntry> {
        let entry = SlotEntry {
            hex_payload: codec::encode(payload),
            length: payload.len(),
        };
        self.guard().replace(entry)
    }

    /// Install an entry recovered from the append log
    pub fn restore(&self, record: &EncodedRecord) -> Option<SlotEntry> {
        let entry = SlotEntry {
            hex_payload: record.hex_payload.clone(),
            length: record.payload_len(),
        };
        self.guard().replace(entry)
    }

    /// Take the pending message, clearing the slot
    ///
    /// The slot is emptied in the same critical section that reads it, so
    /// concurrent callers never both receive the same message. A stored value
    /// that fails to decode is still removed.
    pub fn take_if_present(&self) -> Result<Option<FallbackMessage>, CodecError> {
        let Some(entry) = self.guard().take() else {
            return Ok(None);
        };
        let payload = codec::decode_with_length(&entry.hex_payload, entry.length)?;
        Ok(Some(FallbackMessage {
            payload,
            length: entry.length,
        }))
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_none()
    }

    /// Copy of the current content without taking it
    pub fn peek(&self) -> Option<SlotEntry> {
        self.guard().clone()
    }
}
