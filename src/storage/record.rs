//! Log record representation and line format
//!
//! One line per relay attempt: `true;` or `false;` followed by the uppercase
//! hex payload and a line break. A fallback message given up after a failed
//! redelivery is marked with a `dropped;` line.

use super::StorageError;
use crate::codec;
use serde::Serialize;

/// Hex-encoded payload together with its delivery flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodedRecord {
    pub hex_payload: String,
    pub delivered: bool,
    /// Fallback message discarded without delivery
    pub dropped: bool,
}

impl EncodedRecord {
    pub fn new(hex_payload: impl Into<String>, delivered: bool) -> Self {
        Self {
            hex_payload: hex_payload.into(),
            delivered,
            dropped: false,
        }
    }

    /// Marker for a fallback message that was taken and then lost
    pub fn dropped(hex_payload: impl Into<String>) -> Self {
        Self {
            dropped: true,
            ..Self::new(hex_payload, false)
        }
    }

    /// Whether this record settles an earlier undelivered record
    pub fn clears_fallback(&self) -> bool {
        self.delivered || self.dropped
    }

    /// Encode a raw payload into a record
    pub fn from_payload(payload: &[u8], delivered: bool) -> Self {
        Self::new(codec::encode(payload), delivered)
    }

    /// Byte length of the payload this record encodes
    pub fn payload_len(&self) -> usize {
        self.hex_payload.len() / 2
    }

    /// Render as a log line, including the trailing newline
    pub fn to_line(&self) -> String {
        if self.dropped {
            format!("dropped;{}\n", self.hex_payload)
        } else {
            format!("{};{}\n", self.delivered, self.hex_payload)
        }
    }

    /// Parse one log line (without its line terminator)
    pub fn parse_line(line: &str, line_number: usize) -> Result<Self, StorageError> {
        let line = line.trim_end_matches('\r');
        let (flag, hex_payload) = line.split_once(';').ok_or_else(|| StorageError::Malformed {
            line_number,
            reason: "missing ';' separator".to_string(),
        })?;

        let delivered = match flag {
            "true" => true,
            "false" => false,
            "dropped" => return Ok(Self::dropped(hex_payload)),
            other => {
                return Err(StorageError::Malformed {
                    line_number,
                    reason: format!("unknown delivery flag {other:?}"),
                })
            }
        };

        Ok(Self::new(hex_payload, delivered))
    }
}
