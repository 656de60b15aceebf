//! Append-only persistence of relay attempts
//!
//! Every forward attempt is recorded as one line in a text log. The log is the
//! audit trail of the relay and the source from which the fallback slot is
//! rebuilt after a restart.

pub mod file_log;
pub mod record;

pub use file_log::{FileAppendLog, LogReader};
pub use record::EncodedRecord;

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

/// Storage failures reported by an [`AppendLog`]
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage not mounted: {} does not exist", .path.display())]
    Unmounted { path: PathBuf },
    #[error("I/O error on {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed log record at line {line_number}: {reason}")]
    Malformed { line_number: usize, reason: String },
}

/// Append-only record of relay attempts
///
/// Implementations must make a record durable before `append` returns.
#[async_trait]
pub trait AppendLog: Send + Sync {
    /// Append one record
    async fn append(&self, record: &EncodedRecord) -> Result<(), StorageError>;

    /// Human-readable location, used in log output
    fn location(&self) -> String;
}

/// Find the record the fallback slot held when the process last stopped
///
/// That is the most recent undelivered record, unless a later delivered or
/// dropped record carries the identical payload (the slot was drained).
pub fn recover_fallback<I>(records: I) -> Option<EncodedRecord>
where
    I: IntoIterator<Item = EncodedRecord>,
{
    let mut pending: Option<EncodedRecord> = None;
    for record in records {
        if !record.clears_fallback() {
            pending = Some(record);
        } else if pending
            .as_ref()
            .is_some_and(|p| p.hex_payload == record.hex_payload)
        {
            pending = None;
        }
    }
    pending
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(hex: &str, delivered: bool) -> EncodedRecord {
        EncodedRecord::new(hex, delivered)
    }

    #[test]
    fn test_recover_empty_log() {
        assert_eq!(recover_fallback(Vec::new()), None);
    }

    #[test]
    fn test_recover_last_undelivered() {
        let records = vec![rec("01", true), rec("02", false), rec("03", true)];
        assert_eq!(recover_fallback(records), Some(rec("02", false)));
    }

    #[test]
    fn test_recover_last_failure_wins() {
        let records = vec![rec("AA", false), rec("BB", false)];
        assert_eq!(recover_fallback(records), Some(rec("BB", false)));
    }

    #[test]
    fn test_recover_skips_redelivered() {
        let records = vec![rec("AA", false), rec("01", true), rec("AA", true)];
        assert_eq!(recover_fallback(records), None);
    }

    #[test]
    fn test_recover_skips_dropped() {
        let records = vec![rec("AA", false), EncodedRecord::dropped("AA")];
        assert_eq!(recover_fallback(records), None);

        let records = vec![rec("AA", false), EncodedRecord::dropped("AA"), rec("BB", false)];
        assert_eq!(recover_fallback(records), Some(rec("BB", false)));
    }

    #[test]
    fn test_redelivery_of_older_message_does_not_clear_newer() {
        let records = vec![rec("AA", false), rec("BB", false), rec("AA", true)];
        assert_eq!(recover_fallback(records), Some(rec("BB", false)));
    }
}
