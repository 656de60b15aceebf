//! File-backed append log
//!
//! The log file is opened in append mode for every record and synced before
//! the append returns, so a power cut loses at most the record being written.

use super::{AppendLog, EncodedRecord, StorageError};
use async_trait::async_trait;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind, Lines};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Append log stored as a text file on the node's removable storage
#[derive(Debug)]
pub struct FileAppendLog {
    path: PathBuf,
    // Keeps lines from the relay and retry paths from interleaving
    write_lock: Mutex<()>,
}

impl FileAppendLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Storage counts as mounted when the directory holding the log exists
    fn check_mounted(&self) -> Result<(), StorageError> {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() && !dir.is_dir() => {
                Err(StorageError::Unmounted {
                    path: dir.to_path_buf(),
                })
            }
            _ => Ok(()),
        }
    }

    fn io_error(&self, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Open a single forward pass over the current log contents
    ///
    /// A log that has never been written reads as empty.
    pub fn read_all(&self) -> Result<LogReader, StorageError> {
        self.check_mounted()?;
        match File::open(&self.path) {
            Ok(file) => Ok(LogReader::new(self.path.clone(), Some(file))),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Ok(LogReader::new(self.path.clone(), None))
            }
            Err(e) => Err(self.io_error(e)),
        }
    }

    /// Move the log aside; the next append starts a fresh file
    pub async fn rotate(&self, destination: &Path) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        self.check_mounted()?;
        tokio::fs::rename(&self.path, destination)
            .await
            .map_err(|e| self.io_error(e))?;
        info!(
            "Rotated relay log {} -> {}",
            self.path.display(),
            destination.display()
        );
        Ok(())
    }
}

#[async_trait]
impl AppendLog for FileAppendLog {
    async fn append(&self, record: &EncodedRecord) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        self.check_mounted()?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        file.write_all(record.to_line().as_bytes())
            .await
            .map_err(|e| self.io_error(e))?;
        file.flush().await.map_err(|e| self.io_error(e))?;
        file.sync_data().await.map_err(|e| self.io_error(e))?;

        debug!(
            delivered = record.delivered,
            bytes = record.payload_len(),
            "Appended relay record to {}",
            self.path.display()
        );
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Lazy iterator over the records of a log file
pub struct LogReader {
    path: PathBuf,
    lines: Option<Lines<BufReader<File>>>,
    line_number: usize,
}

impl LogReader {
    fn new(path: PathBuf, file: Option<File>) -> Self {
        Self {
            path,
            lines: file.map(|f| BufReader::new(f).lines()),
            line_number: 0,
        }
    }
}

impl Iterator for LogReader {
    type Item = Result<EncodedRecord, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        let lines = self.lines.as_mut()?;
        loop {
            let line = lines.next()?;
            self.line_number += 1;
            match line {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => return Some(EncodedRecord::parse_line(&line, self.line_number)),
                Err(source) => {
                    return Some(Err(StorageError::Io {
                        path: self.path.clone(),
                        source,
                    }))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_append_writes_one_line_per_record() {
        let dir = TempDir::new().unwrap();
        let log = FileAppendLog::new(dir.path().join("datalogger.csv"));

        log.append(&EncodedRecord::from_payload(&[0xDE, 0xAD, 0xBE, 0xEF], false))
            .await
            .unwrap();
        log.append(&EncodedRecord::from_payload(&[0x01, 0x02], true))
            .await
            .unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(content, "false;DEADBEEF\ntrue;0102\n");
    }

    #[tokio::test]
    async fn test_read_all_round_trip() {
        let dir = TempDir::new().unwrap();
        let log = FileAppendLog::new(dir.path().join("datalogger.csv"));
        log.append(&EncodedRecord::new("AA", true)).await.unwrap();
        log.append(&EncodedRecord::new("BB", false)).await.unwrap();

        let records: Vec<_> = log.read_all().unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(
            records,
            vec![EncodedRecord::new("AA", true), EncodedRecord::new("BB", false)]
        );
    }

    #[test]
    fn test_read_missing_log_is_empty() {
        let dir = TempDir::new().unwrap();
        let log = FileAppendLog::new(dir.path().join("never-written.csv"));
        assert_eq!(log.read_all().unwrap().count(), 0);
    }

    #[test]
    fn test_read_reports_malformed_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("datalogger.csv");
        std::fs::write(&path, "true;00\n\ngarbage\nfalse;11\n").unwrap();

        let results: Vec<_> = FileAppendLog::new(&path).read_all().unwrap().collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(StorageError::Malformed { line_number: 3, .. })
        ));
        assert!(results[2].is_ok());
    }

    #[tokio::test]
    async fn test_append_fails_when_unmounted() {
        let dir = TempDir::new().unwrap();
        let log = FileAppendLog::new(dir.path().join("sdcard").join("datalogger.csv"));

        let result = log.append(&EncodedRecord::new("00", true)).await;
        assert!(matches!(result, Err(StorageError::Unmounted { .. })));
    }

    #[tokio::test]
    async fn test_rotate_starts_fresh_log() {
        let dir = TempDir::new().unwrap();
        let log = FileAppendLog::new(dir.path().join("datalogger.csv"));
        log.append(&EncodedRecord::new("AA", true)).await.unwrap();

        let archived = dir.path().join("datalogger.1.csv");
        log.rotate(&archived).await.unwrap();
        log.append(&EncodedRecord::new("BB", false)).await.unwrap();

        assert_eq!(std::fs::read_to_string(&archived).unwrap(), "true;AA\n");
        assert_eq!(std::fs::read_to_string(log.path()).unwrap(), "false;BB\n");
    }
}
