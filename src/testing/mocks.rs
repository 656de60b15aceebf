//! Mock implementations for testing
//!
//! Provides in-memory broker links, network links and an append log so the
//! relay and the supervisor can be exercised without a broker or a radio.

use crate::storage::{AppendLog, EncodedRecord, StorageError};
use crate::transport::link::LinkError;
use crate::transport::mqtt::{ConnectionState, MqttError};
use crate::transport::{BrokerLink, NetworkLink};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// A message captured by [`MockBrokerLink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mock broker link for testing
#[derive(Debug)]
pub struct MockBrokerLink {
    name: String,
    state: Mutex<ConnectionState>,
    reachable: AtomicBool,
    connect_failures_remaining: AtomicUsize,
    publish_fails: AtomicBool,
    connect_attempts: AtomicUsize,
    disconnects: AtomicUsize,
    published: Mutex<Vec<PublishedMessage>>,
    last_error: Mutex<Option<String>>,
}

impl MockBrokerLink {
    /// Disconnected link whose broker accepts connections
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(ConnectionState::Idle),
            reachable: AtomicBool::new(true),
            connect_failures_remaining: AtomicUsize::new(0),
            publish_fails: AtomicBool::new(false),
            connect_attempts: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            published: Mutex::new(Vec::new()),
            last_error: Mutex::new(None),
        }
    }

    /// Link that is already connected
    pub fn connected(name: &str) -> Self {
        let link = Self::new(name);
        *locked(&link.state) = ConnectionState::Connected;
        link
    }

    /// Link whose broker refuses every connection until made reachable
    pub fn unreachable(name: &str) -> Self {
        let link = Self::new(name);
        link.set_reachable(false);
        link
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Refuse the next `count` connection attempts
    pub fn fail_next_connects(&self, count: usize) {
        self.connect_failures_remaining
            .store(count, Ordering::SeqCst);
    }

    /// Make publishes fail while the connection still reports up
    pub fn set_publish_failure(&self, fail: bool) {
        self.publish_fails.store(fail, Ordering::SeqCst);
    }

    /// Simulate the broker dropping the connection
    pub fn drop_connection(&self) {
        *locked(&self.state) = ConnectionState::Disconnected("Connection reset".to_string());
        *locked(&self.last_error) = Some("Connection reset".to_string());
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        locked(&self.published).clone()
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    fn refuse_connection(&self) -> bool {
        if !self.reachable.load(Ordering::SeqCst) {
            return true;
        }
        self.connect_failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
    }
}

#[async_trait]
impl BrokerLink for MockBrokerLink {
    async fn connect(&self) -> Result<(), MqttError> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse_connection() {
            let code = "Server unavailable".to_string();
            *locked(&self.state) = ConnectionState::Disconnected(code.clone());
            *locked(&self.last_error) = Some(code.clone());
            return Err(MqttError::Refused { code });
        }
        *locked(&self.state) = ConnectionState::Connected;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), MqttError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        *locked(&self.state) = ConnectionState::Disconnected("Client disconnected".to_string());
        Ok(())
    }

    fn publish(&self, topic: &str, payload: Bytes, retain: bool) -> Result<(), MqttError> {
        let state = self.connection_state();
        if state != ConnectionState::Connected {
            return Err(MqttError::NotConnected { state });
        }
        if self.publish_fails.load(Ordering::SeqCst) {
            return Err(MqttError::PublishFailed("Mock publish failure".into()));
        }
        locked(&self.published).push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            retain,
        });
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        locked(&self.state).clone()
    }

    fn last_error(&self) -> Option<String> {
        locked(&self.last_error).clone()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Mock network link for testing
#[derive(Debug)]
pub struct MockNetworkLink {
    name: String,
    up: AtomicBool,
    associable: AtomicBool,
    associate_failures_remaining: AtomicUsize,
    associate_attempts: AtomicUsize,
}

impl MockNetworkLink {
    /// Link that is down but comes up on the first association attempt
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            up: AtomicBool::new(false),
            associable: AtomicBool::new(true),
            associate_failures_remaining: AtomicUsize::new(0),
            associate_attempts: AtomicUsize::new(0),
        }
    }

    pub fn up(name: &str) -> Self {
        let link = Self::new(name);
        link.set_up(true);
        link
    }

    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }

    pub fn set_associable(&self, associable: bool) {
        self.associable.store(associable, Ordering::SeqCst);
    }

    /// Fail the next `count` association attempts
    pub fn fail_next_associations(&self, count: usize) {
        self.associate_failures_remaining
            .store(count, Ordering::SeqCst);
    }

    pub fn associate_attempts(&self) -> usize {
        self.associate_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NetworkLink for MockNetworkLink {
    async fn associate(&self) -> Result<(), LinkError> {
        self.associate_attempts.fetch_add(1, Ordering::SeqCst);
        let scripted_failure = self
            .associate_failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok();
        if scripted_failure || !self.associable.load(Ordering::SeqCst) {
            return Err(LinkError::AssociationFailed {
                interface: self.name.clone(),
                reason: "Mock association failure".to_string(),
            });
        }
        self.set_up(true);
        Ok(())
    }

    fn is_up(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Append log kept in memory
#[derive(Debug, Default)]
pub struct MemoryAppendLog {
    records: Mutex<Vec<EncodedRecord>>,
    should_fail: AtomicBool,
}

impl MemoryAppendLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log whose storage behaves as if unmounted
    pub fn with_failure() -> Self {
        let log = Self::default();
        log.set_failure(true);
        log
    }

    pub fn set_failure(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<EncodedRecord> {
        locked(&self.records).clone()
    }

    /// Records rendered as they would appear in the log file
    pub fn lines(&self) -> Vec<String> {
        locked(&self.records)
            .iter()
            .map(EncodedRecord::to_line)
            .collect()
    }
}

#[async_trait]
impl AppendLog for MemoryAppendLog {
    async fn append(&self, record: &EncodedRecord) -> Result<(), StorageError> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(StorageError::Unmounted {
                path: PathBuf::from("/sdcard"),
            });
        }
        locked(&self.records).push(record.clone());
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_broker_connect_and_publish() {
        let link = MockBrokerLink::new("remote");
        assert!(link
            .publish("t", Bytes::from_static(b"x"), true)
            .is_err());

        link.connect().await.unwrap();
        link.publish("t", Bytes::from_static(b"x"), true).unwrap();
        assert_eq!(
            link.published(),
            vec![PublishedMessage {
                topic: "t".to_string(),
                payload: b"x".to_vec(),
                retain: true,
            }]
        );
    }

    #[tokio::test]
    async fn test_mock_broker_scripted_failures() {
        let link = MockBrokerLink::new("remote");
        link.fail_next_connects(2);
        assert!(link.connect().await.is_err());
        assert!(link.connect().await.is_err());
        assert!(link.connect().await.is_ok());
        assert_eq!(link.connect_attempts(), 3);
        assert_eq!(link.last_error().as_deref(), Some("Server unavailable"));
    }

    #[tokio::test]
    async fn test_mock_network_link() {
        let link = MockNetworkLink::new("wireless");
        link.fail_next_associations(1);
        assert!(link.associate().await.is_err());
        assert!(!link.is_up());
        assert!(link.associate().await.is_ok());
        assert!(link.is_up());
    }

    #[tokio::test]
    async fn test_memory_log_failure_mode() {
        let log = MemoryAppendLog::with_failure();
        let record = EncodedRecord::from_payload(&[1, 2], true);
        assert!(log.append(&record).await.is_err());

        log.set_failure(false);
        log.append(&record).await.unwrap();
        assert_eq!(log.lines(), vec!["true;0102\n".to_string()]);
    }
}
