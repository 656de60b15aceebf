//! Thread-safe metrics collection system
//!
//! Atomic counters for the relay path, the fallback slot and the broker
//! connections. A [`MetricsSnapshot`] is serializable so it can be logged as
//! one structured record.

use crate::supervisor::NetworkPath;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Connection counters for one broker
#[derive(Default)]
struct BrokerCounters {
    connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
}

impl BrokerCounters {
    fn snapshot(&self) -> BrokerMetrics {
        BrokerMetrics {
            connected: self.connected.load(Ordering::Relaxed),
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            connections_established: self.connections_established.load(Ordering::Relaxed),
            connection_failures: self.connection_failures.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.connected.store(false, Ordering::Relaxed);
        self.connection_attempts.store(0, Ordering::Relaxed);
        self.connections_established.store(0, Ordering::Relaxed);
        self.connection_failures.store(0, Ordering::Relaxed);
    }
}

/// Thread-safe metrics collector using atomics
pub struct MetricsCollector {
    // Relay path
    messages_received: AtomicU64,
    messages_delivered: AtomicU64,
    messages_deferred: AtomicU64,
    messages_ignored: AtomicU64,

    // Fallback slot
    slot_occupied: AtomicBool,
    slot_overwrites: AtomicU64,
    redeliveries: AtomicU64,
    redelivery_failures: AtomicU64,
    decode_failures: AtomicU64,

    // Persistent log
    records_appended: AtomicU64,
    storage_failures: AtomicU64,

    local_broker: BrokerCounters,
    remote_broker: BrokerCounters,

    uptime_start: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            messages_delivered: AtomicU64::new(0),
            messages_deferred: AtomicU64::new(0),
            messages_ignored: AtomicU64::new(0),
            slot_occupied: AtomicBool::new(false),
            slot_overwrites: AtomicU64::new(0),
            redeliveries: AtomicU64::new(0),
            redelivery_failures: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            records_appended: AtomicU64::new(0),
            storage_failures: AtomicU64::new(0),
            local_broker: BrokerCounters::default(),
            remote_broker: BrokerCounters::default(),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    fn broker(&self, path: NetworkPath) -> &BrokerCounters {
        match path {
            NetworkPath::Local => &self.local_broker,
            NetworkPath::Remote => &self.remote_broker,
        }
    }

    // Relay path metrics
    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_delivered(&self) {
        self.messages_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_deferred(&self) {
        self.messages_deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_ignored(&self) {
        self.messages_ignored.fetch_add(1, Ordering::Relaxed);
    }

    // Fallback slot metrics
    pub fn slot_stored(&self, overwrote: bool) {
        self.slot_occupied.store(true, Ordering::Relaxed);
        if overwrote {
            self.slot_overwrites.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn slot_cleared(&self) {
        self.slot_occupied.store(false, Ordering::Relaxed);
    }

    pub fn redelivered(&self) {
        self.redeliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn redelivery_failed(&self) {
        self.redelivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_failed(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Storage metrics
    pub fn record_appended(&self) {
        self.records_appended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn storage_failed(&self) {
        self.storage_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Broker connection metrics
    pub fn broker_connection_attempt(&self, path: NetworkPath) {
        self.broker(path)
            .connection_attempts
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn broker_connection_established(&self, path: NetworkPath) {
        let broker = self.broker(path);
        broker.connections_established.fetch_add(1, Ordering::Relaxed);
        broker.connected.store(true, Ordering::Relaxed);
    }

    pub fn broker_connection_failed(&self, path: NetworkPath) {
        let broker = self.broker(path);
        broker.connection_failures.fetch_add(1, Ordering::Relaxed);
        broker.connected.store(false, Ordering::Relaxed);
    }

    pub fn broker_connection_lost(&self, path: NetworkPath) {
        self.broker(path).connected.store(false, Ordering::Relaxed);
    }

    // Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.messages_received,
            &self.messages_delivered,
            &self.messages_deferred,
            &self.messages_ignored,
            &self.slot_overwrites,
            &self.redeliveries,
            &self.redelivery_failures,
            &self.decode_failures,
            &self.records_appended,
            &self.storage_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.slot_occupied.store(false, Ordering::Relaxed);
        self.local_broker.reset();
        self.remote_broker.reset();
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
    }

    /// Take a consistent-enough snapshot of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        MetricsSnapshot {
            timestamp: now,
            uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            relay: RelayMetrics {
                received: self.messages_received.load(Ordering::Relaxed),
                delivered: self.messages_delivered.load(Ordering::Relaxed),
                deferred: self.messages_deferred.load(Ordering::Relaxed),
                ignored: self.messages_ignored.load(Ordering::Relaxed),
            },
            fallback: FallbackMetrics {
                occupied: self.slot_occupied.load(Ordering::Relaxed),
                overwrites: self.slot_overwrites.load(Ordering::Relaxed),
                redeliveries: self.redeliveries.load(Ordering::Relaxed),
                redelivery_failures: self.redelivery_failures.load(Ordering::Relaxed),
                decode_failures: self.decode_failures.load(Ordering::Relaxed),
            },
            storage: StorageMetrics {
                records_appended: self.records_appended.load(Ordering::Relaxed),
                failures: self.storage_failures.load(Ordering::Relaxed),
            },
            local_broker: self.local_broker.snapshot(),
            remote_broker: self.remote_broker.snapshot(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: u64,
    pub uptime_seconds: u64,
    pub relay: RelayMetrics,
    pub fallback: FallbackMetrics,
    pub storage: StorageMetrics,
    pub local_broker: BrokerMetrics,
    pub remote_broker: BrokerMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelayMetrics {
    pub received: u64,
    pub delivered: u64,
    pub deferred: u64,
    pub ignored: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FallbackMetrics {
    pub occupied: bool,
    /// Deferred messages lost because a newer failure replaced them
    pub overwrites: u64,
    pub redeliveries: u64,
    pub redelivery_failures: u64,
    pub decode_failures: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageMetrics {
    pub records_appended: u64,
    pub failures: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BrokerMetrics {
    pub connected: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
