//! Background reconnect-and-redeliver loop
//!
//! Every tick checks the remote path. While the remote broker stays connected
//! a tick does nothing else. Once the remote path has been restored, the
//! fallback slot is drained with a single republish. The local broker is
//! watched on the same period from a separate loop, so a local outage never
//! delays the drain.

use super::{append_record, FallbackSlot};
use crate::codec;
use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult};
use crate::observability::metrics;
use crate::storage::{AppendLog, EncodedRecord};
use crate::supervisor::ConnectionSupervisor;
use crate::transport::BrokerLink;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn, Instrument};

/// Result of draining the fallback slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redelivery {
    /// Nothing was pending
    SlotEmpty,
    /// Pending message republished
    Delivered { length: usize },
    /// Republish failed; the message is dropped and marked in the log
    Failed { length: usize },
    /// Slot content could not be decoded and was discarded
    Corrupt,
}

/// What one retry tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Remote broker was already connected
    Connected,
    /// Remote path was restored during this tick
    Reconnected(Redelivery),
}

pub struct RetryLoop {
    supervisor: Arc<ConnectionSupervisor>,
    remote: Arc<dyn BrokerLink>,
    slot: Arc<FallbackSlot>,
    log: Arc<dyn AppendLog>,
    destination_topic: String,
    interval: Duration,
}

impl RetryLoop {
    pub fn new(
        supervisor: Arc<ConnectionSupervisor>,
        remote: Arc<dyn BrokerLink>,
        slot: Arc<FallbackSlot>,
        log: Arc<dyn AppendLog>,
        destination_topic: impl Into<String>,
    ) -> Self {
        Self {
            supervisor,
            remote,
            slot,
            log,
            destination_topic: destination_topic.into(),
            interval: Duration::from_secs(5),
        }
    }

    pub fn from_config(
        config: &RelayConfig,
        supervisor: Arc<ConnectionSupervisor>,
        remote: Arc<dyn BrokerLink>,
        slot: Arc<FallbackSlot>,
        log: Arc<dyn AppendLog>,
    ) -> Self {
        Self::new(supervisor, remote, slot, log, config.remote.topic.clone())
            .with_interval(config.relay.retry_interval())
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// One pass over the remote path
    pub async fn tick(&self) -> RelayResult<TickOutcome> {
        if self.supervisor.is_remote_broker_healthy() {
            return Ok(TickOutcome::Connected);
        }

        info!("Remote path down, reconnecting");
        self.supervisor.ensure_wireless_link().await?;
        self.supervisor.ensure_remote_broker().await?;
        Ok(TickOutcome::Reconnected(self.redeliver().await))
    }

    /// Reconnect the local broker if it is down; returns whether it was
    pub async fn local_tick(&self) -> RelayResult<bool> {
        if self.supervisor.is_local_broker_healthy() {
            return Ok(false);
        }
        warn!("Local broker connection down, reconnecting");
        self.supervisor.ensure_local_broker().await?;
        Ok(true)
    }

    /// Republish the pending fallback message, if any
    ///
    /// The message is taken out of the slot first; whatever the publish
    /// outcome, it is never put back. A failed republish appends a `dropped;`
    /// record so the message is not restored after a restart.
    pub async fn redeliver(&self) -> Redelivery {
        let message = match self.slot.take_if_present() {
            Ok(Some(message)) => message,
            Ok(None) => return Redelivery::SlotEmpty,
            Err(e) => {
                metrics().slot_cleared();
                metrics().decode_failed();
                error!("Discarding fallback message: {}", RelayError::from(e));
                return Redelivery::Corrupt;
            }
        };
        metrics().slot_cleared();

        let length = message.length;
        let hex_payload = codec::encode(&message.payload);
        let payload = Bytes::from(message.payload);
        match self.remote.publish(&self.destination_topic, payload, true) {
            Ok(()) => {
                metrics().redelivered();
                info!(
                    "Redelivered {}-byte fallback message to {}",
                    length, self.destination_topic
                );
                append_record(self.log.as_ref(), EncodedRecord::new(hex_payload, true)).await;
                Redelivery::Delivered { length }
            }
            Err(e) => {
                metrics().redelivery_failed();
                let error = RelayError::publish_failure(self.destination_topic.as_str(), e);
                warn!("{}, {}-byte fallback message dropped", error, length);
                append_record(self.log.as_ref(), EncodedRecord::dropped(hex_payload)).await;
                Redelivery::Failed { length }
            }
        }
    }

    /// Tick both paths on a fixed period until shutdown is requested
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        info!("Retry loop running every {:?}", self.interval);
        tokio::join!(
            self.run_remote(shutdown.clone()),
            self.run_local(shutdown)
        );
        info!("Retry loop stopped");
    }

    async fn run_remote(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = self.ticker().await;
        while next_tick(&mut ticker, &mut shutdown).await {
            match self.tick().instrument(crate::retry_span!(path = "remote")).await {
                Ok(outcome) => debug!("Retry tick finished: {:?}", outcome),
                Err(RelayError::ShuttingDown) => break,
                Err(e) => error!("Retry tick failed: {}", e),
            }
        }
    }

    async fn run_local(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = self.ticker().await;
        while next_tick(&mut ticker, &mut shutdown).await {
            match self.local_tick().instrument(crate::retry_span!(path = "local")).await {
                Ok(reconnected) => debug!("Local check finished, reconnected={}", reconnected),
                Err(RelayError::ShuttingDown) => break,
                Err(e) => error!("Local broker check failed: {}", e),
            }
        }
    }

    async fn ticker(&self) -> Interval {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;
        ticker
    }
}

/// Wait for the next period; false once shutdown is requested
async fn next_tick(ticker: &mut Interval, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = ticker.tick() => !*shutdown.borrow(),
        _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::RetryPolicy;
    use crate::testing::{MemoryAppendLog, MockBrokerLink, MockNetworkLink};

    const DESTINATION: &str = "eui-a84041446184392f/up";

    struct Harness {
        local: Arc<MockBrokerLink>,
        wireless: Arc<MockNetworkLink>,
        remote: Arc<MockBrokerLink>,
        slot: Arc<FallbackSlot>,
        log: Arc<MemoryAppendLog>,
        shutdown: watch::Sender<bool>,
        retry: Arc<RetryLoop>,
    }

    fn harness(remote: MockBrokerLink) -> Harness {
        let local = Arc::new(MockBrokerLink::connected("local"));
        let wireless = Arc::new(MockNetworkLink::up("wireless"));
        let remote = Arc::new(remote);
        let slot = Arc::new(FallbackSlot::new());
        let log = Arc::new(MemoryAppendLog::new());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let supervisor = Arc::new(ConnectionSupervisor::new(
            Arc::new(MockNetworkLink::up("wired")),
            local.clone(),
            wireless.clone(),
            remote.clone(),
            RetryPolicy::default(),
            shutdown_rx,
        ));
        let retry = Arc::new(RetryLoop::new(
            supervisor,
            remote.clone(),
            slot.clone(),
            log.clone(),
            DESTINATION,
        ));
        Harness {
            local,
            wireless,
            remote,
            slot,
            log,
            shutdown,
            retry,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_tick_does_nothing() {
        let h = harness(MockBrokerLink::connected("remote"));
        h.slot.store(&[0xDE, 0xAD]);

        assert_eq!(h.retry.tick().await.unwrap(), TickOutcome::Connected);
        assert!(h.remote.published().is_empty());
        assert!(!h.slot.is_empty());
        assert_eq!(h.remote.connect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_redelivers_slot() {
        let h = harness(MockBrokerLink::new("remote"));
        h.slot.store(&[0xDE, 0xAD, 0xBE, 0xEF]);

        let outcome = h.retry.tick().await.unwrap();

        assert_eq!(outcome, TickOutcome::Reconnected(Redelivery::Delivered { length: 4 }));
        let published = h.remote.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].payload, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(published[0].topic, DESTINATION);
        assert!(published[0].retain);
        assert!(h.slot.is_empty());
        assert_eq!(h.log.lines(), vec!["true;DEADBEEF\n".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_redundant_redelivery() {
        let h = harness(MockBrokerLink::new("remote"));
        h.slot.store(&[0x01]);

        h.retry.tick().await.unwrap();
        for _ in 0..3 {
            assert_eq!(h.retry.tick().await.unwrap(), TickOutcome::Connected);
        }
        assert_eq!(h.remote.published().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_with_empty_slot() {
        let h = harness(MockBrokerLink::new("remote"));
        assert_eq!(
            h.retry.tick().await.unwrap(),
            TickOutcome::Reconnected(Redelivery::SlotEmpty)
        );
        assert!(h.remote.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_redelivery_is_not_restored() {
        let remote = MockBrokerLink::new("remote");
        remote.set_publish_failure(true);
        let h = harness(remote);
        h.slot.store(&[0x01, 0x02]);

        assert_eq!(
            h.retry.tick().await.unwrap(),
            TickOutcome::Reconnected(Redelivery::Failed { length: 2 })
        );
        assert!(h.slot.is_empty());
        assert_eq!(h.log.lines(), vec!["dropped;0102\n".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_reassociates_wireless_link() {
        let h = harness(MockBrokerLink::connected("remote"));
        h.wireless.set_up(false);
        h.remote.drop_connection();

        let outcome = h.retry.tick().await.unwrap();
        assert_eq!(outcome, TickOutcome::Reconnected(Redelivery::SlotEmpty));
        assert_eq!(h.wireless.associate_attempts(), 1);
        assert_eq!(h.remote.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_tick_restores_local_broker() {
        let h = harness(MockBrokerLink::connected("remote"));
        assert!(!h.retry.local_tick().await.unwrap());

        h.local.drop_connection();
        assert!(h.retry.local_tick().await.unwrap());
        assert_eq!(h.local.connect_attempts(), 1);
        assert!(h.local.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_ignores_local_outage() {
        let h = harness(MockBrokerLink::new("remote"));
        h.local.drop_connection();
        h.local.set_reachable(false);
        h.slot.store(&[0xDE, 0xAD]);

        let outcome = tokio::time::timeout(Duration::from_secs(60), h.retry.tick())
            .await
            .expect("remote tick must not wait for the local broker")
            .unwrap();

        assert_eq!(outcome, TickOutcome::Reconnected(Redelivery::Delivered { length: 2 }));
        assert!(h.slot.is_empty());
        assert_eq!(h.local.connect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_drains_slot_while_local_broker_is_down() {
        let h = harness(MockBrokerLink::new("remote"));
        h.local.drop_connection();
        h.local.set_reachable(false);
        h.slot.store(&[0x42]);

        let retry = h.retry.clone();
        let shutdown_rx = h.shutdown.subscribe();
        let task = tokio::spawn(async move { retry.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(h.remote.published().len(), 1);
        assert!(h.slot.is_empty());
        assert!(h.local.connect_attempts() >= 1);
        assert!(!h.local.is_connected());

        h.shutdown.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let h = harness(MockBrokerLink::new("remote"));
        h.slot.store(&[0x42]);

        let retry = h.retry.clone();
        let shutdown_rx = h.shutdown.subscribe();
        let task = tokio::spawn(async move { retry.run(shutdown_rx).await });

        // First tick fires after one interval
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(h.remote.published().len(), 1);

        h.shutdown.send(true).unwrap();
        task.await.unwrap();
    }
}
