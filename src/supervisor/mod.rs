//! Connection supervision for both network paths
//!
//! [`ConnectionSupervisor`] brings the wireless link and the two broker
//! connections up and keeps retrying until they are. Each network path has
//! its own connect lock: two reconnects of the same path never overlap, and
//! an outage on one path never holds up the other. Health queries only read
//! the last known state and the live link checks, so they never wait behind a
//! reconnect in progress.

pub mod state;

pub use state::{LinkEvent, LinkState, NetworkPath, NodeHealth};

use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult};
use crate::observability::metrics;
use crate::transport::{BrokerLink, NetworkLink};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn, Instrument};

/// Fixed delays between connection attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub link_retry_delay: Duration,
    pub broker_retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            link_retry_delay: Duration::from_secs(1),
            broker_retry_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            link_retry_delay: Duration::from_millis(config.wireless.retry_delay_ms),
            broker_retry_delay: config.relay.broker_retry_delay(),
        }
    }
}

/// Interface and broker that make up one network path
struct PathLinks {
    path: NetworkPath,
    link: Arc<dyn NetworkLink>,
    broker: Arc<dyn BrokerLink>,
    state: watch::Sender<LinkState>,
    connect_lock: Mutex<()>,
}

impl PathLinks {
    fn new(path: NetworkPath, link: Arc<dyn NetworkLink>, broker: Arc<dyn BrokerLink>) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        Self {
            path,
            link,
            broker,
            state,
            connect_lock: Mutex::new(()),
        }
    }

    fn apply(&self, event: LinkEvent) {
        let from = *self.state.borrow();
        let to = state::next_state(from, event);
        if from != to {
            state::log_state_transition(self.path, from, to);
            self.state.send_replace(to);
        }
    }

    /// Fold the live link checks into the recorded state
    fn refresh(&self) -> LinkState {
        let observed = state::observe(self.link.is_up(), self.broker.is_connected());
        let from = *self.state.borrow();
        if from != observed {
            state::log_state_transition(self.path, from, observed);
            self.state.send_replace(observed);
            if from == LinkState::BrokerConnected {
                metrics().broker_connection_lost(self.path);
            }
        }
        observed
    }
}

/// Owner of connection lifecycles for the wired and the wireless path
pub struct ConnectionSupervisor {
    local: PathLinks,
    remote: PathLinks,
    policy: RetryPolicy,
    shutdown: watch::Receiver<bool>,
}

impl ConnectionSupervisor {
    pub fn new(
        wired: Arc<dyn NetworkLink>,
        local_broker: Arc<dyn BrokerLink>,
        wireless: Arc<dyn NetworkLink>,
        remote_broker: Arc<dyn BrokerLink>,
        policy: RetryPolicy,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            local: PathLinks::new(NetworkPath::Local, wired, local_broker),
            remote: PathLinks::new(NetworkPath::Remote, wireless, remote_broker),
            policy,
            shutdown,
        }
    }

    fn links(&self, path: NetworkPath) -> &PathLinks {
        match path {
            NetworkPath::Local => &self.local,
            NetworkPath::Remote => &self.remote,
        }
    }

    /// Associate the wireless interface, retrying until it is up
    pub async fn ensure_wireless_link(&self) -> RelayResult<()> {
        let _guard = self.remote.connect_lock.lock().await;
        self.associate_until_up(&self.remote)
            .instrument(crate::supervisor_span!(path = "remote", step = "link"))
            .await
    }

    /// Connect to the remote broker, re-associating the wireless link first
    /// whenever it has dropped
    pub async fn ensure_remote_broker(&self) -> RelayResult<()> {
        let _guard = self.remote.connect_lock.lock().await;
        self.connect_until_acknowledged(&self.remote)
            .instrument(crate::supervisor_span!(path = "remote", step = "broker"))
            .await
    }

    /// Connect to the local broker over the wired path
    pub async fn ensure_local_broker(&self) -> RelayResult<()> {
        let _guard = self.local.connect_lock.lock().await;
        self.connect_until_acknowledged(&self.local)
            .instrument(crate::supervisor_span!(path = "local", step = "broker"))
            .await
    }

    pub fn is_wireless_healthy(&self) -> bool {
        self.remote.refresh() != LinkState::Disconnected
    }

    pub fn is_remote_broker_healthy(&self) -> bool {
        self.remote.refresh() == LinkState::BrokerConnected
    }

    pub fn is_local_broker_healthy(&self) -> bool {
        self.local.refresh() == LinkState::BrokerConnected
    }

    /// Current state of one path
    pub fn link_state(&self, path: NetworkPath) -> LinkState {
        self.links(path).refresh()
    }

    /// Watch state changes of one path
    pub fn subscribe(&self, path: NetworkPath) -> watch::Receiver<LinkState> {
        self.links(path).state.subscribe()
    }

    pub fn health(&self) -> NodeHealth {
        state::assess(self.local.refresh(), self.remote.refresh())
    }

    /// Disconnect both brokers
    pub async fn disconnect_all(&self) {
        for links in [&self.remote, &self.local] {
            if let Err(e) = links.broker.disconnect().await {
                warn!("Disconnecting {} broker failed: {}", links.path, e);
            }
            links.apply(LinkEvent::BrokerLost);
        }
    }

    async fn associate_until_up(&self, links: &PathLinks) -> RelayResult<()> {
        let mut attempt: u32 = 0;
        loop {
            self.check_shutdown()?;
            if links.link.is_up() {
                links.apply(LinkEvent::Associated);
                return Ok(());
            }
            links.apply(LinkEvent::LinkLost);

            attempt += 1;
            debug!("Associating {} link, attempt {}", links.link.name(), attempt);
            match links.link.associate().await {
                Ok(()) => {
                    info!("{} link associated after {} attempt(s)", links.link.name(), attempt);
                    links.apply(LinkEvent::Associated);
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "{} link association failed (attempt {}): {}",
                        links.link.name(),
                        attempt,
                        e
                    );
                    self.pause(self.policy.link_retry_delay).await?;
                }
            }
        }
    }

    async fn connect_until_acknowledged(&self, links: &PathLinks) -> RelayResult<()> {
        let mut attempt: u32 = 0;
        loop {
            self.associate_until_up(links).await?;
            if links.broker.is_connected() {
                links.apply(LinkEvent::HandshakeCompleted);
                return Ok(());
            }
            links.apply(LinkEvent::BrokerLost);

            attempt += 1;
            metrics().broker_connection_attempt(links.path);
            match links.broker.connect().await {
                Ok(()) => {
                    metrics().broker_connection_established(links.path);
                    info!(
                        "Connected to {} broker after {} attempt(s)",
                        links.broker.name(),
                        attempt
                    );
                    links.apply(LinkEvent::HandshakeCompleted);
                    return Ok(());
                }
                Err(e) => {
                    metrics().broker_connection_failed(links.path);
                    let reason = links.broker.last_error().unwrap_or_else(|| e.to_string());
                    let error = RelayError::broker_unreachable(links.broker.name(), e);
                    warn!("{} (attempt {}): {}", error, attempt, reason);
                    self.pause(self.policy.broker_retry_delay).await?;
                }
            }
        }
    }

    fn check_shutdown(&self) -> RelayResult<()> {
        if *self.shutdown.borrow() {
            Err(RelayError::ShuttingDown)
        } else {
            Ok(())
        }
    }

    /// Sleep between attempts, cut short by a shutdown request
    async fn pause(&self, delay: Duration) -> RelayResult<()> {
        let mut shutdown = self.shutdown.clone();
        let stopped = tokio::select! {
            stopped = shutdown.wait_for(|stop| *stop) => stopped.is_ok(),
            _ = tokio::time::sleep(delay) => return Ok(()),
        };
        if stopped {
            return Err(RelayError::ShuttingDown);
        }
        // Nobody can request shutdown any more
        tokio::time::sleep(delay).await;
        Ok(())
    }
}
