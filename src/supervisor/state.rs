//! Pure link state machine
//!
//! Each network path moves `Disconnected -> LinkUp -> BrokerConnected` and
//! falls back when the link or the broker is lost. The functions here decide
//! transitions and overall node health without doing any I/O.

use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

/// Connectivity of one network path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    LinkUp,
    BrokerConnected,
}

/// The two network paths of the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkPath {
    /// Wired interface to the local broker
    Local,
    /// Wireless interface to the remote broker
    Remote,
}

impl fmt::Display for NetworkPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkPath::Local => write!(f, "local"),
            NetworkPath::Remote => write!(f, "remote"),
        }
    }
}

/// Events that trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Interface association succeeded
    Associated,
    /// Interface lost its link
    LinkLost,
    /// Broker acknowledged the connection
    HandshakeCompleted,
    /// Broker connection dropped or was refused
    BrokerLost,
}

/// Overall node health derived from both paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeHealth {
    /// Both brokers connected, messages flow straight through
    Healthy,
    /// Local broker connected but remote unreachable, failures go to the fallback slot
    Degraded,
    /// Wired link up but local broker unreachable
    BrokerDown,
    /// Wired link down
    LinkDown,
}

/// Determine next state after a link event (pure function)
pub fn next_state(current: LinkState, event: LinkEvent) -> LinkState {
    match (current, event) {
        (_, LinkEvent::LinkLost) => LinkState::Disconnected,
        (LinkState::Disconnected, LinkEvent::Associated) => LinkState::LinkUp,
        (state, LinkEvent::Associated) => state,
        (LinkState::Disconnected, LinkEvent::HandshakeCompleted) => LinkState::Disconnected,
        (_, LinkEvent::HandshakeCompleted) => LinkState::BrokerConnected,
        (LinkState::BrokerConnected, LinkEvent::BrokerLost) => LinkState::LinkUp,
        (state, LinkEvent::BrokerLost) => state,
    }
}

/// State implied by probing the interface and the broker client (pure function)
pub fn observe(link_up: bool, broker_connected: bool) -> LinkState {
    match (link_up, broker_connected) {
        (false, _) => LinkState::Disconnected,
        (true, false) => LinkState::LinkUp,
        (true, true) => LinkState::BrokerConnected,
    }
}

/// Assess node health from the state of both paths (pure function)
pub fn assess(local: LinkState, remote: LinkState) -> NodeHealth {
    match (local, remote) {
        (LinkState::BrokerConnected, LinkState::BrokerConnected) => NodeHealth::Healthy,
        (LinkState::BrokerConnected, _) => NodeHealth::Degraded,
        (LinkState::LinkUp, _) => NodeHealth::BrokerDown,
        (LinkState::Disconnected, _) => NodeHealth::LinkDown,
    }
}

/// Log a state transition
pub fn log_state_transition(path: NetworkPath, from: LinkState, to: LinkState) {
    match (from, to) {
        (a, b) if a == b => {}
        (_, LinkState::BrokerConnected) => info!("{} path: broker connected", path),
        (LinkState::BrokerConnected, LinkState::LinkUp) => {
            warn!("{} path: broker connection lost", path)
        }
        (_, LinkState::Disconnected) => warn!("{} path: link down", path),
        _ => info!("{} path: {:?} -> {:?}", path, from, to),
    }
}
