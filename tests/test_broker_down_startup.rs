//! Integration Tests for Relay Startup When a Broker is Down
//!
//! The relay must keep retrying forever when a broker is unavailable at
//! startup, with a fixed delay between attempts, until it is shut down.
//! These tests use real MQTT links against a loopback port nobody listens on.

use dualnet_relay::config::RelayConfig;
use dualnet_relay::supervisor::{ConnectionSupervisor, RetryPolicy};
use dualnet_relay::testing::MockNetworkLink;
use dualnet_relay::transport::{BrokerLink, ConnectionState, MqttLink};
use dualnet_relay::RelayError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

fn unreachable_link(name: &str) -> Arc<MqttLink> {
    let mut section = RelayConfig::test_config().local;
    // Reserved port on loopback, connections are refused
    section.broker_url = "mqtt://127.0.0.1:1".to_string();
    Arc::new(MqttLink::new(name, section, 65535).with_connect_timeout(Duration::from_secs(1)))
}

#[tokio::test]
async fn test_relay_retries_when_broker_unavailable_at_startup() {
    // Arrange: local broker unreachable, short retry delay
    let local = unreachable_link("local");
    let (shutdown, shutdown_rx) = watch::channel(false);
    let supervisor = Arc::new(ConnectionSupervisor::new(
        Arc::new(MockNetworkLink::up("wired")),
        local.clone(),
        Arc::new(MockNetworkLink::up("wireless")),
        unreachable_link("remote"),
        RetryPolicy {
            link_retry_delay: Duration::from_millis(50),
            broker_retry_delay: Duration::from_millis(100),
        },
        shutdown_rx,
    ));

    // Act: keep trying for a while, then request shutdown
    let start = Instant::now();
    let task = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.ensure_local_broker().await })
    };
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(!task.is_finished(), "Supervisor must not give up on its own");
    shutdown.send(true).unwrap();

    // Assert: the loop ends only because of the shutdown request
    let result = tokio::time::timeout(Duration::from_secs(3), task)
        .await
        .expect("Shutdown should interrupt the retry loop")
        .unwrap();
    assert!(matches!(result, Err(RelayError::ShuttingDown)));
    assert!(start.elapsed() >= Duration::from_millis(600));
    assert!(!supervisor.is_local_broker_healthy());
    assert!(matches!(
        local.connection_state(),
        ConnectionState::Disconnected(_)
    ));
    assert!(local.last_error().is_some(), "Failure reason should be recorded");
}

#[tokio::test]
async fn test_single_connect_attempt_fails_fast() {
    let link = unreachable_link("remote");
    let start = Instant::now();

    let result = link.connect().await;

    assert!(result.is_err());
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(!link.is_connected());
}
