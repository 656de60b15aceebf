//! Pure event routing for MQTT links
//!
//! Classifies events polled from a rumqttc event loop so the pump can react
//! without inspecting packets itself.

use rumqttc::{Event, Packet, SubscribeReasonCode};
use tracing::debug;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                // rumqttc turns a refused CONNACK into a poll error
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: publish.topic.clone(),
                    payload: publish.payload.clone(),
                    retain: publish.retain,
                },
                Packet::Disconnect => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    granted: suback
                        .return_codes
                        .iter()
                        .all(|code| matches!(code, SubscribeReasonCode::Success(_))),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Whether a received message is on the topic this link subscribed to
    pub fn matches_subscription(topic: &str, subscription: Option<&str>) -> bool {
        match subscription {
            Some(expected) if expected == topic => true,
            Some(expected) => {
                debug!("Topic mismatch: expected {}, got {}", expected, topic);
                false
            }
            None => false,
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on subscribed topic
    MessageReceived {
        topic: String,
        payload: bytes::Bytes,
        retain: bool,
    },
    /// MQTT broker disconnected
    Disconnected,
    /// Subscription acknowledged; `granted` is false if any filter was refused
    SubscriptionConfirmed { packet_id: u16, granted: bool },
    /// Infrastructure event (PingResp, PubAck, ...)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rumqttc::{ConnAck, ConnectReturnCode, Outgoing, Publish, QoS, SubAck};

    #[test]
    fn test_route_connack() {
        let accepted = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&accepted),
            EventRoute::ConnectionAcknowledged
        ));
    }

    #[test]
    fn test_route_publish() {
        let mut publish = Publish::new("test/topic", QoS::AtLeastOnce, vec![0xDE, 0xAD]);
        publish.retain = true;

        match MessageHandler::route_mqtt_event(&Event::Incoming(Packet::Publish(publish))) {
            EventRoute::MessageReceived {
                topic,
                payload,
                retain,
            } => {
                assert_eq!(topic, "test/topic");
                assert_eq!(payload, Bytes::from_static(&[0xDE, 0xAD]));
                assert!(retain);
            }
            other => panic!("Expected MessageReceived route, got {other:?}"),
        }
    }

    #[test]
    fn test_route_disconnect_and_outgoing() {
        assert!(matches!(
            MessageHandler::route_mqtt_event(&Event::Incoming(Packet::Disconnect)),
            EventRoute::Disconnected
        ));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::PingReq)),
            EventRoute::OutgoingEvent
        ));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&Event::Incoming(Packet::PingResp)),
            EventRoute::InfrastructureEvent(_)
        ));
    }

    #[test]
    fn test_route_suback() {
        let granted = SubAck::new(7, vec![SubscribeReasonCode::Success(QoS::AtLeastOnce)]);
        assert!(matches!(
            MessageHandler::route_mqtt_event(&Event::Incoming(Packet::SubAck(granted))),
            EventRoute::SubscriptionConfirmed {
                packet_id: 7,
                granted: true
            }
        ));

        let refused = SubAck::new(8, vec![SubscribeReasonCode::Failure]);
        assert!(matches!(
            MessageHandler::route_mqtt_event(&Event::Incoming(Packet::SubAck(refused))),
            EventRoute::SubscriptionConfirmed { granted: false, .. }
        ));
    }

    #[test]
    fn test_matches_subscription() {
        let topic = "v3/datalogger/devices/eui-a84041446184392f/up";
        assert!(MessageHandler::matches_subscription(topic, Some(topic)));
        assert!(!MessageHandler::matches_subscription("other/topic", Some(topic)));
        assert!(!MessageHandler::matches_subscription(topic, None));
    }
}
