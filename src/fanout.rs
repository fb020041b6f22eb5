use serde::{Deserialize, Serialize};

use crate::registry::RoomRegistry;

/// Wire envelope pushed to room subscribers.
///
/// Consumers must treat unknown `type` values as ignorable; they parse to
/// `Unknown` here for the same reason.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum Event {
    Message(MessageEvent),
    Echo(String),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageEvent {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub content: String,
}

/// Deliver an event to every current subscriber of a room.
///
/// The envelope is serialized once, the subscriber set is snapshotted, and
/// each subscriber gets exactly one delivery attempt, independent of the
/// others. Delivery only enqueues onto per-connection writer queues, so this
/// returns without waiting on any socket; subscribers whose queue is gone
/// are pruned from the registry.
pub fn publish(registry: &RoomRegistry, room_id: &str, event: &Event) {
    let payload = match serde_json::to_string(event) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(error = %e, "unserializable event");
            return;
        }
    };
    for handle in registry.subscribers_of(room_id) {
        if !handle.deliver(&payload) {
            registry.unsubscribe(room_id, handle.id());
            tracing::debug!(room = room_id, conn = handle.id(), "pruned dead subscriber");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionHandle;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn message(content: &str) -> Event {
        Event::Message(MessageEvent {
            id: "m1".into(),
            room_id: "r1".into(),
            sender_id: "u1".into(),
            content: content.into(),
        })
    }

    #[test]
    fn wire_shape() {
        let event = message("hi");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "message",
                "payload": {"id": "m1", "room_id": "r1", "sender_id": "u1", "content": "hi"}
            })
        );
        let echo: Event = serde_json::from_str(r#"{"type":"echo","payload":"x"}"#).unwrap();
        assert_eq!(echo, Event::Echo("x".into()));
    }

    #[test]
    fn unknown_type_is_tolerated() {
        let event: Event =
            serde_json::from_str(r#"{"type":"presence","payload":{"who":"u9"}}"#).unwrap();
        assert_eq!(event, Event::Unknown);
    }

    #[test]
    fn each_subscriber_gets_exactly_one_attempt() {
        let registry = RoomRegistry::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        registry.subscribe("r1", ConnectionHandle::new(tx1));
        registry.subscribe("r1", ConnectionHandle::new(tx2));

        publish(&registry, "r1", &message("hi"));

        for rx in [&mut rx1, &mut rx2] {
            let payload = rx.try_recv().unwrap();
            let event: Event = serde_json::from_str(&payload).unwrap();
            assert_eq!(event, message("hi"));
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn broken_subscriber_is_pruned_and_isolated() {
        let registry = RoomRegistry::new();
        let (tx1, rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        registry.subscribe("r1", ConnectionHandle::new(tx1));
        registry.subscribe("r1", ConnectionHandle::new(tx2));
        drop(rx1);

        publish(&registry, "r1", &message("hi"));
        assert!(rx2.try_recv().unwrap().contains("\"hi\""));
        assert_eq!(registry.subscribers_of("r1").len(), 1);

        publish(&registry, "r1", &message("again"));
        assert!(rx2.try_recv().unwrap().contains("again"));
    }

    #[test]
    fn publish_to_empty_room_is_noop() {
        let registry = RoomRegistry::new();
        publish(&registry, "r1", &message("hi"));
        assert_eq!(registry.room_count(), 0);
    }
}
