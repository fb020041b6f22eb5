use std::collections::HashMap;

use parking_lot::Mutex;

use crate::connection::{ConnectionHandle, ConnectionId};

/// Live subscriptions: room id to the set of subscribed connections.
///
/// Purely in-memory, rebuilt from zero on restart. Constructed explicitly
/// and handed to whoever needs it; there is no process-wide instance. The
/// lock is scoped to membership mutation only and is never held across a
/// socket write.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, HashMap<ConnectionId, ConnectionHandle>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under a room. Idempotent; the room entry is
    /// created lazily on first subscription.
    pub fn subscribe(&self, room_id: &str, handle: ConnectionHandle) {
        let mut rooms = self.rooms.lock();
        rooms
            .entry(room_id.to_owned())
            .or_default()
            .entry(handle.id())
            .or_insert(handle);
    }

    /// Remove a connection from a room. Unknown pairs are a no-op. A room
    /// whose last subscriber leaves is removed entirely.
    pub fn unsubscribe(&self, room_id: &str, conn: ConnectionId) {
        let mut rooms = self.rooms.lock();
        if let Some(subs) = rooms.get_mut(room_id) {
            subs.remove(&conn);
            if subs.is_empty() {
                rooms.remove(room_id);
            }
        }
    }

    /// Snapshot of the room's current subscribers.
    pub fn subscribers_of(&self, room_id: &str) -> Vec<ConnectionHandle> {
        let rooms = self.rooms.lock();
        rooms
            .get(room_id)
            .map(|subs| subs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of rooms with at least one subscriber.
    pub fn room_count(&self) -> usize {
        self.rooms.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn handle() -> ConnectionHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        // receivers leak in these tests on purpose; the handles stay open
        std::mem::forget(rx);
        ConnectionHandle::new(tx)
    }

    #[test]
    fn subscribe_is_idempotent() {
        let registry = RoomRegistry::new();
        let h = handle();
        registry.subscribe("r1", h.clone());
        registry.subscribe("r1", h.clone());
        assert_eq!(registry.subscribers_of("r1").len(), 1);
        assert_eq!(registry.room_count(), 1);
    }

    #[test]
    fn last_unsubscribe_removes_room() {
        let registry = RoomRegistry::new();
        let a = handle();
        let b = handle();
        registry.subscribe("r1", a.clone());
        registry.subscribe("r1", b.clone());
        registry.unsubscribe("r1", a.id());
        assert_eq!(registry.subscribers_of("r1").len(), 1);
        assert_eq!(registry.room_count(), 1);
        registry.unsubscribe("r1", b.id());
        assert!(registry.subscribers_of("r1").is_empty());
        assert_eq!(registry.room_count(), 0);
        // repeated unsubscribe is a no-op
        registry.unsubscribe("r1", b.id());
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn unknown_room_is_empty() {
        let registry = RoomRegistry::new();
        assert!(registry.subscribers_of("nowhere").is_empty());
        registry.unsubscribe("nowhere", 42);
    }

    #[test]
    fn rooms_are_independent() {
        let registry = RoomRegistry::new();
        registry.subscribe("r1", handle());
        registry.subscribe("r2", handle());
        assert_eq!(registry.subscribers_of("r1").len(), 1);
        assert_eq!(registry.subscribers_of("r2").len(), 1);
        assert_eq!(registry.room_count(), 2);
    }
}
