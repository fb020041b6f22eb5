use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

pub type ConnectionId = u64;

/// Lifecycle of one live connection. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Open,
    Closing,
    Closed,
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to one live connection: a process-local id, the sending half of
/// the connection's outbound queue, and its lifecycle state.
///
/// The socket itself is owned by the task that accepted it. Cloning a handle
/// never extends the socket's life: once the owning task drops the receiving
/// half, every later `deliver` through any clone fails cleanly.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    queue: mpsc::UnboundedSender<String>,
    state: Arc<Mutex<ConnState>>,
}

impl ConnectionHandle {
    pub fn new(queue: mpsc::UnboundedSender<String>) -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            queue,
            state: Arc::new(Mutex::new(ConnState::Open)),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnState {
        *self.state.lock()
    }

    /// Enqueue a payload for the connection's writer. Never blocks.
    ///
    /// Returns false when the connection is no longer writable; the failure
    /// is logged and swallowed, never propagated to the caller.
    pub fn deliver(&self, payload: &str) -> bool {
        if self.state() != ConnState::Open {
            return false;
        }
        if self.queue.send(payload.to_owned()).is_err() {
            self.close();
            tracing::debug!(conn = self.id, "delivery failed, outbound queue closed");
            return false;
        }
        true
    }

    /// Stop accepting sends. Safe to call more than once, from any clone.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if *state == ConnState::Open {
            *state = ConnState::Closing;
        }
    }

    /// Terminal transition, once no more writes can be in flight.
    pub fn mark_closed(&self) {
        *self.state.lock() = ConnState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deliver_while_open() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new(tx);
        assert_eq!(handle.state(), ConnState::Open);
        assert!(handle.deliver("hi"));
        assert_eq!(rx.try_recv().unwrap(), "hi");
    }

    #[test]
    fn deliver_after_close_is_swallowed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new(tx);
        handle.close();
        assert_eq!(handle.state(), ConnState::Closing);
        assert!(!handle.deliver("hi"));
        assert!(rx.try_recv().is_err());
        handle.close();
        assert_eq!(handle.state(), ConnState::Closing);
        handle.mark_closed();
        assert_eq!(handle.state(), ConnState::Closed);
    }

    #[test]
    fn dropped_receiver_downgrades_state() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new(tx);
        drop(rx);
        assert!(!handle.deliver("hi"));
        assert_eq!(handle.state(), ConnState::Closing);
    }

    #[test]
    fn ids_are_unique() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let a = ConnectionHandle::new(tx.clone());
        let b = ConnectionHandle::new(tx);
        assert_ne!(a.id(), b.id());
    }
}
