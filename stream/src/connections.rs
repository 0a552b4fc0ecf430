use hashbrown::HashMap;
use log::warn;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::sync::mpsc;

struct ConnectionEntry {
    user_id: i32,
    sender: mpsc::UnboundedSender<String>,
}

/// Process-local map from connection id to its outbound line sender.
/// Shared by every connection task through a read-write lock using the
/// same snapshot-then-release pattern as `notify::SubscriberRegistry`:
/// readers copy out what they need and release the lock before doing
/// any I/O.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<u64, ConnectionEntry>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn register(&self, user_id: i32, sender: mpsc::UnboundedSender<String>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut connections = self.connections.write().expect("connection registry lock poisoned");
        connections.insert(id, ConnectionEntry { user_id, sender });
        id
    }

    pub fn remove(&self, id: u64) {
        let mut connections = self.connections.write().expect("connection registry lock poisoned");
        connections.remove(&id);
    }

    pub fn user_id_of(&self, id: u64) -> Option<i32> {
        let connections = self.connections.read().expect("connection registry lock poisoned");
        connections.get(&id).map(|entry| entry.user_id)
    }

    /// Delivers a line to exactly this connection, e.g. a rejection or
    /// error frame in reply to something it sent.
    pub fn send_to(&self, id: u64, line: String) {
        let connections = self.connections.read().expect("connection registry lock poisoned");
        if let Some(entry) = connections.get(&id) {
            let _ = entry.sender.send(line);
        }
    }

    /// Snapshots every connection other than `exclude`, releases the
    /// lock, then fans out in parallel: one task per recipient.
    pub async fn broadcast_others(&self, exclude: u64, line: String) {
        let others = self.snapshot_excluding(exclude);
        Self::fan_out(others, line).await;
    }

    /// Snapshots every connection, releases the lock, then fans out in
    /// parallel. Used for the shutdown warning, which every connection
    /// should receive including none excluded.
    pub async fn broadcast_all(&self, line: String) {
        let all = {
            let connections = self.connections.read().expect("connection registry lock poisoned");
            connections.values().map(|entry| entry.sender.clone()).collect()
        };
        Self::fan_out(all, line).await;
    }

    fn snapshot_excluding(&self, exclude: u64) -> Vec<mpsc::UnboundedSender<String>> {
        let connections = self.connections.read().expect("connection registry lock poisoned");
        connections
            .iter()
            .filter(|(id, _)| **id != exclude)
            .map(|(_, entry)| entry.sender.clone())
            .collect()
    }

    async fn fan_out(recipients: Vec<mpsc::UnboundedSender<String>>, line: String) {
        let sends = recipients.into_iter().map(|sender| {
            let line = line.clone();
            tokio::spawn(async move {
                let _ = sender.send(line);
            })
        });

        for send in sends {
            if let Err(err) = send.await {
                warn!("broadcast fan-out task panicked: {err}");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.connections.read().expect("connection registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_send_to_reaches_that_connection() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = registry.register(1, tx);

        registry.send_to(id, "hello".to_string());
        assert_eq!(rx.recv().await, Some("hello".to_string()));
    }

    #[tokio::test]
    async fn broadcast_others_excludes_the_sender() {
        let registry = ConnectionRegistry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = registry.register(1, tx_a);
        let _b = registry.register(2, tx_b);

        registry.broadcast_others(a, "ping".to_string()).await;

        assert_eq!(rx_b.recv().await, Some("ping".to_string()));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn remove_drops_the_connection_from_future_broadcasts() {
        let registry = ConnectionRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = registry.register(1, tx);
        registry.remove(id);
        drop(rx);

        registry.broadcast_all("hello".to_string()).await;
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn user_id_of_reflects_the_registered_identity() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = registry.register(42, tx);
        assert_eq!(registry.user_id_of(id), Some(42));
    }
}
