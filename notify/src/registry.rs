use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use std::net::SocketAddr;
use std::sync::RwLock;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Subscriber {
    pub addr: SocketAddr,
    pub last_seen: DateTime<Utc>,
    pub active: bool,
}

/// Process-local, non-durable mapping from user id to datagram address.
/// Shared by many tasks through a read-write lock using the
/// snapshot-then-release pattern: readers take the lock briefly to copy
/// out what they need and release it before doing any I/O.
pub struct SubscriberRegistry {
    subscribers: RwLock<HashMap<i32, Subscriber>>,
    inactivity_timeout: Duration,
}

impl SubscriberRegistry {
    pub fn new(inactivity_timeout: Duration) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            inactivity_timeout,
        }
    }

    /// Upserts a subscriber, marking it active and refreshing `last_seen`.
    pub fn add(&self, user_id: i32, addr: SocketAddr) {
        let mut subscribers = self.subscribers.write().expect("registry lock poisoned");
        subscribers.insert(
            user_id,
            Subscriber {
                addr,
                last_seen: Utc::now(),
                active: true,
            },
        );
    }

    pub fn remove(&self, user_id: i32) {
        let mut subscribers = self.subscribers.write().expect("registry lock poisoned");
        subscribers.remove(&user_id);
    }

    pub fn touch(&self, user_id: i32) {
        let mut subscribers = self.subscribers.write().expect("registry lock poisoned");
        if let Some(subscriber) = subscribers.get_mut(&user_id) {
            subscriber.last_seen = Utc::now();
        }
    }

    /// Snapshots the currently-active subscribers among `user_ids`.
    pub fn lookup_many(&self, user_ids: &[i32]) -> Vec<(i32, SocketAddr)> {
        let subscribers = self.subscribers.read().expect("registry lock poisoned");
        user_ids
            .iter()
            .filter_map(|user_id| {
                subscribers
                    .get(user_id)
                    .filter(|subscriber| subscriber.active)
                    .map(|subscriber| (*user_id, subscriber.addr))
            })
            .collect()
    }

    pub fn lookup(&self, user_id: i32) -> Option<SocketAddr> {
        let subscribers = self.subscribers.read().expect("registry lock poisoned");
        subscribers
            .get(&user_id)
            .filter(|subscriber| subscriber.active)
            .map(|subscriber| subscriber.addr)
    }

    /// Removes entries whose `last_seen` is older than the inactivity
    /// timeout. Intended to run on a periodic background task.
    pub fn cleanup(&self) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.inactivity_timeout).unwrap_or(chrono::Duration::zero());
        let mut subscribers = self.subscribers.write().expect("registry lock poisoned");
        subscribers.retain(|_, subscriber| subscriber.last_seen >= cutoff);
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[test]
    fn add_then_lookup_finds_active_subscriber() {
        let registry = SubscriberRegistry::new(Duration::from_secs(300));
        registry.add(1, addr());
        assert_eq!(registry.lookup(1), Some(addr()));
    }

    #[test]
    fn remove_clears_subscriber() {
        let registry = SubscriberRegistry::new(Duration::from_secs(300));
        registry.add(1, addr());
        registry.remove(1);
        assert_eq!(registry.lookup(1), None);
    }

    #[test]
    fn lookup_many_skips_unknown_and_missing_users() {
        let registry = SubscriberRegistry::new(Duration::from_secs(300));
        registry.add(1, addr());
        let found = registry.lookup_many(&[1, 2]);
        assert_eq!(found, vec![(1, addr())]);
    }

    #[test]
    fn cleanup_evicts_stale_entries() {
        let registry = SubscriberRegistry::new(Duration::from_secs(300));
        registry.add(1, addr());
        {
            let mut subscribers = registry.subscribers.write().unwrap();
            subscribers.get_mut(&1).unwrap().last_seen = Utc::now() - chrono::Duration::hours(1);
        }
        registry.cleanup();
        assert_eq!(registry.lookup(1), None);
    }
}
