//! Connection ownership.
//!
//! Every live connection is registered in exactly one [`ConnectionSet`]: the endpoint's set
//! of unbound connections at first, then the set of the listener its last request was bound
//! to. Closing a set cancels the token of every connection in it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Addresses and counters of the connection a request arrived on, available in the request
/// extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: u64,
    pub local_addr: SocketAddr,
    pub remote_addr: SocketAddr,
    pub secure: bool,
    /// Requests served on this connection before the current one
    pub reuses: u32,
}

#[derive(Debug, Default)]
pub struct ConnectionSet {
    connections: Mutex<HashMap<u64, CancellationToken>>,
    emptied: Notify,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, CancellationToken>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, id: u64, token: CancellationToken) {
        self.lock().insert(id, token);
    }

    fn remove(&self, id: u64) {
        let mut connections = self.lock();
        if connections.remove(&id).is_some() && connections.is_empty() {
            self.emptied.notify_waiters();
        }
    }

    pub fn contains(&self, id: u64) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Force-closes every connection of the set.
    ///
    /// Connections stay in the set until their tasks finish; see [`ConnectionSet::closed`].
    pub fn close_all(&self) {
        let tokens: Vec<_> = self.lock().values().cloned().collect();
        if !tokens.is_empty() {
            debug!(count = tokens.len(), "force close connections");
        }
        for token in tokens {
            token.cancel();
        }
    }

    /// Resolves once the set holds no connection.
    pub async fn closed(&self) {
        loop {
            let emptied = self.emptied.notified();
            if self.is_empty() {
                return;
            }
            emptied.await;
        }
    }
}

/// Membership of one connection in a [`ConnectionSet`], released on drop.
#[derive(Debug)]
pub struct ConnectionTracker {
    id: u64,
    token: CancellationToken,
    set: Arc<ConnectionSet>,
}

impl ConnectionTracker {
    pub fn new(set: Arc<ConnectionSet>) -> Self {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        set.insert(id, token.clone());
        Self { id, token, set }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Cancelled when the owning set force-closes the connection.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn move_to(&mut self, set: Arc<ConnectionSet>) {
        if Arc::ptr_eq(&self.set, &set) {
            return;
        }
        self.set.remove(self.id);
        set.insert(self.id, self.token.clone());
        self.set = set;
    }
}

impl Drop for ConnectionTracker {
    fn drop(&mut self) {
        self.set.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_moves_between_sets() {
        let unbound = Arc::new(ConnectionSet::new());
        let bound = Arc::new(ConnectionSet::new());

        let mut tracker = ConnectionTracker::new(Arc::clone(&unbound));
        assert!(unbound.contains(tracker.id()));

        tracker.move_to(Arc::clone(&bound));
        assert!(unbound.is_empty());
        assert!(bound.contains(tracker.id()));

        drop(tracker);
        assert!(bound.is_empty());
    }

    #[test]
    fn close_all_cancels_tokens() {
        let set = Arc::new(ConnectionSet::new());
        let first = ConnectionTracker::new(Arc::clone(&set));
        let second = ConnectionTracker::new(Arc::clone(&set));
        assert_ne!(first.id(), second.id());
        assert_eq!(set.len(), 2);

        set.close_all();
        assert!(first.token().is_cancelled());
        assert!(second.token().is_cancelled());
        assert_eq!(set.len(), 2);

        drop(first);
        drop(second);
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn closed_waits_for_the_last_connection() {
        let set = Arc::new(ConnectionSet::new());
        set.closed().await;

        let tracker = ConnectionTracker::new(Arc::clone(&set));
        let token = tracker.token().clone();
        let task = tokio::spawn(async move {
            token.cancelled().await;
            drop(tracker);
        });

        set.close_all();
        set.closed().await;
        assert!(set.is_empty());
        task.await.unwrap();
    }
}
