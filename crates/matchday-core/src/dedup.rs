//! Single-flight collapsing of concurrent identical requests.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

/// The leader's work ended without producing a value (it panicked or was aborted).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("in-flight request was abandoned before settling")]
pub struct DedupAbandoned;

type Waiters<K, T> = HashMap<K, Vec<oneshot::Sender<T>>>;

/// In-flight map keyed by resource identity.
///
/// The first caller for a key becomes the leader: its work is spawned as a task
/// so a caller dropping its future cannot strand the others. Every caller,
/// leader included, waits on the same settled value. The key leaves the map
/// exactly once, before any waiter is notified.
pub struct Deduplicator<K, T> {
    in_flight: Arc<Mutex<Waiters<K, T>>>,
}

impl<K, T> Clone for Deduplicator<K, T> {
    fn clone(&self) -> Self {
        Self {
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<K, T> Default for Deduplicator<K, T> {
    fn default() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, T> Deduplicator<K, T>
where
    K: Eq + Hash + Clone + Display + Send + 'static,
    T: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` unless an identical request is already in flight, in which
    /// case wait for that request's value instead.
    pub async fn run<F>(&self, key: K, work: F) -> Result<T, DedupAbandoned>
    where
        F: Future<Output = T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let leader = {
            let mut in_flight = lock(&self.in_flight);
            match in_flight.get_mut(&key) {
                Some(waiters) => {
                    waiters.push(tx);
                    false
                }
                None => {
                    in_flight.insert(key.clone(), vec![tx]);
                    true
                }
            }
        };

        if leader {
            let guard = SettleGuard {
                in_flight: Arc::clone(&self.in_flight),
                key: Some(key),
            };
            tokio::spawn(async move {
                let mut guard = guard;
                let value = work.await;
                for waiter in guard.settle() {
                    let _ = waiter.send(value.clone());
                }
            });
        } else {
            debug!(key = %key, "joined in-flight request");
        }

        rx.await.map_err(|_| DedupAbandoned)
    }

    /// Number of distinct keys currently in flight.
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        lock(&self.in_flight).contains_key(key)
    }
}

fn lock<K, T>(in_flight: &Mutex<Waiters<K, T>>) -> MutexGuard<'_, Waiters<K, T>> {
    in_flight
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Removes the key on settle, or on drop if the leader task unwinds.
struct SettleGuard<K: Eq + Hash, T> {
    in_flight: Arc<Mutex<Waiters<K, T>>>,
    key: Option<K>,
}

impl<K: Eq + Hash, T> SettleGuard<K, T> {
    fn settle(&mut self) -> Vec<oneshot::Sender<T>> {
        match self.key.take() {
            Some(key) => lock(&self.in_flight).remove(&key).unwrap_or_default(),
            None => Vec::new(),
        }
    }
}

impl<K: Eq + Hash, T> Drop for SettleGuard<K, T> {
    fn drop(&mut self) {
        // Dropping the senders wakes every waiter with `DedupAbandoned`.
        drop(self.settle());
    }
}
