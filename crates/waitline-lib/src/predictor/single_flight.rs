//! Per-key request coalescing
//!
//! Concurrent callers for the same key share one execution of the supplied
//! future and all receive a clone of its output. Once the execution finishes
//! the key is released, so a later call starts a fresh execution.

use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::OnceCell;

pub struct SingleFlight<K, V> {
    calls: DashMap<K, Arc<OnceCell<V>>>,
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            calls: DashMap::new(),
        }
    }

    /// Number of keys with an execution in progress
    pub fn in_flight(&self) -> usize {
        self.calls.len()
    }

    /// Run `f` for `key` unless an execution for `key` is already running,
    /// in which case wait for it and return its output instead.
    ///
    /// If the leading caller is cancelled, one of the waiting callers runs
    /// its own `f` in its place.
    pub async fn run<F, Fut>(&self, key: K, f: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
        V: Clone,
    {
        // The map guard must not be held across the await below
        let cell = Arc::clone(
            &*self
                .calls
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new())),
        );

        let value = cell.get_or_init(f).await.clone();

        self.calls.remove_if(&key, |_, current| Arc::ptr_eq(current, &cell));
        value
    }
}
