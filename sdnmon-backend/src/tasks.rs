//! Per-key background task handles.
//!
//! A switch that re-attaches must not end up with two probing loops. The
//! registry owns at most one task per key and aborts the previous one before
//! storing its replacement.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

/// Owned map of key -> running task
#[derive(Debug)]
pub struct TaskRegistry<K: Eq + Hash> {
    tasks: Mutex<HashMap<K, JoinHandle<()>>>,
}

impl<K: Eq + Hash> Default for TaskRegistry<K> {
    fn default() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone + Debug> TaskRegistry<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `handle` for `key`, aborting whatever task held the key before.
    pub fn replace(&self, key: K, handle: JoinHandle<()>) {
        let mut tasks = self.lock();
        if let Some(previous) = tasks.insert(key, handle) {
            previous.abort();
        }
    }

    /// Abort the task for `key`. Returns whether one was running.
    pub fn cancel(&self, key: &K) -> bool {
        match self.lock().remove(key) {
            Some(handle) => {
                debug!(?key, "Cancelling task");
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Abort every task whose key matches `pred`. Returns how many were removed.
    pub fn cancel_where(&self, mut pred: impl FnMut(&K) -> bool) -> usize {
        let mut tasks = self.lock();
        let keys: Vec<K> = tasks.keys().filter(|key| pred(key)).cloned().collect();
        for key in &keys {
            if let Some(handle) = tasks.remove(key) {
                handle.abort();
            }
        }
        keys.len()
    }

    pub fn cancel_all(&self) {
        for (_, handle) in self.lock().drain() {
            handle.abort();
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.lock().contains_key(key)
    }

    /// Number of registered tasks that have not finished yet
    pub fn active_count(&self) -> usize {
        self.lock().values().filter(|h| !h.is_finished()).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<K, JoinHandle<()>>> {
        self.tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<K: Eq + Hash> Drop for TaskRegistry<K> {
    fn drop(&mut self) {
        let tasks = self
            .tasks
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
    }
}
