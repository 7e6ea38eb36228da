//! Per-key async locks.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

// Mutex plus the number of holders and waiters.
type Table<K> = HashMap<K, (Arc<AsyncMutex<()>>, usize)>;

/// A lock per key, created on demand and dropped once nobody holds or
/// awaits it.
pub struct KeyedLocks<K> {
    locks: Mutex<Table<K>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for exclusive access to `key`.
    ///
    /// Cancelling the wait releases the entry like dropping the guard does.
    pub async fn lock(&self, key: &K) -> KeyGuard<'_, K> {
        let lock = {
            let mut locks = self.table();
            let entry = locks
                .entry(key.clone())
                .or_insert_with(|| (Arc::new(AsyncMutex::new(())), 0));
            entry.1 += 1;
            entry.0.clone()
        };
        let mut guard = KeyGuard {
            owner: self,
            key: key.clone(),
            guard: None,
        };
        guard.guard = Some(lock.lock_owned().await);
        guard
    }

    /// Number of keys with a live lock entry.
    pub fn len(&self) -> usize {
        self.table().len()
    }

    /// Whether no key is locked or awaited.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn table(&self) -> MutexGuard<'_, Table<K>> {
        self.locks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive access to one key; released on drop.
pub struct KeyGuard<'a, K: Eq + Hash + Clone> {
    owner: &'a KeyedLocks<K>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash + Clone> Drop for KeyGuard<'_, K> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.owner.table();
        let last = match locks.get_mut(&self.key) {
            Some(entry) => {
                entry.1 = entry.1.saturating_sub(1);
                entry.1 == 0
            }
            None => false,
        };
        if last {
            locks.remove(&self.key);
        }
    }
}
