//! Idempotency-key cache for at-least-once event delivery.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use journey_core::{EventId, UserId};

/// Remembers processed event ids for a bounded time and count.
///
/// Ids are scoped to the user they were sent for. Process-local: a restart
/// forgets every key.
pub struct IdempotencyCache {
    capacity: usize,
    ttl: Duration,
    state: Mutex<CacheState>,
}

type Key = (UserId, EventId);

#[derive(Default)]
struct CacheState {
    seen: HashSet<Key>,
    // Insertion order; with a fixed TTL this is also expiry order.
    order: VecDeque<(Instant, Key)>,
}

impl CacheState {
    fn evict_expired(&mut self, now: Instant, ttl: Duration) {
        while let Some((at, _)) = self.order.front() {
            if now.duration_since(*at) < ttl {
                break;
            }
            if let Some((_, key)) = self.order.pop_front() {
                self.seen.remove(&key);
            }
        }
    }
}

impl IdempotencyCache {
    /// Create a cache holding at most `capacity` ids for `ttl` each.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Whether `id` was recorded for `user_id` and has not expired.
    pub fn contains(&self, user_id: &UserId, id: &EventId) -> bool {
        self.contains_at(&(user_id.clone(), id.clone()), Instant::now())
    }

    /// Mark `id` as processed for `user_id`.
    pub fn record(&self, user_id: UserId, id: EventId) {
        self.record_at((user_id, id), Instant::now())
    }

    /// Number of live ids.
    pub fn len(&self) -> usize {
        self.lock().seen.len()
    }

    /// Whether no id is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn contains_at(&self, key: &Key, now: Instant) -> bool {
        let mut state = self.lock();
        state.evict_expired(now, self.ttl);
        state.seen.contains(key)
    }

    fn record_at(&self, key: Key, now: Instant) {
        let mut state = self.lock();
        state.evict_expired(now, self.ttl);
        if !state.seen.insert(key.clone()) {
            return;
        }
        state.order.push_back((now, key));
        while state.seen.len() > self.capacity {
            match state.order.pop_front() {
                Some((_, oldest)) => {
                    state.seen.remove(&oldest);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(user: &str, id: &str) -> Key {
        (UserId::new(user), EventId::new(id))
    }

    #[test]
    fn test_records_and_recalls() {
        let cache = IdempotencyCache::new(10, Duration::from_secs(60));
        let user = UserId::new("u1");
        let id = EventId::new("evt-1");
        assert!(!cache.contains(&user, &id));
        cache.record(user.clone(), id.clone());
        assert!(cache.contains(&user, &id));
        cache.record(user.clone(), id.clone());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_same_id_for_another_user_is_new() {
        let cache = IdempotencyCache::new(10, Duration::from_secs(60));
        let id = EventId::new("evt-1");
        cache.record(UserId::new("alice"), id.clone());

        assert!(cache.contains(&UserId::new("alice"), &id));
        assert!(!cache.contains(&UserId::new("bob"), &id));
    }

    #[test]
    fn test_expires_after_ttl() {
        let cache = IdempotencyCache::new(10, Duration::from_secs(60));
        let start = Instant::now();
        cache.record_at(key("u1", "evt-1"), start);

        assert!(cache.contains_at(&key("u1", "evt-1"), start + Duration::from_secs(59)));
        assert!(!cache.contains_at(&key("u1", "evt-1"), start + Duration::from_secs(60)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_evicts_oldest_over_capacity() {
        let cache = IdempotencyCache::new(2, Duration::from_secs(60));
        let user = UserId::new("u1");
        for id in ["a", "b", "c"] {
            cache.record(user.clone(), EventId::new(id));
        }
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&user, &EventId::new("a")));
        assert!(cache.contains(&user, &EventId::new("b")));
        assert!(cache.contains(&user, &EventId::new("c")));
    }
}
