//! Keyed mutual exclusion.
//!
//! A [`KeyedLocks`] registry holds the set of currently claimed keys. A key
//! that is absent is unlocked; claiming inserts it and dropping the returned
//! [`KeyGuard`] removes it again. Unrelated keys never contend.

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Notify;

struct Registry<K> {
    held: Mutex<HashSet<K>>,
    released: Notify,
}

pub struct KeyedLocks<K> {
    inner: Arc<Registry<K>>,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Registry {
                held: Mutex::new(HashSet::new()),
                released: Notify::new(),
            }),
        }
    }

    /// Claim `key` if nobody holds it. Never waits.
    pub fn try_lock(&self, key: K) -> Option<KeyGuard<K>> {
        let mut held = self
            .inner
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !held.insert(key.clone()) {
            return None;
        }
        Some(KeyGuard {
            registry: Arc::clone(&self.inner),
            key,
        })
    }

    /// Claim `key`, waiting for the current holder to release it.
    pub async fn lock(&self, key: K) -> KeyGuard<K> {
        loop {
            // Register interest before checking so a release between the
            // check and the await is not missed.
            let released = self.inner.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if let Some(guard) = self.try_lock(key.clone()) {
                return guard;
            }
            released.await;
        }
    }

    pub fn is_locked(&self, key: &K) -> bool {
        self.inner
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    /// Number of keys currently held.
    pub fn held_count(&self) -> usize {
        self.inner
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<K> Default for KeyedLocks<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Clone for KeyedLocks<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> fmt::Debug for KeyedLocks<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedLocks").finish_non_exhaustive()
    }
}

/// Ownership of one key. Released on drop.
pub struct KeyGuard<K: Eq + Hash> {
    registry: Arc<Registry<K>>,
    key: K,
}

impl<K: Eq + Hash> KeyGuard<K> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash> Drop for KeyGuard<K> {
    fn drop(&mut self) {
        self.registry
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
        self.registry.released.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_try_lock_rejects_held_key() {
        let locks = KeyedLocks::new();
        let guard = locks.try_lock("a").unwrap();
        assert!(locks.try_lock("a").is_none());
        assert!(locks.is_locked(&"a"));
        drop(guard);
        assert!(!locks.is_locked(&"a"));
        assert!(locks.try_lock("a").is_some());
    }

    #[test]
    fn test_distinct_keys_do_not_contend() {
        let locks = KeyedLocks::new();
        let _a = locks.try_lock(("t1", "s1")).unwrap();
        let _b = locks.try_lock(("t1", "s2")).unwrap();
        let _c = locks.try_lock(("t2", "s1")).unwrap();
        assert_eq!(locks.held_count(), 3);
    }

    #[tokio::test]
    async fn test_lock_waits_for_release() {
        let locks = KeyedLocks::new();
        let guard = locks.try_lock(7u32).unwrap();

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock(7u32).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(!locks.is_locked(&7));
    }

    #[tokio::test]
    async fn test_lock_serializes_same_key() {
        let locks = KeyedLocks::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = Arc::clone(&inside);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                let _g = locks.lock("target").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
