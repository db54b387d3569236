//! Process-wide cache of Automate session identifiers.
//!
//! Keys are browser-instance identifiers, values are the hashed session ids
//! reported by the remote grid. Each key owns its own slot so that resolving
//! one browser never blocks another, while concurrent lookups for the same
//! browser wait on a single resolution.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

type Slot = Arc<Mutex<Option<String>>>;

/// Browser-instance key to session-identifier map.
#[derive(Default)]
pub struct IdentityCache {
    slots: Mutex<HashMap<String, Slot>>,
}

impl fmt::Debug for IdentityCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityCache")
            .field("entries", &self.len())
            .finish()
    }
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Return the cached value for `key`, resolving it with `resolve` on a miss.
    ///
    /// A failed resolution stores nothing, so the next call retries.
    pub fn get_or_try_insert_with<E, F>(&self, key: &str, resolve: F) -> Result<String, E>
    where
        F: FnOnce() -> Result<String, E>,
    {
        let slot = self.slot(key);
        let mut value = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = value.as_ref() {
            return Ok(cached.clone());
        }

        match resolve() {
            Ok(resolved) => {
                *value = Some(resolved.clone());
                Ok(resolved)
            }
            Err(err) => {
                drop(value);
                self.discard_empty(key, slot);
                Err(err)
            }
        }
    }

    /// Remove `key` if its slot is still empty and nobody else is waiting on it.
    fn discard_empty(&self, key: &str, slot: Slot) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let unshared = match slots.get(key) {
            // One reference in the map, one held here.
            Some(current) => Arc::ptr_eq(current, &slot) && Arc::strong_count(&slot) == 2,
            None => false,
        };
        if unshared && slot.lock().unwrap_or_else(PoisonError::into_inner).is_none() {
            slots.remove(key);
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let slot = {
            let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.get(key)?.clone()
        };
        let value = slot.lock().unwrap_or_else(PoisonError::into_inner);
        value.clone()
    }

    pub fn store(&self, key: &str, value: impl Into<String>) {
        let slot = self.slot(key);
        *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(value.into());
    }

    /// Drop the entry for `key`. Returns `true` if a resolved value was removed.
    pub fn remove(&self, key: &str) -> bool {
        let removed = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.remove(key)
        };
        removed
            .map(|slot| {
                slot.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .is_some()
            })
            .unwrap_or(false)
    }

    pub fn clear(&self) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of resolved entries.
    pub fn len(&self) -> usize {
        let slots: Vec<Slot> = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        slots
            .iter()
            .filter(|slot| {
                slot.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .is_some()
            })
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn get_returns_none_when_missing() {
        let cache = IdentityCache::new();
        assert_eq!(cache.get("abc"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn remove_drops_existing_key() {
        let cache = IdentityCache::new();
        cache.store("A", "abc");
        assert_eq!(cache.get("A").as_deref(), Some("abc"));

        assert!(cache.remove("A"));
        assert_eq!(cache.get("A"), None);
        assert!(!cache.remove("A"));
    }

    #[test]
    fn resolves_each_key_once() {
        let cache = IdentityCache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_try_insert_with::<(), _>("browser-1", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("session-1".to_string())
                })
                .unwrap();
            assert_eq!(value, "session-1");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn failed_resolution_is_not_cached() {
        let cache = IdentityCache::new();

        let err = cache
            .get_or_try_insert_with("browser-1", || Err::<String, _>("no session"))
            .expect_err("first resolution fails");
        assert_eq!(err, "no session");
        assert_eq!(cache.get("browser-1"), None);
        assert!(cache.slots.lock().unwrap().is_empty());

        let value = cache
            .get_or_try_insert_with::<&str, _>("browser-1", || Ok("session-1".to_string()))
            .unwrap();
        assert_eq!(value, "session-1");
    }

    #[test]
    fn concurrent_first_access_resolves_once() {
        let cache = Arc::new(IdentityCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get_or_try_insert_with::<(), _>("browser-1", || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(20));
                            Ok("session-1".to_string())
                        })
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), "session-1");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failures_across_many_keys_leave_no_slots_behind() {
        let cache = IdentityCache::new();
        for index in 0..16 {
            let key = format!("browser-{index}");
            assert!(
                cache
                    .get_or_try_insert_with(&key, || Err::<String, _>("no session"))
                    .is_err()
            );
        }
        assert!(cache.slots.lock().unwrap().is_empty());

        cache.store("browser-0", "session-0");
        assert!(
            cache
                .get_or_try_insert_with("browser-1", || Err::<String, _>("no session"))
                .is_err()
        );
        assert_eq!(cache.slots.lock().unwrap().len(), 1);
        assert_eq!(cache.get("browser-0").as_deref(), Some("session-0"));
    }

    #[test]
    fn clear_forgets_everything() {
        let cache = IdentityCache::new();
        cache.store("A", "1");
        cache.store("B", "2");
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get("A"), None);
    }
}
