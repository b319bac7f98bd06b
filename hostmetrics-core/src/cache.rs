//! Time-boxed single-flight cache and the one-slot sample history used for
//! delta metrics.

use crate::error::{MetricsError, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Outcome slot shared between the caller doing the work and everyone
/// waiting for it.
pub(crate) struct Flight<T> {
    outcome: Mutex<Option<T>>,
    done: Condvar,
}

impl<T: Clone> Flight<T> {
    pub(crate) fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    pub(crate) fn wait(&self) -> T {
        let mut outcome = self.outcome.lock();
        loop {
            if let Some(value) = outcome.as_ref() {
                return value.clone();
            }
            self.done.wait(&mut outcome);
        }
    }

    pub(crate) fn complete(&self, value: T) {
        *self.outcome.lock() = Some(value);
        self.done.notify_all();
    }
}

struct CacheEntry<V> {
    value: Result<V>,
    captured_at: Instant,
    /// `None` never expires; used for permanent failures.
    ttl: Option<Duration>,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.duration_since(self.captured_at) < ttl,
            None => true,
        }
    }
}

enum Slot<V> {
    Ready(CacheEntry<V>),
    Pending(Arc<Flight<Result<V>>>),
}

/// A per-key cache where concurrent misses on the same key share one fetch.
///
/// Successful values live for the ttl given at fetch time. Failures are
/// handed to every waiter of that fetch and then forgotten, unless
/// [`MetricsError::is_permanent`] says they are facts about the host, in
/// which case they are kept until invalidated.
pub struct TtlCache<K, V> {
    name: &'static str,
    slots: Mutex<HashMap<K, Slot<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn get<F>(&self, key: &K, ttl: Duration, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        let flight = {
            let mut slots = self.slots.lock();
            let in_flight = match slots.get(key) {
                Some(Slot::Ready(entry)) if entry.is_fresh(Instant::now()) => {
                    return entry.value.clone();
                }
                Some(Slot::Pending(flight)) => Some(Arc::clone(flight)),
                _ => None,
            };
            match in_flight {
                Some(flight) => {
                    drop(slots);
                    return flight.wait();
                }
                None => {
                    let flight = Arc::new(Flight::new());
                    slots.insert(key.clone(), Slot::Pending(Arc::clone(&flight)));
                    flight
                }
            }
        };

        debug!(cache = self.name, key = ?key, "cache miss");
        let mut guard = PendingFetch {
            cache: self,
            key,
            flight,
            published: false,
        };
        let outcome = fetch();
        guard.publish(outcome.clone(), ttl);
        outcome
    }

    pub fn invalidate(&self, key: &K) {
        self.slots.lock().remove(key);
    }

    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Publishes the fetch outcome, or a failure if the fetch unwound, so that
/// waiters are never left parked.
struct PendingFetch<'a, K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    cache: &'a TtlCache<K, V>,
    key: &'a K,
    flight: Arc<Flight<Result<V>>>,
    published: bool,
}

impl<K, V> PendingFetch<'_, K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    fn publish(&mut self, outcome: Result<V>, ttl: Duration) {
        let entry_ttl = match &outcome {
            Ok(_) => Some(Some(ttl)),
            Err(err) if err.is_permanent() => Some(None),
            Err(err) => {
                warn!(cache = self.cache.name, key = ?self.key, error = %err, "fetch failed");
                None
            }
        };

        {
            let mut slots = self.cache.slots.lock();
            // an invalidation may have replaced our pending slot meanwhile
            let ours = matches!(
                slots.get(self.key),
                Some(Slot::Pending(flight)) if Arc::ptr_eq(flight, &self.flight)
            );
            if ours {
                match entry_ttl {
                    Some(ttl) => {
                        slots.insert(
                            self.key.clone(),
                            Slot::Ready(CacheEntry {
                                value: outcome.clone(),
                                captured_at: Instant::now(),
                                ttl,
                            }),
                        );
                    }
                    None => {
                        slots.remove(self.key);
                    }
                }
            }
        }

        self.flight.complete(outcome);
        self.published = true;
    }
}

impl<K, V> Drop for PendingFetch<'_, K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    fn drop(&mut self) {
        if !self.published {
            let err = MetricsError::provider(self.cache.name, format!("{:?}", self.key), "fetch panicked");
            self.publish(Err(err), Duration::ZERO);
        }
    }
}

/// A value together with the instant it was sampled.
#[derive(Debug, Clone)]
pub struct Sampled<V> {
    pub value: V,
    pub at: Instant,
}

/// Exactly one retained sample per key, kept until replaced or cleared.
pub struct SnapshotHistory<K, V> {
    slots: Mutex<HashMap<K, Sampled<V>>>,
}

impl<K, V> SnapshotHistory<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &K) -> Option<Sampled<V>> {
        self.slots.lock().get(key).cloned()
    }

    /// Stores `value` and returns whatever it replaced.
    pub fn replace(&self, key: K, value: V, at: Instant) -> Option<Sampled<V>> {
        self.slots.lock().insert(key, Sampled { value, at })
    }

    /// Stores `value` unless the retained sample was taken later than `at`.
    /// Returns whether the slot was updated.
    pub fn replace_if_newer(&self, key: K, value: V, at: Instant) -> bool {
        let mut slots = self.slots.lock();
        match slots.get(&key) {
            Some(stored) if stored.at > at => false,
            _ => {
                slots.insert(key, Sampled { value, at });
                true
            }
        }
    }

    pub fn remove(&self, key: &K) {
        self.slots.lock().remove(key);
    }

    pub fn clear(&self) {
        self.slots.lock().clear();
    }
}

impl<K: Eq + Hash, V: Clone> Default for SnapshotHistory<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn concurrent_misses_share_one_fetch() {
        let cache: Arc<TtlCache<&'static str, u64>> = Arc::new(TtlCache::new("test"));
        let fetches = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(50));

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let fetches = Arc::clone(&fetches);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache.get(&"mem", Duration::from_secs(60), || {
                        fetches.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(100));
                        Ok(4242)
                    })
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| *r == Ok(4242)));
    }

    #[test]
    fn waiters_share_the_failure_which_is_not_cached() {
        let cache: Arc<TtlCache<u32, u64>> = Arc::new(TtlCache::new("test"));
        let fetches = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let fetches = Arc::clone(&fetches);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache.get(&1, Duration::from_secs(60), || {
                        fetches.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(100));
                        Err(MetricsError::provider("proc_mem", 1, "ESRCH"))
                    })
                })
            })
            .collect();

        for handle in handles {
            assert!(matches!(handle.join().unwrap(), Err(MetricsError::Provider { .. })));
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert!(cache.is_empty());

        let value = cache.get(&1, Duration::from_secs(60), || Ok(7));
        assert_eq!(value, Ok(7));
    }

    #[test]
    fn serves_from_cache_until_ttl_expires() {
        let cache: TtlCache<(), u64> = TtlCache::new("test");
        let fetches = AtomicUsize::new(0);
        let fetch = || {
            let n = fetches.fetch_add(1, Ordering::SeqCst) as u64;
            Ok(n)
        };
        let ttl = Duration::from_millis(100);

        assert_eq!(cache.get(&(), ttl, fetch), Ok(0));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(cache.get(&(), ttl, fetch), Ok(0));
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        thread::sleep(Duration::from_millis(100));
        assert_eq!(cache.get(&(), ttl, fetch), Ok(1));
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn permanent_failures_are_remembered() {
        let cache: TtlCache<(), u64> = TtlCache::new("test");
        let fetches = AtomicUsize::new(0);
        let fetch = || {
            fetches.fetch_add(1, Ordering::SeqCst);
            Err(MetricsError::NotImplemented { kind: "cpu" })
        };

        for _ in 0..3 {
            assert_eq!(
                cache.get(&(), Duration::ZERO, fetch),
                Err(MetricsError::NotImplemented { kind: "cpu" })
            );
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        cache.invalidate(&());
        let _ = cache.get(&(), Duration::ZERO, fetch);
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn keys_expire_independently() {
        let cache: TtlCache<&'static str, u64> = TtlCache::new("test");
        cache.get(&"a", Duration::from_secs(60), || Ok(1)).unwrap();
        cache.get(&"b", Duration::from_secs(60), || Ok(2)).unwrap();

        cache.invalidate(&"a");
        assert_eq!(cache.get(&"a", Duration::from_secs(60), || Ok(10)), Ok(10));
        assert_eq!(cache.get(&"b", Duration::from_secs(60), || Ok(20)), Ok(2));
    }

    #[test]
    fn panicking_fetch_releases_waiters() {
        let cache: Arc<TtlCache<(), u64>> = Arc::new(TtlCache::new("test"));
        let (started_tx, started_rx) = std::sync::mpsc::channel();

        let panicking = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                cache.get(&(), Duration::from_secs(60), || -> Result<u64> {
                    started_tx.send(()).unwrap();
                    thread::sleep(Duration::from_millis(100));
                    panic!("provider blew up");
                })
            })
        };
        started_rx.recv().unwrap();
        let waiter = cache.get(&(), Duration::from_secs(60), || Ok(1));

        assert!(panicking.join().is_err());
        assert!(matches!(waiter, Err(MetricsError::Provider { .. })));
        assert!(cache.is_empty());
    }

    #[test]
    fn history_keeps_one_sample_per_key() {
        let history: SnapshotHistory<u32, u64> = SnapshotHistory::new();
        let now = Instant::now();
        assert!(history.replace(1, 10, now).is_none());
        assert_eq!(history.replace(1, 20, now).map(|s| s.value), Some(10));
        assert_eq!(history.get(&1).map(|s| s.value), Some(20));
        assert!(history.get(&2).is_none());

        history.clear();
        assert!(history.get(&1).is_none());
    }

    #[test]
    fn history_keeps_the_latest_sample() {
        let history: SnapshotHistory<&'static str, u64> = SnapshotHistory::new();
        let earlier = Instant::now();
        let later = earlier + Duration::from_millis(5);

        assert!(history.replace_if_newer("eth0", 2, later));
        assert!(!history.replace_if_newer("eth0", 1, earlier));
        assert_eq!(history.get(&"eth0").unwrap().value, 2);

        assert!(history.replace_if_newer("eth0", 3, later + Duration::from_millis(1)));
        assert_eq!(history.get(&"eth0").unwrap().value, 3);
    }
}
