//! Time-windowed memoizing cache
//!
//! Shields the upstream service from per-request read traffic. One cache
//! instance wraps one operation (the operation's identity is the instance);
//! keys encode the call's arguments and must be deterministic.
//!
//! Expiry is a single shared clock, not a per-entry TTL: once the window
//! elapses the *entire* map is cleared on the next call and the deadline
//! advances by the window. A completed call never refreshes anything early.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

struct Inner<K, V> {
    next_sweep: Instant,
    entries: HashMap<K, V>,
}

/// Memoizes one async operation for a fixed time window
pub struct TimedCache<K, V> {
    window: Duration,
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> TimedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            inner: Mutex::new(Inner {
                next_sweep: Instant::now() + window,
                entries: HashMap::new(),
            }),
        }
    }

    /// Return the cached value for `key`, or run `fetch` and store its result.
    ///
    /// Failures propagate and cache nothing. The lock is released while the
    /// fetch runs, so concurrent misses for the same key may each invoke the
    /// operation; the last writer wins.
    pub async fn get_or_fetch<E, F, Fut>(&self, key: K, fetch: F) -> std::result::Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
    {
        {
            let mut inner = self.inner.lock().await;
            let now = Instant::now();
            if now >= inner.next_sweep {
                debug!("cache window elapsed; clearing {} entries", inner.entries.len());
                inner.entries.clear();
                inner.next_sweep = now + self.window;
            }
            if let Some(value) = inner.entries.get(&key) {
                return Ok(value.clone());
            }
        }

        let value = fetch().await?;
        self.inner
            .lock()
            .await
            .entries
            .insert(key, value.clone());
        Ok(value)
    }

    /// Number of cached entries (test hook)
    #[cfg(test)]
    async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counted_fetch(
        calls: &AtomicUsize,
        value: i64,
    ) -> impl Future<Output = std::result::Result<i64, String>> + '_ {
        calls.fetch_add(1, Ordering::SeqCst);
        async move { Ok(value) }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_within_window_invokes_once() {
        let cache: TimedCache<String, i64> = TimedCache::new(Duration::from_secs(10));
        let calls = AtomicUsize::new(0);

        let a = cache
            .get_or_fetch("GW1".to_string(), || counted_fetch(&calls, 70))
            .await
            .unwrap();
        let b = cache
            .get_or_fetch("GW1".to_string(), || counted_fetch(&calls, 71))
            .await
            .unwrap();

        assert_eq!(a, 70);
        assert_eq!(b, 70); // cached value, second fetch never ran
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_elapse_clears_every_entry() {
        let cache: TimedCache<String, i64> = TimedCache::new(Duration::from_secs(10));
        let calls = AtomicUsize::new(0);

        cache
            .get_or_fetch("GW1".to_string(), || counted_fetch(&calls, 1))
            .await
            .unwrap();
        cache
            .get_or_fetch("GW2".to_string(), || counted_fetch(&calls, 2))
            .await
            .unwrap();
        assert_eq!(cache.len().await, 2);

        tokio::time::advance(Duration::from_secs(11)).await;

        // The sweep is global: GW2's entry goes away even though only GW1
        // is asked for
        let v = cache
            .get_or_fetch("GW1".to_string(), || counted_fetch(&calls, 10))
            .await
            .unwrap();
        assert_eq!(v, 10);
        assert_eq!(cache.len().await, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_call_does_not_refresh_the_clock() {
        let cache: TimedCache<String, i64> = TimedCache::new(Duration::from_secs(10));
        let calls = AtomicUsize::new(0);

        cache
            .get_or_fetch("GW1".to_string(), || counted_fetch(&calls, 1))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        // A hit at t=6 must not push the sweep past t=10
        cache
            .get_or_fetch("GW1".to_string(), || counted_fetch(&calls, 2))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;

        cache
            .get_or_fetch("GW1".to_string(), || counted_fetch(&calls, 3))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2); // swept at t=11
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_not_cached() {
        let cache: TimedCache<String, i64> = TimedCache::new(Duration::from_secs(10));
        let calls = AtomicUsize::new(0);

        let err = cache
            .get_or_fetch("GW1".to_string(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<i64, String>("read timed out".into()) }
            })
            .await
            .unwrap_err();
        assert_eq!(err, "read timed out");
        assert_eq!(cache.len().await, 0);

        let v = cache
            .get_or_fetch("GW1".to_string(), || counted_fetch(&calls, 42))
            .await
            .unwrap();
        assert_eq!(v, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
