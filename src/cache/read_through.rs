//! Cache-aside reads with per-key single flight.
//!
//! A miss runs the loader once per key at a time; concurrent callers for the
//! same key wait and then observe the populated entry. Loader results are
//! cached as-is, so `Option::None` is stored as the JSON `null` negative
//! marker and served until its TTL lapses.
//!
//! Store failures never fail a read: a broken read falls through to the
//! loader and a broken write is logged.

use std::{future::Future, sync::Arc, time::Duration};

use dashmap::DashMap;
use metrics::counter;
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use super::keys::CacheKey;
use super::store::{KeyValueStore, KeyValueStoreExt};

pub struct ReadThroughCache {
    store: Arc<dyn KeyValueStore>,
    inflight: Gates,
}

impl ReadThroughCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            inflight: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Returns the cached value for `key`, or runs `loader` and caches its
    /// result for `ttl`.
    pub async fn get_or_load<T, E, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        loader: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let rendered = key.to_string();
        let namespace = key.namespace();

        if let Some(value) = self.lookup::<T>(&rendered).await {
            counter!("postline_cache_hit_total", "namespace" => namespace).increment(1);
            return Ok(value);
        }

        let flight = Flight::join(&self.inflight, &rendered);
        let _turn = flight.lock().await;

        // Another caller may have populated the entry while we waited.
        if let Some(value) = self.lookup::<T>(&rendered).await {
            counter!("postline_cache_hit_total", "namespace" => namespace).increment(1);
            return Ok(value);
        }

        counter!("postline_cache_miss_total", "namespace" => namespace).increment(1);
        let loaded = loader().await;
        if let Ok(value) = &loaded
            && let Err(err) = self.store.set_json_ex(&rendered, value, ttl).await
        {
            warn!(key = %rendered, error = %err, "failed to populate cache entry");
        }
        loaded
    }

    /// Removes `key` so the next read reloads it.
    ///
    /// Waits for an in-flight load of the same key in this process, so a
    /// value read before the caller's write cannot land after the delete.
    pub async fn invalidate(&self, key: &CacheKey) -> Result<(), super::store::KvError> {
        let rendered = key.to_string();
        let flight = Flight::join(&self.inflight, &rendered);
        let _turn = flight.lock().await;

        let removed = self.store.delete(&rendered).await?;
        debug!(key = %rendered, removed, "invalidated cache entry");
        Ok(())
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.store.get_json::<T>(key).await {
            Ok(value) => value,
            Err(err) => {
                warn!(key, error = %err, "cache read failed; falling back to loader");
                None
            }
        }
    }

    #[cfg(test)]
    fn inflight_len(&self) -> usize {
        self.inflight.len()
    }
}

type Gates = DashMap<String, Arc<Mutex<()>>>;

/// One caller's claim on the per-key gate.
///
/// Fields drop in order: the gate handle first, then the slot, so the slot
/// sees only the handles of callers still waiting or loading.
struct Flight<'a> {
    gate: Arc<Mutex<()>>,
    _slot: Slot<'a>,
}

impl<'a> Flight<'a> {
    fn join(inflight: &'a Gates, key: &'a str) -> Self {
        let gate = inflight
            .entry(key.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        Self {
            gate,
            _slot: Slot { inflight, key },
        }
    }

    async fn lock(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().await
    }
}

struct Slot<'a> {
    inflight: &'a Gates,
    key: &'a str,
}

impl Drop for Slot<'_> {
    // Runs on completion and on cancellation alike.
    fn drop(&mut self) {
        self.inflight
            .remove_if(self.key, |_, gate| Arc::strong_count(gate) == 1);
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::Notify;

    use super::*;
    use crate::cache::memory::MemoryStore;

    fn cache() -> ReadThroughCache {
        let store = MemoryStore::new(NonZeroUsize::new(128).expect("non-zero"));
        ReadThroughCache::new(Arc::new(store))
    }

    #[tokio::test]
    async fn miss_runs_loader_and_hit_skips_it() {
        let cache = cache();
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let key = CacheKey::Post(1);

        for _ in 0..3 {
            let value: Result<Option<String>, ()> = cache
                .get_or_load(&key, Duration::from_secs(60), || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Some("hello".to_string()))
                })
                .await;
            assert_eq!(value, Ok(Some("hello".to_string())));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.inflight_len(), 0);
    }

    #[tokio::test]
    async fn not_found_is_cached_as_null() {
        let cache = cache();
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let key = CacheKey::Post(404);

        for _ in 0..2 {
            let value: Result<Option<String>, ()> = cache
                .get_or_load(&key, Duration::from_secs(60), || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                })
                .await;
            assert_eq!(value, Ok(None));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            cache.store().get("post:404").await.expect("get").as_deref(),
            Some("null")
        );
    }

    #[tokio::test]
    async fn loader_errors_are_not_cached() {
        let cache = cache();
        let key = CacheKey::Post(5);

        let failed: Result<Option<String>, &str> = cache
            .get_or_load(&key, Duration::from_secs(60), || async { Err("db down") })
            .await;
        assert_eq!(failed, Err("db down"));

        let loaded: Result<Option<String>, &str> = cache
            .get_or_load(&key, Duration::from_secs(60), || async {
                Ok(Some("back".to_string()))
            })
            .await;
        assert_eq!(loaded, Ok(Some("back".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_reload() {
        let cache = cache();
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let key = CacheKey::Trending { hours: 24, limit: 5 };

        let load = || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ()>(vec![1_i64, 2, 3])
        };

        cache
            .get_or_load(&key, Duration::from_secs(60), load)
            .await
            .expect("first load");
        tokio::time::advance(Duration::from_secs(61)).await;
        cache
            .get_or_load(&key, Duration::from_secs(60), load)
            .await
            .expect("second load");

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_share_one_loader() {
        let cache = Arc::new(cache());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_load(&CacheKey::Post(9), Duration::from_secs(60), || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, ()>(Some(9_i64))
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.expect("task"), Ok(Some(9)));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.inflight_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_callers_release_the_gate() {
        let cache = cache();
        let key = CacheKey::Post(3);
        let slow = || async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, ()>(Some(3_i64))
        };

        let (loading, waiting) = tokio::join!(
            tokio::time::timeout(
                Duration::from_secs(1),
                cache.get_or_load(&key, Duration::from_secs(60), slow)
            ),
            tokio::time::timeout(
                Duration::from_secs(2),
                cache.get_or_load(&key, Duration::from_secs(60), slow)
            ),
        );

        assert!(loading.is_err());
        assert!(waiting.is_err());
        assert_eq!(cache.inflight_len(), 0);
    }

    #[tokio::test]
    async fn invalidate_waits_for_inflight_load() {
        let cache = Arc::new(cache());
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());

        let loading = tokio::spawn({
            let cache = Arc::clone(&cache);
            let started = Arc::clone(&started);
            let release = Arc::clone(&release);
            async move {
                cache
                    .get_or_load(&CacheKey::Post(7), Duration::from_secs(60), move || async move {
                        started.notify_one();
                        release.notified().await;
                        Ok::<_, ()>(Some("before write".to_string()))
                    })
                    .await
            }
        });
        started.notified().await;

        let invalidating = tokio::spawn({
            let cache = Arc::clone(&cache);
            async move { cache.invalidate(&CacheKey::Post(7)).await }
        });
        tokio::task::yield_now().await;
        release.notify_one();

        assert_eq!(
            loading.await.expect("task"),
            Ok(Some("before write".to_string()))
        );
        invalidating.await.expect("task").expect("invalidate");

        assert_eq!(cache.store().get("post:7").await.expect("get"), None);
        assert_eq!(cache.inflight_len(), 0);
    }
}
