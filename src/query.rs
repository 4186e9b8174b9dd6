//! Cache-first query execution with per-key profiling.

use crate::store::MemoryCache;
use fieldx::fxstruct;
use futures_util::future::join_all;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use std::time::Instant;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

/// How a single [`QueryExecutor::execute`] call treats the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// When `false` the fetch always runs; its result still refreshes the cache.
    pub use_cache: bool,
    /// TTL of the stored result. The store's default TTL is used when unset.
    pub ttl:       Option<Duration>,
    pub profile:   bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            ttl:       None,
            profile:   true,
        }
    }
}

impl ExecuteOptions {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Use `ttl` unless a TTL has been set already.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.ttl.get_or_insert(ttl);
        self
    }

    pub fn bypass_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    pub fn without_profiling(mut self) -> Self {
        self.profile = false;
        self
    }
}

/// What the executor knows about one key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryProfile {
    pub calls:      u64,
    pub hits:       u64,
    /// Successful fetches.
    pub misses:     u64,
    pub failures:   u64,
    /// Rolling average over successful fetches; hits do not contribute.
    pub average_ms: f64,
    pub last_ms:    f64,
}

impl QueryProfile {
    fn record_hit(&mut self) {
        self.calls += 1;
        self.hits += 1;
    }

    fn record_fetch(&mut self, elapsed: Duration) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        self.calls += 1;
        self.misses += 1;
        self.last_ms = ms;
        self.average_ms += (ms - self.average_ms) / self.misses as f64;
    }

    fn record_failure(&mut self, elapsed: Duration) {
        self.calls += 1;
        self.failures += 1;
        self.last_ms = elapsed.as_secs_f64() * 1000.0;
    }

    pub fn hit_rate(&self) -> f64 {
        if self.calls == 0 {
            0.0
        }
        else {
            self.hits as f64 / self.calls as f64
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerformanceInsights {
    pub tracked_keys:     usize,
    pub total_calls:      u64,
    pub cache_hits:       u64,
    pub hit_rate:         f64,
    /// Average over all successful fetches of all keys.
    pub average_fetch_ms: f64,
    /// Keys whose average fetch time is above the threshold, slowest first.
    pub slow_queries:     Vec<(String, QueryProfile)>,
    /// The busiest keys by call count.
    pub most_frequent:    Vec<(String, u64)>,
}

type BoxFetch<'a, V, E> = Box<dyn FnOnce() -> BoxFuture<'a, Result<V, E>> + Send + 'a>;

/// One named slot of a [`QueryExecutor::batch`] call.
pub struct BatchEntry<'a, V, E> {
    key:     String,
    fetch:   BoxFetch<'a, V, E>,
    options: ExecuteOptions,
}

impl<'a, V, E> BatchEntry<'a, V, E> {
    pub fn new<F, Fut>(key: impl Into<String>, fetch: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = Result<V, E>> + Send + 'a,
    {
        Self {
            key:     key.into(),
            fetch:   Box::new(move || fetch().boxed()),
            options: ExecuteOptions::default(),
        }
    }

    pub fn options(mut self, options: ExecuteOptions) -> Self {
        self.options = options;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Runs fetches behind a [`MemoryCache`] and keeps timing statistics per key.
///
/// Profiling is purely observational: a slow key gets a `warn!` line, nothing else changes.
#[fxstruct(sync, no_new, builder)]
pub struct QueryExecutor {
    #[fieldx(get(copy), default(Duration::from_millis(500)))]
    slow_query_threshold: Duration,

    /// How many keys [`PerformanceInsights::most_frequent`] lists.
    #[fieldx(get(copy), default(5))]
    top_keys: usize,

    #[fieldx(get(off), builder(off), default(Mutex::new(HashMap::new())))]
    profiles: Mutex<HashMap<String, QueryProfile>>,
}

impl QueryExecutor {
    /// Serve `key` from `store` if possible, otherwise run `fetch` and store what it returns.
    ///
    /// A failed fetch is returned as is and leaves the cache untouched, so the next call fetches again.
    #[instrument(level = "trace", skip(self, store, fetch), fields(store = store.name()))]
    pub async fn execute<V, E, F, Fut>(
        &self,
        store: &MemoryCache<V>,
        key: &str,
        fetch: F,
        options: ExecuteOptions,
    ) -> Result<V, E>
    where
        V: Clone + Send + Sync + 'static,
        E: Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if options.use_cache {
            if let Some(value) = store.get(key).await {
                debug!("[{}] cache hit: {key}", store.name());
                if options.profile {
                    self.update_profile(key, QueryProfile::record_hit);
                }
                return Ok(value);
            }
        }

        let started = Instant::now();
        let outcome = fetch().await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(value) => {
                let ttl = options.ttl.unwrap_or_else(|| store.default_ttl());
                store.set(key, value.clone(), ttl).await;
                debug!("[{}] fetched {key} in {elapsed:?}", store.name());
                if options.profile {
                    let profile = self.update_profile(key, |p| p.record_fetch(elapsed));
                    self.warn_if_slow(key, &profile);
                }
                Ok(value)
            }
            Err(err) => {
                debug!("[{}] fetch of {key} failed after {elapsed:?}: {err}", store.name());
                if options.profile {
                    self.update_profile(key, |p| p.record_failure(elapsed));
                }
                Err(err)
            }
        }
    }

    /// Run every entry concurrently. A failing entry yields `None` in its slot and does not disturb the others.
    pub async fn batch<'a, V, E, N>(
        &self,
        store: &MemoryCache<V>,
        entries: impl IntoIterator<Item = (N, BatchEntry<'a, V, E>)>,
    ) -> HashMap<String, Option<V>>
    where
        V: Clone + Send + Sync + 'static,
        E: Display,
        N: Into<String>,
    {
        let pending = entries.into_iter().map(|(name, entry)| {
            let name = name.into();
            async move {
                let outcome = self.execute(store, &entry.key, entry.fetch, entry.options).await;
                (name, outcome)
            }
        });

        join_all(pending)
            .await
            .into_iter()
            .map(|(name, outcome)| match outcome {
                Ok(value) => (name, Some(value)),
                Err(err) => {
                    warn!("batch entry '{name}' failed: {err}");
                    (name, None)
                }
            })
            .collect()
    }

    fn update_profile(&self, key: &str, update: impl FnOnce(&mut QueryProfile)) -> QueryProfile {
        let mut profiles = self.profiles.lock();
        let profile = profiles.entry(key.to_string()).or_default();
        update(profile);
        profile.clone()
    }

    // Only consulted after a fetch; hits never add to the average.
    fn warn_if_slow(&self, key: &str, profile: &QueryProfile) {
        let threshold_ms = self.slow_query_threshold().as_secs_f64() * 1000.0;
        if profile.misses > 0 && profile.average_ms > threshold_ms {
            warn!(
                "slow query {key}: average {:.1}ms over {} fetches (threshold {threshold_ms:.0}ms)",
                profile.average_ms, profile.misses
            );
        }
    }

    pub fn profile(&self, key: &str) -> Option<QueryProfile> {
        self.profiles.lock().get(key).cloned()
    }

    pub fn performance_insights(&self) -> PerformanceInsights {
        let profiles = self.profiles.lock();
        let threshold_ms = self.slow_query_threshold().as_secs_f64() * 1000.0;

        let mut insights = PerformanceInsights {
            tracked_keys: profiles.len(),
            ..Default::default()
        };
        let mut fetches = 0u64;
        let mut fetch_ms = 0.0;

        for (key, profile) in profiles.iter() {
            insights.total_calls += profile.calls;
            insights.cache_hits += profile.hits;
            fetches += profile.misses;
            fetch_ms += profile.average_ms * profile.misses as f64;
            if profile.misses > 0 && profile.average_ms > threshold_ms {
                insights.slow_queries.push((key.clone(), profile.clone()));
            }
            insights.most_frequent.push((key.clone(), profile.calls));
        }

        if insights.total_calls > 0 {
            insights.hit_rate = insights.cache_hits as f64 / insights.total_calls as f64;
        }
        if fetches > 0 {
            insights.average_fetch_ms = fetch_ms / fetches as f64;
        }

        insights
            .slow_queries
            .sort_by(|a, b| b.1.average_ms.total_cmp(&a.1.average_ms).then_with(|| a.0.cmp(&b.0)));
        insights
            .most_frequent
            .sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        insights.most_frequent.truncate(self.top_keys());

        insights
    }

    pub fn clear_stats(&self) {
        self.profiles.lock().clear();
    }
}

impl std::fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("slow_query_threshold", &self.slow_query_threshold())
            .field("tracked_keys", &self.profiles.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::clock::Clock;
    use crate::clock::ManualClock;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use tracing_test::traced_test;

    fn setup() -> (QueryExecutor, MemoryCache<u32>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let store = MemoryCache::builder()
            .name("numbers")
            .clock(Arc::clone(&clock) as Arc<dyn Clock>)
            .default_ttl(Duration::from_secs(30))
            .build()
            .unwrap();
        (QueryExecutor::builder().build().unwrap(), store, clock)
    }

    #[tokio::test]
    async fn second_call_is_served_from_cache() {
        let (executor, store, _clock) = setup();
        let counter = AtomicUsize::new(0);
        let fetches = &counter;
        let fetch = move || async move {
            fetches.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(42)
        };

        assert_eq!(executor.execute(&store, "k", fetch, ExecuteOptions::default()).await, Ok(42));
        assert_eq!(executor.execute(&store, "k", fetch, ExecuteOptions::default()).await, Ok(42));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let profile = executor.profile("k").unwrap();
        assert_eq!((profile.calls, profile.hits, profile.misses), (2, 1, 1));
        assert_eq!(profile.hit_rate(), 0.5);
    }

    #[tokio::test]
    async fn ttl_option_and_expiry() {
        let (executor, store, clock) = setup();
        let options = ExecuteOptions::default().with_ttl(Duration::from_secs(5));

        executor.execute(&store, "k", || async { Ok::<_, String>(1) }, options).await.unwrap();
        clock.advance(Duration::from_secs(6));
        let value = executor.execute(&store, "k", || async { Ok::<_, String>(2) }, options).await;
        assert_eq!(value, Ok(2));
    }

    #[tokio::test]
    async fn failure_is_passed_through_and_not_cached() {
        let (executor, store, _clock) = setup();

        let err = executor
            .execute(&store, "k", || async { Err::<u32, _>("boom".to_string()) }, ExecuteOptions::default())
            .await;
        assert_eq!(err, Err("boom".to_string()));
        assert_eq!(store.stats().size, 0);

        let ok = executor
            .execute(&store, "k", || async { Ok::<_, String>(7) }, ExecuteOptions::default())
            .await;
        assert_eq!(ok, Ok(7));
        assert_eq!(executor.profile("k").unwrap().failures, 1);
    }

    #[tokio::test]
    async fn bypass_refreshes_cache() {
        let (executor, store, _clock) = setup();
        store.insert("k", 1).await;

        let value = executor
            .execute(&store, "k", || async { Ok::<_, String>(2) }, ExecuteOptions::default().bypass_cache())
            .await;
        assert_eq!(value, Ok(2));
        assert_eq!(store.get("k").await, Some(2));
    }

    #[tokio::test]
    async fn batch_isolates_failures() {
        let (executor, store, _clock) = setup();

        let results = executor
            .batch(
                &store,
                vec![
                    ("first", BatchEntry::new("k1", || async { Ok::<_, String>(1) })),
                    ("second", BatchEntry::new("k2", || async { Err("unavailable".to_string()) })),
                    ("third", BatchEntry::new("k3", || async { Ok(3) })),
                ],
            )
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results["first"], Some(1));
        assert_eq!(results["second"], None);
        assert_eq!(results["third"], Some(3));
        assert_eq!(store.get("k2").await, None);
    }

    #[tokio::test]
    async fn insights_flag_slow_keys() {
        let (_, store, _clock) = setup();
        let executor = QueryExecutor::builder()
            .slow_query_threshold(Duration::from_millis(5))
            .build()
            .unwrap();

        executor
            .execute(
                &store,
                "slow",
                || async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok::<_, String>(1)
                },
                ExecuteOptions::default(),
            )
            .await
            .unwrap();
        executor
            .execute(&store, "fast", || async { Ok::<_, String>(2) }, ExecuteOptions::default())
            .await
            .unwrap();
        executor
            .execute(&store, "fast", || async { Ok::<_, String>(2) }, ExecuteOptions::default())
            .await
            .unwrap();

        let insights = executor.performance_insights();
        assert_eq!(insights.tracked_keys, 2);
        assert_eq!(insights.total_calls, 3);
        assert_eq!(insights.cache_hits, 1);
        assert_eq!(insights.slow_queries.len(), 1);
        assert_eq!(insights.slow_queries[0].0, "slow");
        assert_eq!(insights.most_frequent[0], ("fast".to_string(), 2));

        executor.clear_stats();
        assert_eq!(executor.performance_insights().tracked_keys, 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn slow_warning_comes_from_fetches_only() {
        let (_, store, _clock) = setup();
        let executor = QueryExecutor::builder()
            .slow_query_threshold(Duration::from_millis(5))
            .build()
            .unwrap();

        for _ in 0..4 {
            executor
                .execute(
                    &store,
                    "slow",
                    || async {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, String>(1)
                    },
                    ExecuteOptions::default(),
                )
                .await
                .unwrap();
        }

        assert_eq!(executor.profile("slow").unwrap().hits, 3);
        logs_assert(|lines: &[&str]| {
            match lines.iter().filter(|line| line.contains("slow query slow")).count() {
                1 => Ok(()),
                n => Err(format!("expected a single slow query warning, got {n}")),
            }
        });
    }

    #[tokio::test]
    async fn unprofiled_calls_leave_no_trace() {
        let (executor, store, _clock) = setup();
        executor
            .execute(
                &store,
                "k",
                || async { Ok::<_, String>(1) },
                ExecuteOptions::default().without_profiling(),
            )
            .await
            .unwrap();
        assert!(executor.profile("k").is_none());
    }
}
