use crate::clock::Clock;
use crate::clock::SystemClock;
use chrono::DateTime;
use chrono::TimeDelta;
use chrono::Utc;
use fieldx::fxstruct;
use moka::future::Cache;
use moka::ops::compute::CompResult;
use moka::ops::compute::Op;
use moka::policy::EvictionPolicy;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use tracing::trace;

/// A stored value together with the moment it was written and how long it may be served.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    value:     V,
    stored_at: DateTime<Utc>,
    ttl:       Duration,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, stored_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self { value, stored_at, ttl }
    }

    /// An entry stays live while its age does not exceed its TTL.
    #[inline]
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        let ttl = TimeDelta::from_std(self.ttl).unwrap_or(TimeDelta::MAX);
        now.signed_duration_since(self.stored_at) <= ttl
    }
}

/// Snapshot of a store's content. Taking it never changes the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub name:                     &'static str,
    pub size:                     usize,
    /// Entries whose TTL has run out but which no read or sweep has removed yet.
    pub expired:                  usize,
    pub keys:                     Vec<String>,
    pub approximate_memory_bytes: usize,
}

/// Key/value store with a TTL per entry.
///
/// Expired entries are never served: a read that finds one removes it and reports a miss. [`sweep`](Self::sweep)
/// reclaims memory held by expired entries nobody asks for, but correctness never depends on it.
///
/// ```ignore
/// let store = MemoryCache::<Arc<Vec<Movement>>>::builder()
///     .name("movements")
///     .default_ttl(Duration::from_secs(120))
///     .build()?;
/// store.set("v1-movements-u1|recent:50", Arc::new(rows), Duration::from_secs(120)).await;
/// ```
#[fxstruct(
    sync,
    no_new,
    builder(
        doc("Builder object of [`MemoryCache`].", "", "See [`MemoryCache::builder()`] method."),
        method_doc("Implement builder pattern for [`MemoryCache`]."),
    )
)]
pub struct MemoryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Store name. Most useful for debugging and logging.
    #[fieldx(get(copy), default("anonymous"))]
    name: &'static str,

    /// TTL used by [`insert`](Self::insert).
    #[fieldx(get(copy), default(Duration::from_secs(300)))]
    default_ttl: Duration,

    #[fieldx(get(copy), default(10_000))]
    max_capacity: u64,

    #[fieldx(get(clone), default(Arc::new(SystemClock) as Arc<dyn Clock>))]
    clock: Arc<dyn Clock>,

    #[fieldx(vis(pub(crate)), lazy, lock, clearer(private), get(clone), builder(off))]
    cache: Arc<Cache<String, CacheEntry<V>>>,
}

impl<V> MemoryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn build_cache(&self) -> Arc<Cache<String, CacheEntry<V>>> {
        Arc::new(
            Cache::builder()
                .max_capacity(self.max_capacity())
                .name(self.name())
                .eviction_policy(EvictionPolicy::lru())
                .build(),
        )
    }

    /// Store `value` under `key`, replacing whatever was there.
    pub async fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        trace!("[{}] SET({key}) ttl={ttl:?}", self.name());
        self.cache()
            .insert(key, CacheEntry::new(value, self.clock().now(), ttl))
            .await;
    }

    #[inline]
    pub async fn insert(&self, key: impl Into<String>, value: V) {
        self.set(key, value, self.default_ttl()).await
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        let entry = self.cache().get(key).await?;

        if entry.is_live_at(self.clock().now()) {
            trace!("[{}] HIT({key})", self.name());
            return Some(entry.value);
        }

        debug!("[{}] EXPIRED({key})", self.name());
        self.evict_if_expired(key).await;
        None
    }

    /// Drop a single key. Returns `true` if there was something to drop.
    pub async fn remove(&self, key: &str) -> bool {
        self.cache().remove(key).await.is_some()
    }

    /// Without a pattern every entry goes. With one, every entry whose key contains the pattern as a plain substring.
    /// Returns the number of removed entries; matching nothing is not an error.
    pub async fn clear(&self, pattern: Option<&str>) -> usize {
        let cache = self.cache();
        let victims = cache
            .iter()
            .filter(|(k, _)| pattern.is_none_or(|p| k.contains(p)))
            .map(|(k, _)| k)
            .collect::<Vec<_>>();

        for key in victims.iter() {
            cache.invalidate(key.as_str()).await;
        }

        if !victims.is_empty() {
            debug!(
                "[{}] CLEAR({}) removed={}",
                self.name(),
                pattern.unwrap_or("*"),
                victims.len()
            );
        }
        victims.len()
    }

    pub fn stats(&self) -> StoreStats {
        let now = self.clock().now();
        let mut stats = StoreStats {
            name: self.name(),
            ..Default::default()
        };

        for (key, entry) in self.cache().iter() {
            if !entry.is_live_at(now) {
                stats.expired += 1;
            }
            stats.approximate_memory_bytes += key.len() + std::mem::size_of::<CacheEntry<V>>();
            stats.keys.push(key.as_ref().clone());
        }

        stats.keys.sort_unstable();
        stats.size = stats.keys.len();
        stats
    }

    /// Remove every entry that has outlived its TTL. Returns the number of removed entries.
    pub async fn sweep(&self) -> usize {
        let now = self.clock().now();
        let expired = self
            .cache()
            .iter()
            .filter(|(_, entry)| !entry.is_live_at(now))
            .map(|(k, _)| k)
            .collect::<Vec<_>>();

        let mut removed = 0;
        for key in expired {
            if self.evict_if_expired(&key).await {
                removed += 1;
            }
        }

        self.cache().run_pending_tasks().await;

        if removed > 0 {
            debug!("[{}] SWEEP removed={removed}", self.name());
        }
        removed
    }

    // A concurrent writer may have replaced the entry since it was seen expired; only an entry that is still expired
    // at the moment of removal gets removed.
    async fn evict_if_expired(&self, key: &str) -> bool {
        let now = self.clock().now();
        let outcome = self
            .cache()
            .entry(key.to_string())
            .and_compute_with(|entry| {
                let op = match entry {
                    Some(entry) if !entry.value().is_live_at(now) => Op::Remove,
                    _ => Op::Nop,
                };
                std::future::ready(op)
            })
            .await;
        matches!(outcome, CompResult::Removed(_))
    }

    pub fn close(&self) {
        if let Some(cache) = self.clear_cache() {
            cache.invalidate_all();
        }
    }
}

impl<V> Debug for MemoryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("name", &self.name())
            .field("default_ttl", &self.default_ttl())
            .field("max_capacity", &self.max_capacity())
            .finish()
    }
}
