use crate::error::Error;
use crate::error::Result;
use crate::keys::MovementQuery;
use fieldx::fxstruct;
use std::time::Duration;

/// TTL policy and tuning knobs of a [`FinanceCache`](crate::domain::FinanceCache).
///
/// Every field has a default, so `CacheConfig::default()` is a usable configuration.
#[derive(Debug, Clone)]
#[fxstruct(sync, no_new, default, builder, get(copy))]
pub struct CacheConfig {
    /// The most recent movements change often; keep them only briefly.
    #[fieldx(default(Duration::from_secs(2 * 60)))]
    recent_movements_ttl: Duration,

    /// Arbitrary date ranges are less likely to be asked for again right away.
    #[fieldx(default(Duration::from_secs(10 * 60)))]
    range_movements_ttl: Duration,

    #[fieldx(default(Duration::from_secs(30 * 60)))]
    categories_ttl: Duration,

    #[fieldx(default(Duration::from_secs(5 * 60)))]
    statistics_ttl: Duration,

    #[fieldx(default(Duration::from_secs(60 * 60)))]
    profile_ttl: Duration,

    /// How many movements make up the "recent" slice fetched while warming or preloading.
    #[fieldx(default(50))]
    recent_movements_limit: usize,

    /// A key whose average fetch time goes above this is reported as slow.
    #[fieldx(default(Duration::from_millis(500)))]
    slow_query_threshold: Duration,

    /// Period of the background sweep, if one is started.
    #[fieldx(default(Duration::from_secs(60)))]
    sweep_interval: Duration,

    /// Entry limit of each domain store.
    #[fieldx(default(10_000))]
    max_capacity: u64,
}

impl CacheConfig {
    pub fn movements_ttl(&self, query: &MovementQuery) -> Duration {
        match query {
            MovementQuery::Recent { .. } => self.recent_movements_ttl(),
            MovementQuery::Range(_) => self.range_movements_ttl(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.recent_movements_limit() == 0 {
            return Err(Error::Config("recent_movements_limit must be at least 1".into()));
        }
        if self.max_capacity() == 0 {
            return Err(Error::Config("max_capacity must be at least 1".into()));
        }
        if self.sweep_interval().is_zero() {
            return Err(Error::Config("sweep_interval must not be zero".into()));
        }
        Ok(())
    }
}
