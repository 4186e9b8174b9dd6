//! Finance-aware caching on top of the generic stores.
//!
//! [`FinanceCache`] owns one typed [`MemoryCache`] per data kind, builds versioned keys for them, applies the TTL
//! policy from [`CacheConfig`] and knows which caches a mutation makes stale:
//!
//! | Mutation | Invalidates |
//! | -------- | ----------- |
//! | movement created/updated/deleted | movements and statistics of the scope |
//! | category created/updated | categories of the scope |
//! | category deleted | categories and statistics of the scope |
//! | budget changed | nothing |
//!
//! Deleting a category also drops statistics because the breakdown resolves category names while aggregating:
//! movements of a deleted category move to "Sin categoría".

use crate::clock::Clock;
use crate::clock::SystemClock;
use crate::config::CacheConfig;
use crate::error::Error;
use crate::error::Result;
use crate::keys::CacheDomain;
use crate::keys::KeyVersions;
use crate::keys::MovementQuery;
use crate::keys::StatisticsQuery;
use crate::query::ExecuteOptions;
use crate::query::PerformanceInsights;
use crate::query::QueryExecutor;
use crate::stats::aggregate;
use crate::stats::StatisticsResult;
use crate::stats::StatsPeriod;
use crate::store::MemoryCache;
use crate::store::StoreStats;
use crate::traits::DataSource;
use crate::types::Category;
use crate::types::Movement;
use crate::types::Mutation;
use crate::types::Profile;
use crate::types::Scope;
use chrono::NaiveDate;
use fieldx::fxstruct;
use futures_util::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::warn;

pub type MovementList = Arc<Vec<Movement>>;
pub type CategoryList = Arc<Vec<Category>>;

/// Something worth having in the cache before the user asks for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarmTarget {
    RecentMovements,
    Categories,
    Statistics(StatsPeriod),
    Profile,
}

/// Screens whose data can be preloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Page {
    Dashboard,
    Movements,
    Statistics,
    Categories,
    Profile,
}

impl Page {
    pub fn targets(&self) -> &'static [WarmTarget] {
        match self {
            Self::Dashboard => &[
                WarmTarget::RecentMovements,
                WarmTarget::Statistics(StatsPeriod::HalfYear),
                WarmTarget::Categories,
            ],
            Self::Movements => &[WarmTarget::RecentMovements, WarmTarget::Categories],
            Self::Statistics => &[
                WarmTarget::Statistics(StatsPeriod::HalfYear),
                WarmTarget::Statistics(StatsPeriod::Year),
                WarmTarget::Categories,
            ],
            Self::Categories => &[WarmTarget::Categories],
            Self::Profile => &[WarmTarget::Profile],
        }
    }
}

/// Outcome of a warming run. Failures are reported here and in the log, never as an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarmReport {
    pub warmed: Vec<WarmTarget>,
    pub failed: Vec<WarmTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOverview {
    pub movements:  StoreStats,
    pub categories: StoreStats,
    pub statistics: StoreStats,
    pub profiles:   StoreStats,
}

impl CacheOverview {
    pub fn total_entries(&self) -> usize {
        self.movements.size + self.categories.size + self.statistics.size + self.profiles.size
    }

    pub fn approximate_memory_bytes(&self) -> usize {
        self.movements.approximate_memory_bytes
            + self.categories.approximate_memory_bytes
            + self.statistics.approximate_memory_bytes
            + self.profiles.approximate_memory_bytes
    }
}

/// ```ignore
/// let cache = Arc::new(FinanceCache::new(Arc::new(store_client), CacheConfig::default())?);
/// cache.start_sweeper();
///
/// let stats = cache.statistics(&scope, StatsPeriod::HalfYear, today).await?;
/// // ...after the user adds an expense:
/// cache.on_movement_changed(&scope, Mutation::Created).await;
/// ```
#[fxstruct(sync, no_new, default(off), builder)]
pub struct FinanceCache<DS>
where
    DS: DataSource,
{
    #[fieldx(builder(required, into), get(clone))]
    data_source: Arc<DS>,

    #[fieldx(get, default(CacheConfig::default()))]
    config: CacheConfig,

    #[fieldx(get(clone), default(Arc::new(SystemClock) as Arc<dyn Clock>))]
    clock: Arc<dyn Clock>,

    #[fieldx(get, builder(off), default(KeyVersions::default()))]
    versions: KeyVersions,

    #[fieldx(lazy, get(clone), builder(off))]
    executor: Arc<QueryExecutor>,

    #[fieldx(lazy, get(clone), builder(off))]
    movements_store: Arc<MemoryCache<MovementList>>,

    #[fieldx(lazy, get(clone), builder(off))]
    categories_store: Arc<MemoryCache<CategoryList>>,

    #[fieldx(lazy, get(clone), builder(off))]
    statistics_store: Arc<MemoryCache<Arc<StatisticsResult>>>,

    #[fieldx(lazy, get(clone), builder(off))]
    profile_store: Arc<MemoryCache<Arc<Profile>>>,

    #[fieldx(get(off), builder(off), default(Mutex::new(None)))]
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<DS> FinanceCache<DS>
where
    DS: DataSource,
{
    pub fn new(data_source: Arc<DS>, config: CacheConfig) -> Result<Self> {
        Self::with_clock(data_source, config, Arc::new(SystemClock))
    }

    pub fn with_clock(data_source: Arc<DS>, config: CacheConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        Self::builder()
            .data_source(data_source)
            .config(config)
            .clock(clock)
            .build()
            .map_err(Error::builder("FinanceCache"))
    }

    // The executor and store builders have no required fields, so `build()` cannot fail for them.

    fn build_executor(&self) -> Arc<QueryExecutor> {
        Arc::new(
            QueryExecutor::builder()
                .slow_query_threshold(self.config().slow_query_threshold())
                .build()
                .unwrap_or_else(|err| unreachable!("{err}")),
        )
    }

    fn new_store<V>(&self, name: &'static str, default_ttl: Duration) -> Arc<MemoryCache<V>>
    where
        V: Clone + Send + Sync + 'static,
    {
        Arc::new(
            MemoryCache::builder()
                .name(name)
                .default_ttl(default_ttl)
                .max_capacity(self.config().max_capacity())
                .clock(self.clock())
                .build()
                .unwrap_or_else(|err| unreachable!("{err}")),
        )
    }

    fn build_movements_store(&self) -> Arc<MemoryCache<MovementList>> {
        self.new_store(CacheDomain::Movements.as_str(), self.config().recent_movements_ttl())
    }

    fn build_categories_store(&self) -> Arc<MemoryCache<CategoryList>> {
        self.new_store(CacheDomain::Categories.as_str(), self.config().categories_ttl())
    }

    fn build_statistics_store(&self) -> Arc<MemoryCache<Arc<StatisticsResult>>> {
        self.new_store(CacheDomain::Statistics.as_str(), self.config().statistics_ttl())
    }

    fn build_profile_store(&self) -> Arc<MemoryCache<Arc<Profile>>> {
        self.new_store(CacheDomain::Profile.as_str(), self.config().profile_ttl())
    }

    #[inline]
    fn today(&self) -> NaiveDate {
        self.clock().now().date_naive()
    }

    // ---- Plain cache access
    //
    // A `ttl` of `None` stands for the domain's TTL from the configuration.

    pub async fn cache_movements(
        &self,
        scope: &Scope,
        query: &MovementQuery,
        movements: Vec<Movement>,
        ttl: Option<Duration>,
    ) -> MovementList {
        let movements = Arc::new(movements);
        self.movements_store()
            .set(
                self.versions().movements(scope, query),
                Arc::clone(&movements),
                ttl.unwrap_or_else(|| self.config().movements_ttl(query)),
            )
            .await;
        movements
    }

    pub async fn get_cached_movements(&self, scope: &Scope, query: &MovementQuery) -> Option<MovementList> {
        self.movements_store()
            .get(&self.versions().movements(scope, query))
            .await
    }

    pub async fn cache_categories(
        &self,
        scope: &Scope,
        categories: Vec<Category>,
        ttl: Option<Duration>,
    ) -> CategoryList {
        let categories = Arc::new(categories);
        self.categories_store()
            .set(
                self.versions().categories(scope),
                Arc::clone(&categories),
                ttl.unwrap_or_else(|| self.config().categories_ttl()),
            )
            .await;
        categories
    }

    pub async fn get_cached_categories(&self, scope: &Scope) -> Option<CategoryList> {
        self.categories_store().get(&self.versions().categories(scope)).await
    }

    pub async fn cache_statistics(
        &self,
        scope: &Scope,
        query: &StatisticsQuery,
        statistics: StatisticsResult,
        ttl: Option<Duration>,
    ) -> Arc<StatisticsResult> {
        let statistics = Arc::new(statistics);
        self.statistics_store()
            .set(
                self.versions().statistics(scope, query),
                Arc::clone(&statistics),
                ttl.unwrap_or_else(|| self.config().statistics_ttl()),
            )
            .await;
        statistics
    }

    pub async fn get_cached_statistics(&self, scope: &Scope, query: &StatisticsQuery) -> Option<Arc<StatisticsResult>> {
        self.statistics_store()
            .get(&self.versions().statistics(scope, query))
            .await
    }

    pub async fn cache_profile(&self, profile: Profile, ttl: Option<Duration>) -> Arc<Profile> {
        let profile = Arc::new(profile);
        self.profile_store()
            .set(
                self.versions().profile(&profile.user_id),
                Arc::clone(&profile),
                ttl.unwrap_or_else(|| self.config().profile_ttl()),
            )
            .await;
        profile
    }

    pub async fn get_cached_profile(&self, user_id: &str) -> Option<Arc<Profile>> {
        self.profile_store().get(&self.versions().profile(user_id)).await
    }

    // ---- Invalidation

    /// All date-range and recent-slice variants of the scope's movements.
    pub async fn invalidate_movements(&self, scope: &Scope) -> usize {
        let pattern = self.versions().scope_prefix(CacheDomain::Movements, scope);
        self.movements_store().clear(Some(&pattern)).await
    }

    pub async fn invalidate_categories(&self, scope: &Scope) -> usize {
        let pattern = self.versions().scope_prefix(CacheDomain::Categories, scope);
        self.categories_store().clear(Some(&pattern)).await
    }

    /// Statistics of every period for the scope.
    pub async fn invalidate_statistics(&self, scope: &Scope) -> usize {
        let pattern = self.versions().scope_prefix(CacheDomain::Statistics, scope);
        self.statistics_store().clear(Some(&pattern)).await
    }

    pub async fn invalidate_profile(&self, user_id: &str) -> usize {
        let pattern = self.versions().user_prefix(CacheDomain::Profile, user_id);
        self.profile_store().clear(Some(&pattern)).await
    }

    /// Everything cached for a user, personal and shared scopes alike.
    pub async fn invalidate_user(&self, user_id: &str) -> usize {
        let mut removed = 0;
        for domain in CacheDomain::ALL {
            for pattern in self.versions().user_patterns(domain, user_id) {
                removed += match domain {
                    CacheDomain::Movements => self.movements_store().clear(Some(&pattern)).await,
                    CacheDomain::Categories => self.categories_store().clear(Some(&pattern)).await,
                    CacheDomain::Statistics => self.statistics_store().clear(Some(&pattern)).await,
                    CacheDomain::Profile => self.profile_store().clear(Some(&pattern)).await,
                };
            }
        }
        debug!("invalidated {removed} entries of user {user_id}");
        removed
    }

    pub async fn on_movement_changed(&self, scope: &Scope, mutation: Mutation) -> usize {
        let removed = self.invalidate_movements(scope).await + self.invalidate_statistics(scope).await;
        debug!("movement {mutation:?} in {scope}: {removed} entries invalidated");
        removed
    }

    pub async fn on_category_changed(&self, scope: &Scope, mutation: Mutation) -> usize {
        let mut removed = self.invalidate_categories(scope).await;
        if mutation == Mutation::Deleted {
            removed += self.invalidate_statistics(scope).await;
        }
        debug!("category {mutation:?} in {scope}: {removed} entries invalidated");
        removed
    }

    /// Budgets are queried on their own; no cached domain depends on them.
    pub fn on_budget_changed(&self, scope: &Scope, mutation: Mutation) {
        debug!("budget {mutation:?} in {scope}: nothing to invalidate");
    }

    /// Orphan every cached key of a domain at once. Old entries are never read again and age out by TTL or sweep.
    pub fn bump_version(&self, domain: CacheDomain) -> u32 {
        let version = self.versions().bump(domain);
        info!("{domain} cache version bumped to v{version}");
        version
    }

    // ---- Cached data paths
    //
    // The `*_with` variants take per-call [`ExecuteOptions`]; a TTL left unset there falls back to the domain's TTL.

    pub async fn movements(&self, scope: &Scope, query: MovementQuery) -> Result<MovementList, DS::Error> {
        self.movements_with(scope, query, ExecuteOptions::default()).await
    }

    #[instrument(level = "debug", skip(self, scope), fields(scope = %scope))]
    pub async fn movements_with(
        &self,
        scope: &Scope,
        query: MovementQuery,
        options: ExecuteOptions,
    ) -> Result<MovementList, DS::Error> {
        let source = self.data_source();
        let key = self.versions().movements(scope, &query);

        self.executor()
            .execute(
                &self.movements_store(),
                &key,
                move || async move {
                    let rows = match query {
                        MovementQuery::Recent { limit } => source.recent_movements(scope, limit).await?,
                        MovementQuery::Range(range) => source.movements_in_range(scope, &range).await?,
                    };
                    Ok(Arc::new(rows))
                },
                options.with_default_ttl(self.config().movements_ttl(&query)),
            )
            .await
    }

    pub async fn recent_movements(&self, scope: &Scope) -> Result<MovementList, DS::Error> {
        self.movements(
            scope,
            MovementQuery::Recent {
                limit: self.config().recent_movements_limit(),
            },
        )
        .await
    }

    pub async fn categories(&self, scope: &Scope) -> Result<CategoryList, DS::Error> {
        self.categories_with(scope, ExecuteOptions::default()).await
    }

    #[instrument(level = "debug", skip(self, scope), fields(scope = %scope))]
    pub async fn categories_with(&self, scope: &Scope, options: ExecuteOptions) -> Result<CategoryList, DS::Error> {
        let source = self.data_source();
        let key = self.versions().categories(scope);

        self.executor()
            .execute(
                &self.categories_store(),
                &key,
                move || async move { Ok(Arc::new(source.categories(scope).await?)) },
                options.with_default_ttl(self.config().categories_ttl()),
            )
            .await
    }

    pub async fn profile(&self, user_id: &str) -> Result<Arc<Profile>, DS::Error> {
        self.profile_with(user_id, ExecuteOptions::default()).await
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn profile_with(&self, user_id: &str, options: ExecuteOptions) -> Result<Arc<Profile>, DS::Error> {
        let source = self.data_source();
        let key = self.versions().profile(user_id);

        self.executor()
            .execute(
                &self.profile_store(),
                &key,
                move || async move { Ok(Arc::new(source.profile(user_id).await?)) },
                options.with_default_ttl(self.config().profile_ttl()),
            )
            .await
    }

    /// Statistics for `period` months ending with the month of `reference`.
    ///
    /// On a miss the movement window is fetched straight from the source and aggregated; only the result is cached.
    /// Category names come through the categories cache.
    pub async fn statistics(
        &self,
        scope: &Scope,
        period: StatsPeriod,
        reference: NaiveDate,
    ) -> Result<Arc<StatisticsResult>, DS::Error> {
        self.statistics_with(scope, period, reference, ExecuteOptions::default())
            .await
    }

    #[instrument(level = "debug", skip(self, scope), fields(scope = %scope))]
    pub async fn statistics_with(
        &self,
        scope: &Scope,
        period: StatsPeriod,
        reference: NaiveDate,
        options: ExecuteOptions,
    ) -> Result<Arc<StatisticsResult>, DS::Error> {
        let source = self.data_source();
        let key = self.versions().statistics(scope, &StatisticsQuery::new(period, reference));

        self.executor()
            .execute(
                &self.statistics_store(),
                &key,
                move || async move {
                    let window = period.window(reference);
                    let (movements, categories) =
                        tokio::try_join!(source.movements_in_range(scope, &window), self.categories(scope))?;
                    Ok(Arc::new(aggregate(&movements, &categories, period.months(), reference)))
                },
                options.with_default_ttl(self.config().statistics_ttl()),
            )
            .await
    }

    // ---- Warming

    async fn warm_one(&self, scope: &Scope, target: WarmTarget, today: NaiveDate) -> Result<(), DS::Error> {
        match target {
            WarmTarget::RecentMovements => self.recent_movements(scope).await.map(drop),
            WarmTarget::Categories => self.categories(scope).await.map(drop),
            WarmTarget::Statistics(period) => self.statistics(scope, period, today).await.map(drop),
            WarmTarget::Profile => self.profile(&scope.user_id).await.map(drop),
        }
    }

    /// Fill the cache for `targets` concurrently, exactly as ordinary misses would.
    pub async fn warm(&self, scope: &Scope, targets: &[WarmTarget]) -> WarmReport {
        let today = self.today();
        let outcomes = join_all(targets.iter().map(|target| async move {
            (*target, self.warm_one(scope, *target, today).await)
        }))
        .await;

        let mut report = WarmReport::default();
        for (target, outcome) in outcomes {
            match outcome {
                Ok(()) => report.warmed.push(target),
                Err(err) => {
                    warn!("warming {target:?} for {scope} failed: {err}");
                    report.failed.push(target);
                }
            }
        }
        report
    }

    /// What the dashboard needs plus the user profile.
    pub async fn warm_user_cache(&self, scope: &Scope) -> WarmReport {
        let mut targets = Page::Dashboard.targets().to_vec();
        targets.push(WarmTarget::Profile);
        self.warm(scope, &targets).await
    }

    pub async fn preload_for_page(&self, scope: &Scope, page: Page) -> WarmReport {
        self.warm(scope, page.targets()).await
    }

    // ---- Maintenance

    pub fn stats(&self) -> CacheOverview {
        CacheOverview {
            movements:  self.movements_store().stats(),
            categories: self.categories_store().stats(),
            statistics: self.statistics_store().stats(),
            profiles:   self.profile_store().stats(),
        }
    }

    pub fn performance_insights(&self) -> PerformanceInsights {
        self.executor().performance_insights()
    }

    pub fn clear_performance_stats(&self) {
        self.executor().clear_stats()
    }

    pub async fn sweep(&self) -> usize {
        let removed = self.movements_store().sweep().await
            + self.categories_store().sweep().await
            + self.statistics_store().sweep().await
            + self.profile_store().sweep().await;
        if removed > 0 {
            info!("sweep removed {removed} expired entries");
        }
        removed
    }

    pub async fn clear_all(&self) -> usize {
        self.movements_store().clear(None).await
            + self.categories_store().clear(None).await
            + self.statistics_store().clear(None).await
            + self.profile_store().clear(None).await
    }

    /// Start sweeping expired entries every `sweep_interval`. Must be called from within a Tokio runtime. The task
    /// holds no strong reference to the cache and ends once the cache is dropped or closed.
    pub fn start_sweeper(self: &Arc<Self>) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let cache = Arc::downgrade(self);
        let period = self.config().sweep_interval();
        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade()
                else {
                    break;
                };
                cache.sweep().await;
            }
        }));
        debug!("sweeper started, period {period:?}");
    }

    pub fn sweeper_running(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stop the sweeper and drop every cached entry.
    pub async fn close(&self) {
        let task = self.sweeper.lock().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
        self.clear_all().await;
    }
}
