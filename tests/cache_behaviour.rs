use chrono::NaiveDate;
use chrono::TimeZone;
use chrono::Utc;
use fin_cache::memory::MemorySource;
use fin_cache::memory::SourceError;
use fin_cache::prelude::*;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 2, 14, 9, 30, 0).unwrap()))
}

fn store<V: Clone + Send + Sync + 'static>(clock: &Arc<ManualClock>) -> MemoryCache<V> {
    MemoryCache::builder()
        .name("test")
        .clock(clock.clone() as Arc<dyn Clock>)
        .build()
        .unwrap()
}

#[tokio::test]
async fn ttl_entry_disappears_after_expiry() {
    let clock = clock();
    let store = store::<String>(&clock);

    store.set("k", "v".to_string(), Duration::from_secs(30)).await;
    assert_eq!(store.get("k").await.as_deref(), Some("v"));

    clock.advance(Duration::from_secs(31));
    assert_eq!(store.get("k").await, None);
    assert!(!store.stats().keys.contains(&"k".to_string()));
}

#[tokio::test]
async fn substring_clear_is_scoped() {
    let clock = clock();
    let store = store::<u32>(&clock);

    store.insert("v1-movements-u1|recent:50", 1).await;
    store.insert("v1-movements-u1|range:2024-01-01..2024-01-31", 2).await;
    store.insert("v1-movements-u2|recent:50", 3).await;
    store.insert("v1-categories-u1|", 4).await;

    assert_eq!(store.clear(Some("movements-u1")).await, 2);
    assert_eq!(
        store.stats().keys,
        vec!["v1-categories-u1|".to_string(), "v1-movements-u2|recent:50".to_string()]
    );
    assert_eq!(store.clear(Some("nothing-like-this")).await, 0);
}

#[tokio::test]
async fn batch_survives_a_failing_entry() {
    let clock = clock();
    let store = store::<u32>(&clock);
    let executor = QueryExecutor::builder().build().unwrap();

    let results = executor
        .batch(
            &store,
            [
                ("one", BatchEntry::new("k1", || async { Ok::<_, SourceError>(1) })),
                ("two", BatchEntry::new("k2", || async { Err(SourceError::Unavailable) })),
                ("three", BatchEntry::new("k3", || async { Ok(3) })),
            ],
        )
        .await;

    assert_eq!(results.get("one"), Some(&Some(1)));
    assert_eq!(results.get("two"), Some(&None));
    assert_eq!(results.get("three"), Some(&Some(3)));
}

fn household() -> (Arc<MemorySource>, Arc<ManualClock>, FinanceCache<MemorySource>) {
    let source = Arc::new(MemorySource::new());
    let clock = clock();

    for scope in [
        Scope::personal("u1"),
        Scope::shared("u1", "home"),
        Scope::personal("u10"),
    ] {
        source.set_movements(
            &scope,
            vec![
                Movement::income("salary", dec!(1500), date(2024, 2, 1)),
                Movement::expense("rent", dec!(700), Some("house"), date(2024, 2, 3)),
            ],
        );
        source.set_categories(&scope, vec![Category::new("house", "Vivienda", None)]);
    }
    for user in ["u1", "u10"] {
        source.set_profile(Profile {
            user_id:      user.into(),
            display_name: None,
            currency:     "MXN".into(),
        });
    }

    let cache = FinanceCache::with_clock(Arc::clone(&source), CacheConfig::default(), clock.clone()).unwrap();
    (source, clock, cache)
}

#[tokio::test]
async fn invalidating_a_user_spares_other_users() {
    let (_source, _clock, cache) = household();

    for scope in [
        Scope::personal("u1"),
        Scope::shared("u1", "home"),
        Scope::personal("u10"),
    ] {
        let report = cache.warm_user_cache(&scope).await;
        assert!(report.failed.is_empty(), "warming {scope} failed: {report:?}");
    }

    let before = cache.stats().total_entries();
    let removed = cache.invalidate_user("u1").await;
    assert!(removed > 0);

    let overview = cache.stats();
    assert_eq!(overview.total_entries(), before - removed);
    for key in overview
        .movements
        .keys
        .iter()
        .chain(&overview.categories.keys)
        .chain(&overview.statistics.keys)
        .chain(&overview.profiles.keys)
    {
        assert!(key.contains("-u10|"), "unexpected survivor {key}");
    }
}

#[tokio::test]
async fn shared_scope_is_invalidated_on_its_own() {
    let (source, _clock, cache) = household();
    let personal = Scope::personal("u1");
    let shared = Scope::shared("u1", "home");

    cache.recent_movements(&personal).await.unwrap();
    cache.recent_movements(&shared).await.unwrap();

    cache.on_movement_changed(&shared, Mutation::Deleted).await;
    assert!(cache
        .get_cached_movements(&personal, &MovementQuery::Recent { limit: 50 })
        .await
        .is_some());
    assert!(cache
        .get_cached_movements(&shared, &MovementQuery::Recent { limit: 50 })
        .await
        .is_none());

    source.reset_fetch_count();
    cache.recent_movements(&shared).await.unwrap();
    assert_eq!(source.fetch_count(), 1);
}

#[tokio::test]
async fn statistics_follow_new_movements_after_invalidation() {
    let (source, _clock, cache) = household();
    let scope = Scope::personal("u1");
    let today = date(2024, 2, 14);

    let before = cache.statistics(&scope, StatsPeriod::HalfYear, today).await.unwrap();
    assert_eq!(before.detailed_stats.balance, dec!(800));

    source.add_movement(&scope, Movement::expense("food", dec!(300), None, date(2024, 2, 10)));
    // Still served from the cache until somebody reports the change.
    let stale = cache.statistics(&scope, StatsPeriod::HalfYear, today).await.unwrap();
    assert_eq!(stale.detailed_stats.balance, dec!(800));

    cache.on_movement_changed(&scope, Mutation::Created).await;
    let fresh = cache.statistics(&scope, StatsPeriod::HalfYear, today).await.unwrap();
    assert_eq!(fresh.detailed_stats.balance, dec!(500));
    assert_eq!(fresh.category_stats.len(), 2);
}

#[tokio::test]
async fn preloading_pages_fills_what_they_show() {
    let (source, _clock, cache) = household();
    let scope = Scope::personal("u1");

    let report = cache.preload_for_page(&scope, Page::Statistics).await;
    assert_eq!(report.warmed.len(), 3);
    assert!(cache
        .get_cached_statistics(&scope, &StatisticsQuery::new(StatsPeriod::Year, date(2024, 2, 1)))
        .await
        .is_some());

    source.reset_fetch_count();
    cache.preload_for_page(&scope, Page::Categories).await;
    cache.statistics(&scope, StatsPeriod::HalfYear, date(2024, 2, 29)).await.unwrap();
    assert_eq!(source.fetch_count(), 0);
}

#[tokio::test]
async fn profile_outlives_statistics() {
    let (source, clock, cache) = household();
    let scope = Scope::personal("u1");

    cache.preload_for_page(&scope, Page::Dashboard).await;
    cache.preload_for_page(&scope, Page::Profile).await;

    clock.advance(Duration::from_secs(31 * 60));
    assert_eq!(cache.sweep().await, 3);
    let overview = cache.stats();
    assert_eq!(overview.profiles.size, 1);
    assert_eq!(overview.statistics.size + overview.movements.size + overview.categories.size, 0);

    source.reset_fetch_count();
    cache.profile("u1").await.unwrap();
    assert_eq!(source.fetch_count(), 0);
}

#[tokio::test]
async fn insights_count_hits_and_misses() {
    let (_source, _clock, cache) = household();
    let scope = Scope::personal("u1");

    cache.categories(&scope).await.unwrap();
    cache.categories(&scope).await.unwrap();
    cache.categories(&scope).await.unwrap();

    let insights = cache.performance_insights();
    assert_eq!(insights.total_calls, 3);
    assert_eq!(insights.cache_hits, 2);
    assert!(insights.slow_queries.is_empty());

    cache.clear_performance_stats();
    assert_eq!(cache.performance_insights().total_calls, 0);
}

#[tokio::test]
async fn lookalike_ids_never_share_entries() {
    let (source, _clock, cache) = household();
    let household = Scope::shared("u1", "home");
    let lookalike = Scope::personal("u1:home");
    source.set_movements(
        &lookalike,
        vec![
            Movement::income("gift", dec!(20), date(2024, 2, 5)),
            Movement::income("refund", dec!(5), date(2024, 2, 6)),
        ],
    );

    let shared_rows = cache.recent_movements(&household).await.unwrap();
    source.reset_fetch_count();
    let lookalike_rows = cache.recent_movements(&lookalike).await.unwrap();

    assert_eq!(source.fetch_count(), 1);
    assert_eq!(shared_rows.len(), 2);
    assert!(lookalike_rows.iter().all(|m| m.id == "gift" || m.id == "refund"));

    // Dropping user u1 leaves the user literally named "u1:home" alone.
    cache.invalidate_user("u1").await;
    assert!(cache
        .get_cached_movements(&lookalike, &MovementQuery::Recent { limit: 50 })
        .await
        .is_some());
    assert!(cache
        .get_cached_movements(&household, &MovementQuery::Recent { limit: 50 })
        .await
        .is_none());
}

#[tokio::test]
async fn per_call_ttl_overrides_the_domain_default() {
    let (source, clock, cache) = household();
    let scope = Scope::personal("u1");

    cache
        .categories_with(&scope, ExecuteOptions::default().with_ttl(Duration::from_secs(60)))
        .await
        .unwrap();
    cache
        .cache_profile(
            Profile {
                user_id:      "u1".into(),
                display_name: Some("Ana".into()),
                currency:     "MXN".into(),
            },
            Some(Duration::from_secs(2 * 60 * 60)),
        )
        .await;
    cache
        .cache_movements(&scope, &MovementQuery::Recent { limit: 50 }, Vec::new(), None)
        .await;

    clock.advance(Duration::from_secs(61));
    // Categories would live 30 minutes by default; this entry was stored for one.
    assert!(cache.get_cached_categories(&scope).await.is_none());
    assert!(cache
        .get_cached_movements(&scope, &MovementQuery::Recent { limit: 50 })
        .await
        .is_some());

    clock.advance(Duration::from_secs(90 * 60));
    // Past the one-hour profile default, within the two hours given at store time.
    assert_eq!(
        cache.get_cached_profile("u1").await.unwrap().display_name.as_deref(),
        Some("Ana")
    );
    assert!(cache
        .get_cached_movements(&scope, &MovementQuery::Recent { limit: 50 })
        .await
        .is_none());

    source.reset_fetch_count();
    cache.profile("u1").await.unwrap();
    assert_eq!(source.fetch_count(), 0);
}

#[tokio::test]
async fn slow_source_shows_up_in_insights() {
    let source = Arc::new(MemorySource::new().with_latency(Duration::from_millis(30)));
    let scope = Scope::personal("u1");
    source.set_categories(&scope, vec![Category::new("house", "Vivienda", None)]);
    let config = CacheConfig::builder()
        .slow_query_threshold(Duration::from_millis(10))
        .build()
        .unwrap();
    let cache = FinanceCache::new(Arc::clone(&source), config).unwrap();

    cache.categories(&scope).await.unwrap();
    cache.categories(&scope).await.unwrap();

    let insights = cache.performance_insights();
    assert_eq!(insights.total_calls, 2);
    assert_eq!(insights.cache_hits, 1);
    assert_eq!(insights.slow_queries.len(), 1);
    assert_eq!(insights.slow_queries[0].0, "v1-categories-u1|");
    assert!(insights.slow_queries[0].1.average_ms >= 30.0);
    assert!(insights.average_fetch_ms >= 30.0);
}
