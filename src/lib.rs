//! # fin-cache
//!
//! In-process caching and statistics aggregation for personal and household finance trackers.
//!
//! Think of it as the read side of a finance app: movements, categories, statistics and profiles are fetched from an
//! authoritative store through a [`DataSource`], kept for a while in typed in-memory caches and thrown away when a
//! mutation makes them stale.
//!
//! # The Basics
//!
//! - Every kind of data has its own [`MemoryCache`](store::MemoryCache), so a statistics cache can only ever hold
//!   [`StatisticsResult`](stats::StatisticsResult) values.
//! - Entries expire by TTL, checked against an injectable [`Clock`](clock::Clock). Expired entries are never served;
//!   they are removed on the next read or by a [sweep](FinanceCache::sweep).
//! - Keys are versioned per domain. [Bumping](FinanceCache::bump_version) a domain's version orphans all its entries
//!   at once.
//! - A fetch goes through the [`QueryExecutor`](query::QueryExecutor), which serves hits, stores successful results,
//!   never caches failures and keeps per-key timing statistics.
//! - [`aggregate`](stats::aggregate) turns a window of movements into totals, a monthly series and an expense
//!   breakdown by category. It is pure and computes with exact decimals.
//!
//! The cache is a plain value: construct one per process, or per test, and pass it where it is needed.
//!
//! ```ignore
//! use fin_cache::prelude::*;
//!
//! let cache = Arc::new(FinanceCache::new(my_source, CacheConfig::default())?);
//! cache.start_sweeper();
//!
//! let scope = Scope::shared("u1", "household-7");
//! cache.preload_for_page(&scope, Page::Dashboard).await;
//! let stats = cache.statistics(&scope, StatsPeriod::HalfYear, today).await?;
//! ```
//!
//! # Features
//!
//! - `cli`: builds the `fincache` command which aggregates statistics from JSON files.

pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod keys;
pub mod memory;
pub mod query;
pub mod stats;
pub mod store;
pub mod traits;
pub mod types;

#[cfg(feature = "cli")]
pub mod cli;

#[doc(inline)]
pub use domain::FinanceCache;
#[doc(inline)]
pub use traits::DataSource;

pub mod prelude {
    pub use crate::clock::Clock;
    pub use crate::clock::ManualClock;
    pub use crate::clock::SystemClock;
    pub use crate::config::CacheConfig;
    pub use crate::domain::FinanceCache;
    pub use crate::domain::Page;
    pub use crate::domain::WarmReport;
    pub use crate::domain::WarmTarget;
    pub use crate::error::Error;
    pub use crate::keys::CacheDomain;
    pub use crate::keys::MovementQuery;
    pub use crate::keys::StatisticsQuery;
    pub use crate::query::BatchEntry;
    pub use crate::query::ExecuteOptions;
    pub use crate::query::QueryExecutor;
    pub use crate::stats::aggregate;
    pub use crate::stats::StatisticsResult;
    pub use crate::stats::StatsPeriod;
    pub use crate::store::MemoryCache;
    pub use crate::traits::DataSource;
    pub use crate::types::*;
}
