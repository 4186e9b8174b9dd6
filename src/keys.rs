//! Cache key layout.
//!
//! Every key reads `v{version}-{domain}-{scope}|{params}`. The `|` closes the scope part, so a scope pattern such as
//! `v1-movements-u1|` matches all query variants of that scope and nothing belonging to `u10` or to `u1:home`.
//! User and context ids are percent-encoded before they go into a key, so an id can never forge a separator.

use crate::stats::StatsPeriod;
use crate::types::DateRange;
use crate::types::Scope;
use chrono::Datelike;
use chrono::NaiveDate;
use std::fmt::Display;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheDomain {
    Movements,
    Categories,
    Statistics,
    Profile,
}

impl CacheDomain {
    pub const ALL: [CacheDomain; 4] = [Self::Movements, Self::Categories, Self::Statistics, Self::Profile];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Movements => "movements",
            Self::Categories => "categories",
            Self::Statistics => "statistics",
            Self::Profile => "profile",
        }
    }

    #[inline]
    fn index(&self) -> usize {
        *self as usize
    }
}

impl Display for CacheDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which slice of movements a cached list holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MovementQuery {
    /// The latest `limit` movements.
    Recent { limit: usize },
    /// All movements dated inside the range.
    Range(DateRange),
}

impl MovementQuery {
    fn params(&self) -> String {
        match self {
            Self::Recent { limit } => format!("recent:{limit}"),
            Self::Range(range) => format!("range:{range}"),
        }
    }
}

/// Statistics are keyed by how many months they cover and the month they end at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatisticsQuery {
    pub period:    StatsPeriod,
    pub reference: NaiveDate,
}

impl StatisticsQuery {
    pub fn new(period: StatsPeriod, reference: NaiveDate) -> Self {
        Self { period, reference }
    }

    fn params(&self) -> String {
        format!(
            "months:{}@{:04}-{:02}",
            self.period.months(),
            self.reference.year(),
            self.reference.month()
        )
    }
}

/// Per-domain version tags. Bumping a domain's tag orphans every key built with the previous one.
#[derive(Debug)]
pub struct KeyVersions {
    versions: [AtomicU32; 4],
}

impl Default for KeyVersions {
    fn default() -> Self {
        Self {
            versions: std::array::from_fn(|_| AtomicU32::new(1)),
        }
    }
}

impl KeyVersions {
    pub fn current(&self, domain: CacheDomain) -> u32 {
        self.versions[domain.index()].load(Ordering::Acquire)
    }

    /// Returns the new version.
    pub fn bump(&self, domain: CacheDomain) -> u32 {
        self.versions[domain.index()].fetch_add(1, Ordering::AcqRel) + 1
    }

    fn prefix(&self, domain: CacheDomain, segment: &str) -> String {
        format!("v{}-{domain}-{segment}|", self.current(domain))
    }

    fn key(&self, domain: CacheDomain, segment: &str, params: &str) -> String {
        let mut key = self.prefix(domain, segment);
        key.push_str(params);
        key
    }

    /// Everything up to and including the scope terminator.
    pub fn scope_prefix(&self, domain: CacheDomain, scope: &Scope) -> String {
        self.prefix(domain, &scope_segment(scope))
    }

    /// Prefix of keys stored per user rather than per scope, such as profiles.
    pub fn user_prefix(&self, domain: CacheDomain, user_id: &str) -> String {
        self.prefix(domain, &escape_id(user_id))
    }

    pub fn movements(&self, scope: &Scope, query: &MovementQuery) -> String {
        self.key(CacheDomain::Movements, &scope_segment(scope), &query.params())
    }

    pub fn categories(&self, scope: &Scope) -> String {
        self.key(CacheDomain::Categories, &scope_segment(scope), "")
    }

    pub fn statistics(&self, scope: &Scope, query: &StatisticsQuery) -> String {
        self.key(CacheDomain::Statistics, &scope_segment(scope), &query.params())
    }

    pub fn profile(&self, user_id: &str) -> String {
        self.user_prefix(CacheDomain::Profile, user_id)
    }

    /// Patterns matching every scope of a user in a domain: the personal one and all shared contexts.
    pub fn user_patterns(&self, domain: CacheDomain, user_id: &str) -> [String; 2] {
        let version = self.current(domain);
        let user = escape_id(user_id);
        [
            format!("v{version}-{domain}-{user}|"),
            format!("v{version}-{domain}-{user}:"),
        ]
    }
}

/// Percent-encodes an id, `-` included, so that it cannot contain any of the key separators `-`, `:` and `|`.
pub fn escape_id(id: &str) -> String {
    urlencoding::encode(id).replace('-', "%2D")
}

/// `user` or `user:context`, both parts escaped.
pub fn scope_segment(scope: &Scope) -> String {
    match scope.context_id {
        Some(ref context) => format!("{}:{}", escape_id(&scope.user_id), escape_id(context)),
        None => escape_id(&scope.user_id),
    }
}
