use async_trait::async_trait;
use std::fmt::Debug;
use std::fmt::Display;

use crate::types::Category;
use crate::types::DateRange;
use crate::types::Movement;
use crate::types::Profile;
use crate::types::Scope;

/// The authoritative store the caches sit in front of.
///
/// Implementations are expected to apply row-level filtering themselves: a [`Scope`] is passed along so they know
/// whose rows to return, not so that the cache can enforce anything.
#[async_trait]
pub trait DataSource: Send + Sync + 'static {
    /// Returned to the caller untouched whenever a fetch fails.
    type Error: Display + Debug + Send + Sync + 'static;

    /// The latest `limit` movements, newest first.
    async fn recent_movements(&self, scope: &Scope, limit: usize) -> Result<Vec<Movement>, Self::Error>;

    async fn movements_in_range(&self, scope: &Scope, range: &DateRange) -> Result<Vec<Movement>, Self::Error>;

    async fn categories(&self, scope: &Scope) -> Result<Vec<Category>, Self::Error>;

    async fn profile(&self, user_id: &str) -> Result<Profile, Self::Error>;
}
