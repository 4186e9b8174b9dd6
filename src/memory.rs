//! A [`DataSource`] kept entirely in memory.
//!
//! Serves the command-line tool, which loads it from JSON files, and any test that needs a source with observable
//! fetch counts and a switchable outage.

use crate::traits::DataSource;
use crate::types::Category;
use crate::types::DateRange;
use crate::types::Movement;
use crate::types::Profile;
use crate::types::Scope;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("data source is unavailable")]
    Unavailable,

    #[error("no profile for user {0}")]
    ProfileNotFound(String),
}

#[derive(Debug, Default)]
pub struct MemorySource {
    movements:  RwLock<HashMap<Scope, Vec<Movement>>>,
    categories: RwLock<HashMap<Scope, Vec<Category>>>,
    profiles:   RwLock<HashMap<String, Profile>>,
    latency:    RwLock<Option<Duration>>,
    failing:    AtomicBool,
    fetches:    AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.write() = Some(latency);
        self
    }

    pub fn set_movements(&self, scope: &Scope, movements: Vec<Movement>) {
        self.movements.write().insert(scope.clone(), movements);
    }

    pub fn add_movement(&self, scope: &Scope, movement: Movement) {
        self.movements.write().entry(scope.clone()).or_default().push(movement);
    }

    pub fn set_categories(&self, scope: &Scope, categories: Vec<Category>) {
        self.categories.write().insert(scope.clone(), categories);
    }

    pub fn set_profile(&self, profile: Profile) {
        self.profiles.write().insert(profile.user_id.clone(), profile);
    }

    /// While failing, every request returns [`SourceError::Unavailable`].
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    /// Number of requests served or failed so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Acquire)
    }

    pub fn reset_fetch_count(&self) {
        self.fetches.store(0, Ordering::Release);
    }

    async fn begin(&self) -> Result<(), SourceError> {
        self.fetches.fetch_add(1, Ordering::AcqRel);
        let latency = *self.latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::Acquire) {
            return Err(SourceError::Unavailable);
        }
        Ok(())
    }
}

#[async_trait]
impl DataSource for MemorySource {
    type Error = SourceError;

    async fn recent_movements(&self, scope: &Scope, limit: usize) -> Result<Vec<Movement>, Self::Error> {
        self.begin().await?;
        let mut movements = self.movements.read().get(scope).cloned().unwrap_or_default();
        movements.sort_by(|a, b| b.movement_date.cmp(&a.movement_date).then_with(|| a.id.cmp(&b.id)));
        movements.truncate(limit);
        Ok(movements)
    }

    async fn movements_in_range(&self, scope: &Scope, range: &DateRange) -> Result<Vec<Movement>, Self::Error> {
        self.begin().await?;
        Ok(self
            .movements
            .read()
            .get(scope)
            .map(|all| {
                all.iter()
                    .filter(|m| range.contains(m.movement_date))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn categories(&self, scope: &Scope) -> Result<Vec<Category>, Self::Error> {
        self.begin().await?;
        Ok(self.categories.read().get(scope).cloned().unwrap_or_default())
    }

    async fn profile(&self, user_id: &str) -> Result<Profile, Self::Error> {
        self.begin().await?;
        self.profiles
            .read()
            .get(user_id)
            .cloned()
            .ok_or_else(|| SourceError::ProfileNotFound(user_id.to_string()))
    }
}
