use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{Result, bail};
use shelf_db::{SourceChapter, SourceEntry};
use tokio::{
    sync::Mutex,
    time::{Instant, sleep_until},
};
use tracing::{trace, warn};

use crate::traits::{SearchFilters, SearchPage, Source};

/// Enforces a minimum interval between consecutive calls.
pub struct RateLimiter {
    interval: Duration,
    next: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Mutex::new(Instant::now()),
        }
    }

    /// Wait until the next call slot is available and claim it.
    pub async fn acquire(&self) {
        let mut next = self.next.lock().await;
        let slot = (*next).max(Instant::now());
        sleep_until(slot).await;
        *next = slot + self.interval;
    }
}

/// A source as seen by the migration engine.
#[derive(Clone)]
pub enum CatalogSource {
    Online(Arc<dyn Source>),
    /// A source that must be throttled before every network call.
    RateLimited {
        source: Arc<dyn Source>,
        limiter: Arc<RateLimiter>,
    },
    /// A source id referenced by library entries that is not installed.
    Stub { id: u64 },
}

impl CatalogSource {
    pub fn id(&self) -> u64 {
        match self {
            CatalogSource::Online(source) => source.id(),
            CatalogSource::RateLimited { source, .. } => source.id(),
            CatalogSource::Stub { id } => *id,
        }
    }

    pub fn label(&self) -> String {
        match self {
            CatalogSource::Online(source) => source.name().to_string(),
            CatalogSource::RateLimited { source, .. } => source.name().to_string(),
            CatalogSource::Stub { id } => format!("Unknown source ({id})"),
        }
    }

    pub fn is_stub(&self) -> bool {
        matches!(self, CatalogSource::Stub { .. })
    }

    async fn online(&self) -> Result<&Arc<dyn Source>> {
        match self {
            CatalogSource::Online(source) => Ok(source),
            CatalogSource::RateLimited { source, limiter } => {
                limiter.acquire().await;
                Ok(source)
            }
            CatalogSource::Stub { id } => bail!("source {id} is not installed"),
        }
    }

    pub async fn search(
        &self,
        page: u32,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<SearchPage> {
        self.online().await?.search(page, query, filters).await
    }

    pub async fn fetch_chapter_list(&self, entry: &SourceEntry) -> Result<Vec<SourceChapter>> {
        self.online().await?.fetch_chapter_list(entry).await
    }

    pub async fn fetch_entry_details(&self, entry: &SourceEntry) -> Result<SourceEntry> {
        self.online().await?.fetch_entry_details(entry).await
    }
}

impl std::fmt::Debug for CatalogSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]", self.label(), self.id())
    }
}

/// Installed sources, kept in registration order.
#[derive(Default, Clone)]
pub struct SourceManager {
    order: Vec<u64>,
    sources: HashMap<u64, CatalogSource>,
}

impl SourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a source, replacing any source registered with the same id.
    pub fn register(&mut self, source: CatalogSource) {
        let id = source.id();
        if self.sources.insert(id, source).is_none() {
            self.order.push(id);
        } else {
            trace!("replaced source {id}");
        }
    }

    pub fn get(&self, id: u64) -> Option<CatalogSource> {
        self.sources.get(&id).cloned()
    }

    pub fn get_or_stub(&self, id: u64) -> CatalogSource {
        self.get(id).unwrap_or(CatalogSource::Stub { id })
    }

    pub fn all(&self) -> Vec<CatalogSource> {
        self.order
            .iter()
            .filter_map(|id| self.sources.get(id).cloned())
            .collect()
    }

    /// Resolve the ordered candidate sources for a migration run. An empty
    /// list means every installed source in registration order.
    pub fn migration_sources(&self, configured: &[u64]) -> Vec<CatalogSource> {
        if configured.is_empty() {
            return self.all();
        }
        configured
            .iter()
            .filter_map(|id| {
                let source = self.get(*id);
                if source.is_none() {
                    warn!("migration source {id} is not installed, skipping");
                }
                source
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::FakeSource;

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_spaces_calls() {
        let limiter = RateLimiter::new(Duration::from_millis(500));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_stub_source_fails() {
        let manager = SourceManager::new();
        let stub = manager.get_or_stub(42);
        assert!(stub.is_stub());
        assert_eq!(stub.label(), "Unknown source (42)");
        assert!(
            stub.search(1, "anything", &SearchFilters::default())
                .await
                .is_err()
        );
    }

    #[test]
    fn test_migration_sources_order() {
        let mut manager = SourceManager::new();
        manager.register(CatalogSource::Online(Arc::new(FakeSource::new(1, "One"))));
        manager.register(CatalogSource::Online(Arc::new(FakeSource::new(2, "Two"))));
        manager.register(CatalogSource::Online(Arc::new(FakeSource::new(3, "Three"))));

        let ids = |sources: Vec<CatalogSource>| sources.iter().map(|s| s.id()).collect::<Vec<_>>();
        assert_eq!(ids(manager.migration_sources(&[])), vec![1, 2, 3]);
        assert_eq!(ids(manager.migration_sources(&[3, 9, 1])), vec![3, 1]);
    }
}
