use std::{future::Future, sync::Arc};

use anyhow::Result;
use futures::future::try_join_all;
use shelf_db::{SourceChapter, SourceEntry};
use shelf_parse::{
    BASE_THRESHOLD, MAX_LONG_TITLE_QUERIES, eligibility_threshold, is_exact_match, plan_queries,
    similarity,
};
use tokio::sync::Semaphore;
use tracing::{debug, instrument, trace};

use crate::{
    cache::SearchCache,
    registry::CatalogSource,
    traits::{SearchFilters, SearchPage},
};

/// Cleaned titles longer than this only use the most specific planned queries.
const LONG_TITLE_LEN: usize = 10;

/// A candidate and its similarity to the title being searched for.
#[derive(Debug, Clone)]
pub struct SearchEntry {
    pub entry: SourceEntry,
    pub score: f64,
}

/// Finds the entry in a source that best matches a title.
pub struct SmartSearchEngine {
    cache: SearchCache,
    gate: Option<Arc<Semaphore>>,
    extra_search_params: Option<String>,
}

impl Default for SmartSearchEngine {
    fn default() -> Self {
        Self::new(None)
    }
}

impl SmartSearchEngine {
    pub fn new(extra_search_params: Option<String>) -> Self {
        Self {
            cache: SearchCache::new(),
            gate: None,
            extra_search_params: extra_search_params.filter(|p| !p.trim().is_empty()),
        }
    }

    /// Route every network call made by this engine through `gate`.
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn cache(&self) -> &SearchCache {
        &self.cache
    }

    pub fn clear_caches(&self) {
        self.cache.clear();
    }

    async fn gated<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        let _permit = match &self.gate {
            Some(gate) => Some(gate.acquire().await?),
            None => None,
        };
        call.await
    }

    async fn search_page(&self, source: &CatalogSource, query: &str) -> Result<SearchPage> {
        self.gated(source.search(1, query, &SearchFilters::default()))
            .await
    }

    pub async fn fetch_chapter_list(
        &self,
        source: &CatalogSource,
        entry: &SourceEntry,
    ) -> Result<Vec<SourceChapter>> {
        self.gated(source.fetch_chapter_list(entry)).await
    }

    pub async fn fetch_entry_details(
        &self,
        source: &CatalogSource,
        entry: &SourceEntry,
    ) -> Result<SourceEntry> {
        self.gated(source.fetch_entry_details(entry)).await
    }

    /// Single query search scored against the raw title.
    ///
    /// A search with exactly one result returns it without scoring.
    #[instrument(skip(self, source), fields(source = source.id()))]
    pub async fn normal_search(
        &self,
        source: &CatalogSource,
        title: &str,
    ) -> Result<Option<SourceEntry>> {
        let query = match &self.extra_search_params {
            Some(params) => format!("{title} {}", params.trim()),
            None => title.to_string(),
        };
        let page = self.search_page(source, &query).await?;

        if page.entries.len() == 1 {
            return Ok(page.entries.into_iter().next());
        }

        let candidates = page
            .entries
            .into_iter()
            .map(|entry| SearchEntry {
                score: similarity(title, &entry.title),
                entry,
            })
            .filter(|c| c.score >= BASE_THRESHOLD)
            .collect();

        Ok(pick_best(candidates).map(|c| c.entry))
    }

    /// Multi-query fuzzy search scored against the cleaned title.
    #[instrument(skip(self, source), fields(source = source.id()))]
    pub async fn smart_search(
        &self,
        source: &CatalogSource,
        title: &str,
    ) -> Result<Option<SourceEntry>> {
        if let Some(cached) = self.cache.best_match(title, source.id()) {
            trace!("best match cache hit");
            return Ok(cached);
        }

        let cleaned = self.cache.clean_title(title);
        let mut queries = plan_queries(&cleaned);
        if cleaned.chars().count() > LONG_TITLE_LEN {
            queries.truncate(MAX_LONG_TITLE_QUERIES);
        }
        let threshold = eligibility_threshold(&cleaned);

        let per_query = try_join_all(
            queries
                .iter()
                .map(|query| self.eligible_for_query(source, query, &cleaned, threshold)),
        )
        .await?;

        let best = pick_best(per_query.into_iter().flatten().collect()).map(|c| c.entry);
        debug!(
            "smart search for {cleaned:?} found {:?}",
            best.as_ref().map(|e| &e.title)
        );
        self.cache.insert_best_match(title, source.id(), best.clone());
        Ok(best)
    }

    async fn eligible_for_query(
        &self,
        source: &CatalogSource,
        query: &str,
        cleaned_title: &str,
        threshold: f64,
    ) -> Result<Vec<SearchEntry>> {
        let entries = match self.cache.results(source.id(), query) {
            Some(entries) => entries,
            None => {
                let page = self.search_page(source, query).await?;
                self.cache
                    .insert_results(source.id(), query, page.entries.clone());
                page.entries
            }
        };

        Ok(entries
            .into_iter()
            .map(|entry| {
                let candidate = self.cache.clean_title(&entry.title);
                SearchEntry {
                    score: similarity(&candidate, cleaned_title),
                    entry,
                }
            })
            .filter(|c| c.score >= threshold)
            .collect())
    }
}

/// The first exact match in discovery order, otherwise the highest score.
/// Earlier candidates win ties.
pub fn pick_best(candidates: Vec<SearchEntry>) -> Option<SearchEntry> {
    if let Some(exact) = candidates.iter().position(|c| is_exact_match(c.score)) {
        return candidates.into_iter().nth(exact);
    }
    candidates.into_iter().fold(None, |best, c| match best {
        Some(best) if best.score >= c.score => Some(best),
        _ => Some(c),
    })
}
