use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use shelf_db::{SourceChapter, SourceEntry};

use crate::traits::{SearchFilters, SearchPage, Source};

/// Counts calls that are running at the same time. One probe can be shared
/// by several sources to observe their combined concurrency.
#[derive(Default)]
pub struct ConcurrencyProbe {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ConcurrencyProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(self)
    }
}

struct InFlight<'a>(&'a ConcurrencyProbe);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory source for tests and dry runs.
///
/// Search returns every catalog entry whose lowercased title contains the
/// lowercased query. Calls can be made to fail or to take a fixed time, and
/// the number of concurrent calls is recorded.
pub struct FakeSource {
    id: u64,
    name: String,
    entries: Vec<SourceEntry>,
    chapters: HashMap<String, Vec<SourceChapter>>,
    fail_search: bool,
    fail_chapters: bool,
    failing_queries: Vec<String>,
    latency: Duration,
    probe: Arc<ConcurrencyProbe>,
    search_calls: AtomicUsize,
    chapter_calls: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn new(id: u64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            entries: vec![],
            chapters: HashMap::new(),
            fail_search: false,
            fail_chapters: false,
            failing_queries: vec![],
            latency: Duration::ZERO,
            probe: ConcurrencyProbe::new(),
            search_calls: AtomicUsize::new(0),
            chapter_calls: AtomicUsize::new(0),
            queries: Mutex::new(vec![]),
        }
    }

    /// Add an entry with `chapter_count` chapters numbered from 1.
    pub fn with_entry(self, url: &str, title: &str, chapter_count: usize) -> Self {
        let chapters = (1..=chapter_count)
            .map(|n| SourceChapter::new(format!("{url}/{n}"), format!("Chapter {n}"), n as f64))
            .collect();
        self.with_chapters(SourceEntry::new(url, title), chapters)
    }

    pub fn with_chapters(mut self, entry: SourceEntry, chapters: Vec<SourceChapter>) -> Self {
        self.chapters.insert(entry.url.clone(), chapters);
        self.entries.push(entry);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_search = true;
        self.fail_chapters = true;
        self
    }

    pub fn failing_chapters(mut self) -> Self {
        self.fail_chapters = true;
        self
    }

    /// Fail any search whose lowercased query contains `needle`.
    pub fn failing_query(mut self, needle: &str) -> Self {
        self.failing_queries.push(needle.to_lowercase());
        self
    }

    pub fn with_probe(mut self, probe: Arc<ConcurrencyProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Highest number of calls that were running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.probe.max_in_flight()
    }

    pub fn in_flight(&self) -> usize {
        self.probe.in_flight()
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn chapter_calls(&self) -> usize {
        self.chapter_calls.load(Ordering::SeqCst)
    }

    /// Every search query received, in call order.
    pub fn queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .map(|queries| queries.clone())
            .unwrap_or_default()
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl Source for FakeSource {
    fn id(&self) -> u64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, _page: u32, query: &str, _filters: &SearchFilters) -> Result<SearchPage> {
        let _guard = self.probe.enter();
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(query.to_string());
        }
        self.delay().await;
        let query = query.to_lowercase();
        if self.fail_search || self.failing_queries.iter().any(|q| query.contains(q)) {
            return Err(anyhow::anyhow!("{} search failed", self.name));
        }
        let entries = self
            .entries
            .iter()
            .filter(|e| e.title.to_lowercase().contains(&query))
            .cloned()
            .collect();
        Ok(SearchPage {
            entries,
            has_next: false,
        })
    }

    async fn fetch_chapter_list(&self, entry: &SourceEntry) -> Result<Vec<SourceChapter>> {
        let _guard = self.probe.enter();
        self.chapter_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if self.fail_chapters {
            return Err(anyhow::anyhow!("{} chapter list failed", self.name));
        }
        match self.chapters.get(&entry.url) {
            Some(chapters) => Ok(chapters.clone()),
            None => Err(anyhow::anyhow!("not found")),
        }
    }

    async fn fetch_entry_details(&self, entry: &SourceEntry) -> Result<SourceEntry> {
        let _guard = self.probe.enter();
        self.delay().await;
        let mut details = self
            .entries
            .iter()
            .find(|e| e.url == entry.url)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("not found"))?;
        if details.thumbnail_url.is_none() {
            details.thumbnail_url = Some(format!("https://covers.invalid{}.jpg", entry.url));
        }
        details.initialized = true;
        Ok(details)
    }
}
