use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Mutex, PoisonError},
};

use shelf_db::SourceEntry;
use tracing::debug;

pub const TITLE_CACHE_LIMIT: usize = 1000;
pub const RESULTS_CACHE_LIMIT: usize = 200;
pub const BEST_MATCH_CACHE_LIMIT: usize = 1000;

/// A map that is emptied wholesale once it reaches its limit.
struct BoundedMap<K, V> {
    name: &'static str,
    limit: usize,
    map: Mutex<HashMap<K, V>>,
}

impl<K: Eq + Hash, V: Clone> BoundedMap<K, V> {
    fn new(name: &'static str, limit: usize) -> Self {
        Self {
            name,
            limit,
            map: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<K, V>> {
        self.map.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get(&self, key: &K) -> Option<V> {
        self.lock().get(key).cloned()
    }

    fn insert(&self, key: K, value: V) {
        let mut map = self.lock();
        if map.len() >= self.limit && !map.contains_key(&key) {
            debug!("{} cache reached {} entries, clearing", self.name, map.len());
            map.clear();
        }
        map.insert(key, value);
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn clear(&self) {
        self.lock().clear();
    }
}

/// Memoized search work shared by every search made through one engine.
///
/// Entries are never evicted individually, a cache that reaches its limit is
/// cleared and starts over.
pub struct SearchCache {
    titles: BoundedMap<String, String>,
    results: BoundedMap<(u64, String), Vec<SourceEntry>>,
    best_matches: BoundedMap<(String, u64), Option<SourceEntry>>,
}

impl Default for SearchCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchCache {
    pub fn new() -> Self {
        Self::with_limits(TITLE_CACHE_LIMIT, RESULTS_CACHE_LIMIT, BEST_MATCH_CACHE_LIMIT)
    }

    pub fn with_limits(titles: usize, results: usize, best_matches: usize) -> Self {
        Self {
            titles: BoundedMap::new("title", titles),
            results: BoundedMap::new("results", results),
            best_matches: BoundedMap::new("best match", best_matches),
        }
    }

    /// Cleaned form of `title`, computed once per distinct title.
    pub fn clean_title(&self, title: &str) -> String {
        if let Some(cleaned) = self.titles.get(&title.to_string()) {
            return cleaned;
        }
        let cleaned = shelf_parse::clean_title(title);
        self.titles.insert(title.to_string(), cleaned.clone());
        cleaned
    }

    pub fn results(&self, source_id: u64, query: &str) -> Option<Vec<SourceEntry>> {
        self.results.get(&(source_id, query.to_string()))
    }

    pub fn insert_results(&self, source_id: u64, query: &str, entries: Vec<SourceEntry>) {
        self.results.insert((source_id, query.to_string()), entries);
    }

    /// `Some(None)` means a search already ran and found nothing.
    pub fn best_match(&self, title: &str, source_id: u64) -> Option<Option<SourceEntry>> {
        self.best_matches.get(&(title.to_string(), source_id))
    }

    pub fn insert_best_match(&self, title: &str, source_id: u64, entry: Option<SourceEntry>) {
        self.best_matches
            .insert((title.to_string(), source_id), entry);
    }

    /// Sizes of the title, results and best-match caches.
    pub fn sizes(&self) -> (usize, usize, usize) {
        (
            self.titles.len(),
            self.results.len(),
            self.best_matches.len(),
        )
    }

    pub fn clear(&self) {
        self.titles.clear();
        self.results.clear();
        self.best_matches.clear();
        debug!("search caches cleared");
    }
}
