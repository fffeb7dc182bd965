use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shelf_db::{SourceChapter, SourceEntry};

/// Extra key/value parameters forwarded with a search request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilters {
    pub params: Vec<(String, String)>,
}

/// One page of search results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchPage {
    pub entries: Vec<SourceEntry>,
    #[serde(default)]
    pub has_next: bool,
}

/// A catalog that entries can be migrated to or from.
///
/// Only the calls the migration engine depends on are part of the trait.
#[async_trait]
pub trait Source: Send + Sync {
    /// Stable numeric id, stored on every local entry from this source.
    fn id(&self) -> u64;

    fn name(&self) -> &str;

    async fn search(&self, page: u32, query: &str, filters: &SearchFilters) -> Result<SearchPage>;

    async fn fetch_chapter_list(&self, entry: &SourceEntry) -> Result<Vec<SourceChapter>>;

    /// Fetch full details for an entry. Sources without a details call
    /// return the entry unchanged.
    async fn fetch_entry_details(&self, entry: &SourceEntry) -> Result<SourceEntry> {
        Ok(entry.clone())
    }
}
