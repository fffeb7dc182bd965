use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use shelf_db::{SourceChapter, SourceEntry};
use tracing::{debug, instrument};
use url::Url;

use crate::http::{HttpClient, ReqwestClient};
use crate::traits::{SearchFilters, SearchPage, Source};

/// A catalog exposing a small JSON API:
///
/// - `GET {base}/search?q=&page=` returns `{"entries": [...], "has_next": bool}`
/// - `GET {base}/entry?url=` returns one entry
/// - `GET {base}/entry/chapters?url=` returns a list of chapters
pub struct JsonApiSource {
    id: u64,
    name: String,
    base_url: String,
    pub client: Arc<dyn HttpClient>,
}

impl JsonApiSource {
    pub fn new(id: u64, name: &str, base_url: &str) -> Result<Self> {
        Self::with_client(id, name, base_url, Arc::new(ReqwestClient::new()?))
    }

    pub fn with_client(
        id: u64,
        name: &str,
        base_url: &str,
        client: Arc<dyn HttpClient>,
    ) -> Result<Self> {
        let base = Url::parse(base_url).with_context(|| format!("invalid base url {base_url}"))?;
        Ok(Self {
            id,
            name: name.to_string(),
            base_url: base.as_str().trim_end_matches('/').to_string(),
            client,
        })
    }

    #[instrument(skip_all, fields(url = %url))]
    async fn fetch_json(&self, url: &str) -> Result<String> {
        debug!("fetching {} JSON", self.name);
        self.client.get(url).await
    }

    fn entry_url(&self, path: &str, entry: &SourceEntry) -> String {
        format!(
            "{}/{path}?url={}",
            self.base_url,
            urlencoding::encode(&entry.url)
        )
    }
}

#[async_trait]
impl Source for JsonApiSource {
    fn id(&self) -> u64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, page: u32, query: &str, filters: &SearchFilters) -> Result<SearchPage> {
        let mut url = format!(
            "{}/search?q={}&page={page}",
            self.base_url,
            urlencoding::encode(query)
        );
        for (key, value) in &filters.params {
            url.push_str(&format!(
                "&{}={}",
                urlencoding::encode(key),
                urlencoding::encode(value)
            ));
        }

        let body = self.fetch_json(&url).await.context("fetch search json")?;
        let page: SearchPage = serde_json::from_str(&body).context("parse search json")?;
        debug!(count = page.entries.len(), "{} search results", self.name);
        Ok(page)
    }

    async fn fetch_chapter_list(&self, entry: &SourceEntry) -> Result<Vec<SourceChapter>> {
        let url = self.entry_url("entry/chapters", entry);
        let body = self.fetch_json(&url).await.context("fetch chapter json")?;
        let chapters: Vec<SourceChapter> =
            serde_json::from_str(&body).context("parse chapter json")?;
        Ok(chapters)
    }

    async fn fetch_entry_details(&self, entry: &SourceEntry) -> Result<SourceEntry> {
        let url = self.entry_url("entry", entry);
        let body = self.fetch_json(&url).await.context("fetch entry json")?;
        let mut details: SourceEntry = serde_json::from_str(&body).context("parse entry json")?;
        if details.url.is_empty() {
            details.url = entry.url.clone();
        }
        details.initialized = true;
        Ok(details)
    }
}
