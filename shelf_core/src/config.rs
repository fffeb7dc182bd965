use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use dirs::data_local_dir;
use serde::Deserialize;
use shelf_db::MigrationFlags;
use shelf_source::{CatalogSource, JsonApiSource, RateLimiter, SourceManager};
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    #[serde(rename = "source")]
    pub sources: Vec<SourceConfig>,

    /// Candidate sources in priority order. Empty means every configured
    /// source in declaration order.
    #[serde(default)]
    pub migration_sources: Vec<u64>,
    #[serde(default = "default_true")]
    pub use_smart_search: bool,
    #[serde(default = "default_true")]
    pub use_source_with_most_chapters: bool,
    #[serde(default)]
    pub extra_search_params: Option<String>,
    #[serde(default)]
    pub migration_flags: MigrationFlags,

    #[serde(default = "default_cover_cache_dir")]
    pub cover_cache_dir: PathBuf,
    #[serde(default = "default_downloads_dir")]
    pub downloads_dir: PathBuf,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub id: u64,
    pub name: String,
    pub base_url: String,
    pub rate_limit_ms: Option<u64>,
}

fn default_true() -> bool {
    true
}

fn data_dir() -> PathBuf {
    data_local_dir()
        .map(|d| d.join("Shelf"))
        .unwrap_or_else(|| ".".into())
}

fn default_cover_cache_dir() -> PathBuf {
    data_dir().join("covers")
}

fn default_downloads_dir() -> PathBuf {
    data_dir().join("downloads")
}

impl Config {
    /// Install every configured source, throttling the ones with a rate limit.
    pub fn build_sources(&self) -> Result<SourceManager> {
        let mut manager = SourceManager::new();
        for conf in &self.sources {
            let source = Arc::new(JsonApiSource::new(conf.id, &conf.name, &conf.base_url)?);
            let source = match conf.rate_limit_ms {
                Some(ms) if ms > 0 => CatalogSource::RateLimited {
                    source,
                    limiter: Arc::new(RateLimiter::new(Duration::from_millis(ms))),
                },
                _ => CatalogSource::Online(source),
            };
            debug!("installed source {source:?}");
            manager.register(source);
        }
        Ok(manager)
    }
}

/// Knobs that shape a migration run.
#[derive(Clone, Debug)]
pub struct MigrationOptions {
    pub migration_sources: Vec<u64>,
    pub use_smart_search: bool,
    pub use_source_with_most_chapters: bool,
    pub extra_search_params: Option<String>,
    pub flags: MigrationFlags,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            migration_sources: vec![],
            use_smart_search: true,
            use_source_with_most_chapters: true,
            extra_search_params: None,
            flags: MigrationFlags::all(),
        }
    }
}

impl From<&Config> for MigrationOptions {
    fn from(config: &Config) -> Self {
        Self {
            migration_sources: config.migration_sources.clone(),
            use_smart_search: config.use_smart_search,
            use_source_with_most_chapters: config.use_source_with_most_chapters,
            extra_search_params: config.extra_search_params.clone(),
            flags: config.migration_flags,
        }
    }
}
