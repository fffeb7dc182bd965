mod item;
mod orchestrator;

pub use item::MigratingItem;
pub use orchestrator::{BATCH_SIZE, MAX_CONCURRENT_SOURCE_CALLS, MigrationOrchestrator};

use shelf_db::Chapter;

/// What to migrate in one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationConfig {
    /// Search replacements for every listed entry.
    List { entry_ids: Vec<u64> },
    /// Migrate one entry, to `to` when the target is already known.
    Single { from: u64, to: Option<u64> },
}

impl MigrationConfig {
    pub fn entry_ids(&self) -> Vec<u64> {
        match self {
            MigrationConfig::List { entry_ids } => entry_ids.clone(),
            MigrationConfig::Single { from, .. } => vec![*from],
        }
    }

    /// The explicitly chosen target for `entry_id`, if any.
    pub fn target_for(&self, entry_id: u64) -> Option<u64> {
        match self {
            MigrationConfig::Single { from, to } if *from == entry_id => *to,
            _ => None,
        }
    }

    pub(crate) fn remove(&mut self, entry_id: u64) {
        if let MigrationConfig::List { entry_ids } = self {
            entry_ids.retain(|id| *id != entry_id);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchResult {
    Searching,
    /// Resolved to the local entry with this id.
    Result(u64),
    NotFound,
}

impl SearchResult {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SearchResult::Searching)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChapterSummary {
    /// Highest recognized chapter number.
    pub latest_chapter: Option<f64>,
    pub chapter_count: usize,
}

impl ChapterSummary {
    pub fn from_chapters(chapters: &[Chapter]) -> Self {
        Self {
            latest_chapter: chapters
                .iter()
                .filter(|c| c.is_recognized_number())
                .map(|c| c.chapter_number)
                .reduce(f64::max),
            chapter_count: chapters.len(),
        }
    }
}
