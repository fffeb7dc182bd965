use shelf_db::Entry;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::{ChapterSummary, SearchResult};

/// One entry being migrated.
pub struct MigratingItem {
    pub entry: Entry,
    pub chapter_summary: ChapterSummary,
    pub source_label: String,
    search_result: watch::Sender<SearchResult>,
    progress: watch::Sender<(usize, usize)>,
    token: CancellationToken,
}

impl MigratingItem {
    pub fn new(
        entry: Entry,
        chapter_summary: ChapterSummary,
        source_label: String,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            entry,
            chapter_summary,
            source_label,
            search_result: watch::channel(SearchResult::Searching).0,
            progress: watch::channel((0, 0)).0,
            token: parent.child_token(),
        }
    }

    pub fn search_result(&self) -> SearchResult {
        *self.search_result.borrow()
    }

    pub fn subscribe_result(&self) -> watch::Receiver<SearchResult> {
        self.search_result.subscribe()
    }

    /// Sources processed and sources to process.
    pub fn progress(&self) -> (usize, usize) {
        *self.progress.borrow()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<(usize, usize)> {
        self.progress.subscribe()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }

    pub(crate) fn set_result(&self, result: SearchResult) {
        self.search_result.send_replace(result);
    }

    pub(crate) fn start_progress(&self, total: usize) {
        self.progress.send_replace((0, total));
    }

    pub(crate) fn advance_progress(&self) {
        self.progress.send_modify(|(done, total)| {
            *done = (*done + 1).min(*total);
        });
    }

    pub(crate) fn complete_progress(&self) {
        self.progress.send_modify(|(done, total)| *done = *total);
    }
}

impl std::fmt::Debug for MigratingItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigratingItem")
            .field("entry", &self.entry.id)
            .field("title", &self.entry.title)
            .field("result", &self.search_result())
            .field("progress", &self.progress())
            .finish()
    }
}
