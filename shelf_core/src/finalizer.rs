use std::{collections::HashMap, sync::Arc};

use anyhow::{Context as _, Result};
use itertools::Itertools;
use shelf_db::{
    Chapter, Entry, EntryUpdate, EventType, History, Library, MigrationFlags, Timestamp, Track,
    Uuid,
};
use shelf_source::SourceManager;
use tracing::{debug, error, instrument, warn};

use crate::{
    chapter_sync::sync_chapters_with_source,
    logging::write_event,
    storage::{CoverCache, DownloadManager},
};

/// Moves user data from an old entry to the entry that replaces it.
pub struct MigrationFinalizer {
    library: Arc<dyn Library>,
    sources: Arc<SourceManager>,
    covers: Arc<dyn CoverCache>,
    downloads: Arc<dyn DownloadManager>,
}

impl MigrationFinalizer {
    pub fn new(
        library: Arc<dyn Library>,
        sources: Arc<SourceManager>,
        covers: Arc<dyn CoverCache>,
        downloads: Arc<dyn DownloadManager>,
    ) -> Self {
        Self {
            library,
            sources,
            covers,
            downloads,
        }
    }

    /// Migrate `old` to `new`. Failures are logged and never returned.
    pub async fn migrate(&self, old: &Entry, new: &Entry, replace: bool, flags: MigrationFlags) {
        if let Err(err) = self.try_migrate(old, new, replace, flags).await {
            error!(
                "Failed migrating \"{}\" ({}) to {}: {err:?}",
                old.title, old.id, new.id
            );
        }
    }

    #[instrument(skip_all, fields(from = old.id, to = new.id, replace = replace, flags = %flags))]
    async fn try_migrate(
        &self,
        old: &Entry,
        new: &Entry,
        replace: bool,
        flags: MigrationFlags,
    ) -> Result<()> {
        if old.id == new.id {
            return Ok(());
        }

        if flags.categories()
            && let Err(err) = self.copy_categories(old, new).await
        {
            warn!("Failed copying categories of {}: {err:?}", old.id);
        }

        if replace
            && flags.chapters()
            && let Err(err) = self.migrate_chapters(old, new).await
        {
            warn!("Failed migrating chapters of {}: {err:?}", old.id);
        }

        if flags.tracking()
            && let Err(err) = self.copy_tracks(old, new).await
        {
            warn!("Failed copying tracks of {}: {err:?}", old.id);
        }

        let mut update = EntryUpdate {
            favorite: Some(true),
            date_added: Some(Timestamp::now().unix_millis()),
            ..EntryUpdate::new(new.id)
        };
        if flags.custom_cover() && old.has_custom_cover {
            match self.covers.copy_custom_cover(old, new).await {
                Ok(()) => update.has_custom_cover = Some(true),
                Err(err) => warn!("Failed copying custom cover of {}: {err:?}", old.id),
            }
        }
        self.library
            .update_entry(update)
            .await
            .context("add new entry to library")?;

        if replace {
            self.remove_old(old).await?;
        }

        write_event(
            self.library.as_ref(),
            EventType::Migrated {
                from: old.id,
                to: new.id,
                replace,
            },
        )
        .await;
        debug!("migrated \"{}\" to {}", old.title, new.id);
        Ok(())
    }

    async fn copy_categories(&self, old: &Entry, new: &Entry) -> Result<()> {
        let categories = self.library.categories(old.id).await?;
        self.library.set_categories(new.id, categories).await
    }

    async fn copy_tracks(&self, old: &Entry, new: &Entry) -> Result<()> {
        let tracks = self
            .library
            .tracks(old.id)
            .await?
            .into_iter()
            .map(|track| Track {
                id: Uuid::new(),
                entry_id: new.id,
                ..track
            })
            .collect::<Vec<_>>();
        if tracks.is_empty() {
            return Ok(());
        }
        self.library.insert_tracks(tracks).await
    }

    async fn remove_old(&self, old: &Entry) -> Result<()> {
        if let Err(err) = self.covers.delete_custom_cover(old).await {
            warn!("Failed deleting custom cover of {}: {err}", old.id);
        }
        if let Err(err) = self.covers.delete_cached_cover(old).await {
            warn!("Failed deleting cached cover of {}: {err}", old.id);
        }
        let source = self.sources.get_or_stub(old.source_id);
        if let Err(err) = self
            .downloads
            .delete_entry_downloads(old, &source.label())
            .await
        {
            warn!("Failed deleting downloads of {}: {err:?}", old.id);
        }
        self.library
            .update_entry(EntryUpdate {
                favorite: Some(false),
                date_added: Some(0),
                has_custom_cover: Some(false),
                ..EntryUpdate::new(old.id)
            })
            .await
    }

    async fn migrate_chapters(&self, old: &Entry, new: &Entry) -> Result<()> {
        let source = self.sources.get_or_stub(new.source_id);
        let remote = source.fetch_chapter_list(&new.to_network()).await?;
        sync_chapters_with_source(self.library.as_ref(), &remote, new).await?;

        let old_chapters = self.library.chapters(old.id).await?;
        let new_chapters = self.library.chapters(new.id).await?;
        let old_history = self
            .library
            .history(old.id)
            .await?
            .into_iter()
            .map(|h| (h.chapter_id, h))
            .collect::<HashMap<_, _>>();

        let matcher = ChapterMatcher::new(&old_chapters);
        let max_read = old_chapters
            .iter()
            .filter(|c| c.read && c.is_recognized_number())
            .map(|c| c.chapter_number)
            .fold(None, |max: Option<f64>, n| Some(max.map_or(n, |m| m.max(n))));

        let mut chapter_updates = vec![];
        let mut history_updates = vec![];
        for chapter in new_chapters {
            match matcher.find(&chapter) {
                Some(prev) => {
                    if let Some(history) = old_history.get(&prev.id) {
                        history_updates.push(History {
                            chapter_id: chapter.id,
                            entry_id: new.id,
                            last_read: history.last_read,
                            time_read: history.time_read,
                        });
                    }
                    if prev.read || prev.bookmark {
                        chapter_updates.push(Chapter {
                            read: prev.read,
                            bookmark: prev.bookmark,
                            last_page_read: prev.last_page_read,
                            ..chapter
                        });
                    }
                }
                None => {
                    if let Some(max_read) = max_read
                        && chapter.is_recognized_number()
                        && chapter.chapter_number <= max_read
                        && !chapter.read
                    {
                        chapter_updates.push(Chapter {
                            read: true,
                            ..chapter
                        });
                    }
                }
            }
        }

        debug!(
            "copying read state of {} chapters and {} history records",
            chapter_updates.len(),
            history_updates.len()
        );
        if !chapter_updates.is_empty() {
            self.library.update_chapters(chapter_updates).await?;
        }
        if !history_updates.is_empty() {
            self.library.upsert_history(history_updates).await?;
        }
        Ok(())
    }
}

/// Finds the old chapter that corresponds to a new one, trying the url, then
/// the display name, then the chapter number.
struct ChapterMatcher<'a> {
    by_url: HashMap<&'a str, &'a Chapter>,
    by_name: HashMap<String, &'a Chapter>,
    by_number: HashMap<u64, &'a Chapter>,
}

impl<'a> ChapterMatcher<'a> {
    fn new(chapters: &'a [Chapter]) -> Self {
        // The first chapter wins when several share a key.
        let by_url = chapters
            .iter()
            .rev()
            .map(|c| (c.url.as_str(), c))
            .collect();
        let by_name = chapters
            .iter()
            .rev()
            .map(|c| (name_key(&c.name), c))
            .collect();
        let by_number = chapters
            .iter()
            .filter(|c| c.is_recognized_number())
            .into_group_map_by(|c| c.chapter_number.to_bits())
            .into_iter()
            .filter_map(|(number, group)| {
                group
                    .into_iter()
                    .find_or_first(|c| c.read)
                    .map(|c| (number, c))
            })
            .collect();
        Self {
            by_url,
            by_name,
            by_number,
        }
    }

    fn find(&self, chapter: &Chapter) -> Option<&'a Chapter> {
        self.by_url
            .get(chapter.url.as_str())
            .or_else(|| self.by_name.get(&name_key(&chapter.name)))
            .or_else(|| {
                if chapter.is_recognized_number() {
                    self.by_number.get(&chapter.chapter_number.to_bits())
                } else {
                    None
                }
            })
            .copied()
    }
}

fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}
