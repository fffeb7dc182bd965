use std::collections::{HashMap, HashSet};

use anyhow::{Result, bail};
use shelf_db::{Chapter, Entry, Library, SourceChapter};
use tracing::{debug, instrument};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncResult {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

/// Bring the stored chapters of `entry` in line with the list its source
/// returned. Chapters are matched by url, so read state of known chapters is
/// kept. Fails when the source returned no chapters.
#[instrument(skip_all, fields(entry = entry.id))]
pub async fn sync_chapters_with_source(
    library: &dyn Library,
    remote: &[SourceChapter],
    entry: &Entry,
) -> Result<SyncResult> {
    if remote.is_empty() {
        bail!("no chapters found for {}", entry.title);
    }

    let existing = library.chapters(entry.id).await?;
    let mut by_url: HashMap<&str, &Chapter> =
        existing.iter().map(|c| (c.url.as_str(), c)).collect();

    let mut seen = HashSet::new();
    let mut to_insert = vec![];
    let mut to_update = vec![];
    for (order, chapter) in remote.iter().enumerate() {
        if !seen.insert(chapter.url.as_str()) {
            continue;
        }
        let order = order as u32;
        match by_url.remove(chapter.url.as_str()) {
            Some(stored) => {
                if stored.name != chapter.name
                    || stored.chapter_number != chapter.chapter_number
                    || stored.scanlator != chapter.scanlator
                    || stored.date_upload != chapter.date_upload
                    || stored.source_order != order
                {
                    let mut stored = stored.clone();
                    stored.name = chapter.name.clone();
                    stored.chapter_number = chapter.chapter_number;
                    stored.scanlator = chapter.scanlator.clone();
                    stored.date_upload = chapter.date_upload;
                    stored.source_order = order;
                    to_update.push(stored);
                }
            }
            None => to_insert.push(Chapter::from_network(entry.id, order, chapter)),
        }
    }
    let to_remove = by_url.values().map(|c| c.id).collect::<Vec<_>>();

    let result = SyncResult {
        added: to_insert.len(),
        updated: to_update.len(),
        removed: to_remove.len(),
    };
    if !to_insert.is_empty() {
        library.insert_chapters(to_insert).await?;
    }
    if !to_update.is_empty() {
        library.update_chapters(to_update).await?;
    }
    if !to_remove.is_empty() {
        library.remove_chapters(to_remove).await?;
    }
    debug!("synced chapters for {}: {result:?}", entry.title);
    Ok(result)
}
