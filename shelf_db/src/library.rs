use anyhow::Result;
use async_trait::async_trait;
use native_db::{ToInput, transaction::RwTransaction};
use tracing::trace;

use crate::{
    Chapter, ChapterKey, Database, DatabaseExt as _, Entry, EntryCategory, EntryCategoryKey,
    EntryKey, Event, History, HistoryKey, SourceEntry, Track, TrackKey,
};

/// Partial update of an [`Entry`]. `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct EntryUpdate {
    pub id: u64,
    pub thumbnail_url: Option<Option<String>>,
    pub favorite: Option<bool>,
    pub date_added: Option<i64>,
    pub has_custom_cover: Option<bool>,
    pub initialized: Option<bool>,
}

impl EntryUpdate {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }
}

/// Persistence capability used by the migration engine.
#[async_trait]
pub trait Library: Send + Sync {
    async fn entry(&self, id: u64) -> Result<Option<Entry>>;

    async fn update_entry(&self, update: EntryUpdate) -> Result<()>;

    /// Return the local entry for a source-side entry, creating it if needed.
    async fn network_to_local(&self, source_id: u64, entry: &SourceEntry) -> Result<Entry>;

    async fn chapters(&self, entry_id: u64) -> Result<Vec<Chapter>>;

    /// Insert new chapters. Ids are assigned by the library and the stored
    /// chapters are returned.
    async fn insert_chapters(&self, chapters: Vec<Chapter>) -> Result<Vec<Chapter>>;

    /// Update existing chapters in a single transaction.
    async fn update_chapters(&self, chapters: Vec<Chapter>) -> Result<()>;

    async fn remove_chapters(&self, chapter_ids: Vec<u64>) -> Result<()>;

    async fn categories(&self, entry_id: u64) -> Result<Vec<u64>>;

    /// Replace the category memberships of an entry.
    async fn set_categories(&self, entry_id: u64, category_ids: Vec<u64>) -> Result<()>;

    async fn tracks(&self, entry_id: u64) -> Result<Vec<Track>>;

    async fn insert_tracks(&self, tracks: Vec<Track>) -> Result<()>;

    async fn history(&self, entry_id: u64) -> Result<Vec<History>>;

    async fn upsert_history(&self, history: Vec<History>) -> Result<()>;

    async fn record_event(&self, event: Event) -> Result<()>;
}

fn next_id<T: ToInput>(rw: &RwTransaction<'_>, id: impl Fn(&T) -> u64) -> Result<u64> {
    let max = rw
        .scan()
        .primary::<T>()?
        .all()?
        .filter_map(|t| t.ok())
        .map(|t| id(&t))
        .max();
    Ok(max.map_or(1, |max| max + 1))
}

#[async_trait]
impl Library for Database<'static> {
    async fn entry(&self, id: u64) -> Result<Option<Entry>> {
        let r = self.r_transaction()?;
        let entry = r.get().primary::<Entry>(id)?;
        Ok(entry)
    }

    async fn update_entry(&self, update: EntryUpdate) -> Result<()> {
        let (_guard, rw) = self.rw_async().await?;
        let Some(mut entry) = rw.get().primary::<Entry>(update.id)? else {
            return Err(anyhow::Error::msg(format!("entry {} not found", update.id)));
        };
        if let Some(thumbnail_url) = update.thumbnail_url {
            entry.thumbnail_url = thumbnail_url;
        }
        if let Some(favorite) = update.favorite {
            entry.favorite = favorite;
        }
        if let Some(date_added) = update.date_added {
            entry.date_added = date_added;
        }
        if let Some(has_custom_cover) = update.has_custom_cover {
            entry.has_custom_cover = has_custom_cover;
        }
        if let Some(initialized) = update.initialized {
            entry.initialized = initialized;
        }
        rw.upsert(entry)?;
        rw.commit()?;
        Ok(())
    }

    async fn network_to_local(&self, source_id: u64, entry: &SourceEntry) -> Result<Entry> {
        let key = Entry::source_key(source_id, &entry.url);
        let (_guard, rw) = self.rw_async().await?;
        if let Some(local) = rw.get().secondary::<Entry>(EntryKey::source_key, key)? {
            return Ok(local);
        }
        let id = next_id::<Entry>(&rw, |e| e.id)?;
        let local = Entry::from_network(id, source_id, entry);
        rw.insert(local.clone())?;
        rw.commit()?;
        trace!("created local entry {} for {}", local.id, local.source_key);
        Ok(local)
    }

    async fn chapters(&self, entry_id: u64) -> Result<Vec<Chapter>> {
        let r = self.r_transaction()?;
        let mut chapters = r
            .scan()
            .secondary::<Chapter>(ChapterKey::entry_id)?
            .range(entry_id..=entry_id)?
            .collect::<Result<Vec<_>, _>>()?;
        chapters.sort_by_key(|c| c.source_order);
        Ok(chapters)
    }

    async fn insert_chapters(&self, chapters: Vec<Chapter>) -> Result<Vec<Chapter>> {
        let (_guard, rw) = self.rw_async().await?;
        let mut id = next_id::<Chapter>(&rw, |c| c.id)?;
        let mut inserted = Vec::with_capacity(chapters.len());
        for mut chapter in chapters {
            chapter.id = id;
            id += 1;
            rw.insert(chapter.clone())?;
            inserted.push(chapter);
        }
        rw.commit()?;
        Ok(inserted)
    }

    async fn update_chapters(&self, chapters: Vec<Chapter>) -> Result<()> {
        let (_guard, rw) = self.rw_async().await?;
        for chapter in chapters {
            rw.upsert(chapter)?;
        }
        rw.commit()?;
        Ok(())
    }

    async fn remove_chapters(&self, chapter_ids: Vec<u64>) -> Result<()> {
        let (_guard, rw) = self.rw_async().await?;
        for id in chapter_ids {
            if let Some(chapter) = rw.get().primary::<Chapter>(id)? {
                rw.remove(chapter)?;
            }
        }
        rw.commit()?;
        Ok(())
    }

    async fn categories(&self, entry_id: u64) -> Result<Vec<u64>> {
        let r = self.r_transaction()?;
        let memberships = r
            .scan()
            .secondary::<EntryCategory>(EntryCategoryKey::entry_id)?
            .range(entry_id..=entry_id)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(memberships.into_iter().map(|m| m.category_id).collect())
    }

    async fn set_categories(&self, entry_id: u64, category_ids: Vec<u64>) -> Result<()> {
        let (_guard, rw) = self.rw_async().await?;
        let existing = rw
            .scan()
            .secondary::<EntryCategory>(EntryCategoryKey::entry_id)?
            .range(entry_id..=entry_id)?
            .collect::<Result<Vec<_>, _>>()?;
        for membership in existing {
            rw.remove(membership)?;
        }
        for category_id in category_ids {
            rw.upsert(EntryCategory {
                id: (entry_id, category_id),
                entry_id,
                category_id,
            })?;
        }
        rw.commit()?;
        Ok(())
    }

    async fn tracks(&self, entry_id: u64) -> Result<Vec<Track>> {
        let r = self.r_transaction()?;
        let tracks = r
            .scan()
            .secondary::<Track>(TrackKey::entry_id)?
            .range(entry_id..=entry_id)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tracks)
    }

    async fn insert_tracks(&self, tracks: Vec<Track>) -> Result<()> {
        let (_guard, rw) = self.rw_async().await?;
        for track in tracks {
            rw.insert(track)?;
        }
        rw.commit()?;
        Ok(())
    }

    async fn history(&self, entry_id: u64) -> Result<Vec<History>> {
        let r = self.r_transaction()?;
        let history = r
            .scan()
            .secondary::<History>(HistoryKey::entry_id)?
            .range(entry_id..=entry_id)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(history)
    }

    async fn upsert_history(&self, history: Vec<History>) -> Result<()> {
        let (_guard, rw) = self.rw_async().await?;
        for h in history {
            rw.upsert(h)?;
        }
        rw.commit()?;
        Ok(())
    }

    async fn record_event(&self, event: Event) -> Result<()> {
        let (_guard, rw) = self.rw_async().await?;
        rw.insert(event)?;
        rw.commit()?;
        Ok(())
    }
}
