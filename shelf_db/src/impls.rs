pub mod flags;

use crate::{Chapter, Entry, Event, EventType, SourceChapter, SourceEntry, Timestamp, Uuid};

impl Entry {
    pub fn source_key(source_id: u64, url: &str) -> String {
        format!("{source_id}:{url}")
    }

    pub fn from_network(id: u64, source_id: u64, entry: &SourceEntry) -> Self {
        Self {
            id,
            source_key: Self::source_key(source_id, &entry.url),
            source_id,
            url: entry.url.clone(),
            title: entry.title.clone(),
            author: entry.author.clone(),
            thumbnail_url: entry.thumbnail_url.clone(),
            favorite: false,
            date_added: 0,
            has_custom_cover: false,
            initialized: entry.initialized,
        }
    }

    pub fn to_network(&self) -> SourceEntry {
        SourceEntry {
            url: self.url.clone(),
            title: self.title.clone(),
            author: self.author.clone(),
            description: None,
            thumbnail_url: self.thumbnail_url.clone(),
            initialized: self.initialized,
        }
    }

    /// Whether this local entry is the same source-side identity as `entry`.
    pub fn is_same_remote(&self, source_id: u64, entry: &SourceEntry) -> bool {
        self.source_id == source_id && self.url == entry.url
    }
}

impl Chapter {
    pub fn from_network(entry_id: u64, source_order: u32, chapter: &SourceChapter) -> Self {
        Self {
            id: 0,
            entry_id,
            url: chapter.url.clone(),
            name: chapter.name.clone(),
            chapter_number: chapter.chapter_number,
            scanlator: chapter.scanlator.clone(),
            source_order,
            read: false,
            bookmark: false,
            last_page_read: 0,
            date_fetch: Timestamp::now().unix_millis(),
            date_upload: chapter.date_upload,
        }
    }

    pub fn is_recognized_number(&self) -> bool {
        self.chapter_number >= 0.0
    }
}

impl Event {
    pub fn new(event: EventType) -> Self {
        Self {
            id: Uuid::new(),
            created_at: Timestamp::now(),
            event,
        }
    }
}
