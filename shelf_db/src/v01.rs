use native_db::{Key, ToKey, native_db};
use native_model::{Model, native_model};
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcDateTime};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[native_model(id = 1, version = 1)]
#[native_db]
pub struct Entry {
    #[primary_key]
    pub id: u64,
    #[secondary_key(unique)]
    pub source_key: String,
    pub source_id: u64,
    pub url: String,
    pub title: String,
    pub author: Option<String>,
    pub thumbnail_url: Option<String>,
    pub favorite: bool,
    /// Milliseconds since the epoch, 0 when the entry is not in the library.
    pub date_added: i64,
    pub has_custom_cover: bool,
    pub initialized: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[native_model(id = 2, version = 1)]
#[native_db]
pub struct Chapter {
    #[primary_key]
    pub id: u64,
    #[secondary_key]
    pub entry_id: u64,
    pub url: String,
    pub name: String,
    /// Negative when the source did not provide a recognizable number.
    pub chapter_number: f64,
    pub scanlator: Option<String>,
    pub source_order: u32,
    pub read: bool,
    pub bookmark: bool,
    pub last_page_read: u32,
    pub date_fetch: i64,
    pub date_upload: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[native_model(id = 3, version = 1)]
#[native_db]
pub struct Category {
    #[primary_key]
    pub id: u64,
    pub name: String,
    pub order: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[native_model(id = 4, version = 1)]
#[native_db]
pub struct EntryCategory {
    #[primary_key]
    pub id: (u64, u64),
    #[secondary_key]
    pub entry_id: u64,
    pub category_id: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[native_model(id = 5, version = 1)]
#[native_db]
pub struct Track {
    #[primary_key]
    pub id: Uuid,
    #[secondary_key]
    pub entry_id: u64,
    pub tracker_id: u32,
    pub remote_id: u64,
    pub library_id: Option<u64>,
    pub title: String,
    pub last_chapter_read: f64,
    pub total_chapters: u32,
    pub status: u32,
    pub score: f64,
    pub tracking_url: String,
    pub started_reading_date: i64,
    pub finished_reading_date: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[native_model(id = 6, version = 1)]
#[native_db]
pub struct History {
    #[primary_key]
    pub chapter_id: u64,
    #[secondary_key]
    pub entry_id: u64,
    pub last_read: i64,
    /// Total reading time in milliseconds.
    pub time_read: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[native_model(id = 7, version = 1)]
#[native_db]
pub struct Event {
    #[primary_key]
    pub id: Uuid,
    #[secondary_key]
    pub created_at: Timestamp,
    pub event: EventType,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum EventType {
    Migrated { from: u64, to: u64, replace: bool },
}

#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, PartialOrd, Ord, Clone, Copy, Hash)]
pub struct Timestamp(pub UtcDateTime);
impl Timestamp {
    pub fn now() -> Self {
        Self(UtcDateTime::now())
    }

    pub fn unix_millis(&self) -> i64 {
        (self.0.unix_timestamp_nanos() / 1_000_000) as i64
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl From<UtcDateTime> for Timestamp {
    fn from(value: UtcDateTime) -> Self {
        Self(value)
    }
}
impl From<OffsetDateTime> for Timestamp {
    fn from(value: OffsetDateTime) -> Self {
        Self(value.to_utc())
    }
}

impl ToKey for Timestamp {
    fn to_key(&self) -> Key {
        Key::new(self.0.unix_timestamp().to_be_bytes().into())
    }

    fn key_names() -> Vec<String> {
        vec!["Timestamp".to_string()]
    }
}

#[derive(Serialize, Deserialize, Eq, PartialEq, Debug, Clone, Hash)]
pub struct Uuid(uuid::Uuid);
impl Uuid {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for Uuid {
    fn default() -> Self {
        Self::new()
    }
}

impl ToKey for Uuid {
    fn to_key(&self) -> Key {
        Key::new(self.0.as_bytes().to_vec())
    }

    fn key_names() -> Vec<String> {
        vec!["Uuid".to_string()]
    }
}
