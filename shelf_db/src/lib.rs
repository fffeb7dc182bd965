pub mod impls;
mod library;
mod network;
mod v01;

use anyhow::Result;
pub use native_db::Database;
use native_db::Models;
use native_db::transaction::RwTransaction;
use once_cell::sync::Lazy;
use serde::Deserialize;
use tokio::sync::MutexGuard;
use tracing::{info, instrument};

pub use library::{EntryUpdate, Library};
pub use network::{SourceChapter, SourceEntry};

pub static MODELS: Lazy<Models> = Lazy::new(|| {
    let mut models = Models::new();
    models.define::<v01::Entry>().unwrap();
    models.define::<v01::Chapter>().unwrap();
    models.define::<v01::Category>().unwrap();
    models.define::<v01::EntryCategory>().unwrap();
    models.define::<v01::Track>().unwrap();
    models.define::<v01::History>().unwrap();
    models.define::<v01::Event>().unwrap();
    models
});

pub type Entry = v01::Entry;
pub type EntryKey = v01::EntryKey;
pub type Chapter = v01::Chapter;
pub type ChapterKey = v01::ChapterKey;
pub type Category = v01::Category;
pub type EntryCategory = v01::EntryCategory;
pub type EntryCategoryKey = v01::EntryCategoryKey;
pub type Track = v01::Track;
pub type TrackKey = v01::TrackKey;
pub type History = v01::History;
pub type HistoryKey = v01::HistoryKey;
pub type Event = v01::Event;
pub type EventKey = v01::EventKey;
pub type EventType = v01::EventType;
pub type Timestamp = v01::Timestamp;
pub type Uuid = v01::Uuid;

/// Which parts of an entry's user data are carried over by a migration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Vec<String>")]
pub struct MigrationFlags(u8);

#[instrument(skip_all)]
pub fn migrate(db: &Database<'_>) -> Result<()> {
    let rw = db.rw_transaction()?;

    info!("Migrations started");
    rw.migrate::<Entry>()?;
    rw.migrate::<Chapter>()?;
    rw.migrate::<Category>()?;
    rw.migrate::<EntryCategory>()?;
    rw.migrate::<Track>()?;
    rw.migrate::<History>()?;
    rw.migrate::<Event>()?;
    rw.commit()?;
    info!("Migrations done");

    Ok(())
}

static RW_MUTEX: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

pub trait DatabaseExt {
    fn db(&self) -> &Database<'_>;

    #[allow(async_fn_in_trait)]
    async fn rw_async(&self) -> Result<(MutexGuard<'_, ()>, RwTransaction<'_>)> {
        // Make sure we are only running one rw_transaction at a time
        let guard = RW_MUTEX.lock().await;
        let rw = self.db().rw_transaction()?;
        Ok((guard, rw))
    }
}

impl DatabaseExt for Database<'_> {
    fn db(&self) -> &Database<'_> {
        self
    }
}
