use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use anyhow::{Result, bail};
use async_trait::async_trait;
use native_db::Builder;
use shelf_core::{Context, CoverCache, DownloadManager};
use shelf_db::{
    Chapter, Database, Entry, EntryUpdate, Library, MODELS, SourceChapter, SourceEntry, migrate,
};
use shelf_source::{CatalogSource, FakeSource, SourceManager};
use tempfile::TempDir;

pub struct TestDb {
    pub db: Arc<Database<'static>>,
    #[allow(dead_code)]
    temp_dir: TempDir,
}

impl TestDb {
    pub fn new() -> Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let db_path = temp_dir.path().join("test.db");
        let db = Builder::new().create(&MODELS, db_path)?;
        migrate(&db)?;
        Ok(Self {
            db: Arc::new(db),
            temp_dir,
        })
    }
}

#[allow(dead_code)]
pub struct MockEntryBuilder {
    source_id: u64,
    entry: SourceEntry,
    favorite: bool,
    has_custom_cover: bool,
    chapters: Vec<SourceChapter>,
    read_up_to: Option<f64>,
}

#[allow(dead_code)]
impl MockEntryBuilder {
    pub fn new(source_id: u64, url: &str, title: &str) -> Self {
        Self {
            source_id,
            entry: SourceEntry::new(url, title),
            favorite: true,
            has_custom_cover: false,
            chapters: vec![],
            read_up_to: None,
        }
    }

    pub fn with_thumbnail(mut self, url: &str) -> Self {
        self.entry.thumbnail_url = Some(url.to_string());
        self
    }

    pub fn with_custom_cover(mut self) -> Self {
        self.has_custom_cover = true;
        self
    }

    /// Chapters numbered from 1, with urls under the entry url.
    pub fn with_chapters(mut self, count: usize) -> Self {
        self.chapters = (1..=count)
            .map(|n| {
                SourceChapter::new(
                    format!("{}/{n}", self.entry.url),
                    format!("Chapter {n}"),
                    n as f64,
                )
            })
            .collect();
        self
    }

    pub fn with_chapter_list(mut self, chapters: Vec<SourceChapter>) -> Self {
        self.chapters = chapters;
        self
    }

    /// Mark every chapter numbered up to `number` as read.
    pub fn read_up_to(mut self, number: f64) -> Self {
        self.read_up_to = Some(number);
        self
    }

    pub async fn insert(self, library: &dyn Library) -> Result<Entry> {
        let entry = library.network_to_local(self.source_id, &self.entry).await?;
        library
            .update_entry(EntryUpdate {
                favorite: Some(self.favorite),
                date_added: Some(if self.favorite { 1_700_000_000_000 } else { 0 }),
                has_custom_cover: Some(self.has_custom_cover),
                ..EntryUpdate::new(entry.id)
            })
            .await?;
        let chapters = self
            .chapters
            .iter()
            .enumerate()
            .map(|(order, chapter)| {
                let mut chapter = Chapter::from_network(entry.id, order as u32, chapter);
                if let Some(max) = self.read_up_to {
                    chapter.read = chapter.chapter_number >= 0.0 && chapter.chapter_number <= max;
                }
                chapter
            })
            .collect::<Vec<_>>();
        if !chapters.is_empty() {
            library.insert_chapters(chapters).await?;
        }
        Ok(library.entry(entry.id).await?.unwrap_or(entry))
    }
}

#[derive(Default)]
pub struct RecordingCovers {
    pub copied: Mutex<Vec<(u64, u64)>>,
    pub deleted_custom: Mutex<Vec<u64>>,
    pub deleted_cached: Mutex<Vec<u64>>,
    fail_copy: AtomicBool,
}

#[allow(dead_code)]
impl RecordingCovers {
    pub fn fail_copy(&self) {
        self.fail_copy.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CoverCache for RecordingCovers {
    async fn copy_custom_cover(&self, from: &Entry, to: &Entry) -> Result<()> {
        if self.fail_copy.load(Ordering::SeqCst) {
            bail!("cover cache unavailable");
        }
        self.copied.lock().unwrap().push((from.id, to.id));
        Ok(())
    }

    async fn delete_custom_cover(&self, entry: &Entry) -> Result<()> {
        self.deleted_custom.lock().unwrap().push(entry.id);
        Ok(())
    }

    async fn delete_cached_cover(&self, entry: &Entry) -> Result<()> {
        self.deleted_cached.lock().unwrap().push(entry.id);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingDownloads {
    pub deleted: Mutex<Vec<(u64, String)>>,
}

#[async_trait]
impl DownloadManager for RecordingDownloads {
    async fn delete_entry_downloads(&self, entry: &Entry, source_label: &str) -> Result<()> {
        self.deleted
            .lock()
            .unwrap()
            .push((entry.id, source_label.to_string()));
        Ok(())
    }
}

#[allow(dead_code)]
pub struct TestContext {
    pub db: TestDb,
    pub covers: Arc<RecordingCovers>,
    pub downloads: Arc<RecordingDownloads>,
    pub context: Context,
}

#[allow(dead_code)]
impl TestContext {
    pub fn new(sources: Vec<Arc<FakeSource>>) -> Result<Self> {
        let mut manager = SourceManager::new();
        for source in sources {
            manager.register(CatalogSource::Online(source));
        }
        Self::with_manager(manager)
    }

    pub fn with_manager(manager: SourceManager) -> Result<Self> {
        let db = TestDb::new()?;
        let covers = Arc::new(RecordingCovers::default());
        let downloads = Arc::new(RecordingDownloads::default());
        let context = Context {
            library: db.db.clone(),
            sources: Arc::new(manager),
            covers: covers.clone(),
            downloads: downloads.clone(),
        };
        Ok(Self {
            db,
            covers,
            downloads,
            context,
        })
    }

    pub fn library(&self) -> &dyn Library {
        self.db.db.as_ref()
    }
}
