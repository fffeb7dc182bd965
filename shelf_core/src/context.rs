use std::sync::Arc;

use shelf_db::Library;
use shelf_source::SourceManager;

use crate::{
    finalizer::MigrationFinalizer,
    storage::{CoverCache, DownloadManager},
};

/// Collaborators shared by everything that takes part in a migration.
#[derive(Clone)]
pub struct Context {
    pub library: Arc<dyn Library>,
    pub sources: Arc<SourceManager>,
    pub covers: Arc<dyn CoverCache>,
    pub downloads: Arc<dyn DownloadManager>,
}

impl Context {
    pub fn finalizer(&self) -> MigrationFinalizer {
        MigrationFinalizer::new(
            self.library.clone(),
            self.sources.clone(),
            self.covers.clone(),
            self.downloads.clone(),
        )
    }
}
