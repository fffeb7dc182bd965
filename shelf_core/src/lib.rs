pub mod chapter_sync;
pub mod config;
pub mod context;
pub mod error;
pub mod finalizer;
pub mod logging;
pub mod migration;
pub mod storage;

pub use crate::config::{Config, MigrationOptions, SourceConfig};
pub use crate::context::Context;
pub use crate::error::{MigrationError, cancellable};
pub use crate::finalizer::MigrationFinalizer;
pub use crate::migration::{
    BATCH_SIZE, ChapterSummary, MAX_CONCURRENT_SOURCE_CALLS, MigratingItem, MigrationConfig,
    MigrationOrchestrator, SearchResult,
};
pub use crate::storage::{CoverCache, DownloadManager, FsCoverCache, FsDownloadManager};

// Re-export types from shelf_db for convenience
pub use shelf_db::{Entry, EventType, Library, MigrationFlags};
