use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use shelf_db::Entry;
use tokio::fs;
use tracing::{debug, trace};

/// On-disk cover images, one cached cover and optionally one custom cover
/// per entry.
#[async_trait]
pub trait CoverCache: Send + Sync {
    /// Copy the custom cover of `from` into the custom cover slot of `to`.
    async fn copy_custom_cover(&self, from: &Entry, to: &Entry) -> Result<()>;

    async fn delete_custom_cover(&self, entry: &Entry) -> Result<()>;

    async fn delete_cached_cover(&self, entry: &Entry) -> Result<()>;
}

/// Downloaded chapter files.
#[async_trait]
pub trait DownloadManager: Send + Sync {
    async fn delete_entry_downloads(&self, entry: &Entry, source_label: &str) -> Result<()>;
}

async fn remove_file(path: &Path) -> Result<()> {
    fs::remove_file(path).await.or_else(|err| {
        if err.kind() == ErrorKind::NotFound {
            trace!("file already missing");
            Ok(())
        } else {
            Err(err)
        }
    })?;
    Ok(())
}

pub struct FsCoverCache {
    dir: PathBuf,
}

impl FsCoverCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn cached_cover_path(&self, entry: &Entry) -> PathBuf {
        self.dir.join(entry.id.to_string())
    }

    pub fn custom_cover_path(&self, entry: &Entry) -> PathBuf {
        self.dir.join("custom").join(entry.id.to_string())
    }
}

#[async_trait]
impl CoverCache for FsCoverCache {
    async fn copy_custom_cover(&self, from: &Entry, to: &Entry) -> Result<()> {
        let source = self.custom_cover_path(from);
        let target = self.custom_cover_path(to);
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir).await?;
        }
        fs::copy(&source, &target)
            .await
            .with_context(|| format!("copy custom cover {}", source.display()))?;
        Ok(())
    }

    async fn delete_custom_cover(&self, entry: &Entry) -> Result<()> {
        remove_file(&self.custom_cover_path(entry)).await
    }

    async fn delete_cached_cover(&self, entry: &Entry) -> Result<()> {
        remove_file(&self.cached_cover_path(entry)).await
    }
}

/// Downloads stored as `<dir>/<source label>/<entry title>/...`.
pub struct FsDownloadManager {
    dir: PathBuf,
}

impl FsDownloadManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn entry_dir(&self, entry: &Entry, source_label: &str) -> PathBuf {
        self.dir
            .join(sanitize_filename::sanitize(source_label))
            .join(sanitize_filename::sanitize(&entry.title))
    }
}

#[async_trait]
impl DownloadManager for FsDownloadManager {
    async fn delete_entry_downloads(&self, entry: &Entry, source_label: &str) -> Result<()> {
        let dir = self.entry_dir(entry, source_label);
        debug!("Removing downloads for entry {} in {}", entry.id, dir.display());
        fs::remove_dir_all(&dir).await.or_else(|err| {
            if err.kind() == ErrorKind::NotFound {
                trace!("download dir already missing");
                Ok(())
            } else {
                Err(err)
            }
        })?;
        Ok(())
    }
}
