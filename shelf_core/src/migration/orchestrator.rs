use std::sync::Arc;

use anyhow::{Result, anyhow};
use futures::future::join_all;
use shelf_db::{Entry, EntryUpdate, Library, SourceChapter, SourceEntry};
use shelf_parse::contains_fuzzy;
use shelf_source::{CatalogSource, SmartSearchEngine, SourceManager};
use tokio::sync::{Mutex, Semaphore, broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use super::{ChapterSummary, MigratingItem, MigrationConfig, SearchResult};
use crate::{
    chapter_sync::sync_chapters_with_source,
    config::MigrationOptions,
    context::Context,
    error::{MigrationError, cancellable},
    finalizer::MigrationFinalizer,
};

/// Items searched concurrently before moving on to the next batch.
pub const BATCH_SIZE: usize = 5;

/// Upper bound on source network calls in flight across a whole run.
pub const MAX_CONCURRENT_SOURCE_CALLS: usize = 8;

struct SourceMatch {
    source: CatalogSource,
    entry: SourceEntry,
    chapters: Vec<SourceChapter>,
}

/// Finds replacements for a set of entries and migrates them once confirmed.
///
/// The search starts as soon as the orchestrator is created. State is
/// published on watch channels so a frontend can render it while the run
/// progresses.
pub struct MigrationOrchestrator {
    library: Arc<dyn Library>,
    sources: Arc<SourceManager>,
    engine: SmartSearchEngine,
    finalizer: MigrationFinalizer,
    options: MigrationOptions,
    config: Mutex<MigrationConfig>,
    items: watch::Sender<Vec<Arc<MigratingItem>>>,
    unfinished: watch::Sender<usize>,
    manual: watch::Sender<usize>,
    done: watch::Sender<bool>,
    navigate_out: watch::Sender<bool>,
    searched: watch::Sender<bool>,
    finalize_progress: watch::Sender<f64>,
    notices: broadcast::Sender<String>,
    token: CancellationToken,
    finalize_token: Mutex<CancellationToken>,
}

impl MigrationOrchestrator {
    /// Create an orchestrator and start searching in the background.
    pub fn start(
        context: Context,
        options: MigrationOptions,
        config: MigrationConfig,
    ) -> Arc<Self> {
        let gate = Arc::new(Semaphore::new(MAX_CONCURRENT_SOURCE_CALLS));
        let engine = SmartSearchEngine::new(options.extra_search_params.clone()).with_gate(gate);
        let orchestrator = Arc::new(Self {
            library: context.library.clone(),
            sources: context.sources.clone(),
            engine,
            finalizer: context.finalizer(),
            options,
            config: Mutex::new(config),
            items: watch::channel(vec![]).0,
            unfinished: watch::channel(0).0,
            manual: watch::channel(0).0,
            done: watch::channel(false).0,
            navigate_out: watch::channel(false).0,
            searched: watch::channel(false).0,
            finalize_progress: watch::channel(0.0).0,
            notices: broadcast::channel(16).0,
            token: CancellationToken::new(),
            finalize_token: Mutex::new(CancellationToken::new()),
        });

        let runner = orchestrator.clone();
        tokio::spawn(async move { runner.run().await });
        orchestrator
    }

    pub fn items(&self) -> Vec<Arc<MigratingItem>> {
        self.items.borrow().clone()
    }

    pub fn subscribe_items(&self) -> watch::Receiver<Vec<Arc<MigratingItem>>> {
        self.items.subscribe()
    }

    pub fn item(&self, entry_id: u64) -> Option<Arc<MigratingItem>> {
        self.items
            .borrow()
            .iter()
            .find(|item| item.entry.id == entry_id)
            .cloned()
    }

    /// Items whose title loosely contains `query`.
    pub fn items_matching(&self, query: &str) -> Vec<Arc<MigratingItem>> {
        self.items
            .borrow()
            .iter()
            .filter(|item| contains_fuzzy(&item.entry.title, query))
            .cloned()
            .collect()
    }

    pub fn unfinished_count(&self) -> usize {
        *self.unfinished.borrow()
    }

    pub fn subscribe_unfinished(&self) -> watch::Receiver<usize> {
        self.unfinished.subscribe()
    }

    /// Items that found no match and need a manual choice.
    pub fn manual_migrations_count(&self) -> usize {
        *self.manual.borrow()
    }

    pub fn subscribe_manual_migrations(&self) -> watch::Receiver<usize> {
        self.manual.subscribe()
    }

    /// Set once every item has finished searching and at least one found a
    /// match. A run where nothing was found never becomes done.
    pub fn is_done(&self) -> bool {
        *self.done.borrow()
    }

    pub fn subscribe_done(&self) -> watch::Receiver<bool> {
        self.done.subscribe()
    }

    /// Set when there is nothing left to show, because every item was removed
    /// or a finalize pass completed.
    pub fn subscribe_navigate_out(&self) -> watch::Receiver<bool> {
        self.navigate_out.subscribe()
    }

    pub fn finalize_progress(&self) -> f64 {
        *self.finalize_progress.borrow()
    }

    pub fn subscribe_finalize_progress(&self) -> watch::Receiver<f64> {
        self.finalize_progress.subscribe()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<String> {
        self.notices.subscribe()
    }

    /// Wait until the initial search pass over every item has ended.
    pub async fn wait_for_search(&self) {
        let mut searched = self.searched.subscribe();
        let _ = searched.wait_for(|searched| *searched).await;
    }

    pub fn clear_caches(&self) {
        self.engine.clear_caches();
    }

    fn notify(&self, message: String) {
        info!("{message}");
        let _ = self.notices.send(message);
    }

    #[instrument(skip_all)]
    async fn run(self: Arc<Self>) {
        let sources = self
            .sources
            .migration_sources(&self.options.migration_sources);
        let config = self.config.lock().await.clone();
        debug!(
            "migrating {} entries using {} sources",
            config.entry_ids().len(),
            sources.len()
        );

        let mut items = vec![];
        for entry_id in config.entry_ids() {
            if self.token.is_cancelled() {
                break;
            }
            match self.load_item(entry_id).await {
                Ok(Some(item)) => items.push(Arc::new(item)),
                Ok(None) => warn!("Entry {entry_id} not found, skipping"),
                Err(err) => warn!("Failed loading entry {entry_id}: {err:?}"),
            }
        }

        // Checked under the channel lock. dispose() cancels before it clears.
        let published = self.items.send_if_modified(|current| {
            if self.token.is_cancelled() {
                return false;
            }
            *current = items.clone();
            true
        });
        if published {
            self.update_counts();

            for batch in items.chunks(BATCH_SIZE) {
                if self.token.is_cancelled() {
                    break;
                }
                join_all(
                    batch
                        .iter()
                        .map(|item| self.process_item(item.clone(), &sources, &config)),
                )
                .await;
            }
        }

        if self.token.is_cancelled() {
            self.unfinished.send_replace(0);
            self.manual.send_replace(0);
        }
        info!(
            "search finished, {} unfinished, {} without match",
            self.unfinished_count(),
            self.manual_migrations_count()
        );
        self.searched.send_replace(true);
    }

    async fn load_item(&self, entry_id: u64) -> Result<Option<MigratingItem>> {
        let Some(entry) = self.library.entry(entry_id).await? else {
            return Ok(None);
        };
        let chapters = self.library.chapters(entry.id).await?;
        let source_label = self.sources.get_or_stub(entry.source_id).label();
        Ok(Some(MigratingItem::new(
            entry,
            ChapterSummary::from_chapters(&chapters),
            source_label,
            &self.token,
        )))
    }

    #[instrument(skip_all, fields(entry = item.entry.id))]
    async fn process_item(
        &self,
        item: Arc<MigratingItem>,
        sources: &[CatalogSource],
        config: &MigrationConfig,
    ) {
        match config.target_for(item.entry.id) {
            Some(target) => {
                item.start_progress(sources.len().max(1));
                let outcome = cancellable(item.token(), async {
                    let entry = self
                        .library
                        .entry(target)
                        .await?
                        .ok_or_else(|| anyhow!("entry {target} not found"))?;
                    let source = self.sources.get_or_stub(entry.source_id);
                    self.sync_target(&source, &entry).await.map(Some)
                })
                .await;
                if outcome.is_ok() {
                    item.complete_progress();
                }
                self.resolve(&item, outcome, true);
            }
            None => {
                let outcome = cancellable(item.token(), self.search_item(&item, sources)).await;
                self.resolve(&item, outcome, false);
            }
        }
    }

    fn resolve(
        &self,
        item: &MigratingItem,
        outcome: Result<Option<u64>, MigrationError>,
        explicit_target: bool,
    ) {
        match outcome {
            Ok(Some(entry_id)) => {
                debug!("\"{}\" resolved to entry {entry_id}", item.entry.title);
                item.set_result(SearchResult::Result(entry_id));
            }
            Ok(None) => {
                debug!("no match for \"{}\"", item.entry.title);
                item.set_result(SearchResult::NotFound);
            }
            Err(MigrationError::Cancelled) => {
                trace!("search for \"{}\" cancelled", item.entry.title);
                return;
            }
            Err(MigrationError::Failed(err)) => {
                warn!("Migration search for \"{}\" failed: {err:?}", item.entry.title);
                if explicit_target {
                    self.notify(format!(
                        "Could not use the chosen entry for \"{}\": {err}",
                        item.entry.title
                    ));
                }
                item.set_result(SearchResult::NotFound);
            }
        }
        self.update_counts();
    }

    async fn search_item(
        &self,
        item: &MigratingItem,
        sources: &[CatalogSource],
    ) -> Result<Option<u64>> {
        let candidates = if sources.len() == 1 {
            sources.to_vec()
        } else {
            sources
                .iter()
                .filter(|source| source.id() != item.entry.source_id)
                .cloned()
                .collect()
        };
        item.start_progress(candidates.len());

        let found = if self.options.use_source_with_most_chapters {
            self.most_chapters(item, &candidates).await
        } else {
            self.first_match(item, &candidates).await
        };
        let Some(found) = found else {
            return Ok(None);
        };

        let local = self
            .library
            .network_to_local(found.source.id(), &found.entry)
            .await?;
        sync_chapters_with_source(self.library.as_ref(), &found.chapters, &local).await?;
        self.backfill_cover(&found.source, &local).await;
        Ok(Some(local.id))
    }

    /// Search every candidate source at once and keep the match with the most
    /// chapters. Earlier sources win ties.
    async fn most_chapters(
        &self,
        item: &MigratingItem,
        candidates: &[CatalogSource],
    ) -> Option<SourceMatch> {
        join_all(
            candidates
                .iter()
                .map(|source| self.try_source(item, source)),
        )
        .await
        .into_iter()
        .flatten()
        .filter(|found| !found.chapters.is_empty())
        .rev()
        .max_by_key(|found| found.chapters.len())
    }

    /// Search candidate sources in priority order and stop at the first one
    /// with a usable match.
    async fn first_match(
        &self,
        item: &MigratingItem,
        candidates: &[CatalogSource],
    ) -> Option<SourceMatch> {
        for source in candidates {
            if let Some(found) = self.try_source(item, source).await
                && !found.chapters.is_empty()
            {
                return Some(found);
            }
        }
        None
    }

    /// One source attempt. Failures count as "no match from this source".
    async fn try_source(&self, item: &MigratingItem, source: &CatalogSource) -> Option<SourceMatch> {
        let result = self.search_source(item, source).await;
        item.advance_progress();
        match result {
            Ok(found) => found,
            Err(err) => {
                warn!(
                    source = source.id(),
                    "Source {} failed for \"{}\": {err:#}",
                    source.label(),
                    item.entry.title
                );
                None
            }
        }
    }

    async fn search_source(
        &self,
        item: &MigratingItem,
        source: &CatalogSource,
    ) -> Result<Option<SourceMatch>> {
        let found = if self.options.use_smart_search {
            self.engine.smart_search(source, &item.entry.title).await?
        } else {
            self.engine.normal_search(source, &item.entry.title).await?
        };
        let Some(entry) = found else {
            return Ok(None);
        };
        if item.entry.is_same_remote(source.id(), &entry) {
            trace!("{} only found the entry itself", source.label());
            return Ok(None);
        }
        let chapters = self.engine.fetch_chapter_list(source, &entry).await?;
        Ok(Some(SourceMatch {
            source: source.clone(),
            entry,
            chapters,
        }))
    }

    /// Fetch and store the chapters of a chosen target entry.
    async fn sync_target(&self, source: &CatalogSource, target: &Entry) -> Result<u64> {
        let chapters = self
            .engine
            .fetch_chapter_list(source, &target.to_network())
            .await?;
        sync_chapters_with_source(self.library.as_ref(), &chapters, target).await?;
        self.backfill_cover(source, target).await;
        Ok(target.id)
    }

    async fn backfill_cover(&self, source: &CatalogSource, entry: &Entry) {
        if entry.thumbnail_url.is_some() {
            return;
        }
        let details = match self
            .engine
            .fetch_entry_details(source, &entry.to_network())
            .await
        {
            Ok(details) => details,
            Err(err) => {
                warn!("Failed fetching details for \"{}\": {err}", entry.title);
                return;
            }
        };
        if details.thumbnail_url.is_none() {
            return;
        }
        let update = EntryUpdate {
            thumbnail_url: Some(details.thumbnail_url),
            initialized: Some(true),
            ..EntryUpdate::new(entry.id)
        };
        if let Err(err) = self.library.update_entry(update).await {
            warn!("Failed storing cover for \"{}\": {err}", entry.title);
        }
    }

    fn update_counts(&self) {
        let items = self.items();
        let unfinished = items
            .iter()
            .filter(|item| !item.search_result().is_terminal())
            .count();
        let manual = items
            .iter()
            .filter(|item| item.search_result() == SearchResult::NotFound)
            .count();
        let found_any = items
            .iter()
            .any(|item| matches!(item.search_result(), SearchResult::Result(_)));

        self.unfinished.send_replace(unfinished);
        self.manual.send_replace(manual);
        self.done.send_replace(unfinished == 0 && found_any);
        if items.is_empty() {
            self.navigate_out.send_replace(true);
        }
    }

    /// Stop migrating one entry. Its in-flight searches are cancelled.
    pub async fn remove_item(&self, entry_id: u64) -> bool {
        let mut removed = None;
        self.items.send_if_modified(|items| {
            match items.iter().position(|item| item.entry.id == entry_id) {
                Some(pos) => {
                    removed = Some(items.remove(pos));
                    true
                }
                None => false,
            }
        });
        let Some(item) = removed else {
            return false;
        };
        item.cancel();
        self.update_counts();
        self.config.lock().await.remove(entry_id);
        true
    }

    /// Replace the match of one item with an entry the user picked from
    /// `source_id`. No search or scoring is done.
    #[instrument(skip(self, target), fields(target = %target.url))]
    pub async fn use_entry_for_migration(&self, entry_id: u64, source_id: u64, target: SourceEntry) {
        let Some(item) = self.item(entry_id) else {
            self.notify(format!("Entry {entry_id} is no longer being migrated"));
            return;
        };
        item.set_result(SearchResult::Searching);
        self.update_counts();

        let outcome = cancellable(item.token(), async {
            let source = self.sources.get_or_stub(source_id);
            let local = self.library.network_to_local(source_id, &target).await?;
            self.sync_target(&source, &local).await.map(Some)
        })
        .await;
        self.resolve(&item, outcome, true);
    }

    async fn begin_finalize(&self) -> CancellationToken {
        let token = self.token.child_token();
        *self.finalize_token.lock().await = token.clone();
        token
    }

    pub async fn cancel_finalize(&self) {
        self.finalize_token.lock().await.cancel();
    }

    async fn finalize_item(&self, item: &MigratingItem, target: u64, replace: bool) {
        let entries = async {
            let old = self
                .library
                .entry(item.entry.id)
                .await?
                .unwrap_or_else(|| item.entry.clone());
            let new = self
                .library
                .entry(target)
                .await?
                .ok_or_else(|| anyhow!("entry {target} not found"))?;
            anyhow::Ok((old, new))
        }
        .await;
        match entries {
            Ok((old, new)) => {
                self.finalizer
                    .migrate(&old, &new, replace, self.options.flags)
                    .await
            }
            Err(err) => error!("Failed finalizing \"{}\": {err:?}", item.entry.title),
        }
    }

    /// Migrate every item that found a match, in list order.
    #[instrument(skip(self))]
    pub async fn migrate_all(&self, replace: bool) -> Result<(), MigrationError> {
        let token = self.begin_finalize().await;
        let resolved = self
            .items()
            .into_iter()
            .filter_map(|item| match item.search_result() {
                SearchResult::Result(target) => Some((item, target)),
                _ => None,
            })
            .collect::<Vec<_>>();
        let total = resolved.len();
        self.finalize_progress.send_replace(0.0);

        for (processed, (item, target)) in resolved.iter().enumerate() {
            if token.is_cancelled() {
                info!("finalize cancelled after {processed} of {total} entries");
                return Err(MigrationError::Cancelled);
            }
            self.finalize_item(item, *target, replace).await;
            self.finalize_progress
                .send_replace((processed + 1) as f64 / total as f64);
        }

        self.finalize_progress.send_replace(1.0);
        self.navigate_out.send_replace(true);
        Ok(())
    }

    /// Migrate a single item and drop it from the list.
    #[instrument(skip(self))]
    pub async fn migrate_one(&self, entry_id: u64, copy: bool) -> Result<(), MigrationError> {
        let Some(item) = self.item(entry_id) else {
            self.notify(format!("Entry {entry_id} is no longer being migrated"));
            return Ok(());
        };
        let SearchResult::Result(target) = item.search_result() else {
            self.notify(format!("\"{}\" has no match to migrate to", item.entry.title));
            return Ok(());
        };
        let token = self.begin_finalize().await;
        if token.is_cancelled() {
            return Err(MigrationError::Cancelled);
        }
        self.finalize_item(&item, target, !copy).await;
        self.remove_item(entry_id).await;
        Ok(())
    }

    /// Cancel everything and drop all items.
    pub fn dispose(&self) {
        self.token.cancel();
        self.items.send_replace(vec![]);
        self.unfinished.send_replace(0);
        self.manual.send_replace(0);
    }
}
