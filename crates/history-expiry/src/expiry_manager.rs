use history_storage::{ArchivedDatabase, HistoryDatabase, ThumbnailDatabase};
use history_types::{CoreTransition, Timestamp, Url, UrlId, UrlRow, VisitRow, VisitSource};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::archive_policy::should_archive;
use crate::bookmarks::BookmarkService;
use crate::effects::DeleteEffects;
use crate::metrics::{ExpiryMetrics, ExpiryStats};
use crate::notifications::{
    BroadcastNotificationDelegate, DeletionType, HistoryNotification, UrlsDeletedDetails, UrlsModifiedDetails,
};
use crate::readers::{ExpiringVisits, VisitReader, EARLY_EXPIRATION_ADVANCE};
use crate::scheduler::{spawn_archive_task, WorkQueue};
use crate::{HistoryExpiryError, Result};

#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Visits older than this are archived (default: 90 days)
    pub expiration_threshold: Duration,
    /// Visits per background batch (default: 32)
    pub batch_size: usize,
    /// Delay between batches while a reader has more work (default: 30 s)
    pub expiration_delay: Duration,
    /// Delay after every reader came back drained (default: 5 min)
    pub empty_delay: Duration,
    /// How far ahead AUTO_SUBFRAME visits are expired (default: 3 days)
    pub early_expiration_advance: Duration,
    /// Start the background archiver with the service
    pub auto_archive: bool,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            expiration_threshold: Duration::from_secs(90 * 24 * 60 * 60),
            batch_size: 32,
            expiration_delay: Duration::from_secs(30),
            empty_delay: Duration::from_secs(5 * 60),
            early_expiration_advance: EARLY_EXPIRATION_ADVANCE,
            auto_archive: true,
        }
    }
}

/// Store handles the expirer works against. Any of them may be missing;
/// without a main store every operation is a no-op.
#[derive(Clone, Default)]
pub struct ExpireDatabases {
    pub main: Option<Arc<dyn HistoryDatabase>>,
    pub archived: Option<Arc<dyn ArchivedDatabase>>,
    pub thumbnail: Option<Arc<dyn ThumbnailDatabase>>,
}

impl ExpireDatabases {
    pub fn new(
        main: Arc<dyn HistoryDatabase>,
        archived: Option<Arc<dyn ArchivedDatabase>>,
        thumbnail: Option<Arc<dyn ThumbnailDatabase>>,
    ) -> Self {
        Self {
            main: Some(main),
            archived,
            thumbnail,
        }
    }
}

/// Borrowed view of the stores for the duration of one operation
struct Stores<'a> {
    main: &'a dyn HistoryDatabase,
    archived: Option<&'a dyn ArchivedDatabase>,
    thumbnail: Option<&'a dyn ThumbnailDatabase>,
}

struct ArchiveWork {
    queue: WorkQueue,
    expiration_threshold: Duration,
    task: Option<JoinHandle<()>>,
    /// Bumped on every start and stop. Ticks from an older schedule leave the queue alone.
    generation: u64,
}

/// Visit counters to subtract from one URL row
#[derive(Debug, Default)]
struct ChangedCounts {
    visit_count: i32,
    typed_count: i32,
}

/// Deletes and archives history visits, keeps URL rows and favicons
/// consistent with what remains, and announces what changed.
pub struct HistoryExpiryManager {
    config: ExpiryConfig,
    delegate: Arc<dyn BroadcastNotificationDelegate>,
    bookmark_service: Option<Arc<dyn BookmarkService>>,
    databases: RwLock<ExpireDatabases>,
    all_visits_reader: VisitReader,
    auto_subframe_visits_reader: VisitReader,
    work: Mutex<ArchiveWork>,
    metrics: Arc<ExpiryMetrics>,
}

impl HistoryExpiryManager {
    pub fn new(
        config: ExpiryConfig,
        delegate: Arc<dyn BroadcastNotificationDelegate>,
        bookmark_service: Option<Arc<dyn BookmarkService>>,
        metrics: Arc<ExpiryMetrics>,
    ) -> Self {
        let auto_subframe_visits_reader = VisitReader::AutoSubframeVisits {
            advance: config.early_expiration_advance,
        };
        let work = ArchiveWork {
            queue: WorkQueue::default(),
            expiration_threshold: config.expiration_threshold,
            task: None,
            generation: 0,
        };

        Self {
            config,
            delegate,
            bookmark_service,
            databases: RwLock::new(ExpireDatabases::default()),
            all_visits_reader: VisitReader::AllVisits,
            auto_subframe_visits_reader,
            work: Mutex::new(work),
            metrics,
        }
    }

    pub fn config(&self) -> &ExpiryConfig {
        &self.config
    }

    /// Points the expirer at a new set of stores. Takes effect for the next
    /// operation; one already running finishes against the old handles.
    pub fn set_databases(&self, databases: ExpireDatabases) {
        *self.databases.write() = databases;
    }

    pub fn databases(&self) -> ExpireDatabases {
        self.databases.read().clone()
    }

    pub fn stats(&self) -> ExpiryStats {
        self.metrics.stats()
    }

    /// Deletes one URL and all of its visits, bookmarks permitting.
    pub fn delete_url(&self, url: &Url) -> Result<()> {
        self.delete_urls(std::slice::from_ref(url))
    }

    pub fn delete_urls(&self, urls: &[Url]) -> Result<()> {
        self.with_stores(|stores| {
            let mut effects = DeleteEffects::new();
            for url in urls {
                let Some(url_row) = stores.main.get_row_for_url(url)? else {
                    debug!("No history for {}, nothing to delete", url);
                    continue;
                };

                let visits = stores.main.get_visits_for_url(url_row.id)?;
                self.delete_visit_related_info(stores, &visits, &mut effects)?;

                let is_bookmarked = self.is_bookmarked(url);
                self.delete_one_url(stores, &url_row, is_bookmarked, &mut effects)?;
            }

            self.delete_favicons_if_possible(stores, &mut effects)?;
            self.broadcast_notifications(effects, DeletionType::UserInitiated);
            Ok(())
        })
    }

    /// Removes every visit in `[begin, end)`, optionally only for `restrict_urls`.
    /// A null `end` means no upper bound.
    pub fn expire_history_between(&self, restrict_urls: &BTreeSet<Url>, begin: Timestamp, end: Timestamp) -> Result<()> {
        self.with_stores(|stores| {
            let mut visits = stores.main.get_all_visits_in_range(begin, end, 0)?;
            if !restrict_urls.is_empty() {
                let mut url_ids = HashSet::new();
                for url in restrict_urls {
                    if let Some(row) = stores.main.get_row_for_url(url)? {
                        url_ids.insert(row.id);
                    }
                }
                visits.retain(|visit| url_ids.contains(&visit.url_id));
            }
            self.expire_visits_in(stores, &visits)
        })
    }

    /// Removes the visits at exactly these times. `times` must be strictly
    /// descending.
    pub fn expire_history_for_times(&self, times: &[Timestamp]) -> Result<()> {
        let sorted = times_strictly_descending(times);
        debug_assert!(sorted, "visit times must be strictly descending without duplicates");
        if !sorted {
            return Err(HistoryExpiryError::UnsortedTimes);
        }

        self.with_stores(|stores| {
            let visits = stores.main.get_visits_for_times(times)?;
            self.expire_visits_in(stores, &visits)
        })
    }

    pub fn expire_visits(&self, visits: &[VisitRow]) -> Result<()> {
        self.with_stores(|stores| self.expire_visits_in(stores, visits))
    }

    /// Archives or deletes everything up to and including `end_time` in one go.
    pub fn archive_history_before(&self, end_time: Timestamp) -> Result<()> {
        self.with_stores(|stores| {
            info!("Archiving history before {}", end_time);
            self.archive_some_old_history_in(stores, end_time, self.all_visits_reader, usize::MAX)?;
            self.paranoid_expire_history();
            Ok(())
        })
    }

    /// Starts the background archiver. Calling it again restarts the
    /// schedule with a fresh queue. Must be called inside a tokio runtime.
    pub fn start_archiving_old_stuff(self: &Arc<Self>, expiration_threshold: Duration) {
        let readers = vec![self.all_visits_reader, self.auto_subframe_visits_reader];
        let mut work = self.work.lock();
        work.expiration_threshold = expiration_threshold;
        work.queue.reset(readers);
        if let Some(task) = work.task.take() {
            task.abort();
        }
        work.generation = work.generation.wrapping_add(1);
        let generation = work.generation;
        let delay = work.queue.next_delay(&self.config);
        info!(
            "Archiving history older than {} days, first batch in {:?}",
            expiration_threshold.as_secs() / (24 * 60 * 60),
            delay
        );
        work.task = Some(spawn_archive_task(Arc::downgrade(self), generation, delay));
    }

    /// Cancels the background archiver and drops any queued work. A batch
    /// already running finishes but does not touch the queue afterwards.
    pub fn stop_archiving(&self) {
        let mut work = self.work.lock();
        work.generation = work.generation.wrapping_add(1);
        if let Some(task) = work.task.take() {
            task.abort();
            info!("Stopped archiving old history");
        }
        work.queue.clear();
    }

    pub fn is_archiving(&self) -> bool {
        self.work.lock().task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Everything strictly before this is due for archiving.
    pub fn current_archive_time(&self) -> Timestamp {
        Timestamp::now() - self.work.lock().expiration_threshold
    }

    /// Readers still owed a batch in the current round.
    pub fn queued_readers(&self) -> Vec<VisitReader> {
        self.work.lock().queue.pending()
    }

    /// Delay until the next background batch, or `None` once the schedule
    /// that owns `generation` has been stopped or replaced.
    pub(crate) fn schedule_archive(&self, generation: u64) -> Option<Duration> {
        let mut work = self.work.lock();
        if work.generation != generation {
            return None;
        }
        Some(work.queue.next_delay(&self.config))
    }

    /// Runs one batch for the reader at the head of the queue.
    pub(crate) fn do_archive_iteration(&self, generation: u64) -> Result<()> {
        let reader = {
            let mut work = self.work.lock();
            if work.generation != generation {
                debug!("Archive schedule was replaced, skipping batch");
                return Ok(());
            }
            match work.queue.pop() {
                Some(reader) => reader,
                None => {
                    warn!("Archive iteration with an empty work queue");
                    return Ok(());
                }
            }
        };

        let result = self.archive_some_old_history(self.current_archive_time(), reader, self.config.batch_size);
        self.metrics.archive_iterations.inc();

        // A failed batch is retried on the next tick.
        let requeue = result.as_ref().map_or(true, |more| *more);
        if requeue {
            let mut work = self.work.lock();
            if work.generation == generation {
                work.queue.requeue(reader);
            }
        }
        let more = result?;
        debug!("Archive batch for {} done, more={}", reader, more);
        Ok(())
    }

    /// Handles one batch of at most `max_visits` visits at or before
    /// `end_time`. Returns true if the reader had more.
    pub fn archive_some_old_history(&self, end_time: Timestamp, reader: VisitReader, max_visits: usize) -> Result<bool> {
        self.with_stores(|stores| self.archive_some_old_history_in(stores, end_time, reader, max_visits))
    }

    fn archive_some_old_history_in(
        &self,
        stores: &Stores<'_>,
        end_time: Timestamp,
        reader: VisitReader,
        max_visits: usize,
    ) -> Result<bool> {
        // Readers take an exclusive end.
        let effective_end_time = end_time.next_unit();
        let ExpiringVisits { visits, more } = reader.read(effective_end_time, stores.main, max_visits)?;

        let (archived_visits, mut deleted_visits): (Vec<VisitRow>, Vec<VisitRow>) =
            visits.into_iter().partition(|visit| should_archive(visit));

        self.archive_urls_and_visits(stores, &archived_visits)?;

        deleted_visits.extend(archived_visits);
        let mut effects = DeleteEffects::new();
        self.delete_visit_related_info(stores, &deleted_visits, &mut effects)?;
        self.expire_urls_for_visits(stores, &deleted_visits, &mut effects)?;
        self.delete_favicons_if_possible(stores, &mut effects)?;
        self.broadcast_notifications(effects, DeletionType::Archived);

        Ok(more)
    }

    fn expire_visits_in(&self, stores: &Stores<'_>, visits: &[VisitRow]) -> Result<()> {
        if visits.is_empty() {
            return Ok(());
        }

        let mut effects = DeleteEffects::new();
        self.delete_visit_related_info(stores, visits, &mut effects)?;
        self.expire_urls_for_visits(stores, visits, &mut effects)?;
        self.delete_favicons_if_possible(stores, &mut effects)?;
        self.broadcast_notifications(effects, DeletionType::UserInitiated);

        self.paranoid_expire_history();
        Ok(())
    }

    /// Deletes the visits and remembers the URL row behind each of them.
    fn delete_visit_related_info(&self, stores: &Stores<'_>, visits: &[VisitRow], effects: &mut DeleteEffects) -> Result<()> {
        for visit in visits {
            stores.main.delete_visit(visit)?;

            if !effects.affected_urls.contains_key(&visit.url_id) {
                if let Some(row) = stores.main.get_url_row(visit.url_id)? {
                    effects.record_affected_url(row);
                }
            }
        }
        self.metrics.visits_deleted.inc_by(visits.len() as u64);
        Ok(())
    }

    /// Drops a URL's segment and, unless it is bookmarked, the row itself
    /// and its icon mappings.
    fn delete_one_url(
        &self,
        stores: &Stores<'_>,
        url_row: &UrlRow,
        is_bookmarked: bool,
        effects: &mut DeleteEffects,
    ) -> Result<()> {
        stores.main.delete_segment_for_url(url_row.id)?;

        if is_bookmarked {
            debug!("Keeping bookmarked {}", url_row.url);
            return Ok(());
        }

        effects.deleted_urls.push(url_row.clone());

        if let Some(thumbnail) = stores.thumbnail {
            let mappings = thumbnail.get_icon_mappings_for_page_url(&url_row.url)?;
            if !mappings.is_empty() {
                effects.affected_favicons.extend(mappings.iter().map(|m| m.icon_id));
                thumbnail.delete_icon_mappings(&url_row.url)?;
            }
        }

        stores.main.delete_url_row(url_row.id)?;
        Ok(())
    }

    /// Fixes up the URL rows behind deleted visits: rows with no visits left
    /// go away, the rest get their counters reduced.
    fn expire_urls_for_visits(&self, stores: &Stores<'_>, visits: &[VisitRow], effects: &mut DeleteEffects) -> Result<()> {
        let mut changed: BTreeMap<UrlId, ChangedCounts> = BTreeMap::new();
        for visit in visits {
            let counts = changed.entry(visit.url_id).or_default();
            let core = visit.transition.core();
            if core != CoreTransition::Reload {
                counts.visit_count = counts.visit_count.saturating_add(1);
            }
            if (core == CoreTransition::Typed && !visit.transition.is_redirect())
                || core == CoreTransition::KeywordGenerated
            {
                counts.typed_count = counts.typed_count.saturating_add(1);
            }
        }

        for (url_id, counts) in changed {
            let Some(mut url_row) = effects.affected_urls.get(&url_id).cloned() else {
                continue;
            };

            url_row.last_visit = stores
                .main
                .get_most_recent_visit_for_url(url_id)?
                .map(|visit| visit.visit_time)
                .unwrap_or_default();

            let is_bookmarked = self.is_bookmarked(&url_row.url);
            if !is_bookmarked && url_row.last_visit.is_null() {
                self.delete_one_url(stores, &url_row, false, effects)?;
            } else {
                // Counters may already be off, never drive them below zero.
                url_row.visit_count = url_row.visit_count.saturating_sub(counts.visit_count).max(0);
                url_row.typed_count = url_row.typed_count.saturating_sub(counts.typed_count).max(0);
                stores.main.update_url_row(&url_row)?;
                effects.modified_urls.push(url_row.clone());
            }

            effects.affected_urls.insert(url_id, url_row);
        }
        Ok(())
    }

    /// Copies the URLs and visits into the archive store. Archive write
    /// failures are logged and skipped; the visits still leave the main store.
    fn archive_urls_and_visits(&self, stores: &Stores<'_>, visits: &[VisitRow]) -> Result<()> {
        let Some(archived) = stores.archived else {
            return Ok(());
        };

        let mut main_id_to_archived_id: HashMap<UrlId, UrlId> = HashMap::new();
        for visit in visits {
            if main_id_to_archived_id.contains_key(&visit.url_id) {
                continue;
            }
            let Some(url_row) = stores.main.get_url_row(visit.url_id)? else {
                continue;
            };
            match archive_one_url(archived, &url_row) {
                Ok(archived_id) => {
                    main_id_to_archived_id.insert(url_row.id, archived_id);
                }
                Err(e) => {
                    warn!("Failed to archive {}: {}", url_row.url, e);
                    self.metrics.archive_failures.inc();
                }
            }
        }

        let sources = stores.main.get_visits_source(visits)?;
        for visit in visits {
            let Some(&archived_url_id) = main_id_to_archived_id.get(&visit.url_id) else {
                continue;
            };

            let mut archived_visit = visit.clone();
            archived_visit.url_id = archived_url_id;
            // The referrer id means nothing in the archive's id space.
            archived_visit.referring_visit = 0;
            let source = sources.get(&visit.visit_id).copied().unwrap_or(VisitSource::Browsed);

            match archived.add_visit(&archived_visit, source) {
                Ok(_) => self.metrics.visits_archived.inc(),
                Err(e) => {
                    warn!("Failed to archive visit {}: {}", visit.visit_id, e);
                    self.metrics.archive_failures.inc();
                }
            }
        }
        Ok(())
    }

    /// Purges favicons that no page maps to anymore.
    fn delete_favicons_if_possible(&self, stores: &Stores<'_>, effects: &mut DeleteEffects) -> Result<()> {
        let Some(thumbnail) = stores.thumbnail else {
            return Ok(());
        };

        for &icon_id in &effects.affected_favicons {
            if thumbnail.has_mapping_for(icon_id)? {
                continue;
            }
            if let Some((icon_url, _)) = thumbnail.get_favicon_header(icon_id)? {
                if thumbnail.delete_favicon(icon_id)? {
                    effects.deleted_favicons.insert(icon_url);
                }
            }
        }
        Ok(())
    }

    /// Flushes the ledger: at most one modified and one deleted notification,
    /// each preceded by its sync hook.
    fn broadcast_notifications(&self, effects: DeleteEffects, deletion_type: DeletionType) {
        if effects.is_quiet() {
            debug!("No URL changes to announce");
            return;
        }
        let archived = deletion_type == DeletionType::Archived;
        let DeleteEffects {
            modified_urls,
            deleted_urls,
            deleted_favicons,
            ..
        } = effects;

        if !modified_urls.is_empty() {
            self.metrics.urls_modified.inc_by(modified_urls.len() as u64);
            self.delegate.notify_sync_urls_modified(&modified_urls);
            self.delegate
                .broadcast_notifications(HistoryNotification::UrlsModified(UrlsModifiedDetails {
                    changed_urls: modified_urls,
                }));
        }

        if !deleted_urls.is_empty() {
            self.metrics.urls_deleted.inc_by(deleted_urls.len() as u64);
            self.metrics.favicons_deleted.inc_by(deleted_favicons.len() as u64);
            self.delegate.notify_sync_urls_deleted(false, archived, &deleted_urls);
            self.delegate
                .broadcast_notifications(HistoryNotification::UrlsDeleted(UrlsDeletedDetails {
                    all_history: false,
                    archived,
                    rows: deleted_urls,
                    favicon_urls: deleted_favicons,
                }));
        }
    }

    /// Hook for a future consistency sweep over the stores. Does nothing yet.
    fn paranoid_expire_history(&self) {}

    fn with_stores<T: Default>(&self, op: impl FnOnce(&Stores<'_>) -> Result<T>) -> Result<T> {
        let databases = self.databases.read().clone();
        let Some(main) = databases.main.as_deref() else {
            debug!("No main history store, skipping expiration");
            return Ok(T::default());
        };
        let stores = Stores {
            main,
            archived: databases.archived.as_deref(),
            thumbnail: databases.thumbnail.as_deref(),
        };
        op(&stores)
    }

    /// Consults the bookmark service, waiting for it to finish loading.
    fn is_bookmarked(&self, url: &Url) -> bool {
        match self.bookmark_service.as_deref() {
            Some(service) => {
                service.block_till_loaded();
                service.is_bookmarked(url)
            }
            None => false,
        }
    }
}

impl Drop for HistoryExpiryManager {
    fn drop(&mut self) {
        if let Some(task) = self.work.get_mut().task.take() {
            task.abort();
        }
    }
}

/// Copies a URL row into the archive, or refreshes the existing copy's
/// last visit. Returns the archive-side id.
fn archive_one_url(archived: &dyn ArchivedDatabase, url_row: &UrlRow) -> Result<UrlId> {
    if let Some(mut archived_row) = archived.get_row_for_url(&url_row.url)? {
        archived_row.last_visit = url_row.last_visit;
        archived.update_url_row(&archived_row)?;
        return Ok(archived_row.id);
    }
    Ok(archived.add_url(url_row)?)
}

pub fn times_strictly_descending(times: &[Timestamp]) -> bool {
    times.windows(2).all(|pair| pair[0] > pair[1])
}
