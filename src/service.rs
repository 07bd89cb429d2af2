use anyhow::{Context, Result};
use history_expiry::{
    ExpireDatabases, ExpiryMetrics, ExpiryStats, HistoryExpiryManager, HistoryNotification, MemoryBookmarkService,
    NotificationBus,
};
use history_storage::{
    ArchivedDatabase, ArchivedStore, Database, HistoryDatabase, HistoryStore, MemoryDatabase, ThumbnailDatabase,
    ThumbnailStore,
};
use history_types::Timestamp;
use prometheus::{Encoder, Registry, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use crate::config::{days_to_duration, Config};

/// Row counts and counters for `inspect`
#[derive(Debug, Clone, Serialize)]
pub struct HistoryReport {
    pub urls: usize,
    pub visits: usize,
    pub archived_urls: Option<usize>,
    pub archived_visits: Option<usize>,
    pub favicons: Option<usize>,
    pub early_expiration_threshold: String,
    pub archiving: bool,
    pub stats: ExpiryStats,
}

/// Owns the stores and the expiry manager wired to them
pub struct HistoryService<D: Database> {
    config: Config,
    registry: Registry,
    notifications: Arc<NotificationBus>,
    bookmarks: Arc<MemoryBookmarkService>,
    main: Arc<HistoryStore<D>>,
    archived: Option<Arc<ArchivedStore<D>>>,
    thumbnail: Option<Arc<ThumbnailStore<D>>>,
    manager: Arc<HistoryExpiryManager>,
}

impl HistoryService<MemoryDatabase> {
    /// Fresh in-memory stores; nothing survives the process.
    pub fn in_memory(config: Config) -> Result<Self> {
        let archived = config.storage.archive.then(|| Arc::new(MemoryDatabase::new()));
        let thumbnail = config.storage.favicons.then(|| Arc::new(MemoryDatabase::new()));
        Self::with_databases(config, Arc::new(MemoryDatabase::new()), archived, thumbnail)
    }
}

#[cfg(feature = "rocksdb")]
impl HistoryService<history_storage::RocksDatabase> {
    /// Opens (or creates) the stores under the configured data directory.
    pub fn open(config: Config) -> Result<Self> {
        use history_storage::RocksDatabase;

        let datadir = config.storage.datadir.clone();
        std::fs::create_dir_all(&datadir).context("Failed to create data directory")?;
        info!("Opening history stores in {}", datadir.display());

        let main = Arc::new(RocksDatabase::open(datadir.join("history")).context("Failed to open history store")?);
        let archived = if config.storage.archive {
            let db = RocksDatabase::open(datadir.join("archived-history")).context("Failed to open archive store")?;
            Some(Arc::new(db))
        } else {
            None
        };
        let thumbnail = if config.storage.favicons {
            let db = RocksDatabase::open(datadir.join("favicons")).context("Failed to open favicon store")?;
            Some(Arc::new(db))
        } else {
            None
        };

        Self::with_databases(config, main, archived, thumbnail)
    }
}

impl<D: Database + 'static> HistoryService<D> {
    pub fn with_databases(
        config: Config,
        main: Arc<D>,
        archived: Option<Arc<D>>,
        thumbnail: Option<Arc<D>>,
    ) -> Result<Self> {
        config.validate()?;

        let registry = Registry::new();
        let metrics = Arc::new(ExpiryMetrics::new(&registry).context("Failed to register expiry metrics")?);
        let notifications = Arc::new(NotificationBus::default());
        let bookmarks = Arc::new(MemoryBookmarkService::with_urls(config.bookmarks.urls.iter().cloned()));

        let main = Arc::new(HistoryStore::new(main));
        let archived = archived.map(|db| Arc::new(ArchivedStore::new(db)));
        let thumbnail = thumbnail.map(|db| Arc::new(ThumbnailStore::new(db)));

        let manager = Arc::new(HistoryExpiryManager::new(
            config.expiry.to_expiry_config()?,
            notifications.clone(),
            Some(bookmarks.clone()),
            metrics,
        ));
        manager.set_databases(ExpireDatabases {
            main: Some(main.clone() as Arc<dyn HistoryDatabase>),
            archived: archived.clone().map(|db| db as Arc<dyn ArchivedDatabase>),
            thumbnail: thumbnail.clone().map(|db| db as Arc<dyn ThumbnailDatabase>),
        });

        Ok(Self {
            config,
            registry,
            notifications,
            bookmarks,
            main,
            archived,
            thumbnail,
            manager,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn manager(&self) -> &Arc<HistoryExpiryManager> {
        &self.manager
    }

    pub fn history(&self) -> &Arc<HistoryStore<D>> {
        &self.main
    }

    pub fn archived(&self) -> Option<&Arc<ArchivedStore<D>>> {
        self.archived.as_ref()
    }

    pub fn thumbnails(&self) -> Option<&Arc<ThumbnailStore<D>>> {
        self.thumbnail.as_ref()
    }

    pub fn bookmarks(&self) -> &Arc<MemoryBookmarkService> {
        &self.bookmarks
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HistoryNotification> {
        self.notifications.subscribe()
    }

    /// Starts background archiving if enabled. Needs a tokio runtime.
    pub fn start(&self) {
        if !self.config.expiry.auto_archive {
            info!("Background archiving is disabled");
            return;
        }
        self.manager
            .start_archiving_old_stuff(self.manager.config().expiration_threshold);
    }

    pub fn stop(&self) {
        self.manager.stop_archiving();
    }

    /// Archives everything older than `days` days right away.
    pub fn archive_older_than(&self, days: u64) -> Result<Timestamp> {
        let end_time = Timestamp::now() - days_to_duration(days)?;
        self.manager
            .archive_history_before(end_time)
            .context("Failed to archive history")?;
        Ok(end_time)
    }

    pub fn inspect(&self) -> Result<HistoryReport> {
        let early_expiration_threshold = self.main.get_early_expiration_threshold()?;
        Ok(HistoryReport {
            urls: self.main.url_count()?,
            visits: self.main.visit_count()?,
            archived_urls: self.archived.as_ref().map(|a| a.url_count()).transpose()?,
            archived_visits: self.archived.as_ref().map(|a| a.visit_count()).transpose()?,
            favicons: self.thumbnail.as_ref().map(|t| t.favicon_count()).transpose()?,
            early_expiration_threshold: early_expiration_threshold.to_string(),
            archiving: self.manager.is_archiving(),
            stats: self.manager.stats(),
        })
    }

    /// Prometheus text exposition of the expiry counters
    pub fn metrics_text(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .context("Failed to encode metrics")?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageBackend;
    use history_types::{CoreTransition, Url, UrlRow, VisitRow, VisitSource};

    fn memory_config() -> Config {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::Memory;
        config
    }

    #[test]
    fn test_service_wiring() {
        let service = HistoryService::in_memory(memory_config()).unwrap();
        let url = Url::parse("https://example.com/").unwrap();
        let url_id = service.history().add_url(&UrlRow::new(url.clone()).with_counts(1, 1)).unwrap();
        service
            .history()
            .add_visit(
                &VisitRow::new(url_id, Timestamp::from_micros(1_000), 0, CoreTransition::Typed.into()),
                VisitSource::Browsed,
            )
            .unwrap();

        let mut notifications = service.subscribe();
        service.archive_older_than(1).unwrap();

        let report = service.inspect().unwrap();
        assert_eq!(report.urls, 0);
        assert_eq!(report.visits, 0);
        assert_eq!(report.archived_urls, Some(1));
        assert_eq!(report.archived_visits, Some(1));
        assert_eq!(report.stats.visits_archived, 1);
        assert!(matches!(notifications.try_recv(), Ok(HistoryNotification::UrlsDeleted(_))));

        let text = service.metrics_text().unwrap();
        assert!(text.contains("history_expiry_visits_archived_total 1"));
    }

    #[test]
    fn test_archive_with_oversized_day_count_fails() {
        let service = HistoryService::in_memory(memory_config()).unwrap();
        assert!(service.archive_older_than(u64::MAX / 1000).is_err());
        assert!(service.archive_older_than(u64::MAX).is_err());
        assert_eq!(service.inspect().unwrap().stats.archive_iterations, 0);
    }

    #[test]
    fn test_oversized_threshold_is_rejected() {
        let mut config = memory_config();
        config.expiry.threshold_days = u64::MAX / 1000;
        assert!(HistoryService::in_memory(config).is_err());
    }

    #[test]
    fn test_optional_stores() {
        let mut config = memory_config();
        config.storage.archive = false;
        config.storage.favicons = false;
        let service = HistoryService::in_memory(config).unwrap();
        let report = service.inspect().unwrap();
        assert!(report.archived_urls.is_none());
        assert!(report.favicons.is_none());
        assert!(service.manager().databases().archived.is_none());
    }

    #[test]
    fn test_configured_bookmarks_are_loaded() {
        let mut config = memory_config();
        let url = Url::parse("https://kept.com/").unwrap();
        config.bookmarks.urls = vec![url.clone()];
        let service = HistoryService::in_memory(config).unwrap();
        assert!(service.bookmarks().is_loaded());
        assert!(history_expiry::BookmarkService::is_bookmarked(service.bookmarks().as_ref(), &url));
    }

    #[tokio::test]
    async fn test_start_respects_auto_archive() {
        let mut config = memory_config();
        config.expiry.auto_archive = false;
        let service = HistoryService::in_memory(config).unwrap();
        service.start();
        assert!(!service.manager().is_archiving());

        let service = HistoryService::in_memory(memory_config()).unwrap();
        service.start();
        assert!(service.manager().is_archiving());
        service.stop();
        assert!(!service.manager().is_archiving());
    }
}
