pub mod archive_policy;
pub mod bookmarks;
pub mod effects;
pub mod expiry_manager;
pub mod metrics;
pub mod notifications;
pub mod readers;
pub mod scheduler;

pub use archive_policy::{should_archive, should_archive_transition};
pub use bookmarks::{BookmarkService, MemoryBookmarkService};
pub use effects::DeleteEffects;
pub use expiry_manager::{ExpireDatabases, ExpiryConfig, HistoryExpiryManager};
pub use metrics::{ExpiryMetrics, ExpiryStats};
pub use notifications::{
    BroadcastNotificationDelegate, DeletionType, HistoryNotification, NotificationBus, UrlsDeletedDetails,
    UrlsModifiedDetails,
};
pub use readers::{ExpiringVisits, VisitReader, EARLY_EXPIRATION_ADVANCE};
pub use scheduler::WorkQueue;

use history_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HistoryExpiryError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Visit times must be strictly descending without duplicates")]
    UnsortedTimes,

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

pub type Result<T> = std::result::Result<T, HistoryExpiryError>;
