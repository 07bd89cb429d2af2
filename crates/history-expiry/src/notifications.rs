use history_types::{Url, UrlRow};
use serde::Serialize;
use std::collections::BTreeSet;
use tokio::sync::broadcast;
use tracing::trace;

/// Why rows left the main store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeletionType {
    /// Explicit user action; nothing was archived.
    UserInitiated,
    /// Retention pass; surviving visits went to the archive.
    Archived,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UrlsModifiedDetails {
    pub changed_urls: Vec<UrlRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UrlsDeletedDetails {
    /// Always false here; whole-history wipes go through another path.
    pub all_history: bool,
    pub archived: bool,
    pub rows: Vec<UrlRow>,
    pub favicon_urls: BTreeSet<Url>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum HistoryNotification {
    UrlsModified(UrlsModifiedDetails),
    UrlsDeleted(UrlsDeletedDetails),
}

impl HistoryNotification {
    pub fn kind(&self) -> &'static str {
        match self {
            HistoryNotification::UrlsModified(_) => "urls_modified",
            HistoryNotification::UrlsDeleted(_) => "urls_deleted",
        }
    }
}

/// Receives everything the expirer has to announce.
pub trait BroadcastNotificationDelegate: Send + Sync {
    fn broadcast_notifications(&self, notification: HistoryNotification);

    /// Sync hook fired before the matching `UrlsModified` broadcast.
    fn notify_sync_urls_modified(&self, _rows: &[UrlRow]) {}

    /// Sync hook fired before the matching `UrlsDeleted` broadcast.
    fn notify_sync_urls_deleted(&self, _all_history: bool, _archived: bool, _rows: &[UrlRow]) {}
}

/// Fans notifications out to any number of subscribers.
pub struct NotificationBus {
    sender: broadcast::Sender<HistoryNotification>,
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HistoryNotification> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl BroadcastNotificationDelegate for NotificationBus {
    fn broadcast_notifications(&self, notification: HistoryNotification) {
        let kind = notification.kind();
        // No subscribers is not an error.
        if self.sender.send(notification).is_err() {
            trace!("Dropped {} notification, nobody is listening", kind);
        }
    }
}
