use prometheus::{IntCounter, Registry};
use serde::Serialize;

use crate::Result;

/// Counters for everything the expirer removes or archives
pub struct ExpiryMetrics {
    pub visits_deleted: IntCounter,
    pub visits_archived: IntCounter,
    pub archive_failures: IntCounter,
    pub urls_deleted: IntCounter,
    pub urls_modified: IntCounter,
    pub favicons_deleted: IntCounter,
    pub archive_iterations: IntCounter,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExpiryStats {
    pub visits_deleted: u64,
    pub visits_archived: u64,
    pub archive_failures: u64,
    pub urls_deleted: u64,
    pub urls_modified: u64,
    pub favicons_deleted: u64,
    pub archive_iterations: u64,
}

impl ExpiryMetrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        let visits_deleted = IntCounter::new("history_expiry_visits_deleted_total", "Visits removed from the main store")?;
        let visits_archived = IntCounter::new("history_expiry_visits_archived_total", "Visits copied into the archive")?;
        let archive_failures = IntCounter::new(
            "history_expiry_archive_failures_total",
            "Visits or URLs the archive refused",
        )?;
        let urls_deleted = IntCounter::new("history_expiry_urls_deleted_total", "URL rows removed from the main store")?;
        let urls_modified = IntCounter::new("history_expiry_urls_modified_total", "URL rows whose counters were updated")?;
        let favicons_deleted = IntCounter::new("history_expiry_favicons_deleted_total", "Orphaned favicons purged")?;
        let archive_iterations = IntCounter::new(
            "history_expiry_archive_iterations_total",
            "Background archive batches processed",
        )?;

        registry.register(Box::new(visits_deleted.clone()))?;
        registry.register(Box::new(visits_archived.clone()))?;
        registry.register(Box::new(archive_failures.clone()))?;
        registry.register(Box::new(urls_deleted.clone()))?;
        registry.register(Box::new(urls_modified.clone()))?;
        registry.register(Box::new(favicons_deleted.clone()))?;
        registry.register(Box::new(archive_iterations.clone()))?;

        Ok(Self {
            visits_deleted,
            visits_archived,
            archive_failures,
            urls_deleted,
            urls_modified,
            favicons_deleted,
            archive_iterations,
        })
    }

    pub fn stats(&self) -> ExpiryStats {
        ExpiryStats {
            visits_deleted: self.visits_deleted.get(),
            visits_archived: self.visits_archived.get(),
            archive_failures: self.archive_failures.get(),
            urls_deleted: self.urls_deleted.get(),
            urls_modified: self.urls_modified.get(),
            favicons_deleted: self.favicons_deleted.get(),
            archive_iterations: self.archive_iterations.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_show_up_in_stats() {
        let registry = Registry::new();
        let metrics = ExpiryMetrics::new(&registry).unwrap();
        metrics.visits_deleted.inc_by(3);
        metrics.favicons_deleted.inc();

        let stats = metrics.stats();
        assert_eq!(stats.visits_deleted, 3);
        assert_eq!(stats.favicons_deleted, 1);
        assert_eq!(stats.urls_deleted, 0);
        assert_eq!(registry.gather().len(), 7);
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        ExpiryMetrics::new(&registry).unwrap();
        assert!(ExpiryMetrics::new(&registry).is_err());
    }
}
