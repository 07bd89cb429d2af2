use history_types::{FaviconId, Url, UrlId, UrlRow};
use std::collections::{BTreeMap, BTreeSet};

/// Side effects gathered while deleting one batch of visits or URLs.
///
/// Nothing here is announced until the batch is done; the ledger is then
/// handed to `broadcast_notifications` and discarded.
#[derive(Debug, Clone, Default)]
pub struct DeleteEffects {
    /// Every URL touched by a deleted visit, keyed by id.
    pub affected_urls: BTreeMap<UrlId, UrlRow>,
    /// URLs that survived with updated counters.
    pub modified_urls: Vec<UrlRow>,
    /// URLs removed from the main store.
    pub deleted_urls: Vec<UrlRow>,
    /// Favicons referenced by deleted URLs; purged if nothing else uses them.
    pub affected_favicons: BTreeSet<FaviconId>,
    /// Icon URLs of favicons that were actually purged.
    pub deleted_favicons: BTreeSet<Url>,
}

impl DeleteEffects {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remembers the row the first time a URL is seen in this batch.
    pub fn record_affected_url(&mut self, row: UrlRow) {
        self.affected_urls.entry(row.id).or_insert(row);
    }

    /// True when there is nothing to broadcast.
    pub fn is_quiet(&self) -> bool {
        self.modified_urls.is_empty() && self.deleted_urls.is_empty()
    }
}
