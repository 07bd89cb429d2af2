use history_types::{
    CoreTransition, SegmentId, Timestamp, Url, UrlId, UrlRow, VisitId, VisitRow, VisitSource,
};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

use crate::traits::{decode, encode};
use crate::{keys, Database, KeyPrefix, Result, StorageError, TypedDatabase};

const NEXT_URL_ID: &str = "next_url_id";
const NEXT_VISIT_ID: &str = "next_visit_id";
const NEXT_SEGMENT_ID: &str = "next_segment_id";
const EARLY_EXPIRATION_THRESHOLD: &str = "early_expiration_threshold";

/// Row-level API of the main history store.
///
/// Range queries treat `begin` as inclusive and `end` as exclusive; a null
/// `end` means unbounded. A `max` of zero means no limit. Results are ordered
/// by visit time, oldest first.
pub trait HistoryDatabase: Send + Sync {
    fn add_url(&self, row: &UrlRow) -> Result<UrlId>;
    fn get_url_row(&self, id: UrlId) -> Result<Option<UrlRow>>;
    fn get_row_for_url(&self, url: &Url) -> Result<Option<UrlRow>>;
    fn update_url_row(&self, row: &UrlRow) -> Result<()>;
    fn delete_url_row(&self, id: UrlId) -> Result<()>;

    /// Stores a copy of `visit` under a freshly allocated id and returns it.
    fn add_visit(&self, visit: &VisitRow, source: VisitSource) -> Result<VisitId>;
    fn delete_visit(&self, visit: &VisitRow) -> Result<()>;
    fn get_visits_for_url(&self, url_id: UrlId) -> Result<Vec<VisitRow>>;
    fn get_all_visits_in_range(&self, begin: Timestamp, end: Timestamp, max: usize) -> Result<Vec<VisitRow>>;
    fn get_visits_in_range_for_transition(
        &self,
        begin: Timestamp,
        end: Timestamp,
        max: usize,
        transition: CoreTransition,
    ) -> Result<Vec<VisitRow>>;
    fn get_visits_for_times(&self, times: &[Timestamp]) -> Result<Vec<VisitRow>>;
    fn get_most_recent_visit_for_url(&self, url_id: UrlId) -> Result<Option<VisitRow>>;
    /// Sources for the given visits; visits recorded as browsed are omitted.
    fn get_visits_source(&self, visits: &[VisitRow]) -> Result<HashMap<VisitId, VisitSource>>;

    fn set_segment_for_url(&self, url_id: UrlId) -> Result<SegmentId>;
    fn get_segment_for_url(&self, url_id: UrlId) -> Result<Option<SegmentId>>;
    fn delete_segment_for_url(&self, url_id: UrlId) -> Result<()>;

    fn get_early_expiration_threshold(&self) -> Result<Timestamp>;
    fn update_early_expiration_threshold(&self, threshold: Timestamp) -> Result<()>;
}

/// `HistoryDatabase` over any key-value `Database`
pub struct HistoryStore<D: Database> {
    db: Arc<D>,
    id_lock: Mutex<()>,
}

impl<D: Database> HistoryStore<D> {
    pub fn new(db: Arc<D>) -> Self {
        Self {
            db,
            id_lock: Mutex::new(()),
        }
    }

    pub fn database(&self) -> &Arc<D> {
        &self.db
    }

    fn allocate_id(&self, counter: &str) -> Result<i64> {
        let _guard = self.id_lock.lock();
        let key = keys::meta_key(counter);
        let next: i64 = self.db.get_typed(&key)?.unwrap_or(1);
        self.db.put_typed(&key, &(next + 1))?;
        Ok(next)
    }

    fn load_visit(&self, id: VisitId) -> Result<Option<VisitRow>> {
        self.db.get_typed(&keys::visit_key(id))
    }

    fn scan_visits<F>(&self, begin: Timestamp, end: Timestamp, max: usize, accept: F) -> Result<Vec<VisitRow>>
    where
        F: Fn(&VisitRow) -> bool,
    {
        let end = if end.is_null() { Timestamp::max() } else { end };
        let mut visits = Vec::new();
        if begin >= end {
            return Ok(visits);
        }

        // Visit ids start at 1, so id 0 sorts before every visit at that time.
        let end_key = keys::visit_time_key(end, 0);
        let mut iter = self.db.iter_range(&keys::visit_time_key(begin, 0), Some(&end_key));
        while let Some(entry) = iter.next() {
            let (key, _) = entry?;
            let Some((_, visit_id)) = keys::parse_visit_time_key(&key) else {
                break;
            };
            let visit = self
                .load_visit(visit_id)?
                .ok_or_else(|| StorageError::InvalidData(format!("dangling time index for visit {}", visit_id)))?;
            if accept(&visit) {
                visits.push(visit);
                if max > 0 && visits.len() >= max {
                    break;
                }
            }
        }
        Ok(visits)
    }

    /// Number of URL rows, for inspection.
    pub fn url_count(&self) -> Result<usize> {
        Ok(self.db.scan_prefix(&[KeyPrefix::Url.as_byte()])?.len())
    }

    /// Number of visit rows, for inspection.
    pub fn visit_count(&self) -> Result<usize> {
        Ok(self.db.scan_prefix(&[KeyPrefix::Visit.as_byte()])?.len())
    }

    /// Every URL row, ordered by id.
    pub fn all_urls(&self) -> Result<Vec<UrlRow>> {
        self.db
            .scan_prefix(&[KeyPrefix::Url.as_byte()])?
            .iter()
            .map(|(_, value)| decode(value))
            .collect()
    }
}

impl<D: Database> HistoryDatabase for HistoryStore<D> {
    fn add_url(&self, row: &UrlRow) -> Result<UrlId> {
        let index_key = keys::url_index_key(&row.url);
        if self.db.contains(&index_key)? {
            return Err(StorageError::InvalidData(format!("duplicate url {}", row.url)));
        }

        let id = self.allocate_id(NEXT_URL_ID)?;
        let mut stored = row.clone();
        stored.id = id;

        let mut batch = self.db.batch();
        batch.put(&keys::url_key(id), &encode(&stored)?);
        batch.put(&index_key, &encode(&id)?);
        self.db.write_batch(batch)?;
        Ok(id)
    }

    fn get_url_row(&self, id: UrlId) -> Result<Option<UrlRow>> {
        self.db.get_typed(&keys::url_key(id))
    }

    fn get_row_for_url(&self, url: &Url) -> Result<Option<UrlRow>> {
        match self.db.get_typed::<UrlId>(&keys::url_index_key(url))? {
            Some(id) => self.get_url_row(id),
            None => Ok(None),
        }
    }

    fn update_url_row(&self, row: &UrlRow) -> Result<()> {
        let existing = self.get_url_row(row.id)?.ok_or(StorageError::KeyNotFound)?;

        let mut batch = self.db.batch();
        if existing.url != row.url {
            batch.delete(&keys::url_index_key(&existing.url));
            batch.put(&keys::url_index_key(&row.url), &encode(&row.id)?);
        }
        batch.put(&keys::url_key(row.id), &encode(row)?);
        self.db.write_batch(batch)
    }

    fn delete_url_row(&self, id: UrlId) -> Result<()> {
        let Some(existing) = self.get_url_row(id)? else {
            return Ok(());
        };
        let mut batch = self.db.batch();
        batch.delete(&keys::url_key(id));
        batch.delete(&keys::url_index_key(&existing.url));
        self.db.write_batch(batch)
    }

    fn add_visit(&self, visit: &VisitRow, source: VisitSource) -> Result<VisitId> {
        let id = self.allocate_id(NEXT_VISIT_ID)?;
        let mut stored = visit.clone();
        stored.visit_id = id;

        let mut batch = self.db.batch();
        batch.put(&keys::visit_key(id), &encode(&stored)?);
        batch.put(&keys::visit_time_key(stored.visit_time, id), &[]);
        batch.put(&keys::url_visits_key(stored.url_id, id), &[]);
        if source != VisitSource::Browsed {
            batch.put(&keys::visit_source_key(id), &[source.as_byte()]);
        }
        self.db.write_batch(batch)?;
        Ok(id)
    }

    fn delete_visit(&self, visit: &VisitRow) -> Result<()> {
        // Index keys come from the stored copy, the caller's row may be stale.
        let Some(stored) = self.load_visit(visit.visit_id)? else {
            debug!("Visit {} already gone", visit.visit_id);
            return Ok(());
        };
        let mut batch = self.db.batch();
        batch.delete(&keys::visit_key(stored.visit_id));
        batch.delete(&keys::visit_time_key(stored.visit_time, stored.visit_id));
        batch.delete(&keys::url_visits_key(stored.url_id, stored.visit_id));
        batch.delete(&keys::visit_source_key(stored.visit_id));
        self.db.write_batch(batch)
    }

    fn get_visits_for_url(&self, url_id: UrlId) -> Result<Vec<VisitRow>> {
        let prefix = keys::url_visits_prefix(url_id);
        let mut visits = Vec::new();
        for (key, _) in self.db.scan_prefix(&prefix)? {
            let mut id = [0u8; 8];
            id.copy_from_slice(&key[prefix.len()..]);
            if let Some(visit) = self.load_visit(VisitId::from_be_bytes(id))? {
                visits.push(visit);
            }
        }
        visits.sort_by_key(|v| (v.visit_time, v.visit_id));
        Ok(visits)
    }

    fn get_all_visits_in_range(&self, begin: Timestamp, end: Timestamp, max: usize) -> Result<Vec<VisitRow>> {
        self.scan_visits(begin, end, max, |_| true)
    }

    fn get_visits_in_range_for_transition(
        &self,
        begin: Timestamp,
        end: Timestamp,
        max: usize,
        transition: CoreTransition,
    ) -> Result<Vec<VisitRow>> {
        self.scan_visits(begin, end, max, |v| v.transition.core() == transition)
    }

    fn get_visits_for_times(&self, times: &[Timestamp]) -> Result<Vec<VisitRow>> {
        let unique: BTreeSet<Timestamp> = times.iter().copied().collect();
        let mut visits = Vec::new();
        for time in unique {
            let prefix = KeyPrefix::VisitTime.make_key(&time.to_sortable_bytes());
            for (key, _) in self.db.scan_prefix(&prefix)? {
                if let Some((_, visit_id)) = keys::parse_visit_time_key(&key) {
                    if let Some(visit) = self.load_visit(visit_id)? {
                        visits.push(visit);
                    }
                }
            }
        }
        Ok(visits)
    }

    fn get_most_recent_visit_for_url(&self, url_id: UrlId) -> Result<Option<VisitRow>> {
        Ok(self
            .get_visits_for_url(url_id)?
            .into_iter()
            .max_by_key(|v| (v.visit_time, v.visit_id)))
    }

    fn get_visits_source(&self, visits: &[VisitRow]) -> Result<HashMap<VisitId, VisitSource>> {
        let mut sources = HashMap::new();
        for visit in visits {
            if let Some(bytes) = self.db.get(&keys::visit_source_key(visit.visit_id))? {
                let byte = *bytes
                    .first()
                    .ok_or_else(|| StorageError::InvalidData("empty visit source".into()))?;
                sources.insert(visit.visit_id, VisitSource::from_byte(byte)?);
            }
        }
        Ok(sources)
    }

    fn set_segment_for_url(&self, url_id: UrlId) -> Result<SegmentId> {
        if let Some(existing) = self.get_segment_for_url(url_id)? {
            return Ok(existing);
        }
        let id = self.allocate_id(NEXT_SEGMENT_ID)?;
        self.db.put_typed(&keys::segment_key(url_id), &id)?;
        Ok(id)
    }

    fn get_segment_for_url(&self, url_id: UrlId) -> Result<Option<SegmentId>> {
        self.db.get_typed(&keys::segment_key(url_id))
    }

    fn delete_segment_for_url(&self, url_id: UrlId) -> Result<()> {
        self.db.delete(&keys::segment_key(url_id))
    }

    fn get_early_expiration_threshold(&self) -> Result<Timestamp> {
        Ok(self
            .db
            .get_typed(&keys::meta_key(EARLY_EXPIRATION_THRESHOLD))?
            .unwrap_or_default())
    }

    fn update_early_expiration_threshold(&self, threshold: Timestamp) -> Result<()> {
        self.db.put_typed(&keys::meta_key(EARLY_EXPIRATION_THRESHOLD), &threshold)
    }
}
