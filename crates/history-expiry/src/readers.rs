use history_storage::HistoryDatabase;
use history_types::{CoreTransition, Timestamp, VisitRow};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::Result;

/// How far ahead of the normal retention boundary AUTO_SUBFRAME visits go.
///
/// Subframe visits never show up in the history UI and most of them are ads,
/// yet they can make up the bulk of the visit table. They are only useful
/// while the user is still on the site, so they are expired early.
pub const EARLY_EXPIRATION_ADVANCE: Duration = Duration::from_secs(3 * 24 * 60 * 60);

/// Strategy picking which visits an expiration pass looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitReader {
    /// Every visit from the beginning of time up to the end bound.
    AllVisits,
    /// AUTO_SUBFRAME visits between the persisted early expiration
    /// threshold and `end + advance` (never past now).
    AutoSubframeVisits { advance: Duration },
}

/// One batch pulled by a reader.
#[derive(Debug, Clone, Default)]
pub struct ExpiringVisits {
    pub visits: Vec<VisitRow>,
    /// The batch was full, so more may be waiting.
    pub more: bool,
}

impl VisitReader {
    pub fn auto_subframe() -> Self {
        VisitReader::AutoSubframeVisits {
            advance: EARLY_EXPIRATION_ADVANCE,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            VisitReader::AllVisits => "all_visits",
            VisitReader::AutoSubframeVisits { .. } => "auto_subframe_visits",
        }
    }

    /// Reads at most `max_visits` visits before the exclusive `end_time`.
    pub fn read(&self, end_time: Timestamp, db: &dyn HistoryDatabase, max_visits: usize) -> Result<ExpiringVisits> {
        self.read_at(end_time, db, max_visits, Timestamp::now())
    }

    pub(crate) fn read_at(
        &self,
        end_time: Timestamp,
        db: &dyn HistoryDatabase,
        max_visits: usize,
        now: Timestamp,
    ) -> Result<ExpiringVisits> {
        match *self {
            VisitReader::AllVisits => {
                let visits = db.get_all_visits_in_range(Timestamp::null(), end_time, max_visits)?;
                let more = visits.len() == max_visits;
                Ok(ExpiringVisits { visits, more })
            }
            VisitReader::AutoSubframeVisits { advance } => {
                let begin_time = db.get_early_expiration_threshold()?;
                // The threshold must never be set to a time in the future.
                let early_end_time = std::cmp::min(end_time + advance, now);

                let visits = db.get_visits_in_range_for_transition(
                    begin_time,
                    early_end_time,
                    max_visits,
                    CoreTransition::AutoSubframe,
                )?;
                let more = visits.len() == max_visits;
                if !more && early_end_time > begin_time {
                    debug!("Advancing early expiration threshold to {}", early_end_time);
                    db.update_early_expiration_threshold(early_end_time)?;
                }
                Ok(ExpiringVisits { visits, more })
            }
        }
    }
}

impl fmt::Display for VisitReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use history_storage::{HistoryStore, MemoryDatabase};
    use history_types::{PageTransition, Url, UrlRow, VisitSource};
    use std::sync::Arc;

    const DAY: i64 = 24 * 60 * 60 * 1_000_000;

    fn store_with_visits(visits: &[(i64, CoreTransition)]) -> HistoryStore<MemoryDatabase> {
        let store = HistoryStore::new(Arc::new(MemoryDatabase::new()));
        let url_id = store
            .add_url(&UrlRow::new(Url::parse("https://example.com/").unwrap()))
            .unwrap();
        for &(time, core) in visits {
            let visit = VisitRow::new(url_id, Timestamp::from_micros(time), 0, PageTransition::new(core));
            store.add_visit(&visit, VisitSource::Browsed).unwrap();
        }
        store
    }

    #[test]
    fn test_all_visits_reports_more_only_when_full() {
        let store = store_with_visits(&[
            (1, CoreTransition::Typed),
            (2, CoreTransition::Link),
            (3, CoreTransition::AutoSubframe),
        ]);
        let end = Timestamp::from_micros(10);

        let batch = VisitReader::AllVisits.read(end, &store, 2).unwrap();
        assert_eq!(batch.visits.len(), 2);
        assert!(batch.more);

        let batch = VisitReader::AllVisits.read(end, &store, 3).unwrap();
        assert!(batch.more);

        let batch = VisitReader::AllVisits.read(end, &store, 4).unwrap();
        assert_eq!(batch.visits.len(), 3);
        assert!(!batch.more);
    }

    #[test]
    fn test_all_visits_end_is_exclusive() {
        let store = store_with_visits(&[(5, CoreTransition::Typed)]);
        let batch = VisitReader::AllVisits.read(Timestamp::from_micros(5), &store, 10).unwrap();
        assert!(batch.visits.is_empty());
        let batch = VisitReader::AllVisits
            .read(Timestamp::from_micros(5).next_unit(), &store, 10)
            .unwrap();
        assert_eq!(batch.visits.len(), 1);
    }

    #[test]
    fn test_all_visits_drains_to_no_more() {
        let store = store_with_visits(&[
            (1, CoreTransition::Typed),
            (2, CoreTransition::Typed),
            (3, CoreTransition::Typed),
            (4, CoreTransition::Typed),
        ]);
        let end = Timestamp::from_micros(100);
        let mut rounds = 0;
        loop {
            let batch = VisitReader::AllVisits.read(end, &store, 2).unwrap();
            for visit in &batch.visits {
                store.delete_visit(visit).unwrap();
            }
            rounds += 1;
            if !batch.more {
                break;
            }
        }
        // Two full batches, then an empty one.
        assert_eq!(rounds, 3);
    }

    #[test]
    fn test_auto_subframe_reads_ahead_and_advances_threshold() {
        let end = 10 * DAY;
        let store = store_with_visits(&[
            (end - DAY, CoreTransition::AutoSubframe),
            (end + DAY, CoreTransition::AutoSubframe),
            (end + DAY, CoreTransition::Typed),
            (end + 5 * DAY, CoreTransition::AutoSubframe),
        ]);
        let now = Timestamp::from_micros(100 * DAY);
        let reader = VisitReader::auto_subframe();

        let batch = reader.read_at(Timestamp::from_micros(end), &store, 10, now).unwrap();
        assert_eq!(batch.visits.len(), 2);
        assert!(batch.visits.iter().all(|v| v.transition.core() == CoreTransition::AutoSubframe));
        assert!(!batch.more);
        assert_eq!(store.get_early_expiration_threshold().unwrap().as_micros(), end + 3 * DAY);
    }

    #[test]
    fn test_auto_subframe_keeps_threshold_while_batch_is_full() {
        let store = store_with_visits(&[(1, CoreTransition::AutoSubframe), (2, CoreTransition::AutoSubframe)]);
        let now = Timestamp::from_micros(100 * DAY);
        let reader = VisitReader::auto_subframe();

        let batch = reader.read_at(Timestamp::from_micros(DAY), &store, 2, now).unwrap();
        assert!(batch.more);
        assert!(store.get_early_expiration_threshold().unwrap().is_null());
    }

    #[test]
    fn test_auto_subframe_threshold_never_passes_now() {
        let store = store_with_visits(&[]);
        let now = Timestamp::from_micros(20 * DAY);
        let reader = VisitReader::auto_subframe();

        reader.read_at(Timestamp::from_micros(19 * DAY), &store, 10, now).unwrap();
        assert_eq!(store.get_early_expiration_threshold().unwrap(), now);
    }

    #[test]
    fn test_auto_subframe_threshold_is_monotonic() {
        let store = store_with_visits(&[]);
        let now = Timestamp::from_micros(100 * DAY);
        let reader = VisitReader::auto_subframe();

        let mut last = Timestamp::null();
        for end in [10, 30, 5, 30, 1, 60] {
            reader.read_at(Timestamp::from_micros(end * DAY), &store, 10, now).unwrap();
            let threshold = store.get_early_expiration_threshold().unwrap();
            assert!(threshold >= last);
            last = threshold;
        }
        assert_eq!(last.as_micros(), 63 * DAY);
    }

    #[test]
    fn test_reader_names() {
        assert_eq!(VisitReader::AllVisits.to_string(), "all_visits");
        assert_eq!(VisitReader::auto_subframe().name(), "auto_subframe_visits");
    }
}
