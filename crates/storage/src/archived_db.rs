use history_types::{Url, UrlId, UrlRow, VisitId, VisitRow, VisitSource};
use std::collections::HashMap;
use std::sync::Arc;

use crate::{Database, HistoryDatabase, HistoryStore, Result};

/// Row-level API of the archived history store
pub trait ArchivedDatabase: Send + Sync {
    fn get_row_for_url(&self, url: &Url) -> Result<Option<UrlRow>>;
    fn add_url(&self, row: &UrlRow) -> Result<UrlId>;
    fn update_url_row(&self, row: &UrlRow) -> Result<()>;
    /// Stores a copy of `visit` under a fresh id in the archive.
    fn add_visit(&self, visit: &VisitRow, source: VisitSource) -> Result<VisitId>;
    fn get_visits_for_url(&self, url_id: UrlId) -> Result<Vec<VisitRow>>;
    fn get_visits_source(&self, visits: &[VisitRow]) -> Result<HashMap<VisitId, VisitSource>>;
}

/// The archive shares the main store's URL and visit tables, in its own key space
pub struct ArchivedStore<D: Database> {
    tables: HistoryStore<D>,
}

impl<D: Database> ArchivedStore<D> {
    pub fn new(db: Arc<D>) -> Self {
        Self {
            tables: HistoryStore::new(db),
        }
    }

    pub fn url_count(&self) -> Result<usize> {
        self.tables.url_count()
    }

    pub fn visit_count(&self) -> Result<usize> {
        self.tables.visit_count()
    }
}

impl<D: Database> ArchivedDatabase for ArchivedStore<D> {
    fn get_row_for_url(&self, url: &Url) -> Result<Option<UrlRow>> {
        self.tables.get_row_for_url(url)
    }

    fn add_url(&self, row: &UrlRow) -> Result<UrlId> {
        self.tables.add_url(row)
    }

    fn update_url_row(&self, row: &UrlRow) -> Result<()> {
        self.tables.update_url_row(row)
    }

    fn add_visit(&self, visit: &VisitRow, source: VisitSource) -> Result<VisitId> {
        self.tables.add_visit(visit, source)
    }

    fn get_visits_for_url(&self, url_id: UrlId) -> Result<Vec<VisitRow>> {
        self.tables.get_visits_for_url(url_id)
    }

    fn get_visits_source(&self, visits: &[VisitRow]) -> Result<HashMap<VisitId, VisitSource>> {
        self.tables.get_visits_source(visits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryDatabase;
    use history_types::{CoreTransition, Timestamp};

    #[test]
    fn test_archive_assigns_its_own_ids() {
        let archive = ArchivedStore::new(Arc::new(MemoryDatabase::new()));
        let mut row = UrlRow::new(Url::parse("https://a.com/").unwrap());
        row.id = 99;
        let id = archive.add_url(&row).unwrap();
        assert_ne!(id, 99);

        let mut visit = VisitRow::new(id, Timestamp::from_micros(3), 0, CoreTransition::Typed.into());
        visit.visit_id = 500;
        let visit_id = archive.add_visit(&visit, VisitSource::Firefox).unwrap();
        let stored = archive.get_visits_for_url(id).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].visit_id, visit_id);
        assert_eq!(
            archive.get_visits_source(&stored).unwrap().get(&visit_id),
            Some(&VisitSource::Firefox)
        );
        assert_eq!(archive.url_count().unwrap(), 1);
        assert_eq!(archive.visit_count().unwrap(), 1);
    }
}
