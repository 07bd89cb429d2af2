use history_types::{FaviconId, IconMapping, IconMappingId, IconType, Url};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::traits::{decode, encode};
use crate::{keys, Database, KeyPrefix, Result, StorageError, TypedDatabase};

const NEXT_FAVICON_ID: &str = "next_favicon_id";
const NEXT_ICON_MAPPING_ID: &str = "next_icon_mapping_id";

/// Row-level API of the favicon store
pub trait ThumbnailDatabase: Send + Sync {
    fn add_favicon(&self, icon_url: &Url, icon_type: IconType) -> Result<FaviconId>;
    fn add_icon_mapping(&self, page_url: &Url, icon_id: FaviconId) -> Result<IconMappingId>;
    /// Whether any page still maps to this favicon.
    fn has_mapping_for(&self, icon_id: FaviconId) -> Result<bool>;
    fn get_favicon_header(&self, icon_id: FaviconId) -> Result<Option<(Url, IconType)>>;
    /// Returns false when there was no such favicon.
    fn delete_favicon(&self, icon_id: FaviconId) -> Result<bool>;
    fn get_icon_mappings_for_page_url(&self, page_url: &Url) -> Result<Vec<IconMapping>>;
    /// Returns false when the page had no mappings.
    fn delete_icon_mappings(&self, page_url: &Url) -> Result<bool>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FaviconRecord {
    icon_url: Url,
    icon_type: IconType,
}

/// `ThumbnailDatabase` over any key-value `Database`
pub struct ThumbnailStore<D: Database> {
    db: Arc<D>,
    id_lock: Mutex<()>,
}

impl<D: Database> ThumbnailStore<D> {
    pub fn new(db: Arc<D>) -> Self {
        Self {
            db,
            id_lock: Mutex::new(()),
        }
    }

    fn allocate_id(&self, counter: &str) -> Result<i64> {
        let _guard = self.id_lock.lock();
        let key = keys::meta_key(counter);
        let next: i64 = self.db.get_typed(&key)?.unwrap_or(1);
        self.db.put_typed(&key, &(next + 1))?;
        Ok(next)
    }

    pub fn favicon_count(&self) -> Result<usize> {
        Ok(self.db.scan_prefix(&[KeyPrefix::Favicon.as_byte()])?.len())
    }
}

impl<D: Database> ThumbnailDatabase for ThumbnailStore<D> {
    fn add_favicon(&self, icon_url: &Url, icon_type: IconType) -> Result<FaviconId> {
        let id = self.allocate_id(NEXT_FAVICON_ID)?;
        let record = FaviconRecord {
            icon_url: icon_url.clone(),
            icon_type,
        };
        self.db.put_typed(&keys::favicon_key(id), &record)?;
        Ok(id)
    }

    fn add_icon_mapping(&self, page_url: &Url, icon_id: FaviconId) -> Result<IconMappingId> {
        let record: FaviconRecord = self
            .db
            .get_typed(&keys::favicon_key(icon_id))?
            .ok_or(StorageError::KeyNotFound)?;

        let id = self.allocate_id(NEXT_ICON_MAPPING_ID)?;
        let mapping = IconMapping {
            mapping_id: id,
            page_url: page_url.clone(),
            icon_id,
            icon_url: record.icon_url,
            icon_type: record.icon_type,
        };

        let mut batch = self.db.batch();
        batch.put(&keys::icon_mapping_key(page_url, id), &encode(&mapping)?);
        batch.put(&keys::icon_mapping_by_icon_key(icon_id, id), &encode(&mapping.page_url)?);
        self.db.write_batch(batch)?;
        Ok(id)
    }

    fn has_mapping_for(&self, icon_id: FaviconId) -> Result<bool> {
        Ok(!self.db.scan_prefix(&keys::icon_mapping_by_icon_prefix(icon_id))?.is_empty())
    }

    fn get_favicon_header(&self, icon_id: FaviconId) -> Result<Option<(Url, IconType)>> {
        Ok(self
            .db
            .get_typed::<FaviconRecord>(&keys::favicon_key(icon_id))?
            .map(|r| (r.icon_url, r.icon_type)))
    }

    fn delete_favicon(&self, icon_id: FaviconId) -> Result<bool> {
        let key = keys::favicon_key(icon_id);
        if !self.db.contains(&key)? {
            return Ok(false);
        }
        self.db.delete(&key)?;
        Ok(true)
    }

    fn get_icon_mappings_for_page_url(&self, page_url: &Url) -> Result<Vec<IconMapping>> {
        self.db
            .scan_prefix(&keys::icon_mapping_prefix(page_url))?
            .iter()
            .map(|(_, value)| decode(value))
            .collect()
    }

    fn delete_icon_mappings(&self, page_url: &Url) -> Result<bool> {
        let mappings = self.get_icon_mappings_for_page_url(page_url)?;
        if mappings.is_empty() {
            return Ok(false);
        }
        let mut batch = self.db.batch();
        for mapping in &mappings {
            batch.delete(&keys::icon_mapping_key(page_url, mapping.mapping_id));
            batch.delete(&keys::icon_mapping_by_icon_key(mapping.icon_id, mapping.mapping_id));
        }
        self.db.write_batch(batch)?;
        Ok(true)
    }
}
