use thiserror::Error;
use history_types::{FaviconId, IconMappingId, Timestamp, TypesError, UrlId, VisitId};

pub mod traits;
pub mod memory;
#[cfg(feature = "rocksdb")]
pub mod rocksdb;
pub mod history_db;
pub mod archived_db;
pub mod thumbnail_db;

pub use traits::*;
pub use memory::*;
#[cfg(feature = "rocksdb")]
pub use rocksdb::*;
pub use history_db::{HistoryDatabase, HistoryStore};
pub use archived_db::{ArchivedDatabase, ArchivedStore};
pub use thumbnail_db::{ThumbnailDatabase, ThumbnailStore};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Key not found")]
    KeyNotFound,

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<TypesError> for StorageError {
    fn from(e: TypesError) -> Self {
        StorageError::InvalidData(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Key-value pair type alias
pub type KeyValue = (Vec<u8>, Vec<u8>);

/// Key prefixes for the row tables sharing one key space
#[derive(Debug, Clone, Copy)]
pub enum KeyPrefix {
    Url = 0x00,
    UrlIndex = 0x01,
    Visit = 0x02,
    VisitTime = 0x03,
    UrlVisits = 0x04,
    VisitSource = 0x05,
    Segment = 0x06,
    Meta = 0x07,
    Favicon = 0x08,
    IconMapping = 0x09,
    IconMappingByIcon = 0x0a,
}

impl KeyPrefix {
    pub fn as_byte(&self) -> u8 {
        *self as u8
    }

    pub fn make_key(&self, suffix: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + suffix.len());
        key.push(self.as_byte());
        key.extend_from_slice(suffix);
        key
    }
}

/// Helper functions for encoding/decoding row keys
pub mod keys {
    use super::*;
    use history_types::Url;

    pub fn url_key(id: UrlId) -> Vec<u8> {
        KeyPrefix::Url.make_key(&id.to_be_bytes())
    }

    pub fn url_index_key(url: &Url) -> Vec<u8> {
        KeyPrefix::UrlIndex.make_key(url.as_str().as_bytes())
    }

    pub fn visit_key(id: VisitId) -> Vec<u8> {
        KeyPrefix::Visit.make_key(&id.to_be_bytes())
    }

    pub fn visit_time_key(time: Timestamp, id: VisitId) -> Vec<u8> {
        let mut suffix = Vec::with_capacity(16);
        suffix.extend_from_slice(&time.to_sortable_bytes());
        suffix.extend_from_slice(&id.to_be_bytes());
        KeyPrefix::VisitTime.make_key(&suffix)
    }

    /// Splits a visit-time key back into its time and visit id.
    pub fn parse_visit_time_key(key: &[u8]) -> Option<(Timestamp, VisitId)> {
        if key.len() != 17 || key[0] != KeyPrefix::VisitTime.as_byte() {
            return None;
        }
        let mut time = [0u8; 8];
        time.copy_from_slice(&key[1..9]);
        let mut id = [0u8; 8];
        id.copy_from_slice(&key[9..17]);
        Some((Timestamp::from_sortable_bytes(time), VisitId::from_be_bytes(id)))
    }

    pub fn url_visits_prefix(url_id: UrlId) -> Vec<u8> {
        KeyPrefix::UrlVisits.make_key(&url_id.to_be_bytes())
    }

    pub fn url_visits_key(url_id: UrlId, visit_id: VisitId) -> Vec<u8> {
        let mut key = url_visits_prefix(url_id);
        key.extend_from_slice(&visit_id.to_be_bytes());
        key
    }

    pub fn visit_source_key(id: VisitId) -> Vec<u8> {
        KeyPrefix::VisitSource.make_key(&id.to_be_bytes())
    }

    pub fn segment_key(url_id: UrlId) -> Vec<u8> {
        KeyPrefix::Segment.make_key(&url_id.to_be_bytes())
    }

    pub fn meta_key(name: &str) -> Vec<u8> {
        KeyPrefix::Meta.make_key(name.as_bytes())
    }

    pub fn favicon_key(id: FaviconId) -> Vec<u8> {
        KeyPrefix::Favicon.make_key(&id.to_be_bytes())
    }

    /// Page URLs are terminated by a zero byte so one URL is never a prefix of another.
    pub fn icon_mapping_prefix(page_url: &Url) -> Vec<u8> {
        let mut key = KeyPrefix::IconMapping.make_key(page_url.as_str().as_bytes());
        key.push(0);
        key
    }

    pub fn icon_mapping_key(page_url: &Url, id: IconMappingId) -> Vec<u8> {
        let mut key = icon_mapping_prefix(page_url);
        key.extend_from_slice(&id.to_be_bytes());
        key
    }

    pub fn icon_mapping_by_icon_prefix(icon_id: FaviconId) -> Vec<u8> {
        KeyPrefix::IconMappingByIcon.make_key(&icon_id.to_be_bytes())
    }

    pub fn icon_mapping_by_icon_key(icon_id: FaviconId, id: IconMappingId) -> Vec<u8> {
        let mut key = icon_mapping_by_icon_prefix(icon_id);
        key.extend_from_slice(&id.to_be_bytes());
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use history_types::Url;

    #[test]
    fn test_key_prefix() {
        let key = keys::url_key(123);
        assert_eq!(key[0], KeyPrefix::Url.as_byte());
        assert_eq!(&key[1..], &123i64.to_be_bytes());
    }

    #[test]
    fn test_visit_time_key_roundtrip() {
        let time = Timestamp::from_micros(-5);
        let key = keys::visit_time_key(time, 77);
        assert_eq!(keys::parse_visit_time_key(&key), Some((time, 77)));
        assert!(keys::parse_visit_time_key(&keys::visit_key(77)).is_none());
    }

    #[test]
    fn test_visit_time_keys_sort_by_time() {
        let early = keys::visit_time_key(Timestamp::from_micros(-1), 900);
        let late = keys::visit_time_key(Timestamp::from_micros(1), 1);
        assert!(early < late);
    }

    #[test]
    fn test_icon_mapping_prefix_is_terminated() {
        let short = Url::parse("http://a.com/").unwrap();
        let long = Url::parse("http://a.com/x").unwrap();
        let key = keys::icon_mapping_key(&long, 1);
        assert!(!key.starts_with(&keys::icon_mapping_prefix(&short)));
    }
}
