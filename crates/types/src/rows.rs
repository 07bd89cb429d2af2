use serde::{Deserialize, Serialize};
use url::Url;

use crate::{PageTransition, Result, Timestamp, TypesError};

pub type UrlId = i64;
pub type VisitId = i64;
pub type SegmentId = i64;
pub type FaviconId = i64;
pub type IconMappingId = i64;

/// One row of the URL table. `id` is zero until the row is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRow {
    pub id: UrlId,
    pub url: Url,
    pub title: String,
    pub visit_count: i32,
    pub typed_count: i32,
    pub last_visit: Timestamp,
    pub hidden: bool,
}

impl UrlRow {
    pub fn new(url: Url) -> Self {
        Self {
            id: 0,
            url,
            title: String::new(),
            visit_count: 0,
            typed_count: 0,
            last_visit: Timestamp::null(),
            hidden: false,
        }
    }

    pub fn with_counts(mut self, visit_count: i32, typed_count: i32) -> Self {
        self.visit_count = visit_count;
        self.typed_count = typed_count;
        self
    }

    pub fn with_last_visit(mut self, last_visit: Timestamp) -> Self {
        self.last_visit = last_visit;
        self
    }
}

/// A single recorded navigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitRow {
    pub visit_id: VisitId,
    pub url_id: UrlId,
    pub visit_time: Timestamp,
    /// Visit that led here, zero when none.
    pub referring_visit: VisitId,
    pub transition: PageTransition,
}

impl VisitRow {
    pub fn new(url_id: UrlId, visit_time: Timestamp, referring_visit: VisitId, transition: PageTransition) -> Self {
        Self {
            visit_id: 0,
            url_id,
            visit_time,
            referring_visit,
            transition,
        }
    }
}

/// Where a visit was recorded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum VisitSource {
    Synced = 0,
    #[default]
    Browsed = 1,
    Extension = 2,
    Firefox = 3,
    Ie = 4,
    Safari = 5,
}

impl VisitSource {
    pub fn as_byte(&self) -> u8 {
        *self as u8
    }

    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(VisitSource::Synced),
            1 => Ok(VisitSource::Browsed),
            2 => Ok(VisitSource::Extension),
            3 => Ok(VisitSource::Firefox),
            4 => Ok(VisitSource::Ie),
            5 => Ok(VisitSource::Safari),
            other => Err(TypesError::InvalidVisitSource(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IconType {
    Favicon,
    TouchIcon,
    TouchPrecomposedIcon,
}

/// Page URL to favicon association held by the thumbnail store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IconMapping {
    pub mapping_id: IconMappingId,
    pub page_url: Url,
    pub icon_id: FaviconId,
    pub icon_url: Url,
    pub icon_type: IconType,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CoreTransition;

    #[test]
    fn test_visit_source_bytes() {
        for byte in 0..=5u8 {
            assert_eq!(VisitSource::from_byte(byte).unwrap().as_byte(), byte);
        }
        assert!(VisitSource::from_byte(6).is_err());
        assert_eq!(VisitSource::default(), VisitSource::Browsed);
    }

    #[test]
    fn test_url_row_json() {
        let row = UrlRow::new(Url::parse("https://example.com/a").unwrap())
            .with_counts(3, 1)
            .with_last_visit(Timestamp::from_micros(5));
        let json = serde_json::to_string(&row).unwrap();
        assert!(json.contains("https://example.com/a"));
        let back: UrlRow = serde_json::from_str(&json).unwrap();
        assert_eq!(back, row);
    }

    #[test]
    fn test_visit_row_new() {
        let visit = VisitRow::new(7, Timestamp::from_micros(9), 0, CoreTransition::Typed.into());
        assert_eq!(visit.visit_id, 0);
        assert_eq!(visit.url_id, 7);
        assert_eq!(visit.transition.core(), CoreTransition::Typed);
    }
}
