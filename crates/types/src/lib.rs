pub mod rows;
pub mod time;
pub mod transition;

pub use rows::{
    FaviconId, IconMapping, IconMappingId, IconType, SegmentId, UrlId, UrlRow, VisitId, VisitRow,
    VisitSource,
};
pub use time::Timestamp;
pub use transition::{CoreTransition, PageTransition};

pub use url::Url;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TypesError {
    #[error("Invalid transition core type: {0}")]
    InvalidTransition(u32),

    #[error("Invalid visit source: {0}")]
    InvalidVisitSource(u8),

    #[error("Timestamp out of range: {0}")]
    TimestampOutOfRange(i64),

    #[error("Invalid time string: {0}")]
    InvalidTime(String),
}

pub type Result<T> = std::result::Result<T, TypesError>;
