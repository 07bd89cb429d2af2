use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::{Result, TypesError};

/// Microseconds since the Unix epoch. Zero is the null time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const fn null() -> Self {
        Self(0)
    }

    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub const fn max() -> Self {
        Self(i64::MAX)
    }

    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        Self(micros)
    }

    pub const fn as_micros(&self) -> i64 {
        self.0
    }

    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// The smallest representable time strictly after this one.
    pub fn next_unit(&self) -> Self {
        Self(self.0.saturating_add(1))
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_micros())
    }

    pub fn to_datetime(&self) -> Result<DateTime<Utc>> {
        Utc.timestamp_micros(self.0)
            .single()
            .ok_or(TypesError::TimestampOutOfRange(self.0))
    }

    /// Key encoding that sorts the same way the timestamps do.
    pub fn to_sortable_bytes(&self) -> [u8; 8] {
        ((self.0 as u64) ^ (1 << 63)).to_be_bytes()
    }

    pub fn from_sortable_bytes(bytes: [u8; 8]) -> Self {
        Self((u64::from_be_bytes(bytes) ^ (1 << 63)) as i64)
    }
}

fn duration_micros(d: Duration) -> i64 {
    i64::try_from(d.as_micros()).unwrap_or(i64::MAX)
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(duration_micros(rhs)))
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0.saturating_sub(duration_micros(rhs)))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return write!(f, "null");
        }
        match self.to_datetime() {
            Ok(dt) => write!(f, "{}", dt.to_rfc3339()),
            Err(_) => write!(f, "{}us", self.0),
        }
    }
}

impl FromStr for Timestamp {
    type Err = TypesError;

    /// Accepts RFC 3339 or a raw microsecond count.
    fn from_str(s: &str) -> Result<Self> {
        if let Ok(micros) = s.parse::<i64>() {
            return Ok(Self(micros));
        }
        DateTime::parse_from_rfc3339(s)
            .map(|dt| Self::from_datetime(dt.with_timezone(&Utc)))
            .map_err(|e| TypesError::InvalidTime(format!("{}: {}", s, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_null_and_next_unit() {
        let t = Timestamp::null();
        assert!(t.is_null());
        assert_eq!(t.next_unit().as_micros(), 1);
        assert_eq!(Timestamp::max().next_unit(), Timestamp::max());
    }

    #[test]
    fn test_duration_arithmetic() {
        let t = Timestamp::from_micros(10_000_000);
        assert_eq!((t + Duration::from_secs(1)).as_micros(), 11_000_000);
        assert_eq!((t - Duration::from_secs(1)).as_micros(), 9_000_000);
    }

    #[test]
    fn test_parse() {
        let t: Timestamp = "2014-05-01T00:00:00Z".parse().unwrap();
        assert_eq!(t.to_datetime().unwrap().to_rfc3339(), "2014-05-01T00:00:00+00:00");
        let raw: Timestamp = "42".parse().unwrap();
        assert_eq!(raw.as_micros(), 42);
        assert!("yesterday".parse::<Timestamp>().is_err());
    }

    proptest! {
        #[test]
        fn sortable_bytes_preserve_order(a in any::<i64>(), b in any::<i64>()) {
            let (ta, tb) = (Timestamp::from_micros(a), Timestamp::from_micros(b));
            prop_assert_eq!(ta.cmp(&tb), ta.to_sortable_bytes().cmp(&tb.to_sortable_bytes()));
            prop_assert_eq!(Timestamp::from_sortable_bytes(ta.to_sortable_bytes()), ta);
        }
    }
}
