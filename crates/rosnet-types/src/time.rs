//! Wall-clock timestamps.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Seconds and nanoseconds since the UNIX epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub secs: i64,
    pub nsecs: u32,
}

impl Timestamp {
    pub fn new(secs: i64, nsecs: u32) -> Self {
        Self { secs, nsecs }
    }

    pub fn now() -> Self {
        Self::from(Utc::now())
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.secs, self.nsecs).single()
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self {
            secs: dt.timestamp(),
            nsecs: dt.timestamp_subsec_nanos(),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.secs, self.nsecs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_after_epoch_and_monotone_enough() {
        let a = Timestamp::now();
        let b = Timestamp::now();
        assert!(a.secs > 1_600_000_000);
        assert!(b >= a);
    }

    #[test]
    fn test_datetime_roundtrip() {
        let ts = Timestamp::new(1_700_000_000, 123_456_789);
        let dt = ts.to_datetime().unwrap();
        assert_eq!(Timestamp::from(dt), ts);
        assert_eq!(ts.to_string(), "1700000000.123456789");
    }
}
