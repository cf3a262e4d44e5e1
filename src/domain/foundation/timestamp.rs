//! Timestamp value object for immutable points in time.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound applied to offsets that do not fit a chrono duration.
const MAX_OFFSET_DAYS: i64 = 365 * 1_000;

/// Immutable point in time, always UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a timestamp for the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a timestamp from a DateTime<Utc>.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the inner DateTime.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Checks if this timestamp is before another.
    pub fn is_before(&self, other: &Timestamp) -> bool {
        self.0 < other.0
    }

    /// Checks if this timestamp is after another.
    pub fn is_after(&self, other: &Timestamp) -> bool {
        self.0 > other.0
    }

    /// Returns the duration from another timestamp to this one.
    ///
    /// Returns negative duration if other is after self.
    pub fn duration_since(&self, other: &Timestamp) -> Duration {
        self.0.signed_duration_since(other.0)
    }

    /// Adds a std duration, saturating at the maximum representable instant.
    pub fn plus_duration(&self, delay: std::time::Duration) -> Self {
        let delta = Duration::from_std(delay).unwrap_or_else(|_| Duration::days(MAX_OFFSET_DAYS));
        Self(self.0.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }

    /// Subtracts a std duration, saturating at the minimum representable instant.
    pub fn minus_duration(&self, delay: std::time::Duration) -> Self {
        let delta = Duration::from_std(delay).unwrap_or_else(|_| Duration::days(MAX_OFFSET_DAYS));
        Self(self.0.checked_sub_signed(delta).unwrap_or(DateTime::<Utc>::MIN_UTC))
    }

    /// Creates a new timestamp by adding the specified number of seconds.
    pub fn plus_secs(&self, secs: u64) -> Self {
        self.plus_duration(std::time::Duration::from_secs(secs))
    }

    /// Creates a new timestamp by adding the specified number of days.
    pub fn plus_days(&self, days: u64) -> Self {
        self.plus_secs(days * 86_400)
    }

    /// Creates a timestamp from Unix seconds, if representable.
    pub fn from_unix_secs(secs: i64) -> Option<Self> {
        Utc.timestamp_opt(secs, 0).single().map(Self)
    }

    /// Returns the timestamp as Unix seconds.
    pub fn as_unix_secs(&self) -> i64 {
        self.0.timestamp()
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn timestamp_now_creates_current_time() {
        let before = Utc::now();
        let ts = Timestamp::now();
        let after = Utc::now();

        assert!(ts.as_datetime() >= &before);
        assert!(ts.as_datetime() <= &after);
    }

    #[test]
    fn plus_days_moves_forward_whole_days() {
        let ts = Timestamp::from_unix_secs(1_705_276_800).unwrap();
        let later = ts.plus_days(3);
        assert_eq!(later.as_unix_secs() - ts.as_unix_secs(), 3 * 86_400);
        assert!(later.is_after(&ts));
        assert!(ts.is_before(&later));
    }

    #[test]
    fn minus_duration_moves_backward() {
        let ts = Timestamp::from_unix_secs(10_000).unwrap();
        let earlier = ts.minus_duration(std::time::Duration::from_secs(900));
        assert_eq!(earlier.as_unix_secs(), 9_100);
    }

    #[test]
    fn plus_duration_saturates_instead_of_overflowing() {
        let ts = Timestamp::now();
        let far = ts.plus_duration(std::time::Duration::from_secs(u64::MAX));
        assert!(far.is_after(&ts));
    }

    #[test]
    fn duration_since_is_signed() {
        let a = Timestamp::from_unix_secs(1_000).unwrap();
        let b = Timestamp::from_unix_secs(1_060).unwrap();
        assert_eq!(b.duration_since(&a).num_seconds(), 60);
        assert_eq!(a.duration_since(&b).num_seconds(), -60);
    }

    #[test]
    fn timestamp_from_unix_secs_works() {
        // 2024-01-15T00:00:00Z
        let ts = Timestamp::from_unix_secs(1_705_276_800).unwrap();
        assert_eq!(ts.as_datetime().year(), 2024);
        assert_eq!(ts.as_datetime().month(), 1);
        assert_eq!(ts.as_datetime().day(), 15);
    }

    #[test]
    fn timestamp_serializes_as_rfc3339() {
        let json = "\"2024-01-15T10:30:00Z\"";
        let ts: Timestamp = serde_json::from_str(json).unwrap();
        assert_eq!(ts.as_datetime().year(), 2024);
        assert!(serde_json::to_string(&ts).unwrap().contains("2024-01-15T10:30:00"));
    }
}
