//! Core data types for event tracking
//!
//! Provides the interval granularities that define bucket boundaries and the
//! bit values written into interval bitmaps.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Offset of a user inside every interval bitmap
pub type Offset = u64;

/// Time granularity of a bitmap bucket
///
/// All truncation happens in UTC so bucket boundaries never depend on the
/// local timezone of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    /// One clock hour
    Hour,
    /// One calendar day
    Day,
    /// One ISO week, starting Monday
    Week,
    /// One calendar month
    Month,
    /// One calendar quarter
    Quarter,
    /// One calendar year
    Year,
}

impl Interval {
    /// All supported intervals, finest first
    pub const ALL: [Interval; 6] = [
        Interval::Hour,
        Interval::Day,
        Interval::Week,
        Interval::Month,
        Interval::Quarter,
        Interval::Year,
    ];

    /// Label embedded in bitmap keys
    ///
    /// These labels are part of the persisted key format and must not change.
    pub fn label(&self) -> &'static str {
        match self {
            Interval::Hour => "hour",
            Interval::Day => "day",
            Interval::Week => "week",
            Interval::Month => "month",
            Interval::Quarter => "quarter",
            Interval::Year => "year",
        }
    }

    /// Truncate a timestamp down to the start of its bucket
    pub fn truncate(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let date = at.date_naive();
        let start = match self {
            Interval::Hour => date.and_hms_opt(at.hour(), 0, 0),
            Interval::Day => date.and_hms_opt(0, 0, 0),
            Interval::Week => {
                let back = Duration::days(i64::from(date.weekday().num_days_from_monday()));
                date.checked_sub_signed(back)
                    .and_then(|monday| monday.and_hms_opt(0, 0, 0))
            },
            Interval::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0)),
            Interval::Quarter => {
                let first_month = (date.month0() / 3) * 3 + 1;
                NaiveDate::from_ymd_opt(date.year(), first_month, 1)
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            },
            Interval::Year => {
                NaiveDate::from_ymd_opt(date.year(), 1, 1).and_then(|d| d.and_hms_opt(0, 0, 0))
            },
        };

        // Only reachable at the edge of chrono's range; the key encoder
        // rejects such years
        start.map(|naive| Utc.from_utc_datetime(&naive)).unwrap_or(at)
    }

    /// Start of the bucket following the one that starts at `start`
    ///
    /// Returns `None` when the next bucket falls outside chrono's range.
    pub fn next_bucket(&self, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = self.truncate(start);
        match self {
            Interval::Hour => start.checked_add_signed(Duration::hours(1)),
            Interval::Day => start.checked_add_signed(Duration::days(1)),
            Interval::Week => start.checked_add_signed(Duration::weeks(1)),
            Interval::Month => start.checked_add_months(Months::new(1)),
            Interval::Quarter => start.checked_add_months(Months::new(3)),
            Interval::Year => start.checked_add_months(Months::new(12)),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Interval::ALL
            .iter()
            .copied()
            .find(|interval| interval.label() == s)
            .ok_or_else(|| format!("unknown interval '{}'", s))
    }
}

/// Value written into a user's bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bit {
    /// User performed the event (track)
    On,
    /// User did not perform the event (untrack)
    Off,
}

impl Bit {
    /// Bit as a boolean store value
    pub fn as_bool(&self) -> bool {
        matches!(self, Bit::On)
    }
}

impl From<bool> for Bit {
    fn from(value: bool) -> Self {
        if value {
            Bit::On
        } else {
            Bit::Off
        }
    }
}

/// Population count of one bucket in a range query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketCount {
    /// Start of the bucket (UTC)
    pub bucket_start: DateTime<Utc>,
    /// Number of users with the bit set
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 17).unwrap()
    }

    #[test]
    fn test_truncate_hour_and_day() {
        let at = ts(2024, 1, 1, 10, 42);
        assert_eq!(Interval::Hour.truncate(at), Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap());
        assert_eq!(Interval::Day.truncate(at), Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_truncate_week_starts_monday() {
        // 2024-01-03 is a Wednesday
        let at = ts(2024, 1, 3, 23, 59);
        assert_eq!(Interval::Week.truncate(at), Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());

        // Sunday belongs to the week that started the previous Monday
        let sunday = ts(2024, 1, 7, 12, 0);
        assert_eq!(Interval::Week.truncate(sunday), Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());

        // Week can start in the previous year
        let at = ts(2021, 1, 1, 8, 0);
        assert_eq!(Interval::Week.truncate(at), Utc.with_ymd_and_hms(2020, 12, 28, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_truncate_at_min_timestamp_does_not_panic() {
        let min = DateTime::<Utc>::MIN_UTC;
        for interval in Interval::ALL {
            assert!(interval.truncate(min) <= min, "{}", interval);
        }
    }

    #[test]
    fn test_truncate_month_quarter_year() {
        let at = ts(2024, 8, 19, 5, 5);
        assert_eq!(Interval::Month.truncate(at), Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap());
        assert_eq!(Interval::Quarter.truncate(at), Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap());
        assert_eq!(Interval::Year.truncate(at), Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());

        let march = ts(2024, 3, 31, 23, 0);
        assert_eq!(Interval::Quarter.truncate(march), Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_truncate_is_idempotent() {
        let at = ts(2023, 11, 15, 13, 30);
        for interval in Interval::ALL {
            let start = interval.truncate(at);
            assert_eq!(interval.truncate(start), start, "{}", interval);
            assert!(start <= at);
        }
    }

    #[test]
    fn test_next_bucket() {
        let jan31 = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
        assert_eq!(
            Interval::Day.next_bucket(jan31),
            Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(
            Interval::Month.next_bucket(jan31),
            Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(
            Interval::Quarter.next_bucket(jan31),
            Some(Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(
            Interval::Year.next_bucket(jan31),
            Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(
            Interval::Week.next_bucket(jan31),
            Some(Utc.with_ymd_and_hms(2024, 2, 5, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_interval_labels_round_trip() {
        for interval in Interval::ALL {
            assert_eq!(interval.label().parse::<Interval>(), Ok(interval));
            assert_eq!(interval.to_string(), interval.label());
        }
        assert!("daily".parse::<Interval>().is_err());
        assert!("".parse::<Interval>().is_err());
    }

    #[test]
    fn test_bit_conversion() {
        assert!(Bit::On.as_bool());
        assert!(!Bit::Off.as_bool());
        assert_eq!(Bit::from(true), Bit::On);
        assert_eq!(Bit::from(false), Bit::Off);
    }
}
