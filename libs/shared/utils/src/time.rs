//! Minute-granularity time-of-day values and the week arithmetic used by schedules.
//!
//! Every interval is half-open: `[start, end)`.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub const MINUTES_PER_DAY: u16 = 24 * 60;

const WEEKDAY_NAMES: [&str; 7] = [
    "sunday", "monday", "tuesday", "wednesday", "thursday", "friday", "saturday",
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimeFormatError {
    #[error("Invalid time format '{0}', expected HH:mm")]
    InvalidFormat(String),
}

fn time_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^([0-1]?[0-9]|2[0-3]):[0-5][0-9]$").ok())
        .as_ref()
}

/// Parse an `HH:mm` string into minutes since midnight.
pub fn parse_time(raw: &str) -> Result<u16, TimeFormatError> {
    let matches = time_pattern().is_some_and(|pattern| pattern.is_match(raw));
    if !matches {
        return Err(TimeFormatError::InvalidFormat(raw.to_string()));
    }

    let (hours, minutes) = raw
        .split_once(':')
        .ok_or_else(|| TimeFormatError::InvalidFormat(raw.to_string()))?;
    let hours: u16 = hours.parse().map_err(|_| TimeFormatError::InvalidFormat(raw.to_string()))?;
    let minutes: u16 = minutes.parse().map_err(|_| TimeFormatError::InvalidFormat(raw.to_string()))?;

    Ok(hours * 60 + minutes)
}

pub fn format_time(minutes: u16) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// A wall-clock time of day, stored as minutes since midnight.
///
/// Parses any string accepted by the `HH:mm` pattern (single-digit hours included)
/// and always renders zero-padded, so stored values compare correctly as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime(u16);

impl ClockTime {
    pub const MIDNIGHT: ClockTime = ClockTime(0);

    /// Compile-time constructor for fixed times such as office hours.
    pub const fn hm(hours: u16, minutes: u16) -> Self {
        assert!(hours < 24 && minutes < 60);
        Self(hours * 60 + minutes)
    }

    pub fn from_minutes(minutes: u16) -> Option<Self> {
        (minutes < MINUTES_PER_DAY).then_some(Self(minutes))
    }

    pub fn from_hm(hours: u16, minutes: u16) -> Option<Self> {
        if minutes >= 60 {
            return None;
        }
        hours
            .checked_mul(60)
            .and_then(|h| h.checked_add(minutes))
            .and_then(Self::from_minutes)
    }

    pub fn minutes(&self) -> u16 {
        self.0
    }

    pub fn hour(&self) -> u16 {
        self.0 / 60
    }

    pub fn minute(&self) -> u16 {
        self.0 % 60
    }

    /// `None` when the result would roll past midnight.
    pub fn checked_add_minutes(&self, minutes: u16) -> Option<Self> {
        self.0.checked_add(minutes).and_then(Self::from_minutes)
    }

    pub fn minutes_until(&self, later: ClockTime) -> i32 {
        i32::from(later.0) - i32::from(self.0)
    }

    pub fn to_naive_time(&self) -> NaiveTime {
        NaiveTime::MIN + Duration::minutes(i64::from(self.0))
    }
}

impl FromStr for ClockTime {
    type Err = TimeFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_time(s).map(ClockTime)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl Serialize for ClockTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClockTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

pub fn is_before(a: ClockTime, b: ClockTime) -> bool {
    a < b
}

/// Half-open overlap: touching endpoints do not overlap.
pub fn overlaps(start_a: ClockTime, end_a: ClockTime, start_b: ClockTime, end_b: ClockTime) -> bool {
    start_a < end_b && end_a > start_b
}

/// Days back to the Monday of the week. Sunday is day 0 and belongs to the
/// week that started six days earlier.
fn days_since_monday(date: NaiveDate) -> i64 {
    match date.weekday().num_days_from_sunday() {
        0 => 6,
        day => i64::from(day) - 1,
    }
}

pub fn week_start_date(date: NaiveDate) -> NaiveDate {
    date - Duration::days(days_since_monday(date))
}

pub fn week_end_date(date: NaiveDate) -> NaiveDate {
    week_start_date(date) + Duration::days(6)
}

/// Monday 00:00:00.000 UTC of the week containing `at`.
pub fn week_start(at: DateTime<Utc>) -> DateTime<Utc> {
    let monday = week_start_date(at.date_naive());
    Utc.from_utc_datetime(&midnight(monday))
}

/// Sunday 23:59:59.999 UTC of the week containing `at`.
pub fn week_end(at: DateTime<Utc>) -> DateTime<Utc> {
    week_start(at) + Duration::days(7) - Duration::milliseconds(1)
}

pub fn is_week_start(date: NaiveDate) -> bool {
    days_since_monday(date) == 0
}

/// Lowercase English weekday name, `"monday"` through `"sunday"`.
pub fn weekday_name(date: NaiveDate) -> &'static str {
    WEEKDAY_NAMES[date.weekday().num_days_from_sunday() as usize]
}

/// The calendar date of `now` in the scheduling zone.
pub fn local_date(now: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    now.with_timezone(&offset).date_naive()
}

/// The instant at which `time` on `date` occurs in the scheduling zone.
pub fn to_utc(date: NaiveDate, time: ClockTime, offset: FixedOffset) -> DateTime<Utc> {
    let local = midnight(date) + Duration::minutes(i64::from(time.minutes()));
    let utc = local - Duration::seconds(i64::from(offset.local_minus_utc()));
    Utc.from_utc_datetime(&utc)
}

fn midnight(date: NaiveDate) -> NaiveDateTime {
    NaiveDateTime::new(date, NaiveTime::MIN)
}
