use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_models::auth::UserRole;
use shared_models::error::StoreError;
use shared_utils::time::{self, ClockTime, TimeFormatError};

pub const WEEKDAYS: [&str; 7] = [
    "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday",
];

pub const DEFAULT_SLOT_DURATION: u16 = 30;
pub const MIN_SLOT_DURATION: u16 = 15;
pub const MAX_SLOT_DURATION: u16 = 120;
pub const MAX_SCHEDULE_NOTES_LENGTH: usize = 500;

const OFFICE_OPEN: ClockTime = ClockTime::hm(8, 0);
const OFFICE_CLOSE: ClockTime = ClockTime::hm(17, 0);

// ==============================================================================
// WORKING DAYS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingDay {
    pub start_time: ClockTime,
    pub end_time: ClockTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub break_start: Option<ClockTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub break_end: Option<ClockTime>,
    #[serde(default = "default_true")]
    pub is_available: bool,
}

fn default_true() -> bool {
    true
}

impl WorkingDay {
    pub fn new(start_time: ClockTime, end_time: ClockTime) -> Self {
        Self {
            start_time,
            end_time,
            break_start: None,
            break_end: None,
            is_available: true,
        }
    }

    pub fn with_break(mut self, break_start: ClockTime, break_end: ClockTime) -> Self {
        self.break_start = Some(break_start);
        self.break_end = Some(break_end);
        self
    }

    /// Placeholder for a weekday nobody configured: office hours, closed.
    pub fn closed() -> Self {
        Self {
            start_time: OFFICE_OPEN,
            end_time: OFFICE_CLOSE,
            break_start: None,
            break_end: None,
            is_available: false,
        }
    }

    pub fn break_window(&self) -> Option<(ClockTime, ClockTime)> {
        match (self.break_start, self.break_end) {
            (Some(start), Some(end)) => Some((start, end)),
            _ => None,
        }
    }

    pub fn contains(&self, start: ClockTime, end: ClockTime) -> bool {
        start >= self.start_time && end <= self.end_time
    }

    pub fn overlaps_break(&self, start: ClockTime, end: ClockTime) -> bool {
        self.break_window()
            .is_some_and(|(break_start, break_end)| time::overlaps(start, end, break_start, break_end))
    }

    pub fn validate(&self, day: &str) -> Result<(), ScheduleError> {
        if self.start_time >= self.end_time {
            return Err(ScheduleError::ValidationError(format!(
                "{}: Start time must be before end time",
                day
            )));
        }

        match (self.break_start, self.break_end) {
            (Some(break_start), Some(break_end)) => {
                if break_start >= break_end {
                    return Err(ScheduleError::ValidationError(format!(
                        "{}: Break start time must be before break end time",
                        day
                    )));
                }
                if break_start < self.start_time || break_end > self.end_time {
                    return Err(ScheduleError::ValidationError(format!(
                        "{}: Break time must be within working hours",
                        day
                    )));
                }
            }
            (None, None) => {}
            _ => {
                return Err(ScheduleError::ValidationError(format!(
                    "{}: Both break start and end time are required if break is specified",
                    day
                )));
            }
        }

        Ok(())
    }
}

/// Per-weekday configuration for one week. An absent day is "not configured".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingDays {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monday: Option<WorkingDay>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tuesday: Option<WorkingDay>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wednesday: Option<WorkingDay>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thursday: Option<WorkingDay>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friday: Option<WorkingDay>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saturday: Option<WorkingDay>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sunday: Option<WorkingDay>,
}

impl WorkingDays {
    /// Monday to Friday with the same hours, weekend unset.
    pub fn weekdays(day: WorkingDay) -> Self {
        let mut days = WorkingDays::default();
        for name in &WEEKDAYS[..5] {
            days.set(name, day.clone());
        }
        days
    }

    pub fn get(&self, weekday: &str) -> Option<&WorkingDay> {
        match weekday {
            "monday" => self.monday.as_ref(),
            "tuesday" => self.tuesday.as_ref(),
            "wednesday" => self.wednesday.as_ref(),
            "thursday" => self.thursday.as_ref(),
            "friday" => self.friday.as_ref(),
            "saturday" => self.saturday.as_ref(),
            "sunday" => self.sunday.as_ref(),
            _ => None,
        }
    }

    fn slot_mut(&mut self, weekday: &str) -> Option<&mut Option<WorkingDay>> {
        match weekday {
            "monday" => Some(&mut self.monday),
            "tuesday" => Some(&mut self.tuesday),
            "wednesday" => Some(&mut self.wednesday),
            "thursday" => Some(&mut self.thursday),
            "friday" => Some(&mut self.friday),
            "saturday" => Some(&mut self.saturday),
            "sunday" => Some(&mut self.sunday),
            _ => None,
        }
    }

    pub fn set(&mut self, weekday: &str, day: WorkingDay) {
        if let Some(slot) = self.slot_mut(weekday) {
            *slot = Some(day);
        }
    }

    pub fn for_date(&self, date: NaiveDate) -> Option<&WorkingDay> {
        self.get(time::weekday_name(date))
    }

    /// Monday-first iteration over every weekday, configured or not.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, Option<&WorkingDay>)> + '_ {
        WEEKDAYS.iter().map(move |name| (*name, self.get(name)))
    }

    pub fn fill_missing_with_defaults(&mut self) {
        for name in WEEKDAYS {
            if let Some(slot) = self.slot_mut(name) {
                if slot.is_none() {
                    *slot = Some(WorkingDay::closed());
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), ScheduleError> {
        for (name, day) in self.iter() {
            if let Some(day) = day {
                day.validate(name)?;
            }
        }
        Ok(())
    }

    pub fn available_day_count(&self) -> usize {
        self.iter()
            .filter(|(_, day)| day.is_some_and(|d| d.is_available))
            .count()
    }
}

// ==============================================================================
// WEEKLY SCHEDULE
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleCreator {
    pub user_id: Uuid,
    pub name: String,
    pub role: UserRole,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklySchedule {
    pub id: Uuid,
    pub consultant_id: Uuid,
    /// Always a Monday at 00:00 UTC.
    pub week_start_date: DateTime<Utc>,
    /// Sunday 23:59:59.999 of the same week.
    pub week_end_date: DateTime<Utc>,
    pub working_days: WorkingDays,
    pub default_slot_duration: u16,
    pub created_by: ScheduleCreator,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WeeklySchedule {
    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        self.week_start_date <= at && at <= self.week_end_date
    }

    pub fn week_start_day(&self) -> NaiveDate {
        self.week_start_date.date_naive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateScheduleRequest {
    pub consultant_id: Uuid,
    /// Any date inside the target week; normalized to its Monday.
    pub week_start_date: NaiveDate,
    #[serde(default)]
    pub working_days: WorkingDays,
    pub default_slot_duration: Option<u16>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateScheduleRequest {
    pub week_start_date: Option<NaiveDate>,
    pub working_days: Option<WorkingDays>,
    pub default_slot_duration: Option<u16>,
    pub notes: Option<String>,
}

// ==============================================================================
// SLOTS AND AVAILABILITY
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start_time: ClockTime,
    pub end_time: ClockTime,
    pub is_booked: bool,
}

impl TimeSlot {
    pub fn is_available(&self) -> bool {
        !self.is_booked
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayAvailability {
    pub date: NaiveDate,
    pub day_of_week: String,
    pub is_working_day: bool,
    pub working_hours: Option<WorkingDay>,
    pub slots: Vec<TimeSlot>,
}

impl DayAvailability {
    pub fn available_slots(&self) -> impl Iterator<Item = &TimeSlot> {
        self.slots.iter().filter(|slot| slot.is_available())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilitySummary {
    pub total_working_days: usize,
    pub total_slots: usize,
    pub available_slots: usize,
    pub booked_slots: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyAvailability {
    pub consultant_id: Uuid,
    pub week_start_date: NaiveDate,
    pub week_end_date: NaiveDate,
    pub days: Vec<DayAvailability>,
    pub summary: AvailabilitySummary,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScheduleError {
    #[error("Schedule not found")]
    NotFound,

    #[error("Schedule already exists for consultant {consultant_id} in week of {week_start}")]
    DuplicateWeek { consultant_id: Uuid, week_start: NaiveDate },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid time format: {0}")]
    InvalidFormat(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<TimeFormatError> for ScheduleError {
    fn from(err: TimeFormatError) -> Self {
        ScheduleError::InvalidFormat(err.to_string())
    }
}

impl From<StoreError> for ScheduleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ScheduleError::NotFound,
            other => ScheduleError::DatabaseError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn t(raw: &str) -> ClockTime {
        raw.parse().unwrap()
    }

    #[test]
    fn working_day_rejects_inverted_hours() {
        let day = WorkingDay::new(t("17:00"), t("08:00"));
        assert_matches!(day.validate("monday"), Err(ScheduleError::ValidationError(msg)) if msg.starts_with("monday"));
    }

    #[test]
    fn working_day_requires_both_break_bounds() {
        let mut day = WorkingDay::new(t("08:00"), t("17:00"));
        day.break_start = Some(t("12:00"));
        assert_matches!(day.validate("tuesday"), Err(ScheduleError::ValidationError(_)));
    }

    #[test]
    fn working_day_rejects_break_outside_hours() {
        let day = WorkingDay::new(t("08:00"), t("17:00")).with_break(t("16:30"), t("17:30"));
        assert_matches!(day.validate("friday"), Err(ScheduleError::ValidationError(msg)) if msg.contains("within working hours"));

        let inverted = WorkingDay::new(t("08:00"), t("17:00")).with_break(t("13:00"), t("12:00"));
        assert_matches!(inverted.validate("friday"), Err(ScheduleError::ValidationError(_)));
    }

    #[test]
    fn break_may_touch_working_hour_edges() {
        let day = WorkingDay::new(t("08:00"), t("17:00")).with_break(t("08:00"), t("09:00"));
        assert!(day.validate("monday").is_ok());
    }

    #[test]
    fn missing_days_are_filled_closed() {
        let mut days = WorkingDays::default();
        days.set("monday", WorkingDay::new(t("09:00"), t("12:00")));
        days.fill_missing_with_defaults();

        assert_eq!(days.available_day_count(), 1);
        let sunday = days.get("sunday").unwrap();
        assert!(!sunday.is_available);
        assert_eq!(sunday.start_time, t("08:00"));
        assert_eq!(sunday.end_time, t("17:00"));
        assert_eq!(days.get("monday").unwrap().end_time, t("12:00"));
    }

    #[test]
    fn working_days_resolve_by_calendar_date() {
        let mut days = WorkingDays::default();
        days.set("wednesday", WorkingDay::new(t("10:00"), t("11:00")));
        // 2030-06-05 is a Wednesday.
        let wednesday = NaiveDate::from_ymd_opt(2030, 6, 5).unwrap();
        assert!(days.for_date(wednesday).is_some());
        assert!(days.for_date(wednesday.succ_opt().unwrap()).is_none());
    }
}
