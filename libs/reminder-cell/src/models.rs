// libs/reminder-cell/src/models.rs
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use appointment_cell::AppointmentStatus;
use notification_cell::NotificationError;
use shared_config::AppConfig;
use shared_models::error::StoreError;
use shared_utils::time::ClockTime;

// ==============================================================================
// CONFIGURATION
// ==============================================================================

/// Sweep cadence and the two reminder windows.
///
/// A meeting reminder fires when the start lies within
/// `[now + meeting_window_start, now + meeting_window_end]`. The window must be
/// wider than `interval` so every due appointment is seen by at least one tick.
#[derive(Debug, Clone)]
pub struct ReminderConfig {
    pub interval: StdDuration,
    pub meeting_window_start: Duration,
    pub meeting_window_end: Duration,
    pub feedback_after: Duration,
    pub feedback_before: Duration,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            interval: StdDuration::from_secs(300),
            meeting_window_start: Duration::minutes(10),
            meeting_window_end: Duration::minutes(20),
            feedback_after: Duration::hours(24),
            feedback_before: Duration::hours(48),
        }
    }
}

impl ReminderConfig {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            interval: StdDuration::from_secs(config.reminder_interval_seconds.max(1)),
            ..Self::default()
        }
    }

    pub fn in_meeting_window(&self, now: DateTime<Utc>, starts_at: DateTime<Utc>) -> bool {
        starts_at >= now + self.meeting_window_start && starts_at <= now + self.meeting_window_end
    }
}

// ==============================================================================
// REPORTS
// ==============================================================================

/// What a single sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub started_at: Option<DateTime<Utc>>,
    pub skipped: bool,
    pub meeting_reminders_sent: u32,
    pub feedback_reminders_sent: u32,
    pub failures: u32,
}

impl TickReport {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> u32 {
        self.meeting_reminders_sent + self.feedback_reminders_sent
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub interval_seconds: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub ticks: u64,
    pub skipped_ticks: u64,
    pub meeting_reminders_sent: u64,
    pub feedback_reminders_sent: u64,
    pub failures: u64,
}

impl SchedulerStatus {
    pub(crate) fn record(&mut self, report: &TickReport) {
        if report.skipped {
            self.skipped_ticks += 1;
            return;
        }
        self.ticks += 1;
        self.last_tick_at = report.started_at;
        self.meeting_reminders_sent += u64::from(report.meeting_reminders_sent);
        self.feedback_reminders_sent += u64::from(report.feedback_reminders_sent);
        self.failures += u64::from(report.failures);
    }
}

/// A confirmed appointment later today, as seen by the next sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpcomingReminder {
    pub appointment_id: Uuid,
    pub customer_id: Uuid,
    pub consultant_id: Uuid,
    pub appointment_date: NaiveDate,
    pub start_time: ClockTime,
    pub minutes_until_start: i64,
    pub will_send_reminder: bool,
    pub reminder_sent: bool,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Error, Debug)]
pub enum ReminderError {
    #[error("Appointment not found: {0}")]
    NotFound(Uuid),

    #[error("Appointment {id} is {status} and cannot receive a reminder")]
    NotConfirmed { id: Uuid, status: AppointmentStatus },

    #[error("Appointment {0} has no meeting link")]
    MissingMeetingInfo(Uuid),

    #[error("Reminder scheduler is already running")]
    AlreadyRunning,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Notification error: {0}")]
    Notification(#[from] NotificationError),
}
