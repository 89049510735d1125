use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_utils::time::ClockTime;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
}

// ==============================================================================
// MEETING LINKS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingRequest {
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub attendee_emails: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingDetails {
    pub meet_url: String,
    pub meeting_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting_password: Option<String>,
}

/// Result of link generation. `fallback_reason` is set when the remote
/// provider failed and a placeholder link was issued instead.
#[derive(Debug, Clone)]
pub struct GeneratedMeeting {
    pub details: MeetingDetails,
    pub fallback_reason: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeetingError {
    #[error("Meeting provider not configured")]
    NotConfigured,

    #[error("Meeting provider error: {0}")]
    Provider(String),

    #[error("Invalid meeting provider response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for MeetingError {
    fn from(err: reqwest::Error) -> Self {
        MeetingError::Provider(err.to_string())
    }
}

// ==============================================================================
// NOTIFICATIONS
// ==============================================================================

/// Everything a message template needs about one appointment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationData {
    pub appointment_id: Uuid,
    pub customer_name: String,
    pub customer_email: String,
    pub consultant_name: String,
    pub appointment_date: NaiveDate,
    pub start_time: ClockTime,
    pub end_time: ClockTime,
    pub meeting: Option<MeetingDetails>,
    pub customer_notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationKind {
    Confirmation,
    Cancellation { cancelled_by: String },
    MeetingReminder { minutes_before: i64 },
    FeedbackReminder,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NotificationKind::Confirmation => write!(f, "confirmation"),
            NotificationKind::Cancellation { .. } => write!(f, "cancellation"),
            NotificationKind::MeetingReminder { .. } => write!(f, "meeting_reminder"),
            NotificationKind::FeedbackReminder => write!(f, "feedback_reminder"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotificationError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),

    #[error("Contact directory error: {0}")]
    Directory(String),
}

impl From<reqwest::Error> for NotificationError {
    fn from(err: reqwest::Error) -> Self {
        NotificationError::Delivery(err.to_string())
    }
}
