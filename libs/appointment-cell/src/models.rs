// libs/appointment-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::{Actor, UserRole};
use shared_models::error::StoreError;
use shared_utils::time::{self, ClockTime, TimeFormatError};

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub consultant_id: Uuid,
    pub appointment_date: NaiveDate,
    pub start_time: ClockTime,
    pub end_time: ClockTime,
    pub status: AppointmentStatus,
    pub customer_notes: Option<String>,
    pub consultant_notes: Option<String>,
    pub meeting_info: Option<MeetingInfo>,
    pub video_call_status: VideoCallStatus,
    pub feedback: Option<Feedback>,
    #[serde(default)]
    pub feedback_reminder_sent: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// Start instant, reading date and time in the scheduling zone.
    pub fn starts_at(&self, zone: FixedOffset) -> DateTime<Utc> {
        time::to_utc(self.appointment_date, self.start_time, zone)
    }

    pub fn ends_at(&self, zone: FixedOffset) -> DateTime<Utc> {
        time::to_utc(self.appointment_date, self.end_time, zone)
    }

    pub fn duration_minutes(&self) -> i32 {
        self.start_time.minutes_until(self.end_time)
    }

    pub fn is_customer(&self, actor: &Actor) -> bool {
        self.customer_id == actor.user_id
    }

    pub fn is_assigned_consultant(&self, actor: &Actor) -> bool {
        self.consultant_id == actor.user_id
    }

    /// The customer, the assigned consultant, or staff/admin.
    pub fn can_be_accessed_by(&self, actor: &Actor) -> bool {
        actor.is_privileged() || self.is_customer(actor) || self.is_assigned_consultant(actor)
    }

    pub fn reminder_sent(&self) -> bool {
        self.meeting_info.as_ref().is_some_and(|m| m.reminder_sent)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 5] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Confirmed,
        AppointmentStatus::InProgress,
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, AppointmentStatus::Completed | AppointmentStatus::Cancelled)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "pending"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::InProgress => write!(f, "in_progress"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VideoCallStatus {
    #[default]
    NotStarted,
    InProgress,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingInfo {
    pub meet_url: String,
    pub meeting_id: String,
    pub meeting_password: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub reminder_sent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub rating: u8,
    pub comment: Option<String>,
    pub feedback_date: DateTime<Utc>,
}

// ==============================================================================
// AUDIT HISTORY
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Created,
    Confirmed,
    Rescheduled,
    Cancelled,
    Started,
    Completed,
    FeedbackSubmitted,
    Updated,
}

impl fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryAction::Created => write!(f, "created"),
            HistoryAction::Confirmed => write!(f, "confirmed"),
            HistoryAction::Rescheduled => write!(f, "rescheduled"),
            HistoryAction::Cancelled => write!(f, "cancelled"),
            HistoryAction::Started => write!(f, "started"),
            HistoryAction::Completed => write!(f, "completed"),
            HistoryAction::FeedbackSubmitted => write!(f, "feedback_submitted"),
            HistoryAction::Updated => write!(f, "updated"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppointmentHistory {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub action: HistoryAction,
    pub timestamp: DateTime<Utc>,
    pub performed_by_user_id: Uuid,
    pub performed_by_role: UserRole,
    pub old_data: Option<Value>,
    pub new_data: Option<Value>,
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookRequest {
    /// Required when staff or admin book on a customer's behalf.
    pub customer_id: Option<Uuid>,
    pub consultant_id: Uuid,
    pub appointment_date: NaiveDate,
    pub start_time: ClockTime,
    pub end_time: ClockTime,
    pub customer_notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RescheduleRequest {
    pub appointment_date: NaiveDate,
    pub start_time: ClockTime,
    pub end_time: ClockTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChangeRequest {
    pub status: AppointmentStatus,
    /// Completion notes when moving to `completed`.
    pub consultant_notes: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotesUpdate {
    pub customer_notes: Option<String>,
    pub consultant_notes: Option<String>,
}

/// The closed set of things an update can mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppointmentChange {
    Reschedule(RescheduleRequest),
    StatusChange(StatusChangeRequest),
    Notes(NotesUpdate),
}

/// Loose partial payload; see `services::booking::classify_update`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub appointment_date: Option<NaiveDate>,
    pub start_time: Option<ClockTime>,
    pub end_time: Option<ClockTime>,
    pub status: Option<AppointmentStatus>,
    pub customer_notes: Option<String>,
    pub consultant_notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub rating: u8,
    pub comment: Option<String>,
}

// ==============================================================================
// QUERY MODELS
// ==============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppointmentFilter {
    pub customer_id: Option<Uuid>,
    pub consultant_id: Option<Uuid>,
    /// Empty means any status.
    #[serde(default)]
    pub statuses: Vec<AppointmentStatus>,
    #[serde(default)]
    pub exclude_statuses: Vec<AppointmentStatus>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    /// Inclusive lower bound on `completed_at`.
    pub completed_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `completed_at`.
    pub completed_before: Option<DateTime<Utc>>,
}

impl AppointmentFilter {
    pub fn for_customer(customer_id: Uuid) -> Self {
        Self {
            customer_id: Some(customer_id),
            ..Self::default()
        }
    }

    pub fn for_consultant(consultant_id: Uuid) -> Self {
        Self {
            consultant_id: Some(consultant_id),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: AppointmentStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn between(mut self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        self.date_from = from;
        self.date_to = to;
        self
    }

    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.customer_id.map_or(true, |id| appointment.customer_id == id)
            && self.consultant_id.map_or(true, |id| appointment.consultant_id == id)
            && (self.statuses.is_empty() || self.statuses.contains(&appointment.status))
            && !self.exclude_statuses.contains(&appointment.status)
            && self.date_from.map_or(true, |d| appointment.appointment_date >= d)
            && self.date_to.map_or(true, |d| appointment.appointment_date <= d)
            && self
                .completed_from
                .map_or(true, |from| appointment.completed_at.is_some_and(|at| at >= from))
            && self
                .completed_before
                .map_or(true, |before| appointment.completed_at.is_some_and(|at| at < before))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page: 1, limit: 20 }
    }
}

impl Pagination {
    pub const MAX_LIMIT: u32 = 100;

    pub fn offset(&self) -> usize {
        (self.page.max(1) as usize - 1) * self.effective_limit()
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, Self::MAX_LIMIT) as usize
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: usize,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> usize {
        let limit = self.limit.max(1) as usize;
        self.total.div_ceil(limit)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub confirmed: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    pub fn add(&mut self, status: AppointmentStatus) {
        match status {
            AppointmentStatus::Pending => self.pending += 1,
            AppointmentStatus::Confirmed => self.confirmed += 1,
            AppointmentStatus::InProgress => self.in_progress += 1,
            AppointmentStatus::Completed => self.completed += 1,
            AppointmentStatus::Cancelled => self.cancelled += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.confirmed + self.in_progress + self.completed + self.cancelled
    }
}

// ==============================================================================
// BUSINESS RULES
// ==============================================================================

#[derive(Debug, Clone)]
pub struct AppointmentValidationRules {
    pub min_advance_booking_hours: i64,
    pub allowed_cancellation_hours: i64,
    pub min_appointment_duration: i32,
    pub max_appointment_duration: i32,
    pub max_notes_length: usize,
    /// Zone appointment dates and times are expressed in.
    pub zone: FixedOffset,
}

impl Default for AppointmentValidationRules {
    fn default() -> Self {
        Self {
            min_advance_booking_hours: 2,
            allowed_cancellation_hours: 4,
            min_appointment_duration: 15,
            max_appointment_duration: 240,
            max_notes_length: 500,
            zone: Utc.fix(),
        }
    }
}

impl AppointmentValidationRules {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            zone: config.schedule_offset(),
            ..Self::default()
        }
    }
}

// ==============================================================================
// OUTCOMES AND ERRORS
// ==============================================================================

/// Something that went wrong on the side of a successful operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationWarning {
    HistoryWriteFailed { action: HistoryAction, message: String },
    MeetingProviderFallback { message: String },
    ContactLookupFailed { user_id: Uuid, message: String },
}

impl fmt::Display for OperationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationWarning::HistoryWriteFailed { action, message } => {
                write!(f, "history record '{}' not written: {}", action, message)
            }
            OperationWarning::MeetingProviderFallback { message } => {
                write!(f, "placeholder meeting link issued: {}", message)
            }
            OperationWarning::ContactLookupFailed { user_id, message } => {
                write!(f, "contact {} unavailable: {}", user_id, message)
            }
        }
    }
}

/// A successful result plus any degraded side effects.
#[derive(Debug, Clone)]
pub struct Outcome<T> {
    pub value: T,
    pub warnings: Vec<OperationWarning>,
}

impl<T> Outcome<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(value: T, warnings: Vec<OperationWarning>) -> Self {
        Self { value, warnings }
    }

    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppointmentError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid time format: {0}")]
    InvalidFormat(String),

    #[error("Consultant has no schedule for {date}")]
    NoSchedule { date: NaiveDate },

    #[error("Consultant does not work on {weekday}")]
    DayUnavailable { weekday: String },

    #[error("Requested time is outside working hours ({start}-{end})")]
    OutsideWorkingHours { start: ClockTime, end: ClockTime },

    #[error("Requested time overlaps the break ({start}-{end})")]
    DuringBreak { start: ClockTime, end: ClockTime },

    #[error("Requested time slot is already booked")]
    SlotTaken,

    #[error("Appointments must be booked at least {hours} hours in advance")]
    LeadTimeViolation { hours: i64 },

    #[error("Appointments can only be cancelled at least {hours} hours before the start time")]
    TooLateToCancel { hours: i64 },

    #[error("Customer already has a pending appointment")]
    PendingAppointmentExists,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Cannot change appointment status from {from} to {to}")]
    InvalidTransition { from: AppointmentStatus, to: AppointmentStatus },

    #[error("Appointment not found")]
    NotFound,

    #[error("No changes detected")]
    NoChanges,

    #[error("Field not allowed: {0}")]
    FieldNotAllowed(String),

    /// Details are logged server side and never shown to callers.
    #[error("An internal error occurred, please try again later")]
    Internal(String),
}

impl AppointmentError {
    /// Stable machine-readable code.
    pub fn reason(&self) -> &'static str {
        match self {
            AppointmentError::ValidationError(_) => "validation_error",
            AppointmentError::InvalidFormat(_) => "invalid_format",
            AppointmentError::NoSchedule { .. } => "no_schedule",
            AppointmentError::DayUnavailable { .. } => "day_unavailable",
            AppointmentError::OutsideWorkingHours { .. } => "outside_working_hours",
            AppointmentError::DuringBreak { .. } => "during_break",
            AppointmentError::SlotTaken => "slot_taken",
            AppointmentError::LeadTimeViolation { .. } => "lead_time_violation",
            AppointmentError::TooLateToCancel { .. } => "too_late_to_cancel",
            AppointmentError::PendingAppointmentExists => "pending_appointment_exists",
            AppointmentError::PermissionDenied(_) => "permission_denied",
            AppointmentError::InvalidTransition { .. } => "invalid_transition",
            AppointmentError::NotFound => "not_found",
            AppointmentError::NoChanges => "no_changes",
            AppointmentError::FieldNotAllowed(_) => "field_not_allowed",
            AppointmentError::Internal(_) => "internal_error",
        }
    }

    /// Expected rejections, as opposed to infrastructure failures.
    pub fn is_business_rule(&self) -> bool {
        !matches!(self, AppointmentError::Internal(_))
    }
}

impl From<TimeFormatError> for AppointmentError {
    fn from(err: TimeFormatError) -> Self {
        AppointmentError::InvalidFormat(err.to_string())
    }
}

impl From<StoreError> for AppointmentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => AppointmentError::NotFound,
            other => AppointmentError::Internal(other.to_string()),
        }
    }
}
