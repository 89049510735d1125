// libs/appointment-cell/src/services/store.rs
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_models::error::StoreError;

use crate::models::{
    Appointment, AppointmentFilter, AppointmentStatus, MeetingInfo, Page, Pagination, StatusCounts,
    VideoCallStatus,
};
use crate::services::conflict::ConflictQuery;

/// Persistence seam for appointments.
///
/// Implementations must enforce a unique `(consultant_id, appointment_date,
/// start_time)` over non-cancelled rows and a unique `meeting_info.meeting_id`,
/// rejecting violations with [`StoreError::Duplicate`].
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn create(&self, appointment: Appointment) -> Result<Appointment, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Appointment>, StoreError>;

    /// Matching appointments ordered by date, then start time.
    async fn find_all(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, StoreError>;

    async fn check_time_conflict(&self, query: &ConflictQuery) -> Result<bool, StoreError>;

    /// Replaces the stored record. Fails with `NotFound` if `id` is unknown.
    async fn update_by_id(&self, id: Uuid, appointment: Appointment) -> Result<Appointment, StoreError>;

    /// Writes only `meeting_info.reminder_sent`, and only while the appointment
    /// is confirmed, still carries the same `meeting.meeting_id` and the flag
    /// reads `!sent`. Returns whether the row changed.
    async fn set_meeting_reminder_sent(&self, id: Uuid, meeting: &MeetingInfo, sent: bool) -> Result<bool, StoreError>;

    /// Writes only `feedback_reminder_sent`, and only while the appointment is
    /// completed and the flag reads `!sent`. Setting it also requires that no
    /// feedback has been left. Returns whether the row changed.
    async fn set_feedback_reminder_sent(&self, id: Uuid, sent: bool) -> Result<bool, StoreError>;

    async fn count_by_status(&self, filter: &AppointmentFilter) -> Result<StatusCounts, StoreError> {
        let mut counts = StatusCounts::default();
        for appointment in self.find_all(filter).await? {
            counts.add(appointment.status);
        }
        Ok(counts)
    }

    async fn list(&self, filter: &AppointmentFilter, pagination: Pagination) -> Result<Page<Appointment>, StoreError> {
        let all = self.find_all(filter).await?;
        let total = all.len();
        let items = all
            .into_iter()
            .skip(pagination.offset())
            .take(pagination.effective_limit())
            .collect();

        Ok(Page {
            items,
            page: pagination.page.max(1),
            limit: pagination.effective_limit() as u32,
            total,
        })
    }

    async fn find_by_customer_id(
        &self,
        customer_id: Uuid,
        status: Option<AppointmentStatus>,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let mut filter = AppointmentFilter::for_customer(customer_id).between(from, to);
        filter.statuses.extend(status);
        self.find_all(&filter).await
    }

    async fn find_by_consultant_id(
        &self,
        consultant_id: Uuid,
        status: Option<AppointmentStatus>,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let mut filter = AppointmentFilter::for_consultant(consultant_id).between(from, to);
        filter.statuses.extend(status);
        self.find_all(&filter).await
    }

    async fn find_by_consultant_and_date(
        &self,
        consultant_id: Uuid,
        date: NaiveDate,
        exclude_statuses: &[AppointmentStatus],
    ) -> Result<Vec<Appointment>, StoreError> {
        let mut filter = AppointmentFilter::for_consultant(consultant_id).between(Some(date), Some(date));
        filter.exclude_statuses = exclude_statuses.to_vec();
        self.find_all(&filter).await
    }

    async fn has_pending_for_customer(&self, customer_id: Uuid) -> Result<bool, StoreError> {
        let filter = AppointmentFilter::for_customer(customer_id).with_status(AppointmentStatus::Pending);
        Ok(!self.find_all(&filter).await?.is_empty())
    }

    async fn cancel_by_id(&self, id: Uuid, at: DateTime<Utc>) -> Result<Appointment, StoreError> {
        let mut appointment = self.find_by_id(id).await?.ok_or(StoreError::NotFound)?;
        appointment.status = AppointmentStatus::Cancelled;
        appointment.updated_at = at;
        self.update_by_id(id, appointment).await
    }

    async fn confirm_by_id(&self, id: Uuid, meeting_info: MeetingInfo, at: DateTime<Utc>) -> Result<Appointment, StoreError> {
        let mut appointment = self.find_by_id(id).await?.ok_or(StoreError::NotFound)?;
        appointment.status = AppointmentStatus::Confirmed;
        appointment.meeting_info = Some(meeting_info);
        appointment.updated_at = at;
        self.update_by_id(id, appointment).await
    }

    async fn complete_by_id(
        &self,
        id: Uuid,
        consultant_notes: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Appointment, StoreError> {
        let mut appointment = self.find_by_id(id).await?.ok_or(StoreError::NotFound)?;
        appointment.status = AppointmentStatus::Completed;
        appointment.video_call_status = VideoCallStatus::Ended;
        appointment.completed_at = Some(at);
        appointment.updated_at = at;
        if consultant_notes.is_some() {
            appointment.consultant_notes = consultant_notes;
        }
        self.update_by_id(id, appointment).await
    }

    async fn find_confirmed_on(&self, dates: &[NaiveDate]) -> Result<Vec<Appointment>, StoreError> {
        let mut found = Vec::new();
        for &date in dates {
            let filter = AppointmentFilter::default()
                .with_status(AppointmentStatus::Confirmed)
                .between(Some(date), Some(date));
            found.extend(self.find_all(&filter).await?);
        }
        Ok(found)
    }

    /// Completed appointments with `from <= completed_at < before`.
    async fn find_completed_between(
        &self,
        from: DateTime<Utc>,
        before: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let filter = AppointmentFilter {
            completed_from: Some(from),
            completed_before: Some(before),
            ..AppointmentFilter::default()
        }
        .with_status(AppointmentStatus::Completed);
        self.find_all(&filter).await
    }
}

// ==============================================================================
// IN-MEMORY STORE
// ==============================================================================

#[derive(Default)]
pub struct InMemoryAppointmentStore {
    appointments: RwLock<HashMap<Uuid, Appointment>>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.appointments.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.appointments.read().await.is_empty()
    }

    /// Inserts without index checks, for seeding fixtures.
    pub async fn insert_raw(&self, appointment: Appointment) {
        self.appointments.write().await.insert(appointment.id, appointment);
    }

    fn check_indexes(rows: &HashMap<Uuid, Appointment>, candidate: &Appointment) -> Result<(), StoreError> {
        for other in rows.values().filter(|a| a.id != candidate.id) {
            let same_slot = candidate.status != AppointmentStatus::Cancelled
                && other.status != AppointmentStatus::Cancelled
                && other.consultant_id == candidate.consultant_id
                && other.appointment_date == candidate.appointment_date
                && other.start_time == candidate.start_time;
            if same_slot {
                return Err(StoreError::Duplicate(format!(
                    "consultant {} already booked on {} at {}",
                    candidate.consultant_id, candidate.appointment_date, candidate.start_time
                )));
            }

            let meeting_id = |a: &Appointment| a.meeting_info.as_ref().map(|m| m.meeting_id.clone());
            if meeting_id(candidate).is_some() && meeting_id(candidate) == meeting_id(other) {
                return Err(StoreError::Duplicate("meeting_id already in use".to_string()));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn create(&self, appointment: Appointment) -> Result<Appointment, StoreError> {
        let mut rows = self.appointments.write().await;
        if rows.contains_key(&appointment.id) {
            return Err(StoreError::Duplicate(format!("appointment {} exists", appointment.id)));
        }
        Self::check_indexes(&rows, &appointment)?;
        rows.insert(appointment.id, appointment.clone());
        debug!("Stored appointment {}", appointment.id);
        Ok(appointment)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        Ok(self.appointments.read().await.get(&id).cloned())
    }

    async fn find_all(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, StoreError> {
        let rows = self.appointments.read().await;
        let mut found: Vec<Appointment> = rows.values().filter(|a| filter.matches(a)).cloned().collect();
        found.sort_by_key(|a| (a.appointment_date, a.start_time, a.created_at));
        Ok(found)
    }

    async fn check_time_conflict(&self, query: &ConflictQuery) -> Result<bool, StoreError> {
        let rows = self.appointments.read().await;
        Ok(rows.values().any(|existing| query.is_blocked_by(existing)))
    }

    async fn update_by_id(&self, id: Uuid, mut appointment: Appointment) -> Result<Appointment, StoreError> {
        let mut rows = self.appointments.write().await;
        if !rows.contains_key(&id) {
            return Err(StoreError::NotFound);
        }
        appointment.id = id;
        Self::check_indexes(&rows, &appointment)?;
        rows.insert(id, appointment.clone());
        Ok(appointment)
    }

    async fn set_meeting_reminder_sent(&self, id: Uuid, meeting: &MeetingInfo, sent: bool) -> Result<bool, StoreError> {
        let mut rows = self.appointments.write().await;
        let Some(appointment) = rows.get_mut(&id) else {
            return Ok(false);
        };
        if appointment.status != AppointmentStatus::Confirmed {
            return Ok(false);
        }
        match appointment.meeting_info.as_mut() {
            Some(stored) if stored.meeting_id == meeting.meeting_id && stored.reminder_sent != sent => {
                stored.reminder_sent = sent;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_feedback_reminder_sent(&self, id: Uuid, sent: bool) -> Result<bool, StoreError> {
        let mut rows = self.appointments.write().await;
        let Some(appointment) = rows.get_mut(&id) else {
            return Ok(false);
        };
        let eligible = appointment.status == AppointmentStatus::Completed
            && appointment.feedback_reminder_sent != sent
            && !(sent && appointment.feedback.is_some());
        if eligible {
            appointment.feedback_reminder_sent = sent;
        }
        Ok(eligible)
    }
}
