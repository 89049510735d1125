// libs/appointment-cell/src/services/booking.rs
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use notification_cell::{
    Contact, ContactDirectory, InMemoryContactDirectory, MeetingLinkService, MeetingRequest, NotificationDispatcher,
    NotificationKind, SupabaseContactDirectory, TracingNotificationSender,
};
use schedule_cell::{SupabaseScheduleStore, WeeklyScheduleStore};
use shared_config::AppConfig;
use shared_models::auth::{Actor, UserRole};
use shared_models::error::StoreError;
use shared_utils::clock::{Clock, SystemClock};

use crate::models::{
    Appointment, AppointmentChange, AppointmentError, AppointmentFilter, AppointmentHistory, AppointmentStatus,
    AppointmentValidationRules, BookRequest, Feedback, FeedbackRequest, HistoryAction, MeetingInfo, NotesUpdate,
    OperationWarning, Outcome, Page, Pagination, RescheduleRequest, StatusChangeRequest, StatusCounts,
    UpdateAppointmentRequest, VideoCallStatus,
};
use crate::services::history::{HistoryRecorder, HistoryStore};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::locks::KeyedLocks;
use crate::services::notify::{notification_data, resolve_contacts};
use crate::services::postgrest::{SupabaseAppointmentStore, SupabaseHistoryStore};
use crate::services::scheduling::{LeadTime, SchedulingEngine, SlotRequest};
use crate::services::store::AppointmentStore;

/// Appointment lifecycle controller: booking, transitions, notes, feedback
/// and read access, with authorization and audit on every mutation.
pub struct AppointmentBookingService {
    appointments: Arc<dyn AppointmentStore>,
    schedules: Arc<dyn WeeklyScheduleStore>,
    engine: SchedulingEngine,
    lifecycle_service: AppointmentLifecycleService,
    history: HistoryRecorder,
    meetings: Arc<MeetingLinkService>,
    notifier: NotificationDispatcher,
    contacts: Arc<dyn ContactDirectory>,
    clock: Arc<dyn Clock>,
    consultant_locks: KeyedLocks,
    customer_locks: KeyedLocks,
}

impl AppointmentBookingService {
    /// Placeholder meeting links, tracing-only notifications and an empty
    /// contact directory until the `with_*` builders replace them.
    pub fn new(
        appointments: Arc<dyn AppointmentStore>,
        schedules: Arc<dyn WeeklyScheduleStore>,
        history: Arc<dyn HistoryStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let rules = AppointmentValidationRules::default();
        let engine = SchedulingEngine::new(Arc::clone(&schedules), Arc::clone(&appointments), rules);

        Self {
            appointments,
            schedules,
            engine,
            lifecycle_service: AppointmentLifecycleService::new(),
            history: HistoryRecorder::new(history),
            meetings: Arc::new(MeetingLinkService::placeholder_only("https://meet.google.com")),
            notifier: NotificationDispatcher::new(Arc::new(TracingNotificationSender)),
            contacts: Arc::new(InMemoryContactDirectory::new()),
            clock,
            consultant_locks: KeyedLocks::new(),
            customer_locks: KeyedLocks::new(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            Arc::new(SupabaseAppointmentStore::new(config)),
            Arc::new(SupabaseScheduleStore::new(config)),
            Arc::new(SupabaseHistoryStore::new(config)),
            Arc::new(SystemClock),
        )
        .with_rules(AppointmentValidationRules::from_config(config))
        .with_meetings(Arc::new(MeetingLinkService::from_config(config)))
        .with_notifier(NotificationDispatcher::from_config(config))
        .with_contacts(Arc::new(SupabaseContactDirectory::new(config)))
    }

    pub fn with_rules(mut self, rules: AppointmentValidationRules) -> Self {
        self.engine = SchedulingEngine::new(Arc::clone(&self.schedules), Arc::clone(&self.appointments), rules);
        self
    }

    pub fn with_meetings(mut self, meetings: Arc<MeetingLinkService>) -> Self {
        self.meetings = meetings;
        self
    }

    pub fn with_notifier(mut self, notifier: NotificationDispatcher) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_contacts(mut self, contacts: Arc<dyn ContactDirectory>) -> Self {
        self.contacts = contacts;
        self
    }

    pub fn engine(&self) -> &SchedulingEngine {
        &self.engine
    }

    pub fn store(&self) -> Arc<dyn AppointmentStore> {
        Arc::clone(&self.appointments)
    }

    // ==============================================================================
    // BOOKING
    // ==============================================================================

    #[instrument(skip(self, actor, request), fields(actor = %actor.user_id, consultant = %request.consultant_id))]
    pub async fn book(&self, actor: &Actor, request: BookRequest) -> Result<Outcome<Appointment>, AppointmentError> {
        let customer_id = booking_customer(actor, request.customer_id)?;
        self.validate_notes_length(request.customer_notes.as_deref())?;

        // Customer lock first, then consultant: one ordering everywhere.
        let _customer_guard = self.customer_locks.lock(customer_id).await;
        let _consultant_guard = self.consultant_locks.lock(request.consultant_id).await;
        let now = self.clock.now();

        if self.appointments.has_pending_for_customer(customer_id).await? {
            warn!("Customer {} already has a pending appointment", customer_id);
            return Err(AppointmentError::PendingAppointmentExists);
        }

        let slot = SlotRequest {
            consultant_id: request.consultant_id,
            date: request.appointment_date,
            start: request.start_time,
            end: request.end_time,
        };
        self.engine.validate_booking(slot, now, LeadTime::Enforce, None).await?;

        let appointment = Appointment {
            id: Uuid::new_v4(),
            customer_id,
            consultant_id: request.consultant_id,
            appointment_date: request.appointment_date,
            start_time: request.start_time,
            end_time: request.end_time,
            status: AppointmentStatus::Pending,
            customer_notes: request.customer_notes,
            consultant_notes: None,
            meeting_info: None,
            video_call_status: VideoCallStatus::NotStarted,
            feedback: None,
            feedback_reminder_sent: false,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };

        let created = self.appointments.create(appointment).await.map_err(slot_write_error)?;
        info!(
            "Appointment {} booked for customer {} with consultant {} on {} {}-{}",
            created.id, customer_id, created.consultant_id, created.appointment_date, created.start_time, created.end_time
        );

        let mut warnings = Vec::new();
        warnings.extend(self.history.record(HistoryAction::Created, actor, None, &created, now).await);
        Ok(Outcome::with_warnings(created, warnings))
    }

    // ==============================================================================
    // STATUS TRANSITIONS
    // ==============================================================================

    /// The meeting link is generated before the consultant lock is taken, so a
    /// slow provider never blocks other bookings. The transition is re-checked
    /// under the lock.
    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub async fn confirm(&self, actor: &Actor, appointment_id: Uuid) -> Result<Outcome<Appointment>, AppointmentError> {
        let snapshot = self.load(appointment_id).await?;
        self.check_transition(actor, &snapshot, AppointmentStatus::Confirmed)?;
        let mut warnings = Vec::new();

        let (customer, consultant) = self.resolve_contacts(&snapshot, &mut warnings).await;

        let zone = self.engine.rules().zone;
        let mut generated = self.meetings.generate(&meeting_request(&snapshot, &customer, &consultant, zone)).await;

        let (_guard, current) = self.load_locked(appointment_id).await?;
        self.check_transition(actor, &current, AppointmentStatus::Confirmed)?;
        if !same_slot(&current, &snapshot) {
            debug!("Appointment {} moved while its meeting was generated, regenerating", appointment_id);
            generated = self.meetings.generate(&meeting_request(&current, &customer, &consultant, zone)).await;
        }
        let now = self.clock.now();

        if let Some(reason) = generated.fallback_reason {
            warnings.push(OperationWarning::MeetingProviderFallback { message: reason });
        }
        let meeting_info = MeetingInfo {
            meet_url: generated.details.meet_url,
            meeting_id: generated.details.meeting_id,
            meeting_password: generated.details.meeting_password,
            created_at: now,
            reminder_sent: false,
        };

        let confirmed = self
            .appointments
            .confirm_by_id(appointment_id, meeting_info, now)
            .await
            .map_err(|e| log_store_error("Confirm", appointment_id, e))?;
        info!("Appointment {} confirmed by {}", appointment_id, actor.user_id);

        warnings.extend(
            self.history
                .record(HistoryAction::Confirmed, actor, Some(&current), &confirmed, now)
                .await,
        );

        self.notifier.dispatch(
            NotificationKind::Confirmation,
            notification_data(&confirmed, &customer, &consultant),
        );

        Ok(Outcome::with_warnings(confirmed, warnings))
    }

    #[instrument(skip(self, actor, reason), fields(actor = %actor.user_id))]
    pub async fn cancel(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
        reason: Option<String>,
    ) -> Result<Outcome<Appointment>, AppointmentError> {
        let (_guard, current) = self.load_locked(appointment_id).await?;
        self.check_transition(actor, &current, AppointmentStatus::Cancelled)?;
        let now = self.clock.now();
        self.engine.validate_cancellation(&current, actor, now)?;

        let cancelled = self
            .appointments
            .cancel_by_id(appointment_id, now)
            .await
            .map_err(|e| log_store_error("Cancel", appointment_id, e))?;
        info!(
            "Appointment {} cancelled by {} ({}){}",
            appointment_id,
            actor.user_id,
            actor.role,
            reason.map(|r| format!(": {}", r)).unwrap_or_default()
        );

        let mut warnings = Vec::new();
        warnings.extend(
            self.history
                .record(HistoryAction::Cancelled, actor, Some(&current), &cancelled, now)
                .await,
        );

        let (customer, consultant) = self.resolve_contacts(&cancelled, &mut warnings).await;
        self.notifier.dispatch(
            NotificationKind::Cancellation {
                cancelled_by: cancelled_by_label(actor.role).to_string(),
            },
            notification_data(&cancelled, &customer, &consultant),
        );

        Ok(Outcome::with_warnings(cancelled, warnings))
    }

    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub async fn start(&self, actor: &Actor, appointment_id: Uuid) -> Result<Outcome<Appointment>, AppointmentError> {
        let (_guard, current) = self.load_locked(appointment_id).await?;
        self.check_transition(actor, &current, AppointmentStatus::InProgress)?;
        let now = self.clock.now();

        let mut next = current.clone();
        next.status = AppointmentStatus::InProgress;
        next.video_call_status = VideoCallStatus::InProgress;
        next.updated_at = now;

        let started = self
            .appointments
            .update_by_id(appointment_id, next)
            .await
            .map_err(|e| log_store_error("Start", appointment_id, e))?;
        info!("Appointment {} started by {}", appointment_id, actor.user_id);

        let warnings: Vec<_> = self
            .history
            .record(HistoryAction::Started, actor, Some(&current), &started, now)
            .await
            .into_iter()
            .collect();
        Ok(Outcome::with_warnings(started, warnings))
    }

    #[instrument(skip(self, actor, consultant_notes), fields(actor = %actor.user_id))]
    pub async fn complete(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
        consultant_notes: Option<String>,
    ) -> Result<Outcome<Appointment>, AppointmentError> {
        self.validate_notes_length(consultant_notes.as_deref())?;
        let (_guard, current) = self.load_locked(appointment_id).await?;
        self.check_transition(actor, &current, AppointmentStatus::Completed)?;
        let now = self.clock.now();

        let completed = self
            .appointments
            .complete_by_id(appointment_id, consultant_notes, now)
            .await
            .map_err(|e| log_store_error("Complete", appointment_id, e))?;
        info!("Appointment {} completed by {}", appointment_id, actor.user_id);

        let warnings: Vec<_> = self
            .history
            .record(HistoryAction::Completed, actor, Some(&current), &completed, now)
            .await
            .into_iter()
            .collect();
        Ok(Outcome::with_warnings(completed, warnings))
    }

    #[instrument(skip(self, actor, feedback), fields(actor = %actor.user_id))]
    pub async fn submit_feedback(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
        feedback: FeedbackRequest,
    ) -> Result<Outcome<Appointment>, AppointmentError> {
        if !(1..=5).contains(&feedback.rating) {
            return Err(AppointmentError::ValidationError(
                "Rating must be between 1 and 5".to_string(),
            ));
        }
        self.validate_notes_length(feedback.comment.as_deref())?;

        let (_guard, current) = self.load_locked(appointment_id).await?;
        if !current.is_customer(actor) {
            return Err(AppointmentError::PermissionDenied(
                "Only the customer can leave feedback".to_string(),
            ));
        }
        if current.status != AppointmentStatus::Completed {
            return Err(AppointmentError::ValidationError(
                "Feedback can only be submitted for completed appointments".to_string(),
            ));
        }
        if current.feedback.is_some() {
            return Err(AppointmentError::ValidationError(
                "Feedback has already been submitted".to_string(),
            ));
        }

        let now = self.clock.now();
        let mut next = current.clone();
        next.feedback = Some(Feedback {
            rating: feedback.rating,
            comment: feedback.comment,
            feedback_date: now,
        });
        next.updated_at = now;

        let updated = self
            .appointments
            .update_by_id(appointment_id, next)
            .await
            .map_err(|e| log_store_error("Feedback", appointment_id, e))?;
        info!("Feedback ({}/5) recorded for appointment {}", feedback.rating, appointment_id);

        let warnings: Vec<_> = self
            .history
            .record(HistoryAction::FeedbackSubmitted, actor, Some(&current), &updated, now)
            .await
            .into_iter()
            .collect();
        Ok(Outcome::with_warnings(updated, warnings))
    }

    // ==============================================================================
    // RESCHEDULE AND NOTES
    // ==============================================================================

    #[instrument(skip(self, actor, request), fields(actor = %actor.user_id))]
    pub async fn reschedule(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
        request: RescheduleRequest,
    ) -> Result<Outcome<Appointment>, AppointmentError> {
        let (_guard, current) = self.load_locked(appointment_id).await?;
        self.lifecycle_service.can_access(actor, &current)?;

        if !matches!(current.status, AppointmentStatus::Pending | AppointmentStatus::Confirmed) {
            return Err(AppointmentError::InvalidTransition {
                from: current.status,
                to: current.status,
            });
        }
        if current.is_customer(actor) && current.status != AppointmentStatus::Pending {
            return Err(AppointmentError::FieldNotAllowed(
                "customers can only reschedule pending appointments".to_string(),
            ));
        }
        if current.appointment_date == request.appointment_date
            && current.start_time == request.start_time
            && current.end_time == request.end_time
        {
            return Err(AppointmentError::NoChanges);
        }

        let now = self.clock.now();
        let slot = SlotRequest {
            consultant_id: current.consultant_id,
            date: request.appointment_date,
            start: request.start_time,
            end: request.end_time,
        };
        self.engine.validate_reschedule(&current, slot, actor, now).await?;

        let mut next = current.clone();
        next.appointment_date = request.appointment_date;
        next.start_time = request.start_time;
        next.end_time = request.end_time;
        if let Some(meeting) = next.meeting_info.as_mut() {
            meeting.reminder_sent = false;
        }
        next.updated_at = now;

        let rescheduled = self
            .appointments
            .update_by_id(appointment_id, next)
            .await
            .map_err(slot_write_error)?;
        info!(
            "Appointment {} rescheduled to {} {}-{}",
            appointment_id, rescheduled.appointment_date, rescheduled.start_time, rescheduled.end_time
        );

        let warnings: Vec<_> = self
            .history
            .record_change(actor, &current, &rescheduled, now)
            .await
            .into_iter()
            .collect();
        Ok(Outcome::with_warnings(rescheduled, warnings))
    }

    #[instrument(skip(self, actor, notes), fields(actor = %actor.user_id))]
    pub async fn update_notes(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
        notes: NotesUpdate,
    ) -> Result<Outcome<Appointment>, AppointmentError> {
        self.validate_notes_length(notes.customer_notes.as_deref())?;
        self.validate_notes_length(notes.consultant_notes.as_deref())?;

        let (_guard, current) = self.load_locked(appointment_id).await?;
        self.lifecycle_service.can_access(actor, &current)?;
        if current.status.is_terminal() {
            return Err(AppointmentError::ValidationError(format!(
                "Notes cannot be changed on a {} appointment",
                current.status
            )));
        }

        let customer_changed = notes
            .customer_notes
            .as_ref()
            .is_some_and(|n| Some(n) != current.customer_notes.as_ref());
        let consultant_changed = notes
            .consultant_notes
            .as_ref()
            .is_some_and(|n| Some(n) != current.consultant_notes.as_ref());

        if !customer_changed && !consultant_changed {
            return Err(AppointmentError::NoChanges);
        }
        if consultant_changed && !(current.is_assigned_consultant(actor) || actor.is_privileged()) {
            return Err(AppointmentError::FieldNotAllowed("consultant_notes".to_string()));
        }
        if customer_changed && !(current.is_customer(actor) || actor.is_privileged()) {
            return Err(AppointmentError::FieldNotAllowed("customer_notes".to_string()));
        }

        let now = self.clock.now();
        let mut next = current.clone();
        if customer_changed {
            next.customer_notes = notes.customer_notes;
        }
        if consultant_changed {
            next.consultant_notes = notes.consultant_notes;
        }
        next.updated_at = now;

        let updated = self
            .appointments
            .update_by_id(appointment_id, next)
            .await
            .map_err(|e| log_store_error("Notes update", appointment_id, e))?;
        debug!("Notes updated on appointment {}", appointment_id);

        let warnings: Vec<_> = self
            .history
            .record_change(actor, &current, &updated, now)
            .await
            .into_iter()
            .collect();
        Ok(Outcome::with_warnings(updated, warnings))
    }

    /// Loose update entry point: classify the payload, then run the matching operation.
    #[instrument(skip(self, actor, request), fields(actor = %actor.user_id))]
    pub async fn update_appointment(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
        request: UpdateAppointmentRequest,
    ) -> Result<Outcome<Appointment>, AppointmentError> {
        let current = self.load(appointment_id).await?;
        self.lifecycle_service.can_access(actor, &current)?;

        let change = classify_update(&current, &request, actor)?;
        debug!("Update on appointment {} classified as {:?}", appointment_id, change);
        self.apply_change(actor, appointment_id, change).await
    }

    pub async fn apply_change(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
        change: AppointmentChange,
    ) -> Result<Outcome<Appointment>, AppointmentError> {
        match change {
            AppointmentChange::Reschedule(request) => self.reschedule(actor, appointment_id, request).await,
            AppointmentChange::Notes(notes) => self.update_notes(actor, appointment_id, notes).await,
            AppointmentChange::StatusChange(StatusChangeRequest {
                status,
                consultant_notes,
                reason,
            }) => match status {
                AppointmentStatus::Confirmed => self.confirm(actor, appointment_id).await,
                AppointmentStatus::Cancelled => self.cancel(actor, appointment_id, reason).await,
                AppointmentStatus::InProgress => self.start(actor, appointment_id).await,
                AppointmentStatus::Completed => self.complete(actor, appointment_id, consultant_notes).await,
                AppointmentStatus::Pending => {
                    let current = self.load(appointment_id).await?;
                    Err(AppointmentError::InvalidTransition {
                        from: current.status,
                        to: AppointmentStatus::Pending,
                    })
                }
            },
        }
    }

    // ==============================================================================
    // QUERIES
    // ==============================================================================

    pub async fn get_appointment(&self, actor: &Actor, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        let appointment = self.load(appointment_id).await?;
        self.lifecycle_service.can_access(actor, &appointment)?;
        Ok(appointment)
    }

    pub async fn list_for_customer(
        &self,
        actor: &Actor,
        customer_id: Uuid,
        status: Option<AppointmentStatus>,
        pagination: Pagination,
    ) -> Result<Page<Appointment>, AppointmentError> {
        if actor.user_id != customer_id && !actor.is_privileged() {
            return Err(AppointmentError::PermissionDenied(
                "You can only view your own appointments".to_string(),
            ));
        }
        let mut filter = AppointmentFilter::for_customer(customer_id);
        filter.statuses.extend(status);
        Ok(self.appointments.list(&filter, pagination).await?)
    }

    pub async fn list_for_consultant(
        &self,
        actor: &Actor,
        consultant_id: Uuid,
        status: Option<AppointmentStatus>,
        pagination: Pagination,
    ) -> Result<Page<Appointment>, AppointmentError> {
        if actor.user_id != consultant_id && !actor.is_privileged() {
            return Err(AppointmentError::PermissionDenied(
                "You can only view your own appointments".to_string(),
            ));
        }
        let mut filter = AppointmentFilter::for_consultant(consultant_id);
        filter.statuses.extend(status);
        Ok(self.appointments.list(&filter, pagination).await?)
    }

    pub async fn list_all(
        &self,
        actor: &Actor,
        filter: AppointmentFilter,
        pagination: Pagination,
    ) -> Result<Page<Appointment>, AppointmentError> {
        require_privileged(actor, "list all appointments")?;
        Ok(self.appointments.list(&filter, pagination).await?)
    }

    /// Status counts. Customers and consultants only see their own appointments.
    pub async fn stats(&self, actor: &Actor, mut filter: AppointmentFilter) -> Result<StatusCounts, AppointmentError> {
        match actor.role {
            UserRole::Customer => filter.customer_id = Some(actor.user_id),
            UserRole::Consultant => filter.consultant_id = Some(actor.user_id),
            UserRole::Staff | UserRole::Admin => {}
        }
        Ok(self.appointments.count_by_status(&filter).await?)
    }

    pub async fn appointment_history(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
    ) -> Result<Vec<AppointmentHistory>, AppointmentError> {
        let appointment = self.load(appointment_id).await?;
        self.lifecycle_service.can_access(actor, &appointment)?;
        Ok(self.history.store().find_by_appointment(appointment_id).await?)
    }

    /// A user's most recent audit entries, newest first. Users see their own;
    /// staff and admin see anyone's.
    pub async fn user_activity(
        &self,
        actor: &Actor,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<AppointmentHistory>, AppointmentError> {
        if actor.user_id != user_id && !actor.is_privileged() {
            return Err(AppointmentError::PermissionDenied(
                "You can only view your own activity".to_string(),
            ));
        }
        let limit = limit.clamp(1, Pagination::MAX_LIMIT as usize);
        Ok(self.history.store().find_by_actor(user_id, limit).await?)
    }

    /// Audit entries per action within `from..=to`.
    pub async fn history_stats(
        &self,
        actor: &Actor,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<BTreeMap<HistoryAction, usize>, AppointmentError> {
        require_privileged(actor, "view history statistics")?;
        if from > to {
            return Err(AppointmentError::ValidationError(
                "Statistics range starts after it ends".to_string(),
            ));
        }
        Ok(self.history.store().action_counts(from, to).await?)
    }

    // ==============================================================================
    // HELPERS
    // ==============================================================================

    async fn load(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.appointments
            .find_by_id(appointment_id)
            .await
            .map_err(|e| log_store_error("Lookup", appointment_id, e))?
            .ok_or(AppointmentError::NotFound)
    }

    /// Takes the consultant lock and re-reads the appointment under it.
    async fn load_locked(&self, appointment_id: Uuid) -> Result<(OwnedMutexGuard<()>, Appointment), AppointmentError> {
        let consultant_id = self.load(appointment_id).await?.consultant_id;
        let guard = self.consultant_locks.lock(consultant_id).await;
        let appointment = self.load(appointment_id).await?;
        Ok((guard, appointment))
    }

    fn check_transition(
        &self,
        actor: &Actor,
        appointment: &Appointment,
        target: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        self.lifecycle_service.validate_status_transition(appointment.status, target)?;
        self.lifecycle_service.authorize_transition(actor, appointment, target)
    }

    fn validate_notes_length(&self, notes: Option<&str>) -> Result<(), AppointmentError> {
        let max = self.engine.rules().max_notes_length;
        match notes {
            Some(text) if text.chars().count() > max => Err(AppointmentError::ValidationError(format!(
                "Notes cannot exceed {} characters",
                max
            ))),
            _ => Ok(()),
        }
    }

    async fn resolve_contacts(
        &self,
        appointment: &Appointment,
        warnings: &mut Vec<OperationWarning>,
    ) -> (Contact, Contact) {
        resolve_contacts(self.contacts.as_ref(), appointment, warnings).await
    }
}

/// Decides which single change a loose update payload expresses.
///
/// Fields equal to the current value are ignored. A status change may carry
/// consultant notes (completion notes) but nothing else; a date or time change
/// may not be mixed with notes or status.
pub fn classify_update(
    current: &Appointment,
    request: &UpdateAppointmentRequest,
    actor: &Actor,
) -> Result<AppointmentChange, AppointmentError> {
    let status = request.status.filter(|s| *s != current.status);
    let date = request.appointment_date.unwrap_or(current.appointment_date);
    let start = request.start_time.unwrap_or(current.start_time);
    let end = request.end_time.unwrap_or(current.end_time);
    let time_changed = date != current.appointment_date || start != current.start_time || end != current.end_time;
    let customer_notes = request
        .customer_notes
        .clone()
        .filter(|n| Some(n) != current.customer_notes.as_ref());
    let consultant_notes = request
        .consultant_notes
        .clone()
        .filter(|n| Some(n) != current.consultant_notes.as_ref());

    if status.is_none() && !time_changed && customer_notes.is_none() && consultant_notes.is_none() {
        return Err(AppointmentError::NoChanges);
    }

    if current.is_customer(actor) && !actor.is_privileged() {
        if consultant_notes.is_some() {
            return Err(AppointmentError::FieldNotAllowed("consultant_notes".to_string()));
        }
        if status.is_some_and(|s| s != AppointmentStatus::Cancelled) {
            return Err(AppointmentError::FieldNotAllowed("status".to_string()));
        }
        if time_changed && current.status != AppointmentStatus::Pending {
            return Err(AppointmentError::FieldNotAllowed("appointment_date".to_string()));
        }
    }

    if let Some(status) = status {
        if time_changed || customer_notes.is_some() {
            return Err(AppointmentError::ValidationError(
                "A status change cannot be combined with other changes".to_string(),
            ));
        }
        return Ok(AppointmentChange::StatusChange(StatusChangeRequest {
            status,
            consultant_notes,
            reason: None,
        }));
    }

    if time_changed {
        if customer_notes.is_some() || consultant_notes.is_some() {
            return Err(AppointmentError::ValidationError(
                "Rescheduling cannot be combined with note changes".to_string(),
            ));
        }
        return Ok(AppointmentChange::Reschedule(RescheduleRequest {
            appointment_date: date,
            start_time: start,
            end_time: end,
        }));
    }

    Ok(AppointmentChange::Notes(NotesUpdate {
        customer_notes,
        consultant_notes,
    }))
}

fn booking_customer(actor: &Actor, requested: Option<Uuid>) -> Result<Uuid, AppointmentError> {
    match actor.role {
        UserRole::Customer => match requested {
            Some(id) if id != actor.user_id => Err(AppointmentError::PermissionDenied(
                "Customers can only book for themselves".to_string(),
            )),
            _ => Ok(actor.user_id),
        },
        UserRole::Staff | UserRole::Admin => requested.ok_or_else(|| {
            AppointmentError::ValidationError("customer_id is required when booking on behalf of a customer".to_string())
        }),
        UserRole::Consultant => Err(AppointmentError::PermissionDenied(
            "Consultants cannot book appointments".to_string(),
        )),
    }
}

fn meeting_request(appointment: &Appointment, customer: &Contact, consultant: &Contact, zone: FixedOffset) -> MeetingRequest {
    MeetingRequest {
        title: format!("Consultation with {}", display_or(&consultant.name, "your consultant")),
        start: appointment.starts_at(zone),
        end: appointment.ends_at(zone),
        attendee_emails: [&customer.email, &consultant.email]
            .into_iter()
            .filter(|email| !email.is_empty())
            .cloned()
            .collect(),
    }
}

fn same_slot(a: &Appointment, b: &Appointment) -> bool {
    (a.appointment_date, a.start_time, a.end_time) == (b.appointment_date, b.start_time, b.end_time)
}

fn require_privileged(actor: &Actor, action: &str) -> Result<(), AppointmentError> {
    if actor.is_privileged() {
        Ok(())
    } else {
        Err(AppointmentError::PermissionDenied(format!("Only staff or admin can {}", action)))
    }
}

fn cancelled_by_label(role: UserRole) -> &'static str {
    match role {
        UserRole::Customer => "customer",
        UserRole::Consultant => "consultant",
        UserRole::Staff | UserRole::Admin => "staff",
    }
}

fn slot_write_error(err: StoreError) -> AppointmentError {
    match err {
        StoreError::Duplicate(detail) => {
            warn!("Slot claimed concurrently: {}", detail);
            AppointmentError::SlotTaken
        }
        other => {
            error!("Appointment write failed: {}", other);
            AppointmentError::from(other)
        }
    }
}

fn log_store_error(operation: &str, appointment_id: Uuid, err: StoreError) -> AppointmentError {
    if !matches!(err, StoreError::NotFound) {
        error!("{} failed for appointment {}: {}", operation, appointment_id, err);
    }
    AppointmentError::from(err)
}

fn display_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() {
        fallback
    } else {
        value
    }
}
