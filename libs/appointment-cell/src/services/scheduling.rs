// libs/appointment-cell/src/services/scheduling.rs
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use schedule_cell::{WeeklySchedule, WeeklyScheduleStore};
use shared_models::auth::Actor;
use shared_utils::time::{self, ClockTime};

use crate::models::{Appointment, AppointmentError, AppointmentValidationRules};
use crate::services::conflict::ConflictQuery;
use crate::services::store::AppointmentStore;

/// Whether the minimum-notice rule applies to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadTime {
    Enforce,
    Exempt,
}

impl LeadTime {
    /// Staff and admin skip the lead-time rule when moving an existing appointment.
    pub fn for_reschedule(actor: &Actor) -> Self {
        if actor.is_privileged() {
            LeadTime::Exempt
        } else {
            LeadTime::Enforce
        }
    }
}

/// A proposed slot for one consultant.
#[derive(Debug, Clone, Copy)]
pub struct SlotRequest {
    pub consultant_id: Uuid,
    pub date: NaiveDate,
    pub start: ClockTime,
    pub end: ClockTime,
}

/// Booking rules: duration, lead time, working hours, breaks and conflicts.
/// Reads stores, never writes them.
pub struct SchedulingEngine {
    schedules: Arc<dyn WeeklyScheduleStore>,
    appointments: Arc<dyn AppointmentStore>,
    rules: AppointmentValidationRules,
}

impl SchedulingEngine {
    pub fn new(
        schedules: Arc<dyn WeeklyScheduleStore>,
        appointments: Arc<dyn AppointmentStore>,
        rules: AppointmentValidationRules,
    ) -> Self {
        Self {
            schedules,
            appointments,
            rules,
        }
    }

    pub fn rules(&self) -> &AppointmentValidationRules {
        &self.rules
    }

    #[instrument(skip(self))]
    pub async fn validate_booking(
        &self,
        request: SlotRequest,
        now: DateTime<Utc>,
        lead_time: LeadTime,
        exclude_id: Option<Uuid>,
    ) -> Result<(), AppointmentError> {
        self.validate_duration(request.start, request.end)?;

        if lead_time == LeadTime::Enforce {
            self.validate_lead_time(request.date, request.start, now)?;
        }

        let schedule = self
            .schedules
            .find_by_consultant_and_date(request.consultant_id, request.date)
            .await
            .map_err(|e| {
                error!("Schedule lookup failed for consultant {}: {}", request.consultant_id, e);
                AppointmentError::from(e)
            })?;
        check_working_day(schedule.as_ref(), request.date, request.start, request.end)?;

        let mut query = ConflictQuery::new(request.consultant_id, request.date, request.start, request.end);
        query.exclude_id = exclude_id;
        if self.appointments.check_time_conflict(&query).await? {
            warn!(
                "Slot {}-{} on {} already booked for consultant {}",
                request.start, request.end, request.date, request.consultant_id
            );
            return Err(AppointmentError::SlotTaken);
        }

        debug!("Booking request validated for consultant {}", request.consultant_id);
        Ok(())
    }

    /// Staff and admin may cancel at any time; everyone else needs the
    /// cancellation window of notice.
    pub fn validate_cancellation(
        &self,
        appointment: &Appointment,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<(), AppointmentError> {
        if actor.is_privileged() {
            return Ok(());
        }

        let notice = appointment.starts_at(self.rules.zone) - now;
        if notice < Duration::hours(self.rules.allowed_cancellation_hours) {
            warn!(
                "Cancellation of appointment {} refused, only {} minutes before start",
                appointment.id,
                notice.num_minutes()
            );
            return Err(AppointmentError::TooLateToCancel {
                hours: self.rules.allowed_cancellation_hours,
            });
        }
        Ok(())
    }

    /// Booking validation for a new slot, ignoring the appointment's own current slot.
    pub async fn validate_reschedule(
        &self,
        appointment: &Appointment,
        request: SlotRequest,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<(), AppointmentError> {
        self.validate_booking(request, now, LeadTime::for_reschedule(actor), Some(appointment.id))
            .await
    }

    pub fn validate_duration(&self, start: ClockTime, end: ClockTime) -> Result<(), AppointmentError> {
        if start >= end {
            return Err(AppointmentError::ValidationError(
                "Start time must be before end time".to_string(),
            ));
        }

        let duration = start.minutes_until(end);
        if duration < self.rules.min_appointment_duration {
            return Err(AppointmentError::ValidationError(format!(
                "Appointment must be at least {} minutes long",
                self.rules.min_appointment_duration
            )));
        }
        if duration > self.rules.max_appointment_duration {
            return Err(AppointmentError::ValidationError(format!(
                "Appointment cannot be longer than {} minutes",
                self.rules.max_appointment_duration
            )));
        }
        Ok(())
    }

    pub fn validate_lead_time(
        &self,
        date: NaiveDate,
        start: ClockTime,
        now: DateTime<Utc>,
    ) -> Result<(), AppointmentError> {
        let starts_at = time::to_utc(date, start, self.rules.zone);
        if starts_at - now < Duration::hours(self.rules.min_advance_booking_hours) {
            warn!("Lead time violated: {} starts at {}, now {}", date, starts_at, now);
            return Err(AppointmentError::LeadTimeViolation {
                hours: self.rules.min_advance_booking_hours,
            });
        }
        Ok(())
    }
}

/// Working-hours check against the schedule governing `date`.
pub fn check_working_day(
    schedule: Option<&WeeklySchedule>,
    date: NaiveDate,
    start: ClockTime,
    end: ClockTime,
) -> Result<(), AppointmentError> {
    let schedule = schedule.ok_or(AppointmentError::NoSchedule { date })?;

    let weekday = time::weekday_name(date);
    let working = match schedule.working_days.get(weekday) {
        Some(day) if day.is_available => day,
        _ => {
            return Err(AppointmentError::DayUnavailable {
                weekday: weekday.to_string(),
            })
        }
    };

    if !working.contains(start, end) {
        return Err(AppointmentError::OutsideWorkingHours {
            start: working.start_time,
            end: working.end_time,
        });
    }

    if let Some((break_start, break_end)) = working.break_window() {
        if working.overlaps_break(start, end) {
            return Err(AppointmentError::DuringBreak {
                start: break_start,
                end: break_end,
            });
        }
    }

    Ok(())
}
