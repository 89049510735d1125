use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use shared_models::auth::{Actor, UserRole};
use shared_models::error::StoreError;
use shared_utils::clock::Clock;
use shared_utils::time::{week_end, week_start};

use crate::models::{
    CreateScheduleRequest, ScheduleCreator, ScheduleError, UpdateScheduleRequest, WeeklySchedule,
    DEFAULT_SLOT_DURATION, MAX_SCHEDULE_NOTES_LENGTH, MAX_SLOT_DURATION, MIN_SLOT_DURATION,
};
use crate::services::store::{day_start, WeeklyScheduleStore};

/// Staff-facing management of consultant weekly schedules.
pub struct ScheduleService {
    store: Arc<dyn WeeklyScheduleStore>,
    clock: Arc<dyn Clock>,
}

impl ScheduleService {
    pub fn new(store: Arc<dyn WeeklyScheduleStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> Arc<dyn WeeklyScheduleStore> {
        Arc::clone(&self.store)
    }

    #[instrument(skip(self, actor, request), fields(consultant_id = %request.consultant_id))]
    pub async fn create_schedule(
        &self,
        actor: &Actor,
        request: CreateScheduleRequest,
    ) -> Result<WeeklySchedule, ScheduleError> {
        require_staff(actor, "create weekly schedules")?;

        let slot_duration = request.default_slot_duration.unwrap_or(DEFAULT_SLOT_DURATION);
        validate_slot_duration(slot_duration)?;
        validate_notes(request.notes.as_deref())?;
        request.working_days.validate()?;

        let week_start_at = week_start(day_start(request.week_start_date));
        self.ensure_week_free(request.consultant_id, week_start_at.date_naive(), None)
            .await?;

        let mut working_days = request.working_days;
        working_days.fill_missing_with_defaults();

        let now = self.clock.now();
        let schedule = WeeklySchedule {
            id: Uuid::new_v4(),
            consultant_id: request.consultant_id,
            week_start_date: week_start_at,
            week_end_date: week_end(week_start_at),
            working_days,
            default_slot_duration: slot_duration,
            created_by: creator_of(actor),
            notes: request.notes,
            created_at: now,
            updated_at: now,
        };

        let created = self
            .store
            .create(schedule)
            .await
            .map_err(|e| duplicate_or_database(e, request.consultant_id, week_start_at.date_naive()))?;

        info!(
            "Created weekly schedule {} for consultant {} (week of {})",
            created.id,
            created.consultant_id,
            created.week_start_day()
        );
        Ok(created)
    }

    #[instrument(skip(self, actor, request))]
    pub async fn update_schedule(
        &self,
        actor: &Actor,
        schedule_id: Uuid,
        request: UpdateScheduleRequest,
    ) -> Result<WeeklySchedule, ScheduleError> {
        require_staff(actor, "update weekly schedules")?;

        let mut schedule = self.get_schedule(schedule_id).await?;

        if let Some(duration) = request.default_slot_duration {
            validate_slot_duration(duration)?;
            schedule.default_slot_duration = duration;
        }

        if request.notes.is_some() {
            validate_notes(request.notes.as_deref())?;
            schedule.notes = request.notes;
        }

        if let Some(mut working_days) = request.working_days {
            working_days.validate()?;
            working_days.fill_missing_with_defaults();
            schedule.working_days = working_days;
        }

        if let Some(date) = request.week_start_date {
            let week_start_at = week_start(day_start(date));
            if week_start_at != schedule.week_start_date {
                self.ensure_week_free(schedule.consultant_id, week_start_at.date_naive(), Some(schedule_id))
                    .await?;
                debug!(
                    "Moving schedule {} from week {} to {}",
                    schedule_id,
                    schedule.week_start_day(),
                    week_start_at.date_naive()
                );
                schedule.week_start_date = week_start_at;
                schedule.week_end_date = week_end(week_start_at);
            }
        }

        schedule.updated_at = self.clock.now();

        let consultant_id = schedule.consultant_id;
        let week = schedule.week_start_day();
        let updated = self
            .store
            .update_by_id(schedule_id, schedule)
            .await
            .map_err(|e| duplicate_or_database(e, consultant_id, week))?;

        info!("Updated weekly schedule {}", schedule_id);
        Ok(updated)
    }

    #[instrument(skip(self, actor))]
    pub async fn delete_schedule(&self, actor: &Actor, schedule_id: Uuid) -> Result<(), ScheduleError> {
        if actor.role != UserRole::Admin {
            warn!("User {} ({}) attempted to delete schedule {}", actor.user_id, actor.role, schedule_id);
            return Err(ScheduleError::PermissionDenied(
                "Only admins can delete weekly schedules".to_string(),
            ));
        }

        let deleted = self.store.delete_by_id(schedule_id).await.map_err(|e| {
            error!("Failed to delete schedule {}: {}", schedule_id, e);
            ScheduleError::from(e)
        })?;

        if !deleted {
            return Err(ScheduleError::NotFound);
        }

        info!("Deleted weekly schedule {}", schedule_id);
        Ok(())
    }

    pub async fn get_schedule(&self, schedule_id: Uuid) -> Result<WeeklySchedule, ScheduleError> {
        self.store
            .find_by_id(schedule_id)
            .await?
            .ok_or(ScheduleError::NotFound)
    }

    /// The schedule governing `date` for a consultant, if any.
    pub async fn find_for_date(
        &self,
        consultant_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<WeeklySchedule>, ScheduleError> {
        Ok(self.store.find_by_consultant_and_date(consultant_id, date).await?)
    }

    pub async fn list_consultant_schedules(
        &self,
        consultant_id: Uuid,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<WeeklySchedule>, ScheduleError> {
        let from = from.map(|d| week_start(day_start(d)));
        let to = to.map(day_start);
        Ok(self.store.find_by_consultant_in_range(consultant_id, from, to).await?)
    }

    /// Clone a schedule's working days into another week for the same consultant.
    #[instrument(skip(self, actor))]
    pub async fn copy_schedule(
        &self,
        actor: &Actor,
        source_id: Uuid,
        target_week: NaiveDate,
    ) -> Result<WeeklySchedule, ScheduleError> {
        require_staff(actor, "copy weekly schedules")?;

        let source = self.get_schedule(source_id).await?;
        let request = CreateScheduleRequest {
            consultant_id: source.consultant_id,
            week_start_date: target_week,
            working_days: source.working_days,
            default_slot_duration: Some(source.default_slot_duration),
            notes: source.notes,
        };

        let copy = self.create_schedule(actor, request).await?;
        info!("Copied schedule {} into {}", source_id, copy.id);
        Ok(copy)
    }

    async fn ensure_week_free(
        &self,
        consultant_id: Uuid,
        week_start_day: NaiveDate,
        exclude_id: Option<Uuid>,
    ) -> Result<(), ScheduleError> {
        let exists = self
            .store
            .exists_by_consultant_and_week(consultant_id, day_start(week_start_day), exclude_id)
            .await?;

        if exists {
            warn!(
                "Consultant {} already has a schedule for week of {}",
                consultant_id, week_start_day
            );
            return Err(ScheduleError::DuplicateWeek {
                consultant_id,
                week_start: week_start_day,
            });
        }
        Ok(())
    }
}

fn require_staff(actor: &Actor, action: &str) -> Result<(), ScheduleError> {
    if actor.is_privileged() {
        return Ok(());
    }
    warn!("User {} ({}) attempted to {}", actor.user_id, actor.role, action);
    Err(ScheduleError::PermissionDenied(format!("Only staff or admin can {}", action)))
}

fn creator_of(actor: &Actor) -> ScheduleCreator {
    ScheduleCreator {
        user_id: actor.user_id,
        name: actor.display_name(),
        role: actor.role,
    }
}

fn validate_slot_duration(minutes: u16) -> Result<(), ScheduleError> {
    if !(MIN_SLOT_DURATION..=MAX_SLOT_DURATION).contains(&minutes) {
        return Err(ScheduleError::ValidationError(format!(
            "Default slot duration must be between {} and {} minutes",
            MIN_SLOT_DURATION, MAX_SLOT_DURATION
        )));
    }
    Ok(())
}

fn validate_notes(notes: Option<&str>) -> Result<(), ScheduleError> {
    if notes.is_some_and(|n| n.chars().count() > MAX_SCHEDULE_NOTES_LENGTH) {
        return Err(ScheduleError::ValidationError(format!(
            "Notes cannot exceed {} characters",
            MAX_SCHEDULE_NOTES_LENGTH
        )));
    }
    Ok(())
}

fn duplicate_or_database(err: StoreError, consultant_id: Uuid, week_start: NaiveDate) -> ScheduleError {
    match err {
        StoreError::Duplicate(_) => ScheduleError::DuplicateWeek { consultant_id, week_start },
        other => {
            error!("Weekly schedule store failure: {}", other);
            ScheduleError::from(other)
        }
    }
}
