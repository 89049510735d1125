// libs/appointment-cell/src/services/availability.rs
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use tracing::{debug, instrument};
use uuid::Uuid;

use schedule_cell::{
    generate_time_slots, mark_booked, summarize, DayAvailability, WeeklyAvailability, WeeklySchedule,
    WeeklyScheduleStore,
};
use shared_utils::time::{self, ClockTime};

use crate::models::{Appointment, AppointmentError, AppointmentFilter, AppointmentStatus};
use crate::services::store::AppointmentStore;

/// Bookable slots derived from weekly schedules and existing appointments.
pub struct AvailabilityService {
    schedules: Arc<dyn WeeklyScheduleStore>,
    appointments: Arc<dyn AppointmentStore>,
}

impl AvailabilityService {
    pub fn new(schedules: Arc<dyn WeeklyScheduleStore>, appointments: Arc<dyn AppointmentStore>) -> Self {
        Self {
            schedules,
            appointments,
        }
    }

    #[instrument(skip(self))]
    pub async fn available_slots(
        &self,
        consultant_id: Uuid,
        date: NaiveDate,
    ) -> Result<DayAvailability, AppointmentError> {
        let schedule = self.schedules.find_by_consultant_and_date(consultant_id, date).await?;
        let booked = self
            .appointments
            .find_by_consultant_and_date(consultant_id, date, &[AppointmentStatus::Cancelled])
            .await?;

        Ok(build_day(schedule.as_ref(), date, &booked))
    }

    #[instrument(skip(self))]
    pub async fn weekly_availability(
        &self,
        consultant_id: Uuid,
        week_of: NaiveDate,
    ) -> Result<WeeklyAvailability, AppointmentError> {
        let monday = time::week_start_date(week_of);
        let sunday = time::week_end_date(week_of);

        let schedule = self.schedules.find_by_consultant_and_date(consultant_id, monday).await?;
        let mut filter = AppointmentFilter::for_consultant(consultant_id).between(Some(monday), Some(sunday));
        filter.exclude_statuses.push(AppointmentStatus::Cancelled);
        let booked = self.appointments.find_all(&filter).await?;

        let days: Vec<DayAvailability> = (0..7)
            .map(|offset| {
                let date = monday + Duration::days(offset);
                let on_day: Vec<Appointment> = booked
                    .iter()
                    .filter(|a| a.appointment_date == date)
                    .cloned()
                    .collect();
                build_day(schedule.as_ref(), date, &on_day)
            })
            .collect();

        let summary = summarize(&days);
        debug!(
            "Consultant {} has {} of {} slots free in week of {}",
            consultant_id, summary.available_slots, summary.total_slots, monday
        );

        Ok(WeeklyAvailability {
            consultant_id,
            week_start_date: monday,
            week_end_date: sunday,
            days,
            summary,
        })
    }
}

fn build_day(schedule: Option<&WeeklySchedule>, date: NaiveDate, booked: &[Appointment]) -> DayAvailability {
    let working = schedule
        .and_then(|s| s.working_days.for_date(date).map(|day| (s, day)))
        .filter(|(_, day)| day.is_available);

    let Some((schedule, day)) = working else {
        return DayAvailability {
            date,
            day_of_week: time::weekday_name(date).to_string(),
            is_working_day: false,
            working_hours: None,
            slots: Vec::new(),
        };
    };

    let mut slots = generate_time_slots(day, schedule.default_slot_duration);
    let ranges: Vec<(ClockTime, ClockTime)> = booked.iter().map(|a| (a.start_time, a.end_time)).collect();
    mark_booked(&mut slots, &ranges);

    DayAvailability {
        date,
        day_of_week: time::weekday_name(date).to_string(),
        is_working_day: true,
        working_hours: Some(day.clone()),
        slots,
    }
}
