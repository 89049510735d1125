use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_models::error::StoreError;

use crate::models::WeeklySchedule;

/// Persistence seam for weekly schedules.
///
/// Implementations must reject a second schedule for the same
/// `(consultant_id, week_start_date)` with [`StoreError::Duplicate`].
#[async_trait]
pub trait WeeklyScheduleStore: Send + Sync {
    async fn create(&self, schedule: WeeklySchedule) -> Result<WeeklySchedule, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<WeeklySchedule>, StoreError>;

    /// Replaces the stored record. Fails with `NotFound` if `id` is unknown.
    async fn update_by_id(&self, id: Uuid, schedule: WeeklySchedule) -> Result<WeeklySchedule, StoreError>;

    async fn delete_by_id(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn find_by_consultant_and_week(
        &self,
        consultant_id: Uuid,
        week_start: DateTime<Utc>,
    ) -> Result<Option<WeeklySchedule>, StoreError>;

    /// Any schedule whose `[week_start_date, week_end_date]` contains `at`.
    async fn find_covering(
        &self,
        consultant_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<WeeklySchedule>, StoreError>;

    async fn exists_by_consultant_and_week(
        &self,
        consultant_id: Uuid,
        week_start: DateTime<Utc>,
        exclude_id: Option<Uuid>,
    ) -> Result<bool, StoreError>;

    async fn find_by_consultant_in_range(
        &self,
        consultant_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<WeeklySchedule>, StoreError>;

    /// Exact week match first, then a range lookup for records whose
    /// `week_start_date` is not Monday-aligned.
    async fn find_by_consultant_and_date(
        &self,
        consultant_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<WeeklySchedule>, StoreError> {
        let midnight = day_start(date);
        let week_start = shared_utils::time::week_start(midnight);

        if let Some(schedule) = self.find_by_consultant_and_week(consultant_id, week_start).await? {
            return Ok(Some(schedule));
        }

        debug!(
            "No exact week match for consultant {} on {}, trying range lookup",
            consultant_id, date
        );
        self.find_covering(consultant_id, midnight).await
    }
}

pub(crate) fn day_start(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

#[derive(Default)]
pub struct InMemoryScheduleStore {
    schedules: RwLock<HashMap<Uuid, WeeklySchedule>>,
}

impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn clashes(existing: &HashMap<Uuid, WeeklySchedule>, candidate: &WeeklySchedule) -> bool {
        existing.values().any(|s| {
            s.id != candidate.id
                && s.consultant_id == candidate.consultant_id
                && s.week_start_date == candidate.week_start_date
        })
    }
}

#[async_trait]
impl WeeklyScheduleStore for InMemoryScheduleStore {
    async fn create(&self, schedule: WeeklySchedule) -> Result<WeeklySchedule, StoreError> {
        let mut schedules = self.schedules.write().await;
        if Self::clashes(&schedules, &schedule) {
            return Err(StoreError::Duplicate(format!(
                "weekly schedule for consultant {} starting {}",
                schedule.consultant_id, schedule.week_start_date
            )));
        }
        schedules.insert(schedule.id, schedule.clone());
        Ok(schedule)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<WeeklySchedule>, StoreError> {
        Ok(self.schedules.read().await.get(&id).cloned())
    }

    async fn update_by_id(&self, id: Uuid, mut schedule: WeeklySchedule) -> Result<WeeklySchedule, StoreError> {
        let mut schedules = self.schedules.write().await;
        if !schedules.contains_key(&id) {
            return Err(StoreError::NotFound);
        }
        schedule.id = id;
        if Self::clashes(&schedules, &schedule) {
            return Err(StoreError::Duplicate(format!(
                "weekly schedule for consultant {} starting {}",
                schedule.consultant_id, schedule.week_start_date
            )));
        }
        schedules.insert(id, schedule.clone());
        Ok(schedule)
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.schedules.write().await.remove(&id).is_some())
    }

    async fn find_by_consultant_and_week(
        &self,
        consultant_id: Uuid,
        week_start: DateTime<Utc>,
    ) -> Result<Option<WeeklySchedule>, StoreError> {
        Ok(self
            .schedules
            .read()
            .await
            .values()
            .find(|s| s.consultant_id == consultant_id && s.week_start_date == week_start)
            .cloned())
    }

    async fn find_covering(
        &self,
        consultant_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<WeeklySchedule>, StoreError> {
        Ok(self
            .schedules
            .read()
            .await
            .values()
            .find(|s| s.consultant_id == consultant_id && s.covers(at))
            .cloned())
    }

    async fn exists_by_consultant_and_week(
        &self,
        consultant_id: Uuid,
        week_start: DateTime<Utc>,
        exclude_id: Option<Uuid>,
    ) -> Result<bool, StoreError> {
        Ok(self.schedules.read().await.values().any(|s| {
            s.consultant_id == consultant_id
                && s.week_start_date == week_start
                && Some(s.id) != exclude_id
        }))
    }

    async fn find_by_consultant_in_range(
        &self,
        consultant_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<WeeklySchedule>, StoreError> {
        let mut found: Vec<WeeklySchedule> = self
            .schedules
            .read()
            .await
            .values()
            .filter(|s| s.consultant_id == consultant_id)
            .filter(|s| from.map_or(true, |from| s.week_start_date >= from))
            .filter(|s| to.map_or(true, |to| s.week_start_date <= to))
            .cloned()
            .collect();
        found.sort_by_key(|s| s.week_start_date);
        Ok(found)
    }
}
