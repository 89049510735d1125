use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, error};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::{filter_timestamp, SupabaseClient};
use shared_models::error::StoreError;

use crate::models::WeeklySchedule;
use crate::services::store::WeeklyScheduleStore;

const TABLE: &str = "/rest/v1/weekly_schedules";

/// `weekly_schedules` table behind PostgREST. The table carries a unique
/// index on `(consultant_id, week_start_date)`; violations come back as 409.
pub struct SupabaseScheduleStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseScheduleStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    pub fn with_client(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn select(&self, query: &str) -> Result<Vec<WeeklySchedule>, StoreError> {
        let path = format!("{}?{}", TABLE, query);
        debug!("Querying weekly schedules: {}", path);
        let rows: Vec<WeeklySchedule> = self
            .supabase
            .request(Method::GET, &path, None, None)
            .await?;
        Ok(rows)
    }

    async fn select_one(&self, query: &str) -> Result<Option<WeeklySchedule>, StoreError> {
        Ok(self.select(&format!("{}&limit=1", query)).await?.into_iter().next())
    }

    async fn write(&self, method: Method, path: &str, body: Option<Value>) -> Result<Vec<WeeklySchedule>, StoreError> {
        let rows: Vec<WeeklySchedule> = self
            .supabase
            .request_with_headers(method, path, None, body, Some(SupabaseClient::representation_headers()))
            .await?;
        Ok(rows)
    }
}

#[async_trait]
impl WeeklyScheduleStore for SupabaseScheduleStore {
    async fn create(&self, schedule: WeeklySchedule) -> Result<WeeklySchedule, StoreError> {
        let body = serde_json::to_value(&schedule)?;
        self.write(Method::POST, TABLE, Some(body))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                error!("Insert into weekly_schedules returned no rows");
                StoreError::Unavailable("insert returned no representation".to_string())
            })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<WeeklySchedule>, StoreError> {
        self.select_one(&format!("id=eq.{}", id)).await
    }

    async fn update_by_id(&self, id: Uuid, schedule: WeeklySchedule) -> Result<WeeklySchedule, StoreError> {
        let mut body = serde_json::to_value(&schedule)?;
        if let Some(obj) = body.as_object_mut() {
            obj.remove("id");
        }
        let path = format!("{}?id=eq.{}", TABLE, id);
        self.write(Method::PATCH, &path, Some(body))
            .await?
            .into_iter()
            .next()
            .ok_or(StoreError::NotFound)
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<bool, StoreError> {
        let path = format!("{}?id=eq.{}", TABLE, id);
        Ok(!self.write(Method::DELETE, &path, None).await?.is_empty())
    }

    async fn find_by_consultant_and_week(
        &self,
        consultant_id: Uuid,
        week_start: DateTime<Utc>,
    ) -> Result<Option<WeeklySchedule>, StoreError> {
        self.select_one(&format!(
            "consultant_id=eq.{}&week_start_date=eq.{}",
            consultant_id,
            filter_timestamp(week_start)
        ))
        .await
    }

    async fn find_covering(
        &self,
        consultant_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<WeeklySchedule>, StoreError> {
        let at = filter_timestamp(at);
        self.select_one(&format!(
            "consultant_id=eq.{}&week_start_date=lte.{}&week_end_date=gte.{}",
            consultant_id, at, at
        ))
        .await
    }

    async fn exists_by_consultant_and_week(
        &self,
        consultant_id: Uuid,
        week_start: DateTime<Utc>,
        exclude_id: Option<Uuid>,
    ) -> Result<bool, StoreError> {
        let mut path = format!(
            "{}?select=id&consultant_id=eq.{}&week_start_date=eq.{}",
            TABLE,
            consultant_id,
            filter_timestamp(week_start)
        );
        if let Some(exclude_id) = exclude_id {
            path.push_str(&format!("&id=neq.{}", exclude_id));
        }

        let rows: Vec<Value> = self.supabase.request(Method::GET, &path, None, None).await?;
        Ok(!rows.is_empty())
    }

    async fn find_by_consultant_in_range(
        &self,
        consultant_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<WeeklySchedule>, StoreError> {
        let mut query = format!("consultant_id=eq.{}", consultant_id);
        if let Some(from) = from {
            query.push_str(&format!("&week_start_date=gte.{}", filter_timestamp(from)));
        }
        if let Some(to) = to {
            query.push_str(&format!("&week_start_date=lte.{}", filter_timestamp(to)));
        }
        query.push_str("&order=week_start_date.asc");
        self.select(&query).await
    }
}
