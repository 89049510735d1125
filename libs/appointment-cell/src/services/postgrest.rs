// libs/appointment-cell/src/services/postgrest.rs
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::{filter_timestamp, SupabaseClient};
use shared_models::error::StoreError;

use crate::models::{
    Appointment, AppointmentFilter, AppointmentHistory, AppointmentStatus, HistoryAction, MeetingInfo,
};
use crate::services::conflict::ConflictQuery;
use crate::services::history::HistoryStore;
use crate::services::store::AppointmentStore;

const APPOINTMENTS: &str = "/rest/v1/appointments";
const HISTORY: &str = "/rest/v1/appointment_history";

/// `appointments` table behind PostgREST. The table carries a partial unique
/// index on `(consultant_id, appointment_date, start_time) where status <> 'cancelled'`
/// and a unique index on `meeting_info->>meeting_id`; violations come back as 409.
pub struct SupabaseAppointmentStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseAppointmentStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    pub fn with_client(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn select(&self, query: &str) -> Result<Vec<Appointment>, StoreError> {
        let path = format!("{}?{}", APPOINTMENTS, query);
        debug!("Querying appointments: {}", path);
        let rows: Vec<Appointment> = self.supabase.request(Method::GET, &path, None, None).await?;
        Ok(rows)
    }

    async fn write(&self, method: Method, path: &str, body: Value) -> Result<Option<Appointment>, StoreError> {
        let rows: Vec<Appointment> = self
            .supabase
            .request_with_headers(method, path, None, Some(body), Some(SupabaseClient::representation_headers()))
            .await?;
        Ok(rows.into_iter().next())
    }
}

fn status_list(statuses: &[AppointmentStatus]) -> String {
    statuses.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(",")
}

/// PostgREST query string for a filter, ordered by date then start time.
pub fn filter_query(filter: &AppointmentFilter) -> String {
    let mut parts = Vec::new();
    if let Some(id) = filter.customer_id {
        parts.push(format!("customer_id=eq.{}", id));
    }
    if let Some(id) = filter.consultant_id {
        parts.push(format!("consultant_id=eq.{}", id));
    }
    if !filter.statuses.is_empty() {
        parts.push(format!("status=in.({})", status_list(&filter.statuses)));
    }
    if !filter.exclude_statuses.is_empty() {
        parts.push(format!("status=not.in.({})", status_list(&filter.exclude_statuses)));
    }
    if let Some(from) = filter.date_from {
        parts.push(format!("appointment_date=gte.{}", from));
    }
    if let Some(to) = filter.date_to {
        parts.push(format!("appointment_date=lte.{}", to));
    }
    if let Some(from) = filter.completed_from {
        parts.push(format!("completed_at=gte.{}", filter_timestamp(from)));
    }
    if let Some(before) = filter.completed_before {
        parts.push(format!("completed_at=lt.{}", filter_timestamp(before)));
    }
    parts.push("order=appointment_date.asc,start_time.asc".to_string());
    parts.join("&")
}

#[async_trait]
impl AppointmentStore for SupabaseAppointmentStore {
    async fn create(&self, appointment: Appointment) -> Result<Appointment, StoreError> {
        let body = serde_json::to_value(&appointment)?;
        self.write(Method::POST, APPOINTMENTS, body).await?.ok_or_else(|| {
            error!("Insert into appointments returned no rows");
            StoreError::Unavailable("insert returned no representation".to_string())
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        Ok(self.select(&format!("id=eq.{}&limit=1", id)).await?.into_iter().next())
    }

    async fn find_all(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, StoreError> {
        self.select(&filter_query(filter)).await
    }

    async fn check_time_conflict(&self, query: &ConflictQuery) -> Result<bool, StoreError> {
        let path = format!("{}?{}", APPOINTMENTS, query.to_postgrest_query());
        let rows: Vec<Value> = self.supabase.request(Method::GET, &path, None, None).await?;
        Ok(!rows.is_empty())
    }

    async fn update_by_id(&self, id: Uuid, appointment: Appointment) -> Result<Appointment, StoreError> {
        let mut body = serde_json::to_value(&appointment)?;
        if let Some(obj) = body.as_object_mut() {
            obj.remove("id");
            obj.remove("created_at");
        }
        let path = format!("{}?id=eq.{}", APPOINTMENTS, id);
        self.write(Method::PATCH, &path, body).await?.ok_or(StoreError::NotFound)
    }

    async fn set_meeting_reminder_sent(&self, id: Uuid, meeting: &MeetingInfo, sent: bool) -> Result<bool, StoreError> {
        // PostgREST cannot patch one key of a json column, so the object is
        // rewritten guarded by its identity and the current flag value.
        let mut meeting = meeting.clone();
        meeting.reminder_sent = sent;
        let path = format!(
            "{}?id=eq.{}&status=eq.{}&meeting_info->>meeting_id=eq.{}&meeting_info->>reminder_sent=eq.{}",
            APPOINTMENTS,
            id,
            AppointmentStatus::Confirmed,
            meeting.meeting_id,
            !sent
        );
        let body = json!({ "meeting_info": meeting });
        let changed = self.write(Method::PATCH, &path, body).await?.is_some();
        debug!("Meeting reminder flag on {} set to {}: {}", id, sent, changed);
        Ok(changed)
    }

    async fn set_feedback_reminder_sent(&self, id: Uuid, sent: bool) -> Result<bool, StoreError> {
        let mut path = format!(
            "{}?id=eq.{}&status=eq.{}&feedback_reminder_sent=is.{}",
            APPOINTMENTS,
            id,
            AppointmentStatus::Completed,
            !sent
        );
        if sent {
            path.push_str("&feedback=is.null");
        }
        let body = json!({ "feedback_reminder_sent": sent });
        let changed = self.write(Method::PATCH, &path, body).await?.is_some();
        debug!("Feedback reminder flag on {} set to {}: {}", id, sent, changed);
        Ok(changed)
    }
}

// ==============================================================================
// HISTORY
// ==============================================================================

pub struct SupabaseHistoryStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseHistoryStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    pub fn with_client(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn select(&self, query: &str) -> Result<Vec<AppointmentHistory>, StoreError> {
        let path = format!("{}?{}", HISTORY, query);
        let rows: Vec<AppointmentHistory> = self.supabase.request(Method::GET, &path, None, None).await?;
        Ok(rows)
    }
}

#[derive(Deserialize)]
struct ActionRow {
    action: HistoryAction,
}

#[async_trait]
impl HistoryStore for SupabaseHistoryStore {
    async fn append(&self, entry: AppointmentHistory) -> Result<(), StoreError> {
        let body = serde_json::to_value(&entry)?;
        let _: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                HISTORY,
                None,
                Some(body),
                Some(SupabaseClient::representation_headers()),
            )
            .await?;
        Ok(())
    }

    async fn find_by_appointment(&self, appointment_id: Uuid) -> Result<Vec<AppointmentHistory>, StoreError> {
        self.select(&format!("appointment_id=eq.{}&order=timestamp.asc", appointment_id))
            .await
    }

    async fn find_by_actor(&self, user_id: Uuid, limit: usize) -> Result<Vec<AppointmentHistory>, StoreError> {
        self.select(&format!(
            "performed_by_user_id=eq.{}&order=timestamp.desc&limit={}",
            user_id, limit
        ))
        .await
    }

    async fn action_counts(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<BTreeMap<HistoryAction, usize>, StoreError> {
        let path = format!(
            "{}?select=action&timestamp=gte.{}&timestamp=lte.{}",
            HISTORY,
            filter_timestamp(from),
            filter_timestamp(to)
        );
        let rows: Vec<ActionRow> = self.supabase.request(Method::GET, &path, None, None).await?;

        let mut counts = BTreeMap::new();
        for row in rows {
            *counts.entry(row.action).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
