// libs/appointment-cell/src/services/history.rs
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_models::auth::Actor;
use shared_models::error::StoreError;

use crate::models::{Appointment, AppointmentHistory, AppointmentStatus, HistoryAction, OperationWarning};

/// Append-only audit log.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, entry: AppointmentHistory) -> Result<(), StoreError>;

    /// Entries for one appointment, oldest first.
    async fn find_by_appointment(&self, appointment_id: Uuid) -> Result<Vec<AppointmentHistory>, StoreError>;

    /// Most recent entries performed by a user, newest first.
    async fn find_by_actor(&self, user_id: Uuid, limit: usize) -> Result<Vec<AppointmentHistory>, StoreError>;

    /// Entries per action with `from <= timestamp <= to`.
    async fn action_counts(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<BTreeMap<HistoryAction, usize>, StoreError>;
}

#[derive(Default)]
pub struct InMemoryHistoryStore {
    entries: RwLock<Vec<AppointmentHistory>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<AppointmentHistory> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, entry: AppointmentHistory) -> Result<(), StoreError> {
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn find_by_appointment(&self, appointment_id: Uuid) -> Result<Vec<AppointmentHistory>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|e| e.appointment_id == appointment_id)
            .cloned()
            .collect())
    }

    async fn find_by_actor(&self, user_id: Uuid, limit: usize) -> Result<Vec<AppointmentHistory>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .rev()
            .filter(|e| e.performed_by_user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn action_counts(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<BTreeMap<HistoryAction, usize>, StoreError> {
        let entries = self.entries.read().await;
        let mut counts = BTreeMap::new();
        for entry in entries.iter().filter(|e| e.timestamp >= from && e.timestamp <= to) {
            *counts.entry(entry.action).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

/// Infers the history action for a generic update: a status change wins,
/// then a date or time change, then anything else.
pub fn classify_change(old: &Appointment, new: &Appointment) -> HistoryAction {
    if old.status != new.status {
        return match new.status {
            AppointmentStatus::Confirmed => HistoryAction::Confirmed,
            AppointmentStatus::Cancelled => HistoryAction::Cancelled,
            AppointmentStatus::Completed => HistoryAction::Completed,
            AppointmentStatus::InProgress => HistoryAction::Started,
            AppointmentStatus::Pending => HistoryAction::Updated,
        };
    }

    if old.appointment_date != new.appointment_date
        || old.start_time != new.start_time
        || old.end_time != new.end_time
    {
        return HistoryAction::Rescheduled;
    }

    HistoryAction::Updated
}

/// Best-effort history writer. A failed write becomes a warning and never
/// fails the operation being recorded.
#[derive(Clone)]
pub struct HistoryRecorder {
    store: Arc<dyn HistoryStore>,
}

impl HistoryRecorder {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<dyn HistoryStore> {
        Arc::clone(&self.store)
    }

    /// Records a generic update under the action [`classify_change`] infers.
    pub async fn record_change(
        &self,
        actor: &Actor,
        old: &Appointment,
        new: &Appointment,
        at: DateTime<Utc>,
    ) -> Option<OperationWarning> {
        self.record(classify_change(old, new), actor, Some(old), new, at).await
    }

    pub async fn record(
        &self,
        action: HistoryAction,
        actor: &Actor,
        old: Option<&Appointment>,
        new: &Appointment,
        at: DateTime<Utc>,
    ) -> Option<OperationWarning> {
        let entry = AppointmentHistory {
            id: Uuid::new_v4(),
            appointment_id: new.id,
            action,
            timestamp: at,
            performed_by_user_id: actor.user_id,
            performed_by_role: actor.role,
            old_data: old.and_then(|a| serde_json::to_value(a).ok()),
            new_data: serde_json::to_value(new).ok(),
        };

        match self.store.append(entry).await {
            Ok(()) => {
                debug!("Recorded '{}' for appointment {}", action, new.id);
                None
            }
            Err(e) => {
                warn!("Failed to record '{}' history for appointment {}: {}", action, new.id, e);
                Some(OperationWarning::HistoryWriteFailed {
                    action,
                    message: e.to_string(),
                })
            }
        }
    }
}
