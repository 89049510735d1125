use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use shared_config::AppConfig;

use crate::models::{NotificationData, NotificationError, NotificationKind};

/// Outbound customer and consultant messaging.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send_confirmation(&self, data: &NotificationData) -> Result<(), NotificationError>;

    async fn send_cancellation(&self, data: &NotificationData, cancelled_by: &str) -> Result<(), NotificationError>;

    async fn send_meeting_reminder(&self, data: &NotificationData, minutes_before: i64) -> Result<(), NotificationError>;

    async fn send_feedback_reminder(&self, data: &NotificationData) -> Result<(), NotificationError>;
}

/// Writes each notification to the log. Used when no delivery transport is configured.
#[derive(Debug, Default)]
pub struct TracingNotificationSender;

#[async_trait]
impl NotificationSender for TracingNotificationSender {
    async fn send_confirmation(&self, data: &NotificationData) -> Result<(), NotificationError> {
        info!(
            "Confirmation for appointment {} to {} <{}>: {} {}-{} with {}",
            data.appointment_id,
            data.customer_name,
            data.customer_email,
            data.appointment_date,
            data.start_time,
            data.end_time,
            data.consultant_name
        );
        Ok(())
    }

    async fn send_cancellation(&self, data: &NotificationData, cancelled_by: &str) -> Result<(), NotificationError> {
        info!(
            "Cancellation for appointment {} to <{}>, cancelled by {}",
            data.appointment_id, data.customer_email, cancelled_by
        );
        Ok(())
    }

    async fn send_meeting_reminder(&self, data: &NotificationData, minutes_before: i64) -> Result<(), NotificationError> {
        info!(
            "Reminder for appointment {} to <{}>: starts in {} minutes",
            data.appointment_id, data.customer_email, minutes_before
        );
        Ok(())
    }

    async fn send_feedback_reminder(&self, data: &NotificationData) -> Result<(), NotificationError> {
        info!(
            "Feedback reminder for appointment {} to <{}>",
            data.appointment_id, data.customer_email
        );
        Ok(())
    }
}

/// Posts `{kind, ..., data}` JSON to a mail relay or automation webhook.
pub struct WebhookNotificationSender {
    client: Client,
    url: String,
}

impl WebhookNotificationSender {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }

    async fn post(&self, kind: NotificationKind, data: &NotificationData) -> Result<(), NotificationError> {
        let mut payload = serde_json::to_value(&kind)
            .map_err(|e| NotificationError::Delivery(e.to_string()))?;
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("data".to_string(), json!(data));
        }

        debug!("Posting {} notification for {} to {}", kind, data.appointment_id, self.url);
        let response = self.client.post(&self.url).json(&payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Notification webhook returned {}: {}", status, body);
            return Err(NotificationError::Delivery(format!("HTTP {}: {}", status, body)));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationSender for WebhookNotificationSender {
    async fn send_confirmation(&self, data: &NotificationData) -> Result<(), NotificationError> {
        self.post(NotificationKind::Confirmation, data).await
    }

    async fn send_cancellation(&self, data: &NotificationData, cancelled_by: &str) -> Result<(), NotificationError> {
        self.post(
            NotificationKind::Cancellation {
                cancelled_by: cancelled_by.to_string(),
            },
            data,
        )
        .await
    }

    async fn send_meeting_reminder(&self, data: &NotificationData, minutes_before: i64) -> Result<(), NotificationError> {
        self.post(NotificationKind::MeetingReminder { minutes_before }, data).await
    }

    async fn send_feedback_reminder(&self, data: &NotificationData) -> Result<(), NotificationError> {
        self.post(NotificationKind::FeedbackReminder, data).await
    }
}

/// Routes a [`NotificationKind`] to the matching sender method.
#[derive(Clone)]
pub struct NotificationDispatcher {
    sender: Arc<dyn NotificationSender>,
}

impl NotificationDispatcher {
    pub fn new(sender: Arc<dyn NotificationSender>) -> Self {
        Self { sender }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        if config.is_notification_webhook_configured() {
            Self::new(Arc::new(WebhookNotificationSender::new(config.notification_webhook_url.clone())))
        } else {
            Self::new(Arc::new(TracingNotificationSender))
        }
    }

    /// Deliver and wait for the outcome.
    pub async fn send(&self, kind: &NotificationKind, data: &NotificationData) -> Result<(), NotificationError> {
        match kind {
            NotificationKind::Confirmation => self.sender.send_confirmation(data).await,
            NotificationKind::Cancellation { cancelled_by } => {
                self.sender.send_cancellation(data, cancelled_by).await
            }
            NotificationKind::MeetingReminder { minutes_before } => {
                self.sender.send_meeting_reminder(data, *minutes_before).await
            }
            NotificationKind::FeedbackReminder => self.sender.send_feedback_reminder(data).await,
        }
    }

    /// Fire-and-forget delivery. Failures are logged and never reach the caller.
    pub fn dispatch(&self, kind: NotificationKind, data: NotificationData) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.send(&kind, &data).await {
                error!(
                    "Failed to send {} notification for appointment {}: {}",
                    kind, data.appointment_id, e
                );
            }
        })
    }
}
