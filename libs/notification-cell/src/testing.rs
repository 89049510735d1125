//! Senders and providers for exercising notification paths in tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};

use crate::models::{MeetingDetails, MeetingError, MeetingRequest, NotificationData, NotificationError, NotificationKind};
use crate::services::meeting::MeetingLinkProvider;
use crate::services::notifier::NotificationSender;

#[derive(Debug, Clone, PartialEq)]
pub struct SentNotification {
    pub kind: NotificationKind,
    pub data: NotificationData,
}

/// Records every notification instead of delivering it.
#[derive(Default)]
pub struct RecordingNotificationSender {
    sent: Mutex<Vec<SentNotification>>,
}

impl RecordingNotificationSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    pub fn count(&self, kind_name: &str) -> usize {
        self.sent().iter().filter(|n| n.kind.to_string() == kind_name).count()
    }

    /// Polls until at least `expected` notifications arrived or `timeout` passes.
    pub async fn wait_for(&self, expected: usize, timeout: Duration) -> Vec<SentNotification> {
        let deadline = Instant::now() + timeout;
        loop {
            let sent = self.sent();
            if sent.len() >= expected || Instant::now() >= deadline {
                return sent;
            }
            sleep(Duration::from_millis(10)).await;
        }
    }

    fn record(&self, kind: NotificationKind, data: &NotificationData) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(SentNotification {
                kind,
                data: data.clone(),
            });
        }
    }
}

#[async_trait]
impl NotificationSender for RecordingNotificationSender {
    async fn send_confirmation(&self, data: &NotificationData) -> Result<(), NotificationError> {
        self.record(NotificationKind::Confirmation, data);
        Ok(())
    }

    async fn send_cancellation(&self, data: &NotificationData, cancelled_by: &str) -> Result<(), NotificationError> {
        self.record(
            NotificationKind::Cancellation {
                cancelled_by: cancelled_by.to_string(),
            },
            data,
        );
        Ok(())
    }

    async fn send_meeting_reminder(&self, data: &NotificationData, minutes_before: i64) -> Result<(), NotificationError> {
        self.record(NotificationKind::MeetingReminder { minutes_before }, data);
        Ok(())
    }

    async fn send_feedback_reminder(&self, data: &NotificationData) -> Result<(), NotificationError> {
        self.record(NotificationKind::FeedbackReminder, data);
        Ok(())
    }
}

/// Fails every delivery, or only deliveries for one appointment.
#[derive(Default)]
pub struct FailingNotificationSender {
    only_for: Option<uuid::Uuid>,
    inner: RecordingNotificationSender,
}

impl FailingNotificationSender {
    pub fn always() -> Self {
        Self::default()
    }

    pub fn for_appointment(appointment_id: uuid::Uuid) -> Self {
        Self {
            only_for: Some(appointment_id),
            inner: RecordingNotificationSender::new(),
        }
    }

    /// Notifications that went through.
    pub fn delivered(&self) -> Vec<SentNotification> {
        self.inner.sent()
    }

    fn check(&self, data: &NotificationData) -> Result<(), NotificationError> {
        match self.only_for {
            Some(id) if id != data.appointment_id => Ok(()),
            _ => Err(NotificationError::Delivery("transport unavailable".to_string())),
        }
    }
}

#[async_trait]
impl NotificationSender for FailingNotificationSender {
    async fn send_confirmation(&self, data: &NotificationData) -> Result<(), NotificationError> {
        self.check(data)?;
        self.inner.send_confirmation(data).await
    }

    async fn send_cancellation(&self, data: &NotificationData, cancelled_by: &str) -> Result<(), NotificationError> {
        self.check(data)?;
        self.inner.send_cancellation(data, cancelled_by).await
    }

    async fn send_meeting_reminder(&self, data: &NotificationData, minutes_before: i64) -> Result<(), NotificationError> {
        self.check(data)?;
        self.inner.send_meeting_reminder(data, minutes_before).await
    }

    async fn send_feedback_reminder(&self, data: &NotificationData) -> Result<(), NotificationError> {
        self.check(data)?;
        self.inner.send_feedback_reminder(data).await
    }
}

/// A meeting provider that is always down.
#[derive(Debug, Default)]
pub struct UnavailableMeetingProvider;

#[async_trait]
impl MeetingLinkProvider for UnavailableMeetingProvider {
    async fn generate_meeting_link(&self, _request: &MeetingRequest) -> Result<MeetingDetails, MeetingError> {
        Err(MeetingError::Provider("provider unavailable".to_string()))
    }
}
