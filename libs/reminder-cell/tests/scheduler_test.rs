use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use tokio_test::assert_ok;
use uuid::Uuid;

use appointment_cell::{
    Appointment, AppointmentFilter, AppointmentStatus, AppointmentStore, ConflictQuery, Feedback,
    InMemoryAppointmentStore, MeetingInfo, VideoCallStatus,
};
use notification_cell::testing::{FailingNotificationSender, RecordingNotificationSender};
use notification_cell::{
    Contact, InMemoryContactDirectory, NotificationData, NotificationDispatcher, NotificationError, NotificationKind,
    NotificationSender,
};
use reminder_cell::{ReminderConfig, ReminderError, ReminderScheduler};
use shared_models::error::StoreError;
use shared_utils::clock::{Clock, FixedClock};
use shared_utils::test_utils::{reference_monday, utc};
use shared_utils::time::ClockTime;

struct Fixture {
    scheduler: Arc<ReminderScheduler>,
    store: Arc<InMemoryAppointmentStore>,
    clock: Arc<FixedClock>,
    customer_id: Uuid,
    consultant_id: Uuid,
    completed_slots: AtomicU16,
}

impl Fixture {
    async fn new(sender: Arc<dyn NotificationSender>, now: DateTime<Utc>) -> Self {
        Self::with_config(sender, now, ReminderConfig::default()).await
    }

    async fn with_config(sender: Arc<dyn NotificationSender>, now: DateTime<Utc>, config: ReminderConfig) -> Self {
        let store = Arc::new(InMemoryAppointmentStore::new());
        Self::with_store(sender, now, config, store.clone(), store).await
    }

    /// `sweep_store` is what the scheduler talks to; `store` is the backing rows.
    async fn with_store(
        sender: Arc<dyn NotificationSender>,
        now: DateTime<Utc>,
        config: ReminderConfig,
        store: Arc<InMemoryAppointmentStore>,
        sweep_store: Arc<dyn AppointmentStore>,
    ) -> Self {
        let clock = Arc::new(FixedClock::new(now));
        let contacts = Arc::new(InMemoryContactDirectory::new());

        let customer_id = Uuid::new_v4();
        let consultant_id = Uuid::new_v4();
        contacts
            .insert(Contact {
                user_id: customer_id,
                name: "Casey Customer".to_string(),
                email: "casey@example.com".to_string(),
            })
            .await;
        contacts
            .insert(Contact {
                user_id: consultant_id,
                name: "Dana Consultant".to_string(),
                email: "dana@example.com".to_string(),
            })
            .await;

        let scheduler = Arc::new(ReminderScheduler::new(
            sweep_store,
            contacts,
            NotificationDispatcher::new(sender),
            clock.clone(),
            utc_zone(),
            config,
        ));

        Self {
            scheduler,
            store,
            clock,
            customer_id,
            consultant_id,
            completed_slots: AtomicU16::new(0),
        }
    }

    async fn seed(&self, date: NaiveDate, start: ClockTime, status: AppointmentStatus) -> Appointment {
        self.seed_as(Uuid::new_v4(), date, start, status).await
    }

    async fn seed_as(&self, id: Uuid, date: NaiveDate, start: ClockTime, status: AppointmentStatus) -> Appointment {
        let now = self.clock.now();
        let end = start.checked_add_minutes(30).unwrap();
        let meeting_info = matches!(
            status,
            AppointmentStatus::Confirmed | AppointmentStatus::InProgress | AppointmentStatus::Completed
        )
        .then(|| MeetingInfo {
            meet_url: format!("https://meet.example.com/{}", Uuid::new_v4()),
            meeting_id: Uuid::new_v4().to_string(),
            meeting_password: None,
            created_at: now,
            reminder_sent: false,
        });

        let appointment = Appointment {
            id,
            customer_id: self.customer_id,
            consultant_id: self.consultant_id,
            appointment_date: date,
            start_time: start,
            end_time: end,
            status,
            customer_notes: None,
            consultant_notes: None,
            meeting_info,
            video_call_status: VideoCallStatus::NotStarted,
            feedback: None,
            feedback_reminder_sent: false,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_raw(appointment.clone()).await;
        appointment
    }

    /// Each completed appointment gets its own half-hour slot so the rows never
    /// collide on the consultant slot index.
    async fn seed_completed(&self, completed_at: DateTime<Utc>, feedback: Option<Feedback>) -> Appointment {
        let slot = self.completed_slots.fetch_add(1, Ordering::SeqCst);
        let start = ClockTime::hm(8, 0).checked_add_minutes(30 * slot).unwrap();
        let mut appointment = self
            .seed(completed_at.date_naive(), start, AppointmentStatus::Completed)
            .await;
        appointment.completed_at = Some(completed_at);
        appointment.video_call_status = VideoCallStatus::Ended;
        appointment.feedback = feedback;
        self.store.insert_raw(appointment.clone()).await;
        appointment
    }

    async fn reload(&self, id: Uuid) -> Appointment {
        self.store.find_by_id(id).await.unwrap().unwrap()
    }
}

fn utc_zone() -> FixedOffset {
    FixedOffset::east_opt(0).unwrap()
}

fn monday_at(hour: u32, minute: u32) -> DateTime<Utc> {
    utc(reference_monday(), hour, minute)
}

// ==============================================================================
// MEETING REMINDERS
// ==============================================================================

#[tokio::test]
async fn meeting_reminder_is_sent_exactly_once_across_ticks() {
    let sender = Arc::new(RecordingNotificationSender::new());
    let fx = Fixture::new(sender.clone(), monday_at(9, 45)).await;
    let appointment = fx
        .seed(reference_monday(), ClockTime::hm(10, 0), AppointmentStatus::Confirmed)
        .await;

    let first = fx.scheduler.run_tick().await;
    assert_eq!(first.meeting_reminders_sent, 1);

    fx.clock.advance(Duration::minutes(5));
    let second = fx.scheduler.run_tick().await;
    assert_eq!(second.meeting_reminders_sent, 0);

    fx.clock.advance(Duration::minutes(5));
    fx.scheduler.run_tick().await;

    let sent = sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, NotificationKind::MeetingReminder { minutes_before: 15 });
    assert_eq!(sent[0].data.appointment_id, appointment.id);
    assert_eq!(sent[0].data.customer_email, "casey@example.com");
    assert!(sent[0].data.meeting.is_some());
    assert!(fx.reload(appointment.id).await.reminder_sent());
}

#[tokio::test]
async fn appointment_enters_window_on_a_later_tick() {
    let sender = Arc::new(RecordingNotificationSender::new());
    let fx = Fixture::new(sender.clone(), monday_at(9, 30)).await;
    let appointment = fx
        .seed(reference_monday(), ClockTime::hm(10, 0), AppointmentStatus::Confirmed)
        .await;

    assert_eq!(fx.scheduler.run_tick().await.meeting_reminders_sent, 0);

    fx.clock.advance(Duration::minutes(5));
    assert_eq!(fx.scheduler.run_tick().await.meeting_reminders_sent, 0);

    fx.clock.advance(Duration::minutes(5));
    assert_eq!(fx.scheduler.run_tick().await.meeting_reminders_sent, 1);

    assert_eq!(sender.sent()[0].kind, NotificationKind::MeetingReminder { minutes_before: 20 });
    assert!(fx.reload(appointment.id).await.reminder_sent());
}

#[tokio::test]
async fn only_confirmed_appointments_get_meeting_reminders() {
    let sender = Arc::new(RecordingNotificationSender::new());
    let fx = Fixture::new(sender.clone(), monday_at(9, 45)).await;
    fx.seed(reference_monday(), ClockTime::hm(10, 0), AppointmentStatus::Pending).await;
    fx.seed(reference_monday(), ClockTime::hm(10, 0), AppointmentStatus::Cancelled).await;

    let report = fx.scheduler.run_tick().await;

    assert_eq!(report.meeting_reminders_sent, 0);
    assert!(sender.sent().is_empty());
}

#[tokio::test]
async fn window_crossing_midnight_is_observed() {
    let sender = Arc::new(RecordingNotificationSender::new());
    let fx = Fixture::new(sender.clone(), monday_at(23, 55)).await;
    let tuesday = reference_monday().succ_opt().unwrap();
    let appointment = fx.seed(tuesday, ClockTime::hm(0, 10), AppointmentStatus::Confirmed).await;

    let report = fx.scheduler.run_tick().await;

    assert_eq!(report.meeting_reminders_sent, 1);
    assert!(fx.reload(appointment.id).await.reminder_sent());
}

#[tokio::test]
async fn failed_delivery_is_isolated_and_retried() {
    let doomed_id = Uuid::new_v4();
    let sender = Arc::new(FailingNotificationSender::for_appointment(doomed_id));
    let fx = Fixture::new(sender.clone(), monday_at(9, 45)).await;

    fx.seed_as(doomed_id, reference_monday(), ClockTime::hm(10, 0), AppointmentStatus::Confirmed)
        .await;
    let healthy = fx
        .seed(reference_monday(), ClockTime::hm(10, 5), AppointmentStatus::Confirmed)
        .await;

    let report = fx.scheduler.run_tick().await;

    assert_eq!(report.meeting_reminders_sent, 1);
    assert_eq!(report.failures, 1);
    assert!(fx.reload(healthy.id).await.reminder_sent());
    assert!(!fx.reload(doomed_id).await.reminder_sent());

    let delivered = sender.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].data.appointment_id, healthy.id);

    // Still unflagged, so the next tick tries again.
    fx.clock.advance(Duration::minutes(5));
    let retry = fx.scheduler.run_tick().await;
    assert_eq!(retry.failures, 1);
    assert_eq!(retry.meeting_reminders_sent, 0);
}

// ==============================================================================
// FEEDBACK REMINDERS
// ==============================================================================

#[tokio::test]
async fn feedback_reminder_targets_completions_between_one_and_two_days_ago() {
    let sender = Arc::new(RecordingNotificationSender::new());
    let now = monday_at(12, 0);
    let fx = Fixture::new(sender.clone(), now).await;

    let due = fx.seed_completed(now - Duration::hours(30), None).await;
    let too_recent = fx.seed_completed(now - Duration::hours(10), None).await;
    let too_old = fx.seed_completed(now - Duration::hours(50), None).await;
    let reviewed = fx
        .seed_completed(
            now - Duration::hours(30),
            Some(Feedback {
                rating: 5,
                comment: None,
                feedback_date: now - Duration::hours(29),
            }),
        )
        .await;

    let report = fx.scheduler.run_tick().await;
    assert_eq!(report.feedback_reminders_sent, 1);

    let sent = sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, NotificationKind::FeedbackReminder);
    assert_eq!(sent[0].data.appointment_id, due.id);

    assert!(fx.reload(due.id).await.feedback_reminder_sent);
    assert!(!fx.reload(too_recent.id).await.feedback_reminder_sent);
    assert!(!fx.reload(too_old.id).await.feedback_reminder_sent);
    assert!(!fx.reload(reviewed.id).await.feedback_reminder_sent);

    fx.clock.advance(Duration::minutes(5));
    assert_eq!(fx.scheduler.run_tick().await.feedback_reminders_sent, 0);
}

#[tokio::test]
async fn feedback_window_includes_two_days_and_excludes_one_day() {
    let sender = Arc::new(RecordingNotificationSender::new());
    let now = monday_at(12, 0);
    let fx = Fixture::new(sender.clone(), now).await;

    fx.seed_completed(now - Duration::hours(24), None).await;
    let at_lower_edge = fx.seed_completed(now - Duration::hours(48), None).await;

    let report = fx.scheduler.run_tick().await;

    assert_eq!(report.feedback_reminders_sent, 1);
    assert_eq!(sender.sent()[0].data.appointment_id, at_lower_edge.id);
}

// ==============================================================================
// WRITES LANDING MID-SWEEP
// ==============================================================================

/// Backing rows plus one queued write, applied to the rows right after the
/// sweep reads its candidates for `after_reading`. The sweep then works from a
/// stale snapshot.
struct InterleavingStore {
    inner: Arc<InMemoryAppointmentStore>,
    queued: Mutex<Option<(AppointmentStatus, Appointment)>>,
}

impl InterleavingStore {
    fn new(inner: Arc<InMemoryAppointmentStore>) -> Self {
        Self {
            inner,
            queued: Mutex::new(None),
        }
    }

    fn queue(&self, after_reading: AppointmentStatus, write: Appointment) {
        *self.queued.lock().unwrap() = Some((after_reading, write));
    }

    fn take_queued(&self, filter: &AppointmentFilter) -> Option<Appointment> {
        let mut queued = self.queued.lock().unwrap();
        match queued.as_ref() {
            Some((status, _)) if filter.statuses.contains(status) => queued.take().map(|(_, write)| write),
            _ => None,
        }
    }
}

#[async_trait]
impl AppointmentStore for InterleavingStore {
    async fn create(&self, appointment: Appointment) -> Result<Appointment, StoreError> {
        self.inner.create(appointment).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        self.inner.find_by_id(id).await
    }

    async fn find_all(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, StoreError> {
        let snapshot = self.inner.find_all(filter).await?;
        if let Some(write) = self.take_queued(filter) {
            self.inner.update_by_id(write.id, write).await?;
        }
        Ok(snapshot)
    }

    async fn check_time_conflict(&self, query: &ConflictQuery) -> Result<bool, StoreError> {
        self.inner.check_time_conflict(query).await
    }

    async fn update_by_id(&self, id: Uuid, appointment: Appointment) -> Result<Appointment, StoreError> {
        self.inner.update_by_id(id, appointment).await
    }

    async fn set_meeting_reminder_sent(&self, id: Uuid, meeting: &MeetingInfo, sent: bool) -> Result<bool, StoreError> {
        self.inner.set_meeting_reminder_sent(id, meeting, sent).await
    }

    async fn set_feedback_reminder_sent(&self, id: Uuid, sent: bool) -> Result<bool, StoreError> {
        self.inner.set_feedback_reminder_sent(id, sent).await
    }
}

async fn interleaved_fixture(
    sender: Arc<dyn NotificationSender>,
    now: DateTime<Utc>,
) -> (Fixture, Arc<InterleavingStore>) {
    let rows = Arc::new(InMemoryAppointmentStore::new());
    let sweep_store = Arc::new(InterleavingStore::new(rows.clone()));
    let fx = Fixture::with_store(sender, now, ReminderConfig::default(), rows, sweep_store.clone()).await;
    (fx, sweep_store)
}

fn five_stars(at: DateTime<Utc>) -> Feedback {
    Feedback {
        rating: 5,
        comment: Some("Very helpful".to_string()),
        feedback_date: at,
    }
}

#[tokio::test]
async fn feedback_left_mid_sweep_survives_and_suppresses_reminder() {
    let sender = Arc::new(RecordingNotificationSender::new());
    let now = monday_at(12, 0);
    let (fx, sweep_store) = interleaved_fixture(sender.clone(), now).await;

    let due = fx.seed_completed(now - Duration::hours(30), None).await;
    let mut reviewed = due.clone();
    reviewed.feedback = Some(five_stars(now));
    sweep_store.queue(AppointmentStatus::Completed, reviewed);

    let report = fx.scheduler.run_tick().await;

    assert_eq!(report.feedback_reminders_sent, 0);
    assert_eq!(report.failures, 0);
    assert!(sender.sent().is_empty());

    let stored = fx.reload(due.id).await;
    assert_eq!(stored.feedback.map(|f| f.rating), Some(5));
    assert!(!stored.feedback_reminder_sent);
}

#[tokio::test]
async fn cancel_mid_sweep_is_not_reverted_by_reminder() {
    let sender = Arc::new(RecordingNotificationSender::new());
    let (fx, sweep_store) = interleaved_fixture(sender.clone(), monday_at(9, 45)).await;

    let confirmed = fx
        .seed(reference_monday(), ClockTime::hm(10, 0), AppointmentStatus::Confirmed)
        .await;
    let mut cancelled = confirmed.clone();
    cancelled.status = AppointmentStatus::Cancelled;
    sweep_store.queue(AppointmentStatus::Confirmed, cancelled);

    let report = fx.scheduler.run_tick().await;

    assert_eq!(report.meeting_reminders_sent, 0);
    assert!(sender.sent().is_empty());

    let stored = fx.reload(confirmed.id).await;
    assert_eq!(stored.status, AppointmentStatus::Cancelled);
    assert!(!stored.reminder_sent());
}

/// Leaves feedback on the appointment while the reminder is in flight, then
/// reports the delivery as failed.
struct FeedbackDuringSend {
    store: Arc<InMemoryAppointmentStore>,
}

#[async_trait]
impl NotificationSender for FeedbackDuringSend {
    async fn send_confirmation(&self, _data: &NotificationData) -> Result<(), NotificationError> {
        Ok(())
    }

    async fn send_cancellation(&self, _data: &NotificationData, _cancelled_by: &str) -> Result<(), NotificationError> {
        Ok(())
    }

    async fn send_meeting_reminder(&self, _data: &NotificationData, _minutes_before: i64) -> Result<(), NotificationError> {
        Ok(())
    }

    async fn send_feedback_reminder(&self, data: &NotificationData) -> Result<(), NotificationError> {
        let mut appointment = self.store.find_by_id(data.appointment_id).await.unwrap().unwrap();
        appointment.feedback = Some(five_stars(appointment.updated_at));
        self.store.update_by_id(appointment.id, appointment).await.unwrap();
        Err(NotificationError::Delivery("smtp timeout".to_string()))
    }
}

#[tokio::test]
async fn released_claim_keeps_feedback_written_during_send() {
    let now = monday_at(12, 0);
    let rows = Arc::new(InMemoryAppointmentStore::new());
    let sender = Arc::new(FeedbackDuringSend { store: rows.clone() });
    let fx = Fixture::with_store(sender, now, ReminderConfig::default(), rows.clone(), rows).await;

    let due = fx.seed_completed(now - Duration::hours(30), None).await;

    let report = fx.scheduler.run_tick().await;
    assert_eq!(report.feedback_reminders_sent, 0);
    assert_eq!(report.failures, 1);

    let stored = fx.reload(due.id).await;
    assert_eq!(stored.feedback.map(|f| f.rating), Some(5));
    assert!(!stored.feedback_reminder_sent);

    // Feedback is in, so nothing is retried.
    fx.clock.advance(Duration::minutes(5));
    let retry = fx.scheduler.run_tick().await;
    assert_eq!(retry.failures, 0);
    assert_eq!(retry.feedback_reminders_sent, 0);
}

// ==============================================================================
// OPERATOR ACTIONS
// ==============================================================================

#[tokio::test]
async fn force_send_requires_confirmed_appointment_with_meeting() {
    let sender = Arc::new(RecordingNotificationSender::new());
    let fx = Fixture::new(sender.clone(), monday_at(8, 0)).await;

    let pending = fx.seed(reference_monday(), ClockTime::hm(11, 0), AppointmentStatus::Pending).await;
    assert_matches!(
        fx.scheduler.force_send_reminder(pending.id).await,
        Err(ReminderError::NotConfirmed { status: AppointmentStatus::Pending, .. })
    );

    let mut bare = fx
        .seed(reference_monday(), ClockTime::hm(12, 0), AppointmentStatus::Confirmed)
        .await;
    bare.meeting_info = None;
    fx.store.insert_raw(bare.clone()).await;
    assert_matches!(
        fx.scheduler.force_send_reminder(bare.id).await,
        Err(ReminderError::MissingMeetingInfo(id)) if id == bare.id
    );

    assert_matches!(
        fx.scheduler.force_send_reminder(Uuid::new_v4()).await,
        Err(ReminderError::NotFound(_))
    );

    let confirmed = fx
        .seed(reference_monday(), ClockTime::hm(13, 0), AppointmentStatus::Confirmed)
        .await;
    let updated = assert_ok!(fx.scheduler.force_send_reminder(confirmed.id).await);
    assert!(updated.reminder_sent());

    let sent = sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, NotificationKind::MeetingReminder { minutes_before: 300 });
}

#[tokio::test]
async fn upcoming_reminders_list_todays_confirmed_appointments() {
    let sender = Arc::new(RecordingNotificationSender::new());
    let fx = Fixture::new(sender, monday_at(9, 45)).await;

    let later = fx
        .seed(reference_monday(), ClockTime::hm(14, 0), AppointmentStatus::Confirmed)
        .await;
    let soon = fx
        .seed(reference_monday(), ClockTime::hm(10, 0), AppointmentStatus::Confirmed)
        .await;
    fx.seed(reference_monday(), ClockTime::hm(9, 0), AppointmentStatus::Confirmed).await;
    fx.seed(reference_monday().succ_opt().unwrap(), ClockTime::hm(10, 0), AppointmentStatus::Confirmed)
        .await;

    let upcoming = fx.scheduler.upcoming_reminders().await.unwrap();

    assert_eq!(upcoming.len(), 2);
    assert_eq!(upcoming[0].appointment_id, soon.id);
    assert_eq!(upcoming[0].minutes_until_start, 15);
    assert!(upcoming[0].will_send_reminder);
    assert!(!upcoming[0].reminder_sent);
    assert_eq!(upcoming[1].appointment_id, later.id);
    assert!(!upcoming[1].will_send_reminder);

    fx.scheduler.trigger_now().await;
    let upcoming = fx.scheduler.upcoming_reminders().await.unwrap();
    assert!(upcoming[0].reminder_sent);
    assert!(!upcoming[0].will_send_reminder);
}

#[tokio::test]
async fn status_accumulates_tick_counters() {
    let sender = Arc::new(RecordingNotificationSender::new());
    let fx = Fixture::new(sender, monday_at(9, 45)).await;
    fx.seed(reference_monday(), ClockTime::hm(10, 0), AppointmentStatus::Confirmed).await;

    fx.scheduler.run_tick().await;
    fx.scheduler.run_tick().await;

    let status = fx.scheduler.status().await;
    assert!(!status.running);
    assert_eq!(status.ticks, 2);
    assert_eq!(status.meeting_reminders_sent, 1);
    assert_eq!(status.failures, 0);
    assert_eq!(status.last_tick_at, Some(monday_at(9, 45)));
    assert_eq!(status.interval_seconds, 300);
}

// ==============================================================================
// BACKGROUND LOOP
// ==============================================================================

#[tokio::test]
async fn handle_runs_first_tick_and_stops_idempotently() {
    let sender = Arc::new(RecordingNotificationSender::new());
    let config = ReminderConfig {
        interval: StdDuration::from_millis(50),
        ..ReminderConfig::default()
    };
    let fx = Fixture::with_config(sender.clone(), monday_at(9, 45), config).await;
    let appointment = fx
        .seed(reference_monday(), ClockTime::hm(10, 0), AppointmentStatus::Confirmed)
        .await;

    let mut handle = assert_ok!(fx.scheduler.start());
    assert!(handle.is_running());
    assert_matches!(fx.scheduler.start(), Err(ReminderError::AlreadyRunning));

    let sent = sender.wait_for(1, StdDuration::from_secs(2)).await;
    assert_eq!(sent.len(), 1);

    // Several more ticks pass without a second send.
    tokio::time::sleep(StdDuration::from_millis(200)).await;
    assert_eq!(sender.sent().len(), 1);
    assert!(fx.reload(appointment.id).await.reminder_sent());

    handle.stop().await;
    assert!(!handle.is_running());
    assert!(!fx.scheduler.is_running());
    handle.stop().await;

    let mut restarted = fx.scheduler.start().unwrap();
    assert!(restarted.is_running());
    restarted.stop().await;
    assert!(!fx.scheduler.status().await.running);
}

#[tokio::test]
async fn concurrent_manual_ticks_send_once() {
    let sender = Arc::new(RecordingNotificationSender::new());
    let fx = Fixture::new(sender.clone(), monday_at(9, 45)).await;
    fx.seed(reference_monday(), ClockTime::hm(10, 0), AppointmentStatus::Confirmed).await;

    let (a, b) = tokio::join!(fx.scheduler.trigger_now(), fx.scheduler.trigger_now());

    assert_eq!(a.meeting_reminders_sent + b.meeting_reminders_sent, 1);
    assert_eq!(sender.sent().len(), 1);
}
