// libs/reminder-cell/src/services/scheduler.rs
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use appointment_cell::{
    notification_data, resolve_contacts, Appointment, AppointmentStatus, AppointmentStore, OperationWarning,
};
use notification_cell::{ContactDirectory, NotificationData, NotificationDispatcher, NotificationKind};
use shared_utils::clock::Clock;
use shared_utils::time::local_date;

use crate::models::{ReminderConfig, ReminderError, SchedulerStatus, TickReport, UpcomingReminder};

/// Periodic sweep that sends meeting and feedback reminders.
///
/// Each reminder is claimed in the store before it is sent: the flag write is
/// conditional on the appointment still qualifying, so a concurrent cancel or
/// feedback wins and nothing is sent. A failed send releases the claim and is
/// retried on the next tick. A failed release leaves the flag set, so that
/// reminder is dropped rather than repeated.
pub struct ReminderScheduler {
    store: Arc<dyn AppointmentStore>,
    contacts: Arc<dyn ContactDirectory>,
    dispatcher: NotificationDispatcher,
    clock: Arc<dyn Clock>,
    zone: FixedOffset,
    config: ReminderConfig,
    tick_guard: Mutex<()>,
    running: AtomicBool,
    status: RwLock<SchedulerStatus>,
}

impl ReminderScheduler {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        contacts: Arc<dyn ContactDirectory>,
        dispatcher: NotificationDispatcher,
        clock: Arc<dyn Clock>,
        zone: FixedOffset,
        config: ReminderConfig,
    ) -> Self {
        let status = SchedulerStatus {
            interval_seconds: config.interval.as_secs(),
            ..SchedulerStatus::default()
        };
        Self {
            store,
            contacts,
            dispatcher,
            clock,
            zone,
            config,
            tick_guard: Mutex::new(()),
            running: AtomicBool::new(false),
            status: RwLock::new(status),
        }
    }

    pub fn config(&self) -> &ReminderConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ==============================================================================
    // BACKGROUND LOOP
    // ==============================================================================

    /// Spawns the sweep loop. The first tick runs immediately.
    pub fn start(self: &Arc<Self>) -> Result<SchedulerHandle, ReminderError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ReminderError::AlreadyRunning);
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let scheduler = Arc::clone(self);
        let period = self.config.interval;

        info!("Starting reminder scheduler, interval {}s", period.as_secs());

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            debug!("Reminder loop stopping due to shutdown");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        scheduler.run_tick().await;
                    }
                }
            }

            scheduler.running.store(false, Ordering::SeqCst);
            info!("Reminder scheduler stopped");
        });

        Ok(SchedulerHandle {
            scheduler: Arc::clone(self),
            shutdown: shutdown_tx,
            task: Some(task),
        })
    }

    // ==============================================================================
    // SWEEP
    // ==============================================================================

    /// One sweep over both reminder kinds. A tick that finds another one in
    /// flight returns a skipped report without touching the store.
    #[instrument(skip(self))]
    pub async fn run_tick(&self) -> TickReport {
        let Ok(_guard) = self.tick_guard.try_lock() else {
            debug!("Previous reminder tick still running, skipping");
            let report = TickReport::skipped();
            self.status.write().await.record(&report);
            return report;
        };

        let now = self.clock.now();
        let mut report = TickReport {
            started_at: Some(now),
            ..TickReport::default()
        };

        if let Err(e) = self.send_meeting_reminders(now, &mut report).await {
            error!("Meeting reminder sweep failed: {}", e);
            report.failures += 1;
        }
        if let Err(e) = self.send_feedback_reminders(now, &mut report).await {
            error!("Feedback reminder sweep failed: {}", e);
            report.failures += 1;
        }

        if report.sent() > 0 || report.failures > 0 {
            info!(
                "Reminder tick: {} meeting, {} feedback, {} failed",
                report.meeting_reminders_sent, report.feedback_reminders_sent, report.failures
            );
        }

        self.status.write().await.record(&report);
        report
    }

    /// Manual tick, subject to the same single-flight guard.
    pub async fn trigger_now(&self) -> TickReport {
        info!("Reminder tick triggered manually");
        self.run_tick().await
    }

    async fn send_meeting_reminders(&self, now: DateTime<Utc>, report: &mut TickReport) -> Result<(), ReminderError> {
        // Tomorrow is included so a window crossing midnight is still observed.
        let today = local_date(now, self.zone);
        let mut dates = vec![today];
        dates.extend(today.succ_opt());

        for appointment in self.store.find_confirmed_on(&dates).await? {
            if appointment.meeting_info.is_none() {
                warn!("Confirmed appointment {} has no meeting info", appointment.id);
                continue;
            }
            if appointment.reminder_sent() {
                continue;
            }

            let starts_at = appointment.starts_at(self.zone);
            if !self.config.in_meeting_window(now, starts_at) {
                continue;
            }

            match self.deliver_meeting_reminder(&appointment, minutes_between(now, starts_at)).await {
                Ok(true) => report.meeting_reminders_sent += 1,
                Ok(false) => {}
                Err(e) => {
                    error!("Meeting reminder for appointment {} failed: {}", appointment.id, e);
                    report.failures += 1;
                }
            }
        }
        Ok(())
    }

    async fn send_feedback_reminders(&self, now: DateTime<Utc>, report: &mut TickReport) -> Result<(), ReminderError> {
        let from = now - self.config.feedback_before;
        let before = now - self.config.feedback_after;

        let due = self
            .store
            .find_completed_between(from, before)
            .await?
            .into_iter()
            .filter(|a| a.feedback.is_none() && !a.feedback_reminder_sent);

        for appointment in due {
            match self.deliver_feedback_reminder(&appointment).await {
                Ok(true) => report.feedback_reminders_sent += 1,
                Ok(false) => {}
                Err(e) => {
                    error!("Feedback reminder for appointment {} failed: {}", appointment.id, e);
                    report.failures += 1;
                }
            }
        }
        Ok(())
    }

    /// Claims, sends and, on a failed send, releases. `Ok(false)` means the
    /// appointment no longer qualified when the claim was attempted.
    async fn deliver_meeting_reminder(&self, appointment: &Appointment, minutes_before: i64) -> Result<bool, ReminderError> {
        let Some(meeting) = appointment.meeting_info.as_ref() else {
            return Err(ReminderError::MissingMeetingInfo(appointment.id));
        };
        if !self.store.set_meeting_reminder_sent(appointment.id, meeting, true).await? {
            debug!("Meeting reminder for {} no longer due", appointment.id);
            return Ok(false);
        }

        let data = self.reminder_data(appointment).await;
        if let Err(e) = self
            .dispatcher
            .send(&NotificationKind::MeetingReminder { minutes_before }, &data)
            .await
        {
            if let Err(release) = self.store.set_meeting_reminder_sent(appointment.id, meeting, false).await {
                error!("Could not release meeting reminder claim on {}: {}", appointment.id, release);
            }
            return Err(e.into());
        }
        debug!("Meeting reminder sent for appointment {}", appointment.id);
        Ok(true)
    }

    async fn deliver_feedback_reminder(&self, appointment: &Appointment) -> Result<bool, ReminderError> {
        if !self.store.set_feedback_reminder_sent(appointment.id, true).await? {
            debug!("Feedback reminder for {} no longer due", appointment.id);
            return Ok(false);
        }

        let data = self.reminder_data(appointment).await;
        if let Err(e) = self.dispatcher.send(&NotificationKind::FeedbackReminder, &data).await {
            if let Err(release) = self.store.set_feedback_reminder_sent(appointment.id, false).await {
                error!("Could not release feedback reminder claim on {}: {}", appointment.id, release);
            }
            return Err(e.into());
        }
        debug!("Feedback reminder sent for appointment {}", appointment.id);
        Ok(true)
    }

    async fn reminder_data(&self, appointment: &Appointment) -> NotificationData {
        let mut warnings: Vec<OperationWarning> = Vec::new();
        let (customer, consultant) = resolve_contacts(self.contacts.as_ref(), appointment, &mut warnings).await;
        if !warnings.is_empty() {
            debug!("Sending reminder for {} with {} contact warnings", appointment.id, warnings.len());
        }
        notification_data(appointment, &customer, &consultant)
    }

    // ==============================================================================
    // OPERATOR ACTIONS
    // ==============================================================================

    /// Sends a meeting reminder now, ignoring the window and the sent flag.
    #[instrument(skip(self))]
    pub async fn force_send_reminder(&self, appointment_id: Uuid) -> Result<Appointment, ReminderError> {
        let appointment = self
            .store
            .find_by_id(appointment_id)
            .await?
            .ok_or(ReminderError::NotFound(appointment_id))?;

        if appointment.status != AppointmentStatus::Confirmed {
            return Err(ReminderError::NotConfirmed {
                id: appointment_id,
                status: appointment.status,
            });
        }
        let Some(meeting) = appointment.meeting_info.as_ref() else {
            return Err(ReminderError::MissingMeetingInfo(appointment_id));
        };

        let now = self.clock.now();
        let minutes_before = minutes_between(now, appointment.starts_at(self.zone)).max(0);
        info!("Forcing meeting reminder for appointment {}", appointment_id);

        let data = self.reminder_data(&appointment).await;
        self.dispatcher
            .send(&NotificationKind::MeetingReminder { minutes_before }, &data)
            .await?;
        self.store.set_meeting_reminder_sent(appointment_id, meeting, true).await?;

        Ok(self
            .store
            .find_by_id(appointment_id)
            .await?
            .ok_or(ReminderError::NotFound(appointment_id))?)
    }

    pub async fn status(&self) -> SchedulerStatus {
        let mut status = self.status.read().await.clone();
        status.running = self.is_running();
        status
    }

    /// Today's confirmed appointments that have not started yet, soonest first.
    pub async fn upcoming_reminders(&self) -> Result<Vec<UpcomingReminder>, ReminderError> {
        let now = self.clock.now();
        let today = local_date(now, self.zone);

        let mut upcoming: Vec<UpcomingReminder> = self
            .store
            .find_confirmed_on(&[today])
            .await?
            .into_iter()
            .filter_map(|a| {
                let starts_at = a.starts_at(self.zone);
                (starts_at > now).then(|| UpcomingReminder {
                    appointment_id: a.id,
                    customer_id: a.customer_id,
                    consultant_id: a.consultant_id,
                    appointment_date: a.appointment_date,
                    start_time: a.start_time,
                    minutes_until_start: minutes_between(now, starts_at),
                    will_send_reminder: a.meeting_info.is_some()
                        && !a.reminder_sent()
                        && self.config.in_meeting_window(now, starts_at),
                    reminder_sent: a.reminder_sent(),
                })
            })
            .collect();

        upcoming.sort_by_key(|r| r.minutes_until_start);
        Ok(upcoming)
    }
}

fn minutes_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_minutes()
}

// ==============================================================================
// HANDLE
// ==============================================================================

/// Owns the running sweep task. Dropping the handle also ends the loop, but
/// without waiting for it.
pub struct SchedulerHandle {
    scheduler: Arc<ReminderScheduler>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished()) && self.scheduler.is_running()
    }

    /// Signals the loop and waits for an in-flight tick to finish. Safe to call twice.
    pub async fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };

        let _ = self.shutdown.send(true);
        if let Err(e) = task.await {
            error!("Reminder scheduler task ended abnormally: {}", e);
        }
        self.scheduler.running.store(false, Ordering::SeqCst);
    }
}

impl fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("running", &self.is_running())
            .finish()
    }
}
