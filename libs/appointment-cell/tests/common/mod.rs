#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use uuid::Uuid;

use appointment_cell::{
    AppointmentBookingService, AppointmentHistory, BookRequest, HistoryAction, HistoryStore,
    InMemoryAppointmentStore, InMemoryHistoryStore,
};
use notification_cell::testing::RecordingNotificationSender;
use notification_cell::{Contact, InMemoryContactDirectory, NotificationDispatcher};
use schedule_cell::{
    CreateScheduleRequest, InMemoryScheduleStore, ScheduleService, WorkingDay, WorkingDays,
};
use shared_models::auth::Actor;
use shared_models::error::StoreError;
use shared_utils::clock::FixedClock;
use shared_utils::test_utils::{reference_monday, utc, TestActors};
use shared_utils::time::ClockTime;

pub fn t(raw: &str) -> ClockTime {
    raw.parse().unwrap()
}

/// 08:00-17:00 with a 12:00-13:00 break, Monday to Friday.
pub fn office_week() -> WorkingDays {
    WorkingDays::weekdays(WorkingDay::new(t("08:00"), t("17:00")).with_break(t("12:00"), t("13:00")))
}

pub struct Harness {
    pub service: AppointmentBookingService,
    pub appointments: Arc<InMemoryAppointmentStore>,
    pub schedules: Arc<InMemoryScheduleStore>,
    pub history: Arc<InMemoryHistoryStore>,
    pub sender: Arc<RecordingNotificationSender>,
    pub contacts: Arc<InMemoryContactDirectory>,
    pub clock: Arc<FixedClock>,
    pub customer: Actor,
    pub consultant: Actor,
    pub staff: Actor,
    pub admin: Actor,
    pub monday: NaiveDate,
}

impl Harness {
    /// Clock on the Friday before the reference week, consultant scheduled
    /// for the reference week and the one after.
    pub async fn new() -> Self {
        Self::with_history(Arc::new(InMemoryHistoryStore::new())).await
    }

    pub async fn with_history(history: Arc<InMemoryHistoryStore>) -> Self {
        Self::build(history.clone(), history).await
    }

    pub async fn with_history_store(store: Arc<dyn HistoryStore>) -> Self {
        Self::build(store, Arc::new(InMemoryHistoryStore::new())).await
    }

    async fn build(history_store: Arc<dyn HistoryStore>, history: Arc<InMemoryHistoryStore>) -> Self {
        let monday = reference_monday();
        let clock = Arc::new(FixedClock::new(utc(monday - Duration::days(3), 9, 0)));
        let appointments = Arc::new(InMemoryAppointmentStore::new());
        let schedules = Arc::new(InMemoryScheduleStore::new());
        let sender = Arc::new(RecordingNotificationSender::new());
        let contacts = Arc::new(InMemoryContactDirectory::new());

        let customer = TestActors::customer();
        let consultant = TestActors::consultant();
        let staff = TestActors::staff();
        let admin = TestActors::admin();

        for (actor, email) in [(&customer, "customer@example.com"), (&consultant, "consultant@example.com")] {
            contacts
                .insert(Contact {
                    user_id: actor.user_id,
                    name: actor.display_name(),
                    email: email.to_string(),
                })
                .await;
        }

        let schedule_service = ScheduleService::new(schedules.clone(), clock.clone());
        for week in [monday, monday + Duration::days(7)] {
            schedule_service
                .create_schedule(
                    &staff,
                    CreateScheduleRequest {
                        consultant_id: consultant.user_id,
                        week_start_date: week,
                        working_days: office_week(),
                        default_slot_duration: Some(30),
                        notes: None,
                    },
                )
                .await
                .unwrap();
        }

        let service = AppointmentBookingService::new(
            appointments.clone(),
            schedules.clone(),
            history_store,
            clock.clone(),
        )
        .with_notifier(NotificationDispatcher::new(sender.clone()))
        .with_contacts(contacts.clone());

        Self {
            service,
            appointments,
            schedules,
            history,
            sender,
            contacts,
            clock,
            customer,
            consultant,
            staff,
            admin,
            monday,
        }
    }

    pub fn book_request(&self, date: NaiveDate, start: &str, end: &str) -> BookRequest {
        BookRequest {
            customer_id: None,
            consultant_id: self.consultant.user_id,
            appointment_date: date,
            start_time: t(start),
            end_time: t(end),
            customer_notes: Some("First visit".to_string()),
        }
    }

    pub fn set_now(&self, date: NaiveDate, hour: u32, minute: u32) {
        self.clock.set(utc(date, hour, minute));
    }

    pub fn now(&self) -> DateTime<Utc> {
        use shared_utils::clock::Clock;
        self.clock.now()
    }

    /// Books `start-end` on `date` as a fresh customer and returns the id.
    pub async fn book_for_new_customer(&self, date: NaiveDate, start: &str, end: &str) -> Uuid {
        let customer = TestActors::customer();
        self.service
            .book(&customer, self.book_request(date, start, end))
            .await
            .unwrap()
            .value
            .id
    }

    pub async fn history_actions(&self, appointment_id: Uuid) -> Vec<HistoryAction> {
        self.history
            .find_by_appointment(appointment_id)
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.action)
            .collect()
    }
}

/// History store that is always down.
pub struct BrokenHistoryStore;

#[async_trait]
impl HistoryStore for BrokenHistoryStore {
    async fn append(&self, _entry: AppointmentHistory) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("history table offline".to_string()))
    }

    async fn find_by_appointment(&self, _appointment_id: Uuid) -> Result<Vec<AppointmentHistory>, StoreError> {
        Err(StoreError::Unavailable("history table offline".to_string()))
    }

    async fn find_by_actor(&self, _user_id: Uuid, _limit: usize) -> Result<Vec<AppointmentHistory>, StoreError> {
        Err(StoreError::Unavailable("history table offline".to_string()))
    }

    async fn action_counts(
        &self,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<BTreeMap<HistoryAction, usize>, StoreError> {
        Err(StoreError::Unavailable("history table offline".to_string()))
    }
}
