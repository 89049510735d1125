use chrono::{Duration, NaiveDate};
use tokio_test::assert_ok;
use uuid::Uuid;

use appointment_cell::{
    Appointment, AppointmentStatus, AppointmentStore, Feedback, InMemoryAppointmentStore, MeetingInfo,
    VideoCallStatus,
};
use shared_utils::test_utils::{reference_monday, utc};
use shared_utils::time::ClockTime;

fn appointment(
    customer_id: Uuid,
    consultant_id: Uuid,
    date: NaiveDate,
    start: ClockTime,
    status: AppointmentStatus,
) -> Appointment {
    let now = utc(reference_monday() - Duration::days(3), 9, 0);
    let meeting_info = matches!(status, AppointmentStatus::Confirmed | AppointmentStatus::Completed).then(|| {
        MeetingInfo {
            meet_url: format!("https://meet.google.com/{}", Uuid::new_v4()),
            meeting_id: Uuid::new_v4().to_string(),
            meeting_password: None,
            created_at: now,
            reminder_sent: false,
        }
    });

    Appointment {
        id: Uuid::new_v4(),
        customer_id,
        consultant_id,
        appointment_date: date,
        start_time: start,
        end_time: start.checked_add_minutes(30).unwrap(),
        status,
        customer_notes: None,
        consultant_notes: None,
        meeting_info,
        video_call_status: VideoCallStatus::NotStarted,
        feedback: None,
        feedback_reminder_sent: false,
        completed_at: (status == AppointmentStatus::Completed).then_some(now),
        created_at: now,
        updated_at: now,
    }
}

fn ids(found: &[Appointment]) -> Vec<Uuid> {
    found.iter().map(|a| a.id).collect()
}

// ==============================================================================
// LOOKUPS
// ==============================================================================

struct Seeded {
    store: InMemoryAppointmentStore,
    customer: Uuid,
    consultant: Uuid,
    monday_pending: Uuid,
    tuesday_confirmed: Uuid,
    next_monday_cancelled: Uuid,
}

/// Three appointments for one customer and one consultant across two weeks,
/// plus unrelated rows for someone else on both sides.
async fn seeded() -> Seeded {
    let store = InMemoryAppointmentStore::new();
    let customer = Uuid::new_v4();
    let consultant = Uuid::new_v4();
    let monday = reference_monday();

    let pending = appointment(customer, consultant, monday, ClockTime::hm(9, 0), AppointmentStatus::Pending);
    let confirmed = appointment(
        customer,
        consultant,
        monday + Duration::days(1),
        ClockTime::hm(10, 0),
        AppointmentStatus::Confirmed,
    );
    let cancelled = appointment(
        customer,
        consultant,
        monday + Duration::days(7),
        ClockTime::hm(9, 0),
        AppointmentStatus::Cancelled,
    );
    let (monday_pending, tuesday_confirmed, next_monday_cancelled) = (pending.id, confirmed.id, cancelled.id);
    for a in [pending, confirmed, cancelled] {
        assert_ok!(store.create(a).await);
    }

    // Someone else's customer with this consultant, and this customer's
    // appointment with someone else.
    assert_ok!(
        store
            .create(appointment(
                Uuid::new_v4(),
                consultant,
                monday,
                ClockTime::hm(11, 0),
                AppointmentStatus::Confirmed,
            ))
            .await
    );
    assert_ok!(
        store
            .create(appointment(
                customer,
                Uuid::new_v4(),
                monday + Duration::days(2),
                ClockTime::hm(14, 0),
                AppointmentStatus::Completed,
            ))
            .await
    );

    Seeded {
        store,
        customer,
        consultant,
        monday_pending,
        tuesday_confirmed,
        next_monday_cancelled,
    }
}

#[tokio::test]
async fn customer_lookup_combines_status_and_date_range() {
    let s = seeded().await;
    let monday = reference_monday();
    let tuesday = monday + Duration::days(1);

    let all = s.store.find_by_customer_id(s.customer, None, None, None).await.unwrap();
    assert_eq!(all.len(), 4);
    assert_eq!(all[0].id, s.monday_pending);
    assert_eq!(all[3].id, s.next_monday_cancelled);

    let confirmed = s
        .store
        .find_by_customer_id(s.customer, Some(AppointmentStatus::Confirmed), None, None)
        .await
        .unwrap();
    assert_eq!(ids(&confirmed), vec![s.tuesday_confirmed]);

    let from_tuesday = s
        .store
        .find_by_customer_id(s.customer, None, Some(tuesday), None)
        .await
        .unwrap();
    assert_eq!(from_tuesday.len(), 3);
    assert!(!ids(&from_tuesday).contains(&s.monday_pending));

    let until_monday = s
        .store
        .find_by_customer_id(s.customer, None, None, Some(monday))
        .await
        .unwrap();
    assert_eq!(ids(&until_monday), vec![s.monday_pending]);

    let this_week_cancelled = s
        .store
        .find_by_customer_id(
            s.customer,
            Some(AppointmentStatus::Cancelled),
            Some(monday),
            Some(monday + Duration::days(6)),
        )
        .await
        .unwrap();
    assert!(this_week_cancelled.is_empty());

    let stranger = s.store.find_by_customer_id(Uuid::new_v4(), None, None, None).await.unwrap();
    assert!(stranger.is_empty());
}

#[tokio::test]
async fn consultant_lookup_combines_status_and_date_range() {
    let s = seeded().await;
    let monday = reference_monday();

    let all = s.store.find_by_consultant_id(s.consultant, None, None, None).await.unwrap();
    assert_eq!(all.len(), 4);
    assert!(all.iter().all(|a| a.consultant_id == s.consultant));
    assert_eq!(all[0].appointment_date, monday);
    assert_eq!(all[0].start_time, ClockTime::hm(9, 0));
    assert_eq!(all[1].start_time, ClockTime::hm(11, 0));

    let confirmed = s
        .store
        .find_by_consultant_id(s.consultant, Some(AppointmentStatus::Confirmed), None, None)
        .await
        .unwrap();
    assert_eq!(confirmed.len(), 2);
    assert!(confirmed.iter().all(|a| a.status == AppointmentStatus::Confirmed));

    let monday_only = s
        .store
        .find_by_consultant_id(s.consultant, None, Some(monday), Some(monday))
        .await
        .unwrap();
    assert_eq!(monday_only.len(), 2);

    let confirmed_from_tuesday = s
        .store
        .find_by_consultant_id(
            s.consultant,
            Some(AppointmentStatus::Confirmed),
            Some(monday + Duration::days(1)),
            None,
        )
        .await
        .unwrap();
    assert_eq!(ids(&confirmed_from_tuesday), vec![s.tuesday_confirmed]);

    let until_sunday = s
        .store
        .find_by_consultant_id(s.consultant, None, None, Some(monday + Duration::days(6)))
        .await
        .unwrap();
    assert!(!ids(&until_sunday).contains(&s.next_monday_cancelled));
}

// ==============================================================================
// REMINDER FLAGS
// ==============================================================================

#[tokio::test]
async fn meeting_reminder_flag_is_a_guarded_single_field_write() {
    let store = InMemoryAppointmentStore::new();
    let mut confirmed = appointment(
        Uuid::new_v4(),
        Uuid::new_v4(),
        reference_monday(),
        ClockTime::hm(10, 0),
        AppointmentStatus::Confirmed,
    );
    confirmed.customer_notes = Some("Bring the lab results".to_string());
    let confirmed = store.create(confirmed).await.unwrap();
    let meeting = confirmed.meeting_info.clone().unwrap();

    assert!(store.set_meeting_reminder_sent(confirmed.id, &meeting, true).await.unwrap());
    assert!(!store.set_meeting_reminder_sent(confirmed.id, &meeting, true).await.unwrap());

    let stored = store.find_by_id(confirmed.id).await.unwrap().unwrap();
    assert!(stored.reminder_sent());
    let mut expected = confirmed.clone();
    if let Some(m) = expected.meeting_info.as_mut() {
        m.reminder_sent = true;
    }
    assert_eq!(stored, expected);

    let other_meeting = MeetingInfo {
        meeting_id: "zzz-zzzz-zzz".to_string(),
        ..meeting.clone()
    };
    assert!(!store.set_meeting_reminder_sent(confirmed.id, &other_meeting, false).await.unwrap());

    assert!(store.set_meeting_reminder_sent(confirmed.id, &meeting, false).await.unwrap());
    assert!(!store.find_by_id(confirmed.id).await.unwrap().unwrap().reminder_sent());

    assert!(!store.set_meeting_reminder_sent(Uuid::new_v4(), &meeting, true).await.unwrap());
}

#[tokio::test]
async fn meeting_reminder_flag_leaves_cancelled_rows_alone() {
    let store = InMemoryAppointmentStore::new();
    let confirmed = store
        .create(appointment(
            Uuid::new_v4(),
            Uuid::new_v4(),
            reference_monday(),
            ClockTime::hm(10, 0),
            AppointmentStatus::Confirmed,
        ))
        .await
        .unwrap();
    let meeting = confirmed.meeting_info.clone().unwrap();

    // The sweep read `confirmed` before this cancel landed.
    let cancelled_at = confirmed.updated_at + Duration::minutes(5);
    store.cancel_by_id(confirmed.id, cancelled_at).await.unwrap();

    assert!(!store.set_meeting_reminder_sent(confirmed.id, &meeting, true).await.unwrap());
    let stored = store.find_by_id(confirmed.id).await.unwrap().unwrap();
    assert_eq!(stored.status, AppointmentStatus::Cancelled);
    assert_eq!(stored.updated_at, cancelled_at);
    assert!(!stored.reminder_sent());
}

#[tokio::test]
async fn feedback_reminder_flag_is_withheld_once_feedback_exists() {
    let store = InMemoryAppointmentStore::new();
    let completed = store
        .create(appointment(
            Uuid::new_v4(),
            Uuid::new_v4(),
            reference_monday(),
            ClockTime::hm(10, 0),
            AppointmentStatus::Completed,
        ))
        .await
        .unwrap();

    let mut reviewed = completed.clone();
    reviewed.feedback = Some(Feedback {
        rating: 4,
        comment: None,
        feedback_date: completed.updated_at,
    });
    store.update_by_id(completed.id, reviewed.clone()).await.unwrap();

    assert!(!store.set_feedback_reminder_sent(completed.id, true).await.unwrap());
    assert_eq!(store.find_by_id(completed.id).await.unwrap().unwrap(), reviewed);
}

#[tokio::test]
async fn feedback_reminder_flag_claims_once_and_releases() {
    let store = InMemoryAppointmentStore::new();
    let mut completed = appointment(
        Uuid::new_v4(),
        Uuid::new_v4(),
        reference_monday(),
        ClockTime::hm(10, 0),
        AppointmentStatus::Completed,
    );
    completed.consultant_notes = Some("Follow up in a month".to_string());
    let completed = store.create(completed).await.unwrap();

    assert!(store.set_feedback_reminder_sent(completed.id, true).await.unwrap());
    assert!(!store.set_feedback_reminder_sent(completed.id, true).await.unwrap());

    let stored = store.find_by_id(completed.id).await.unwrap().unwrap();
    assert!(stored.feedback_reminder_sent);
    assert_eq!(stored.consultant_notes.as_deref(), Some("Follow up in a month"));

    assert!(store.set_feedback_reminder_sent(completed.id, false).await.unwrap());
    assert!(!store.find_by_id(completed.id).await.unwrap().unwrap().feedback_reminder_sent);

    let pending = store
        .create(appointment(
            Uuid::new_v4(),
            Uuid::new_v4(),
            reference_monday(),
            ClockTime::hm(11, 0),
            AppointmentStatus::Pending,
        ))
        .await
        .unwrap();
    assert!(!store.set_feedback_reminder_sent(pending.id, true).await.unwrap());
}
