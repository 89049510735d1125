use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::{Actor, UserRole};

use crate::clock::FixedClock;

pub struct TestConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_service_role_key: String,
    pub meeting_base_url: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            supabase_service_role_key: "test-service-key".to_string(),
            meeting_base_url: "https://meet.google.com".to_string(),
        }
    }
}

impl TestConfig {
    pub fn with_supabase_url(url: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_service_role_key: self.supabase_service_role_key.clone(),
            meeting_provider_url: String::new(),
            meeting_provider_api_token: String::new(),
            meeting_base_url: self.meeting_base_url.clone(),
            notification_webhook_url: String::new(),
            reminder_scheduler_enabled: true,
            reminder_interval_seconds: 300,
            schedule_utc_offset_minutes: 0,
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

/// Fresh actors with random ids, one per role.
pub struct TestActors;

impl TestActors {
    pub fn customer() -> Actor {
        Actor::new(Uuid::new_v4(), UserRole::Customer).with_name("Test Customer")
    }

    pub fn consultant() -> Actor {
        Actor::new(Uuid::new_v4(), UserRole::Consultant).with_name("Test Consultant")
    }

    pub fn staff() -> Actor {
        Actor::new(Uuid::new_v4(), UserRole::Staff).with_name("Test Staff")
    }

    pub fn admin() -> Actor {
        Actor::new(Uuid::new_v4(), UserRole::Admin).with_name("Test Admin")
    }
}

/// A Monday far enough from DST and year edges to keep fixtures boring.
pub fn reference_monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 6, 3).unwrap_or_default()
}

pub fn next_weekday(from: NaiveDate, weekday: Weekday) -> NaiveDate {
    let ahead = (7 + weekday.num_days_from_monday() as i64
        - from.weekday().num_days_from_monday() as i64)
        % 7;
    from + Duration::days(ahead)
}

pub fn utc(date: NaiveDate, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(hour, minute, 0).unwrap_or_default())
}

pub fn fixed_clock_at(date: NaiveDate, hour: u32, minute: u32) -> Arc<FixedClock> {
    Arc::new(FixedClock::new(utc(date, hour, minute)))
}
