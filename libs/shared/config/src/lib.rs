use std::env;
use chrono::{FixedOffset, Offset, Utc};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_service_role_key: String,
    pub meeting_provider_url: String,
    pub meeting_provider_api_token: String,
    pub meeting_base_url: String,
    pub notification_webhook_url: String,
    pub reminder_scheduler_enabled: bool,
    pub reminder_interval_seconds: u64,
    pub schedule_utc_offset_minutes: i32,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_service_role_key: env::var("SUPABASE_SERVICE_ROLE_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_SERVICE_ROLE_KEY not set, using empty value");
                    String::new()
                }),
            meeting_provider_url: env::var("MEETING_PROVIDER_URL")
                .unwrap_or_else(|_| {
                    warn!("MEETING_PROVIDER_URL not set, meeting links will be placeholders");
                    String::new()
                }),
            meeting_provider_api_token: env::var("MEETING_PROVIDER_API_TOKEN")
                .unwrap_or_default(),
            meeting_base_url: env::var("MEETING_BASE_URL")
                .unwrap_or_else(|_| "https://meet.google.com".to_string()),
            notification_webhook_url: env::var("NOTIFICATION_WEBHOOK_URL")
                .unwrap_or_else(|_| {
                    warn!("NOTIFICATION_WEBHOOK_URL not set, notifications will only be logged");
                    String::new()
                }),
            reminder_scheduler_enabled: parse_or("REMINDER_SCHEDULER_ENABLED", true),
            reminder_interval_seconds: parse_or("REMINDER_INTERVAL_SECONDS", 300),
            schedule_utc_offset_minutes: parse_or("SCHEDULE_UTC_OFFSET_MINUTES", 0),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_service_role_key.is_empty()
    }

    pub fn is_meeting_provider_configured(&self) -> bool {
        !self.meeting_provider_url.is_empty()
    }

    pub fn is_notification_webhook_configured(&self) -> bool {
        !self.notification_webhook_url.is_empty()
    }

    /// The single fixed zone all appointment dates and times are expressed in.
    /// Out-of-range offsets fall back to UTC.
    pub fn schedule_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.schedule_utc_offset_minutes * 60).unwrap_or_else(|| {
            warn!(
                "SCHEDULE_UTC_OFFSET_MINUTES={} is out of range, using UTC",
                self.schedule_utc_offset_minutes
            );
            Utc.fix()
        })
    }
}

fn parse_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
