use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use appointment_cell::AppointmentBookingService;
use notification_cell::{NotificationDispatcher, SupabaseContactDirectory};
use reminder_cell::{ReminderConfig, ReminderScheduler};
use shared_config::AppConfig;
use shared_utils::clock::SystemClock;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,appointment_cell=debug,reminder_cell=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting consultation scheduling worker");

    let config = AppConfig::from_env();
    if !config.is_configured() {
        warn!("SUPABASE_URL or keys are missing, store calls will fail");
    }
    if !config.is_meeting_provider_configured() {
        info!("No meeting provider configured, using placeholder links");
    }
    if !config.is_notification_webhook_configured() {
        info!("No notification webhook configured, notifications are logged only");
    }

    let booking = Arc::new(AppointmentBookingService::from_config(&config));
    info!(
        "Appointment service ready: lead time {}h, cancellation window {}h",
        booking.engine().rules().min_advance_booking_hours,
        booking.engine().rules().allowed_cancellation_hours
    );

    let scheduler = Arc::new(ReminderScheduler::new(
        booking.store(),
        Arc::new(SupabaseContactDirectory::new(&config)),
        NotificationDispatcher::from_config(&config),
        Arc::new(SystemClock),
        config.schedule_offset(),
        ReminderConfig::from_config(&config),
    ));

    let mut handle = if config.reminder_scheduler_enabled {
        Some(scheduler.start().context("failed to start reminder scheduler")?)
    } else {
        info!("Reminder scheduler disabled");
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    if let Some(handle) = handle.as_mut() {
        handle.stop().await;
    }

    let status = scheduler.status().await;
    info!(
        "Worker stopped after {} ticks: {} meeting and {} feedback reminders sent, {} failures",
        status.ticks, status.meeting_reminders_sent, status.feedback_reminders_sent, status.failures
    );
    Ok(())
}
