pub mod availability;
pub mod booking;
pub mod conflict;
pub mod history;
pub mod lifecycle;
pub mod locks;
pub mod notify;
pub mod postgrest;
pub mod scheduling;
pub mod store;

pub use availability::AvailabilityService;
pub use booking::{classify_update, AppointmentBookingService};
pub use conflict::{ranges_conflict, ConflictQuery};
pub use history::{classify_change, HistoryRecorder, HistoryStore, InMemoryHistoryStore};
pub use lifecycle::AppointmentLifecycleService;
pub use locks::KeyedLocks;
pub use notify::{notification_data, resolve_contacts};
pub use postgrest::{SupabaseAppointmentStore, SupabaseHistoryStore};
pub use scheduling::{check_working_day, LeadTime, SchedulingEngine, SlotRequest};
pub use store::{AppointmentStore, InMemoryAppointmentStore};
