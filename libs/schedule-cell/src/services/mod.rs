pub mod postgrest;
pub mod schedule;
pub mod slots;
pub mod store;

pub use postgrest::SupabaseScheduleStore;
pub use schedule::ScheduleService;
pub use slots::{generate_time_slots, mark_booked, summarize};
pub use store::{InMemoryScheduleStore, WeeklyScheduleStore};
