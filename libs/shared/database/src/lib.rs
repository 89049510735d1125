pub mod supabase;

pub use supabase::{filter_timestamp, SupabaseClient, SupabaseError};
