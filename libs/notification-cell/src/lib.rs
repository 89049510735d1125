pub mod models;
pub mod services;
pub mod testing;

pub use models::*;
pub use services::*;
