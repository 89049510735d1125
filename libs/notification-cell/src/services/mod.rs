pub mod directory;
pub mod meeting;
pub mod notifier;

pub use directory::{ContactDirectory, InMemoryContactDirectory, SupabaseContactDirectory};
pub use meeting::{HttpMeetingProvider, MeetingLinkProvider, MeetingLinkService, PlaceholderMeetingProvider};
pub use notifier::{
    NotificationDispatcher, NotificationSender, TracingNotificationSender, WebhookNotificationSender,
};
