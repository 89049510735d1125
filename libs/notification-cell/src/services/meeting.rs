use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, error, info, warn};

use shared_config::AppConfig;

use crate::models::{GeneratedMeeting, MeetingDetails, MeetingError, MeetingRequest};

/// Anything that can mint a video-meeting link for an appointment.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MeetingLinkProvider: Send + Sync {
    async fn generate_meeting_link(&self, request: &MeetingRequest) -> Result<MeetingDetails, MeetingError>;
}

/// Locally generated `xxx-yyyy-zzz` room ids with a six-digit password.
#[derive(Debug, Clone)]
pub struct PlaceholderMeetingProvider {
    base_url: String,
}

impl PlaceholderMeetingProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn generate(&self) -> MeetingDetails {
        let mut rng = rand::thread_rng();
        let meeting_id = format!(
            "{}-{}-{}",
            random_letters(&mut rng, 3),
            random_letters(&mut rng, 4),
            random_letters(&mut rng, 3)
        );
        let password = rng.gen_range(100_000..=999_999).to_string();

        MeetingDetails {
            meet_url: format!("{}/{}", self.base_url, meeting_id),
            meeting_id,
            meeting_password: Some(password),
        }
    }
}

fn random_letters(rng: &mut impl Rng, len: usize) -> String {
    (0..len).map(|_| char::from(rng.gen_range(b'a'..=b'z'))).collect()
}

#[async_trait]
impl MeetingLinkProvider for PlaceholderMeetingProvider {
    async fn generate_meeting_link(&self, _request: &MeetingRequest) -> Result<MeetingDetails, MeetingError> {
        Ok(self.generate())
    }
}

/// Client for an HTTP meeting service that accepts
/// `{title, start, end, attendees}` and answers with [`MeetingDetails`].
pub struct HttpMeetingProvider {
    client: Client,
    endpoint: String,
    api_token: String,
}

impl HttpMeetingProvider {
    pub fn new(config: &AppConfig) -> Result<Self, MeetingError> {
        if !config.is_meeting_provider_configured() {
            return Err(MeetingError::NotConfigured);
        }

        Ok(Self {
            client: Client::new(),
            endpoint: config.meeting_provider_url.clone(),
            api_token: config.meeting_provider_api_token.clone(),
        })
    }
}

impl fmt::Debug for HttpMeetingProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpMeetingProvider")
            .field("endpoint", &self.endpoint)
            .field("api_token", &if self.api_token.is_empty() { "<none>" } else { "<redacted>" })
            .finish()
    }
}

#[async_trait]
impl MeetingLinkProvider for HttpMeetingProvider {
    async fn generate_meeting_link(&self, request: &MeetingRequest) -> Result<MeetingDetails, MeetingError> {
        debug!("Requesting meeting link from {}", self.endpoint);

        let mut req = self.client.post(&self.endpoint).json(&json!({
            "title": request.title,
            "start": request.start,
            "end": request.end,
            "attendees": request.attendee_emails,
        }));
        if !self.api_token.is_empty() {
            req = req.bearer_auth(&self.api_token);
        }

        let response = req.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            error!("Meeting provider returned {}: {}", status, body);
            return Err(MeetingError::Provider(format!("HTTP {}: {}", status, body)));
        }

        let details: MeetingDetails = serde_json::from_str(&body)
            .map_err(|e| MeetingError::InvalidResponse(format!("Failed to parse meeting response: {}", e)))?;

        if details.meet_url.is_empty() || details.meeting_id.is_empty() {
            return Err(MeetingError::InvalidResponse("missing meet_url or meeting_id".to_string()));
        }

        info!("Meeting provider issued meeting {}", details.meeting_id);
        Ok(details)
    }
}

/// Meeting-link generation that never fails: the remote provider is tried
/// first and a placeholder link is issued if it errors.
pub struct MeetingLinkService {
    provider: Option<Arc<dyn MeetingLinkProvider>>,
    fallback: PlaceholderMeetingProvider,
}

impl MeetingLinkService {
    pub fn new(provider: Option<Arc<dyn MeetingLinkProvider>>, fallback: PlaceholderMeetingProvider) -> Self {
        Self { provider, fallback }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let provider = match HttpMeetingProvider::new(config) {
            Ok(provider) => Some(Arc::new(provider) as Arc<dyn MeetingLinkProvider>),
            Err(_) => None,
        };
        Self::new(provider, PlaceholderMeetingProvider::new(config.meeting_base_url.clone()))
    }

    pub fn placeholder_only(base_url: &str) -> Self {
        Self::new(None, PlaceholderMeetingProvider::new(base_url))
    }

    pub async fn generate(&self, request: &MeetingRequest) -> GeneratedMeeting {
        let Some(provider) = &self.provider else {
            return GeneratedMeeting {
                details: self.fallback.generate(),
                fallback_reason: None,
            };
        };

        match provider.generate_meeting_link(request).await {
            Ok(details) => GeneratedMeeting {
                details,
                fallback_reason: None,
            },
            Err(e) => {
                warn!("Meeting provider failed for '{}', using placeholder link: {}", request.title, e);
                GeneratedMeeting {
                    details: self.fallback.generate(),
                    fallback_reason: Some(e.to_string()),
                }
            }
        }
    }
}
