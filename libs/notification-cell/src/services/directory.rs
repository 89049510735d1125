use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{Contact, NotificationError};

/// Resolves display names and email addresses for notification templates.
#[async_trait]
pub trait ContactDirectory: Send + Sync {
    async fn lookup(&self, user_id: Uuid) -> Result<Option<Contact>, NotificationError>;
}

#[derive(Default)]
pub struct InMemoryContactDirectory {
    contacts: RwLock<HashMap<Uuid, Contact>>,
}

impl InMemoryContactDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, contact: Contact) {
        self.contacts.write().await.insert(contact.user_id, contact);
    }
}

#[async_trait]
impl ContactDirectory for InMemoryContactDirectory {
    async fn lookup(&self, user_id: Uuid) -> Result<Option<Contact>, NotificationError> {
        Ok(self.contacts.read().await.get(&user_id).cloned())
    }
}

#[derive(Debug, Deserialize)]
struct ProfileRow {
    id: Uuid,
    full_name: Option<String>,
    email: Option<String>,
}

/// Reads `profiles` rows through PostgREST.
pub struct SupabaseContactDirectory {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseContactDirectory {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }
}

#[async_trait]
impl ContactDirectory for SupabaseContactDirectory {
    async fn lookup(&self, user_id: Uuid) -> Result<Option<Contact>, NotificationError> {
        let path = format!("/rest/v1/profiles?select=id,full_name,email&id=eq.{}&limit=1", user_id);
        let rows: Vec<ProfileRow> = self
            .supabase
            .request(Method::GET, &path, None, None)
            .await
            .map_err(|e| NotificationError::Directory(e.to_string()))?;

        Ok(rows.into_iter().next().map(|row| Contact {
            user_id: row.id,
            name: row.full_name.unwrap_or_default(),
            email: row.email.unwrap_or_default(),
        }))
    }
}
