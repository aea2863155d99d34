//! Request/response types for API-key management.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ApiKey;

#[derive(Debug, Deserialize)]
pub struct CreateApiKeyRequest {
    pub name: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Creation/rotation response: the only payloads that ever carry the
/// plaintext key.
#[derive(Debug, Serialize)]
pub struct ApiKeyCreatedResponse {
    pub id: Uuid,
    pub name: String,
    pub key: String,
    pub key_prefix: String,
    pub scopes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApiKeyCreatedResponse {
    pub fn from_parts(api_key: ApiKey, plaintext: String) -> Self {
        Self {
            id: api_key.id,
            name: api_key.name,
            key: plaintext,
            key_prefix: api_key.key_prefix,
            scopes: api_key.scopes.0,
            expires_at: api_key.expires_at,
            created_at: api_key.created_at,
        }
    }
}

/// List/show shape: prefix only, no hash, no plaintext.
#[derive(Debug, Serialize)]
pub struct ApiKeyInfo {
    pub id: Uuid,
    pub name: String,
    pub key_prefix: String,
    pub scopes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<ApiKey> for ApiKeyInfo {
    fn from(api_key: ApiKey) -> Self {
        Self {
            id: api_key.id,
            name: api_key.name,
            key_prefix: api_key.key_prefix,
            scopes: api_key.scopes.0,
            expires_at: api_key.expires_at,
            last_used_at: api_key.last_used_at,
            is_active: api_key.is_active,
            created_at: api_key.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiKeyListResponse {
    pub keys: Vec<ApiKeyInfo>,
}
