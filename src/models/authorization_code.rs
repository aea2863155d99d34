use chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;

/// A single-use authorization code, stored only as a hash.
///
/// Consumption is exactly-once: the repository flips `consumed` atomically
/// and a second attempt finds nothing.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuthorizationCode {
    pub id: Uuid,
    pub code_hash: String,
    pub client_id: Uuid,
    pub user_id: Uuid,
    pub redirect_uri: String,
    pub scopes: Json<Vec<String>>,
    pub code_challenge: String,
    pub code_challenge_method: String,
    pub project_scope: String,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
    pub created_at: DateTime<Utc>,
}
