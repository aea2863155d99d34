use chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;

/// A machine credential. The plaintext key exists only in the creation
/// response; storage holds the searchable prefix and a salted PBKDF2 hash.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApiKey {
    pub id: Uuid,
    pub name: String,
    pub owner_user_id: Uuid,
    pub organization_id: Option<Uuid>,
    pub key_prefix: String,
    pub key_hash: String,
    pub scopes: Json<Vec<String>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }

    /// Expired or inactive keys never authenticate.
    pub fn can_authenticate(&self) -> bool {
        self.is_active && !self.is_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_key(expires_at: Option<DateTime<Utc>>, is_active: bool) -> ApiKey {
        ApiKey {
            id: Uuid::new_v4(),
            name: "ci".to_string(),
            owner_user_id: Uuid::new_v4(),
            organization_id: None,
            key_prefix: "sk_live_0123".to_string(),
            key_hash: "salt:hash".to_string(),
            scopes: Json(vec!["read".to_string()]),
            expires_at,
            last_used_at: None,
            is_active,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn active_unexpired_key_authenticates() {
        let key = test_key(Some(Utc::now() + Duration::hours(1)), true);
        assert!(key.can_authenticate());
    }

    #[test]
    fn expired_key_never_authenticates() {
        let key = test_key(Some(Utc::now() - Duration::seconds(1)), true);
        assert!(!key.can_authenticate());
    }

    #[test]
    fn revoked_key_never_authenticates() {
        let key = test_key(None, false);
        assert!(!key.can_authenticate());
    }

    #[test]
    fn key_without_expiry_does_not_expire() {
        let key = test_key(None, true);
        assert!(!key.is_expired());
        assert!(key.can_authenticate());
    }
}
