use chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;

/// Lifecycle of a refresh token within its family.
///
/// `active -> rotated` on each successful refresh; any member (and therefore
/// the whole family) can move to `revoked`, which is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTokenStatus {
    Active,
    Rotated,
    Revoked,
}

impl RefreshTokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshTokenStatus::Active => "active",
            RefreshTokenStatus::Rotated => "rotated",
            RefreshTokenStatus::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(RefreshTokenStatus::Active),
            "rotated" => Some(RefreshTokenStatus::Rotated),
            "revoked" => Some(RefreshTokenStatus::Revoked),
            _ => None,
        }
    }
}

/// An opaque refresh token, stored only as a hash.
///
/// Tokens form a family: each rotation creates a new member pointing at its
/// parent via `parent_jti`. Presenting a rotated member is reuse and revokes
/// the whole family.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RefreshToken {
    pub id: Uuid,
    pub token_hash: String,
    pub family_id: Uuid,
    pub rotation_counter: i32,
    pub parent_jti: Option<String>,
    pub client_id: Uuid,
    pub user_id: Uuid,
    pub scopes: Json<Vec<String>>,
    pub project_scope: String,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl RefreshToken {
    pub fn status(&self) -> Option<RefreshTokenStatus> {
        RefreshTokenStatus::parse(&self.status)
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trip() {
        for status in [
            RefreshTokenStatus::Active,
            RefreshTokenStatus::Rotated,
            RefreshTokenStatus::Revoked,
        ] {
            assert_eq!(RefreshTokenStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RefreshTokenStatus::parse("unknown"), None);
    }
}
