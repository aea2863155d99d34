use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::AuthError;
use crate::models::Session;

const SESSION_COLUMNS: &str =
    "id, token_hash, user_id, device_fingerprint, issued_at, last_seen_at, expires_at, revoked";

/// Repository for browser-session rows.
#[derive(Clone)]
pub struct SessionRepository {
    pool: PgPool,
}

impl SessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        token_hash: &str,
        user_id: Uuid,
        device_fingerprint: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<Session, AuthError> {
        let session = sqlx::query_as::<_, Session>(&format!(
            r#"
            INSERT INTO sessions (id, token_hash, user_id, device_fingerprint, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(token_hash)
        .bind(user_id)
        .bind(device_fingerprint)
        .bind(expires_at)
        .fetch_one(&mut **tx)
        .await?;

        Ok(session)
    }

    /// Find a live session by token hash and touch `last_seen_at`.
    pub async fn find_valid_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<Session>, AuthError> {
        let session = sqlx::query_as::<_, Session>(&format!(
            r#"
            UPDATE sessions
            SET last_seen_at = NOW()
            WHERE token_hash = $1 AND revoked = FALSE AND expires_at > NOW()
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    /// Revoke a session by token hash. Idempotent.
    pub async fn revoke_by_token_hash(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        token_hash: &str,
    ) -> Result<u64, AuthError> {
        let result = sqlx::query("UPDATE sessions SET revoked = TRUE WHERE token_hash = $1")
            .bind(token_hash)
            .execute(&mut **tx)
            .await?;

        Ok(result.rows_affected())
    }

    /// Revoke one of the user's sessions by id. The ownership check keeps a
    /// caller from revoking someone else's session.
    pub async fn revoke_by_id_for_user(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<u64, AuthError> {
        let result =
            sqlx::query("UPDATE sessions SET revoked = TRUE WHERE id = $1 AND user_id = $2")
                .bind(id)
                .bind(user_id)
                .execute(&mut **tx)
                .await?;

        Ok(result.rows_affected())
    }

    pub async fn list_active_by_user(&self, user_id: Uuid) -> Result<Vec<Session>, AuthError> {
        let sessions = sqlx::query_as::<_, Session>(&format!(
            r#"
            SELECT {SESSION_COLUMNS}
            FROM sessions
            WHERE user_id = $1 AND revoked = FALSE AND expires_at > NOW()
            ORDER BY issued_at DESC
            "#
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(sessions)
    }

    /// Delete expired sessions (cleanup)
    pub async fn delete_expired(&self) -> Result<u64, AuthError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
