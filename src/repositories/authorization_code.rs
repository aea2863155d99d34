use chrono::{Duration, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::OAuthError;
use crate::models::AuthorizationCode;

const CODE_COLUMNS: &str = "id, code_hash, client_id, user_id, redirect_uri, scopes, \
     code_challenge, code_challenge_method, project_scope, expires_at, consumed, created_at";

/// Repository for authorization-code rows. Codes are stored only as hashes
/// and live for at most ten minutes.
#[derive(Clone)]
pub struct AuthorizationCodeRepository {
    pool: PgPool,
}

impl AuthorizationCodeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        code_hash: &str,
        client_id: Uuid,
        user_id: Uuid,
        redirect_uri: &str,
        scopes: &[String],
        code_challenge: &str,
        code_challenge_method: &str,
        project_scope: &str,
        ttl_secs: i64,
    ) -> Result<AuthorizationCode, OAuthError> {
        // TTL is capped at 10 minutes no matter what the caller asks for
        let ttl_secs = ttl_secs.min(600);
        let expires_at = Utc::now() + Duration::seconds(ttl_secs);

        let code = sqlx::query_as::<_, AuthorizationCode>(&format!(
            r#"
            INSERT INTO authorization_codes
            (id, code_hash, client_id, user_id, redirect_uri, scopes,
             code_challenge, code_challenge_method, project_scope, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {CODE_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(code_hash)
        .bind(client_id)
        .bind(user_id)
        .bind(redirect_uri)
        .bind(serde_json::to_value(scopes).unwrap_or_default())
        .bind(code_challenge)
        .bind(code_challenge_method)
        .bind(project_scope)
        .bind(expires_at)
        .fetch_one(&mut **tx)
        .await?;

        Ok(code)
    }

    /// Atomically consume a code: flips `consumed` and returns the row, or
    /// returns `None` if the code is unknown, already consumed, or expired.
    /// Two concurrent exchanges of the same code race on this single UPDATE
    /// and exactly one wins.
    pub async fn consume(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        code_hash: &str,
    ) -> Result<Option<AuthorizationCode>, OAuthError> {
        let code = sqlx::query_as::<_, AuthorizationCode>(&format!(
            r#"
            UPDATE authorization_codes
            SET consumed = TRUE
            WHERE code_hash = $1 AND consumed = FALSE AND expires_at > NOW()
            RETURNING {CODE_COLUMNS}
            "#
        ))
        .bind(code_hash)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(code)
    }

    /// Delete codes past their expiry (cleanup)
    pub async fn delete_expired(&self) -> Result<u64, OAuthError> {
        let result = sqlx::query("DELETE FROM authorization_codes WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
