use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::OAuthError;
use crate::models::RefreshToken;

const TOKEN_COLUMNS: &str = "id, token_hash, family_id, rotation_counter, parent_jti, \
     client_id, user_id, scopes, project_scope, status, expires_at, created_at";

/// Repository for refresh-token rows.
///
/// Rotation for a family is serialized through `find_by_hash_for_update`,
/// which takes a row lock inside the caller's transaction.
#[derive(Clone)]
pub struct RefreshTokenRepository {
    pool: PgPool,
}

impl RefreshTokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert the first member of a new family.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_family(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        token_hash: &str,
        client_id: Uuid,
        user_id: Uuid,
        scopes: &[String],
        project_scope: &str,
        parent_jti: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshToken, OAuthError> {
        let token = sqlx::query_as::<_, RefreshToken>(&format!(
            r#"
            INSERT INTO refresh_tokens
            (id, token_hash, family_id, rotation_counter, parent_jti,
             client_id, user_id, scopes, project_scope, status, expires_at)
            VALUES ($1, $2, $3, 0, $4, $5, $6, $7, $8, 'active', $9)
            RETURNING {TOKEN_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(token_hash)
        .bind(Uuid::new_v4())
        .bind(parent_jti)
        .bind(client_id)
        .bind(user_id)
        .bind(serde_json::to_value(scopes).unwrap_or_default())
        .bind(project_scope)
        .bind(expires_at)
        .fetch_one(&mut **tx)
        .await?;

        Ok(token)
    }

    /// Insert the next member of an existing family during rotation.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_in_family(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        token_hash: &str,
        previous: &RefreshToken,
        scopes: &[String],
        parent_jti: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshToken, OAuthError> {
        let token = sqlx::query_as::<_, RefreshToken>(&format!(
            r#"
            INSERT INTO refresh_tokens
            (id, token_hash, family_id, rotation_counter, parent_jti,
             client_id, user_id, scopes, project_scope, status, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'active', $10)
            RETURNING {TOKEN_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(token_hash)
        .bind(previous.family_id)
        .bind(previous.rotation_counter + 1)
        .bind(parent_jti)
        .bind(previous.client_id)
        .bind(previous.user_id)
        .bind(serde_json::to_value(scopes).unwrap_or_default())
        .bind(&previous.project_scope)
        .bind(expires_at)
        .fetch_one(&mut **tx)
        .await?;

        Ok(token)
    }

    /// Find a token row by its hash regardless of status. Used to recognize
    /// rotated-member reuse.
    pub async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>, OAuthError> {
        let token = sqlx::query_as::<_, RefreshToken>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM refresh_tokens WHERE token_hash = $1"
        ))
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(token)
    }

    /// Find and row-lock a token inside the caller's transaction. Concurrent
    /// rotations of the same family queue up here.
    pub async fn find_by_hash_for_update(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        token_hash: &str,
    ) -> Result<Option<RefreshToken>, OAuthError> {
        let token = sqlx::query_as::<_, RefreshToken>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM refresh_tokens WHERE token_hash = $1 FOR UPDATE"
        ))
        .bind(token_hash)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(token)
    }

    /// Mark a single token rotated.
    pub async fn mark_rotated(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<(), OAuthError> {
        sqlx::query("UPDATE refresh_tokens SET status = 'rotated' WHERE id = $1 AND status = 'active'")
            .bind(id)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }

    /// Revoke every member of a family inside the caller's transaction.
    /// Idempotent.
    pub async fn revoke_family_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        family_id: Uuid,
    ) -> Result<u64, OAuthError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET status = 'revoked' WHERE family_id = $1 AND status <> 'revoked'",
        )
        .bind(family_id)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected())
    }

    /// Delete expired tokens (cleanup)
    pub async fn delete_expired(&self) -> Result<u64, OAuthError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
