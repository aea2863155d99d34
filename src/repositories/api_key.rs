use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::ApiKeyError;
use crate::models::ApiKey;

const KEY_COLUMNS: &str = "id, name, owner_user_id, organization_id, key_prefix, key_hash, \
     scopes, expires_at, last_used_at, is_active, created_at";

/// Repository for API-key rows. The plaintext key never reaches this layer;
/// callers hand over the prefix and the PBKDF2 `salt:hash` record.
#[derive(Clone)]
pub struct ApiKeyRepository {
    pool: PgPool,
}

impl ApiKeyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        name: &str,
        owner_user_id: Uuid,
        organization_id: Option<Uuid>,
        key_prefix: &str,
        key_hash: &str,
        scopes: &[String],
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<ApiKey, ApiKeyError> {
        let key = sqlx::query_as::<_, ApiKey>(&format!(
            r#"
            INSERT INTO api_keys
            (id, name, owner_user_id, organization_id, key_prefix, key_hash, scopes, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {KEY_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(owner_user_id)
        .bind(organization_id)
        .bind(key_prefix)
        .bind(key_hash)
        .bind(serde_json::to_value(scopes).unwrap_or_default())
        .bind(expires_at)
        .fetch_one(&mut **tx)
        .await?;

        Ok(key)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<ApiKey>, ApiKeyError> {
        let key = sqlx::query_as::<_, ApiKey>(&format!(
            "SELECT {KEY_COLUMNS} FROM api_keys WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(key)
    }

    /// Candidate rows for a presented key, narrowed by prefix. The prefix is
    /// unique so this returns at most one row, but the hash compare still
    /// decides.
    pub async fn find_active_by_prefix(&self, prefix: &str) -> Result<Vec<ApiKey>, ApiKeyError> {
        let keys = sqlx::query_as::<_, ApiKey>(&format!(
            "SELECT {KEY_COLUMNS} FROM api_keys WHERE key_prefix = $1 AND is_active = TRUE"
        ))
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;

        Ok(keys)
    }

    pub async fn list_by_owner(&self, owner_user_id: Uuid) -> Result<Vec<ApiKey>, ApiKeyError> {
        let keys = sqlx::query_as::<_, ApiKey>(&format!(
            "SELECT {KEY_COLUMNS} FROM api_keys WHERE owner_user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(owner_user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(keys)
    }

    /// Swap in new key material during rotation.
    pub async fn replace_key_material(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        key_prefix: &str,
        key_hash: &str,
    ) -> Result<ApiKey, ApiKeyError> {
        let key = sqlx::query_as::<_, ApiKey>(&format!(
            r#"
            UPDATE api_keys
            SET key_prefix = $2, key_hash = $3
            WHERE id = $1 AND is_active = TRUE
            RETURNING {KEY_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(key_prefix)
        .bind(key_hash)
        .fetch_optional(&mut **tx)
        .await?;

        key.ok_or(ApiKeyError::NotFound)
    }

    pub async fn revoke(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<u64, ApiKeyError> {
        let result = sqlx::query("UPDATE api_keys SET is_active = FALSE WHERE id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn update_last_used(&self, id: Uuid) -> Result<(), ApiKeyError> {
        sqlx::query("UPDATE api_keys SET last_used_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
