use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::OAuthError;
use crate::models::Client;

const CLIENT_COLUMNS: &str = "id, client_id, confidential, secret_hash, redirect_uris, \
     grant_types, allowed_scopes, project_scopes, pkce_required, allow_plain_pkce, \
     organization_id, created_at";

/// Repository for OAuth client rows.
#[derive(Clone)]
pub struct ClientRepository {
    pool: PgPool,
}

impl ClientRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register a new client in the caller's transaction. `secret_hash` is
    /// present only for confidential clients.
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        client_id: &str,
        confidential: bool,
        secret_hash: Option<&str>,
        redirect_uris: &[String],
        grant_types: &[String],
        allowed_scopes: &[String],
        project_scopes: &[String],
        allow_plain_pkce: bool,
        organization_id: Option<Uuid>,
    ) -> Result<Client, OAuthError> {
        let id = Uuid::new_v4();

        let client = sqlx::query_as::<_, Client>(&format!(
            r#"
            INSERT INTO clients
            (id, client_id, confidential, secret_hash, redirect_uris, grant_types,
             allowed_scopes, project_scopes, pkce_required, allow_plain_pkce, organization_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {CLIENT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(client_id)
        .bind(confidential)
        .bind(secret_hash)
        .bind(serde_json::to_value(redirect_uris).unwrap_or_default())
        .bind(serde_json::to_value(grant_types).unwrap_or_default())
        .bind(serde_json::to_value(allowed_scopes).unwrap_or_default())
        .bind(serde_json::to_value(project_scopes).unwrap_or_default())
        .bind(!confidential)
        .bind(allow_plain_pkce)
        .bind(organization_id)
        .fetch_one(&mut **tx)
        .await?;

        Ok(client)
    }

    /// Find a client by its public identifier.
    pub async fn find_by_client_id(&self, client_id: &str) -> Result<Option<Client>, OAuthError> {
        let client = sqlx::query_as::<_, Client>(&format!(
            "SELECT {CLIENT_COLUMNS} FROM clients WHERE client_id = $1"
        ))
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(client)
    }
}
