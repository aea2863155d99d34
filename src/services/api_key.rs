//! API-key lifecycle
//!
//! Keys are issued with the environment prefix, returned in plaintext exactly
//! once, and stored as prefix + salted PBKDF2 hash. Every lifecycle change
//! appends an event in the same transaction as the row change.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::ApiKeyError;
use crate::models::{ApiKey, AuditAction, AuditEntry};
use crate::services::audit::AuditService;
use crate::services::event_store::{EventStore, NewEvent};
use crate::services::users::DESTINATION_AUTH_EVENTS;
use crate::repositories::ApiKeyRepository;
use crate::utils::secret::{api_key_prefix, generate_api_key, hash_secret, verify_secret};

#[derive(Clone)]
pub struct ApiKeyService {
    repo: ApiKeyRepository,
    events: EventStore,
    audit: AuditService,
    pool: PgPool,
    issued_prefix: String,
}

impl ApiKeyService {
    pub fn new(pool: PgPool, issued_prefix: String) -> Self {
        Self {
            repo: ApiKeyRepository::new(pool.clone()),
            events: EventStore::new(pool.clone()),
            audit: AuditService::new(pool.clone()),
            pool,
            issued_prefix,
        }
    }

    /// Create a key. Returns the record and the plaintext key; the plaintext
    /// never leaves this call path again.
    pub async fn create(
        &self,
        owner_user_id: Uuid,
        organization_id: Option<Uuid>,
        name: &str,
        scopes: Vec<String>,
        expires_at: Option<DateTime<Utc>>,
        owner_allowed_scopes: &[String],
    ) -> Result<(ApiKey, String), ApiKeyError> {
        if !scopes
            .iter()
            .all(|s| owner_allowed_scopes.iter().any(|a| a == s))
        {
            return Err(ApiKeyError::ScopeExceedsOwner);
        }

        let key = generate_api_key(&self.issued_prefix);
        let prefix = api_key_prefix(&key).to_string();
        let key_hash = hash_secret(&key);

        let mut tx = self.pool.begin().await?;
        let api_key = self
            .repo
            .create(
                &mut tx,
                name,
                owner_user_id,
                organization_id,
                &prefix,
                &key_hash,
                &scopes,
                expires_at,
            )
            .await?;
        self.events
            .append(
                &mut tx,
                NewEvent::new("api_key", api_key.id, "api_key_created")
                    .with_payload(serde_json::json!({
                        "name": name,
                        "key_prefix": prefix,
                        "scopes": scopes,
                    }))
                    .with_metadata(serde_json::json!({ "actor": owner_user_id })),
                &[DESTINATION_AUTH_EVENTS],
            )
            .await?;
        tx.commit().await?;

        self.audit.record(
            AuditAction::ApiKeyCreated,
            AuditEntry {
                actor: Some(owner_user_id.to_string()),
                subject: Some(api_key.id.to_string()),
                ..AuditEntry::ok()
            },
        );

        Ok((api_key, key))
    }

    pub async fn list(&self, owner_user_id: Uuid) -> Result<Vec<ApiKey>, ApiKeyError> {
        self.repo.list_by_owner(owner_user_id).await
    }

    pub async fn get(&self, id: Uuid, owner_user_id: Uuid) -> Result<ApiKey, ApiKeyError> {
        let key = self.repo.find_by_id(id).await?.ok_or(ApiKeyError::NotFound)?;
        if key.owner_user_id != owner_user_id {
            return Err(ApiKeyError::NotFound);
        }
        Ok(key)
    }

    /// Rotate key material. The old plaintext stops working immediately; the
    /// new plaintext is returned exactly once.
    pub async fn rotate(&self, id: Uuid, owner_user_id: Uuid) -> Result<(ApiKey, String), ApiKeyError> {
        let existing = self.get(id, owner_user_id).await?;
        if !existing.is_active {
            return Err(ApiKeyError::Revoked);
        }

        let key = generate_api_key(&self.issued_prefix);
        let prefix = api_key_prefix(&key).to_string();
        let key_hash = hash_secret(&key);

        let mut tx = self.pool.begin().await?;
        let rotated = self
            .repo
            .replace_key_material(&mut tx, id, &prefix, &key_hash)
            .await?;
        self.events
            .append(
                &mut tx,
                NewEvent::new("api_key", id, "api_key_rotated")
                    .with_payload(serde_json::json!({ "key_prefix": prefix }))
                    .with_metadata(serde_json::json!({ "actor": owner_user_id })),
                &[DESTINATION_AUTH_EVENTS],
            )
            .await?;
        tx.commit().await?;

        self.audit.record(
            AuditAction::ApiKeyRotated,
            AuditEntry {
                actor: Some(owner_user_id.to_string()),
                subject: Some(id.to_string()),
                ..AuditEntry::ok()
            },
        );

        Ok((rotated, key))
    }

    /// Revoke a key. Idempotent: revoking an already-revoked key succeeds.
    pub async fn revoke(&self, id: Uuid, owner_user_id: Uuid) -> Result<(), ApiKeyError> {
        // Ownership check before the write
        let _ = self.get(id, owner_user_id).await?;

        let mut tx = self.pool.begin().await?;
        self.repo.revoke(&mut tx, id).await?;
        self.events
            .append(
                &mut tx,
                NewEvent::new("api_key", id, "api_key_revoked")
                    .with_metadata(serde_json::json!({ "actor": owner_user_id })),
                &[DESTINATION_AUTH_EVENTS],
            )
            .await?;
        tx.commit().await?;

        self.audit.record(
            AuditAction::ApiKeyRevoked,
            AuditEntry {
                actor: Some(owner_user_id.to_string()),
                subject: Some(id.to_string()),
                ..AuditEntry::ok()
            },
        );

        Ok(())
    }

    /// Verify a presented key: narrow by prefix, then PBKDF2 compare each
    /// candidate in constant time. `last_used_at` is updated on a spawned
    /// task so the request never waits on it.
    pub async fn verify(&self, presented: &str) -> Result<ApiKey, ApiKeyError> {
        if presented.len() < 12 {
            return Err(ApiKeyError::InvalidKey);
        }

        let prefix = api_key_prefix(presented);
        let candidates = self.repo.find_active_by_prefix(prefix).await?;

        for candidate in candidates {
            if verify_secret(presented, &candidate.key_hash) {
                if !candidate.can_authenticate() {
                    return Err(if candidate.is_expired() {
                        ApiKeyError::Expired
                    } else {
                        ApiKeyError::Revoked
                    });
                }

                let repo = self.repo.clone();
                let key_id = candidate.id;
                tokio::spawn(async move {
                    if let Err(e) = repo.update_last_used(key_id).await {
                        tracing::warn!("Failed to update last_used_at for {}: {}", key_id, e);
                    }
                });

                return Ok(candidate);
            }
        }

        Err(ApiKeyError::InvalidKey)
    }
}
