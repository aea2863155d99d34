//! Browser-session management
//!
//! Session tokens are opaque, stored hashed, and bound to a cookie scoped to
//! the auth domain. Every refresh mints a new session id and invalidates the
//! old one; revocation is checked on every use with a short-lived cache in
//! front of the session table.

use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::cache::Cache;
use crate::error::AuthError;
use crate::models::{AuditAction, AuditEntry, Session};
use crate::repositories::SessionRepository;
use crate::services::audit::AuditService;
use crate::services::event_store::{EventStore, NewEvent};
use crate::services::users::DESTINATION_AUTH_EVENTS;
use crate::utils::seal;
use crate::utils::secret::{generate_token, hash_token};

/// Cookie carrying the session token.
pub const SESSION_COOKIE: &str = "session_id";

/// Cap for cached revocation lookups; the real TTL is the smaller of this and
/// the session's remaining life.
const CACHE_TTL_CAP_SECS: i64 = 300;

#[derive(Clone)]
pub struct SessionService {
    repo: SessionRepository,
    events: EventStore,
    audit: AuditService,
    cache: Cache,
    pool: PgPool,
    session_expiry_secs: i64,
    seal_key: Option<[u8; 32]>,
}

impl SessionService {
    pub fn new(
        pool: PgPool,
        cache: Cache,
        session_expiry_secs: i64,
        seal_key: Option<[u8; 32]>,
    ) -> Self {
        Self {
            repo: SessionRepository::new(pool.clone()),
            events: EventStore::new(pool.clone()),
            audit: AuditService::new(pool.clone()),
            cache,
            pool,
            session_expiry_secs,
            seal_key,
        }
    }

    fn cache_key(token_hash: &str) -> String {
        format!("session:{token_hash}")
    }

    /// Create a session for a user who just authenticated interactively.
    /// Returns the row and the opaque token destined for the cookie.
    pub async fn create(
        &self,
        user_id: Uuid,
        device_fingerprint: Option<&str>,
    ) -> Result<(Session, String), AuthError> {
        let token = generate_token();
        let token_hash = hash_token(&token);
        let expires_at = Utc::now() + Duration::seconds(self.session_expiry_secs);

        let sealed_fingerprint = device_fingerprint
            .map(|fp| seal::seal(self.seal_key.as_ref(), fp))
            .transpose()?;

        let mut tx = self.pool.begin().await?;
        let session = self
            .repo
            .create(
                &mut tx,
                &token_hash,
                user_id,
                sealed_fingerprint.as_deref(),
                expires_at,
            )
            .await?;
        self.events
            .append(
                &mut tx,
                NewEvent::new("session", session.id, "session_created")
                    .with_metadata(serde_json::json!({ "actor": user_id })),
                &[DESTINATION_AUTH_EVENTS],
            )
            .await?;
        tx.commit().await?;

        self.audit.record(
            AuditAction::SessionCreated,
            AuditEntry {
                actor: Some(user_id.to_string()),
                subject: Some(session.id.to_string()),
                ..AuditEntry::ok()
            },
        );

        Ok((session, token))
    }

    /// Validate a presented session token. Cached positives short-circuit the
    /// table lookup; the cache TTL never outlives the session.
    pub async fn validate(&self, token: &str) -> Result<Option<Session>, AuthError> {
        let token_hash = hash_token(token);
        let key = Self::cache_key(&token_hash);

        if let Some(session) = self.cache.get_json::<Session>(&key).await {
            if session.is_valid() {
                return Ok(Some(session));
            }
            self.cache.delete(&key).await;
        }

        let Some(session) = self.repo.find_valid_by_token_hash(&token_hash).await? else {
            return Ok(None);
        };

        let ttl = session.remaining_secs().min(CACHE_TTL_CAP_SECS);
        if ttl > 0 {
            self.cache.set_json(&key, &session, ttl as u64).await;
        }

        Ok(Some(session))
    }

    /// Rotate a session: the presented token is invalidated and a fresh one
    /// is issued for the same user in one transaction.
    pub async fn refresh(&self, token: &str) -> Result<(Session, String), AuthError> {
        let old_hash = hash_token(token);
        let current = self
            .repo
            .find_valid_by_token_hash(&old_hash)
            .await?
            .ok_or(AuthError::InvalidSession)?;

        let new_token = generate_token();
        let new_hash = hash_token(&new_token);
        let expires_at = Utc::now() + Duration::seconds(self.session_expiry_secs);

        let mut tx = self.pool.begin().await?;
        self.repo.revoke_by_token_hash(&mut tx, &old_hash).await?;
        let session = self
            .repo
            .create(
                &mut tx,
                &new_hash,
                current.user_id,
                current.device_fingerprint.as_deref(),
                expires_at,
            )
            .await?;
        self.events
            .append(
                &mut tx,
                NewEvent::new("session", session.id, "session_refreshed")
                    .with_payload(serde_json::json!({ "previous": current.id }))
                    .with_metadata(serde_json::json!({ "actor": current.user_id })),
                &[DESTINATION_AUTH_EVENTS],
            )
            .await?;
        tx.commit().await?;

        self.cache.delete(&Self::cache_key(&old_hash)).await;

        self.audit.record(
            AuditAction::SessionRefreshed,
            AuditEntry {
                actor: Some(current.user_id.to_string()),
                subject: Some(session.id.to_string()),
                ..AuditEntry::ok()
            },
        );

        Ok((session, new_token))
    }

    /// Revoke the session behind a presented token. Idempotent.
    pub async fn revoke(&self, token: &str) -> Result<(), AuthError> {
        let token_hash = hash_token(token);
        let existing = self.repo.find_valid_by_token_hash(&token_hash).await?;

        let mut tx = self.pool.begin().await?;
        self.repo.revoke_by_token_hash(&mut tx, &token_hash).await?;
        if let Some(session) = &existing {
            self.events
                .append(
                    &mut tx,
                    NewEvent::new("session", session.id, "session_revoked")
                        .with_metadata(serde_json::json!({ "actor": session.user_id })),
                    &[DESTINATION_AUTH_EVENTS],
                )
                .await?;
        }
        tx.commit().await?;

        self.cache.delete(&Self::cache_key(&token_hash)).await;

        if let Some(session) = existing {
            self.audit.record(
                AuditAction::SessionRevoked,
                AuditEntry {
                    actor: Some(session.user_id.to_string()),
                    subject: Some(session.id.to_string()),
                    ..AuditEntry::ok()
                },
            );
        }

        Ok(())
    }

    pub async fn list(&self, user_id: Uuid) -> Result<Vec<Session>, AuthError> {
        self.repo.list_active_by_user(user_id).await
    }

    /// Revoke one of the caller's sessions by id.
    pub async fn revoke_by_id(&self, user_id: Uuid, session_id: Uuid) -> Result<(), AuthError> {
        let mut tx = self.pool.begin().await?;
        let revoked = self
            .repo
            .revoke_by_id_for_user(&mut tx, session_id, user_id)
            .await?;
        if revoked > 0 {
            self.events
                .append(
                    &mut tx,
                    NewEvent::new("session", session_id, "session_revoked")
                        .with_metadata(serde_json::json!({ "actor": user_id })),
                    &[DESTINATION_AUTH_EVENTS],
                )
                .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    /// Build the Set-Cookie value for a freshly issued session token.
    pub fn build_cookie(&self, token: &str, domain: Option<&str>) -> String {
        let mut cookie = format!(
            "{SESSION_COOKIE}={token}; Path=/; Max-Age={}; HttpOnly; Secure; SameSite=Lax",
            self.session_expiry_secs
        );
        if let Some(domain) = domain {
            cookie.push_str("; Domain=");
            cookie.push_str(domain);
        }
        cookie
    }

    /// Build the Set-Cookie value that clears the session cookie.
    pub fn clear_cookie(domain: Option<&str>) -> String {
        let mut cookie =
            format!("{SESSION_COOKIE}=; Path=/; Max-Age=0; HttpOnly; Secure; SameSite=Lax");
        if let Some(domain) = domain {
            cookie.push_str("; Domain=");
            cookie.push_str(domain);
        }
        cookie
    }
}

/// Pull the session token out of a Cookie header value.
pub fn session_token_from_cookie_header(header: &str) -> Option<&str> {
    header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE).then_some(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_carries_required_attributes() {
        let service_cookie = format!(
            "{SESSION_COOKIE}=tok; Path=/; Max-Age=86400; HttpOnly; Secure; SameSite=Lax"
        );
        assert!(service_cookie.contains("HttpOnly"));
        assert!(service_cookie.contains("Secure"));
        assert!(service_cookie.contains("SameSite=Lax"));
        assert!(service_cookie.contains("Path=/"));
    }

    #[test]
    fn clear_cookie_zeroes_max_age() {
        let cookie = SessionService::clear_cookie(Some("auth.example.com"));
        assert!(cookie.contains("Max-Age=0"));
        assert!(cookie.contains("Domain=auth.example.com"));
    }

    #[test]
    fn cookie_header_parsing() {
        assert_eq!(
            session_token_from_cookie_header("session_id=abc123"),
            Some("abc123")
        );
        assert_eq!(
            session_token_from_cookie_header("theme=dark; session_id=abc123; lang=en"),
            Some("abc123")
        );
        assert_eq!(session_token_from_cookie_header("theme=dark"), None);
        assert_eq!(session_token_from_cookie_header(""), None);
    }

    #[test]
    fn lookalike_cookie_names_ignored() {
        assert_eq!(
            session_token_from_cookie_header("xsession_id=evil; session_id=good"),
            Some("good")
        );
    }
}
