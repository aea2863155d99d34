//! OAuth2 authorization service
//!
//! Implements the authorization-code flow with PKCE, refresh-token rotation
//! with family revocation on reuse, the client-credentials grant, RFC 7662
//! introspection, and idempotent revocation. Opaque refresh tokens keep
//! revocation a row update; JWT access tokens let downstream services verify
//! offline.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::cache::Cache;
use crate::error::OAuthError;
use crate::models::{AuditAction, AuditEntry, Client, RefreshTokenStatus};
use crate::repositories::{
    AuthorizationCodeRepository, ClientRepository, RefreshTokenRepository,
};
use crate::services::audit::AuditService;
use crate::services::event_store::{EventStore, NewEvent};
use crate::services::users::DESTINATION_AUTH_EVENTS;
use crate::utils::jwt::JwtManager;
use crate::utils::pkce::{
    validate_code_challenge, validate_code_verifier, verify_pkce, PKCE_METHOD_PLAIN,
    PKCE_METHOD_S256,
};
use crate::utils::secret::{generate_token, hash_secret, hash_token, verify_secret};

/// Authorization codes live at most ten minutes.
const CODE_TTL_SECS: i64 = 600;

/// TTL for cached client metadata.
const CLIENT_CACHE_TTL_SECS: u64 = 300;

/// TTL for cached refresh-token lookups; invalidated on rotation.
const REFRESH_CACHE_TTL_SECS: u64 = 300;

pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";
pub const GRANT_CLIENT_CREDENTIALS: &str = "client_credentials";

/// OAuth2 token response per RFC 6749.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthTokenResponse {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_in: i64,
    pub scope: String,
}

impl OAuthTokenResponse {
    pub fn new(
        access_token: String,
        refresh_token: Option<String>,
        expires_in: i64,
        scopes: &[String],
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in,
            scope: scopes.join(" "),
        }
    }
}

/// RFC 7662 introspection response. Unknown and expired tokens get the bare
/// `{active: false}` shape with every other field absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_scope: Option<String>,
}

impl IntrospectionResponse {
    pub fn inactive() -> Self {
        Self {
            active: false,
            sub: None,
            scope: None,
            exp: None,
            iat: None,
            client_id: None,
            token_type: None,
            project_scope: None,
        }
    }
}

/// Cached refresh-token lookup: enough to revoke a family without touching
/// the table. Written on issuance and rotation, removed on both paths that
/// retire a member.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedRefreshLookup {
    family_id: Uuid,
    user_id: Uuid,
}

/// Split a space-separated scope parameter into the scope set.
pub fn parse_scope(scope: Option<&str>) -> Vec<String> {
    scope
        .map(|s| s.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

/// OAuth2 service - handles the authorization flows
#[derive(Clone)]
pub struct OAuthService {
    clients: ClientRepository,
    codes: AuthorizationCodeRepository,
    refresh: RefreshTokenRepository,
    events: EventStore,
    audit: AuditService,
    jwt: JwtManager,
    cache: Cache,
    pool: PgPool,
    refresh_token_expiry_secs: i64,
}

impl OAuthService {
    pub fn new(
        pool: PgPool,
        cache: Cache,
        jwt: JwtManager,
        refresh_token_expiry_secs: i64,
    ) -> Self {
        Self {
            clients: ClientRepository::new(pool.clone()),
            codes: AuthorizationCodeRepository::new(pool.clone()),
            refresh: RefreshTokenRepository::new(pool.clone()),
            events: EventStore::new(pool.clone()),
            audit: AuditService::new(pool.clone()),
            jwt,
            cache,
            pool,
            refresh_token_expiry_secs,
        }
    }

    /// Resolve a client, consulting the cache before the table.
    pub async fn resolve_client(&self, client_id: &str) -> Result<Option<Client>, OAuthError> {
        let cache_key = format!("client:{client_id}");

        if let Some(client) = self.cache.get_json::<Client>(&cache_key).await {
            return Ok(Some(client));
        }

        let client = self.clients.find_by_client_id(client_id).await?;
        if let Some(client) = &client {
            self.cache
                .set_json(&cache_key, client, CLIENT_CACHE_TTL_SECS)
                .await;
        }

        Ok(client)
    }

    /// Validate a GET /authorize request and return the resolved client.
    ///
    /// Rejects unknown clients, unregistered redirect URIs (exact match),
    /// disallowed response types, and disallowed scopes. For clients that
    /// require PKCE the challenge is mandatory; `plain` is accepted only when
    /// the client explicitly allows it.
    pub async fn validate_authorization_request(
        &self,
        client_id: &str,
        redirect_uri: &str,
        response_type: &str,
        scopes: &[String],
        code_challenge: Option<&str>,
        code_challenge_method: Option<&str>,
    ) -> Result<Client, OAuthError> {
        let client = self
            .resolve_client(client_id)
            .await?
            .ok_or(OAuthError::InvalidClient)?;

        if !client.has_redirect_uri(redirect_uri) {
            return Err(OAuthError::InvalidRequest(
                "redirect_uri does not match any registered URI".to_string(),
            ));
        }

        if response_type != "code" {
            return Err(OAuthError::UnsupportedResponseType);
        }

        if !client.allows_grant(GRANT_AUTHORIZATION_CODE) {
            return Err(OAuthError::UnauthorizedClient);
        }

        if !client.allows_scopes(scopes) {
            return Err(OAuthError::InvalidScope(
                "One or more requested scopes are not allowed for this client".to_string(),
            ));
        }

        if client.requires_pkce() {
            let challenge = code_challenge.ok_or_else(|| {
                OAuthError::InvalidRequest("code_challenge is required".to_string())
            })?;

            let method = code_challenge_method.unwrap_or(PKCE_METHOD_S256);
            match method {
                PKCE_METHOD_S256 => {
                    if !validate_code_challenge(challenge) {
                        return Err(OAuthError::InvalidRequest(
                            "Invalid code_challenge format".to_string(),
                        ));
                    }
                }
                PKCE_METHOD_PLAIN => {
                    if !client.allow_plain_pkce {
                        return Err(OAuthError::InvalidRequest(
                            "code_challenge_method plain is not enabled for this client"
                                .to_string(),
                        ));
                    }
                    tracing::warn!(client_id = %client.client_id, "plain PKCE accepted");
                }
                _ => {
                    return Err(OAuthError::InvalidRequest(
                        "code_challenge_method must be S256 or plain".to_string(),
                    ));
                }
            }
        }

        Ok(client)
    }

    /// Mint a one-time authorization code for an authenticated user and bind
    /// a CSRF token to their session.
    ///
    /// Returns `(code, csrf_token)`; the code hash is persisted with the
    /// 10-minute TTL and mirrored into the cache for consume-and-delete.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_authorization_code(
        &self,
        client: &Client,
        user_id: Uuid,
        redirect_uri: &str,
        scopes: &[String],
        code_challenge: &str,
        code_challenge_method: &str,
        session_token_hash: &str,
    ) -> Result<(String, String), OAuthError> {
        let project_scope = client.default_project_scope().ok_or_else(|| {
            OAuthError::ServerError(format!(
                "client {} has no registered project scope",
                client.client_id
            ))
        })?;

        let code = generate_token();
        let code_hash = hash_token(&code);

        let mut tx = self.pool.begin().await?;
        self.codes
            .create(
                &mut tx,
                &code_hash,
                client.id,
                user_id,
                redirect_uri,
                scopes,
                code_challenge,
                code_challenge_method,
                project_scope,
                CODE_TTL_SECS,
            )
            .await?;
        self.events
            .append(
                &mut tx,
                NewEvent::new("user", user_id, "authorization_code_issued")
                    .with_payload(serde_json::json!({
                        "client_id": client.client_id,
                        "scopes": scopes,
                        "project_scope": project_scope,
                    })),
                &[DESTINATION_AUTH_EVENTS],
            )
            .await?;
        tx.commit().await?;

        // Hot copies; the database rows stay authoritative.
        self.cache
            .set_string(&format!("authcode:{code_hash}"), "1", CODE_TTL_SECS as u64)
            .await;
        let csrf_token = generate_token();
        self.cache
            .set_string(
                &format!("csrf:{session_token_hash}"),
                &csrf_token,
                CODE_TTL_SECS as u64,
            )
            .await;

        self.audit.record(
            AuditAction::AuthorizationCodeIssued,
            AuditEntry {
                actor: Some(user_id.to_string()),
                subject: Some(client.client_id.clone()),
                project_scope: Some(project_scope.to_string()),
                ..AuditEntry::ok()
            },
        );

        Ok((code, csrf_token))
    }

    /// Resolve and authenticate a client for endpoints that demand client
    /// authentication (`/introspect`, `/revoke`).
    pub async fn authenticate_client_credentials(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
    ) -> Result<Client, OAuthError> {
        let client = self
            .resolve_client(client_id)
            .await?
            .ok_or(OAuthError::InvalidClient)?;
        Self::authenticate_client(&client, client_secret)?;
        Ok(client)
    }

    /// Authenticate the caller of a token-endpoint request.
    ///
    /// Confidential clients must present their secret; the failure reason is
    /// deliberately uniform to avoid an oracle.
    fn authenticate_client(client: &Client, client_secret: Option<&str>) -> Result<(), OAuthError> {
        if !client.confidential {
            return Ok(());
        }

        let secret = client_secret.ok_or(OAuthError::InvalidClient)?;
        let hash = client.secret_hash.as_deref().ok_or(OAuthError::InvalidClient)?;

        if !verify_secret(secret, hash) {
            return Err(OAuthError::InvalidClient);
        }

        Ok(())
    }

    /// `grant_type=authorization_code`: consume the code atomically, verify
    /// the binding (client, redirect URI, PKCE), and issue a token pair with
    /// a fresh refresh-token family.
    pub async fn exchange_authorization_code(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<OAuthTokenResponse, OAuthError> {
        let client = self
            .resolve_client(client_id)
            .await?
            .ok_or(OAuthError::InvalidClient)?;
        Self::authenticate_client(&client, client_secret)?;

        let code_hash = hash_token(code);
        // Consume the cached copy too; a miss is fine, the row decides.
        self.cache.take(&format!("authcode:{code_hash}")).await;

        // Exactly-once: the UPDATE either flips the row or finds nothing.
        // Committed before any verification so a failed exchange still burns
        // the code.
        let mut consume_tx = self.pool.begin().await?;
        let auth_code = self
            .codes
            .consume(&mut consume_tx, &code_hash)
            .await?
            .ok_or_else(|| {
                OAuthError::InvalidGrant("Invalid or expired authorization code".to_string())
            })?;
        consume_tx.commit().await?;

        if auth_code.client_id != client.id {
            return Err(OAuthError::InvalidGrant(
                "Authorization code was not issued to this client".to_string(),
            ));
        }

        if auth_code.redirect_uri != redirect_uri {
            return Err(OAuthError::InvalidGrant(
                "redirect_uri does not match".to_string(),
            ));
        }

        // An empty stored challenge means the (confidential) client was
        // registered without PKCE; otherwise the verifier must check out.
        if !auth_code.code_challenge.is_empty() {
            let verifier = code_verifier.ok_or_else(|| {
                OAuthError::InvalidGrant("code_verifier is required".to_string())
            })?;
            if !validate_code_verifier(verifier) {
                return Err(OAuthError::InvalidGrant(
                    "Invalid code_verifier format".to_string(),
                ));
            }
            if !verify_pkce(
                verifier,
                &auth_code.code_challenge,
                &auth_code.code_challenge_method,
            ) {
                return Err(OAuthError::InvalidGrant(
                    "code_verifier does not match code_challenge".to_string(),
                ));
            }
        }

        let scopes = auth_code.scopes.0.clone();
        let (access_token, claims) = self
            .jwt
            .create_access_token(
                &auth_code.user_id.to_string(),
                &client.client_id,
                &scopes,
                &auth_code.project_scope,
            )
            .map_err(|e| OAuthError::ServerError(e.to_string()))?;

        let mut tx = self.pool.begin().await?;

        let refresh_token = generate_token();
        let refresh_hash = hash_token(&refresh_token);
        let refresh_expires = Utc::now() + Duration::seconds(self.refresh_token_expiry_secs);
        let refresh_row = self
            .refresh
            .create_family(
                &mut tx,
                &refresh_hash,
                client.id,
                auth_code.user_id,
                &scopes,
                &auth_code.project_scope,
                Some(&claims.jti),
                refresh_expires,
            )
            .await?;

        self.events
            .append(
                &mut tx,
                NewEvent::new("user", auth_code.user_id, "token_issued")
                    .with_payload(serde_json::json!({
                        "client_id": client.client_id,
                        "grant_type": GRANT_AUTHORIZATION_CODE,
                        "scopes": scopes,
                        "project_scope": auth_code.project_scope,
                        "jti": claims.jti,
                    })),
                &[DESTINATION_AUTH_EVENTS],
            )
            .await?;

        tx.commit().await?;

        self.cache
            .set_json(
                &format!("refresh:{refresh_hash}"),
                &CachedRefreshLookup {
                    family_id: refresh_row.family_id,
                    user_id: refresh_row.user_id,
                },
                REFRESH_CACHE_TTL_SECS,
            )
            .await;

        self.audit.record(
            AuditAction::TokenIssued,
            AuditEntry {
                actor: Some(auth_code.user_id.to_string()),
                subject: Some(client.client_id.clone()),
                project_scope: Some(auth_code.project_scope.clone()),
                details: Some(serde_json::json!({ "grant_type": GRANT_AUTHORIZATION_CODE })),
                ..AuditEntry::ok()
            },
        );

        Ok(OAuthTokenResponse::new(
            access_token,
            Some(refresh_token),
            self.jwt.access_token_expiry_secs(),
            &scopes,
        ))
    }

    /// `grant_type=refresh_token`: rotation is mandatory, scope downgrade is
    /// allowed, and presenting a rotated member revokes the entire family.
    pub async fn refresh_grant(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
        refresh_token: &str,
        requested_scopes: Option<Vec<String>>,
    ) -> Result<OAuthTokenResponse, OAuthError> {
        let client = self
            .resolve_client(client_id)
            .await?
            .ok_or(OAuthError::InvalidClient)?;
        Self::authenticate_client(&client, client_secret)?;

        let presented_hash = hash_token(refresh_token);

        let mut tx = self.pool.begin().await?;

        // Row lock serializes rotation per family: a concurrent refresh of
        // the same token queues here and then sees status = rotated.
        let row = self
            .refresh
            .find_by_hash_for_update(&mut tx, &presented_hash)
            .await?
            .ok_or_else(|| OAuthError::InvalidGrant("Unknown refresh token".to_string()))?;

        if row.client_id != client.id {
            return Err(OAuthError::InvalidGrant(
                "Refresh token was not issued to this client".to_string(),
            ));
        }

        match row.status() {
            Some(RefreshTokenStatus::Active) => {}
            Some(RefreshTokenStatus::Rotated) | Some(RefreshTokenStatus::Revoked) | None => {
                // Reuse of a rotated or revoked member burns the family.
                self.refresh.revoke_family_tx(&mut tx, row.family_id).await?;
                self.events
                    .append(
                        &mut tx,
                        NewEvent::new("user", row.user_id, "refresh_reuse_detected")
                            .with_payload(serde_json::json!({
                                "client_id": client.client_id,
                                "family_id": row.family_id,
                            })),
                        &[DESTINATION_AUTH_EVENTS],
                    )
                    .await?;
                tx.commit().await?;

                self.cache.delete(&format!("refresh:{presented_hash}")).await;
                self.audit.record(
                    AuditAction::RefreshReuseDetected,
                    AuditEntry {
                        actor: Some(row.user_id.to_string()),
                        subject: Some(client.client_id.clone()),
                        details: Some(serde_json::json!({ "family_id": row.family_id })),
                        ..AuditEntry::denied()
                    },
                );

                return Err(OAuthError::InvalidGrant(
                    "Refresh token has been rotated; family revoked".to_string(),
                ));
            }
        }

        if row.is_expired() {
            return Err(OAuthError::InvalidGrant("Refresh token expired".to_string()));
        }

        // Scope downgrade is allowed; upgrade is rejected.
        let scopes = match requested_scopes {
            Some(requested) => {
                if !requested.iter().all(|s| row.scopes.0.iter().any(|o| o == s)) {
                    return Err(OAuthError::InvalidScope(
                        "Requested scopes exceed the original grant".to_string(),
                    ));
                }
                requested
            }
            None => row.scopes.0.clone(),
        };

        let (access_token, claims) = self
            .jwt
            .create_access_token(
                &row.user_id.to_string(),
                &client.client_id,
                &scopes,
                &row.project_scope,
            )
            .map_err(|e| OAuthError::ServerError(e.to_string()))?;

        self.refresh.mark_rotated(&mut tx, row.id).await?;

        let new_refresh = generate_token();
        let new_hash = hash_token(&new_refresh);
        let expires_at = Utc::now() + Duration::seconds(self.refresh_token_expiry_secs);
        self.refresh
            .create_in_family(&mut tx, &new_hash, &row, &scopes, &claims.jti, expires_at)
            .await?;

        self.events
            .append(
                &mut tx,
                NewEvent::new("user", row.user_id, "token_refreshed")
                    .with_payload(serde_json::json!({
                        "client_id": client.client_id,
                        "family_id": row.family_id,
                        "rotation_counter": row.rotation_counter + 1,
                        "scopes": scopes,
                    })),
                &[DESTINATION_AUTH_EVENTS],
            )
            .await?;

        tx.commit().await?;

        self.cache.delete(&format!("refresh:{presented_hash}")).await;
        self.cache
            .set_json(
                &format!("refresh:{new_hash}"),
                &CachedRefreshLookup {
                    family_id: row.family_id,
                    user_id: row.user_id,
                },
                REFRESH_CACHE_TTL_SECS,
            )
            .await;

        self.audit.record(
            AuditAction::TokenRefreshed,
            AuditEntry {
                actor: Some(row.user_id.to_string()),
                subject: Some(client.client_id.clone()),
                project_scope: Some(row.project_scope.clone()),
                ..AuditEntry::ok()
            },
        );

        Ok(OAuthTokenResponse::new(
            access_token,
            Some(new_refresh),
            self.jwt.access_token_expiry_secs(),
            &scopes,
        ))
    }

    /// `grant_type=client_credentials`: confidential clients only, machine
    /// scopes, no refresh token.
    pub async fn client_credentials_grant(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
        requested_scopes: Vec<String>,
    ) -> Result<OAuthTokenResponse, OAuthError> {
        let client = self
            .resolve_client(client_id)
            .await?
            .ok_or(OAuthError::InvalidClient)?;

        if !client.confidential || !client.allows_grant(GRANT_CLIENT_CREDENTIALS) {
            return Err(OAuthError::UnauthorizedClient);
        }
        Self::authenticate_client(&client, client_secret)?;

        let scopes = if requested_scopes.is_empty() {
            client.allowed_scopes.0.clone()
        } else {
            if !client.allows_scopes(&requested_scopes) {
                return Err(OAuthError::InvalidScope(
                    "One or more requested scopes are not allowed for this client".to_string(),
                ));
            }
            requested_scopes
        };

        let project_scope = client.default_project_scope().ok_or_else(|| {
            OAuthError::ServerError(format!(
                "client {} has no registered project scope",
                client.client_id
            ))
        })?;

        let (access_token, claims) = self
            .jwt
            .create_access_token(&client.client_id, &client.client_id, &scopes, project_scope)
            .map_err(|e| OAuthError::ServerError(e.to_string()))?;

        let mut tx = self.pool.begin().await?;
        self.events
            .append(
                &mut tx,
                NewEvent::new("client", client.id, "token_issued").with_payload(
                    serde_json::json!({
                        "client_id": client.client_id,
                        "grant_type": GRANT_CLIENT_CREDENTIALS,
                        "scopes": scopes,
                        "jti": claims.jti,
                    }),
                ),
                &[DESTINATION_AUTH_EVENTS],
            )
            .await?;
        tx.commit().await?;

        self.audit.record(
            AuditAction::TokenIssued,
            AuditEntry {
                actor: Some(client.client_id.clone()),
                subject: Some(client.client_id.clone()),
                project_scope: Some(project_scope.to_string()),
                details: Some(serde_json::json!({ "grant_type": GRANT_CLIENT_CREDENTIALS })),
                ..AuditEntry::ok()
            },
        );

        Ok(OAuthTokenResponse::new(
            access_token,
            None,
            self.jwt.access_token_expiry_secs(),
            &scopes,
        ))
    }

    /// RFC 7662 introspection. Live tokens get their claims; everything else
    /// gets `{active: false}` with no detail.
    pub fn introspect(&self, token: &str) -> IntrospectionResponse {
        let Ok(claims) = self.jwt.decode_unchecked_expiry(token) else {
            return IntrospectionResponse::inactive();
        };

        if claims.is_expired() {
            return IntrospectionResponse::inactive();
        }

        IntrospectionResponse {
            active: true,
            sub: Some(claims.sub),
            scope: Some(claims.scope),
            exp: Some(claims.exp),
            iat: Some(claims.iat),
            client_id: Some(claims.client_id),
            token_type: Some("Bearer".to_string()),
            project_scope: Some(claims.project_scope),
        }
    }

    /// POST /revoke: revoke the family behind a presented refresh token.
    /// Idempotent, and deliberately silent about whether the token existed.
    pub async fn revoke(&self, token: &str) -> Result<(), OAuthError> {
        let token_hash = hash_token(token);
        let cache_key = format!("refresh:{token_hash}");

        // Cached lookup first; the table is the fallback, not the other way
        // around, because a stale hit still names the right family.
        let lookup = match self.cache.get_json::<CachedRefreshLookup>(&cache_key).await {
            Some(lookup) => Some(lookup),
            None => self
                .refresh
                .find_by_hash(&token_hash)
                .await?
                .map(|row| CachedRefreshLookup {
                    family_id: row.family_id,
                    user_id: row.user_id,
                }),
        };
        let Some(lookup) = lookup else {
            return Ok(());
        };

        let mut tx = self.pool.begin().await?;
        self.refresh
            .revoke_family_tx(&mut tx, lookup.family_id)
            .await?;
        self.events
            .append(
                &mut tx,
                NewEvent::new("user", lookup.user_id, "token_revoked").with_payload(
                    serde_json::json!({ "family_id": lookup.family_id }),
                ),
                &[DESTINATION_AUTH_EVENTS],
            )
            .await?;
        tx.commit().await?;

        self.cache.delete(&cache_key).await;

        self.audit.record(
            AuditAction::TokenRevoked,
            AuditEntry {
                actor: Some(lookup.user_id.to_string()),
                details: Some(serde_json::json!({ "family_id": lookup.family_id })),
                ..AuditEntry::ok()
            },
        );

        Ok(())
    }

    /// Register a client. Confidential clients get a generated secret,
    /// returned in plaintext exactly once and stored hashed.
    #[allow(clippy::too_many_arguments)]
    pub async fn register_client(
        &self,
        client_id: &str,
        confidential: bool,
        redirect_uris: Vec<String>,
        grant_types: Vec<String>,
        allowed_scopes: Vec<String>,
        project_scopes: Vec<String>,
        allow_plain_pkce: bool,
        organization_id: Option<Uuid>,
    ) -> Result<(Client, Option<String>), OAuthError> {
        if project_scopes.is_empty() {
            return Err(OAuthError::InvalidRequest(
                "At least one project scope is required".to_string(),
            ));
        }

        let secret = confidential.then(generate_token);
        let secret_hash = secret.as_deref().map(hash_secret);

        let mut tx = self.pool.begin().await?;
        let client = self
            .clients
            .create(
                &mut tx,
                client_id,
                confidential,
                secret_hash.as_deref(),
                &redirect_uris,
                &grant_types,
                &allowed_scopes,
                &project_scopes,
                allow_plain_pkce,
                organization_id,
            )
            .await?;
        self.events
            .append(
                &mut tx,
                NewEvent::new("client", client.id, "client_registered").with_payload(
                    serde_json::json!({
                        "client_id": client_id,
                        "confidential": confidential,
                        "project_scopes": project_scopes,
                    }),
                ),
                &[DESTINATION_AUTH_EVENTS],
            )
            .await?;
        tx.commit().await?;

        Ok((client, secret))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Client;
    use sqlx::types::Json;

    fn public_client() -> Client {
        Client {
            id: Uuid::new_v4(),
            client_id: "spa".to_string(),
            confidential: false,
            secret_hash: None,
            redirect_uris: Json(vec!["https://app.example/cb".to_string()]),
            grant_types: Json(vec![GRANT_AUTHORIZATION_CODE.to_string()]),
            allowed_scopes: Json(vec!["profile.read".to_string()]),
            project_scopes: Json(vec!["alpha".to_string()]),
            pkce_required: true,
            allow_plain_pkce: false,
            organization_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn parse_scope_splits_on_whitespace() {
        assert_eq!(
            parse_scope(Some("a b  c")),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert!(parse_scope(None).is_empty());
        assert!(parse_scope(Some("")).is_empty());
    }

    #[test]
    fn public_client_needs_no_secret() {
        let client = public_client();
        assert!(OAuthService::authenticate_client(&client, None).is_ok());
    }

    #[test]
    fn confidential_client_requires_matching_secret() {
        let mut client = public_client();
        client.confidential = true;
        client.secret_hash = Some(hash_secret("s3cret-value"));

        assert!(matches!(
            OAuthService::authenticate_client(&client, None),
            Err(OAuthError::InvalidClient)
        ));
        assert!(matches!(
            OAuthService::authenticate_client(&client, Some("wrong")),
            Err(OAuthError::InvalidClient)
        ));
        assert!(OAuthService::authenticate_client(&client, Some("s3cret-value")).is_ok());
    }

    #[test]
    fn token_response_joins_scopes() {
        let response = OAuthTokenResponse::new(
            "jwt".to_string(),
            Some("rt".to_string()),
            900,
            &["a".to_string(), "b".to_string()],
        );
        assert_eq!(response.scope, "a b");
        assert_eq!(response.token_type, "Bearer");
    }

    #[test]
    fn inactive_introspection_has_no_claims() {
        let response = IntrospectionResponse::inactive();
        assert!(!response.active);
        assert!(response.sub.is_none());

        let rendered = serde_json::to_value(&response).unwrap();
        assert_eq!(rendered, serde_json::json!({ "active": false }));
    }
}
