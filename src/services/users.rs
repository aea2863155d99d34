//! Users store client
//!
//! The second logical datastore. End-user identities live in an external
//! identity provider reached over HTTPS with the service-role key: this
//! service never stores passwords. The same store hosts `auth_events`, the
//! projected read-side that the outbox forwarder upserts into.

use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

use crate::error::AuthError;
use crate::models::Event;

/// Destination name carried on outbox rows headed for the read-side.
pub const DESTINATION_AUTH_EVENTS: &str = "users.auth_events";

/// A user record as returned by the identity provider.
#[derive(Debug, Clone, Deserialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenGrantResponse {
    user: UserRecord,
}

/// HTTPS client for the Users store.
#[derive(Clone)]
pub struct UsersStore {
    base_url: String,
    service_role_key: String,
    client: reqwest::Client,
}

impl UsersStore {
    pub fn new(base_url: &str, service_role_key: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_role_key: service_role_key.to_string(),
            client,
        })
    }

    /// Delegated password login. Credentials go straight to the identity
    /// provider; only the resulting user record comes back.
    pub async fn password_login(&self, email: &str, password: &str) -> Result<UserRecord, AuthError> {
        let url = format!("{}/auth/v1/token?grant_type=password", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("apikey", &self.service_role_key)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| AuthError::Upstream(format!("users store: {e}")))?;

        if response.status() == reqwest::StatusCode::BAD_REQUEST
            || response.status() == reqwest::StatusCode::UNAUTHORIZED
        {
            return Err(AuthError::InvalidCredentials);
        }
        if !response.status().is_success() {
            return Err(AuthError::Upstream(format!(
                "users store returned {}",
                response.status()
            )));
        }

        let grant: TokenGrantResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Upstream(format!("users store body: {e}")))?;

        Ok(grant.user)
    }

    /// Ask the identity provider to email a one-time password.
    pub async fn otp_send(&self, email: &str) -> Result<(), AuthError> {
        let url = format!("{}/auth/v1/otp", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("apikey", &self.service_role_key)
            .json(&serde_json::json!({ "email": email }))
            .send()
            .await
            .map_err(|e| AuthError::Upstream(format!("users store: {e}")))?;

        if !response.status().is_success() {
            return Err(AuthError::Upstream(format!(
                "users store returned {}",
                response.status()
            )));
        }

        Ok(())
    }

    /// Verify an emailed one-time password and resolve the user.
    pub async fn otp_verify(&self, email: &str, token: &str) -> Result<UserRecord, AuthError> {
        let url = format!("{}/auth/v1/verify", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("apikey", &self.service_role_key)
            .json(&serde_json::json!({ "type": "email", "email": email, "token": token }))
            .send()
            .await
            .map_err(|e| AuthError::Upstream(format!("users store: {e}")))?;

        if response.status() == reqwest::StatusCode::BAD_REQUEST
            || response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(AuthError::InvalidCredentials);
        }
        if !response.status().is_success() {
            return Err(AuthError::Upstream(format!(
                "users store returned {}",
                response.status()
            )));
        }

        let grant: TokenGrantResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Upstream(format!("users store body: {e}")))?;

        Ok(grant.user)
    }

    /// Project an event to the read-side.
    ///
    /// Upsert keyed by `event_id` so at-least-once delivery converges:
    /// replaying a row the destination already holds changes nothing.
    pub async fn upsert_auth_event(&self, event: &Event) -> anyhow::Result<()> {
        let url = format!(
            "{}/rest/v1/auth_events?on_conflict=event_id",
            self.base_url
        );

        let response = self
            .client
            .post(&url)
            .header("apikey", &self.service_role_key)
            .header(
                "Authorization",
                format!("Bearer {}", self.service_role_key),
            )
            .header("Prefer", "resolution=merge-duplicates")
            .json(&[event])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("projection returned {}: {}", status, &body[..body.len().min(200)]);
        }

        Ok(())
    }
}
