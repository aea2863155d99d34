use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

/// A registered OAuth client.
///
/// Public clients must present PKCE on every authorization request;
/// confidential clients hold a hashed secret and must authenticate on
/// `/token`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Client {
    pub id: Uuid,
    pub client_id: String,
    pub confidential: bool,
    pub secret_hash: Option<String>,
    pub redirect_uris: Json<Vec<String>>,
    pub grant_types: Json<Vec<String>>,
    pub allowed_scopes: Json<Vec<String>>,
    pub project_scopes: Json<Vec<String>>,
    pub pkce_required: bool,
    pub allow_plain_pkce: bool,
    pub organization_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Client {
    /// Redirect URIs are matched exactly, never by prefix.
    pub fn has_redirect_uri(&self, uri: &str) -> bool {
        self.redirect_uris.0.iter().any(|u| u == uri)
    }

    pub fn allows_grant(&self, grant_type: &str) -> bool {
        self.grant_types.0.iter().any(|g| g == grant_type)
    }

    /// Every requested scope must be registered on the client.
    pub fn allows_scopes(&self, scopes: &[String]) -> bool {
        scopes
            .iter()
            .all(|s| self.allowed_scopes.0.iter().any(|a| a == s))
    }

    /// The client's default project namespace: the first registered one.
    pub fn default_project_scope(&self) -> Option<&str> {
        self.project_scopes.0.first().map(String::as_str)
    }

    /// PKCE is mandatory for public clients regardless of registration.
    pub fn requires_pkce(&self) -> bool {
        !self.confidential || self.pkce_required
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client(confidential: bool) -> Client {
        Client {
            id: Uuid::new_v4(),
            client_id: "app-1".to_string(),
            confidential,
            secret_hash: None,
            redirect_uris: Json(vec!["https://app.example/cb".to_string()]),
            grant_types: Json(vec![
                "authorization_code".to_string(),
                "refresh_token".to_string(),
            ]),
            allowed_scopes: Json(vec!["profile.read".to_string(), "email.read".to_string()]),
            project_scopes: Json(vec!["alpha".to_string()]),
            pkce_required: true,
            allow_plain_pkce: false,
            organization_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn redirect_uri_exact_match_only() {
        let client = test_client(false);
        assert!(client.has_redirect_uri("https://app.example/cb"));
        assert!(!client.has_redirect_uri("https://app.example/cb/"));
        assert!(!client.has_redirect_uri("https://app.example"));
    }

    #[test]
    fn scope_subset_check() {
        let client = test_client(false);
        assert!(client.allows_scopes(&["profile.read".to_string()]));
        assert!(!client.allows_scopes(&["profile.read".to_string(), "admin".to_string()]));
        assert!(client.allows_scopes(&[]));
    }

    #[test]
    fn public_client_always_requires_pkce() {
        let mut client = test_client(false);
        client.pkce_required = false;
        assert!(client.requires_pkce());
    }

    #[test]
    fn confidential_client_pkce_follows_registration() {
        let mut client = test_client(true);
        client.pkce_required = false;
        assert!(!client.requires_pkce());
        client.pkce_required = true;
        assert!(client.requires_pkce());
    }

    #[test]
    fn default_project_scope_is_first_registered() {
        let client = test_client(false);
        assert_eq!(client.default_project_scope(), Some("alpha"));
    }
}
