//! JWT issuance and verification
//!
//! Access tokens are HS256 JWTs signed with the process-wide `JWT_SECRET`.
//! Refresh tokens are deliberately NOT JWTs: they are opaque strings managed
//! by the refresh-token repository so revocation is a row update. Downstream
//! services hold the same secret and can verify access tokens offline when
//! introspection is unreachable.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::AuthError;
use crate::utils::secret::generate_token;

/// Minimum HMAC key length in bytes.
pub const MIN_SECRET_BYTES: usize = 32;

/// Claims carried by every access token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessClaims {
    /// Subject - user id, or client id for client-credentials tokens
    pub sub: String,
    /// Granted scopes, space-separated
    pub scope: String,
    /// Single project namespace partitioning downstream authorization
    pub project_scope: String,
    /// The client the token was issued to
    pub client_id: String,
    /// Token identifier - opaque random string
    pub jti: String,
    /// Expiration timestamp (Unix timestamp)
    pub exp: i64,
    /// Issued at timestamp (Unix timestamp)
    pub iat: i64,
}

impl AccessClaims {
    /// Scopes as a set view over the space-separated claim.
    pub fn scopes(&self) -> Vec<&str> {
        self.scope.split_whitespace().collect()
    }

    /// Check if the token carries a specific scope.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes().iter().any(|s| *s == scope)
    }

    /// Check if the token carries every required scope.
    pub fn has_all_scopes(&self, required: &[String]) -> bool {
        let held: HashSet<&str> = self.scopes().into_iter().collect();
        required.iter().all(|s| held.contains(s.as_str()))
    }

    /// Check if the token is expired.
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() > self.exp
    }
}

/// JWT manager holding the shared HMAC key and token lifetime.
#[derive(Clone)]
pub struct JwtManager {
    encoding_key: Arc<EncodingKey>,
    decoding_key: Arc<DecodingKey>,
    access_token_expiry_secs: i64,
}

impl JwtManager {
    /// Create a new JWT manager from the shared secret.
    ///
    /// # Arguments
    /// * `secret` - HMAC key, at least 32 bytes
    /// * `access_token_expiry_secs` - access token lifetime in seconds
    pub fn new(secret: &[u8], access_token_expiry_secs: i64) -> Result<Self, AuthError> {
        if secret.len() < MIN_SECRET_BYTES {
            return Err(AuthError::Internal(anyhow::anyhow!(
                "JWT_SECRET must be at least {} bytes",
                MIN_SECRET_BYTES
            )));
        }

        Ok(Self {
            encoding_key: Arc::new(EncodingKey::from_secret(secret)),
            decoding_key: Arc::new(DecodingKey::from_secret(secret)),
            access_token_expiry_secs,
        })
    }

    /// Issue an access token.
    ///
    /// # Arguments
    /// * `sub` - subject (user id, or client id for client-credentials grants)
    /// * `client_id` - the client the token is issued to
    /// * `scopes` - granted scopes
    /// * `project_scope` - the single project namespace for the token
    ///
    /// # Returns
    /// The signed token and its `jti`, which doubles as the introspection key.
    pub fn create_access_token(
        &self,
        sub: &str,
        client_id: &str,
        scopes: &[String],
        project_scope: &str,
    ) -> Result<(String, AccessClaims), AuthError> {
        let now = Utc::now();
        let claims = AccessClaims {
            sub: sub.to_string(),
            scope: scopes.join(" "),
            project_scope: project_scope.to_string(),
            client_id: client_id.to_string(),
            jti: generate_token(),
            exp: (now + Duration::seconds(self.access_token_expiry_secs)).timestamp(),
            iat: now.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("Token encoding failed: {}", e)))?;

        Ok((token, claims))
    }

    /// Verify a token's signature and expiry and decode its claims.
    pub fn verify_access_token(&self, token: &str) -> Result<AccessClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        decode::<AccessClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken,
            })
    }

    /// Decode claims without enforcing expiry. Used by introspection, which
    /// reports `active: false` for expired tokens instead of erroring.
    pub fn decode_unchecked_expiry(&self, token: &str) -> Result<AccessClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;

        decode::<AccessClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|_| AuthError::InvalidToken)
    }

    /// Get the access token expiry duration in seconds
    pub fn access_token_expiry_secs(&self) -> i64 {
        self.access_token_expiry_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

    const TEST_SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn create_test_jwt_manager() -> JwtManager {
        JwtManager::new(TEST_SECRET, 900).unwrap()
    }

    fn test_scopes() -> Vec<String> {
        vec!["profile.read".to_string(), "email.read".to_string()]
    }

    #[test]
    fn test_short_secret_rejected() {
        let result = JwtManager::new(b"too-short", 900);
        assert!(result.is_err());
    }

    #[test]
    fn test_create_access_token() {
        let manager = create_test_jwt_manager();

        let (token, claims) = manager
            .create_access_token("user-1", "client-1", &test_scopes(), "alpha")
            .unwrap();

        assert!(!token.is_empty());
        // JWT has 3 parts separated by dots
        assert_eq!(token.split('.').count(), 3);
        // jti is 48 random bytes base64url encoded
        assert_eq!(claims.jti.len(), 64);
    }

    #[test]
    fn test_verify_round_trip() {
        let manager = create_test_jwt_manager();

        let (token, issued) = manager
            .create_access_token("user-1", "client-1", &test_scopes(), "alpha")
            .unwrap();
        let claims = manager.verify_access_token(&token).unwrap();

        assert_eq!(claims, issued);
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.client_id, "client-1");
        assert_eq!(claims.scope, "profile.read email.read");
        assert_eq!(claims.project_scope, "alpha");
    }

    #[test]
    fn test_token_uses_hs256() {
        let manager = create_test_jwt_manager();
        let (token, _) = manager
            .create_access_token("user-1", "client-1", &[], "alpha")
            .unwrap();

        let parts: Vec<&str> = token.split('.').collect();
        let header_json = URL_SAFE_NO_PAD.decode(parts[0]).unwrap();
        let header: serde_json::Value = serde_json::from_slice(&header_json).unwrap();

        assert_eq!(header["alg"], "HS256");
    }

    #[test]
    fn test_expiry_duration() {
        let manager = create_test_jwt_manager();
        let (_, claims) = manager
            .create_access_token("user-1", "client-1", &[], "alpha")
            .unwrap();

        assert_eq!(claims.exp - claims.iat, 900);
    }

    #[test]
    fn test_expired_token_rejected() {
        let manager = JwtManager::new(TEST_SECRET, -3600).unwrap();
        let (token, _) = manager
            .create_access_token("user-1", "client-1", &[], "alpha")
            .unwrap();

        let result = manager.verify_access_token(&token);
        assert!(matches!(result, Err(AuthError::TokenExpired)));
    }

    #[test]
    fn test_expired_token_decodable_for_introspection() {
        let manager = JwtManager::new(TEST_SECRET, -3600).unwrap();
        let (token, _) = manager
            .create_access_token("user-1", "client-1", &[], "alpha")
            .unwrap();

        let claims = manager.decode_unchecked_expiry(&token).unwrap();
        assert!(claims.is_expired());
    }

    #[test]
    fn test_invalid_token_rejected() {
        let manager = create_test_jwt_manager();

        assert!(matches!(
            manager.verify_access_token("invalid.token.here"),
            Err(AuthError::InvalidToken)
        ));
        assert!(matches!(
            manager.verify_access_token("not-a-jwt"),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let manager = create_test_jwt_manager();
        let other = JwtManager::new(b"ffffffffffffffffffffffffffffffff", 900).unwrap();

        let (token, _) = manager
            .create_access_token("user-1", "client-1", &[], "alpha")
            .unwrap();

        assert!(matches!(
            other.verify_access_token(&token),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_scope_checking() {
        let manager = create_test_jwt_manager();
        let (_, claims) = manager
            .create_access_token("user-1", "client-1", &test_scopes(), "alpha")
            .unwrap();

        assert!(claims.has_scope("profile.read"));
        assert!(claims.has_scope("email.read"));
        assert!(!claims.has_scope("drive.read"));

        assert!(claims.has_all_scopes(&["profile.read".to_string()]));
        assert!(!claims.has_all_scopes(&["profile.read".to_string(), "drive.read".to_string()]));
    }

    #[test]
    fn test_jti_unique_per_token() {
        let manager = create_test_jwt_manager();
        let (_, a) = manager
            .create_access_token("user-1", "client-1", &[], "alpha")
            .unwrap();
        let (_, b) = manager
            .create_access_token("user-1", "client-1", &[], "alpha")
            .unwrap();

        assert_ne!(a.jti, b.jti);
    }
}
