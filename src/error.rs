use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// OAuth2 endpoint errors, rendered as the RFC 6749 envelope
/// `{error, error_description}`.
#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("Client authentication failed")]
    InvalidClient,

    #[error("{0}")]
    InvalidGrant(String),

    #[error("{0}")]
    InvalidScope(String),

    #[error("Grant type not allowed for this client")]
    UnauthorizedClient,

    #[error("Unsupported grant type")]
    UnsupportedGrantType,

    #[error("Unsupported response type")]
    UnsupportedResponseType,

    #[error("Database error")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error")]
    ServerError(String),
}

impl OAuthError {
    /// The RFC 6749 error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            OAuthError::InvalidRequest(_) => "invalid_request",
            OAuthError::InvalidClient => "invalid_client",
            OAuthError::InvalidGrant(_) => "invalid_grant",
            OAuthError::InvalidScope(_) => "invalid_scope",
            OAuthError::UnauthorizedClient => "unauthorized_client",
            OAuthError::UnsupportedGrantType => "unsupported_grant_type",
            OAuthError::UnsupportedResponseType => "unsupported_response_type",
            OAuthError::Database(_) | OAuthError::ServerError(_) => "server_error",
        }
    }
}

/// RFC 6749 error envelope
#[derive(Serialize)]
pub struct OAuthErrorResponse {
    pub error: String,
    pub error_description: String,
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let status = match &self {
            OAuthError::InvalidClient => StatusCode::UNAUTHORIZED,
            OAuthError::Database(_) | OAuthError::ServerError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        };

        // Internals are logged server-side, never rendered
        let description = match &self {
            OAuthError::Database(e) => {
                tracing::error!("OAuth database error: {}", e);
                "Internal server error".to_string()
            }
            OAuthError::ServerError(msg) => {
                tracing::error!("OAuth server error: {}", msg);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(OAuthErrorResponse {
            error: self.error_code().to_string(),
            error_description: description,
        });

        (status, body).into_response()
    }
}

/// Authentication and request-validation errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing credentials")]
    MissingCredentials,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid session")]
    InvalidSession,

    #[error("Insufficient scope")]
    InsufficientScope,

    #[error("Project scope not allowed")]
    ProjectScopeViolation { requested: String, allowed: String },

    #[error("Upstream unavailable: {0}")]
    Upstream(String),

    #[error("Database error")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

/// API-key lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiKeyError {
    #[error("API key not found")]
    NotFound,

    #[error("Invalid API key")]
    InvalidKey,

    #[error("API key is revoked")]
    Revoked,

    #[error("API key is expired")]
    Expired,

    #[error("Requested scopes exceed the owner's allowed scopes")]
    ScopeExceedsOwner,

    #[error("API keys can only be owned by users")]
    NotAUser,

    #[error("Database error")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

/// Event store errors.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("Version conflict for aggregate after retries")]
    VersionConflict,

    #[error("Event id already used by a different aggregate")]
    IdempotencyMismatch,

    #[error("Database error")]
    Database(#[from] sqlx::Error),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status_code: u16,
}

fn plain_response(status: StatusCode, error_type: &str, message: String) -> Response {
    let body = Json(ErrorResponse {
        error: error_type.to_string(),
        message,
        status_code: status.as_u16(),
    });
    (status, body).into_response()
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            AuthError::MissingCredentials => (StatusCode::UNAUTHORIZED, "missing_credentials"),
            AuthError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "invalid_credentials"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid_token"),
            AuthError::TokenExpired => (StatusCode::UNAUTHORIZED, "token_expired"),
            AuthError::InvalidSession => (StatusCode::UNAUTHORIZED, "invalid_session"),
            AuthError::InsufficientScope => (StatusCode::FORBIDDEN, "insufficient_scope"),
            AuthError::ProjectScopeViolation { .. } => {
                (StatusCode::FORBIDDEN, "project_scope_violation")
            }
            AuthError::Upstream(_) => (StatusCode::SERVICE_UNAVAILABLE, "upstream_unavailable"),
            AuthError::Database(_) | AuthError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        };

        let message = match &self {
            AuthError::Database(e) => {
                tracing::error!("Auth database error: {}", e);
                "Internal server error".to_string()
            }
            AuthError::Internal(e) => {
                tracing::error!("Auth internal error: {:#}", e);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        plain_response(status, error_type, message)
    }
}

impl IntoResponse for ApiKeyError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            ApiKeyError::NotFound => (StatusCode::NOT_FOUND, "api_key_not_found"),
            ApiKeyError::InvalidKey => (StatusCode::UNAUTHORIZED, "invalid_api_key"),
            ApiKeyError::Revoked => (StatusCode::UNAUTHORIZED, "api_key_revoked"),
            ApiKeyError::Expired => (StatusCode::UNAUTHORIZED, "api_key_expired"),
            ApiKeyError::ScopeExceedsOwner => (StatusCode::BAD_REQUEST, "scope_exceeds_owner"),
            ApiKeyError::NotAUser => (StatusCode::BAD_REQUEST, "owner_not_user"),
            ApiKeyError::Database(_) | ApiKeyError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        };

        let message = match &self {
            ApiKeyError::Database(e) => {
                tracing::error!("API key database error: {}", e);
                "Internal server error".to_string()
            }
            ApiKeyError::Internal(e) => {
                tracing::error!("API key internal error: {:#}", e);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        plain_response(status, error_type, message)
    }
}

impl From<EventError> for OAuthError {
    fn from(e: EventError) -> Self {
        OAuthError::ServerError(format!("event store: {}", e))
    }
}

impl From<EventError> for AuthError {
    fn from(e: EventError) -> Self {
        AuthError::Internal(anyhow::anyhow!("event store: {}", e))
    }
}

impl From<EventError> for ApiKeyError {
    fn from(e: EventError) -> Self {
        ApiKeyError::Internal(anyhow::anyhow!("event store: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oauth_error_codes_follow_rfc() {
        assert_eq!(OAuthError::InvalidClient.error_code(), "invalid_client");
        assert_eq!(
            OAuthError::InvalidGrant("bad pkce".into()).error_code(),
            "invalid_grant"
        );
        assert_eq!(
            OAuthError::InvalidScope("upgrade".into()).error_code(),
            "invalid_scope"
        );
        assert_eq!(
            OAuthError::ServerError("boom".into()).error_code(),
            "server_error"
        );
    }

    #[test]
    fn invalid_client_is_401() {
        let response = OAuthError::InvalidClient.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn invalid_grant_is_400() {
        let response = OAuthError::InvalidGrant("nope".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn project_scope_violation_is_403() {
        let response = AuthError::ProjectScopeViolation {
            requested: "alpha".into(),
            allowed: "beta".into(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn server_error_hides_internals() {
        let response = OAuthError::ServerError("connection refused to 10.0.0.5".into());
        let rendered = response.into_response();
        assert_eq!(rendered.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
