use serde_json::Value;

/// Actions recorded in the audit stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    AuthorizationCodeIssued,
    TokenIssued,
    TokenRefreshed,
    RefreshReuseDetected,
    TokenRevoked,
    IntrospectionServed,
    RequestAllowed,
    RequestDenied,
    ProjectScopeViolation,
    RateLimitBypassed,
    ApiKeyCreated,
    ApiKeyRotated,
    ApiKeyRevoked,
    SessionCreated,
    SessionRefreshed,
    SessionRevoked,
    LoginSucceeded,
    LoginFailed,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::AuthorizationCodeIssued => "authorization_code_issued",
            AuditAction::TokenIssued => "token_issued",
            AuditAction::TokenRefreshed => "token_refreshed",
            AuditAction::RefreshReuseDetected => "refresh_reuse_detected",
            AuditAction::TokenRevoked => "token_revoked",
            AuditAction::IntrospectionServed => "introspection_served",
            AuditAction::RequestAllowed => "request_allowed",
            AuditAction::RequestDenied => "request_denied",
            AuditAction::ProjectScopeViolation => "project_scope_violation",
            AuditAction::RateLimitBypassed => "rate_limit_bypassed",
            AuditAction::ApiKeyCreated => "api_key_created",
            AuditAction::ApiKeyRotated => "api_key_rotated",
            AuditAction::ApiKeyRevoked => "api_key_revoked",
            AuditAction::SessionCreated => "session_created",
            AuditAction::SessionRefreshed => "session_refreshed",
            AuditAction::SessionRevoked => "session_revoked",
            AuditAction::LoginSucceeded => "login_succeeded",
            AuditAction::LoginFailed => "login_failed",
        }
    }
}

/// One audit record, assembled by callers and written best-effort.
#[derive(Debug, Clone, Default)]
pub struct AuditEntry {
    pub actor: Option<String>,
    pub subject: Option<String>,
    pub project_scope: Option<String>,
    pub auth_source: Option<String>,
    pub request_id: Option<String>,
    pub ip_hash: Option<String>,
    pub user_agent: Option<String>,
    pub details: Option<Value>,
    pub success: bool,
}

impl AuditEntry {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn denied() -> Self {
        Self {
            success: false,
            ..Self::default()
        }
    }
}
