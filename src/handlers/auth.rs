//! Session endpoints
//!
//! - POST /v1/auth/login - delegated password login, mints a session cookie
//! - POST /v1/auth/logout - revokes the presented session
//! - POST /v1/auth/refresh - rotates the session id
//! - POST /v1/auth/otp/{send,verify,resend} - email OTP via the Users store
//! - GET /v1/auth/sessions - list the caller's active sessions
//! - POST /v1/auth/sessions/revoke - revoke one session by id

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::config::AppState;
use crate::dto::auth::{
    LoginRequest, LoginResponse, MessageResponse, OtpSendRequest, OtpVerifyRequest,
    RevokeSessionRequest, SessionInfo, SessionListResponse,
};
use crate::error::AuthError;
use crate::models::{AuditAction, AuditEntry, Session};
use crate::services::{
    redact_email, session_token_from_cookie_header, AuditService, SessionService, UsersStore,
};
use crate::utils::seal;

fn session_service(state: &AppState) -> SessionService {
    SessionService::new(
        state.pool.clone(),
        state.cache.clone(),
        state.config.session_expiry_secs,
        state.config.api_key_encryption_key,
    )
}

fn users_store(state: &AppState) -> Result<&UsersStore, AuthError> {
    state
        .users
        .as_ref()
        .ok_or_else(|| AuthError::Upstream("users store not configured".to_string()))
}

fn session_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(session_token_from_cookie_header)
        .ok_or(AuthError::MissingCredentials)
}

/// Resolve the caller's live session from the cookie.
async fn current_session(state: &AppState, headers: &HeaderMap) -> Result<Session, AuthError> {
    let token = session_token(headers)?;
    session_service(state)
        .validate(token)
        .await?
        .ok_or(AuthError::InvalidSession)
}

fn session_response(
    state: &AppState,
    sessions: &SessionService,
    session: Session,
    token: &str,
    email: Option<String>,
) -> Response {
    let cookie = sessions.build_cookie(token, state.config.cookie_domain.as_deref());
    (
        [(header::SET_COOKIE, cookie)],
        Json(LoginResponse {
            user_id: session.user_id,
            email,
            session_expires_at: session.expires_at,
        }),
    )
        .into_response()
}

/// POST /v1/auth/login
pub async fn login_handler(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Response, AuthError> {
    let users = users_store(&state)?;
    let audit = AuditService::new(state.pool.clone());

    let user = match users
        .password_login(&request.email, &request.password)
        .await
    {
        Ok(user) => user,
        Err(e) => {
            audit.record(
                AuditAction::LoginFailed,
                AuditEntry {
                    details: Some(serde_json::json!({ "reason": redact_email(&e.to_string()) })),
                    ..AuditEntry::denied()
                },
            );
            return Err(e);
        }
    };

    let sessions = session_service(&state);
    let (session, token) = sessions
        .create(user.id, request.device_fingerprint.as_deref())
        .await?;

    audit.record(
        AuditAction::LoginSucceeded,
        AuditEntry {
            actor: Some(user.id.to_string()),
            ..AuditEntry::ok()
        },
    );

    Ok(session_response(&state, &sessions, session, &token, user.email))
}

/// POST /v1/auth/logout - idempotent; clears the cookie either way.
pub async fn logout_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AuthError> {
    if let Ok(token) = session_token(&headers) {
        session_service(&state).revoke(token).await?;
    }

    let cookie = SessionService::clear_cookie(state.config.cookie_domain.as_deref());
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(MessageResponse {
            message: "logged out",
        }),
    )
        .into_response())
}

/// POST /v1/auth/refresh - rotate the session id.
pub async fn refresh_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AuthError> {
    let token = session_token(&headers)?;
    let sessions = session_service(&state);
    let (session, new_token) = sessions.refresh(token).await?;

    Ok(session_response(&state, &sessions, session, &new_token, None))
}

/// POST /v1/auth/otp/send
pub async fn otp_send_handler(
    State(state): State<AppState>,
    Json(request): Json<OtpSendRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    users_store(&state)?.otp_send(&request.email).await?;
    Ok(Json(MessageResponse {
        message: "otp sent",
    }))
}

/// POST /v1/auth/otp/resend
pub async fn otp_resend_handler(
    State(state): State<AppState>,
    Json(request): Json<OtpSendRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    users_store(&state)?.otp_send(&request.email).await?;
    Ok(Json(MessageResponse {
        message: "otp sent",
    }))
}

/// POST /v1/auth/otp/verify - a correct code is an interactive login, so a
/// session is minted.
pub async fn otp_verify_handler(
    State(state): State<AppState>,
    Json(request): Json<OtpVerifyRequest>,
) -> Result<Response, AuthError> {
    let users = users_store(&state)?;
    let audit = AuditService::new(state.pool.clone());

    let user = match users.otp_verify(&request.email, &request.code).await {
        Ok(user) => user,
        Err(e) => {
            audit.record(
                AuditAction::LoginFailed,
                AuditEntry {
                    details: Some(serde_json::json!({
                        "reason": redact_email(&e.to_string()),
                        "method": "otp",
                    })),
                    ..AuditEntry::denied()
                },
            );
            return Err(e);
        }
    };

    let sessions = session_service(&state);
    let (session, token) = sessions
        .create(user.id, request.device_fingerprint.as_deref())
        .await?;

    audit.record(
        AuditAction::LoginSucceeded,
        AuditEntry {
            actor: Some(user.id.to_string()),
            details: Some(serde_json::json!({ "method": "otp" })),
            ..AuditEntry::ok()
        },
    );

    Ok(session_response(&state, &sessions, session, &token, user.email))
}

/// GET /v1/auth/sessions
pub async fn list_sessions_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SessionListResponse>, AuthError> {
    let session = current_session(&state, &headers).await?;
    let sessions = session_service(&state).list(session.user_id).await?;

    let seal_key = state.config.api_key_encryption_key;
    let sessions = sessions
        .into_iter()
        .map(|session| {
            let device = session
                .device_fingerprint
                .as_deref()
                .and_then(|sealed| seal::open(seal_key.as_ref(), sealed).ok());
            SessionInfo::from_session(session, device)
        })
        .collect();

    Ok(Json(SessionListResponse { sessions }))
}

/// POST /v1/auth/sessions/revoke
pub async fn revoke_session_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RevokeSessionRequest>,
) -> Result<StatusCode, AuthError> {
    let session = current_session(&state, &headers).await?;
    session_service(&state)
        .revoke_by_id(session.user_id, request.session_id)
        .await?;

    Ok(StatusCode::OK)
}
