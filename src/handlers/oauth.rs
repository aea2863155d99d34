//! OAuth2 endpoints
//!
//! - GET /authorize - authorization endpoint (authorization-code + PKCE)
//! - POST /token - token endpoint (authorization_code, refresh_token,
//!   client_credentials)
//! - POST /introspect - RFC 7662 introspection
//! - POST /revoke - refresh-token family revocation (idempotent)
//! - POST /clients - client registration
//! - GET /.well-known/oauth-authorization-server - RFC 8414 metadata

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Extension, Form, Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::config::AppState;
use crate::dto::oauth::{
    AuthorizeParams, ClientRegistrationRequest, ClientRegistrationResponse, ServerMetadata,
    TokenParam, TokenRequest,
};
use crate::error::{AuthError, OAuthError};
use crate::middleware::AuthContext;
use crate::models::{AuditAction, AuditEntry};
use crate::services::{
    parse_scope, AuditService, OAuthService, OAuthTokenResponse, SessionService,
    session_token_from_cookie_header, GRANT_AUTHORIZATION_CODE, GRANT_CLIENT_CREDENTIALS,
    GRANT_REFRESH_TOKEN,
};
use crate::utils::secret::hash_token;

fn oauth_service(state: &AppState) -> OAuthService {
    OAuthService::new(
        state.pool.clone(),
        state.cache.clone(),
        state.jwt.clone(),
        state.config.refresh_token_expiry_secs,
    )
}

fn session_service(state: &AppState) -> SessionService {
    SessionService::new(
        state.pool.clone(),
        state.cache.clone(),
        state.config.session_expiry_secs,
        state.config.api_key_encryption_key,
    )
}

/// Client credentials from an HTTP Basic Authorization header.
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let header = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some((id.to_string(), secret.to_string()))
}

/// Redirect back to the client with an OAuth error, per RFC 6749 §4.1.2.1.
fn error_redirect(redirect_uri: &str, error: &OAuthError, state: Option<&str>) -> Response {
    let mut location = format!(
        "{redirect_uri}?error={}&error_description={}",
        error.error_code(),
        urlencoding::encode(&error.to_string())
    );
    if let Some(state) = state {
        location.push_str("&state=");
        location.push_str(&urlencoding::encode(state));
    }
    Redirect::to(&location).into_response()
}

/// GET /authorize
///
/// Validates the request, requires an authenticated browser session (or
/// redirects to the login page), mints a one-time code bound to the session,
/// and redirects back to the client with `code` and `state`.
pub async fn authorize_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<AuthorizeParams>,
) -> Response {
    let service = oauth_service(&state);
    let scopes = parse_scope(params.scope.as_deref());

    let client = match service
        .validate_authorization_request(
            &params.client_id,
            &params.redirect_uri,
            &params.response_type,
            &scopes,
            params.code_challenge.as_deref(),
            params.code_challenge_method.as_deref(),
        )
        .await
    {
        Ok(client) => client,
        Err(e) => {
            // Unknown client or unregistered redirect URI must never
            // redirect; the redirect check runs before everything else, so
            // any other error has a validated redirect_uri to return to.
            let unsafe_redirect = matches!(e, OAuthError::InvalidClient)
                || matches!(&e, OAuthError::InvalidRequest(msg) if msg.contains("redirect_uri"));
            if unsafe_redirect {
                return e.into_response();
            }
            return error_redirect(&params.redirect_uri, &e, params.state.as_deref());
        }
    };

    // The user must hold a live browser session.
    let session_token = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(session_token_from_cookie_header);

    let session = match session_token {
        Some(token) => match session_service(&state).validate(token).await {
            Ok(session) => session,
            Err(e) => return e.into_response(),
        },
        None => None,
    };

    let Some(session) = session else {
        let return_to = urlencoding::encode(
            &format!(
                "/authorize?response_type={}&client_id={}&redirect_uri={}",
                params.response_type, params.client_id, params.redirect_uri
            ),
        )
        .into_owned();
        return Redirect::to(&format!(
            "{}?return_to={return_to}",
            state.config.login_url
        ))
        .into_response();
    };

    let challenge = params.code_challenge.as_deref().unwrap_or("");
    let method = if challenge.is_empty() {
        "none"
    } else {
        params.code_challenge_method.as_deref().unwrap_or("S256")
    };

    let session_token_hash = session_token.map(hash_token).unwrap_or_default();
    match service
        .create_authorization_code(
            &client,
            session.user_id,
            &params.redirect_uri,
            &scopes,
            challenge,
            method,
            &session_token_hash,
        )
        .await
    {
        Ok((code, _csrf_token)) => {
            let mut location = format!(
                "{}?code={}",
                params.redirect_uri,
                urlencoding::encode(&code)
            );
            if let Some(request_state) = &params.state {
                location.push_str("&state=");
                location.push_str(&urlencoding::encode(request_state));
            }
            Redirect::to(&location).into_response()
        }
        Err(e) => error_redirect(&params.redirect_uri, &e, params.state.as_deref()),
    }
}

/// POST /token
///
/// Dispatches on `grant_type`. Client credentials come from HTTP Basic or
/// the form body; Basic wins when both are present.
pub async fn token_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(request): Form<TokenRequest>,
) -> Result<Json<OAuthTokenResponse>, OAuthError> {
    let service = oauth_service(&state);

    let (client_id, client_secret) = match basic_credentials(&headers) {
        Some((id, secret)) => (Some(id), Some(secret)),
        None => (request.client_id.clone(), request.client_secret.clone()),
    };
    let client_id = client_id.ok_or(OAuthError::InvalidClient)?;

    let response = match request.grant_type.as_str() {
        GRANT_AUTHORIZATION_CODE => {
            let code = request
                .code
                .as_deref()
                .ok_or_else(|| OAuthError::InvalidRequest("code is required".to_string()))?;
            let redirect_uri = request.redirect_uri.as_deref().ok_or_else(|| {
                OAuthError::InvalidRequest("redirect_uri is required".to_string())
            })?;

            service
                .exchange_authorization_code(
                    &client_id,
                    client_secret.as_deref(),
                    code,
                    redirect_uri,
                    request.code_verifier.as_deref(),
                )
                .await?
        }
        GRANT_REFRESH_TOKEN => {
            let refresh_token = request.refresh_token.as_deref().ok_or_else(|| {
                OAuthError::InvalidRequest("refresh_token is required".to_string())
            })?;
            let requested_scopes = request
                .scope
                .as_deref()
                .map(|s| parse_scope(Some(s)));

            service
                .refresh_grant(
                    &client_id,
                    client_secret.as_deref(),
                    refresh_token,
                    requested_scopes,
                )
                .await?
        }
        GRANT_CLIENT_CREDENTIALS => {
            service
                .client_credentials_grant(
                    &client_id,
                    client_secret.as_deref(),
                    parse_scope(request.scope.as_deref()),
                )
                .await?
        }
        _ => return Err(OAuthError::UnsupportedGrantType),
    };

    Ok(Json(response))
}

/// POST /introspect - RFC 7662. Requires client authentication; unknown and
/// expired tokens yield `{active: false}`.
pub async fn introspect_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(request): Form<TokenParam>,
) -> Result<Json<crate::services::IntrospectionResponse>, OAuthError> {
    let service = oauth_service(&state);

    let (client_id, client_secret) = match basic_credentials(&headers) {
        Some((id, secret)) => (Some(id), Some(secret)),
        None => (request.client_id.clone(), request.client_secret.clone()),
    };
    let client_id = client_id.ok_or(OAuthError::InvalidClient)?;
    let client = service
        .authenticate_client_credentials(&client_id, client_secret.as_deref())
        .await?;

    let response = service.introspect(&request.token);

    AuditService::new(state.pool.clone()).record(
        AuditAction::IntrospectionServed,
        AuditEntry {
            actor: Some(client.client_id),
            details: Some(serde_json::json!({ "active": response.active })),
            ..AuditEntry::ok()
        },
    );

    Ok(Json(response))
}

/// POST /revoke - always 200, regardless of whether the token existed.
pub async fn revoke_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(request): Form<TokenParam>,
) -> Result<StatusCode, OAuthError> {
    let service = oauth_service(&state);

    let (client_id, client_secret) = match basic_credentials(&headers) {
        Some((id, secret)) => (Some(id), Some(secret)),
        None => (request.client_id.clone(), request.client_secret.clone()),
    };
    let client_id = client_id.ok_or(OAuthError::InvalidClient)?;
    service
        .authenticate_client_credentials(&client_id, client_secret.as_deref())
        .await?;

    service.revoke(&request.token).await?;

    Ok(StatusCode::OK)
}

/// POST /clients - register a client. Requires the `clients.write` scope.
pub async fn register_client_handler(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(request): Json<ClientRegistrationRequest>,
) -> Response {
    if !context.has_scope("clients.write") {
        return AuthError::InsufficientScope.into_response();
    }

    let service = oauth_service(&state);
    match service
        .register_client(
            &request.client_id,
            request.confidential,
            request.redirect_uris,
            request.grant_types,
            request.allowed_scopes,
            request.project_scopes,
            request.allow_plain_pkce,
            None,
        )
        .await
    {
        Ok((client, client_secret)) => (
            StatusCode::CREATED,
            Json(ClientRegistrationResponse {
                client_id: client.client_id,
                confidential: client.confidential,
                client_secret,
                redirect_uris: client.redirect_uris.0,
                grant_types: client.grant_types.0,
                allowed_scopes: client.allowed_scopes.0,
                project_scopes: client.project_scopes.0,
            }),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /.well-known/oauth-authorization-server
pub async fn metadata_handler(State(state): State<AppState>) -> Json<ServerMetadata> {
    Json(ServerMetadata::for_issuer(&state.config.auth_gateway_url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_credentials_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            // app-1:s3cret
            "Basic YXBwLTE6czNjcmV0".parse().unwrap(),
        );

        let (id, secret) = basic_credentials(&headers).unwrap();
        assert_eq!(id, "app-1");
        assert_eq!(secret, "s3cret");
    }

    #[test]
    fn basic_credentials_absent_or_malformed() {
        assert!(basic_credentials(&HeaderMap::new()).is_none());

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer token".parse().unwrap());
        assert!(basic_credentials(&headers).is_none());

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Basic !!!".parse().unwrap());
        assert!(basic_credentials(&headers).is_none());
    }
}
