//! API-key management endpoints
//!
//! - POST /v1/keys - create (plaintext returned exactly once)
//! - GET /v1/keys - list, without hashes or key material
//! - GET /v1/keys/{id} - show one
//! - POST /v1/keys/{id}/rotate - swap key material, new plaintext once
//! - DELETE /v1/keys/{id} - revoke

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use uuid::Uuid;

use crate::config::AppState;
use crate::dto::api_key::{
    ApiKeyCreatedResponse, ApiKeyInfo, ApiKeyListResponse, CreateApiKeyRequest,
};
use crate::error::ApiKeyError;
use crate::middleware::AuthContext;
use crate::services::ApiKeyService;

fn api_key_service(state: &AppState) -> ApiKeyService {
    ApiKeyService::new(state.pool.clone(), state.config.api_key_prefix.clone())
}

/// The authenticated subject as a user id. Client-credentials tokens have no
/// user behind them and cannot own keys.
fn owner_id(context: &AuthContext) -> Result<Uuid, ApiKeyError> {
    context.sub.parse().map_err(|_| ApiKeyError::NotAUser)
}

/// POST /v1/keys
pub async fn create_api_key_handler(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(request): Json<CreateApiKeyRequest>,
) -> Result<(StatusCode, Json<ApiKeyCreatedResponse>), ApiKeyError> {
    let owner = owner_id(&context)?;
    let owner_scopes: Vec<String> = context.scopes().iter().map(|s| s.to_string()).collect();

    // Keys default to the creator's own scopes.
    let scopes = if request.scopes.is_empty() {
        owner_scopes.clone()
    } else {
        request.scopes
    };

    let (api_key, plaintext) = api_key_service(&state)
        .create(owner, None, &request.name, scopes, request.expires_at, &owner_scopes)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiKeyCreatedResponse::from_parts(api_key, plaintext)),
    ))
}

/// GET /v1/keys
pub async fn list_api_keys_handler(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<ApiKeyListResponse>, ApiKeyError> {
    let owner = owner_id(&context)?;
    let keys = api_key_service(&state).list(owner).await?;

    Ok(Json(ApiKeyListResponse {
        keys: keys.into_iter().map(ApiKeyInfo::from).collect(),
    }))
}

/// GET /v1/keys/{id}
pub async fn get_api_key_handler(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiKeyInfo>, ApiKeyError> {
    let owner = owner_id(&context)?;
    let key = api_key_service(&state).get(id, owner).await?;

    Ok(Json(ApiKeyInfo::from(key)))
}

/// POST /v1/keys/{id}/rotate
pub async fn rotate_api_key_handler(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiKeyCreatedResponse>, ApiKeyError> {
    let owner = owner_id(&context)?;
    let (api_key, plaintext) = api_key_service(&state).rotate(id, owner).await?;

    Ok(Json(ApiKeyCreatedResponse::from_parts(api_key, plaintext)))
}

/// DELETE /v1/keys/{id}
pub async fn revoke_api_key_handler(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiKeyError> {
    let owner = owner_id(&context)?;
    api_key_service(&state).revoke(id, owner).await?;

    Ok(StatusCode::NO_CONTENT)
}
