//! Health endpoint: database, cache, and outbox depth in one shot.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::config::AppState;
use crate::repositories::{OutboxCounts, OutboxRepository};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub database: ComponentHealth,
    pub cache: ComponentHealth,
    pub outbox: OutboxCounts,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub healthy: bool,
}

/// GET /health
///
/// The cache is best-effort, so an unhealthy cache degrades the status but
/// does not fail it; an unreachable database does.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let database_healthy = sqlx::query("SELECT 1")
        .execute(&state.pool)
        .await
        .is_ok();

    let cache_healthy = state.cache.healthy().await;

    let outbox = OutboxRepository::new(state.pool.clone())
        .counts()
        .await
        .unwrap_or_default();

    let status = if database_healthy {
        if cache_healthy {
            "healthy"
        } else {
            "degraded"
        }
    } else {
        "unhealthy"
    };

    Json(HealthResponse {
        status,
        service: "auth-gateway",
        database: ComponentHealth {
            healthy: database_healthy,
        },
        cache: ComponentHealth {
            healthy: cache_healthy,
        },
        outbox,
    })
}
