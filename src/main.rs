mod cache;
mod config;
mod dto;
mod error;
mod handlers;
mod middleware;
mod models;
mod repositories;
mod services;
mod utils;
mod workers;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tokio::sync::watch;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cache::Cache;
use crate::config::{AppState, Config};
use crate::handlers::{
    api_key::{
        create_api_key_handler, get_api_key_handler, list_api_keys_handler,
        revoke_api_key_handler, rotate_api_key_handler,
    },
    auth::{
        list_sessions_handler, login_handler, logout_handler, otp_resend_handler,
        otp_send_handler, otp_verify_handler, refresh_handler, revoke_session_handler,
    },
    health::health_handler,
    oauth::{
        authorize_handler, introspect_handler, metadata_handler, register_client_handler,
        revoke_handler, token_handler,
    },
};
use crate::middleware::{rate_limit, require_auth};
use crate::services::RouteClass;
use crate::workers::{spawn_cleanup_task, spawn_outbox_forwarder, OutboxForwarder};

/// Create the application router with all routes configured
///
/// ## Public routes
/// - GET /health
/// - GET /.well-known/oauth-authorization-server
/// - GET /authorize, POST /token, POST /introspect, POST /revoke
/// - POST /v1/auth/{login,logout,refresh}, POST /v1/auth/otp/{send,verify,resend}
/// - GET /v1/auth/sessions, POST /v1/auth/sessions/revoke (session cookie)
///
/// ## Protected routes (request-validation middleware)
/// - POST /clients
/// - POST|GET /v1/keys, GET|DELETE /v1/keys/{id}, POST /v1/keys/{id}/rotate
pub fn create_router(state: AppState) -> Router {
    let authorize_routes = Router::new()
        .route("/authorize", get(authorize_handler))
        .layer(axum_middleware::from_fn(rate_limit(
            state.clone(),
            RouteClass::Authorize,
        )));

    let token_routes = Router::new()
        .route("/token", post(token_handler))
        .route("/revoke", post(revoke_handler))
        .layer(axum_middleware::from_fn(rate_limit(
            state.clone(),
            RouteClass::Token,
        )));

    let introspect_routes = Router::new()
        .route("/introspect", post(introspect_handler))
        .layer(axum_middleware::from_fn(rate_limit(
            state.clone(),
            RouteClass::Introspect,
        )));

    // Client registration requires a validated caller with clients.write
    let client_routes = Router::new()
        .route("/clients", post(register_client_handler))
        .layer(axum_middleware::from_fn_with_state::<_, AppState, (State<AppState>, Request<Body>)>(
            state.clone(),
            require_auth,
        ))
        .layer(axum_middleware::from_fn(rate_limit(
            state.clone(),
            RouteClass::General,
        )));

    // Browser-facing session endpoints authenticate via the session cookie
    let auth_routes = Router::new()
        .route("/login", post(login_handler))
        .route("/logout", post(logout_handler))
        .route("/refresh", post(refresh_handler))
        .route("/otp/send", post(otp_send_handler))
        .route("/otp/verify", post(otp_verify_handler))
        .route("/otp/resend", post(otp_resend_handler))
        .route("/sessions", get(list_sessions_handler))
        .route("/sessions/revoke", post(revoke_session_handler))
        .layer(axum_middleware::from_fn(rate_limit(
            state.clone(),
            RouteClass::Auth,
        )));

    // API-key management sits behind the request-validation middleware
    let key_routes = Router::new()
        .route("/", post(create_api_key_handler).get(list_api_keys_handler))
        .route(
            "/:id",
            get(get_api_key_handler).delete(revoke_api_key_handler),
        )
        .route("/:id/rotate", post(rotate_api_key_handler))
        .layer(axum_middleware::from_fn_with_state::<_, AppState, (State<AppState>, Request<Body>)>(
            state.clone(),
            require_auth,
        ))
        .layer(axum_middleware::from_fn(rate_limit(
            state.clone(),
            RouteClass::Keys,
        )));

    let cors = if state.config.cors_origins.is_empty() {
        CorsLayer::new().allow_origin(Any)
    } else {
        CorsLayer::new().allow_origin(AllowOrigin::list(
            state
                .config
                .cors_origins
                .iter()
                .filter_map(|origin| origin.parse::<HeaderValue>().ok()),
        ))
    };

    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/.well-known/oauth-authorization-server",
            get(metadata_handler),
        )
        .merge(authorize_routes)
        .merge(token_routes)
        .merge(introspect_routes)
        .merge(client_routes)
        .nest("/v1/auth", auth_routes)
        .nest("/v1/keys", key_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(
            cors.allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([
                header::AUTHORIZATION,
                header::CONTENT_TYPE,
                header::ACCEPT,
                header::HeaderName::from_static("x-api-key"),
            ])
            .max_age(Duration::from_secs(3600)),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "auth_gateway=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    // The forwarder will not run against a half-configured destination;
    // this exits with a distinct code when credentials are missing.
    OutboxForwarder::preflight(&config);

    // Create database pool with production settings
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.database_url)
        .await?;

    // Run migrations
    sqlx::migrate!("./migrations").run(&pool).await?;

    // Cache is best-effort: a failed connection means degraded mode
    let cache = Cache::connect(config.redis_url.as_deref()).await;

    let addr = config.socket_addr()?;

    let state = AppState::new(pool.clone(), cache, config)?;
    let users = state
        .users
        .clone()
        .ok_or_else(|| anyhow::anyhow!("users store not configured"))?;

    // Spawn the outbox forwarder with a shutdown channel so it can drain
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let forwarder = spawn_outbox_forwarder(pool.clone(), users, &state.config, shutdown_rx);

    // Periodic reclamation of expired codes, refresh tokens, and sessions
    let cleanup = spawn_cleanup_task(pool);

    // Build router
    let app = create_router(state);

    tracing::info!(
        "Auth gateway v{} listening on {}",
        env!("CARGO_PKG_VERSION"),
        addr
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Tell the forwarder to drain and wait for it
    let _ = shutdown_tx.send(true);
    let _ = forwarder.await;
    cleanup.abort();

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
