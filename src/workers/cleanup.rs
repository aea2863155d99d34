//! Expired-row sweeper
//!
//! Authorization codes, refresh tokens, and sessions all self-expire through
//! their `expires_at` predicates; this worker reclaims the dead rows so the
//! tables do not grow without bound. Events, outbox rows, and the audit log
//! are retained.

use sqlx::PgPool;
use std::time::Duration;
use tokio::time::interval;

use crate::repositories::{
    AuthorizationCodeRepository, RefreshTokenRepository, SessionRepository,
};

/// Sweep interval in seconds.
const SWEEP_INTERVAL_SECS: u64 = 3600;

async fn sweep(pool: &PgPool) {
    let codes = AuthorizationCodeRepository::new(pool.clone());
    let refresh = RefreshTokenRepository::new(pool.clone());
    let sessions = SessionRepository::new(pool.clone());

    let mut reclaimed = 0u64;
    match codes.delete_expired().await {
        Ok(count) => reclaimed += count,
        Err(e) => tracing::warn!("Failed to sweep authorization codes: {}", e),
    }
    match refresh.delete_expired().await {
        Ok(count) => reclaimed += count,
        Err(e) => tracing::warn!("Failed to sweep refresh tokens: {}", e),
    }
    match sessions.delete_expired().await {
        Ok(count) => reclaimed += count,
        Err(e) => tracing::warn!("Failed to sweep sessions: {}", e),
    }

    if reclaimed > 0 {
        tracing::info!("Cleanup sweep reclaimed {} expired rows", reclaimed);
    }
}

/// Spawn the sweeper as a background task.
pub fn spawn_cleanup_task(pool: PgPool) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
        loop {
            ticker.tick().await;
            sweep(&pool).await;
        }
    })
}
