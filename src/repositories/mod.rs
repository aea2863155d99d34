mod api_key;
mod audit_log;
mod authorization_code;
mod client;
mod event;
mod outbox;
mod refresh_token;
mod session;

pub use api_key::ApiKeyRepository;
pub use audit_log::AuditLogRepository;
pub use authorization_code::AuthorizationCodeRepository;
pub use client::ClientRepository;
pub use event::EventRepository;
pub use outbox::{OutboxCounts, OutboxRepository};
pub use refresh_token::RefreshTokenRepository;
pub use session::SessionRepository;

/// Postgres unique-violation SQLSTATE, used by retry loops that let the
/// database arbitrate concurrent writers.
pub fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}
