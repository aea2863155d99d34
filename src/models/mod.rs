mod api_key;
mod audit_log;
mod authorization_code;
mod client;
mod event;
mod outbox;
mod refresh_token;
mod session;

pub use api_key::ApiKey;
pub use audit_log::{AuditAction, AuditEntry};
pub use authorization_code::AuthorizationCode;
pub use client::Client;
pub use event::Event;
pub use outbox::{OutboxEntry, OutboxStatus};
pub use refresh_token::{RefreshToken, RefreshTokenStatus};
pub use session::Session;
