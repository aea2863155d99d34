use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Terminal and in-flight states of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    Pending,
    Sent,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Sent => "sent",
            OutboxStatus::Failed => "failed",
        }
    }
}

/// A pending external delivery, written in the same transaction as the event
/// it references. Forwarders claim rows, deliver, and settle; they never
/// insert events themselves.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OutboxEntry {
    pub outbox_id: Uuid,
    pub event_id: Uuid,
    pub destination: String,
    pub status: String,
    pub attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}
