use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::{OutboxEntry, OutboxStatus};

const OUTBOX_COLUMNS: &str = "outbox_id, event_id, destination, status, attempts, \
     next_attempt_at, last_error, created_at, sent_at";

/// Pending/failed row counts surfaced in /health.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct OutboxCounts {
    pub pending: i64,
    pub failed: i64,
}

/// Repository for the outbox table. Rows are inserted inside the same
/// transaction as their event and claimed by forwarders with
/// `FOR UPDATE SKIP LOCKED`.
#[derive(Clone)]
pub struct OutboxRepository {
    pool: PgPool,
}

impl OutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Queue a delivery in the caller's transaction.
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event_id: Uuid,
        destination: &str,
    ) -> Result<OutboxEntry, sqlx::Error> {
        sqlx::query_as::<_, OutboxEntry>(&format!(
            r#"
            INSERT INTO outbox (outbox_id, event_id, destination, status, attempts, next_attempt_at)
            VALUES ($1, $2, $3, 'pending', 0, NOW())
            RETURNING {OUTBOX_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(event_id)
        .bind(destination)
        .fetch_one(&mut **tx)
        .await
    }

    /// Claim up to `limit` due rows, ordered by `(aggregate_id, version)` so
    /// per-aggregate delivery order is preserved across forwarder instances.
    ///
    /// The claim leases each row by pushing `next_attempt_at` forward; the
    /// statement is self-contained, so no transaction is held while the
    /// delivery call runs. A crashed forwarder's lease simply expires.
    pub async fn claim_due(
        &self,
        limit: i64,
        lease_secs: i64,
    ) -> Result<Vec<OutboxEntry>, sqlx::Error> {
        sqlx::query_as::<_, OutboxEntry>(&format!(
            r#"
            WITH claimed AS (
                SELECT o.outbox_id
                FROM outbox o
                JOIN events e ON e.event_id = o.event_id
                WHERE o.status = 'pending' AND o.next_attempt_at <= NOW()
                ORDER BY e.aggregate_id, e.version
                LIMIT $1
                FOR UPDATE OF o SKIP LOCKED
            )
            UPDATE outbox
            SET next_attempt_at = NOW() + ($2 * INTERVAL '1 second')
            WHERE outbox_id IN (SELECT outbox_id FROM claimed)
            RETURNING {OUTBOX_COLUMNS}
            "#
        ))
        .bind(limit)
        .bind(lease_secs)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn mark_sent(&self, outbox_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE outbox SET status = 'sent', sent_at = NOW(), last_error = NULL WHERE outbox_id = $1",
        )
        .bind(outbox_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record a failed attempt. `terminal` moves the row to `failed` instead
    /// of scheduling another try.
    pub async fn mark_attempt_failed(
        &self,
        outbox_id: Uuid,
        attempts: i32,
        last_error: &str,
        next_attempt_at: DateTime<Utc>,
        terminal: bool,
    ) -> Result<(), sqlx::Error> {
        let status = if terminal {
            OutboxStatus::Failed
        } else {
            OutboxStatus::Pending
        };

        sqlx::query(
            r#"
            UPDATE outbox
            SET status = $2, attempts = $3, last_error = $4, next_attempt_at = $5
            WHERE outbox_id = $1
            "#,
        )
        .bind(outbox_id)
        .bind(status.as_str())
        .bind(attempts)
        .bind(last_error)
        .bind(next_attempt_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Pending and failed counts for health reporting.
    pub async fn counts(&self) -> Result<OutboxCounts, sqlx::Error> {
        let (pending, failed): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending'),
                COUNT(*) FILTER (WHERE status = 'failed')
            FROM outbox
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(OutboxCounts { pending, failed })
    }
}
