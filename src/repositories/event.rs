use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::Event;

const EVENT_COLUMNS: &str = "event_id, aggregate_type, aggregate_id, version, event_type, \
     event_type_version, payload, metadata, occurred_at";

/// Repository for the append-only event table.
///
/// Methods that participate in a state-changing transaction take the caller's
/// transaction; the unique `(aggregate_id, version)` constraint is the only
/// arbiter between concurrent writers.
#[derive(Clone)]
pub struct EventRepository {
    pool: PgPool,
}

impl EventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Look up an event by its idempotency key inside the caller's
    /// transaction.
    pub async fn find_by_event_id(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event_id: Uuid,
    ) -> Result<Option<Event>, sqlx::Error> {
        sqlx::query_as::<_, Event>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE event_id = $1"
        ))
        .bind(event_id)
        .fetch_optional(&mut **tx)
        .await
    }

    /// Current max version for an aggregate, 0 when the aggregate has no
    /// events yet.
    pub async fn current_version(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        aggregate_id: &str,
    ) -> Result<i64, sqlx::Error> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                .bind(aggregate_id)
                .fetch_one(&mut **tx)
                .await?;

        Ok(version.unwrap_or(0))
    }

    /// Insert one event row at an explicit version. Returns the raw sqlx
    /// error so the caller's retry loop can inspect unique violations.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event_id: Uuid,
        aggregate_type: &str,
        aggregate_id: &str,
        version: i64,
        event_type: &str,
        event_type_version: i32,
        payload: &serde_json::Value,
        metadata: &serde_json::Value,
    ) -> Result<Event, sqlx::Error> {
        sqlx::query_as::<_, Event>(&format!(
            r#"
            INSERT INTO events
            (event_id, aggregate_type, aggregate_id, version, event_type,
             event_type_version, payload, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(event_id)
        .bind(aggregate_type)
        .bind(aggregate_id)
        .bind(version)
        .bind(event_type)
        .bind(event_type_version)
        .bind(payload)
        .bind(metadata)
        .fetch_one(&mut **tx)
        .await
    }

    /// Fetch the event rows behind a set of ids (forwarder path).
    pub async fn find_by_event_ids(&self, event_ids: &[Uuid]) -> Result<Vec<Event>, sqlx::Error> {
        sqlx::query_as::<_, Event>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE event_id = ANY($1)"
        ))
        .bind(event_ids.to_vec())
        .fetch_all(&self.pool)
        .await
    }
}
