//! Transactional event store
//!
//! Every state-changing operation appends its events and outbox rows inside
//! the same transaction as the primary state change. Version assignment is
//! optimistic: read the aggregate's max, insert at max+1, and let the unique
//! `(aggregate_id, version)` constraint arbitrate concurrent writers with a
//! short retry loop.

use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::EventError;
use crate::models::Event;
use crate::repositories::{is_unique_violation, EventRepository, OutboxRepository};

/// Retries on unique-violation before giving up.
const MAX_VERSION_RETRIES: u32 = 3;

/// An event to append. `event_id` is the caller's idempotency key.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub event_type_version: i32,
    pub payload: Value,
    pub metadata: Value,
}

impl NewEvent {
    pub fn new(aggregate_type: &str, aggregate_id: impl ToString, event_type: &str) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            aggregate_type: aggregate_type.to_string(),
            aggregate_id: aggregate_id.to_string(),
            event_type: event_type.to_string(),
            event_type_version: 1,
            payload: Value::Object(Default::default()),
            metadata: Value::Object(Default::default()),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Use a caller-supplied idempotency key instead of a fresh one.
    pub fn with_event_id(mut self, event_id: Uuid) -> Self {
        self.event_id = event_id;
        self
    }
}

#[derive(Clone)]
pub struct EventStore {
    events: EventRepository,
    outbox: OutboxRepository,
}

impl EventStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            events: EventRepository::new(pool.clone()),
            outbox: OutboxRepository::new(pool),
        }
    }

    /// Append one event plus one outbox row per destination, inside the
    /// caller's transaction.
    ///
    /// Replaying an `event_id` the aggregate already holds is a no-op that
    /// returns the existing row and queues nothing; this is the one legal way
    /// for two writers to converge on the same event. The same `event_id`
    /// against a different aggregate is an error.
    pub async fn append(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: NewEvent,
        destinations: &[&str],
    ) -> Result<Event, EventError> {
        for attempt in 1..=MAX_VERSION_RETRIES {
            // Check idempotency inside the loop so a concurrent writer that
            // just inserted our event_id is found on retry.
            if let Some(existing) = self.events.find_by_event_id(tx, event.event_id).await? {
                if existing.aggregate_id != event.aggregate_id {
                    return Err(EventError::IdempotencyMismatch);
                }
                return Ok(existing);
            }

            let version = self.events.current_version(tx, &event.aggregate_id).await? + 1;

            match self
                .events
                .insert(
                    tx,
                    event.event_id,
                    &event.aggregate_type,
                    &event.aggregate_id,
                    version,
                    &event.event_type,
                    event.event_type_version,
                    &event.payload,
                    &event.metadata,
                )
                .await
            {
                Ok(inserted) => {
                    for destination in destinations {
                        self.outbox.insert(tx, inserted.event_id, destination).await?;
                    }
                    return Ok(inserted);
                }
                Err(e) if is_unique_violation(&e) && attempt < MAX_VERSION_RETRIES => {
                    tracing::debug!(
                        aggregate_id = %event.aggregate_id,
                        attempt,
                        "version conflict on event append, retrying"
                    );
                    continue;
                }
                Err(e) if is_unique_violation(&e) => return Err(EventError::VersionConflict),
                Err(e) => return Err(EventError::Database(e)),
            }
        }

        Err(EventError::VersionConflict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_event_defaults() {
        let event = NewEvent::new("user", "user-1", "login_succeeded");

        assert_eq!(event.aggregate_type, "user");
        assert_eq!(event.aggregate_id, "user-1");
        assert_eq!(event.event_type, "login_succeeded");
        assert_eq!(event.event_type_version, 1);
        assert_eq!(event.payload, serde_json::json!({}));
    }

    #[test]
    fn builder_overrides() {
        let id = Uuid::new_v4();
        let event = NewEvent::new("api_key", "key-1", "api_key_created")
            .with_event_id(id)
            .with_payload(serde_json::json!({"name": "ci"}))
            .with_metadata(serde_json::json!({"actor": "user-1"}));

        assert_eq!(event.event_id, id);
        assert_eq!(event.payload["name"], "ci");
        assert_eq!(event.metadata["actor"], "user-1");
    }

    #[test]
    fn distinct_events_get_distinct_ids() {
        let a = NewEvent::new("user", "u", "e");
        let b = NewEvent::new("user", "u", "e");
        assert_ne!(a.event_id, b.event_id);
    }
}
