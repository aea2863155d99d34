//! Outbox forwarder
//!
//! Drains pending outbox rows and projects their events to the Users store's
//! `auth_events` read-side. Claims are ordered by `(aggregate_id, version)`
//! under `FOR UPDATE SKIP LOCKED`, so any number of forwarder instances
//! preserve per-aggregate order; the destination upserts by `event_id`, so
//! delivery is at-least-once with consumer-side idempotency.

use chrono::{Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use uuid::Uuid;

use crate::config::Config;
use crate::models::{Event, OutboxEntry};
use crate::repositories::{EventRepository, OutboxRepository};
use crate::services::{UsersStore, DESTINATION_AUTH_EVENTS};

/// Backoff cap in seconds.
const BACKOFF_CAP_SECS: i64 = 300;

/// A row moves to `failed` once it has burned this many attempts.
const MAX_ATTEMPTS: i32 = 5;

/// Claim lease: how far `next_attempt_at` is pushed while a batch is in
/// flight, so a crashed forwarder's rows come back on their own.
const CLAIM_LEASE_SECS: i64 = 60;

/// Exit code for missing destination credentials, distinct from a generic
/// startup failure so supervisors can tell misconfiguration from a crash.
pub const EXIT_MISSING_CREDENTIALS: i32 = 78;

/// Delay before the next attempt: `min(cap, 2^attempts)` seconds.
fn backoff_secs(attempts: i32) -> i64 {
    if attempts >= 30 {
        return BACKOFF_CAP_SECS;
    }
    BACKOFF_CAP_SECS.min(1i64 << attempts)
}

/// Background worker projecting outbox rows to the external read-side.
pub struct OutboxForwarder {
    outbox: OutboxRepository,
    events: EventRepository,
    users: UsersStore,
    poll_interval_secs: u64,
    batch_size: i64,
    shutdown: watch::Receiver<bool>,
}

impl OutboxForwarder {
    pub fn new(
        pool: PgPool,
        users: UsersStore,
        poll_interval_secs: u64,
        batch_size: i64,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            outbox: OutboxRepository::new(pool.clone()),
            events: EventRepository::new(pool),
            users,
            poll_interval_secs,
            batch_size,
            shutdown,
        }
    }

    /// Refuse to start without destination credentials. Silent projection to
    /// the wrong store is the failure this guards against.
    pub fn preflight(config: &Config) {
        if !config.users_store_configured() {
            tracing::error!(
                "Outbox forwarder requires MAIN_SUPABASE_URL and MAIN_SUPABASE_SERVICE_ROLE_KEY"
            );
            std::process::exit(EXIT_MISSING_CREDENTIALS);
        }
    }

    /// Run until the shutdown signal flips. The in-flight batch is always
    /// drained before exit.
    pub async fn run(mut self) {
        tracing::info!(
            "Outbox forwarder started, polling every {} seconds, batch size {}",
            self.poll_interval_secs,
            self.batch_size
        );

        let mut ticker = interval(Duration::from_secs(self.poll_interval_secs));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.process_batch().await {
                        Ok(processed) if processed > 0 => {
                            tracing::info!("Outbox forwarder processed {} deliveries", processed);
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!("Outbox forwarder batch failed: {:#}", e),
                    }
                }
                _ = self.shutdown.changed() => {
                    tracing::info!("Outbox forwarder draining before shutdown");
                    if let Err(e) = self.process_batch().await {
                        tracing::error!("Outbox forwarder drain failed: {:#}", e);
                    }
                    break;
                }
            }
        }

        tracing::info!("Outbox forwarder stopped");
    }

    /// Claim one batch and deliver it in `(aggregate_id, version)` order.
    async fn process_batch(&self) -> anyhow::Result<u64> {
        let claimed = self
            .outbox
            .claim_due(self.batch_size, CLAIM_LEASE_SECS)
            .await?;
        if claimed.is_empty() {
            return Ok(0);
        }

        let event_ids: Vec<Uuid> = claimed.iter().map(|entry| entry.event_id).collect();
        let events = self.events.find_by_event_ids(&event_ids).await?;

        // The leasing UPDATE does not return rows in claim order; restore
        // per-aggregate order before delivering.
        let mut batch: Vec<(OutboxEntry, Event)> = claimed
            .into_iter()
            .filter_map(|entry| {
                events
                    .iter()
                    .find(|event| event.event_id == entry.event_id)
                    .cloned()
                    .map(|event| (entry, event))
            })
            .collect();
        batch.sort_by(|(_, a), (_, b)| {
            a.aggregate_id
                .cmp(&b.aggregate_id)
                .then(a.version.cmp(&b.version))
        });

        let mut processed = 0u64;
        // Once a delivery for an aggregate fails, its later events wait for
        // the retry so the destination never observes them out of order.
        let mut stalled_aggregates: HashSet<String> = HashSet::new();

        for (entry, event) in batch {
            if stalled_aggregates.contains(&event.aggregate_id) {
                continue;
            }

            let delivery = if entry.destination == DESTINATION_AUTH_EVENTS {
                self.users.upsert_auth_event(&event).await
            } else {
                Err(anyhow::anyhow!("unknown destination {}", entry.destination))
            };

            match delivery {
                Ok(()) => {
                    self.outbox.mark_sent(entry.outbox_id).await?;
                    processed += 1;
                }
                Err(e) => {
                    stalled_aggregates.insert(event.aggregate_id.clone());
                    self.settle_failure(&entry, &e.to_string()).await?;
                }
            }
        }

        Ok(processed)
    }

    async fn settle_failure(&self, entry: &OutboxEntry, error: &str) -> anyhow::Result<()> {
        let attempts = entry.attempts + 1;
        let terminal = attempts >= MAX_ATTEMPTS;
        let next_attempt_at = Utc::now() + ChronoDuration::seconds(backoff_secs(attempts));

        self.outbox
            .mark_attempt_failed(entry.outbox_id, attempts, error, next_attempt_at, terminal)
            .await?;

        if terminal {
            tracing::error!(
                outbox_id = %entry.outbox_id,
                event_id = %entry.event_id,
                attempts,
                "outbox row marked failed after exhausting retries"
            );
        } else {
            tracing::warn!(
                outbox_id = %entry.outbox_id,
                attempt = attempts,
                error,
                "outbox delivery failed, retry scheduled"
            );
        }

        Ok(())
    }
}

/// Spawn the forwarder as a background task.
pub fn spawn_outbox_forwarder(
    pool: PgPool,
    users: UsersStore,
    config: &Config,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    let forwarder = OutboxForwarder::new(
        pool,
        users,
        config.outbox_poll_interval_secs,
        config.outbox_batch_size,
        shutdown,
    );
    tokio::spawn(forwarder.run())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_cap() {
        assert_eq!(backoff_secs(1), 2);
        assert_eq!(backoff_secs(2), 4);
        // After the 3rd failure the delay is exactly min(300, 2^3) = 8s
        assert_eq!(backoff_secs(3), 8);
        assert_eq!(backoff_secs(4), 16);
        assert_eq!(backoff_secs(8), 256);
        assert_eq!(backoff_secs(9), BACKOFF_CAP_SECS);
        assert_eq!(backoff_secs(60), BACKOFF_CAP_SECS);
    }

    #[test]
    fn five_attempts_is_terminal() {
        assert_eq!(MAX_ATTEMPTS, 5);
    }

    #[test]
    fn missing_credentials_exit_code_is_distinct() {
        assert_ne!(EXIT_MISSING_CREDENTIALS, 0);
        assert_ne!(EXIT_MISSING_CREDENTIALS, 1);
    }
}
