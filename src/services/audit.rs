//! Audit logging
//!
//! Writes are best-effort and non-blocking: the insert runs on a spawned task
//! and a failure is logged, never surfaced. The request must not slow down or
//! fail because the audit sink hiccuped.

use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::sync::OnceLock;

use crate::models::{AuditAction, AuditEntry};
use crate::repositories::AuditLogRepository;

/// Service for audit logging
#[derive(Clone)]
pub struct AuditService {
    repo: AuditLogRepository,
}

impl AuditService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            repo: AuditLogRepository::new(pool),
        }
    }

    /// Record an audit entry without blocking the caller.
    pub fn record(&self, action: AuditAction, entry: AuditEntry) {
        let repo = self.repo.clone();
        tokio::spawn(async move {
            if let Err(e) = repo.insert(action, &entry).await {
                tracing::warn!("Audit write failed for {}: {}", action.as_str(), e);
            }
        });
    }
}

/// Hash an IP address for storage. Raw addresses are PII and never persisted.
pub fn hash_ip(ip: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ip.as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

/// Replace email addresses in free-form text with a redaction marker.
pub fn redact_email(text: &str) -> String {
    static EMAIL: OnceLock<regex::Regex> = OnceLock::new();
    let re = EMAIL.get_or_init(|| {
        regex::Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
            .unwrap_or_else(|_| regex::Regex::new(r"$^").expect("empty regex"))
    });
    re.replace_all(text, "[redacted-email]").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_hash_is_stable_and_not_reversible_text() {
        let h1 = hash_ip("203.0.113.7");
        let h2 = hash_ip("203.0.113.7");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 32);
        assert!(!h1.contains("203"));
    }

    #[test]
    fn different_ips_hash_differently() {
        assert_ne!(hash_ip("203.0.113.7"), hash_ip("203.0.113.8"));
    }

    #[test]
    fn emails_are_redacted() {
        let input = "login failed for alice@example.com from console";
        assert_eq!(
            redact_email(input),
            "login failed for [redacted-email] from console"
        );
    }

    #[test]
    fn text_without_emails_untouched() {
        let input = "token refresh for client app-1";
        assert_eq!(redact_email(input), input);
    }
}
