use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{AuditAction, AuditEntry};

/// Repository for the audit_log table. Inserts only; the stream is
/// append-only and never read on the request path.
#[derive(Clone)]
pub struct AuditLogRepository {
    pool: PgPool,
}

impl AuditLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, action: AuditAction, entry: &AuditEntry) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO audit_log
            (id, action, actor, subject, project_scope, auth_source,
             request_id, ip_hash, user_agent, details, success)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(action.as_str())
        .bind(&entry.actor)
        .bind(&entry.subject)
        .bind(&entry.project_scope)
        .bind(&entry.auth_source)
        .bind(&entry.request_id)
        .bind(&entry.ip_hash)
        .bind(&entry.user_agent)
        .bind(&entry.details)
        .bind(entry.success)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
