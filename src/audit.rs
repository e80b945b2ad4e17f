//! Append-only audit trail. Entries for state-changing operations are written
//! on the same connection as the mutation, inside its transaction, so a rolled
//! back operation never leaves a stray "success" entry behind. Rejections that
//! never reach a transaction are logged best-effort through the pool.

use sqlx::{SqliteConnection, SqlitePool};

use crate::id::new_uuid_v7;
use crate::model::{AuditAction, AuditEntry};
use crate::time::now_ms;

/// What to write; the recorder fills in id and timestamp.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub actor_id: Option<String>,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: String,
    pub description: String,
    pub before_values: Option<serde_json::Value>,
    pub after_values: Option<serde_json::Value>,
    pub success: bool,
    pub error_message: Option<String>,
}

impl AuditEvent {
    pub fn success(
        actor_id: Option<&str>,
        action: AuditAction,
        entity_type: &str,
        entity_id: &str,
        description: impl Into<String>,
    ) -> Self {
        AuditEvent {
            actor_id: actor_id.map(str::to_owned),
            action,
            entity_type: entity_type.to_owned(),
            entity_id: entity_id.to_owned(),
            description: description.into(),
            before_values: None,
            after_values: None,
            success: true,
            error_message: None,
        }
    }

    pub fn failure(
        actor_id: Option<&str>,
        action: AuditAction,
        entity_type: &str,
        entity_id: &str,
        description: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        AuditEvent {
            success: false,
            error_message: Some(error_message.into()),
            ..AuditEvent::success(actor_id, action, entity_type, entity_id, description)
        }
    }

    pub fn with_before(mut self, before: serde_json::Value) -> Self {
        self.before_values = Some(before);
        self
    }

    pub fn with_after(mut self, after: serde_json::Value) -> Self {
        self.after_values = Some(after);
        self
    }
}

/// Insert an entry on the given connection. Pass the mutating transaction's
/// connection (`&mut *tx`) so the entry commits or rolls back with it.
pub async fn record(conn: &mut SqliteConnection, event: &AuditEvent) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO audit_entries (\
           id, actor_id, action, entity_type, entity_id, description,\
           before_values, after_values, success, error_message, created_at\
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(new_uuid_v7())
    .bind(event.actor_id.as_deref())
    .bind(event.action)
    .bind(&event.entity_type)
    .bind(&event.entity_id)
    .bind(&event.description)
    .bind(event.before_values.as_ref().map(|v| v.to_string()))
    .bind(event.after_values.as_ref().map(|v| v.to_string()))
    .bind(event.success)
    .bind(event.error_message.as_deref())
    .bind(now_ms())
    .execute(conn)
    .await?;
    Ok(())
}

/// Forensic log for operations rejected before any mutation began. Best
/// effort: a failure to write the entry is logged and swallowed so it cannot
/// mask the original rejection.
pub async fn record_rejection(pool: &SqlitePool, event: &AuditEvent) {
    debug_assert!(!event.success);
    match pool.acquire().await {
        Ok(mut conn) => {
            if let Err(err) = record(conn.as_mut(), event).await {
                tracing::warn!(
                    target = "quartermaster",
                    event = "audit_rejection_write_failed",
                    entity_type = %event.entity_type,
                    entity_id = %event.entity_id,
                    error = %err
                );
            }
        }
        Err(err) => {
            tracing::warn!(
                target = "quartermaster",
                event = "audit_rejection_write_failed",
                entity_type = %event.entity_type,
                entity_id = %event.entity_id,
                error = %err
            );
        }
    }
}

/// Full trail for one entity, newest first. This is the queryable feed the
/// notification collaborator consumes.
pub async fn entries_for(
    pool: &SqlitePool,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<AuditEntry>, sqlx::Error> {
    sqlx::query_as::<_, AuditEntry>(
        "SELECT * FROM audit_entries \
         WHERE entity_type = ? AND entity_id = ? \
         ORDER BY created_at DESC, id DESC",
    )
    .bind(entity_type)
    .bind(entity_id)
    .fetch_all(pool)
    .await
}

pub async fn recent(pool: &SqlitePool, limit: i64) -> Result<Vec<AuditEntry>, sqlx::Error> {
    sqlx::query_as::<_, AuditEntry>(
        "SELECT * FROM audit_entries ORDER BY created_at DESC, id DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}
