//! The consistency engine: the only code allowed to mutate `equipment.status`
//! or create/close custody records. Each operation is one transaction whose
//! first statement is a guarded write, so concurrent callers serialize on the
//! SQLite write lock instead of racing a read-then-write window.

use serde_json::json;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::info;

use crate::audit::{self, AuditEvent};
use crate::error::AppError;
use crate::id::new_uuid_v7;
use crate::model::{AuditAction, CustodyRecord, Equipment, EquipmentStatus, MaintenanceStatus};
use crate::time::now_ms;

pub const ENTITY_EQUIPMENT: &str = "equipment";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("equipment not found")]
    EquipmentNotFound,
    #[error("equipment is deactivated")]
    EquipmentInactive,
    #[error("equipment is not available for assignment (status {status})")]
    EquipmentNotAvailable { status: EquipmentStatus },
    #[error("equipment already has an active custody record")]
    EquipmentAlreadyAssigned,
    #[error("equipment has no active custody record")]
    EquipmentNotAssigned,
    #[error("an active custody record blocks this operation")]
    CustodyActive,
    #[error("status {status} can only be reached through a custody transfer")]
    StatusNotForcible { status: EquipmentStatus },
    #[error("holder not found")]
    HolderNotFound,
    #[error("holder is not active")]
    HolderInactive,
    #[error("maintenance record not found")]
    MaintenanceNotFound,
    #[error("maintenance record is {status}, transition not allowed")]
    MaintenanceStateInvalid { status: MaintenanceStatus },
    #[error("verification check not found")]
    CheckNotFound,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::EquipmentNotFound => "EQUIPMENT/NOT_FOUND",
            EngineError::EquipmentInactive => "EQUIPMENT/INACTIVE",
            EngineError::EquipmentNotAvailable { .. } => "EQUIPMENT/NOT_AVAILABLE",
            EngineError::EquipmentAlreadyAssigned => "EQUIPMENT/ALREADY_ASSIGNED",
            EngineError::EquipmentNotAssigned => "EQUIPMENT/NOT_ASSIGNED",
            EngineError::CustodyActive => "EQUIPMENT/CUSTODY_ACTIVE",
            EngineError::StatusNotForcible { .. } => "EQUIPMENT/STATUS_NOT_FORCIBLE",
            EngineError::HolderNotFound => "HOLDER/NOT_FOUND",
            EngineError::HolderInactive => "HOLDER/INACTIVE",
            EngineError::MaintenanceNotFound => "MAINTENANCE/NOT_FOUND",
            EngineError::MaintenanceStateInvalid { .. } => "MAINTENANCE/STATE_INVALID",
            EngineError::CheckNotFound => "CHECK/NOT_FOUND",
            EngineError::Db(_) => "SQLX/ERROR",
        }
    }
}

impl From<EngineError> for AppError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::Db(db) => AppError::from(db),
            other => AppError::new(other.code(), other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AssignOptions {
    pub expected_return_at: Option<i64>,
    pub condition_on_assign: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ReturnOptions {
    pub condition_on_return: Option<String>,
    pub note: Option<String>,
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.is_unique_violation()
    )
}

async fn fetch_equipment(
    conn: &mut sqlx::SqliteConnection,
    id: &str,
) -> Result<Option<Equipment>, sqlx::Error> {
    sqlx::query_as::<_, Equipment>("SELECT * FROM equipment WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await
}

async fn has_active_custody(
    conn: &mut sqlx::SqliteConnection,
    equipment_id: &str,
) -> Result<bool, sqlx::Error> {
    // Probe on the partial unique index, never a history scan.
    let found: Option<i64> = sqlx::query_scalar(
        "SELECT 1 FROM custody_records WHERE equipment_id = ? AND returned_at IS NULL",
    )
    .bind(equipment_id)
    .fetch_optional(conn)
    .await?;
    Ok(found.is_some())
}

async fn log_rejection(
    pool: &SqlitePool,
    actor_id: Option<&str>,
    action: AuditAction,
    equipment_id: &str,
    description: &str,
    error: &EngineError,
) {
    let event = AuditEvent::failure(
        actor_id,
        action,
        ENTITY_EQUIPMENT,
        equipment_id,
        description,
        error.to_string(),
    );
    audit::record_rejection(pool, &event).await;
}

/// Hand equipment to a holder. Inserts the custody record, flips the status to
/// `ASSIGNED` and writes the audit entry in one transaction. Exactly one of
/// two racing calls succeeds; the loser observes `EquipmentAlreadyAssigned`.
///
/// The holder is validated inside the same transaction, after the claim, so a
/// deactivation committed before our write lock is always observed and one
/// committed after serializes behind our commit. Equipment errors win when
/// both the equipment and the holder are invalid.
pub async fn assign_equipment(
    pool: &SqlitePool,
    equipment_id: &str,
    holder_id: &str,
    actor_id: Option<&str>,
    options: AssignOptions,
) -> Result<CustodyRecord, EngineError> {
    let now = now_ms();
    let mut tx = pool.begin().await?;

    // Claim first: the transaction becomes the exclusive writer on its very
    // first statement, which is the row-lock equivalent SQLite gives us. The
    // eligible-status set comes from the shared rules module.
    let assignable = crate::status::ASSIGNABLE_STATUSES
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ");
    let claimed = sqlx::query(&format!(
        "UPDATE equipment SET status = 'ASSIGNED', updated_at = ? \
         WHERE id = ? AND is_active = 1 AND status IN ({assignable})"
    ))
    .bind(now)
    .bind(equipment_id)
    .execute(&mut *tx)
    .await?;

    if claimed.rows_affected() == 0 {
        // Disambiguate inside the same snapshot, then roll back.
        let equipment = fetch_equipment(&mut tx, equipment_id).await?;
        let err = match equipment {
            None => EngineError::EquipmentNotFound,
            Some(eq) if !eq.is_active => EngineError::EquipmentInactive,
            Some(eq) => {
                let active = has_active_custody(&mut tx, equipment_id).await?;
                debug_assert!(!crate::status::is_eligible_for_assignment(&eq, active));
                if active {
                    EngineError::EquipmentAlreadyAssigned
                } else {
                    EngineError::EquipmentNotAvailable { status: eq.status }
                }
            }
        };
        tx.rollback().await?;
        log_rejection(
            pool,
            actor_id,
            AuditAction::Assign,
            equipment_id,
            &format!("Assign to holder {holder_id} rejected"),
            &err,
        )
        .await;
        return Err(err);
    }

    let holder_active: Option<bool> =
        sqlx::query_scalar("SELECT is_active FROM holders WHERE id = ?")
            .bind(holder_id)
            .fetch_optional(&mut *tx)
            .await?;
    let holder_err = match holder_active {
        Some(true) => None,
        Some(false) => Some(EngineError::HolderInactive),
        None => Some(EngineError::HolderNotFound),
    };
    if let Some(err) = holder_err {
        tx.rollback().await?;
        log_rejection(
            pool,
            actor_id,
            AuditAction::Assign,
            equipment_id,
            &format!("Assign to holder {holder_id} rejected"),
            &err,
        )
        .await;
        return Err(err);
    }

    let record = CustodyRecord {
        id: new_uuid_v7(),
        equipment_id: equipment_id.to_owned(),
        holder_id: holder_id.to_owned(),
        assigned_by: actor_id.map(str::to_owned),
        returned_by: None,
        assigned_at: now,
        returned_at: None,
        expected_return_at: options.expected_return_at,
        condition_on_assign: options.condition_on_assign,
        condition_on_return: None,
        note: options.note,
        return_note: None,
        created_at: now,
        updated_at: now,
    };

    let inserted = sqlx::query(
        "INSERT INTO custody_records (\
           id, equipment_id, holder_id, assigned_by, assigned_at,\
           expected_return_at, condition_on_assign, note, created_at, updated_at\
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&record.id)
    .bind(&record.equipment_id)
    .bind(&record.holder_id)
    .bind(record.assigned_by.as_deref())
    .bind(record.assigned_at)
    .bind(record.expected_return_at)
    .bind(record.condition_on_assign.as_deref())
    .bind(record.note.as_deref())
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(&mut *tx)
    .await;

    if let Err(insert_err) = inserted {
        // A stale open record (pre-existing drift) trips the one-active unique
        // index; that is still "already assigned" to the caller.
        let err = if is_unique_violation(&insert_err) {
            EngineError::EquipmentAlreadyAssigned
        } else {
            EngineError::Db(insert_err)
        };
        tx.rollback().await?;
        log_rejection(
            pool,
            actor_id,
            AuditAction::Assign,
            equipment_id,
            &format!("Assign to holder {holder_id} rejected"),
            &err,
        )
        .await;
        return Err(err);
    }

    audit::record(
        &mut tx,
        &AuditEvent::success(
            actor_id,
            AuditAction::Assign,
            ENTITY_EQUIPMENT,
            equipment_id,
            format!("Assigned to holder {holder_id}"),
        )
        .with_after(json!({
            "status": EquipmentStatus::Assigned,
            "custody_record_id": record.id,
            "holder_id": holder_id,
        })),
    )
    .await?;

    tx.commit().await?;
    info!(
        target = "quartermaster",
        event = "equipment_assigned",
        equipment_id = %equipment_id,
        holder_id = %holder_id,
        custody_record_id = %record.id
    );
    Ok(record)
}

/// Close the active custody record and put the equipment back in circulation.
/// Returning twice is rejected: the second call finds no active record.
pub async fn return_equipment(
    pool: &SqlitePool,
    equipment_id: &str,
    actor_id: Option<&str>,
    options: ReturnOptions,
) -> Result<CustodyRecord, EngineError> {
    let now = now_ms();
    let mut tx = pool.begin().await?;

    // Same claim-first shape as assign: close the record in the transaction's
    // opening write, or learn atomically that there is nothing to close.
    // MAX keeps returned_at strictly after assigned_at even within one tick.
    let closed = sqlx::query_as::<_, CustodyRecord>(
        "UPDATE custody_records SET \
           returned_at = MAX(?, assigned_at + 1), returned_by = ?, \
           condition_on_return = ?, return_note = ?, updated_at = ? \
         WHERE equipment_id = ? AND returned_at IS NULL \
         RETURNING *",
    )
    .bind(now)
    .bind(actor_id)
    .bind(options.condition_on_return.as_deref())
    .bind(options.note.as_deref())
    .bind(now)
    .bind(equipment_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(record) = closed else {
        let equipment = fetch_equipment(&mut tx, equipment_id).await?;
        let err = match equipment {
            None => EngineError::EquipmentNotFound,
            Some(_) => EngineError::EquipmentNotAssigned,
        };
        tx.rollback().await?;
        log_rejection(
            pool,
            actor_id,
            AuditAction::Return,
            equipment_id,
            "Return rejected",
            &err,
        )
        .await;
        return Err(err);
    };

    sqlx::query(
        "UPDATE equipment SET status = 'AVAILABLE', \
           condition = COALESCE(?, condition), updated_at = ? \
         WHERE id = ?",
    )
    .bind(options.condition_on_return.as_deref())
    .bind(now)
    .bind(equipment_id)
    .execute(&mut *tx)
    .await?;

    audit::record(
        &mut tx,
        &AuditEvent::success(
            actor_id,
            AuditAction::Return,
            ENTITY_EQUIPMENT,
            equipment_id,
            format!("Returned by holder {}", record.holder_id),
        )
        .with_before(json!({
            "status": EquipmentStatus::Assigned,
            "custody_record_id": record.id,
        }))
        .with_after(json!({ "status": EquipmentStatus::Available })),
    )
    .await?;

    tx.commit().await?;
    info!(
        target = "quartermaster",
        event = "equipment_returned",
        equipment_id = %equipment_id,
        custody_record_id = %record.id
    );
    Ok(record)
}

/// Operator-forced status transition, used for everything that is not a
/// custody transfer. Never touches custody records: forcing a status while a
/// custody record is open is rejected, the caller must return the equipment
/// first. No-op (no audit entry) when the status already matches.
pub async fn force_status_change(
    pool: &SqlitePool,
    equipment_id: &str,
    new_status: EquipmentStatus,
    actor_id: Option<&str>,
    reason: Option<&str>,
) -> Result<Equipment, EngineError> {
    if new_status == EquipmentStatus::Assigned {
        let err = EngineError::StatusNotForcible { status: new_status };
        log_rejection(
            pool,
            actor_id,
            AuditAction::Update,
            equipment_id,
            "Forced status change rejected",
            &err,
        )
        .await;
        return Err(err);
    }

    let now = now_ms();
    let mut tx = pool.begin().await?;

    let Some(equipment) = fetch_equipment(&mut tx, equipment_id).await? else {
        tx.rollback().await?;
        let err = EngineError::EquipmentNotFound;
        log_rejection(
            pool,
            actor_id,
            AuditAction::Update,
            equipment_id,
            "Forced status change rejected",
            &err,
        )
        .await;
        return Err(err);
    };

    if equipment.status == new_status {
        tx.rollback().await?;
        return Ok(equipment);
    }

    if has_active_custody(&mut tx, equipment_id).await? {
        tx.rollback().await?;
        let err = EngineError::CustodyActive;
        log_rejection(
            pool,
            actor_id,
            AuditAction::Update,
            equipment_id,
            &format!("Forced status change to {new_status} rejected"),
            &err,
        )
        .await;
        return Err(err);
    }

    // Guarded on the old status so a concurrent engine write wins cleanly.
    let updated = sqlx::query(
        "UPDATE equipment SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
    )
    .bind(new_status)
    .bind(now)
    .bind(equipment_id)
    .bind(equipment.status)
    .execute(&mut *tx)
    .await?;
    if updated.rows_affected() == 0 {
        tx.rollback().await?;
        return Err(EngineError::Db(sqlx::Error::RowNotFound));
    }

    let mut description = format!("Status changed: {} -> {}", equipment.status, new_status);
    if let Some(reason) = reason {
        description.push_str(&format!(" (reason: {reason})"));
    }
    audit::record(
        &mut tx,
        &AuditEvent::success(
            actor_id,
            AuditAction::Update,
            ENTITY_EQUIPMENT,
            equipment_id,
            description,
        )
        .with_before(json!({ "status": equipment.status }))
        .with_after(json!({ "status": new_status })),
    )
    .await?;

    tx.commit().await?;
    info!(
        target = "quartermaster",
        event = "equipment_status_forced",
        equipment_id = %equipment_id,
        from = %equipment.status,
        to = %new_status
    );

    let mut updated_equipment = equipment;
    updated_equipment.status = new_status;
    updated_equipment.updated_at = now;
    Ok(updated_equipment)
}
