//! Maintenance history and physical verification checks. Both are event logs
//! hanging off equipment; the only place they touch `equipment.status` is the
//! maintenance lifecycle, and then only through guarded writes that respect
//! the custody invariant (an assigned machine keeps its `ASSIGNED` status no
//! matter what gets scheduled against it).

use serde_json::json;
use sqlx::SqlitePool;
use tracing::info;

use crate::audit::{self, AuditEvent};
use crate::engine::{EngineError, ENTITY_EQUIPMENT};
use crate::id::new_uuid_v7;
use crate::model::{
    AuditAction, CheckType, EquipmentStatus, MaintenancePriority, MaintenanceRecord,
    MaintenanceStatus, MaintenanceType, VerificationCheck,
};
use crate::time::now_ms;

#[derive(Debug, Clone)]
pub struct MaintenanceRequest {
    pub maintenance_type: MaintenanceType,
    pub priority: MaintenancePriority,
    pub description: String,
    pub scheduled_at: Option<i64>,
    pub performed_by: Option<String>,
    pub estimated_cost: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct CompleteOptions {
    pub actual_cost: Option<f64>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CheckInput {
    pub check_type: Option<CheckType>,
    pub location: Option<String>,
    pub condition: Option<String>,
    pub is_functional: bool,
    pub note: Option<String>,
}

impl CheckInput {
    pub fn functional() -> Self {
        CheckInput {
            is_functional: true,
            ..CheckInput::default()
        }
    }
}

/// Create a `SCHEDULED` maintenance record. Critical-priority work pulls the
/// equipment out of circulation immediately, but only from `AVAILABLE`; a
/// machine someone holds stays `ASSIGNED` until it is returned.
pub async fn schedule_maintenance(
    pool: &SqlitePool,
    equipment_id: &str,
    actor_id: Option<&str>,
    request: MaintenanceRequest,
) -> Result<MaintenanceRecord, EngineError> {
    let now = now_ms();
    let mut tx = pool.begin().await?;

    let active: Option<bool> = sqlx::query_scalar("SELECT is_active FROM equipment WHERE id = ?")
        .bind(equipment_id)
        .fetch_optional(&mut *tx)
        .await?;
    match active {
        Some(true) => {}
        Some(false) => {
            tx.rollback().await?;
            return Err(EngineError::EquipmentInactive);
        }
        None => {
            tx.rollback().await?;
            return Err(EngineError::EquipmentNotFound);
        }
    }

    let record = MaintenanceRecord {
        id: new_uuid_v7(),
        equipment_id: equipment_id.to_owned(),
        maintenance_type: request.maintenance_type,
        status: MaintenanceStatus::Scheduled,
        priority: request.priority,
        description: request.description,
        performed_by: request.performed_by,
        scheduled_at: request.scheduled_at,
        started_at: None,
        completed_at: None,
        estimated_cost: request.estimated_cost,
        actual_cost: None,
        completion_note: None,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO maintenance_records (\
           id, equipment_id, maintenance_type, status, priority, description,\
           performed_by, scheduled_at, estimated_cost, created_at, updated_at\
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&record.id)
    .bind(&record.equipment_id)
    .bind(record.maintenance_type)
    .bind(record.status)
    .bind(record.priority)
    .bind(&record.description)
    .bind(record.performed_by.as_deref())
    .bind(record.scheduled_at)
    .bind(record.estimated_cost)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(&mut *tx)
    .await?;

    if record.priority == MaintenancePriority::Critical {
        sqlx::query(
            "UPDATE equipment SET status = 'MAINTENANCE', updated_at = ? \
             WHERE id = ? AND status = 'AVAILABLE'",
        )
        .bind(now)
        .bind(equipment_id)
        .execute(&mut *tx)
        .await?;
    }

    audit::record(
        &mut tx,
        &AuditEvent::success(
            actor_id,
            AuditAction::Maintain,
            ENTITY_EQUIPMENT,
            equipment_id,
            format!("Maintenance scheduled: {}", record.maintenance_type),
        )
        .with_after(json!({
            "maintenance_record_id": record.id,
            "maintenance_status": record.status,
        })),
    )
    .await?;
    tx.commit().await?;

    info!(
        target = "quartermaster",
        event = "maintenance_scheduled",
        equipment_id = %equipment_id,
        maintenance_record_id = %record.id,
        maintenance_type = %record.maintenance_type
    );
    Ok(record)
}

/// Move a scheduled record to `IN_PROGRESS` and pull the equipment into
/// `MAINTENANCE` if it is sitting in `AVAILABLE`.
pub async fn start_maintenance(
    pool: &SqlitePool,
    record_id: &str,
    actor_id: Option<&str>,
) -> Result<MaintenanceRecord, EngineError> {
    let now = now_ms();
    let mut tx = pool.begin().await?;

    let started = sqlx::query_as::<_, MaintenanceRecord>(
        "UPDATE maintenance_records SET \
           status = 'IN_PROGRESS', started_at = ?, updated_at = ? \
         WHERE id = ? AND status = 'SCHEDULED' \
         RETURNING *",
    )
    .bind(now)
    .bind(now)
    .bind(record_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(record) = started else {
        let err = match fetch_status(&mut tx, record_id).await? {
            None => EngineError::MaintenanceNotFound,
            Some(status) => EngineError::MaintenanceStateInvalid { status },
        };
        tx.rollback().await?;
        return Err(err);
    };

    sqlx::query(
        "UPDATE equipment SET status = 'MAINTENANCE', updated_at = ? \
         WHERE id = ? AND status = 'AVAILABLE'",
    )
    .bind(now)
    .bind(&record.equipment_id)
    .execute(&mut *tx)
    .await?;

    audit::record(
        &mut tx,
        &AuditEvent::success(
            actor_id,
            AuditAction::Maintain,
            ENTITY_EQUIPMENT,
            &record.equipment_id,
            format!("Maintenance started: {}", record.maintenance_type),
        )
        .with_before(json!({ "maintenance_status": MaintenanceStatus::Scheduled }))
        .with_after(json!({ "maintenance_status": MaintenanceStatus::InProgress })),
    )
    .await?;
    tx.commit().await?;

    info!(
        target = "quartermaster",
        event = "maintenance_started",
        equipment_id = %record.equipment_id,
        maintenance_record_id = %record.id
    );
    Ok(record)
}

/// Close out a maintenance record. The equipment goes back to `AVAILABLE`
/// only when it is still in `MAINTENANCE`; a status an operator forced in the
/// meantime (say `DAMAGED`) is left alone.
pub async fn complete_maintenance(
    pool: &SqlitePool,
    record_id: &str,
    actor_id: Option<&str>,
    options: CompleteOptions,
) -> Result<MaintenanceRecord, EngineError> {
    close_maintenance(pool, record_id, actor_id, MaintenanceStatus::Completed, options).await
}

/// Cancel a scheduled or in-progress record, releasing the equipment the same
/// way completion does.
pub async fn cancel_maintenance(
    pool: &SqlitePool,
    record_id: &str,
    actor_id: Option<&str>,
) -> Result<MaintenanceRecord, EngineError> {
    close_maintenance(
        pool,
        record_id,
        actor_id,
        MaintenanceStatus::Cancelled,
        CompleteOptions::default(),
    )
    .await
}

async fn close_maintenance(
    pool: &SqlitePool,
    record_id: &str,
    actor_id: Option<&str>,
    final_status: MaintenanceStatus,
    options: CompleteOptions,
) -> Result<MaintenanceRecord, EngineError> {
    let now = now_ms();
    let mut tx = pool.begin().await?;

    let closed = sqlx::query_as::<_, MaintenanceRecord>(
        "UPDATE maintenance_records SET \
           status = ?, completed_at = ?, \
           actual_cost = COALESCE(?, actual_cost), \
           completion_note = COALESCE(?, completion_note), \
           updated_at = ? \
         WHERE id = ? AND status IN ('SCHEDULED', 'IN_PROGRESS') \
         RETURNING *",
    )
    .bind(final_status)
    .bind(now)
    .bind(options.actual_cost)
    .bind(options.note.as_deref())
    .bind(now)
    .bind(record_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(record) = closed else {
        let err = match fetch_status(&mut tx, record_id).await? {
            None => EngineError::MaintenanceNotFound,
            Some(status) => EngineError::MaintenanceStateInvalid { status },
        };
        tx.rollback().await?;
        return Err(err);
    };

    sqlx::query(
        "UPDATE equipment SET status = 'AVAILABLE', updated_at = ? \
         WHERE id = ? AND status = 'MAINTENANCE'",
    )
    .bind(now)
    .bind(&record.equipment_id)
    .execute(&mut *tx)
    .await?;

    let verb = match final_status {
        MaintenanceStatus::Completed => "completed",
        _ => "cancelled",
    };
    audit::record(
        &mut tx,
        &AuditEvent::success(
            actor_id,
            AuditAction::Maintain,
            ENTITY_EQUIPMENT,
            &record.equipment_id,
            format!("Maintenance {verb}: {}", record.maintenance_type),
        )
        .with_after(json!({
            "maintenance_record_id": record.id,
            "maintenance_status": final_status,
            "status": EquipmentStatus::Available,
        })),
    )
    .await?;
    tx.commit().await?;

    info!(
        target = "quartermaster",
        event = "maintenance_closed",
        equipment_id = %record.equipment_id,
        maintenance_record_id = %record.id,
        final_status = %final_status
    );
    Ok(record)
}

async fn fetch_status(
    conn: &mut sqlx::SqliteConnection,
    record_id: &str,
) -> Result<Option<MaintenanceStatus>, sqlx::Error> {
    sqlx::query_scalar("SELECT status FROM maintenance_records WHERE id = ?")
        .bind(record_id)
        .fetch_optional(conn)
        .await
}

/// Full maintenance history for one equipment, newest first.
pub async fn maintenance_history(
    pool: &SqlitePool,
    equipment_id: &str,
) -> Result<Vec<MaintenanceRecord>, sqlx::Error> {
    sqlx::query_as::<_, MaintenanceRecord>(
        "SELECT * FROM maintenance_records WHERE equipment_id = ? \
         ORDER BY created_at DESC, id DESC",
    )
    .bind(equipment_id)
    .fetch_all(pool)
    .await
}

/// Scheduled work due inside the given window, earliest first.
pub async fn scheduled_in_range(
    pool: &SqlitePool,
    start_ms: i64,
    end_ms: i64,
) -> Result<Vec<MaintenanceRecord>, sqlx::Error> {
    sqlx::query_as::<_, MaintenanceRecord>(
        "SELECT * FROM maintenance_records \
         WHERE status = 'SCHEDULED' \
           AND scheduled_at IS NOT NULL AND scheduled_at >= ? AND scheduled_at <= ? \
         ORDER BY scheduled_at, id",
    )
    .bind(start_ms)
    .bind(end_ms)
    .fetch_all(pool)
    .await
}

/// Record a physical verification of the equipment. Pure event insert plus an
/// audit entry; never touches status.
pub async fn record_check(
    pool: &SqlitePool,
    equipment_id: &str,
    actor_id: Option<&str>,
    input: CheckInput,
) -> Result<VerificationCheck, EngineError> {
    let now = now_ms();
    let mut tx = pool.begin().await?;

    let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM equipment WHERE id = ?")
        .bind(equipment_id)
        .fetch_optional(&mut *tx)
        .await?;
    if exists.is_none() {
        tx.rollback().await?;
        return Err(EngineError::EquipmentNotFound);
    }

    let check = VerificationCheck {
        id: new_uuid_v7(),
        equipment_id: equipment_id.to_owned(),
        check_type: input.check_type.unwrap_or(CheckType::Scheduled),
        checked_by: actor_id.map(str::to_owned),
        checked_at: now,
        location: input.location,
        condition: input.condition,
        is_functional: input.is_functional,
        note: input.note,
        holder_confirmed: false,
        holder_id: None,
        confirmed_at: None,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO verification_checks (\
           id, equipment_id, check_type, checked_by, checked_at, location,\
           condition, is_functional, note, created_at, updated_at\
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&check.id)
    .bind(&check.equipment_id)
    .bind(check.check_type)
    .bind(check.checked_by.as_deref())
    .bind(check.checked_at)
    .bind(check.location.as_deref())
    .bind(check.condition.as_deref())
    .bind(check.is_functional)
    .bind(check.note.as_deref())
    .bind(check.created_at)
    .bind(check.updated_at)
    .execute(&mut *tx)
    .await?;

    audit::record(
        &mut tx,
        &AuditEvent::success(
            actor_id,
            AuditAction::Check,
            ENTITY_EQUIPMENT,
            equipment_id,
            format!("Verification check performed: {}", check.check_type),
        )
        .with_after(json!({
            "check_id": check.id,
            "is_functional": check.is_functional,
        })),
    )
    .await?;
    tx.commit().await?;

    info!(
        target = "quartermaster",
        event = "verification_check_recorded",
        equipment_id = %equipment_id,
        check_id = %check.id,
        check_type = %check.check_type
    );
    Ok(check)
}

/// Holder acknowledgement of a check result.
pub async fn confirm_check(
    pool: &SqlitePool,
    check_id: &str,
    holder_id: &str,
) -> Result<VerificationCheck, EngineError> {
    let now = now_ms();

    let holder_exists = crate::holders::holder_exists(pool, holder_id).await?;
    if !holder_exists {
        return Err(EngineError::HolderNotFound);
    }

    let confirmed = sqlx::query_as::<_, VerificationCheck>(
        "UPDATE verification_checks SET \
           holder_confirmed = 1, holder_id = ?, confirmed_at = ?, updated_at = ? \
         WHERE id = ? \
         RETURNING *",
    )
    .bind(holder_id)
    .bind(now)
    .bind(now)
    .bind(check_id)
    .fetch_optional(pool)
    .await?;

    confirmed.ok_or(EngineError::CheckNotFound)
}

/// Checks recorded at or after `since_ms`, newest first.
pub async fn recent_checks(
    pool: &SqlitePool,
    since_ms: i64,
) -> Result<Vec<VerificationCheck>, sqlx::Error> {
    sqlx::query_as::<_, VerificationCheck>(
        "SELECT * FROM verification_checks WHERE checked_at >= ? \
         ORDER BY checked_at DESC, id DESC",
    )
    .bind(since_ms)
    .fetch_all(pool)
    .await
}

/// Full verification history for one equipment, newest first.
pub async fn checks_for_equipment(
    pool: &SqlitePool,
    equipment_id: &str,
) -> Result<Vec<VerificationCheck>, sqlx::Error> {
    sqlx::query_as::<_, VerificationCheck>(
        "SELECT * FROM verification_checks WHERE equipment_id = ? \
         ORDER BY checked_at DESC, id DESC",
    )
    .bind(equipment_id)
    .fetch_all(pool)
    .await
}
