//! Equipment lifecycle outside the custody protocol: creation, lookups and
//! soft delete. Status stays untouched here except for the `AVAILABLE`
//! default at creation; everything else goes through the engine.

use serde_json::json;
use sqlx::SqlitePool;
use tracing::info;

use crate::audit::{self, AuditEvent};
use crate::engine::{EngineError, ENTITY_EQUIPMENT};
use crate::id::new_uuid_v7;
use crate::model::{AuditAction, CustodyRecord, Equipment, EquipmentStatus};
use crate::time::now_ms;

#[derive(Debug, Clone, Default)]
pub struct NewEquipment {
    pub inventory_no: String,
    pub name: String,
    pub serial_no: Option<String>,
    pub barcode: Option<String>,
    pub condition: Option<String>,
    pub purchase_price: Option<f64>,
    pub depreciation_rate: Option<f64>,
    pub warranty_until: Option<i64>,
    pub location: Option<String>,
}

pub async fn create_equipment(
    pool: &SqlitePool,
    actor_id: Option<&str>,
    input: NewEquipment,
) -> Result<Equipment, EngineError> {
    let now = now_ms();
    let equipment = Equipment {
        id: new_uuid_v7(),
        inventory_no: input.inventory_no,
        name: input.name,
        serial_no: input.serial_no,
        barcode: input.barcode,
        status: EquipmentStatus::Available,
        condition: input.condition.unwrap_or_else(|| "GOOD".to_owned()),
        purchase_price: input.purchase_price,
        depreciation_rate: input.depreciation_rate,
        current_value: input.purchase_price,
        warranty_until: input.warranty_until,
        location: input.location,
        is_active: true,
        created_at: now,
        updated_at: now,
    };

    let mut tx = pool.begin().await?;
    sqlx::query(
        "INSERT INTO equipment (\
           id, inventory_no, name, serial_no, barcode, status, condition,\
           purchase_price, depreciation_rate, current_value, warranty_until,\
           location, is_active, created_at, updated_at\
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(&equipment.id)
    .bind(&equipment.inventory_no)
    .bind(&equipment.name)
    .bind(equipment.serial_no.as_deref())
    .bind(equipment.barcode.as_deref())
    .bind(equipment.status)
    .bind(&equipment.condition)
    .bind(equipment.purchase_price)
    .bind(equipment.depreciation_rate)
    .bind(equipment.current_value)
    .bind(equipment.warranty_until)
    .bind(equipment.location.as_deref())
    .bind(equipment.created_at)
    .bind(equipment.updated_at)
    .execute(&mut *tx)
    .await?;

    audit::record(
        &mut tx,
        &AuditEvent::success(
            actor_id,
            AuditAction::Create,
            ENTITY_EQUIPMENT,
            &equipment.id,
            format!("Created equipment {}", equipment.inventory_no),
        )
        .with_after(json!({ "status": equipment.status })),
    )
    .await?;
    tx.commit().await?;

    info!(
        target = "quartermaster",
        event = "equipment_created",
        equipment_id = %equipment.id,
        inventory_no = %equipment.inventory_no
    );
    Ok(equipment)
}

pub async fn get_equipment(
    pool: &SqlitePool,
    id: &str,
) -> Result<Option<Equipment>, sqlx::Error> {
    sqlx::query_as::<_, Equipment>("SELECT * FROM equipment WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn get_by_inventory_no(
    pool: &SqlitePool,
    inventory_no: &str,
) -> Result<Option<Equipment>, sqlx::Error> {
    sqlx::query_as::<_, Equipment>("SELECT * FROM equipment WHERE inventory_no = ?")
        .bind(inventory_no)
        .fetch_optional(pool)
        .await
}

pub async fn list_by_status(
    pool: &SqlitePool,
    status: EquipmentStatus,
    only_active: bool,
) -> Result<Vec<Equipment>, sqlx::Error> {
    sqlx::query_as::<_, Equipment>(
        "SELECT * FROM equipment \
         WHERE status = ? AND (is_active = 1 OR ? = 0) \
         ORDER BY inventory_no",
    )
    .bind(status)
    .bind(only_active)
    .fetch_all(pool)
    .await
}

/// Soft delete. The row stays (custody history references it) but the
/// equipment drops out of assignment eligibility. Rejected while a custody
/// record is open.
pub async fn soft_delete_equipment(
    pool: &SqlitePool,
    equipment_id: &str,
    actor_id: Option<&str>,
) -> Result<(), EngineError> {
    let now = now_ms();
    let mut tx = pool.begin().await?;

    let deactivated = sqlx::query(
        "UPDATE equipment SET is_active = 0, updated_at = ? \
         WHERE id = ? AND is_active = 1 \
           AND NOT EXISTS (\
             SELECT 1 FROM custody_records \
             WHERE equipment_id = equipment.id AND returned_at IS NULL\
           )",
    )
    .bind(now)
    .bind(equipment_id)
    .execute(&mut *tx)
    .await?;

    if deactivated.rows_affected() == 0 {
        let found: Option<bool> =
            sqlx::query_scalar("SELECT is_active FROM equipment WHERE id = ?")
                .bind(equipment_id)
                .fetch_optional(&mut *tx)
                .await?;
        let err = match found {
            None => EngineError::EquipmentNotFound,
            Some(false) => EngineError::EquipmentInactive,
            Some(true) => EngineError::CustodyActive,
        };
        tx.rollback().await?;
        return Err(err);
    }

    audit::record(
        &mut tx,
        &AuditEvent::success(
            actor_id,
            AuditAction::Delete,
            ENTITY_EQUIPMENT,
            equipment_id,
            "Equipment deactivated",
        ),
    )
    .await?;
    tx.commit().await?;

    info!(
        target = "quartermaster",
        event = "equipment_deactivated",
        equipment_id = %equipment_id
    );
    Ok(())
}

/// The open custody record, if any.
pub async fn current_custody(
    pool: &SqlitePool,
    equipment_id: &str,
) -> Result<Option<CustodyRecord>, sqlx::Error> {
    sqlx::query_as::<_, CustodyRecord>(
        "SELECT * FROM custody_records WHERE equipment_id = ? AND returned_at IS NULL",
    )
    .bind(equipment_id)
    .fetch_optional(pool)
    .await
}

/// Full custody history for one equipment, newest hand-out first.
pub async fn custody_history(
    pool: &SqlitePool,
    equipment_id: &str,
) -> Result<Vec<CustodyRecord>, sqlx::Error> {
    sqlx::query_as::<_, CustodyRecord>(
        "SELECT * FROM custody_records WHERE equipment_id = ? \
         ORDER BY assigned_at DESC, id DESC",
    )
    .bind(equipment_id)
    .fetch_all(pool)
    .await
}

/// Everything a holder has or had signed out, newest first.
pub async fn holder_custody_history(
    pool: &SqlitePool,
    holder_id: &str,
) -> Result<Vec<CustodyRecord>, sqlx::Error> {
    sqlx::query_as::<_, CustodyRecord>(
        "SELECT * FROM custody_records WHERE holder_id = ? \
         ORDER BY assigned_at DESC, id DESC",
    )
    .bind(holder_id)
    .fetch_all(pool)
    .await
}

/// Open custody records past their expected return date.
pub async fn overdue_custody(
    pool: &SqlitePool,
    as_of_ms: i64,
) -> Result<Vec<CustodyRecord>, sqlx::Error> {
    sqlx::query_as::<_, CustodyRecord>(
        "SELECT * FROM custody_records \
         WHERE returned_at IS NULL \
           AND expected_return_at IS NOT NULL AND expected_return_at < ? \
         ORDER BY expected_return_at",
    )
    .bind(as_of_ms)
    .fetch_all(pool)
    .await
}
