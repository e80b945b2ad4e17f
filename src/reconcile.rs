//! Drift detection and repair. Equipment marked `ASSIGNED` must have exactly
//! one open custody record; this scan finds the rows where that stopped being
//! true (direct data manipulation, historical bugs) and, in apply mode, puts
//! orphans back to `AVAILABLE`. It deliberately bypasses the assign/return
//! protocol: drift means the protocol's invariant was already broken.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{FromRow, SqlitePool};
use tracing::{info, warn};

use crate::audit::{self, AuditEvent};
use crate::db::run_in_tx;
use crate::engine::ENTITY_EQUIPMENT;
use crate::error::{AppError, AppResult};
use crate::model::{AuditAction, EquipmentStatus};
use crate::time::now_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileMode {
    DryRun,
    Apply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftKind {
    /// `status = ASSIGNED` with no open custody record. Repairable.
    Orphan,
    /// Two or more open custody records. Ambiguous which one is authoritative,
    /// so never auto-repaired; an operator has to decide.
    Overlap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftFinding {
    pub equipment_id: String,
    pub inventory_no: String,
    pub active_custody_count: i64,
    pub kind: DriftKind,
    /// True only in apply mode, only for orphans whose repair committed.
    pub repaired: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub mode: ReconcileMode,
    pub scanned: usize,
    pub valid: usize,
    pub orphans: usize,
    pub overlaps: usize,
    pub repaired: usize,
    pub findings: Vec<DriftFinding>,
}

#[derive(Debug, FromRow)]
struct AssignedRow {
    id: String,
    inventory_no: String,
}

/// Scan every active `ASSIGNED` equipment and classify it. Safe to run
/// alongside live traffic: the scan is read-only and each orphan repair is its
/// own transaction guarded on the status it is about to correct.
pub async fn run_reconciliation(
    pool: &SqlitePool,
    mode: ReconcileMode,
) -> AppResult<ReconcileSummary> {
    let rows = sqlx::query_as::<_, AssignedRow>(
        "SELECT id, inventory_no FROM equipment \
         WHERE status = 'ASSIGNED' AND is_active = 1 \
         ORDER BY inventory_no",
    )
    .fetch_all(pool)
    .await
    .map_err(AppError::from)?;

    let mut summary = ReconcileSummary {
        mode,
        scanned: rows.len(),
        valid: 0,
        orphans: 0,
        overlaps: 0,
        repaired: 0,
        findings: Vec::new(),
    };

    for row in rows {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM custody_records \
             WHERE equipment_id = ? AND returned_at IS NULL",
        )
        .bind(&row.id)
        .fetch_one(pool)
        .await
        .map_err(AppError::from)?;

        match count {
            _ if crate::status::is_coherent(EquipmentStatus::Assigned, count) => {
                summary.valid += 1
            }
            0 => {
                summary.orphans += 1;
                let repaired = match mode {
                    ReconcileMode::DryRun => false,
                    ReconcileMode::Apply => repair_orphan(pool, &row).await?,
                };
                if repaired {
                    summary.repaired += 1;
                }
                warn!(
                    target = "quartermaster",
                    event = "reconcile_orphan",
                    equipment_id = %row.id,
                    inventory_no = %row.inventory_no,
                    repaired
                );
                summary.findings.push(DriftFinding {
                    equipment_id: row.id,
                    inventory_no: row.inventory_no,
                    active_custody_count: 0,
                    kind: DriftKind::Orphan,
                    repaired,
                });
            }
            n => {
                summary.overlaps += 1;
                warn!(
                    target = "quartermaster",
                    event = "reconcile_overlap",
                    equipment_id = %row.id,
                    inventory_no = %row.inventory_no,
                    active_custody_count = n
                );
                summary.findings.push(DriftFinding {
                    equipment_id: row.id,
                    inventory_no: row.inventory_no,
                    active_custody_count: n,
                    kind: DriftKind::Overlap,
                    repaired: false,
                });
            }
        }
    }

    info!(
        target = "quartermaster",
        event = "reconcile_done",
        mode = ?mode,
        scanned = summary.scanned,
        valid = summary.valid,
        orphans = summary.orphans,
        overlaps = summary.overlaps,
        repaired = summary.repaired
    );
    Ok(summary)
}

/// Flip one orphan back to `AVAILABLE`, transactionally, with an audit entry.
/// Returns false when the row changed under us between scan and repair (a live
/// assign or return won); the next run will re-evaluate it.
async fn repair_orphan(pool: &SqlitePool, row: &AssignedRow) -> AppResult<bool> {
    let equipment_id = row.id.clone();
    let inventory_no = row.inventory_no.clone();
    run_in_tx::<bool, AppError, _>(pool, move |tx| {
        async move {
            let updated = sqlx::query(
                "UPDATE equipment SET status = 'AVAILABLE', updated_at = ? \
                 WHERE id = ? AND status = 'ASSIGNED' AND is_active = 1 \
                   AND NOT EXISTS (\
                     SELECT 1 FROM custody_records \
                     WHERE equipment_id = equipment.id AND returned_at IS NULL\
                   )",
            )
            .bind(now_ms())
            .bind(&equipment_id)
            .execute(&mut **tx)
            .await
            .map_err(AppError::from)?;

            if updated.rows_affected() == 0 {
                return Ok(false);
            }

            audit::record(
                tx,
                &AuditEvent::success(
                    None,
                    AuditAction::Update,
                    ENTITY_EQUIPMENT,
                    &equipment_id,
                    format!(
                        "Reconciliation: {inventory_no} was ASSIGNED with no active \
                         custody record; status reset to AVAILABLE"
                    ),
                )
                .with_before(json!({ "status": EquipmentStatus::Assigned }))
                .with_after(json!({ "status": EquipmentStatus::Available })),
            )
            .await
            .map_err(AppError::from)?;

            Ok(true)
        }
        .boxed()
    })
    .await
}
