use quartermaster_lib::audit::entries_for;
use quartermaster_lib::engine::{assign_equipment, AssignOptions, ENTITY_EQUIPMENT};
use quartermaster_lib::model::AuditAction;
use quartermaster_lib::reconcile::{run_reconciliation, DriftKind, ReconcileMode};
use sqlx::SqlitePool;

#[path = "util.rs"]
mod util;

/// Close the open custody record behind the engine's back, leaving the
/// equipment stuck in ASSIGNED. This is the drift class the scan repairs.
async fn manufacture_orphan(pool: &SqlitePool, equipment_id: &str) {
    sqlx::query(
        "UPDATE custody_records SET returned_at = assigned_at + 1 \
         WHERE equipment_id = ? AND returned_at IS NULL",
    )
    .bind(equipment_id)
    .execute(pool)
    .await
    .unwrap();
}

#[tokio::test]
async fn clean_database_reports_no_drift() {
    let pool = util::migrated_pool().await;
    let holder = util::seed_holder(&pool, "Ana Petrova").await;
    let eq = util::seed_equipment(&pool, "INV-200").await;
    assign_equipment(&pool, &eq.id, &holder.id, None, AssignOptions::default())
        .await
        .unwrap();

    let summary = run_reconciliation(&pool, ReconcileMode::DryRun).await.unwrap();
    assert_eq!(summary.scanned, 1);
    assert_eq!(summary.valid, 1);
    assert_eq!(summary.orphans, 0);
    assert_eq!(summary.overlaps, 0);
    assert!(summary.findings.is_empty());
}

#[tokio::test]
async fn dry_run_reports_orphan_without_touching_anything() {
    let pool = util::migrated_pool().await;
    let holder = util::seed_holder(&pool, "Ana Petrova").await;
    let eq = util::seed_equipment(&pool, "INV-201").await;
    assign_equipment(&pool, &eq.id, &holder.id, None, AssignOptions::default())
        .await
        .unwrap();
    manufacture_orphan(&pool, &eq.id).await;

    let audit_before = util::audit_count(&pool).await;
    let summary = run_reconciliation(&pool, ReconcileMode::DryRun).await.unwrap();

    assert_eq!(summary.orphans, 1);
    assert_eq!(summary.repaired, 0);
    assert_eq!(summary.findings.len(), 1);
    assert_eq!(summary.findings[0].kind, DriftKind::Orphan);
    assert_eq!(summary.findings[0].equipment_id, eq.id);
    assert!(!summary.findings[0].repaired);

    assert_eq!(util::equipment_status(&pool, &eq.id).await, "ASSIGNED");
    assert_eq!(util::audit_count(&pool).await, audit_before);
}

#[tokio::test]
async fn apply_repairs_orphan_and_audits_once() {
    let pool = util::migrated_pool().await;
    let holder = util::seed_holder(&pool, "Ana Petrova").await;
    let eq = util::seed_equipment(&pool, "INV-202").await;
    assign_equipment(&pool, &eq.id, &holder.id, None, AssignOptions::default())
        .await
        .unwrap();
    manufacture_orphan(&pool, &eq.id).await;

    let audit_before = util::audit_count(&pool).await;
    let summary = run_reconciliation(&pool, ReconcileMode::Apply).await.unwrap();

    assert_eq!(summary.orphans, 1);
    assert_eq!(summary.repaired, 1);
    assert!(summary.findings[0].repaired);
    assert_eq!(util::equipment_status(&pool, &eq.id).await, "AVAILABLE");
    assert_eq!(util::audit_count(&pool).await, audit_before + 1);

    let entries = entries_for(&pool, ENTITY_EQUIPMENT, &eq.id).await.unwrap();
    let repair = &entries[0];
    assert_eq!(repair.action, AuditAction::Update);
    assert!(repair.actor_id.is_none());
    assert!(repair.description.contains("Reconciliation"));

    // A second run finds nothing left to repair.
    let again = run_reconciliation(&pool, ReconcileMode::Apply).await.unwrap();
    assert_eq!(again.scanned, 0);
    assert_eq!(again.orphans, 0);
}

#[tokio::test]
async fn overlap_is_reported_but_never_repaired() {
    let pool = util::migrated_pool().await;
    let holder = util::seed_holder(&pool, "Ana Petrova").await;
    let other = util::seed_holder(&pool, "Boris Ivanov").await;
    let eq = util::seed_equipment(&pool, "INV-203").await;
    assign_equipment(&pool, &eq.id, &holder.id, None, AssignOptions::default())
        .await
        .unwrap();

    // An overlap can only exist in databases predating the partial unique
    // index; simulate that history by dropping it first.
    sqlx::query("DROP INDEX custody_records_one_active;")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO custody_records (\
           id, equipment_id, holder_id, assigned_at, created_at, updated_at\
         ) VALUES ('dup-record', ?, ?, 1, 1, 1)",
    )
    .bind(&eq.id)
    .bind(&other.id)
    .execute(&pool)
    .await
    .unwrap();

    let summary = run_reconciliation(&pool, ReconcileMode::Apply).await.unwrap();
    assert_eq!(summary.overlaps, 1);
    assert_eq!(summary.repaired, 0);
    assert_eq!(summary.findings[0].kind, DriftKind::Overlap);
    assert_eq!(summary.findings[0].active_custody_count, 2);
    assert!(!summary.findings[0].repaired);

    // Both records are left untouched for an operator to resolve.
    assert_eq!(util::active_custody_count(&pool, &eq.id).await, 2);
    assert_eq!(util::equipment_status(&pool, &eq.id).await, "ASSIGNED");
}

#[tokio::test]
async fn shadowed_custody_is_caught_by_assign_guard() {
    // Drift in the other direction: status says AVAILABLE but an active
    // custody record exists. The scan skips it (it only walks ASSIGNED rows)
    // but the unique index turns the next assign into a clean rejection.
    let pool = util::migrated_pool().await;
    let holder = util::seed_holder(&pool, "Ana Petrova").await;
    let other = util::seed_holder(&pool, "Boris Ivanov").await;
    let eq = util::seed_equipment(&pool, "INV-204").await;
    assign_equipment(&pool, &eq.id, &holder.id, None, AssignOptions::default())
        .await
        .unwrap();
    sqlx::query("UPDATE equipment SET status = 'AVAILABLE' WHERE id = ?")
        .bind(&eq.id)
        .execute(&pool)
        .await
        .unwrap();

    let err = assign_equipment(&pool, &eq.id, &other.id, None, AssignOptions::default())
        .await
        .expect_err("stale open record blocks assignment");
    assert!(matches!(
        err,
        quartermaster_lib::EngineError::EquipmentAlreadyAssigned
    ));
    assert_eq!(util::active_custody_count(&pool, &eq.id).await, 1);
}
