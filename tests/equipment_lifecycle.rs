use quartermaster_lib::engine::{assign_equipment, return_equipment, AssignOptions, EngineError, ReturnOptions};
use quartermaster_lib::equipment::{
    self, create_equipment, current_custody, custody_history, get_by_inventory_no, get_equipment,
    holder_custody_history, list_by_status, overdue_custody, soft_delete_equipment, NewEquipment,
};
use quartermaster_lib::model::EquipmentStatus;

#[path = "util.rs"]
mod util;

#[tokio::test]
async fn create_applies_defaults() {
    let pool = util::migrated_pool().await;

    let created = create_equipment(
        &pool,
        Some("admin"),
        NewEquipment {
            inventory_no: "INV-500".into(),
            name: "Thermal camera".into(),
            purchase_price: Some(1200.0),
            location: Some("Depot A".into()),
            ..NewEquipment::default()
        },
    )
    .await
    .expect("create equipment");

    assert_eq!(created.status, EquipmentStatus::Available);
    assert_eq!(created.condition, "GOOD");
    assert_eq!(created.current_value, Some(1200.0));
    assert!(created.is_active);

    let fetched = get_equipment(&pool, &created.id).await.unwrap().unwrap();
    assert_eq!(fetched.inventory_no, "INV-500");
    assert_eq!(fetched.location.as_deref(), Some("Depot A"));

    let by_no = get_by_inventory_no(&pool, "INV-500").await.unwrap().unwrap();
    assert_eq!(by_no.id, created.id);
}

#[tokio::test]
async fn duplicate_inventory_no_is_rejected() {
    let pool = util::migrated_pool().await;
    util::seed_equipment(&pool, "INV-501").await;

    let err = create_equipment(
        &pool,
        None,
        NewEquipment {
            inventory_no: "INV-501".into(),
            name: "Duplicate".into(),
            ..NewEquipment::default()
        },
    )
    .await
    .expect_err("duplicate inventory number rejected");
    assert!(matches!(err, EngineError::Db(_)));
}

#[tokio::test]
async fn list_by_status_filters_inactive_rows() {
    let pool = util::migrated_pool().await;
    let kept = util::seed_equipment(&pool, "INV-502").await;
    let dropped = util::seed_equipment(&pool, "INV-503").await;
    soft_delete_equipment(&pool, &dropped.id, None).await.unwrap();

    let active_only = list_by_status(&pool, EquipmentStatus::Available, true)
        .await
        .unwrap();
    assert_eq!(active_only.len(), 1);
    assert_eq!(active_only[0].id, kept.id);

    let all = list_by_status(&pool, EquipmentStatus::Available, false)
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn soft_delete_unknown_and_repeated() {
    let pool = util::migrated_pool().await;
    let eq = util::seed_equipment(&pool, "INV-504").await;

    let err = soft_delete_equipment(&pool, "no-such-id", None)
        .await
        .expect_err("unknown id rejected");
    assert!(matches!(err, EngineError::EquipmentNotFound));

    soft_delete_equipment(&pool, &eq.id, None).await.unwrap();
    let err = soft_delete_equipment(&pool, &eq.id, None)
        .await
        .expect_err("second delete rejected");
    assert!(matches!(err, EngineError::EquipmentInactive));
}

#[tokio::test]
async fn histories_come_back_newest_first() {
    let pool = util::migrated_pool().await;
    let holder = util::seed_holder(&pool, "Ana Petrova").await;
    let eq = util::seed_equipment(&pool, "INV-505").await;

    let mut record_ids = Vec::new();
    for _ in 0..3 {
        let record = assign_equipment(&pool, &eq.id, &holder.id, None, AssignOptions::default())
            .await
            .unwrap();
        record_ids.push(record.id);
        return_equipment(&pool, &eq.id, None, ReturnOptions::default())
            .await
            .unwrap();
    }

    let history = custody_history(&pool, &eq.id).await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].id, record_ids[2]);
    assert_eq!(history[2].id, record_ids[0]);

    let by_holder = holder_custody_history(&pool, &holder.id).await.unwrap();
    assert_eq!(by_holder.len(), 3);
    assert_eq!(by_holder[0].id, record_ids[2]);

    assert!(current_custody(&pool, &eq.id).await.unwrap().is_none());
}

#[tokio::test]
async fn overdue_scan_finds_only_lapsed_open_records() {
    let pool = util::migrated_pool().await;
    let holder = util::seed_holder(&pool, "Ana Petrova").await;
    let lapsed = util::seed_equipment(&pool, "INV-506").await;
    let on_time = util::seed_equipment(&pool, "INV-507").await;
    let open_ended = util::seed_equipment(&pool, "INV-508").await;

    assign_equipment(
        &pool,
        &lapsed.id,
        &holder.id,
        None,
        AssignOptions {
            expected_return_at: Some(1_000),
            ..AssignOptions::default()
        },
    )
    .await
    .unwrap();
    assign_equipment(
        &pool,
        &on_time.id,
        &holder.id,
        None,
        AssignOptions {
            expected_return_at: Some(i64::MAX),
            ..AssignOptions::default()
        },
    )
    .await
    .unwrap();
    assign_equipment(&pool, &open_ended.id, &holder.id, None, AssignOptions::default())
        .await
        .unwrap();

    let overdue = overdue_custody(&pool, 2_000).await.unwrap();
    assert_eq!(overdue.len(), 1);
    assert_eq!(overdue[0].equipment_id, lapsed.id);

    // Returning clears it from the overdue view.
    return_equipment(&pool, &lapsed.id, None, ReturnOptions::default())
        .await
        .unwrap();
    assert!(equipment::overdue_custody(&pool, 2_000).await.unwrap().is_empty());
}
