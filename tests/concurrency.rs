use quartermaster_lib::db::open_sqlite_pool;
use quartermaster_lib::engine::{assign_equipment, AssignOptions, EngineError};
use quartermaster_lib::migrate::apply_migrations;
use tempfile::tempdir;

#[path = "util.rs"]
mod util;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_assigns_yield_exactly_one_winner() {
    let dir = tempdir().expect("temp dir");
    let db_path = dir.path().join("race.sqlite3");
    let pool = open_sqlite_pool(&db_path).await.expect("open pool");
    apply_migrations(&pool).await.expect("apply migrations");

    let eq = util::seed_equipment(&pool, "INV-300").await;
    let mut holder_ids = Vec::new();
    for i in 0..4 {
        let holder = util::seed_holder(&pool, &format!("Holder {i}")).await;
        holder_ids.push(holder.id);
    }

    let mut handles = Vec::new();
    for holder_id in holder_ids {
        let pool = pool.clone();
        let equipment_id = eq.id.clone();
        handles.push(tokio::spawn(async move {
            assign_equipment(&pool, &equipment_id, &holder_id, None, AssignOptions::default())
                .await
        }));
    }

    let mut winners = 0;
    let mut losers = 0;
    for handle in handles {
        match handle.await.expect("task completes") {
            Ok(record) => {
                winners += 1;
                assert!(record.is_active());
            }
            Err(EngineError::EquipmentAlreadyAssigned) => losers += 1,
            Err(other) => panic!("unexpected loser error: {other}"),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(losers, 3);

    assert_eq!(util::active_custody_count(&pool, &eq.id).await, 1);
    assert_eq!(util::equipment_status(&pool, &eq.id).await, "ASSIGNED");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sequential_churn_never_breaks_the_invariant() {
    let dir = tempdir().expect("temp dir");
    let db_path = dir.path().join("churn.sqlite3");
    let pool = open_sqlite_pool(&db_path).await.expect("open pool");
    apply_migrations(&pool).await.expect("apply migrations");

    let eq = util::seed_equipment(&pool, "INV-301").await;
    let holder = util::seed_holder(&pool, "Ana Petrova").await;

    for _ in 0..10 {
        assign_equipment(&pool, &eq.id, &holder.id, None, AssignOptions::default())
            .await
            .expect("assign");
        assert_eq!(util::active_custody_count(&pool, &eq.id).await, 1);
        quartermaster_lib::engine::return_equipment(
            &pool,
            &eq.id,
            None,
            quartermaster_lib::engine::ReturnOptions::default(),
        )
        .await
        .expect("return");
        assert_eq!(util::active_custody_count(&pool, &eq.id).await, 0);
    }

    let history = quartermaster_lib::equipment::custody_history(&pool, &eq.id)
        .await
        .unwrap();
    assert_eq!(history.len(), 10);
    assert!(history.iter().all(|r| !r.is_active()));
}
