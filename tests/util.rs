#![allow(clippy::unwrap_used, clippy::expect_used)]
#![allow(dead_code)]

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use quartermaster_lib::equipment::{self, NewEquipment};
use quartermaster_lib::holders;
use quartermaster_lib::migrate::apply_migrations;
use quartermaster_lib::model::{Equipment, Holder};

/// Single-connection in-memory database with the full schema applied.
pub async fn migrated_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("connect sqlite::memory:");
    sqlx::query("PRAGMA foreign_keys=ON;")
        .execute(&pool)
        .await
        .unwrap();
    apply_migrations(&pool).await.expect("apply migrations");
    pool
}

pub async fn seed_holder(pool: &SqlitePool, full_name: &str) -> Holder {
    holders::create_holder(pool, full_name, None)
        .await
        .expect("create holder")
}

pub async fn seed_equipment(pool: &SqlitePool, inventory_no: &str) -> Equipment {
    equipment::create_equipment(
        pool,
        None,
        NewEquipment {
            inventory_no: inventory_no.to_string(),
            name: format!("Test asset {inventory_no}"),
            ..NewEquipment::default()
        },
    )
    .await
    .expect("create equipment")
}

pub async fn equipment_status(pool: &SqlitePool, equipment_id: &str) -> String {
    sqlx::query_scalar("SELECT status FROM equipment WHERE id = ?")
        .bind(equipment_id)
        .fetch_one(pool)
        .await
        .expect("fetch status")
}

pub async fn active_custody_count(pool: &SqlitePool, equipment_id: &str) -> i64 {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM custody_records WHERE equipment_id = ? AND returned_at IS NULL",
    )
    .bind(equipment_id)
    .fetch_one(pool)
    .await
    .expect("count active custody")
}

pub async fn audit_count(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM audit_entries")
        .fetch_one(pool)
        .await
        .expect("count audit entries")
}
