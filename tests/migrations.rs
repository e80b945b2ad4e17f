use quartermaster_lib::migrate::apply_migrations;
use sqlx::Row;

#[path = "util.rs"]
mod util;

#[tokio::test]
async fn apply_twice_is_idempotent() {
    let pool = util::migrated_pool().await;
    apply_migrations(&pool).await.expect("second apply is a no-op");

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(applied, 6);
}

#[tokio::test]
async fn tampered_migration_is_refused() {
    let pool = util::migrated_pool().await;

    sqlx::query("UPDATE schema_migrations SET checksum = 'deadbeef' WHERE version = ?")
        .bind("202608011200_initial.sql")
        .execute(&pool)
        .await
        .unwrap();

    let err = apply_migrations(&pool)
        .await
        .expect_err("checksum mismatch refused");
    assert!(err.to_string().contains("edited after application"));
}

#[tokio::test]
async fn add_column_migration_lands_and_reapplies_safely() {
    let pool = util::migrated_pool().await;

    let rows = sqlx::query("SELECT name FROM pragma_table_info('equipment')")
        .fetch_all(&pool)
        .await
        .unwrap();
    let columns: Vec<String> = rows
        .iter()
        .map(|r| r.get::<String, _>("name"))
        .collect();
    assert!(columns.contains(&"location".to_string()));

    // A fresh database that already has the column still migrates cleanly
    // thanks to the ADD COLUMN guard.
    apply_migrations(&pool).await.expect("guarded re-apply");
}

#[tokio::test]
async fn one_active_custody_index_exists() {
    let pool = util::migrated_pool().await;

    let sql: Option<String> = sqlx::query_scalar(
        "SELECT sql FROM sqlite_master WHERE type = 'index' AND name = 'custody_records_one_active'",
    )
    .fetch_optional(&pool)
    .await
    .unwrap();
    let sql = sql.expect("partial unique index present");
    assert!(sql.contains("returned_at IS NULL"));
    assert!(sql.to_uppercase().contains("UNIQUE"));
}
