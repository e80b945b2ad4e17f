//! Holder directory. The engine only ever asks "does this holder exist and is
//! it active" and treats the id as opaque; the full records live here for the
//! CLI and for custody history joins.

use sqlx::SqlitePool;

use crate::id::new_uuid_v7;
use crate::model::Holder;
use crate::time::now_ms;

pub async fn create_holder(
    pool: &SqlitePool,
    full_name: &str,
    email: Option<&str>,
) -> Result<Holder, sqlx::Error> {
    let id = new_uuid_v7();
    let now = now_ms();
    sqlx::query(
        "INSERT INTO holders (id, full_name, email, is_active, created_at, updated_at) \
         VALUES (?, ?, ?, 1, ?, ?)",
    )
    .bind(&id)
    .bind(full_name)
    .bind(email)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(Holder {
        id,
        full_name: full_name.to_owned(),
        email: email.map(str::to_owned),
        is_active: true,
        created_at: now,
        updated_at: now,
    })
}

pub async fn get_holder(pool: &SqlitePool, id: &str) -> Result<Option<Holder>, sqlx::Error> {
    sqlx::query_as::<_, Holder>("SELECT * FROM holders WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn holder_exists(pool: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
    let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM holders WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

pub async fn is_holder_active(pool: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
    let active: Option<bool> = sqlx::query_scalar("SELECT is_active FROM holders WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(active.unwrap_or(false))
}

pub async fn deactivate_holder(pool: &SqlitePool, id: &str) -> Result<(), sqlx::Error> {
    let res = sqlx::query("UPDATE holders SET is_active = 0, updated_at = ? WHERE id = ?")
        .bind(now_ms())
        .bind(id)
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(sqlx::Error::RowNotFound);
    }
    Ok(())
}
