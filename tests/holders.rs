use quartermaster_lib::holders::{
    create_holder, deactivate_holder, get_holder, holder_exists, is_holder_active,
};

#[path = "util.rs"]
mod util;

#[tokio::test]
async fn directory_round_trip() {
    let pool = util::migrated_pool().await;

    let holder = create_holder(&pool, "Ana Petrova", Some("ana@example.com"))
        .await
        .expect("create holder");
    assert!(holder.is_active);

    let fetched = get_holder(&pool, &holder.id).await.unwrap().unwrap();
    assert_eq!(fetched.full_name, "Ana Petrova");
    assert_eq!(fetched.email.as_deref(), Some("ana@example.com"));

    assert!(holder_exists(&pool, &holder.id).await.unwrap());
    assert!(is_holder_active(&pool, &holder.id).await.unwrap());
    assert!(!holder_exists(&pool, "no-such-id").await.unwrap());
    assert!(!is_holder_active(&pool, "no-such-id").await.unwrap());
}

#[tokio::test]
async fn deactivation_sticks_and_unknown_ids_are_rejected() {
    let pool = util::migrated_pool().await;
    let holder = util::seed_holder(&pool, "Boris Ivanov").await;

    deactivate_holder(&pool, &holder.id).await.expect("deactivate");
    assert!(holder_exists(&pool, &holder.id).await.unwrap());
    assert!(!is_holder_active(&pool, &holder.id).await.unwrap());

    let err = deactivate_holder(&pool, "no-such-id")
        .await
        .expect_err("unknown holder rejected");
    assert!(matches!(err, sqlx::Error::RowNotFound));
}
