use std::sync::Arc;

use mailkick_server::models::OptOutKey;
use mailkick_server::service::SubscriptionService;
use mailkick_server::store::{OptOutStore, PgOptOutStore, StoreError};
use mailkick_server::test_support::{TestDatabase, TestDatabaseError};

async fn provision(test_name: &str) -> Option<TestDatabase> {
    match TestDatabase::new_from_env().await {
        Ok(db) => Some(db),
        Err(TestDatabaseError::Container(err)) => {
            eprintln!("skipping {test_name}: no TEST_DATABASE_URL and no container runtime ({err})");
            None
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    }
}

#[tokio::test]
async fn unique_key_is_enforced_by_the_table() {
    let Some(test_db) = provision("unique key test").await else {
        return;
    };
    let store = PgOptOutStore::new(test_db.pool_clone());
    let key = OptOutKey::new("Test@Example.org", 1, "marketing").expect("key");

    let record = store.insert(&key).await.expect("first insert");
    assert_eq!(record.email, "test@example.org");
    assert_eq!(record.list, "marketing");

    assert!(matches!(store.insert(&key).await, Err(StoreError::Duplicate)));
    assert!(store.exists(&key).await.expect("exists"));
    assert_eq!(store.find(&key).await.expect("find"), Some(record));

    assert_eq!(store.delete(&key).await.expect("delete"), 1);
    assert_eq!(store.delete(&key).await.expect("delete again"), 0);
    assert!(!store.exists(&key).await.expect("exists"));

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn concurrent_opt_outs_leave_one_row() {
    let Some(test_db) = provision("concurrent opt-out test").await else {
        return;
    };
    let service = SubscriptionService::new(Arc::new(PgOptOutStore::new(test_db.pool_clone())));

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let service = service.clone();
        tasks.spawn(async move { service.opt_out("race@example.com", 9, "marketing").await });
    }

    let mut ids = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        ids.push(joined.expect("task").expect("opt out").id);
    }
    ids.dedup();
    assert_eq!(ids.len(), 1, "every caller sees the same record");

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM mailkick_opt_outs")
        .fetch_one(test_db.pool())
        .await
        .expect("count");
    assert_eq!(rows, 1);

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn queries_filter_by_company_list_and_email() {
    let Some(test_db) = provision("query test").await else {
        return;
    };
    let store = PgOptOutStore::new(test_db.pool_clone());

    for (email, company_id, list) in [
        ("a@example.com", 1, "marketing"),
        ("a@example.com", 1, "sales"),
        ("a@example.com", 2, "marketing"),
        ("b@example.com", 1, "marketing"),
    ] {
        store
            .insert(&OptOutKey::new(email, company_id, list).expect("key"))
            .await
            .expect("insert");
    }

    assert_eq!(store.for_company(1, None).await.expect("company").len(), 3);
    assert_eq!(
        store.for_company(1, Some("sales")).await.expect("company list").len(),
        1
    );
    assert_eq!(store.for_email("a@example.com").await.expect("email").len(), 3);
    store.ping().await.expect("ping");

    test_db.close().await.expect("failed to drop test database");
}
