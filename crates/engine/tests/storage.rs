mod common;

use chrono::NaiveDate;
use sea_orm::{ActiveModelTrait, ActiveValue, EntityTrait, IntoActiveModel, PaginatorTrait};

use common::{
    FakeAggregator, access_token, account, engine_with_db, linked_item, page, record, user,
};
use engine::{
    Balances, CacheDomain, EngineError, TransactionPatch, accounts, cache::keys, items,
    transactions,
};

#[tokio::test]
async fn link_token_is_issued_for_known_users_only() {
    let aggregator = FakeAggregator::new();
    let (engine, _db) = engine_with_db(aggregator.clone()).await;
    let alice = user(&engine, "alice").await;

    let token = engine.create_link_token(alice).await.unwrap();
    assert_eq!(token.link_token, format!("link-sandbox-{alice}"));

    let err = engine.create_link_token(alice + 100).await.unwrap_err();
    assert!(matches!(err, EngineError::KeyNotFound(_)));
}

#[tokio::test]
async fn link_item_stores_item_and_accounts() {
    let aggregator = FakeAggregator::new();
    let (engine, _db) = engine_with_db(aggregator.clone()).await;
    let alice = user(&engine, "alice").await;

    let item = linked_item(
        &engine,
        &aggregator,
        alice,
        "item-1",
        vec![
            account("acc-1", "Checking", "depository"),
            account("acc-2", "Visa", "credit"),
        ],
    )
    .await;

    assert_eq!(item.user_id, alice);
    assert_eq!(item.external_item_id, "item-1");
    assert_eq!(item.institution_name.as_deref(), Some("First Platypus Bank"));
    assert!(!item.has_cursor);
    let accounts = engine.list_accounts(alice, item.id).await.unwrap();
    assert_eq!(accounts.len(), 2);
    assert_eq!(accounts[0].external_account_id, "acc-1");
    assert_eq!(accounts[1].kind, "credit");
    assert_eq!(engine.list_items(alice).await.unwrap(), vec![item]);
}

#[tokio::test]
async fn linking_twice_is_a_no_op() {
    let aggregator = FakeAggregator::new();
    let (engine, db) = engine_with_db(aggregator.clone()).await;
    let alice = user(&engine, "alice").await;
    let accounts = vec![account("acc-1", "Checking", "depository")];

    let first = linked_item(&engine, &aggregator, alice, "item-1", accounts.clone()).await;
    let second = linked_item(&engine, &aggregator, alice, "item-1", accounts).await;

    assert_eq!(first.id, second.id);
    assert_eq!(items::Entity::find().count(&db).await.unwrap(), 1);
    assert_eq!(accounts::Entity::find().count(&db).await.unwrap(), 1);
}

#[tokio::test]
async fn item_of_another_user_cannot_be_claimed() {
    let aggregator = FakeAggregator::new();
    let (engine, _db) = engine_with_db(aggregator.clone()).await;
    let alice = user(&engine, "alice").await;
    let bob = user(&engine, "bob").await;
    linked_item(&engine, &aggregator, alice, "item-1", vec![]).await;

    let err = engine.link_item(bob, "public-item-1").await.unwrap_err();

    assert_eq!(err, EngineError::ExistingKey("item-1".to_string()));
    assert!(engine.list_items(bob).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_public_token_is_an_aggregator_error() {
    let aggregator = FakeAggregator::new();
    let (engine, _db) = engine_with_db(aggregator.clone()).await;
    let alice = user(&engine, "alice").await;

    let err = engine.link_item(alice, "public-unknown").await.unwrap_err();

    assert!(matches!(err, EngineError::Aggregator(_)));
}

#[tokio::test]
async fn unlink_removes_accounts_and_transactions() {
    let aggregator = FakeAggregator::new();
    let (engine, db) = engine_with_db(aggregator.clone()).await;
    let alice = user(&engine, "alice").await;
    let bob = user(&engine, "bob").await;
    let item = linked_item(
        &engine,
        &aggregator,
        alice,
        "item-1",
        vec![account("acc-1", "Checking", "depository")],
    )
    .await;
    aggregator.page(
        &access_token("item-1"),
        "",
        page(vec![record("T1", "acc-1", 10.0, "FOOD_AND_DRINK")], vec![], &[], "c1", false),
    );
    engine.sync_item(item.id).await.unwrap();
    assert_eq!(engine.list_items(alice).await.unwrap().len(), 1);

    assert!(matches!(
        engine.unlink_item(bob, item.id).await,
        Err(EngineError::KeyNotFound(_))
    ));
    engine.unlink_item(alice, item.id).await.unwrap();

    assert!(engine.list_items(alice).await.unwrap().is_empty());
    assert!(engine.list_all_items().await.unwrap().is_empty());
    assert_eq!(accounts::Entity::find().count(&db).await.unwrap(), 0);
    assert_eq!(transactions::Entity::find().count(&db).await.unwrap(), 0);
}

#[tokio::test]
async fn accounts_and_transactions_are_scoped_to_their_owner() {
    let aggregator = FakeAggregator::new();
    let (engine, _db) = engine_with_db(aggregator.clone()).await;
    let alice = user(&engine, "alice").await;
    let bob = user(&engine, "bob").await;
    let item = linked_item(
        &engine,
        &aggregator,
        alice,
        "item-1",
        vec![account("acc-1", "Checking", "depository")],
    )
    .await;
    let account_id = engine.list_accounts(alice, item.id).await.unwrap()[0].id;

    assert!(matches!(
        engine.list_accounts(bob, item.id).await,
        Err(EngineError::KeyNotFound(_))
    ));
    assert!(matches!(
        engine.list_transactions(bob, account_id).await,
        Err(EngineError::KeyNotFound(_))
    ));
    assert!(matches!(
        engine.item(bob, item.id).await,
        Err(EngineError::KeyNotFound(_))
    ));
}

#[tokio::test]
async fn transaction_list_is_refreshed_after_sync() {
    let aggregator = FakeAggregator::new();
    let (engine, _db) = engine_with_db(aggregator.clone()).await;
    let alice = user(&engine, "alice").await;
    let item = linked_item(
        &engine,
        &aggregator,
        alice,
        "item-1",
        vec![account("acc-1", "Checking", "depository")],
    )
    .await;
    let token = access_token("item-1");
    let account_id = engine.list_accounts(alice, item.id).await.unwrap()[0].id;

    aggregator.page(
        &token,
        "",
        page(vec![record("T1", "acc-1", 10.0, "FOOD_AND_DRINK")], vec![], &[], "c1", false),
    );
    engine.sync_item(item.id).await.unwrap();
    assert_eq!(engine.list_transactions(alice, account_id).await.unwrap().len(), 1);
    assert_eq!(engine.cache().tracked_keys(CacheDomain::Transactions), 1);

    aggregator.page(
        &token,
        "c1",
        page(vec![record("T2", "acc-1", 20.0, "FOOD_AND_DRINK")], vec![], &[], "c2", false),
    );
    engine.sync_item(item.id).await.unwrap();

    assert_eq!(engine.cache().tracked_keys(CacheDomain::Transactions), 0);
    let listed = engine.list_transactions(alice, account_id).await.unwrap();
    assert_eq!(listed.len(), 2);
}

#[tokio::test]
async fn update_transaction_reclassifies_and_invalidates() {
    let aggregator = FakeAggregator::new();
    let (engine, _db) = engine_with_db(aggregator.clone()).await;
    let alice = user(&engine, "alice").await;
    let bob = user(&engine, "bob").await;
    let item = linked_item(
        &engine,
        &aggregator,
        alice,
        "item-1",
        vec![account("acc-1", "Checking", "depository")],
    )
    .await;
    aggregator.page(
        &access_token("item-1"),
        "",
        page(vec![record("T1", "acc-1", 10.0, "FOOD_AND_DRINK")], vec![], &[], "c1", false),
    );
    engine.sync_item(item.id).await.unwrap();
    let account_id = engine.list_accounts(alice, item.id).await.unwrap()[0].id;
    let listed = engine.list_transactions(alice, account_id).await.unwrap();
    assert!(listed[0].expense);

    let patch = TransactionPatch {
        amount: Some(-10.0),
        date: Some(NaiveDate::from_ymd_opt(2024, 4, 1).unwrap()),
        primary_category: Some("INCOME".to_string()),
        ..Default::default()
    };
    assert!(matches!(
        engine.update_transaction(bob, listed[0].id, patch.clone()).await,
        Err(EngineError::KeyNotFound(_))
    ));
    let updated = engine
        .update_transaction(alice, listed[0].id, patch)
        .await
        .unwrap();

    assert!(updated.income);
    assert!(!updated.expense);
    let listed = engine.list_transactions(alice, account_id).await.unwrap();
    assert_eq!(listed[0].amount, -10.0);
    assert_eq!(listed[0].date, NaiveDate::from_ymd_opt(2024, 4, 1).unwrap());
    assert!(listed[0].income);

    assert!(matches!(
        engine
            .update_transaction(alice, listed[0].id, TransactionPatch::default())
            .await,
        Err(EngineError::InvalidName(_))
    ));
}

#[tokio::test]
async fn delete_transaction_is_scoped() {
    let aggregator = FakeAggregator::new();
    let (engine, _db) = engine_with_db(aggregator.clone()).await;
    let alice = user(&engine, "alice").await;
    let bob = user(&engine, "bob").await;
    let item = linked_item(
        &engine,
        &aggregator,
        alice,
        "item-1",
        vec![account("acc-1", "Checking", "depository")],
    )
    .await;
    aggregator.page(
        &access_token("item-1"),
        "",
        page(vec![record("T1", "acc-1", 10.0, "FOOD_AND_DRINK")], vec![], &[], "c1", false),
    );
    engine.sync_item(item.id).await.unwrap();
    let account_id = engine.list_accounts(alice, item.id).await.unwrap()[0].id;
    let id = engine.list_transactions(alice, account_id).await.unwrap()[0].id;

    assert!(matches!(
        engine.delete_transaction(bob, id).await,
        Err(EngineError::KeyNotFound(_))
    ));
    engine.delete_transaction(alice, id).await.unwrap();

    assert!(engine.list_transactions(alice, account_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn recategorize_writes_only_changed_rows() {
    let aggregator = FakeAggregator::new();
    let (engine, db) = engine_with_db(aggregator.clone()).await;
    let alice = user(&engine, "alice").await;
    let item = linked_item(
        &engine,
        &aggregator,
        alice,
        "item-1",
        vec![account("acc-1", "Checking", "depository")],
    )
    .await;
    aggregator.page(
        &access_token("item-1"),
        "",
        page(
            vec![
                record("T1", "acc-1", 10.0, "FOOD_AND_DRINK"),
                record("T2", "acc-1", -10.0, "INCOME"),
            ],
            vec![],
            &[],
            "c1",
            false,
        ),
    );
    engine.sync_item(item.id).await.unwrap();
    assert_eq!(engine.recategorize_all().await.unwrap(), 0);

    // Simulate rows written by an older classifier.
    let stale = transactions::Entity::find()
        .all(&db)
        .await
        .unwrap()
        .into_iter()
        .find(|t| t.external_transaction_id == "T1")
        .unwrap();
    let stale_id = stale.id;
    let mut model = stale.into_active_model();
    model.expense = ActiveValue::Set(false);
    model.income = ActiveValue::Set(true);
    model.update(&db).await.unwrap();

    assert_eq!(engine.recategorize_all().await.unwrap(), 1);
    assert_eq!(engine.recategorize_all().await.unwrap(), 0);
    let fixed = transactions::Entity::find_by_id(stale_id)
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert!(fixed.expense);
    assert!(!fixed.income);
    assert!(!engine.recategorize_transaction(alice, stale_id).await.unwrap());
}

#[tokio::test]
async fn refresh_balances_writes_only_changes() {
    let aggregator = FakeAggregator::new();
    let (engine, _db) = engine_with_db(aggregator.clone()).await;
    let alice = user(&engine, "alice").await;
    let item = linked_item(
        &engine,
        &aggregator,
        alice,
        "item-1",
        vec![
            account("acc-1", "Checking", "depository"),
            account("acc-2", "Savings", "depository"),
        ],
    )
    .await;
    assert_eq!(engine.refresh_balances(item.id).await.unwrap(), 0);
    // Warm the cache so the refresh has something to invalidate.
    engine.accounts_of_item(item.id).await.unwrap();

    let mut moved = account("acc-2", "Savings", "depository");
    moved.balances = Balances {
        current: Some(250.0),
        available: Some(240.0),
    };
    aggregator.set_accounts(
        &access_token("item-1"),
        vec![account("acc-1", "Checking", "depository"), moved],
    );

    assert_eq!(engine.refresh_balances(item.id).await.unwrap(), 1);
    assert_eq!(engine.refresh_balances(item.id).await.unwrap(), 0);
    let accounts = engine.accounts_of_item(item.id).await.unwrap();
    assert_eq!(accounts[1].current_balance, Some(250.0));
    assert_eq!(accounts[1].available_balance, Some(240.0));
    assert_eq!(accounts[0].current_balance, Some(100.0));
}

#[tokio::test]
async fn clear_cache_by_name() {
    let aggregator = FakeAggregator::new();
    let (engine, _db) = engine_with_db(aggregator.clone()).await;
    let alice = user(&engine, "alice").await;
    engine.list_items(alice).await.unwrap();
    assert!(
        engine
            .cache()
            .get::<serde_json::Value>(CacheDomain::Items, &keys::items_for_user(alice))
            .is_some()
    );

    engine.clear_cache("items").unwrap();

    assert_eq!(engine.cache().tracked_keys(CacheDomain::Items), 0);
    assert_eq!(
        engine.clear_cache("budgets"),
        Err(EngineError::InvalidCacheDomain("budgets".to_string()))
    );
}

#[tokio::test]
async fn duplicate_usernames_are_rejected() {
    let aggregator = FakeAggregator::new();
    let (engine, _db) = engine_with_db(aggregator).await;
    user(&engine, "alice").await;

    assert_eq!(
        engine.create_user("alice", "other").await.unwrap_err(),
        EngineError::ExistingKey("alice".to_string())
    );
}
