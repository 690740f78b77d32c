//! Integration tests for multi-bucket transactions: atomicity, overlay
//! reads, optimistic conflicts, and rollback.

use std::sync::{Arc, Mutex};

use pulsedb_core::{
    BucketDefinition, BucketEvent, Error, FieldDefinition, FieldMap, FieldType, Filter,
    GeneratedBy, Store, StoreConfig, Value,
};

fn fields(entries: Vec<(&str, Value)>) -> FieldMap {
    entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

fn users_definition() -> BucketDefinition {
    BucketDefinition::new("id")
        .with_field("id", FieldDefinition::new(FieldType::String).required())
        .with_field(
            "orderCount",
            FieldDefinition::new(FieldType::Number).with_default(0i64),
        )
        .with_field("email", FieldDefinition::new(FieldType::String).unique())
}

fn orders_definition() -> BucketDefinition {
    BucketDefinition::new("id")
        .with_field(
            "id",
            FieldDefinition::new(FieldType::Number).generated(GeneratedBy::Autoincrement),
        )
        .with_field("userId", FieldDefinition::new(FieldType::String).required())
        .with_field("total", FieldDefinition::new(FieldType::Number))
}

async fn new_store() -> Store {
    let store = Store::start(StoreConfig::new("txn-test")).await.unwrap();
    store.define_bucket("users", users_definition()).await.unwrap();
    store.define_bucket("orders", orders_definition()).await.unwrap();
    store
}

fn collect_events(store: &Store) -> Arc<Mutex<Vec<BucketEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    store
        .on("bucket.*.*", move |event| {
            sink.lock().unwrap().push(event.clone());
        })
        .unwrap();
    events
}

#[tokio::test]
async fn test_commit_applies_all_buckets_and_batches_events() {
    let store = new_store().await;
    let events = collect_events(&store);

    let order_id = store
        .transaction(|tx| async move {
            let users = tx.bucket("users")?;
            users
                .insert(fields(vec![("id", Value::from("alice"))]))
                .await?;
            users
                .update("alice", fields(vec![("orderCount", Value::from(1i64))]))
                .await?;

            let orders = tx.bucket("orders")?;
            let order = orders
                .insert(fields(vec![
                    ("userId", Value::from("alice")),
                    ("total", Value::from(99i64)),
                ]))
                .await?;
            Ok(order.get("id").cloned().unwrap())
        })
        .await
        .unwrap();

    assert_eq!(order_id, Value::from(1i64));
    let users = store.bucket("users").unwrap();
    let alice = users.get("alice").await.unwrap().unwrap();
    assert_eq!(alice.get("orderCount"), Some(&Value::from(1i64)));
    // Insert then update collapsed into one staged insert carrying both
    // writes, so the committed record is at version 2.
    assert_eq!(alice.version(), 2);
    assert_eq!(store.bucket("orders").unwrap().count().await.unwrap(), 1);

    // One event per committed operation: users insert (collapsed) + orders
    // insert.
    let events = events.lock().unwrap();
    assert_eq!(events.len(), 2);
}

#[tokio::test]
async fn test_read_your_own_writes() {
    let store = new_store().await;
    let users_live = store.bucket("users").unwrap();
    users_live
        .insert(fields(vec![
            ("id", Value::from("bob")),
            ("email", Value::from("bob@x.com")),
        ]))
        .await
        .unwrap();

    store
        .transaction(|tx| async move {
            let users = tx.bucket("users")?;

            // Staged insert is visible to get/all/find/count.
            let staged = users
                .insert(fields(vec![("id", Value::from("carol"))]))
                .await?;
            let read_back = users.get("carol").await?.expect("staged insert visible");
            assert_eq!(read_back, staged);
            assert_eq!(users.count().await?, 2);

            // Staged update patches the live record.
            users
                .update("bob", fields(vec![("orderCount", Value::from(7i64))]))
                .await?;
            let bob = users.get("bob").await?.unwrap();
            assert_eq!(bob.get("orderCount"), Some(&Value::from(7i64)));
            assert_eq!(bob.version(), 2);

            // Staged delete hides the record.
            users.delete("bob").await?;
            assert!(users.get("bob").await?.is_none());
            assert_eq!(users.count().await?, 1);
            let found = users
                .find(Filter::new().eq("orderCount", Value::from(7i64)))
                .await?;
            assert!(found.is_empty());
            Ok(())
        })
        .await
        .unwrap();

    // The commit applied the surviving operations.
    assert!(store
        .bucket("users")
        .unwrap()
        .get("bob")
        .await
        .unwrap()
        .is_none());
    assert!(store
        .bucket("users")
        .unwrap()
        .get("carol")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_user_block_error_stages_nothing() {
    let store = new_store().await;
    let events = collect_events(&store);

    let result: Result<(), Error> = store
        .transaction(|tx| async move {
            let users = tx.bucket("users")?;
            users
                .insert(fields(vec![("id", Value::from("alice"))]))
                .await?;
            Err(Error::QueryFailed("user bailed".into()))
        })
        .await;

    assert!(matches!(result, Err(Error::QueryFailed(_))));
    assert_eq!(store.bucket("users").unwrap().count().await.unwrap(), 0);
    assert!(events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_write_fails_inside_the_block() {
    let store = new_store().await;

    let result: Result<(), Error> = store
        .transaction(|tx| async move {
            let orders = tx.bucket("orders")?;
            // Missing required userId: rejected at stage time, not commit.
            orders
                .insert(fields(vec![("total", Value::from(5i64))]))
                .await?;
            Ok(())
        })
        .await;

    match result {
        Err(Error::Validation { issues }) => {
            assert_eq!(issues[0].field, "userId");
        }
        other => panic!("expected Validation, got {other:?}"),
    }
}

#[tokio::test]
async fn test_optimistic_conflict_preserves_external_write() {
    let store = new_store().await;
    let users_live = store.bucket("users").unwrap();
    users_live
        .insert(fields(vec![("id", Value::from("alice"))]))
        .await
        .unwrap();
    let events = collect_events(&store);

    let external = users_live.clone();
    let result: Result<(), Error> = store
        .transaction(|tx| async move {
            let users = tx.bucket("users")?;
            // Reads version 1, stages an update expecting it.
            let alice = users.get("alice").await?.unwrap();
            assert_eq!(alice.version(), 1);
            users
                .update("alice", fields(vec![("orderCount", Value::from(1i64))]))
                .await?;

            let orders = tx.bucket("orders")?;
            orders
                .insert(fields(vec![
                    ("userId", Value::from("alice")),
                    ("total", Value::from(99i64)),
                ]))
                .await?;

            // Another writer advances the record before commit.
            external
                .update("alice", fields(vec![("orderCount", Value::from(5i64))]))
                .await?;
            Ok(())
        })
        .await;

    match result {
        Err(Error::TransactionConflict { bucket, key, .. }) => {
            assert_eq!(bucket, "users");
            assert_eq!(key, Value::from("alice"));
        }
        other => panic!("expected TransactionConflict, got {other:?}"),
    }

    // The interfering write is preserved; the transaction left no trace.
    let alice = users_live.get("alice").await.unwrap().unwrap();
    assert_eq!(alice.get("orderCount"), Some(&Value::from(5i64)));
    assert_eq!(alice.version(), 2);
    assert_eq!(store.bucket("orders").unwrap().count().await.unwrap(), 0);

    // Only the external update published an event.
    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn test_conflict_in_second_bucket_rolls_back_the_first() {
    let store = new_store().await;
    let users_live = store.bucket("users").unwrap();
    users_live
        .insert(fields(vec![("id", Value::from("alice"))]))
        .await
        .unwrap();
    let events = collect_events(&store);

    let external = users_live.clone();
    let result: Result<(), Error> = store
        .transaction(|tx| async move {
            // Orders is touched first, so it commits first.
            let orders = tx.bucket("orders")?;
            orders
                .insert(fields(vec![
                    ("userId", Value::from("alice")),
                    ("total", Value::from(10i64)),
                ]))
                .await?;

            let users = tx.bucket("users")?;
            users
                .update("alice", fields(vec![("orderCount", Value::from(1i64))]))
                .await?;

            external
                .update("alice", fields(vec![("orderCount", Value::from(9i64))]))
                .await?;
            Ok(())
        })
        .await;

    assert!(matches!(
        result,
        Err(Error::TransactionConflict { bucket, .. }) if bucket == "users"
    ));
    // The committed orders insert was rolled back.
    assert_eq!(store.bucket("orders").unwrap().count().await.unwrap(), 0);
    // No transaction events leaked; only the external update fired.
    assert_eq!(events.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_insert_conflicts_with_concurrent_insert_of_same_key() {
    let store = new_store().await;
    let users_live = store.bucket("users").unwrap();

    let external = users_live.clone();
    let result: Result<(), Error> = store
        .transaction(|tx| async move {
            let users = tx.bucket("users")?;
            users
                .insert(fields(vec![("id", Value::from("dup"))]))
                .await?;
            // Someone else takes the key before commit.
            external
                .insert(fields(vec![("id", Value::from("dup"))]))
                .await?;
            Ok(())
        })
        .await;

    assert!(matches!(
        result,
        Err(Error::TransactionConflict { key, .. }) if key == Value::from("dup")
    ));
    // The external insert survives untouched.
    let dup = users_live.get("dup").await.unwrap().unwrap();
    assert_eq!(dup.version(), 1);
}

#[tokio::test]
async fn test_delete_then_reinsert_unique_value_in_one_transaction() {
    let store = new_store().await;
    let users_live = store.bucket("users").unwrap();
    users_live
        .insert(fields(vec![
            ("id", Value::from("old")),
            ("email", Value::from("taken@x.com")),
        ]))
        .await
        .unwrap();

    store
        .transaction(|tx| async move {
            let users = tx.bucket("users")?;
            users.delete("old").await?;
            // The deleted record's unique value is free within the batch.
            users
                .insert(fields(vec![
                    ("id", Value::from("new")),
                    ("email", Value::from("taken@x.com")),
                ]))
                .await?;
            Ok(())
        })
        .await
        .unwrap();

    assert!(users_live.get("old").await.unwrap().is_none());
    let new = users_live.get("new").await.unwrap().unwrap();
    assert_eq!(new.get("email"), Some(&Value::from("taken@x.com")));

    // The unique index moved with the transaction.
    let found = users_live
        .find_one(Filter::new().eq("email", "taken@x.com"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.get("id"), Some(&Value::from("new")));
}

#[tokio::test]
async fn test_unique_conflict_at_commit_names_the_field() {
    let store = new_store().await;
    let users_live = store.bucket("users").unwrap();

    let external = users_live.clone();
    let result: Result<(), Error> = store
        .transaction(|tx| async move {
            let users = tx.bucket("users")?;
            users
                .insert(fields(vec![
                    ("id", Value::from("a")),
                    ("email", Value::from("x@x.com")),
                ]))
                .await?;
            // Another writer claims the unique value first.
            external
                .insert(fields(vec![
                    ("id", Value::from("b")),
                    ("email", Value::from("x@x.com")),
                ]))
                .await?;
            Ok(())
        })
        .await;

    match result {
        Err(Error::TransactionConflict { field, .. }) => {
            assert_eq!(field.as_deref(), Some("email"));
        }
        other => panic!("expected TransactionConflict, got {other:?}"),
    }
}

#[tokio::test]
async fn test_autoincrement_reserved_even_when_transaction_aborts() {
    let store = new_store().await;
    let orders_live = store.bucket("orders").unwrap();

    let result: Result<(), Error> = store
        .transaction(|tx| async move {
            let orders = tx.bucket("orders")?;
            orders
                .insert(fields(vec![
                    ("userId", Value::from("alice")),
                    ("total", Value::from(1i64)),
                ]))
                .await?;
            Err(Error::QueryFailed("abort".into()))
        })
        .await;
    assert!(result.is_err());

    // The aborted transaction consumed id 1; the next insert gets 2.
    let order = orders_live
        .insert(fields(vec![
            ("userId", Value::from("bob")),
            ("total", Value::from(2i64)),
        ]))
        .await
        .unwrap();
    assert_eq!(order.get("id"), Some(&Value::from(2i64)));
}

#[tokio::test]
async fn test_transaction_on_unknown_bucket_fails() {
    let store = new_store().await;
    let result: Result<(), Error> = store
        .transaction(|tx| async move {
            tx.bucket("ghost")?;
            Ok(())
        })
        .await;
    assert!(matches!(result, Err(Error::BucketNotDefined { .. })));
}

#[tokio::test]
async fn test_update_of_missing_record_fails_inside_block() {
    let store = new_store().await;
    let result: Result<(), Error> = store
        .transaction(|tx| async move {
            let users = tx.bucket("users")?;
            users
                .update("ghost", fields(vec![("orderCount", Value::from(1i64))]))
                .await?;
            Ok(())
        })
        .await;
    assert!(matches!(result, Err(Error::NotFound { .. })));
}
