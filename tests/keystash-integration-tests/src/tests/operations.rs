use std::collections::BTreeSet;

use anyhow::Result;
use pretty_assertions::assert_eq;
use serde_json::json;

use keystash::prelude::*;

use super::{async_test, stash, stores, Person};

#[async_test]
async fn test_add_generates_distinct_keys() -> Result<()> {
    let stash = stash("test_add_generates_distinct_keys").await?;

    let mut keys = BTreeSet::new();
    for (name, age) in [("Alice", 30), ("Bob", 25), ("Carol", 41)] {
        keys.insert(
            stash
                .add(stores::PEOPLE, &Person::new(name, age), None)
                .await?,
        );
    }
    assert_eq!(keys.len(), 3);

    let alice = stash
        .get_by_index::<Person>(stores::PEOPLE, stores::people::EMAIL, "alice@example.com")
        .await?
        .expect("Alice should exist");
    assert!(keys.contains(&Key::from(alice.id.expect("Alice should have an id"))));

    Ok(())
}

#[async_test]
async fn test_add_item_returns_stored_record() -> Result<()> {
    let stash = stash("test_add_item_returns_stored_record").await?;

    let stored = stash
        .add_item(stores::PEOPLE, &Person::new("Alice", 30), None)
        .await?;
    assert_eq!(stored, Some(Person::new("Alice", 30).with_id(1)));

    let note = stash
        .add_item_with_key(stores::NOTES, &json!({ "text": "hello" }), "greeting")
        .await?;
    assert_eq!(note, Some(json!({ "text": "hello" })));

    assert_eq!(
        stash.get_by_id::<Person>(stores::PEOPLE, 1).await?,
        Some(Person::new("Alice", 30).with_id(1))
    );
    Ok(())
}

#[async_test]
async fn test_update_reflects_row() -> Result<()> {
    let stash = stash("test_update_reflects_row").await?;

    let key = stash
        .add(stores::PEOPLE, &Person::new("Alice", 30), None)
        .await?;
    let Key::Integer(id) = key else {
        panic!("Expected an integer key, got {:?}", key)
    };

    let mut alice = Person::new("Alice", 31).with_id(id);
    alice.name = "Alice Liddell".to_string();
    let all = stash.update(stores::PEOPLE, &alice, None).await?;
    assert_eq!(all, vec![alice.clone()]);

    assert_eq!(
        stash.get_by_key::<Person>(stores::PEOPLE, id).await?,
        Some(alice)
    );

    let note = stash
        .update_by_key(stores::NOTES, &json!("draft"), "memo")
        .await?;
    assert_eq!(note, Some(json!("draft")));
    let note = stash
        .update_by_key(stores::NOTES, &json!("final"), "memo")
        .await?;
    assert_eq!(note, Some(json!("final")));
    Ok(())
}

#[async_test]
async fn test_delete_removes_rows() -> Result<()> {
    let stash = stash("test_delete_removes_rows").await?;

    for key in 1..=3 {
        stash
            .add(stores::NOTES, &json!(format!("note {key}")), Some(key.into()))
            .await?;
    }

    let remaining = stash.delete::<String>(stores::NOTES, 2).await?;
    assert_eq!(remaining, vec!["note 1".to_string(), "note 3".to_string()]);
    assert_eq!(stash.get_by_key::<String>(stores::NOTES, 2).await?, None);

    assert!(stash.delete_by_key(stores::NOTES, 1).await?);
    assert_eq!(stash.get_by_key::<String>(stores::NOTES, 1).await?, None);

    assert!(stash.clear(stores::NOTES).await?);
    assert_eq!(stash.count(stores::NOTES, KeyRange::All).await?, 0);
    Ok(())
}

#[async_test]
async fn test_count_with_ranges() -> Result<()> {
    let stash = stash("test_count_with_ranges").await?;

    for key in 1..=5 {
        stash
            .add(stores::NOTES, &json!(key), Some(key.into()))
            .await?;
    }

    assert_eq!(stash.count(stores::NOTES, KeyRange::All).await?, 5);
    assert_eq!(stash.count(stores::NOTES, Key::from(3)).await?, 1);
    assert_eq!(stash.count(stores::NOTES, Key::from(9)).await?, 0);
    assert_eq!(
        stash
            .count(stores::NOTES, KeyRange::from_range(Key::from(2)..Key::from(4)))
            .await?,
        2
    );
    assert_eq!(
        stash
            .count(stores::NOTES, KeyRange::from_range(Key::from(4)..))
            .await?,
        2
    );
    Ok(())
}

#[async_test]
async fn test_get_all_by_index_follows_index_order() -> Result<()> {
    let stash = stash("test_get_all_by_index_follows_index_order").await?;

    for (name, age) in [("Alice", 30), ("Bob", 25), ("Carol", 41), ("Dave", 25)] {
        stash
            .add(stores::PEOPLE, &Person::new(name, age), None)
            .await?;
    }

    let people = stash
        .get_all_by_index::<Person>(stores::PEOPLE, stores::people::AGE, KeyRange::All)
        .await?;
    let names = people
        .iter()
        .map(|person| person.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["Bob", "Dave", "Alice", "Carol"]);

    let entries = stash
        .get_all_keys_by_index(
            stores::PEOPLE,
            stores::people::AGE,
            KeyRange::from_range(Key::from(26)..),
        )
        .await?;
    assert_eq!(
        entries,
        vec![
            IndexKeyEntry {
                primary_key: Key::from(1),
                key: Key::from(30),
            },
            IndexKeyEntry {
                primary_key: Key::from(3),
                key: Key::from(41),
            },
        ]
    );

    let result = stash
        .get_all_by_index::<Person>(stores::PEOPLE, "nickname", KeyRange::All)
        .await;
    assert!(matches!(result, Err(Error::IndexNotFound { index, .. }) if index == "nickname"));
    Ok(())
}

#[async_test]
async fn test_bulk_add_keeps_partial_commits() -> Result<()> {
    let stash = stash("test_bulk_add_keeps_partial_commits").await?;
    stash
        .add(stores::PEOPLE, &Person::new("Alice", 30), None)
        .await?;

    let result = stash
        .bulk_add(
            stores::PEOPLE,
            vec![
                BulkItem::new(Person::new("Bob", 25)),
                BulkItem::new(Person::new("Alice", 52)),
                BulkItem::new(Person::new("Carol", 41)),
            ],
        )
        .await;

    assert!(result
        .err()
        .and_then(|err| err.engine_error().map(|err| err.is_constraint_error()))
        .unwrap_or(false));
    assert_eq!(stash.count(stores::PEOPLE, KeyRange::All).await?, 3);

    let keys = stash
        .bulk_add(
            stores::NOTES,
            vec![
                BulkItem::with_key(json!("a"), "a"),
                BulkItem::with_key(json!("b"), "b"),
            ],
        )
        .await?;
    assert_eq!(keys, vec![Key::from("a"), Key::from("b")]);
    Ok(())
}

#[async_test]
async fn test_missing_store_fails_before_transaction() -> Result<()> {
    let stash = stash("test_missing_store_fails_before_transaction").await?;

    #[cfg(not(target_arch = "wasm32"))]
    let started = stash.driver().transactions_started();

    let result = stash.get_all::<Person>("missing").await;
    assert!(matches!(result, Err(Error::StoreNotFound(store)) if store == "missing"));

    let result = stash.add("missing", &json!(1), None).await;
    assert!(matches!(result, Err(Error::StoreNotFound(_))));

    #[cfg(not(target_arch = "wasm32"))]
    assert_eq!(stash.driver().transactions_started(), started);
    Ok(())
}

#[async_test]
async fn test_delete_database_is_blocked_by_open_connections() -> Result<()> {
    let stash = stash("test_delete_database_is_blocked_by_open_connections").await?;
    stash
        .add(stores::NOTES, &json!("survivor"), Some(Key::from(1)))
        .await?;

    let connection = stash
        .driver()
        .open(stash.name(), stash.version(), None)
        .await?;
    let result = stash.delete_database().await;
    assert!(matches!(result, Err(Error::BlockedDelete(_))));

    // A blocked browser delete still goes through once the connection closes.
    connection.close();

    #[cfg(not(target_arch = "wasm32"))]
    {
        assert_eq!(stash.count(stores::NOTES, KeyRange::All).await?, 1);
        assert_eq!(
            stash.get_by_key::<String>(stores::NOTES, 1).await?,
            Some("survivor".to_string())
        );
    }

    stash.driver().delete_database(stash.name()).await?;

    let result = stash.get_all::<Person>(stores::PEOPLE).await;
    assert!(matches!(result, Err(Error::DatabaseNotFound(_))));
    Ok(())
}
