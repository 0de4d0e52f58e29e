use anyhow::Result;
use futures::{StreamExt, TryStreamExt};
use pretty_assertions::assert_eq;
use serde_json::json;

use keystash::prelude::*;

use super::{async_test, stash, stores, Person};

#[async_test]
async fn test_cursor_streams_entries_in_both_directions() -> Result<()> {
    let stash = stash("test_cursor_streams_entries_in_both_directions").await?;

    for key in 1..=4 {
        stash
            .add(stores::NOTES, &json!(format!("note {key}")), Some(key.into()))
            .await?;
    }

    let entries = stash
        .open_cursor::<String>(stores::NOTES, KeyRange::All, QueryDirection::Backward)
        .await?
        .try_collect::<Vec<_>>()
        .await?;
    let keys = entries
        .iter()
        .map(|entry| entry.key.clone())
        .collect::<Vec<_>>();
    assert_eq!(
        keys,
        vec![Key::from(4), Key::from(3), Key::from(2), Key::from(1)]
    );
    assert_eq!(entries[0].value, "note 4");

    let entries = stash
        .open_cursor::<String>(
            stores::NOTES,
            KeyRange::from_range(Key::from(2)..=Key::from(3)),
            QueryDirection::Forward,
        )
        .await?
        .try_collect::<Vec<_>>()
        .await?;
    assert_eq!(
        entries,
        vec![
            CursorEntry {
                key: Key::from(2),
                primary_key: Key::from(2),
                value: "note 2".to_string(),
            },
            CursorEntry {
                key: Key::from(3),
                primary_key: Key::from(3),
                value: "note 3".to_string(),
            },
        ]
    );
    Ok(())
}

#[async_test]
async fn test_index_cursor_yields_index_keys() -> Result<()> {
    let stash = stash("test_index_cursor_yields_index_keys").await?;

    for (name, age) in [("Alice", 30), ("Bob", 25), ("Carol", 41)] {
        stash
            .add(stores::PEOPLE, &Person::new(name, age), None)
            .await?;
    }

    let entries = stash
        .open_cursor_by_index::<Person>(
            stores::PEOPLE,
            stores::people::AGE,
            KeyRange::All,
            QueryDirection::Backward,
            TransactionMode::ReadOnly,
        )
        .await?
        .try_collect::<Vec<_>>()
        .await?;

    let summary = entries
        .into_iter()
        .map(|entry| (entry.key, entry.primary_key, entry.value.name))
        .collect::<Vec<_>>();
    assert_eq!(
        summary,
        vec![
            (Key::from(41), Key::from(3), "Carol".to_string()),
            (Key::from(30), Key::from(1), "Alice".to_string()),
            (Key::from(25), Key::from(2), "Bob".to_string()),
        ]
    );
    Ok(())
}

#[async_test]
async fn test_dropping_cursor_releases_connection() -> Result<()> {
    let stash = stash("test_dropping_cursor_releases_connection").await?;

    for key in 1..=3 {
        stash
            .add(stores::NOTES, &json!(key), Some(key.into()))
            .await?;
    }

    let mut cursor = stash
        .open_cursor::<i64>(stores::NOTES, KeyRange::All, QueryDirection::Forward)
        .await?;
    let first = cursor.next().await.transpose()?;
    assert_eq!(first.map(|entry| entry.value), Some(1));
    drop(cursor);

    stash.delete_database().await?;
    Ok(())
}
